/// Errors that can occur during event encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The value could not be serialized to JSON.
    #[error("failed to serialize event payload: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A single event grew past the configured maximum size.
    #[error("event too large ({size} bytes, max {max})")]
    EventTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading the underlying byte stream.
    #[error("event stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
