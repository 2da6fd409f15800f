use reqwest::StatusCode;

/// Errors surfaced to stream consumers.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server rejected the input (400 with a JSON `{message}` body).
    #[error("{message}")]
    Validation { message: String },

    /// Any other non-success response.
    #[error("server responded {status}: {message}")]
    Transport { status: StatusCode, message: String },

    /// The server answered without a body.
    #[error("server sent an empty response")]
    EmptyResponse,

    /// The request could not be sent or the connection failed.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The event stream broke mid-way.
    #[error(transparent)]
    Frame(#[from] sseprims_frame::FrameError),

    /// An event carried a payload that did not parse as the expected type.
    #[error("invalid event payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// True when the server refused the input rather than failing.
    pub fn is_validation(&self) -> bool {
        matches!(self, ClientError::Validation { .. })
    }

    /// HTTP status for errors that carry one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Validation { .. } => Some(StatusCode::BAD_REQUEST),
            ClientError::Transport { status, .. } => Some(*status),
            ClientError::Http(err) => err.status(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
