//! text/event-stream framing for server-pushed JSON values.
//!
//! Every emitted value travels as one event:
//! - a `data: ` line carrying the compact JSON encoding of the value
//! - a blank line that terminates the event
//!
//! The decoder is incremental: bytes may arrive split across arbitrary
//! network reads, and callers only ever see complete frames.

pub mod codec;
pub mod error;
pub mod reader;
pub mod wire;

pub use codec::{encode_comment, encode_event, Event, Frame, FrameConfig, FrameDecoder};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use wire::{
    is_event_stream_content_type, is_json_content_type, ACCEPT_EVENT_STREAM,
    CACHE_CONTROL_NO_STORE, CONNECTION_KEEP_ALIVE, CONTENT_TYPE_EVENT_STREAM, CONTENT_TYPE_JSON,
};
