//! Header values shared by both ends of the protocol.

/// Content type of a streaming success response.
pub const CONTENT_TYPE_EVENT_STREAM: &str = "text/event-stream";

/// Content type of a validation failure response.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// `Accept` value sent by the client when opening a stream.
pub const ACCEPT_EVENT_STREAM: &str = CONTENT_TYPE_EVENT_STREAM;

/// Streaming responses must never be cached or transformed by proxies.
pub const CACHE_CONTROL_NO_STORE: &str = "no-store, no-transform";

/// The exchange stays open for the lifetime of the session.
pub const CONNECTION_KEEP_ALIVE: &str = "keep-alive";

/// Returns true if a `Content-Type` header value denotes JSON.
pub fn is_json_content_type(value: &str) -> bool {
    value
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case(CONTENT_TYPE_JSON))
        .unwrap_or(false)
}

/// Returns true if a `Content-Type` header value denotes an event stream.
pub fn is_event_stream_content_type(value: &str) -> bool {
    value
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case(CONTENT_TYPE_EVENT_STREAM))
        .unwrap_or(false)
}
