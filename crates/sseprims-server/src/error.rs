use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Errors raised by the request handler before a session starts.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The request method cannot carry a JSON body.
    #[error(
        "method {method} not allowed: stream handlers expect a method that can have a body, like POST, PUT or DELETE"
    )]
    MethodNotAllowed { method: Method },

    /// The request body is not a JSON object.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// The request body exceeded the configured limit or could not be read.
    #[error("failed to read request body: {0}")]
    BodyUnreadable(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ServerError::InvalidBody(_) | ServerError::BodyUnreadable(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "message": self.to_string() }));
        match self {
            ServerError::MethodNotAllowed { .. } => (
                status,
                [(header::ALLOW, "POST, PUT, PATCH, DELETE")],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}

/// Why an emit did not reach the wire.
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    /// The session is closed; the value was dropped.
    #[error("session closed")]
    Closed,

    /// The value could not be encoded.
    #[error(transparent)]
    Encode(#[from] sseprims_frame::FrameError),
}

/// A producer that failed after streaming began.
///
/// Faults are logged and close the stream; they never reach the client.
#[derive(Debug, thiserror::Error)]
pub enum ProducerFault {
    #[error("producer failed: {0}")]
    Failed(Box<dyn std::error::Error + Send + Sync>),

    #[error("producer panicked: {0}")]
    Panicked(String),
}

impl ProducerFault {
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        ProducerFault::Panicked(message)
    }
}
