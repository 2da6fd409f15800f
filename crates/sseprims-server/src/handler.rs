//! Request handling: method check, input validation, session startup.

use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::Instrument;

use sseprims_frame::{CACHE_CONTROL_NO_STORE, CONNECTION_KEEP_ALIVE, CONTENT_TYPE_EVENT_STREAM};
use sseprims_schema::{join_messages, InputValidator, Validation};

use crate::error::{ProducerFault, ServerError};
use crate::producer::Producer;
use crate::session::{ClosePolicy, CloseReason, SessionBody, SessionCore, Subscriber};

/// Default limit on request body bytes (1 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Per-route handler settings.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Request bodies over this many bytes are rejected with 400.
    pub max_body_size: usize,
    pub close_policy: ClosePolicy,
    /// Comment frames sent after this much silence. `None` disables them.
    pub keep_alive: Option<Duration>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            close_policy: ClosePolicy::default(),
            keep_alive: None,
        }
    }
}

/// Turns one request into one streaming session.
pub struct StreamHandler<V, P, T> {
    route: Arc<str>,
    validator: Arc<V>,
    producer: Arc<P>,
    config: HandlerConfig,
    next_session_id: Arc<AtomicU64>,
    _marker: PhantomData<fn(&T)>,
}

impl<V, P, T> Clone for StreamHandler<V, P, T> {
    fn clone(&self) -> Self {
        Self {
            route: Arc::clone(&self.route),
            validator: Arc::clone(&self.validator),
            producer: Arc::clone(&self.producer),
            config: self.config.clone(),
            next_session_id: Arc::clone(&self.next_session_id),
            _marker: PhantomData,
        }
    }
}

impl<V, P, T> std::fmt::Debug for StreamHandler<V, P, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandler")
            .field("route", &self.route)
            .field("config", &self.config)
            .finish()
    }
}

impl<V, P, T> StreamHandler<V, P, T>
where
    V: InputValidator,
    P: Producer<V::Input, T>,
    T: Serialize + 'static,
{
    pub fn new(route: impl Into<Arc<str>>, validator: V, producer: P, config: HandlerConfig) -> Self {
        Self {
            route: route.into(),
            validator: Arc::new(validator),
            producer: Arc::new(producer),
            config,
            next_session_id: Arc::new(AtomicU64::new(1)),
            _marker: PhantomData,
        }
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    /// Handle one request.
    ///
    /// Returns `Err` only for methods that cannot carry a body. Body and
    /// validation problems come back as a 400 response with a JSON
    /// `{"message": ...}` body, and the producer never runs.
    pub async fn handle(&self, request: Request<Body>) -> Result<Response<Body>, ServerError> {
        let method = request.method().clone();
        if method == Method::GET || method == Method::HEAD {
            return Err(ServerError::MethodNotAllowed { method });
        }

        let raw = match read_input(request, self.config.max_body_size).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::debug!(route = %self.route, error = %err, "rejecting request body");
                return Ok(err.into_response());
            }
        };

        let input = match self.validator.safe_parse(&raw) {
            Validation::Success(input) => input,
            Validation::Failure(issues) => {
                let message = join_messages(&issues);
                tracing::debug!(route = %self.route, %message, "input failed validation");
                return Ok(message_response(StatusCode::BAD_REQUEST, message));
            }
        };

        Ok(self.start_session(input))
    }

    fn start_session(&self, input: V::Input) -> Response<Body> {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let core = SessionCore::new(session_id, Arc::clone(&self.route), tx);
        let subscriber = Subscriber::new(Arc::clone(&core), Arc::new(input));

        let span = tracing::debug_span!("session", session_id, route = %self.route);
        tokio::spawn(
            drive(
                Arc::clone(&core),
                Arc::clone(&self.producer),
                subscriber,
                self.config.close_policy,
            )
            .instrument(span),
        );

        let body = SessionBody::new(core, rx, self.config.keep_alive);
        let mut response = Response::new(Body::from_stream(body));
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(CONTENT_TYPE_EVENT_STREAM),
        );
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(CACHE_CONTROL_NO_STORE),
        );
        headers.insert(
            header::CONNECTION,
            HeaderValue::from_static(CONNECTION_KEEP_ALIVE),
        );
        response
    }
}

/// Runs the producer and applies the close policy to whatever it returns.
async fn drive<I, T, P>(
    core: Arc<SessionCore>,
    producer: Arc<P>,
    subscriber: Subscriber<I, T>,
    policy: ClosePolicy,
) where
    P: Producer<I, T>,
{
    if !core.start() {
        tracing::debug!("client left before the producer started");
        return;
    }
    tracing::debug!("session started");

    let aborted = core.aborted().clone();
    let run = AssertUnwindSafe(async move { producer.subscribe(subscriber).await }).catch_unwind();

    let outcome = tokio::select! {
        outcome = run => outcome,
        _ = aborted.cancelled() => {
            tracing::debug!("client disconnected during producer setup");
            return;
        }
    };

    let result = match outcome {
        Ok(result) => result,
        Err(panic) => Err(ProducerFault::from_panic(panic.as_ref())),
    };

    match result {
        Ok(teardown) => {
            let returned_teardown = teardown.is_some();
            if let Some(teardown) = teardown {
                core.register_teardown(teardown);
            }
            if policy.closes_on_exit(returned_teardown) {
                core.close(CloseReason::ProducerExit);
            }
        }
        Err(fault) => {
            tracing::error!(error = %fault, "producer failed; closing stream");
            core.close(CloseReason::ProducerFault);
        }
    }
}

async fn read_input(request: Request<Body>, limit: usize) -> Result<Value, ServerError> {
    let bytes = axum::body::to_bytes(request.into_body(), limit)
        .await
        .map_err(|err| ServerError::BodyUnreadable(err.to_string()))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(mut body)) => Ok(body.remove("input").unwrap_or(Value::Null)),
        Ok(_) => Err(ServerError::InvalidBody(
            "expected a JSON object with an `input` field".to_string(),
        )),
        Err(err) => Err(ServerError::InvalidBody(err.to_string())),
    }
}

fn message_response(status: StatusCode, message: String) -> Response<Body> {
    (status, Json(serde_json::json!({ "message": message }))).into_response()
}
