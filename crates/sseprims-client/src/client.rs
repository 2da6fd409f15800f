use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, TryFutureExt};
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use sseprims_frame::{
    is_event_stream_content_type, is_json_content_type, Frame, FrameConfig, FrameReader,
    ACCEPT_EVENT_STREAM,
};

use crate::error::{ClientError, Result};

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Client configuration.
///
/// No overall request timeout is applied; a stream stays open for as long
/// as the server keeps emitting.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Option<Duration>,
    /// Headers sent with every request, e.g. authorization.
    pub headers: HeaderMap,
    pub frame: FrameConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            headers: HeaderMap::new(),
            frame: FrameConfig::default(),
        }
    }
}

#[derive(Serialize)]
struct RequestBody<'a, I> {
    #[serde(skip_serializing_if = "Option::is_none")]
    input: Option<&'a I>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Typed client for one stream endpoint.
///
/// `I` is the input sent in the request body, `O` the type of each value
/// the server emits.
pub struct StreamClient<I, O> {
    http: reqwest::Client,
    url: String,
    config: ClientConfig,
    _marker: PhantomData<fn(&I) -> O>,
}

impl<I, O> Clone for StreamClient<I, O> {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            url: self.url.clone(),
            config: self.config.clone(),
            _marker: PhantomData,
        }
    }
}

impl<I, O> fmt::Debug for StreamClient<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamClient")
            .field("url", &self.url)
            .field("config", &self.config)
            .finish()
    }
}

impl<I, O> StreamClient<I, O>
where
    I: Serialize,
    O: DeserializeOwned,
{
    /// Client with default configuration.
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_config(url, ClientConfig::default())
    }

    pub fn with_config(url: impl Into<String>, config: ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().default_headers(config.headers.clone());
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            url: url.into(),
            config,
            _marker: PhantomData,
        })
    }

    /// Reuse an existing `reqwest` client (connection pool, TLS setup).
    pub fn with_http(url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            http,
            url: url.into(),
            config: ClientConfig::default(),
            _marker: PhantomData,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send the request and return the stream of emitted values.
    ///
    /// Fails before any value is read when the server rejects the request.
    /// Cancelling `cancel` while the request is in flight returns a stream
    /// that is already finished.
    pub async fn open(
        &self,
        input: Option<&I>,
        cancel: Option<CancellationToken>,
    ) -> Result<EventStream<O>> {
        let cancel = cancel.unwrap_or_default();
        let request = self
            .http
            .post(&self.url)
            .header(ACCEPT, ACCEPT_EVENT_STREAM)
            .json(&RequestBody { input });

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            response = request.send() => Some(response?),
        };
        let Some(response) = response else {
            tracing::debug!(url = %self.url, "stream cancelled before the server answered");
            return Ok(EventStream::cancelled(cancel));
        };

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }
        if status == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
            return Err(ClientError::EmptyResponse);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        if !content_type.is_some_and(is_event_stream_content_type) {
            tracing::warn!(
                url = %self.url,
                content_type = content_type.unwrap_or("<none>"),
                "response is not text/event-stream; decoding it anyway"
            );
        }

        tracing::debug!(url = %self.url, %status, "event stream opened");
        let body: ByteStream = Box::pin(response.bytes_stream());
        Ok(EventStream {
            reader: Some(FrameReader::with_config(body, self.config.frame.clone())),
            cancel,
            cancelled: false,
            _marker: PhantomData,
        })
    }
}

impl<I, O> StreamClient<I, O>
where
    I: Serialize + Send + Sync + 'static,
    O: DeserializeOwned + Send + 'static,
{
    /// Lazy variant of [`open`](Self::open): the request goes out on first poll
    /// and request errors arrive as the stream's only item.
    pub fn stream(
        &self,
        input: Option<I>,
        cancel: Option<CancellationToken>,
    ) -> impl Stream<Item = Result<O>> + Send + 'static {
        let client = self.clone();
        async move {
            client
                .open(input.as_ref(), cancel)
                .await
                .map(EventStream::into_stream)
        }
        .try_flatten_stream()
    }
}

async fn error_from_response(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(is_json_content_type);
    let text = response.text().await.unwrap_or_default();

    if status == StatusCode::BAD_REQUEST && is_json {
        if let Ok(body) = serde_json::from_str::<ErrorBody>(&text) {
            return ClientError::Validation {
                message: body.message,
            };
        }
    }

    let message = if text.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        text
    };
    ClientError::Transport { status, message }
}

/// Values emitted by one session, in order.
///
/// Ends when the server closes the stream or the cancellation token fires.
/// A broken connection or an unparsable payload yields one `Err`, after
/// which the stream is finished.
pub struct EventStream<O> {
    reader: Option<FrameReader<ByteStream>>,
    cancel: CancellationToken,
    cancelled: bool,
    _marker: PhantomData<fn() -> O>,
}

impl<O> fmt::Debug for EventStream<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("finished", &self.reader.is_none())
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

impl<O: DeserializeOwned> EventStream<O> {
    fn cancelled(cancel: CancellationToken) -> Self {
        Self {
            reader: None,
            cancel,
            cancelled: true,
            _marker: PhantomData,
        }
    }

    /// Next emitted value, or `None` once the stream is over.
    pub async fn next(&mut self) -> Option<Result<O>> {
        loop {
            let reader = self.reader.as_mut()?;
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                frame = reader.read_frame() => Some(frame),
            };

            let Some(read) = read else {
                tracing::debug!("event stream cancelled");
                self.cancelled = true;
                self.reader = None;
                return None;
            };

            match read {
                Ok(Some(Frame::Event(event))) => {
                    let value = serde_json::from_str(&event.data).map_err(ClientError::from);
                    if value.is_err() {
                        self.reader = None;
                    }
                    return Some(value);
                }
                Ok(Some(Frame::Retry(delay))) => {
                    tracing::trace!(?delay, "ignoring retry hint");
                }
                Ok(None) => {
                    self.reader = None;
                    return None;
                }
                Err(err) => {
                    self.reader = None;
                    return Some(Err(err.into()));
                }
            }
        }
    }

    /// Whether the stream ended because its cancellation token fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.reader.is_none()
    }

    /// Token that ends this stream when cancelled.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<O>> {
        futures_util::stream::unfold(self, |mut events| async move {
            events.next().await.map(|item| (item, events))
        })
    }
}
