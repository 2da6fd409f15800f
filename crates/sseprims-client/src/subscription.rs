//! Callback-driven consumption with an overlap guard.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::StreamClient;
use crate::error::ClientError;

type DataCallback<O> = Box<dyn FnMut(O) -> BoxFuture<'static, ()> + Send>;
type ErrorCallback = Box<dyn FnOnce(Arc<ClientError>) + Send>;

/// How one consumption ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// The server closed the stream.
    Completed,
    /// The caller's cancellation token fired.
    Cancelled,
    /// A fault ended the stream; see [`Subscription::last_error`].
    Failed,
}

/// Snapshot published to [`Subscription::status`] watchers.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionStatus {
    pub is_streaming: bool,
    pub last_error: Option<Arc<ClientError>>,
}

/// Arguments to [`Subscription::subscribe`].
pub struct SubscribeOptions<I, O> {
    input: Option<I>,
    cancel: Option<CancellationToken>,
    on_data: DataCallback<O>,
    on_error: Option<ErrorCallback>,
}

impl<I, O> SubscribeOptions<I, O> {
    /// `on_data` runs once per value and is awaited before the next value
    /// is read.
    pub fn new<F, Fut>(mut on_data: F) -> Self
    where
        F: FnMut(O) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            input: None,
            cancel: None,
            on_data: Box::new(move |value| on_data(value).boxed()),
            on_error: None,
        }
    }

    pub fn input(mut self, input: I) -> Self {
        self.input = Some(input);
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Receive the fault instead of having it logged.
    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: FnOnce(Arc<ClientError>) + Send + 'static,
    {
        self.on_error = Some(Box::new(on_error));
        self
    }
}

impl<I: fmt::Debug, O> fmt::Debug for SubscribeOptions<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("input", &self.input)
            .field("has_cancel", &self.cancel.is_some())
            .field("has_on_error", &self.on_error.is_some())
            .finish()
    }
}

struct Shared {
    streaming: AtomicBool,
    status: watch::Sender<SubscriptionStatus>,
}

impl Shared {
    fn begin(&self) -> bool {
        if self
            .streaming
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.status.send_replace(SubscriptionStatus {
            is_streaming: true,
            last_error: None,
        });
        true
    }

    fn record_error(&self, err: Arc<ClientError>) {
        self.status
            .send_modify(|status| status.last_error = Some(Arc::clone(&err)));
    }
}

/// Clears the streaming flag however the consuming task ends.
struct StreamingGuard(Arc<Shared>);

impl Drop for StreamingGuard {
    fn drop(&mut self) {
        self.0.status.send_modify(|status| status.is_streaming = false);
        self.0.streaming.store(false, Ordering::Release);
    }
}

/// Consumes a stream endpoint through callbacks, one stream at a time.
///
/// Clones share the same streaming flag and last error.
pub struct Subscription<I, O> {
    client: StreamClient<I, O>,
    shared: Arc<Shared>,
}

impl<I, O> Clone for Subscription<I, O> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<I, O> fmt::Debug for Subscription<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("client", &self.client)
            .field("is_streaming", &self.shared.streaming.load(Ordering::Acquire))
            .finish()
    }
}

impl<I, O> Subscription<I, O> {
    pub fn new(client: StreamClient<I, O>) -> Self {
        let (status, _) = watch::channel(SubscriptionStatus::default());
        Self {
            client,
            shared: Arc::new(Shared {
                streaming: AtomicBool::new(false),
                status,
            }),
        }
    }

    pub fn client(&self) -> &StreamClient<I, O> {
        &self.client
    }

    /// True while a consumption is in flight.
    pub fn is_streaming(&self) -> bool {
        self.shared.streaming.load(Ordering::Acquire)
    }

    /// Fault from the most recent consumption, if it failed.
    pub fn last_error(&self) -> Option<Arc<ClientError>> {
        self.shared.status.borrow().last_error.clone()
    }

    /// Watch streaming state and errors as they change.
    pub fn status(&self) -> watch::Receiver<SubscriptionStatus> {
        self.shared.status.subscribe()
    }
}

impl<I, O> Subscription<I, O>
where
    I: Serialize + Send + Sync + 'static,
    O: DeserializeOwned + Send + 'static,
{
    /// Start consuming on a background task.
    ///
    /// Returns `None` without connecting while another consumption from
    /// this subscription is still streaming. Faults never propagate: they
    /// become [`last_error`](Self::last_error) and go to `on_error`, or to
    /// the log when no callback is set.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, options: SubscribeOptions<I, O>) -> Option<SubscriptionHandle> {
        if !self.shared.begin() {
            tracing::debug!(url = %self.client.url(), "already streaming; subscribe ignored");
            return None;
        }

        let SubscribeOptions {
            input,
            cancel,
            on_data,
            on_error,
        } = options;
        let cancel = cancel.unwrap_or_default();
        let guard = StreamingGuard(Arc::clone(&self.shared));
        let client = self.client.clone();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let guard = guard;
            consume(client, input, task_cancel, on_data, on_error, &guard.0).await
        });

        Some(SubscriptionHandle { cancel, task })
    }
}

async fn consume<I, O>(
    client: StreamClient<I, O>,
    input: Option<I>,
    cancel: CancellationToken,
    mut on_data: DataCallback<O>,
    on_error: Option<ErrorCallback>,
    shared: &Shared,
) -> SubscribeOutcome
where
    I: Serialize,
    O: DeserializeOwned,
{
    let fail = |err: ClientError| {
        let err = Arc::new(err);
        shared.record_error(Arc::clone(&err));
        match on_error {
            Some(on_error) => on_error(err),
            None => tracing::error!(url = %client.url(), error = %err, "stream failed"),
        }
        SubscribeOutcome::Failed
    };

    let mut events = match client.open(input.as_ref(), Some(cancel)).await {
        Ok(events) => events,
        Err(err) => return fail(err),
    };

    let mut received = 0u64;
    while let Some(item) = events.next().await {
        match item {
            Ok(value) => {
                received += 1;
                on_data(value).await;
            }
            Err(err) => return fail(err),
        }
    }

    tracing::debug!(url = %client.url(), received, cancelled = events.is_cancelled(), "stream ended");
    if events.is_cancelled() {
        SubscribeOutcome::Cancelled
    } else {
        SubscribeOutcome::Completed
    }
}

/// Handle to one running consumption.
///
/// Dropping the handle leaves the consumption running.
#[derive(Debug)]
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    task: JoinHandle<SubscribeOutcome>,
}

impl SubscriptionHandle {
    /// Stop consuming. The current `on_data` call finishes first.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the consumption to end.
    pub async fn join(self) -> SubscribeOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_cancelled() => SubscribeOutcome::Cancelled,
            Err(err) => {
                tracing::error!(error = %err, "subscription task panicked");
                SubscribeOutcome::Failed
            }
        }
    }
}
