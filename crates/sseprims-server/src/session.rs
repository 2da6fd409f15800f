//! Per-request session: state machine, subscriber handle and response body.

use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use sseprims_frame::{encode_comment, encode_event};

use crate::error::{EmitError, ProducerFault};
use crate::teardown::{Teardown, TeardownGate};

/// Lifecycle of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Closed,
}

const CREATED: u8 = 0;
const RUNNING: u8 = 1;
const CLOSED: u8 = 2;

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            CREATED => SessionState::Created,
            RUNNING => SessionState::Running,
            _ => SessionState::Closed,
        }
    }
}

/// When a session closes relative to its producer returning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClosePolicy {
    /// Close as soon as the producer returns.
    OnExit,
    /// Stay open until `close()` or client disconnect.
    Explicit,
    /// Close on return unless the producer handed back a teardown.
    #[default]
    Auto,
}

impl ClosePolicy {
    pub(crate) fn closes_on_exit(self, returned_teardown: bool) -> bool {
        match self {
            ClosePolicy::OnExit => true,
            ClosePolicy::Explicit => false,
            ClosePolicy::Auto => !returned_teardown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    Explicit,
    ProducerExit,
    ProducerFault,
    ClientAbort,
}

pub(crate) struct SessionCore {
    id: u64,
    route: Arc<str>,
    state: AtomicU8,
    sender: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    teardown: TeardownGate,
    closed: CancellationToken,
    aborted: CancellationToken,
    emitted: AtomicU64,
}

impl SessionCore {
    pub(crate) fn new(
        id: u64,
        route: Arc<str>,
        sender: mpsc::UnboundedSender<Bytes>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            route,
            state: AtomicU8::new(CREATED),
            sender: Mutex::new(Some(sender)),
            teardown: TeardownGate::new(),
            closed: CancellationToken::new(),
            aborted: CancellationToken::new(),
            emitted: AtomicU64::new(0),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// `Created -> Running`. False if the session closed first.
    pub(crate) fn start(&self) -> bool {
        self.state
            .compare_exchange(CREATED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn aborted(&self) -> &CancellationToken {
        &self.aborted
    }

    pub(crate) fn send(&self, frame: Bytes) -> Result<(), EmitError> {
        let sender = self.lock_sender();
        let Some(tx) = sender.as_ref() else {
            return Err(EmitError::Closed);
        };
        tx.send(frame).map_err(|_| EmitError::Closed)?;
        self.emitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Move to `Closed`. Only the first call has any effect.
    pub(crate) fn close(&self, reason: CloseReason) -> bool {
        {
            let mut sender = self.lock_sender();
            if self.state.swap(CLOSED, Ordering::AcqRel) == CLOSED {
                return false;
            }
            sender.take();
        }

        self.closed.cancel();
        if reason == CloseReason::ClientAbort {
            self.aborted.cancel();
        }
        tracing::debug!(
            session_id = self.id,
            route = %self.route,
            reason = ?reason,
            emitted = self.emitted.load(Ordering::Relaxed),
            "session closed"
        );

        if let Some(teardown) = self.teardown.fire() {
            teardown.run();
        }
        true
    }

    /// Attach the producer's teardown, running it now if the session already closed.
    pub(crate) fn register_teardown(&self, teardown: Teardown) {
        if let Err(late) = self.teardown.register(teardown) {
            tracing::debug!(session_id = self.id, "session already closed; running teardown now");
            late.run();
        }
    }

    fn lock_sender(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Bytes>>> {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle passed to a producer for one session.
///
/// Cheap to clone; every clone drives the same session.
pub struct Subscriber<I, T> {
    core: Arc<SessionCore>,
    input: Arc<I>,
    _marker: PhantomData<fn(&T)>,
}

impl<I, T> Clone for Subscriber<I, T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            input: Arc::clone(&self.input),
            _marker: PhantomData,
        }
    }
}

impl<I, T> fmt::Debug for Subscriber<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("session_id", &self.core.id)
            .field("route", &self.core.route)
            .field("state", &self.core.state())
            .finish()
    }
}

impl<I, T> Subscriber<I, T> {
    pub(crate) fn new(core: Arc<SessionCore>, input: Arc<I>) -> Self {
        Self {
            core,
            input,
            _marker: PhantomData,
        }
    }

    /// The validated request input.
    pub fn input(&self) -> &I {
        &self.input
    }

    pub fn session_id(&self) -> u64 {
        self.core.id
    }

    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// End the stream. Idempotent; runs the teardown if one is registered.
    pub fn close(&self) {
        self.core.close(CloseReason::Explicit);
    }

    /// Resolves once the session is closed, for any reason.
    pub fn closed(&self) -> WaitForCancellationFutureOwned {
        self.core.closed.clone().cancelled_owned()
    }
}

impl<I, T: Serialize> Subscriber<I, T> {
    /// Send one value. Dropped without error once the session is closed.
    ///
    /// The outbound queue is unbounded: values a slow client has not read
    /// yet stay buffered in memory until the session closes.
    pub fn emit(&self, value: &T) {
        match self.try_emit(value) {
            Ok(()) => {}
            Err(EmitError::Closed) => {
                tracing::trace!(session_id = self.core.id, "session closed; value dropped")
            }
            Err(err) => tracing::warn!(
                session_id = self.core.id,
                error = %err,
                "dropping value that failed to encode"
            ),
        }
    }

    /// Send one value, reporting whether it reached the response body.
    pub fn try_emit(&self, value: &T) -> Result<(), EmitError> {
        if self.core.is_closed() {
            return Err(EmitError::Closed);
        }
        let mut frame = BytesMut::new();
        encode_event(value, &mut frame)?;
        self.core.send(frame.freeze())
    }
}

impl<I, T> Subscriber<I, T>
where
    I: Send + Sync + 'static,
    T: 'static,
{
    /// Call `tick` every `period` until the session closes.
    ///
    /// The first call happens one period from now. The returned teardown
    /// cancels the timer; return it from the producer to keep the
    /// session open under [`ClosePolicy::Auto`]. A panicking `tick` is a
    /// producer fault: it is logged and the session closes.
    pub fn every<F>(&self, period: Duration, mut tick: F) -> Teardown
    where
        F: FnMut(&Subscriber<I, T>) + Send + 'static,
    {
        let subscriber = self.clone();
        let closed = self.core.closed.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = closed.cancelled() => break,
                    _ = interval.tick() => {
                        let ticked = panic::catch_unwind(AssertUnwindSafe(|| tick(&subscriber)));
                        if let Err(payload) = ticked {
                            let fault = ProducerFault::from_panic(payload.as_ref());
                            tracing::error!(
                                session_id = subscriber.core.id,
                                error = %fault,
                                "timer tick failed; closing stream"
                            );
                            subscriber.core.close(CloseReason::ProducerFault);
                            break;
                        }
                    }
                }
            }
        });
        let handle = task.abort_handle();
        Teardown::new(move || handle.abort())
    }
}

/// Response body for one session.
///
/// Yields encoded frames in emit order and ends once the session closes
/// and the queue drains. Dropping it before that counts as a client abort.
pub(crate) struct SessionBody {
    core: Arc<SessionCore>,
    frames: mpsc::UnboundedReceiver<Bytes>,
    keep_alive: Option<Interval>,
}

impl SessionBody {
    pub(crate) fn new(
        core: Arc<SessionCore>,
        frames: mpsc::UnboundedReceiver<Bytes>,
        keep_alive: Option<Duration>,
    ) -> Self {
        let keep_alive = keep_alive.filter(|period| !period.is_zero()).map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        Self {
            core,
            frames,
            keep_alive,
        }
    }
}

impl Stream for SessionBody {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.frames.poll_recv(cx) {
            Poll::Ready(Some(frame)) => return Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => return Poll::Ready(None),
            Poll::Pending => {}
        }

        if let Some(interval) = this.keep_alive.as_mut() {
            if interval.poll_tick(cx).is_ready() {
                let mut frame = BytesMut::new();
                encode_comment("keep-alive", &mut frame);
                return Poll::Ready(Some(Ok(frame.freeze())));
            }
        }
        Poll::Pending
    }
}

impl Drop for SessionBody {
    fn drop(&mut self) {
        if self.core.close(CloseReason::ClientAbort) {
            tracing::debug!(session_id = self.core.id(), "client disconnected");
        }
    }
}
