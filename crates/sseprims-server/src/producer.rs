use std::future::Future;

use futures_util::future::{self, BoxFuture, FutureExt};

use crate::error::ProducerFault;
use crate::session::Subscriber;
use crate::teardown::Teardown;

/// What a producer leaves behind once its setup returns.
pub type ProducerResult = Result<Option<Teardown>, ProducerFault>;

/// Values a producer may return.
///
/// `()` means nothing to clean up, a [`Teardown`] is cleanup to run at
/// close, and `Err` marks the producer as failed.
pub trait IntoOutcome {
    fn into_outcome(self) -> ProducerResult;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> ProducerResult {
        Ok(None)
    }
}

impl IntoOutcome for Teardown {
    fn into_outcome(self) -> ProducerResult {
        Ok(Some(self))
    }
}

impl IntoOutcome for Option<Teardown> {
    fn into_outcome(self) -> ProducerResult {
        Ok(self)
    }
}

impl<R, E> IntoOutcome for Result<R, E>
where
    R: IntoOutcome,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn into_outcome(self) -> ProducerResult {
        match self {
            Ok(inner) => inner.into_outcome(),
            Err(err) => Err(ProducerFault::Failed(err.into())),
        }
    }
}

/// Callback invoked once per session after its input validated.
///
/// Implemented for any `Fn(Subscriber<I, T>) -> impl Future` whose output
/// is an [`IntoOutcome`]. Wrap plain synchronous closures with
/// [`sync_producer`].
pub trait Producer<I, T>: Send + Sync + 'static {
    fn subscribe(&self, subscriber: Subscriber<I, T>) -> BoxFuture<'static, ProducerResult>;
}

impl<I, T, F, Fut> Producer<I, T> for F
where
    F: Fn(Subscriber<I, T>) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: IntoOutcome,
{
    fn subscribe(&self, subscriber: Subscriber<I, T>) -> BoxFuture<'static, ProducerResult> {
        self(subscriber).map(IntoOutcome::into_outcome).boxed()
    }
}

/// Producer built from a synchronous closure. See [`sync_producer`].
#[derive(Debug, Clone)]
pub struct SyncProducer<F>(F);

/// Adapt a closure that does its setup without awaiting.
pub fn sync_producer<F>(f: F) -> SyncProducer<F> {
    SyncProducer(f)
}

impl<I, T, F, R> Producer<I, T> for SyncProducer<F>
where
    F: Fn(Subscriber<I, T>) -> R + Send + Sync + 'static,
    R: IntoOutcome,
{
    fn subscribe(&self, subscriber: Subscriber<I, T>) -> BoxFuture<'static, ProducerResult> {
        future::ready((self.0)(subscriber).into_outcome()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn unit_has_no_teardown() {
        assert!(matches!(().into_outcome(), Ok(None)));
    }

    #[test]
    fn teardown_is_kept() {
        assert!(matches!(Teardown::new(|| {}).into_outcome(), Ok(Some(_))));
        let none: Option<Teardown> = None;
        assert!(matches!(none.into_outcome(), Ok(None)));
    }

    #[test]
    fn errors_become_faults() {
        let failed: Result<(), Boom> = Err(Boom);
        match failed.into_outcome() {
            Err(ProducerFault::Failed(err)) => assert_eq!(err.to_string(), "boom"),
            other => panic!("expected fault, got {other:?}"),
        }

        let ok: Result<Teardown, Boom> = Ok(Teardown::new(|| {}));
        assert!(matches!(ok.into_outcome(), Ok(Some(_))));
    }

    #[test]
    fn string_errors_are_accepted() {
        let failed: Result<(), String> = Err("setup failed".to_string());
        assert!(matches!(
            failed.into_outcome(),
            Err(ProducerFault::Failed(_))
        ));
    }
}
