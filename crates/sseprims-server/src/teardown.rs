use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use futures_util::future::BoxFuture;

/// Cleanup a producer hands back to its session.
///
/// Runs exactly once when the session closes, whatever closed it.
pub struct Teardown {
    action: Action,
}

enum Action {
    Sync(Box<dyn FnOnce() + Send>),
    Async(Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>),
}

impl Teardown {
    /// Wrap a synchronous cleanup. It runs inline on the closing thread.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            action: Action::Sync(Box::new(f)),
        }
    }

    /// Wrap an async cleanup. It is spawned onto the current runtime.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            action: Action::Async(Box::new(move || Box::pin(f()))),
        }
    }

    /// Combine two cleanups; `self` runs first.
    pub fn and(self, next: Teardown) -> Teardown {
        Teardown::new(move || {
            self.run();
            next.run();
        })
    }

    pub(crate) fn run(self) {
        match self.action {
            Action::Sync(f) => f(),
            Action::Async(f) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(f());
                }
                Err(_) => tracing::warn!("no runtime available; async teardown skipped"),
            },
        }
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.action {
            Action::Sync(_) => "sync",
            Action::Async(_) => "async",
        };
        f.debug_struct("Teardown").field("kind", &kind).finish()
    }
}

enum GateState {
    Armed(Option<Teardown>),
    Fired,
}

/// Holds at most one teardown and releases it exactly once.
pub(crate) struct TeardownGate {
    state: Mutex<GateState>,
}

impl TeardownGate {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Armed(None)),
        }
    }

    /// Store a teardown. If the gate already fired, hands it back so the
    /// caller runs it right away.
    pub(crate) fn register(&self, teardown: Teardown) -> Result<(), Teardown> {
        let mut state = self.lock();
        match &mut *state {
            GateState::Armed(slot @ None) => {
                *slot = Some(teardown);
                Ok(())
            }
            GateState::Armed(Some(_)) => {
                tracing::warn!("teardown already registered; ignoring second registration");
                Ok(())
            }
            GateState::Fired => Err(teardown),
        }
    }

    /// Fire the gate. Only the first call can return a teardown.
    pub(crate) fn fire(&self) -> Option<Teardown> {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, GateState::Fired) {
            GateState::Armed(teardown) => teardown,
            GateState::Fired => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn has_fired(&self) -> bool {
        matches!(*self.lock(), GateState::Fired)
    }

    // A panicking teardown must not wedge the gate.
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn counting(counter: &Arc<AtomicUsize>) -> Teardown {
        let counter = Arc::clone(counter);
        Teardown::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn fire_releases_registered_teardown_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = TeardownGate::new();
        gate.register(counting(&runs))
            .expect("armed gate should accept a teardown");

        gate.fire().expect("first fire should release").run();
        assert!(gate.fire().is_none());
        assert!(gate.has_fired());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn register_after_fire_hands_back() {
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = TeardownGate::new();
        assert!(gate.fire().is_none());

        let returned = gate
            .register(counting(&runs))
            .expect_err("fired gate should hand the teardown back");
        returned.run();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn second_registration_is_ignored() {
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = TeardownGate::new();
        gate.register(counting(&runs)).expect("first registration");
        gate.register(counting(&runs)).expect("second registration");

        gate.fire().expect("teardown should be stored").run();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn racing_fires_release_exactly_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(TeardownGate::new());
        gate.register(counting(&runs)).expect("armed gate");

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                std::thread::spawn(move || {
                    if let Some(teardown) = gate.fire() {
                        teardown.run();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().expect("fire thread should not panic");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn and_runs_both_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&order);
        let second = Arc::clone(&order);
        let combined = Teardown::new(move || first.lock().unwrap().push(1))
            .and(Teardown::new(move || second.lock().unwrap().push(2)));
        combined.run();
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn async_teardown_is_spawned() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        Teardown::from_async(move || async move {
            let _ = tx.send(());
        })
        .run();
        rx.await.expect("async teardown should run");
    }
}
