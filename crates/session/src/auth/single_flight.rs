//! Collapse concurrent invocations of an expensive operation into one.
//!
//! The first caller of [`SingleFlight::run`] becomes the leader and executes
//! the operation; callers that arrive while it is running join its cohort and
//! receive a clone of the leader's result. Once the leader has finished, the
//! next caller starts a fresh run: results are never cached across cohorts.
//!
//! The flight state sits behind one short-lived lock that is never held
//! across an await. The result is fanned out through a `watch` channel whose
//! receiver is handed to each joining waiter.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Deduplicates concurrent runs of an operation producing `T`.
#[derive(Debug)]
pub struct SingleFlight<T> {
    state: Mutex<FlightState<T>>,
    waiters: AtomicUsize,
    wait_timeout: Option<Duration>,
}

#[derive(Debug)]
struct FlightState<T> {
    /// Run id and result channel of the flight in progress
    current: Option<(u64, watch::Receiver<Option<T>>)>,
    runs: u64,
}

enum Role<T> {
    Leader(u64, watch::Sender<Option<T>>),
    Waiter(watch::Receiver<Option<T>>),
}

impl<T: Clone> SingleFlight<T> {
    /// Waiters block until the leader publishes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FlightState { current: None, runs: 0 }),
            waiters: AtomicUsize::new(0),
            wait_timeout: None,
        }
    }

    /// Waiters give up with `None` after `timeout`.
    #[must_use]
    pub fn with_wait_timeout(timeout: Duration) -> Self {
        Self { wait_timeout: Some(timeout), ..Self::new() }
    }

    /// Run `operation`, or join the run already in flight.
    ///
    /// Returns the outcome of the run this caller belongs to. `None` means
    /// this caller joined a run but never observed its result: the leader was
    /// cancelled or the wait timeout elapsed. The leader itself always gets
    /// `Some`.
    pub async fn run<F, Fut>(&self, operation: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let role = {
            let mut state = self.state.lock();
            match &state.current {
                Some((_, receiver)) => Role::Waiter(receiver.clone()),
                None => {
                    state.runs += 1;
                    let id = state.runs;
                    let (sender, receiver) = watch::channel(None);
                    state.current = Some((id, receiver));
                    Role::Leader(id, sender)
                }
            }
        };

        match role {
            Role::Leader(id, sender) => {
                let value = {
                    let _flight = FlightGuard { flight: self, id };
                    operation().await
                };
                // The flight is closed before publishing so late arrivals
                // start a new run instead of reading this result.
                sender.send_replace(Some(value.clone()));
                Some(value)
            }
            Role::Waiter(receiver) => self.wait(receiver).await,
        }
    }

    async fn wait(&self, mut receiver: watch::Receiver<Option<T>>) -> Option<T> {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let _waiting = WaiterGuard(&self.waiters);

        let published = async move {
            receiver.wait_for(Option::is_some).await.ok().and_then(|value| (*value).clone())
        };

        match self.wait_timeout {
            Some(limit) => tokio::time::timeout(limit, published).await.ok().flatten(),
            None => published.await,
        }
    }

    /// Number of runs started so far.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.state.lock().runs
    }

    /// Callers currently waiting on a leader.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::SeqCst)
    }

    /// Whether a run is in progress.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.state.lock().current.is_some()
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Closes the flight when the leader finishes or is dropped mid-run.
struct FlightGuard<'a, T> {
    flight: &'a SingleFlight<T>,
    id: u64,
}

impl<T> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.flight.state.lock();
        if state.current.as_ref().is_some_and(|(id, _)| *id == self.id) {
            state.current = None;
        }
    }
}

struct WaiterGuard<'a>(&'a AtomicUsize);

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
