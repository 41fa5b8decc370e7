//! Single-flight lazily computed values.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::LazyError;

/// Blocking waiters re-check their own cancellation token at this interval.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub type SyncProducer<T> =
    Arc<dyn Fn(&CancellationToken) -> Result<T, LazyError> + Send + Sync + 'static>;

pub type AsyncProducer<T> = Arc<
    dyn Fn(CancellationToken) -> BoxFuture<'static, Result<T, LazyError>> + Send + Sync + 'static,
>;

/// A value computed on first use, with at most one computation in flight.
///
/// Concurrent callers wait on the running computation and all observe its
/// outcome. Errors are never memoised: the next call computes again. When the
/// computing caller is cancelled, waiters retry and one of them takes over.
///
/// With `cache_result` the first successful value is kept forever and the
/// producers are dropped. Without it every call recomputes, but concurrent
/// calls still share one computation.
///
/// `LazyValue` is a handle; clones share the same cell.
pub struct LazyValue<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    cache_result: bool,
    state: Mutex<State<T>>,
}

struct State<T> {
    value: Option<T>,
    producers: Option<Producers<T>>,
    in_flight: Option<Arc<InFlight<T>>>,
}

struct Producers<T> {
    sync: Option<SyncProducer<T>>,
    async_: Option<AsyncProducer<T>>,
}

impl<T> Clone for Producers<T> {
    fn clone(&self) -> Self {
        Self {
            sync: self.sync.clone(),
            async_: self.async_.clone(),
        }
    }
}

struct InFlight<T> {
    outcome: Mutex<Option<Result<T, LazyError>>>,
    ready: Condvar,
    notify: Notify,
}

impl<T: Clone> InFlight<T> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
            notify: Notify::new(),
        }
    }

    fn complete(&self, outcome: Result<T, LazyError>) {
        *self.outcome.lock() = Some(outcome);
        self.ready.notify_all();
        self.notify.notify_waiters();
    }

    fn peek(&self) -> Option<Result<T, LazyError>> {
        self.outcome.lock().clone()
    }

    fn wait_blocking(&self, cancel: &CancellationToken) -> Result<Result<T, LazyError>, LazyError> {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(outcome) = outcome.as_ref() {
                return Ok(outcome.clone());
            }
            if cancel.is_cancelled() {
                return Err(LazyError::Cancelled);
            }
            self.ready.wait_for(&mut outcome, CANCEL_POLL_INTERVAL);
        }
    }

    async fn wait(&self, cancel: &CancellationToken) -> Result<Result<T, LazyError>, LazyError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.peek() {
                return Ok(outcome);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LazyError::Cancelled),
                _ = &mut notified => {}
            }
        }
    }
}

enum Role<T: Clone + Send + Sync + 'static> {
    Ready(T),
    Owner(Completion<T>, Producers<T>),
    Waiter(Arc<InFlight<T>>),
}

/// Publishes the computation outcome exactly once, even if the owner panics
/// or its future is dropped mid-computation.
struct Completion<T: Clone + Send + Sync + 'static> {
    shared: Arc<Shared<T>>,
    flight: Arc<InFlight<T>>,
    done: bool,
}

impl<T: Clone + Send + Sync + 'static> Completion<T> {
    fn finish(mut self, outcome: Result<T, LazyError>) -> Result<T, LazyError> {
        self.done = true;
        self.shared.publish(&self.flight, outcome.clone());
        outcome
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for Completion<T> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let outcome = if std::thread::panicking() {
            Err(LazyError::message("lazy value producer panicked"))
        } else {
            Err(LazyError::Cancelled)
        };
        self.shared.publish(&self.flight, outcome);
    }
}

impl<T: Clone + Send + Sync + 'static> Shared<T> {
    fn publish(&self, flight: &Arc<InFlight<T>>, outcome: Result<T, LazyError>) {
        {
            let mut state = self.state.lock();
            if let (Ok(value), true) = (&outcome, self.cache_result) {
                state.value = Some(value.clone());
                state.producers = None;
            }
            if state
                .in_flight
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, flight))
            {
                state.in_flight = None;
            }
        }
        flight.complete(outcome);
    }
}

impl<T: Clone + Send + Sync + 'static> LazyValue<T> {
    /// Cached value computed by a blocking producer.
    pub fn new<F>(producer: F) -> Self
    where
        F: Fn(&CancellationToken) -> Result<T, LazyError> + Send + Sync + 'static,
    {
        Self::build(None, Some(Arc::new(producer)), None, true)
    }

    pub fn new_uncached<F>(producer: F) -> Self
    where
        F: Fn(&CancellationToken) -> Result<T, LazyError> + Send + Sync + 'static,
    {
        Self::build(None, Some(Arc::new(producer)), None, false)
    }

    /// Cached value computed by an async producer.
    pub fn new_async<F, Fut>(producer: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, LazyError>> + Send + 'static,
    {
        Self::build(None, None, Some(boxed_async(producer)), true)
    }

    pub fn new_async_uncached<F, Fut>(producer: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, LazyError>> + Send + 'static,
    {
        Self::build(None, None, Some(boxed_async(producer)), false)
    }

    /// Blocking callers use `sync`, async callers use `async_`.
    pub fn with_producers(sync: SyncProducer<T>, async_: AsyncProducer<T>) -> Self {
        Self::build(None, Some(sync), Some(async_), true)
    }

    pub fn with_producers_uncached(sync: SyncProducer<T>, async_: AsyncProducer<T>) -> Self {
        Self::build(None, Some(sync), Some(async_), false)
    }

    /// An already computed value.
    pub fn from_value(value: T) -> Self {
        Self::build(Some(value), None, None, true)
    }

    fn build(
        value: Option<T>,
        sync: Option<SyncProducer<T>>,
        async_: Option<AsyncProducer<T>>,
        cache_result: bool,
    ) -> Self {
        let producers = (sync.is_some() || async_.is_some()).then_some(Producers { sync, async_ });
        Self {
            shared: Arc::new(Shared {
                cache_result,
                state: Mutex::new(State {
                    value,
                    producers,
                    in_flight: None,
                }),
            }),
        }
    }

    pub fn caches_result(&self) -> bool {
        self.shared.cache_result
    }

    /// The memoised value, if any. Never computes and never waits.
    pub fn try_peek(&self) -> Option<T> {
        self.shared.state.lock().value.clone()
    }

    /// Whether a computation is currently running.
    pub fn is_computing(&self) -> bool {
        self.shared.state.lock().in_flight.is_some()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Returns the value, computing it on the current thread if nobody else
    /// is. Blocks while another caller computes.
    pub fn get(&self, cancel: &CancellationToken) -> Result<T, LazyError> {
        loop {
            match self.begin(cancel)? {
                Role::Ready(value) => return Ok(value),
                Role::Owner(completion, producers) => {
                    let outcome = match (producers.sync, producers.async_) {
                        (Some(sync), _) => sync(cancel),
                        (None, Some(async_)) => futures::executor::block_on(async_(cancel.clone())),
                        (None, None) => Err(no_producer()),
                    };
                    return completion.finish(outcome);
                }
                Role::Waiter(flight) => match flight.wait_blocking(cancel)? {
                    Err(LazyError::Cancelled) => continue,
                    outcome => return outcome,
                },
            }
        }
    }

    /// Async counterpart of [`LazyValue::get`].
    pub async fn get_async(&self, cancel: &CancellationToken) -> Result<T, LazyError> {
        loop {
            match self.begin(cancel)? {
                Role::Ready(value) => return Ok(value),
                Role::Owner(completion, producers) => {
                    let outcome = match (producers.async_, producers.sync) {
                        (Some(async_), _) => {
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => Err(LazyError::Cancelled),
                                outcome = async_(cancel.clone()) => outcome,
                            }
                        }
                        (None, Some(sync)) => sync(cancel),
                        (None, None) => Err(no_producer()),
                    };
                    return completion.finish(outcome);
                }
                Role::Waiter(flight) => match flight.wait(cancel).await? {
                    Err(LazyError::Cancelled) => continue,
                    outcome => return outcome,
                },
            }
        }
    }

    fn begin(&self, cancel: &CancellationToken) -> Result<Role<T>, LazyError> {
        let mut state = self.shared.state.lock();
        if let Some(value) = &state.value {
            return Ok(Role::Ready(value.clone()));
        }
        if cancel.is_cancelled() {
            return Err(LazyError::Cancelled);
        }
        if let Some(flight) = &state.in_flight {
            return Ok(Role::Waiter(flight.clone()));
        }

        let producers = state.producers.clone().ok_or_else(no_producer)?;
        let flight = Arc::new(InFlight::new());
        state.in_flight = Some(flight.clone());
        Ok(Role::Owner(
            Completion {
                shared: self.shared.clone(),
                flight,
                done: false,
            },
            producers,
        ))
    }
}

fn boxed_async<T, F, Fut>(producer: F) -> AsyncProducer<T>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, LazyError>> + Send + 'static,
{
    Arc::new(move |cancel| producer(cancel).boxed())
}

fn no_producer() -> LazyError {
    LazyError::message("lazy value has no producer")
}

impl<T> Clone for LazyValue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for LazyValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("LazyValue")
            .field("cache_result", &self.shared.cache_result)
            .field("has_value", &state.value.is_some())
            .field("computing", &state.in_flight.is_some())
            .finish()
    }
}
