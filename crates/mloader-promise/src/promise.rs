//! Promise handle
//!
//! A [`Promise`] wraps a [`StateManager`] behind a shared handle. Cloning a
//! promise clones the handle, not the outcome: all clones observe the same
//! settlement, and identity is compared with [`Promise::ptr_eq`].

use std::fmt;
use std::future::{Future, IntoFuture};
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::resolution::Resolution;
use crate::scheduler::{panic_message, SchedulerRef};
use crate::state::{Settlement, State, StateManager, Subscription};
use crate::value::{Args, Outcome, Value};
use crate::PromiseError;

/// Unique identifier for a Promise
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PromiseId(u64);

static NEXT_PROMISE_ID: AtomicU64 = AtomicU64::new(1);

impl PromiseId {
    fn next() -> Self {
        PromiseId(NEXT_PROMISE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// `then` handler: receives the settled values, returns the next value
pub type Handler = Box<dyn FnOnce(Args) -> Outcome + Send>;

struct Inner {
    id: PromiseId,
    scheduler: SchedulerRef,
    manager: Mutex<StateManager>,
    settled: Condvar,
    /// Set by the first public `resolve`/`reject`
    claimed: AtomicBool,
}

/// Eventual outcome with FIFO callback dispatch
#[derive(Clone)]
pub struct Promise {
    inner: Arc<Inner>,
}

impl Promise {
    fn from_manager(scheduler: SchedulerRef, manager: StateManager) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: PromiseId::next(),
                scheduler,
                manager: Mutex::new(manager),
                settled: Condvar::new(),
                claimed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a pending promise dispatching through `scheduler`
    pub fn new(scheduler: SchedulerRef) -> Self {
        Self::from_manager(scheduler, StateManager::new())
    }

    /// Create a promise already resolved with `values`
    ///
    /// The values are stored as given, without assimilation.
    pub fn resolved(scheduler: SchedulerRef, values: Args) -> Self {
        let promise = Self::from_manager(
            scheduler,
            StateManager::settled(State::Resolved, Value::Undefined, values),
        );
        promise.inner.claimed.store(true, Ordering::Release);
        promise
    }

    /// Create a promise already rejected with `values`
    pub fn rejected(scheduler: SchedulerRef, values: Args) -> Self {
        let promise = Self::from_manager(
            scheduler,
            StateManager::settled(State::Rejected, Value::Undefined, values),
        );
        promise.inner.claimed.store(true, Ordering::Release);
        promise
    }

    /// Turn any value into a native promise
    ///
    /// A native promise is returned as-is; a thenable is adopted; anything
    /// else becomes a promise resolved with it.
    pub fn cast(scheduler: SchedulerRef, value: Value) -> Self {
        match value {
            Value::Promise(p) => p,
            other => {
                let promise = Self::new(scheduler);
                promise.resolve(vec![other]);
                promise
            }
        }
    }

    /// Unique identifier
    pub fn id(&self) -> PromiseId {
        self.inner.id
    }

    /// Scheduler this promise dispatches through
    pub fn scheduler(&self) -> &SchedulerRef {
        &self.inner.scheduler
    }

    /// Current state
    pub fn state(&self) -> State {
        self.inner.manager.lock().state()
    }

    /// Whether still pending
    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    /// Settled values, if settled
    pub fn value(&self) -> Option<Args> {
        let manager = self.inner.manager.lock();
        manager.state().is_settled().then(|| manager.value().clone())
    }

    /// Binding captured at settlement
    pub fn context(&self) -> Value {
        self.inner.manager.lock().context().clone()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolve with `values`
    ///
    /// Runs the resolution procedure on the first value, so resolving with a
    /// promise or thenable adopts its outcome and resolving with this very
    /// promise rejects with [`PromiseError::SelfResolutionConflict`]. Only the
    /// first call to `resolve` or `reject` has an effect.
    pub fn resolve(&self, values: Args) -> &Self {
        if !self.inner.claimed.swap(true, Ordering::AcqRel) {
            Resolution::new(self.clone()).finalize(State::Resolved, Value::Undefined, values);
        }
        self
    }

    /// Reject with `values`
    ///
    /// Only the first call to `resolve` or `reject` has an effect.
    pub fn reject(&self, values: Args) -> &Self {
        if !self.inner.claimed.swap(true, Ordering::AcqRel) {
            self.transition(State::Rejected, Value::Undefined, values);
        }
        self
    }

    /// Move out of `Pending` and dispatch the queue
    ///
    /// Bypasses the public claim; the state manager still lets only the first
    /// transition through.
    pub(crate) fn transition(&self, state: State, context: Value, values: Args) {
        let drained = self.inner.manager.lock().transition(state, context, values);
        if let Some((tasks, wakers)) = drained {
            self.inner.settled.notify_all();
            for waker in wakers {
                waker.wake();
            }
            for task in tasks {
                self.inner.scheduler.run_async(task);
            }
        }
    }

    /// Register a callback
    ///
    /// The callback never runs inside this call, even when already settled.
    pub fn subscribe(&self, subscription: Subscription) -> &Self {
        let ready = self.inner.manager.lock().enqueue(subscription);
        if let Some(task) = ready {
            self.inner.scheduler.run_async(task);
        }
        self
    }

    /// Run `f` once resolved
    pub fn done<F>(&self, f: F) -> &Self
    where
        F: FnOnce(Args) + Send + 'static,
    {
        self.subscribe(Subscription::Resolved(Box::new(f)))
    }

    /// Run `f` once rejected
    pub fn fail<F>(&self, f: F) -> &Self
    where
        F: FnOnce(Args) + Send + 'static,
    {
        self.subscribe(Subscription::Rejected(Box::new(f)))
    }

    /// Run `f` once settled either way
    pub fn always<F>(&self, f: F) -> &Self
    where
        F: FnOnce(Args) + Send + 'static,
    {
        self.subscribe(Subscription::Always(Box::new(f)))
    }

    /// Run `f` with the full settlement
    pub fn notify<F>(&self, f: F) -> &Self
    where
        F: FnOnce(Settlement) + Send + 'static,
    {
        self.subscribe(Subscription::Notify(Box::new(f)))
    }

    /// Chain handlers, returning the derived promise
    ///
    /// The handler matching the settled state runs with the settled values;
    /// its return value resolves the derived promise (after assimilation) and
    /// its error rejects it. A missing handler passes the settlement through
    /// rather than running the other branch's handler, and a rejection
    /// handler that returns normally recovers the chain.
    /// When already settled and the matching handler is missing, the derived
    /// promise is created settled, without a scheduling hop.
    pub fn then(&self, on_resolved: Option<Handler>, on_rejected: Option<Handler>) -> Promise {
        {
            let manager = self.inner.manager.lock();
            let pass_through = match manager.state() {
                State::Pending => false,
                State::Resolved => on_resolved.is_none(),
                State::Rejected => on_rejected.is_none(),
            };
            if pass_through {
                let derived = StateManager::settled(
                    manager.state(),
                    manager.context().clone(),
                    manager.value().clone(),
                );
                return Self::from_manager(self.inner.scheduler.clone(), derived);
            }
        }

        let derived = Promise::new(self.inner.scheduler.clone());
        let resolution = Resolution::new(derived.clone());
        self.notify(move |settlement| {
            let handler = match settlement.state {
                State::Resolved => on_resolved,
                _ => on_rejected,
            };
            match handler {
                Some(handler) => match guarded(move || handler(settlement.values)) {
                    Ok(value) => resolution.finalize(State::Resolved, settlement.context, vec![value]),
                    Err(reason) => resolution.reject(settlement.context, reason),
                },
                None => resolution.finalize(settlement.state, settlement.context, settlement.values),
            }
        });
        derived
    }

    /// Chain a success handler
    pub fn map<F>(&self, f: F) -> Promise
    where
        F: FnOnce(Args) -> Outcome + Send + 'static,
    {
        self.then(Some(Box::new(f)), None)
    }

    /// Chain a rejection handler
    pub fn catch<F>(&self, f: F) -> Promise
    where
        F: FnOnce(Args) -> Outcome + Send + 'static,
    {
        self.then(None, Some(Box::new(f)))
    }

    /// Adopt the eventual outcome of `source`
    pub fn follow(&self, source: &Promise) -> &Self {
        self.inner.claimed.store(true, Ordering::Release);
        let resolution = Resolution::new(self.clone());
        source.notify(move |s| resolution.finalize(s.state, s.context, s.values));
        self
    }

    fn outcome(manager: &StateManager) -> Option<Result<Args, Args>> {
        match manager.state() {
            State::Pending => None,
            State::Resolved => Some(Ok(manager.value().clone())),
            State::Rejected => Some(Err(manager.value().clone())),
        }
    }

    /// Block the current thread until settled
    ///
    /// Settlement must be driven by another thread (or a scheduler that runs
    /// elsewhere); with a [`TurnQueue`](crate::scheduler::TurnQueue) drained on
    /// this thread it would never return.
    pub fn wait(&self) -> Result<Args, Args> {
        let mut manager = self.inner.manager.lock();
        loop {
            if let Some(outcome) = Self::outcome(&manager) {
                return outcome;
            }
            self.inner.settled.wait(&mut manager);
        }
    }

    /// Block until settled or until `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Args, Args>> {
        let deadline = Instant::now() + timeout;
        let mut manager = self.inner.manager.lock();
        loop {
            if let Some(outcome) = Self::outcome(&manager) {
                return Some(outcome);
            }
            if self.inner.settled.wait_until(&mut manager, deadline).timed_out() {
                return Self::outcome(&manager);
            }
        }
    }
}

/// Run user code, turning a panic into a rejection reason
///
/// The reason is a [`PromiseError::HandlerPanicked`] carrying the panic message.
pub fn guarded<F>(f: F) -> Outcome
where
    F: FnOnce() -> Outcome,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(outcome) => outcome,
        Err(payload) => Err(Value::error(PromiseError::HandlerPanicked(panic_message(
            &*payload,
        )))),
    }
}

impl PartialEq for Promise {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // try_lock: Debug may run while the state manager is held.
        match self.inner.manager.try_lock() {
            Some(manager) => write!(f, "Promise#{}({})", self.inner.id.0, manager.state().as_str()),
            None => write!(f, "Promise#{}(<locked>)", self.inner.id.0),
        }
    }
}

/// Future returned by `Promise::into_future`
pub struct Settled {
    promise: Promise,
}

impl Future for Settled {
    type Output = Result<Args, Args>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut manager = self.promise.inner.manager.lock();
        match Promise::outcome(&manager) {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                manager.register_waker(cx.waker());
                Poll::Pending
            }
        }
    }
}

impl IntoFuture for Promise {
    type Output = Result<Args, Args>;
    type IntoFuture = Settled;

    fn into_future(self) -> Self::IntoFuture {
        Settled { promise: self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TurnQueue;
    use std::sync::atomic::AtomicUsize;

    fn queue() -> (Arc<TurnQueue>, SchedulerRef) {
        let queue = TurnQueue::shared();
        let scheduler: SchedulerRef = queue.clone();
        (queue, scheduler)
    }

    #[test]
    fn test_promise_id_uniqueness() {
        let (_, s) = queue();
        let a = Promise::new(s.clone());
        let b = Promise::new(s);
        assert_ne!(a.id(), b.id());
        assert!(b.id().as_u64() > a.id().as_u64());
    }

    #[test]
    fn test_settle_is_idempotent() {
        let (q, s) = queue();
        let p = Promise::new(s);

        p.resolve(vec![Value::from(1)]);
        p.resolve(vec![Value::from(2)]);
        p.reject(vec![Value::from("late")]);
        q.flush();

        assert_eq!(p.state(), State::Resolved);
        assert_eq!(p.value(), Some(vec![Value::from(1)]));
    }

    #[test]
    fn test_done_runs_once_per_subscription() {
        let (q, s) = queue();
        let p = Promise::new(s);
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        p.done(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        p.resolve(vec![]);
        p.resolve(vec![]);
        q.flush();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fast_path_pass_through() {
        let (q, s) = queue();
        let p = Promise::resolved(s, vec![Value::from(3)]);

        let derived = p.then(None, Some(Box::new(|_| Ok(Value::Null))));
        assert!(!derived.ptr_eq(&p));
        assert_eq!(derived.state(), State::Resolved);
        assert_eq!(derived.value(), Some(vec![Value::from(3)]));
        assert!(q.is_empty());
    }

    #[test]
    fn test_follow_adopts_source() {
        let (q, s) = queue();
        let source = Promise::new(s.clone());
        let target = Promise::new(s);

        target.follow(&source);
        source.reject(vec![Value::from("nope")]);
        q.flush();

        assert_eq!(target.state(), State::Rejected);
        assert_eq!(target.value(), Some(vec![Value::from("nope")]));
    }

    #[test]
    fn test_handler_panic_becomes_rejection() {
        let (q, s) = queue();
        let p = Promise::resolved(s, vec![]);

        let derived = p.map(|_| panic!("handler blew up"));
        q.flush();

        let reason = derived.value().unwrap().remove(0);
        match reason.downcast_error::<PromiseError>() {
            Some(PromiseError::HandlerPanicked(msg)) => assert_eq!(msg, "handler blew up"),
            other => panic!("Expected HandlerPanicked, got {:?}", other),
        }
    }

    #[test]
    fn test_wait_timeout_on_pending() {
        let (_, s) = queue();
        let p = Promise::new(s);
        assert!(p.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_debug_format() {
        let (_, s) = queue();
        let p = Promise::new(s);
        assert!(format!("{:?}", p).ends_with("(pending)"));
    }
}
