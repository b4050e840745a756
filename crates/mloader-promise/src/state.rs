//! Settlement state machine
//!
//! [`StateManager`] tracks one eventual outcome. Subscriptions registered while
//! pending are queued in FIFO order; the first transition drains the queue and
//! every later subscription is bound directly against the stored outcome. The
//! manager never runs callbacks itself: it hands back ready-to-run tasks and
//! the owning promise dispatches them through its scheduler.

use std::task::Waker;

use crate::scheduler::Task;
use crate::value::{Args, Value};

/// State of a promise
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum State {
    /// Not settled yet
    Pending,
    /// Settled successfully
    Resolved,
    /// Settled with a failure
    Rejected,
}

impl State {
    /// Whether the state is final
    pub fn is_settled(self) -> bool {
        !matches!(self, State::Pending)
    }

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Resolved => "resolved",
            State::Rejected => "rejected",
        }
    }
}

/// What a subscriber wants to be told about
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Interest {
    /// Successful settlement only
    Resolved,
    /// Failed settlement only
    Rejected,
    /// Either settlement, values only
    Always,
    /// Either settlement, with the state
    Notify,
}

/// Settled outcome as seen by `notify` subscribers
#[derive(Debug, Clone)]
pub struct Settlement {
    /// Final state (never `Pending`)
    pub state: State,
    /// Binding captured at settlement
    pub context: Value,
    /// Settled values
    pub values: Args,
}

/// Callback receiving the settled values
pub type ValuesCallback = Box<dyn FnOnce(Args) + Send>;

/// Callback receiving the whole settlement
pub type NotifyCallback = Box<dyn FnOnce(Settlement) + Send>;

/// A queued `{interest, callback}` pair
pub enum Subscription {
    /// Run on resolve
    Resolved(ValuesCallback),
    /// Run on reject
    Rejected(ValuesCallback),
    /// Run on either
    Always(ValuesCallback),
    /// Run on either, with the state
    Notify(NotifyCallback),
}

impl Subscription {
    /// Interest this subscription was registered with
    pub fn interest(&self) -> Interest {
        match self {
            Subscription::Resolved(_) => Interest::Resolved,
            Subscription::Rejected(_) => Interest::Rejected,
            Subscription::Always(_) => Interest::Always,
            Subscription::Notify(_) => Interest::Notify,
        }
    }

    /// Bind against a settled outcome
    ///
    /// Returns `None` when the outcome does not match the interest; the
    /// callback is dropped in that case.
    fn bind(self, settlement: &Settlement) -> Option<Task> {
        let values = settlement.values.clone();
        match (self, settlement.state) {
            (Subscription::Resolved(cb), State::Resolved)
            | (Subscription::Rejected(cb), State::Rejected)
            | (Subscription::Always(cb), _) => Some(Box::new(move || cb(values))),
            (Subscription::Notify(cb), _) => {
                let settlement = settlement.clone();
                Some(Box::new(move || cb(settlement)))
            }
            _ => None,
        }
    }
}

/// State manager for a single promise
pub(crate) struct StateManager {
    state: State,
    context: Value,
    value: Args,
    queue: Vec<Subscription>,
    wakers: Vec<Waker>,
}

impl StateManager {
    /// Pending manager with an empty queue
    pub(crate) fn new() -> Self {
        Self {
            state: State::Pending,
            context: Value::Undefined,
            value: Vec::new(),
            queue: Vec::new(),
            wakers: Vec::new(),
        }
    }

    /// Manager created directly in a settled state
    pub(crate) fn settled(state: State, context: Value, value: Args) -> Self {
        let mut manager = Self::new();
        manager.state = state;
        manager.context = context;
        manager.value = value;
        manager
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub(crate) fn context(&self) -> &Value {
        &self.context
    }

    pub(crate) fn value(&self) -> &Args {
        &self.value
    }

    fn settlement(&self) -> Settlement {
        Settlement {
            state: self.state,
            context: self.context.clone(),
            values: self.value.clone(),
        }
    }

    /// Queue a subscription, or bind it if already settled
    pub(crate) fn enqueue(&mut self, subscription: Subscription) -> Option<Task> {
        if self.state == State::Pending {
            self.queue.push(subscription);
            return None;
        }
        subscription.bind(&self.settlement())
    }

    /// Register a waker for async waiters
    pub(crate) fn register_waker(&mut self, waker: &Waker) {
        if !self.wakers.iter().any(|w| w.will_wake(waker)) {
            self.wakers.push(waker.clone());
        }
    }

    /// Transition out of `Pending`
    ///
    /// Returns `None` if the manager was already settled (first transition
    /// wins). Otherwise returns the drained queue as bound tasks, in
    /// registration order, plus the wakers to notify.
    pub(crate) fn transition(
        &mut self,
        state: State,
        context: Value,
        value: Args,
    ) -> Option<(Vec<Task>, Vec<Waker>)> {
        if self.state.is_settled() || !state.is_settled() {
            return None;
        }

        self.state = state;
        self.context = context;
        self.value = value;

        let settlement = self.settlement();
        let tasks = std::mem::take(&mut self.queue)
            .into_iter()
            .filter_map(|sub| sub.bind(&settlement))
            .collect();

        Some((tasks, std::mem::take(&mut self.wakers)))
    }
}
