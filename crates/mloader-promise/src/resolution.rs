//! Thenable assimilation
//!
//! A [`Resolution`] turns whatever a handler produced into exactly one
//! settlement of its target promise:
//!
//! 1. the target itself: rejected with [`PromiseError::SelfResolutionConflict`]
//! 2. a native promise: its state is adopted through a `notify` subscription
//! 3. a foreign thenable: `then` is called with settle-once callbacks
//! 4. anything else: the target transitions directly
//!
//! Rejections are never assimilated; they settle the target as given.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::promise::Promise;
use crate::scheduler::panic_message;
use crate::state::State;
use crate::value::{Args, SettleFn, Thenable, Value};
use crate::PromiseError;

/// One link of a resolution chain
#[derive(Clone)]
pub(crate) struct Resolution {
    target: Promise,
}

impl Resolution {
    pub(crate) fn new(target: Promise) -> Self {
        Self { target }
    }

    /// Reject the target with a single reason
    pub(crate) fn reject(&self, context: Value, reason: Value) {
        self.target.transition(State::Rejected, context, vec![reason]);
    }

    /// Settle the target from `(state, data)`, assimilating `data[0]`
    pub(crate) fn finalize(&self, state: State, context: Value, data: Args) {
        if state != State::Resolved {
            self.target.transition(state, context, data);
            return;
        }

        match data.first() {
            Some(Value::Promise(p)) if p.ptr_eq(&self.target) => {
                tracing::debug!(promise = ?self.target.id(), "promise resolved with itself");
                self.reject(context, Value::error(PromiseError::SelfResolutionConflict));
            }
            Some(Value::Promise(p)) => {
                let link = self.clone();
                p.notify(move |s| link.finalize(s.state, s.context, s.values));
            }
            Some(Value::Thenable(t)) => {
                let thenable = Arc::clone(t);
                self.chain(thenable, context);
            }
            _ => self.target.transition(state, context, data),
        }
    }

    /// Hand settle-once callbacks to a foreign thenable
    fn chain(&self, thenable: Arc<dyn Thenable>, context: Value) {
        let claimed = Arc::new(AtomicBool::new(false));

        let on_resolved: SettleFn = {
            let (claimed, link, context) = (claimed.clone(), self.clone(), context.clone());
            Arc::new(move |values: Args| {
                if !claimed.swap(true, Ordering::AcqRel) {
                    link.finalize(State::Resolved, context.clone(), values);
                }
            })
        };
        let on_rejected: SettleFn = {
            let (claimed, link, context) = (claimed.clone(), self.clone(), context.clone());
            Arc::new(move |values: Args| {
                if !claimed.swap(true, Ordering::AcqRel) {
                    link.target.transition(State::Rejected, context.clone(), values);
                }
            })
        };

        let thrown = match panic::catch_unwind(AssertUnwindSafe(|| {
            thenable.then(on_resolved, on_rejected)
        })) {
            Ok(Ok(())) => None,
            Ok(Err(reason)) => Some(reason),
            Err(payload) => Some(Value::error(PromiseError::HandlerPanicked(panic_message(
                &*payload,
            )))),
        };

        // A throw after either callback fired is ignored.
        if let Some(reason) = thrown {
            if !claimed.swap(true, Ordering::AcqRel) {
                self.reject(context, reason);
            }
        }
    }
}
