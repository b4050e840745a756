//! Joining combinators
//!
//! [`all`] joins an ordered collection of values into one promise of an
//! ordered list; [`when`] does the same but settles with the results spread
//! out as separate values.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::promise::{guarded, Promise};
use crate::scheduler::SchedulerRef;
use crate::state::State;
use crate::value::{Args, Value};

/// Results collected so far, indexed like the input
struct Join {
    results: Mutex<Vec<Value>>,
    remaining: AtomicUsize,
    combined: Promise,
}

impl Join {
    fn record(&self, index: usize, value: Value) {
        self.results.lock()[index] = value;
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let results = std::mem::take(&mut *self.results.lock());
            self.combined.resolve(vec![Value::list(results)]);
        }
    }
}

/// A multi-value settlement is recorded as one list
fn collapse(mut values: Args) -> Value {
    match values.len() {
        0 => Value::Undefined,
        1 => values.remove(0),
        _ => Value::list(values),
    }
}

/// Join `items` into a promise of `[List(results)]`
///
/// Promises and thenables are awaited; functions are called with no
/// arguments and their return value recorded; anything else is recorded as
/// is. Results keep input order regardless of settlement order. The first
/// rejection (or failing function) rejects the combined promise; later
/// results are discarded.
pub fn all(scheduler: &SchedulerRef, items: Vec<Value>) -> Promise {
    let combined = Promise::new(scheduler.clone());
    if items.is_empty() {
        combined.resolve(vec![Value::list(Vec::new())]);
        return combined;
    }

    let join = Arc::new(Join {
        results: Mutex::new(vec![Value::Undefined; items.len()]),
        remaining: AtomicUsize::new(items.len()),
        combined: combined.clone(),
    });

    for (index, item) in items.into_iter().enumerate() {
        if item.is_thenable() {
            let source = Promise::cast(scheduler.clone(), item);
            let join = join.clone();
            let combined = combined.clone();
            source.notify(move |settlement| match settlement.state {
                State::Resolved => join.record(index, collapse(settlement.values)),
                _ => {
                    combined.reject(settlement.values);
                }
            });
            continue;
        }

        let value = match item {
            Value::Function(f) => guarded(|| f.call(&[])),
            other => Ok(other),
        };
        match value {
            Ok(value) => join.record(index, value),
            Err(reason) => {
                combined.reject(vec![reason]);
            }
        }
    }

    combined
}

/// Like [`all`], but settles with the results as separate values
pub fn when(scheduler: &SchedulerRef, items: Vec<Value>) -> Promise {
    let spread = Promise::new(scheduler.clone());
    let target = spread.clone();

    all(scheduler, items).notify(move |settlement| {
        let values = match settlement.state {
            State::Resolved => settlement
                .values
                .first()
                .and_then(Value::as_list)
                .map(<[Value]>::to_vec)
                .unwrap_or_default(),
            _ => settlement.values,
        };
        target.transition(settlement.state, settlement.context, values);
    });

    spread
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TurnQueue;

    fn queue() -> (Arc<TurnQueue>, SchedulerRef) {
        let queue = TurnQueue::shared();
        let scheduler: SchedulerRef = queue.clone();
        (queue, scheduler)
    }

    #[test]
    fn test_collapse() {
        assert_eq!(collapse(vec![]), Value::Undefined);
        assert_eq!(collapse(vec![Value::from(1)]), Value::from(1));
        assert_eq!(
            collapse(vec![Value::from(1), Value::from(2)]),
            Value::list(vec![Value::from(1), Value::from(2)])
        );
    }

    #[test]
    fn test_all_plain_values_resolve_immediately() {
        let (q, s) = queue();
        let p = all(&s, vec![Value::from(1), Value::function(|_| Ok(Value::from(2)))]);

        assert_eq!(p.state(), State::Resolved);
        assert_eq!(
            p.value(),
            Some(vec![Value::list(vec![Value::from(1), Value::from(2)])])
        );
        assert!(q.is_empty());
    }

    #[test]
    fn test_all_failing_function_rejects() {
        let (_, s) = queue();
        let p = all(
            &s,
            vec![Value::function(|_| Err(Value::from("nope"))), Value::from(1)],
        );

        assert_eq!(p.state(), State::Rejected);
        assert_eq!(p.value(), Some(vec![Value::from("nope")]));
    }

    #[test]
    fn test_multi_value_settlement_collapses() {
        let (q, s) = queue();
        let source = Promise::new(s.clone());
        let p = all(&s, vec![Value::Promise(source.clone())]);

        source.resolve(vec![Value::from("a"), Value::from("b")]);
        q.flush();

        assert_eq!(
            p.value(),
            Some(vec![Value::list(vec![Value::list(vec![
                Value::from("a"),
                Value::from("b")
            ])])])
        );
    }
}
