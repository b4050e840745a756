//! Integration tests for `all` / `when`

use mloader_promise::{all, when, Promise, SchedulerRef, State, TurnQueue, Value};
use std::sync::Arc;

fn setup() -> (Arc<TurnQueue>, SchedulerRef) {
    let queue = TurnQueue::shared();
    let scheduler: SchedulerRef = queue.clone();
    (queue, scheduler)
}

#[test]
fn test_all_empty_resolves_immediately() {
    let (_, s) = setup();
    let p = all(&s, vec![]);

    assert_eq!(p.state(), State::Resolved);
    assert_eq!(p.value(), Some(vec![Value::list(vec![])]));
}

#[test]
fn test_all_keeps_index_alignment() {
    let (q, s) = setup();
    let slow = Promise::new(s.clone());
    let fast = Promise::new(s.clone());

    let p = all(
        &s,
        vec![
            Value::from(42),
            Value::Promise(slow.clone()),
            Value::Promise(fast.clone()),
        ],
    );

    fast.resolve(vec![Value::from("fast")]);
    q.flush();
    assert!(p.is_pending());

    slow.resolve(vec![Value::from("slow")]);
    q.flush();

    assert_eq!(
        p.value(),
        Some(vec![Value::list(vec![
            Value::from(42),
            Value::from("slow"),
            Value::from("fast"),
        ])])
    );
}

#[test]
fn test_all_rejects_on_first_failure() {
    let (q, s) = setup();
    let a = Promise::new(s.clone());
    let b = Promise::new(s.clone());

    let p = all(&s, vec![Value::Promise(a.clone()), Value::Promise(b.clone())]);

    b.reject(vec![Value::from("b failed")]);
    q.flush();
    assert_eq!(p.state(), State::Rejected);

    a.resolve(vec![Value::from("too late")]);
    q.flush();
    assert_eq!(p.value(), Some(vec![Value::from("b failed")]));
}

#[test]
fn test_when_spreads_results() {
    let (q, s) = setup();
    let pending = Promise::new(s.clone());

    let p = when(&s, vec![Value::from(1), Value::Promise(pending.clone())]);
    pending.resolve(vec![Value::from(2)]);
    q.flush();

    assert_eq!(p.value(), Some(vec![Value::from(1), Value::from(2)]));
}

#[test]
fn test_when_empty_settles_with_no_values() {
    let (q, s) = setup();
    let p = when(&s, vec![]);
    q.flush();

    assert_eq!(p.state(), State::Resolved);
    assert_eq!(p.value(), Some(vec![]));
}

#[test]
fn test_when_forwards_rejection() {
    let (q, s) = setup();
    let p = when(&s, vec![Value::function(|_| Err(Value::from("bad item")))]);
    q.flush();

    assert_eq!(p.state(), State::Rejected);
    assert_eq!(p.value(), Some(vec![Value::from("bad item")]));
}
