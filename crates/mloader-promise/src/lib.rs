//! mloader Promise Primitive
//!
//! This crate provides the asynchronous settlement layer the loader is built
//! on, including:
//! - Dynamically typed values and foreign thenables
//! - Settlement state machine with FIFO callback queues
//! - Promise handles with `then` chaining and thenable assimilation
//! - `all` / `when` combinators
//! - Pluggable schedulers (turn queue, worker thread, tokio)

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod combinators;
pub mod promise;
mod resolution;
pub mod scheduler;
pub mod state;
pub mod value;

pub use combinators::{all, when};
pub use promise::{guarded, Handler, Promise, PromiseId, Settled};
pub use scheduler::{platform_scheduler, Scheduler, SchedulerRef, Task, TurnQueue, WorkerScheduler};
#[cfg(feature = "tokio")]
pub use scheduler::TokioScheduler;
pub use state::{Interest, Settlement, State, Subscription};
pub use value::{Args, NativeFn, Outcome, SettleFn, Thenable, Value};

/// Promise errors, carried as rejection reasons
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromiseError {
    /// A promise was resolved with itself
    #[error("Promise cannot be resolved with itself")]
    SelfResolutionConflict,

    /// A handler or thenable panicked
    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),
}
