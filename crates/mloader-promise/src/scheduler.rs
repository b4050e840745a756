//! Deferred dispatch
//!
//! Every promise callback goes through a [`Scheduler`], which guarantees the
//! callback runs in a later turn than the call that scheduled it. That is what
//! keeps `then` asynchronous even when the promise is already settled.
//!
//! Implementations:
//! - [`TurnQueue`]: cooperative queue drained explicitly with `flush`
//! - [`WorkerScheduler`]: dedicated dispatcher thread
//! - `TokioScheduler`: drain task on a tokio runtime (feature `tokio`)

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Sender};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Unit of deferred work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Shared scheduler handle
pub type SchedulerRef = Arc<dyn Scheduler>;

/// "Run later, never synchronously" dispatch
pub trait Scheduler: Send + Sync {
    /// Schedule `task` to run in a later turn
    ///
    /// Tasks scheduled from one thread run in the order they were scheduled.
    fn run_async(&self, task: Task);
}

/// Run a task, containing panics so the dispatcher survives
fn run_task(task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        tracing::warn!(reason = %panic_message(&*payload), "scheduled task panicked");
    }
}

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Cooperative turn queue
///
/// Nothing runs until the owner drains the queue, which makes every
/// asynchronous interaction deterministic. Tasks scheduled while draining
/// run in the same `flush` call, after the ones already queued.
#[derive(Default)]
pub struct TurnQueue {
    queue: Mutex<VecDeque<Task>>,
}

impl TurnQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty queue behind a shared handle
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Run the oldest queued task
    ///
    /// Returns `false` if the queue was empty.
    pub fn run_next(&self) -> bool {
        // The lock must be released before running the task: it may schedule more.
        let task = self.queue.lock().pop_front();
        match task {
            Some(task) => {
                run_task(task);
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty
    ///
    /// Returns the number of turns executed.
    pub fn flush(&self) -> usize {
        let mut turns = 0;
        while self.run_next() {
            turns += 1;
        }
        turns
    }

    /// Number of queued tasks
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl Scheduler for TurnQueue {
    fn run_async(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}

/// Dispatcher thread draining a FIFO channel
pub struct WorkerScheduler {
    sender: Option<Sender<Task>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WorkerScheduler {
    /// Spawn the dispatcher thread
    pub fn spawn() -> std::io::Result<Self> {
        let (sender, receiver) = channel::unbounded::<Task>();

        let handle = thread::Builder::new()
            .name("mloader-scheduler".to_string())
            .spawn(move || {
                for task in receiver {
                    run_task(task);
                }
                tracing::debug!("scheduler thread shutting down");
            })?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }
}

impl Scheduler for WorkerScheduler {
    fn run_async(&self, task: Task) {
        if let Some(sender) = &self.sender {
            if sender.send(task).is_err() {
                tracing::warn!("scheduler thread is gone; task dropped");
            }
        }
    }
}

impl Drop for WorkerScheduler {
    fn drop(&mut self) {
        // Disconnect first so the thread leaves its receive loop.
        self.sender.take();

        if let Some(handle) = self.handle.take() {
            // The last handle may be released by a task on the dispatcher itself.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(feature = "tokio")]
pub use self::tokio_backend::TokioScheduler;

#[cfg(feature = "tokio")]
mod tokio_backend {
    use super::{run_task, Scheduler, Task};
    use tokio::runtime::Handle;
    use tokio::sync::mpsc::{self, UnboundedSender};

    /// Single drain task on a tokio runtime
    ///
    /// One task consumes the queue so ordering stays FIFO even on a
    /// multi-threaded runtime.
    pub struct TokioScheduler {
        sender: UnboundedSender<Task>,
    }

    impl TokioScheduler {
        /// Start the drain task on `handle`
        pub fn new(handle: &Handle) -> Self {
            let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();
            handle.spawn(async move {
                while let Some(task) = receiver.recv().await {
                    run_task(task);
                }
            });
            Self { sender }
        }
    }

    impl Scheduler for TokioScheduler {
        fn run_async(&self, task: Task) {
            if self.sender.send(task).is_err() {
                tracing::warn!("tokio runtime is gone; task dropped");
            }
        }
    }
}

static SHARED_WORKER: Lazy<SchedulerRef> = Lazy::new(|| {
    Arc::new(WorkerScheduler::spawn().expect("Failed to spawn scheduler thread"))
});

#[cfg(feature = "tokio")]
fn runtime_scheduler() -> Option<SchedulerRef> {
    let handle = tokio::runtime::Handle::try_current().ok()?;
    Some(Arc::new(TokioScheduler::new(&handle)))
}

#[cfg(not(feature = "tokio"))]
fn runtime_scheduler() -> Option<SchedulerRef> {
    None
}

/// Pick the best available dispatch facility
///
/// An active tokio runtime wins when the `tokio` feature is enabled;
/// otherwise a process-wide dispatcher thread is used.
pub fn platform_scheduler() -> SchedulerRef {
    runtime_scheduler().unwrap_or_else(|| SHARED_WORKER.clone())
}
