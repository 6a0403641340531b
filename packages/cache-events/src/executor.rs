//! Task executors for deferred dispatch and asynchronous handlers.
//!
//! The dispatcher owns no threads. Anything that must run off the producer's
//! thread is handed to a [`TaskExecutor`] supplied by the host, either
//! directly on the builder or through the context's resource registry.
//!
//! The only assumption made about an executor is that submitted tasks
//! eventually run on some thread other than the submitter's. Queueing, bounds
//! and rejection policy are the executor's business.

use tokio::runtime::Handle;
use tracing::error;

use crate::error::EventsError;

/// A unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Opaque "submit a task" capability.
pub trait TaskExecutor: Send + Sync + 'static {
    /// Submit a task for later execution.
    ///
    /// Must not run the task on the calling thread and must not block waiting
    /// for it.
    fn submit(&self, task: Task) -> Result<(), EventsError>;
}

/// Executor backed by a tokio runtime's blocking pool.
///
/// Handlers are synchronous, so tasks go through `spawn_blocking` rather than
/// occupying async worker threads.
///
/// Submission cannot tell whether the runtime has already shut down. A task
/// the runtime discards without running is logged at `error!` when it is
/// dropped, so the loss is never silent, but `submit` still returns `Ok`.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Create an executor on the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Create an executor on the runtime of the calling context.
    ///
    /// Returns `None` outside of a tokio runtime.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl TaskExecutor for TokioExecutor {
    fn submit(&self, task: Task) -> Result<(), EventsError> {
        let guarded = UnrunGuard(Some(task));
        // Detached; completion is observed by the task itself.
        drop(self.handle.spawn_blocking(move || guarded.run()));
        Ok(())
    }
}

/// Logs a task that is dropped before it ran.
struct UnrunGuard(Option<Task>);

impl UnrunGuard {
    fn run(mut self) {
        if let Some(task) = self.0.take() {
            task();
        }
    }
}

impl Drop for UnrunGuard {
    fn drop(&mut self) {
        if self.0.is_some() {
            error!("task dropped without running; is the tokio runtime shut down?");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tokio_executor_runs_on_another_thread() {
        let executor = TokioExecutor::current().unwrap();
        let (tx, rx) = mpsc::channel();
        let caller = thread::current().id();

        executor
            .submit(Box::new(move || {
                tx.send(thread::current().id()).unwrap();
            }))
            .unwrap();

        let ran_on = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(ran_on, caller);
    }

    #[test]
    fn test_submit_after_runtime_shutdown_drops_task() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let executor = TokioExecutor::new(runtime.handle().clone());
        drop(runtime);

        let (tx, rx) = mpsc::channel::<()>();
        executor
            .submit(Box::new(move || {
                tx.send(()).unwrap();
            }))
            .unwrap();

        // The task and its sender are discarded rather than run.
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn test_unrun_guard_runs_task_once() {
        let (tx, rx) = mpsc::channel();
        UnrunGuard(Some(Box::new(move || tx.send(1).unwrap()))).run();
        assert_eq!(rx.try_recv(), Ok(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_current_outside_runtime_is_none() {
        assert!(TokioExecutor::current().is_none());
    }
}
