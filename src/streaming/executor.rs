//! Cross-thread executor for privileged-thread work
//!
//! Some operations (resource registration, scene mutation) may only run on one
//! designated thread, normally the frame thread. Worker threads hand such work
//! to the executor; the privileged thread runs it during [`CrossThreadExecutor::drain`]
//! once per tick. Blocking callers park on a per-item oneshot channel until
//! their item has run. This is the only blocking wait in the streaming system.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

type Job = Box<dyn FnOnce() + Send>;

/// Failure to run work on the privileged thread
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("work was dropped before the privileged thread ran it")]
    Dropped,

    #[error("work panicked on the privileged thread")]
    Panicked,
}

/// Handle to work submitted with [`CrossThreadExecutor::execute_async`]
pub struct TaskHandle<R> {
    rx: oneshot::Receiver<Result<R, ExecutorError>>,
    result: Option<Result<R, ExecutorError>>,
}

impl<R> TaskHandle<R> {
    fn poll(&mut self) {
        if self.result.is_some() {
            return;
        }
        match self.rx.try_recv() {
            Ok(result) => self.result = Some(result),
            Err(oneshot::error::TryRecvError::Closed) => {
                self.result = Some(Err(ExecutorError::Dropped))
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
        }
    }

    /// Whether the work has run (or can no longer run)
    pub fn is_finished(&mut self) -> bool {
        self.poll();
        self.result.is_some()
    }

    /// Take the result if the work has finished
    pub fn try_take(&mut self) -> Option<Result<R, ExecutorError>> {
        self.poll();
        self.result.take()
    }

    /// Block until the privileged thread has run the work.
    ///
    /// Must not be called on the privileged thread itself.
    pub fn wait(mut self) -> Result<R, ExecutorError> {
        if let Some(result) = self.result.take() {
            return result;
        }
        self.rx.blocking_recv().unwrap_or(Err(ExecutorError::Dropped))
    }
}

/// Single-consumer queue of work for the privileged thread
pub struct CrossThreadExecutor {
    privileged: ThreadId,
    queue: Mutex<VecDeque<Job>>,
    executed: AtomicU64,
}

impl CrossThreadExecutor {
    /// Create an executor whose privileged thread is the calling thread
    pub fn new() -> Self {
        Self::for_thread(thread::current().id())
    }

    pub fn for_thread(privileged: ThreadId) -> Self {
        Self {
            privileged,
            queue: Mutex::new(VecDeque::new()),
            executed: AtomicU64::new(0),
        }
    }

    pub fn is_privileged_thread(&self) -> bool {
        thread::current().id() == self.privileged
    }

    fn enqueue<F, R>(&self, work: F) -> oneshot::Receiver<Result<R, ExecutorError>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(work))
                .map_err(|_| ExecutorError::Panicked);
            let _ = tx.send(result);
        });
        self.queue.lock().push_back(job);
        rx
    }

    /// Run `work` on the privileged thread and wait for its result.
    ///
    /// On the privileged thread the work runs immediately. Elsewhere the caller
    /// blocks until the next [`drain`](Self::drain).
    pub fn execute_blocking<F, R>(&self, work: F) -> Result<R, ExecutorError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_privileged_thread() {
            self.executed.fetch_add(1, Ordering::Relaxed);
            return Ok(work());
        }
        let rx = self.enqueue(work);
        rx.blocking_recv().unwrap_or(Err(ExecutorError::Dropped))
    }

    /// Queue `work` for the next drain without waiting
    pub fn execute_async<F, R>(&self, work: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        TaskHandle { rx: self.enqueue(work), result: None }
    }

    /// Run everything queued so far, in submission order.
    ///
    /// Work queued while draining runs on the next call. Calls from any thread
    /// other than the privileged one are refused.
    ///
    /// # Returns
    /// Number of items executed
    pub fn drain(&self) -> usize {
        if !self.is_privileged_thread() {
            log::error!("CrossThreadExecutor::drain called off the privileged thread; ignored");
            return 0;
        }

        let jobs = std::mem::take(&mut *self.queue.lock());
        let count = jobs.len();
        for job in jobs {
            job();
        }

        if count > 0 {
            self.executed.fetch_add(count as u64, Ordering::Relaxed);
            log::trace!("Executor drained {} privileged operations", count);
        }
        count
    }

    /// Items waiting for the next drain
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Total items run on the privileged thread so far
    pub fn executed_total(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }
}

impl Default for CrossThreadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn drain_until(executor: &CrossThreadExecutor, done: impl Fn() -> bool) {
        for _ in 0..1000 {
            executor.drain();
            if done() {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("worker did not finish");
    }

    #[test]
    fn test_blocking_on_privileged_thread_runs_inline() {
        let executor = CrossThreadExecutor::new();
        assert_eq!(executor.execute_blocking(|| 7 * 6), Ok(42));
        assert_eq!(executor.queued(), 0);
        assert_eq!(executor.executed_total(), 1);
    }

    #[test]
    fn test_blocking_from_worker_waits_for_drain() {
        let executor = Arc::new(CrossThreadExecutor::new());
        let main_thread = thread::current().id();

        let worker = {
            let executor = Arc::clone(&executor);
            thread::spawn(move || executor.execute_blocking(move || thread::current().id() == main_thread))
        };

        drain_until(&executor, || worker.is_finished());
        assert_eq!(worker.join().unwrap(), Ok(true));
    }

    #[test]
    fn test_async_handle_completes_after_drain() {
        let executor = CrossThreadExecutor::new();
        let mut handle = executor.execute_async(|| "done");

        assert!(!handle.is_finished());
        assert_eq!(executor.queued(), 1);

        assert_eq!(executor.drain(), 1);
        assert!(handle.is_finished());
        assert_eq!(handle.try_take(), Some(Ok("done")));
    }

    #[test]
    fn test_drain_preserves_submission_order() {
        let executor = CrossThreadExecutor::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let log = Arc::clone(&log);
            executor.execute_async(move || log.lock().push(i));
        }

        executor.drain();
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_drain_refused_off_privileged_thread() {
        let executor = Arc::new(CrossThreadExecutor::new());
        executor.execute_async(|| ());

        let other = Arc::clone(&executor);
        let drained = thread::spawn(move || other.drain()).join().unwrap();
        assert_eq!(drained, 0);
        assert_eq!(executor.queued(), 1);
    }

    #[test]
    fn test_panicking_work_reports_error() {
        let executor = CrossThreadExecutor::new();
        let mut handle = executor.execute_async(|| -> u32 { panic!("boom") });

        executor.drain();
        assert_eq!(handle.try_take(), Some(Err(ExecutorError::Panicked)));
    }

    #[test]
    fn test_dropped_executor_releases_waiters() {
        let executor = CrossThreadExecutor::new();
        let handle = executor.execute_async(|| 1);
        drop(executor);
        assert_eq!(handle.wait(), Err(ExecutorError::Dropped));
    }
}
