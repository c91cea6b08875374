use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("no async runtime is available to run delayed tasks")]
    NoRuntime,
}

/// Single-shot cancellable delayed task.
///
/// Every `schedule` call aborts whatever is still waiting and starts a fresh quiet
/// period, so a burst of calls results in exactly one execution of the last task.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule<Fut>(&mut self, task: Fut) -> Result<(), ScheduleError>
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = Handle::try_current().map_err(|_| ScheduleError::NoRuntime)?;
        self.cancel();

        let delay = self.delay;
        trace!(delay_ms = delay.as_millis() as u64, "scheduling debounced task");
        self.pending = Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        }));
        Ok(())
    }

    /// Drops the pending task, if any. Returns whether something was actually waiting.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_last_task_once() {
        let mut debouncer = Debouncer::new(Duration::from_millis(300));
        let runs = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(Mutex::new(0));

        for i in 1..=5 {
            let runs = runs.clone();
            let last = last.clone();
            debouncer
                .schedule(async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    *last.lock().unwrap() = i;
                })
                .unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(*last.lock().unwrap(), 5);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_run() {
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        debouncer
            .schedule(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(debouncer.is_pending());
        assert!(debouncer.cancel());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(!debouncer.cancel());
    }

    #[test]
    fn test_schedule_without_runtime() {
        let mut debouncer = Debouncer::new(Duration::from_millis(10));
        assert_eq!(debouncer.schedule(async {}), Err(ScheduleError::NoRuntime));
        assert!(!debouncer.is_pending());
    }
}
