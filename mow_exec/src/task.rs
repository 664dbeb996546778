//! # Background monitor tasks
//!
//! Shared plumbing for the periodic monitors (watchdog, GPS degradation). A monitor runs as a
//! supervised tokio task with an explicit shutdown handshake: [`MonitorTask::stop`] signals the
//! loop and then awaits its termination, so once it returns no further tick can fire.
//!
//! Each tick body runs inside [`guarded_tick`], which catches both errors and panics, logs them and
//! lets the loop continue.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, error};
use parking_lot::Mutex;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::params::ParamsError;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Handle on a running monitor loop.
#[derive(Debug, Default)]
pub struct MonitorTask {
    running: Mutex<Option<Running>>,
}

#[derive(Debug)]
struct Running {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Monitors must be started from within a tokio runtime")]
    NoRuntime,

    #[error("Invalid monitor period: {0}")]
    InvalidPeriod(#[from] ParamsError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MonitorTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while the loop has not exited.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|r| !r.handle.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the loop built by `body` unless one is already running.
    ///
    /// `body` is given the shutdown signal the loop must select on. Returns false if a loop was
    /// already running.
    pub fn spawn<F, Fut>(&self, body: F) -> Result<bool, TaskError>
    where
        F: FnOnce(Arc<Notify>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let rt = tokio::runtime::Handle::try_current().map_err(|_| TaskError::NoRuntime)?;

        let mut running = self.running.lock();
        if let Some(r) = running.as_ref() {
            if !r.handle.is_finished() {
                return Ok(false);
            }
        }

        let shutdown = Arc::new(Notify::new());
        let handle = rt.spawn(body(shutdown.clone()));
        *running = Some(Running { handle, shutdown });

        Ok(true)
    }

    /// Signal the loop to exit and wait for it to terminate.
    pub async fn stop(&self) {
        // The lock must not be held across the await
        let running = self.running.lock().take();

        if let Some(r) = running {
            r.shutdown.notify_one();
            if let Err(e) = r.handle.await {
                error!("Monitor task ended abnormally: {}", e);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Run one monitor tick, catching and logging errors and panics.
///
/// Returns `None` if the tick failed.
pub fn guarded_tick<T, E, F>(monitor: &str, tick: F) -> Option<T>
where
    F: FnOnce() -> Result<T, E>,
    E: std::fmt::Display,
{
    match catch_unwind(AssertUnwindSafe(tick)) {
        Ok(Ok(out)) => Some(out),
        Ok(Err(e)) => {
            error!("{} tick failed: {}", monitor, e);
            None
        }
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            error!("{} tick panicked: {}", monitor, msg);
            debug!("{} loop continues after panic", monitor);
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_guarded_tick() {
        assert_eq!(guarded_tick("test", || Ok::<_, String>(3)), Some(3));
        assert_eq!(guarded_tick("test", || Err::<u32, _>("bad")), None);
        assert_eq!(
            guarded_tick("test", || -> Result<u32, String> { panic!("boom") }),
            None
        );
    }

    #[tokio::test]
    async fn test_stop_joins_loop() -> Result<(), TaskError> {
        let task = MonitorTask::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        let t = ticks.clone();
        assert!(task.spawn(|shutdown| async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = tokio::time::sleep(Duration::from_millis(1)) => {}
                }
                t.fetch_add(1, Ordering::SeqCst);
            }
        })?);
        assert!(task.is_running());

        // A second spawn while running is refused
        assert!(!task.spawn(|_| async {})?);

        tokio::time::sleep(Duration::from_millis(20)).await;
        task.stop().await;
        assert!(!task.is_running());

        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop > 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);

        Ok(())
    }
}
