//! Scheduled background tasks and time-boxed execution
//!
//! Every long-lived worker in the system (detector polls, queue drains, metric
//! sampling, retention sweeps, reports) runs as a `ScheduledTask`: a dedicated
//! thread with a ticker and a `CancellationToken`. A tick that fails or panics is
//! logged and backs off; it never stops the task or affects other tasks.

use log::{debug, error, info, warn};
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Upper bound on the back-off multiplier applied after consecutive failures
const MAX_BACKOFF_EXPONENT: u32 = 3;

/// Shared cancellation flag that sleeping workers can wait on
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token and wake every waiter
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for up to `timeout`, returning early if cancelled
    ///
    /// # Returns
    ///
    /// `true` if the token was cancelled before the timeout elapsed
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = cvar
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            cancelled = guard;
        }
        true
    }
}

/// Delay before the next tick given the number of consecutive failures
pub fn backoff_delay(interval: Duration, consecutive_failures: u32) -> Duration {
    interval * 2u32.pow(consecutive_failures.min(MAX_BACKOFF_EXPONENT))
}

/// A named periodic worker running on its own thread
pub struct ScheduledTask {
    name: String,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Spawn a worker that calls `tick` every `interval` until stopped
    ///
    /// The first tick happens one interval after spawning. Errors and panics
    /// inside `tick` are contained here: they are logged, the next wait doubles
    /// (up to 8x the interval), and a successful tick resets the back-off.
    pub fn spawn<F, E>(name: impl Into<String>, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Result<(), E> + Send + 'static,
        E: Display,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let thread_token = token.clone();
        let thread_name = name.clone();

        let handle = thread::spawn(move || {
            info!("Task '{}' started with interval {:?}", thread_name, interval);
            let mut consecutive_failures = 0u32;

            loop {
                let wait = backoff_delay(interval, consecutive_failures);
                if thread_token.wait_timeout(wait) {
                    break;
                }

                match panic::catch_unwind(AssertUnwindSafe(&mut tick)) {
                    Ok(Ok(())) => {
                        if consecutive_failures > 0 {
                            info!(
                                "Task '{}' recovered after {} failed ticks",
                                thread_name, consecutive_failures
                            );
                        }
                        consecutive_failures = 0;
                    }
                    Ok(Err(e)) => {
                        consecutive_failures = consecutive_failures.saturating_add(1);
                        warn!(
                            "Task '{}' tick failed ({} in a row): {}",
                            thread_name, consecutive_failures, e
                        );
                    }
                    Err(_) => {
                        consecutive_failures = consecutive_failures.saturating_add(1);
                        error!(
                            "Task '{}' tick panicked ({} in a row)",
                            thread_name, consecutive_failures
                        );
                    }
                }
            }

            info!("Task '{}' stopped", thread_name);
        });

        Self {
            name,
            token,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the worker thread is still alive
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Cancel the worker and wait for its thread to exit
    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            debug!("Waiting for task '{}' to join", self.name);
            if handle.join().is_err() {
                error!("Task '{}' thread failed to join", self.name);
            }
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Outcome of a time-boxed call that did not produce a value
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutError {
    #[error("operation exceeded its time budget")]
    Elapsed,

    #[error("operation panicked")]
    Panicked,
}

/// Run `work` on a helper thread and wait at most `timeout` for its result
///
/// When the budget is exceeded the helper thread is abandoned: it keeps running
/// to completion in the background but its result is discarded.
pub fn run_with_timeout<T, F>(timeout: Duration, work: F) -> Result<T, TimeoutError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let result = work();
        // The receiver is gone when the caller already timed out
        let _ = sender.send(result);
    });

    match receiver.recv_timeout(timeout) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) => Err(TimeoutError::Elapsed),
        Err(RecvTimeoutError::Disconnected) => Err(TimeoutError::Panicked),
    }
}
