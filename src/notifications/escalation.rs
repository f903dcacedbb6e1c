use crate::events::ErrorKey;
use crate::scheduling::CancellationToken;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

#[derive(Debug)]
struct ArmedTimer {
    generation: u64,
    token: CancellationToken,
}

type TimerMap = Arc<Mutex<HashMap<ErrorKey, ArmedTimer>>>;

/// One-shot escalation timers keyed by error
///
/// At most one timer is armed per key. Arming again cancels and replaces the
/// previous timer; a timer fires at most once and only if it is still the armed
/// one when its timeout elapses.
#[derive(Debug, Default)]
pub struct EscalationTimers {
    timers: TimerMap,
    next_generation: AtomicU64,
    fired: Arc<AtomicU64>,
}

impl EscalationTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer for `key`; `on_fire` runs once after `timeout`
    pub fn arm<F>(&self, key: ErrorKey, timeout: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        {
            let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
            let replaced = timers.insert(
                key,
                ArmedTimer {
                    generation,
                    token: token.clone(),
                },
            );
            if let Some(previous) = replaced {
                debug!("Re-arming escalation timer for {}", key);
                previous.token.cancel();
            }
        }

        let timers = Arc::clone(&self.timers);
        let fired = Arc::clone(&self.fired);
        thread::spawn(move || {
            if token.wait_timeout(timeout) {
                return;
            }

            {
                let mut timers = timers.lock().unwrap_or_else(PoisonError::into_inner);
                match timers.get(&key) {
                    Some(armed) if armed.generation == generation => {
                        timers.remove(&key);
                    }
                    // Replaced or resolved while the lock was contended
                    _ => return,
                }
            }

            fired.fetch_add(1, Ordering::Relaxed);
            info!("Escalation timer fired for {} after {:?}", key, timeout);
            on_fire();
        });
    }

    /// Disarm the timer for `key`; returns whether one was armed
    pub fn cancel(&self, key: &ErrorKey) -> bool {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        match timers.remove(key) {
            Some(armed) => {
                armed.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Disarm every timer
    pub fn cancel_all(&self) {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, armed) in timers.drain() {
            armed.token.cancel();
        }
    }

    pub fn is_armed(&self, key: &ErrorKey) -> bool {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn active_count(&self) -> usize {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Timers that fired since creation
    pub fn fired_count(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }
}

impl Drop for EscalationTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ErrorCategory, ErrorEvent, Severity};
    use std::sync::atomic::AtomicUsize;

    fn key() -> ErrorKey {
        ErrorEvent::new(ErrorCategory::ApiFailure, Severity::Critical, "down", "test").key()
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let count = Arc::new(AtomicUsize::new(0));
        let shared = Arc::clone(&count);
        let make = move || -> Box<dyn FnOnce() + Send> {
            let shared = Arc::clone(&shared);
            Box::new(move || {
                shared.fetch_add(1, Ordering::SeqCst);
            })
        };
        (count, make)
    }

    #[test]
    fn test_timer_fires_exactly_once() {
        let timers = EscalationTimers::new();
        let (count, make) = counter();
        let key = key();

        timers.arm(key, Duration::from_millis(30), make());
        assert!(timers.is_armed(&key));

        thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timers.is_armed(&key));
        assert_eq!(timers.fired_count(), 1);
    }

    #[test]
    fn test_cancel_before_timeout_never_fires() {
        let timers = EscalationTimers::new();
        let (count, make) = counter();
        let key = key();

        timers.arm(key, Duration::from_millis(50), make());
        assert!(timers.cancel(&key));
        assert!(!timers.cancel(&key));

        thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(timers.active_count(), 0);
    }

    #[test]
    fn test_rearm_replaces_previous_timer() {
        let timers = EscalationTimers::new();
        let (count, make) = counter();
        let key = key();

        timers.arm(key, Duration::from_millis(40), make());
        timers.arm(key, Duration::from_millis(120), make());
        assert_eq!(timers.active_count(), 1);

        thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_independent_keys() {
        let timers = EscalationTimers::new();
        let (count, make) = counter();

        let first = key();
        let second = key();
        timers.arm(first, Duration::from_millis(20), make());
        timers.arm(second, Duration::from_millis(20), make());
        timers.cancel(&first);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
