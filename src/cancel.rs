//! Cooperative cancellation on Ctrl+C.
//!
//! The handler only flips a shared flag. The interpreter checks it between
//! events, and every long wait goes through [`Cancel::sleep`] so an
//! interrupt is noticed within one slice.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("interrupted")]
pub struct Interrupted;

#[derive(Debug, Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the process-wide Ctrl+C handler. Call once, from `main`.
    pub fn install() -> Result<Self, String> {
        let cancel = Self::new();
        let flag = cancel.clone();
        ctrlc::set_handler(move || {
            log::info!("Interrupted, stopping after the current step");
            flag.trigger();
        })
        .map_err(|e| format!("failed to install Ctrl+C handler: {e}"))?;
        Ok(cancel)
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless interrupted first. A duration past the
    /// end of the clock waits until interrupted.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        let deadline = Instant::now().checked_add(duration);
        loop {
            if self.is_set() {
                return Err(Interrupted);
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(());
                    }
                    SLICE.min(deadline - now)
                }
                None => SLICE,
            };
            thread::sleep(slice);
        }
    }

    /// [`Cancel::sleep`] for a duration in seconds. Negative or NaN means
    /// zero; anything too large for a [`Duration`] means [`Duration::MAX`].
    pub fn sleep_secs(&self, seconds: f64) -> Result<(), Interrupted> {
        self.sleep(seconds_to_duration(seconds))
    }
}

pub fn seconds_to_duration(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_completes_when_not_cancelled() {
        let cancel = Cancel::new();
        assert_eq!(cancel.sleep(Duration::from_millis(5)), Ok(()));
        assert_eq!(cancel.sleep_secs(-1.0), Ok(()));
    }

    #[test]
    fn triggered_flag_interrupts_sleep_promptly() {
        let cancel = Cancel::new();
        let remote = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.trigger();
        });

        let started = Instant::now();
        assert_eq!(cancel.sleep(Duration::from_secs(30)), Err(Interrupted));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(cancel.is_set());
        handle.join().unwrap();
    }

    #[test]
    fn absurd_durations_wait_for_the_flag_without_panicking() {
        assert_eq!(seconds_to_duration(f64::NAN), Duration::ZERO);
        assert_eq!(seconds_to_duration(-3.0), Duration::ZERO);
        assert_eq!(seconds_to_duration(1e30), Duration::MAX);
        assert_eq!(seconds_to_duration(f64::INFINITY), Duration::MAX);
        assert_eq!(seconds_to_duration(0.25), Duration::from_millis(250));

        let cancel = Cancel::new();
        cancel.trigger();
        assert_eq!(cancel.sleep_secs(1e30), Err(Interrupted));
        assert_eq!(cancel.sleep(Duration::MAX), Err(Interrupted));
    }
}
