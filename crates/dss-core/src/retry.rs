//! Bounded waiting and retry helpers

use std::time::Duration;

use crate::error::DssError;
use crate::shutdown::StopSignal;

/// How long to keep waiting for a resource: `count` pauses of `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitBudget {
    pub count: u32,
    pub interval: Duration,
}

impl WaitBudget {
    pub const fn new(count: u32, interval: Duration) -> Self {
        Self { count, interval }
    }

    /// Upper bound on the time spent waiting.
    pub fn total(&self) -> Duration {
        self.interval * self.count
    }
}

impl Default for WaitBudget {
    fn default() -> Self {
        Self::new(30, Duration::from_secs(10))
    }
}

/// Check until `check` returns `Some`, pausing between attempts.
///
/// Returns `Ok(None)` once the budget is used up and `Err(Cancelled)` when a
/// stop is requested while waiting.
pub fn wait_until<T>(
    label: &str,
    budget: WaitBudget,
    stop: &StopSignal,
    mut check: impl FnMut() -> Option<T>,
) -> Result<Option<T>, DssError> {
    let mut waited = 0u32;
    loop {
        if let Some(v) = check() {
            return Ok(Some(v));
        }
        if waited >= budget.count {
            return Ok(None);
        }
        waited += 1;
        log::debug!(
            "{label}: not ready, waiting {:?} ({waited}/{})",
            budget.interval,
            budget.count
        );
        if !stop.sleep(budget.interval) {
            return Err(DssError::Cancelled(label.to_string()));
        }
    }
}

/// Retry a fallible operation while its error is transient.
///
/// Returns the first success, or the last error on exhaustion or on a
/// non-retryable error.
pub fn retry_transient<T>(
    label: &str,
    max_retries: u32,
    pause: Duration,
    mut attempt_fn: impl FnMut() -> Result<T, DssError>,
) -> Result<T, DssError> {
    let mut attempt = 0u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries && e.is_retryable() => {
                attempt += 1;
                log::debug!("{label}: attempt {attempt}/{max_retries} failed: {e}, retrying...");
                std::thread::sleep(pause);
            }
            Err(e) => {
                log::error!("{label}: failed permanently: {e}");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn wait_until_ready_immediately() {
        let stop = StopSignal::new();
        let budget = WaitBudget::new(3, Duration::from_millis(1));
        let got = wait_until("check", budget, &stop, || Some(7)).unwrap();
        assert_eq!(got, Some(7));
    }

    #[test]
    fn wait_until_exhausts_budget() {
        let stop = StopSignal::new();
        let budget = WaitBudget::new(2, Duration::from_millis(1));
        let mut checks = 0;
        let got: Option<()> = wait_until("check", budget, &stop, || {
            checks += 1;
            None
        })
        .unwrap();
        assert_eq!(got, None);
        // initial check plus one per pause
        assert_eq!(checks, 3);
    }

    #[test]
    fn wait_until_ready_after_pause() {
        let stop = StopSignal::new();
        let budget = WaitBudget::new(5, Duration::from_millis(1));
        let mut checks = 0;
        let got = wait_until("check", budget, &stop, || {
            checks += 1;
            (checks == 3).then_some(checks)
        })
        .unwrap();
        assert_eq!(got, Some(3));
    }

    #[test]
    fn wait_until_cancelled() {
        let stop = StopSignal::new();
        stop.request_stop();
        let budget = WaitBudget::new(5, Duration::from_secs(1));
        let err = wait_until::<()>("check", budget, &stop, || None).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn default_budget() {
        let budget = WaitBudget::default();
        assert_eq!(budget.count, 30);
        assert_eq!(budget.total(), Duration::from_secs(300));
    }

    #[test]
    fn retry_transient_recovers() {
        let mut calls = 0;
        let got = retry_transient("op", 3, Duration::ZERO, || {
            calls += 1;
            if calls < 3 {
                Err(DssError::from(io::Error::new(io::ErrorKind::TimedOut, "slow")))
            } else {
                Ok(calls)
            }
        })
        .unwrap();
        assert_eq!(got, 3);
    }

    #[test]
    fn retry_transient_stops_on_permanent() {
        let mut calls = 0;
        let err = retry_transient::<()>("op", 3, Duration::ZERO, || {
            calls += 1;
            Err(DssError::Invalid("bad".into()))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(!err.is_retryable());
    }
}
