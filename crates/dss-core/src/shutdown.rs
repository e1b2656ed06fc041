//! Cooperative stop support via a shared atomic flag

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::DssError;

/// Granularity of [`StopSignal::sleep`].
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Stop flag shared between the signal handler, the scanner and transactions.
///
/// Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once a stop was requested.
    pub fn check(&self, what: &str) -> Result<(), DssError> {
        if self.is_stop_requested() {
            Err(DssError::Cancelled(what.to_string()))
        } else {
            Ok(())
        }
    }

    /// Sleep up to `duration`, waking early on stop.
    ///
    /// Returns `false` if a stop was requested.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stop_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    /// Route SIGTERM/SIGINT into this flag.
    ///
    /// First signal sets the flag; a second one exits with status 130.
    pub fn install_signal_handlers(&self) -> io::Result<()> {
        use signal_hook::consts::{SIGINT, SIGTERM};
        for sig in [SIGTERM, SIGINT] {
            signal_hook::flag::register_conditional_shutdown(sig, 130, Arc::clone(&self.0))?;
            signal_hook::flag::register(sig, Arc::clone(&self.0))?;
        }
        Ok(())
    }
}
