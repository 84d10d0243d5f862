use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{LedgerError, Timestamp};

/// Trusted time source of the ledger, in whole seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    /// Moves the clock forward and returns the new time.
    fn advance(&self, _secs: u64) -> Result<Timestamp, LedgerError> {
        Err(LedgerError::FixedClock)
    }
}

/// Clock that only moves when told to. Used for simulations and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }

    fn advance(&self, secs: u64) -> Result<Timestamp, LedgerError> {
        let prev = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |now| now.checked_add(secs))
            .map_err(|now| LedgerError::ClockOverflow { now, secs })?;
        Ok(prev + secs)
    }
}

/// Wall clock, seconds since the unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}
