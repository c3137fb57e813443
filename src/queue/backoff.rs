use chrono::{DateTime, Duration, TimeZone, Utc};

/// Default exponential base when the config table has no usable value.
pub const DEFAULT_BACKOFF_BASE: u64 = 2;

/// Retry delay policy: `delay(attempts) = base ^ attempts` seconds, uncapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl Backoff {
    pub fn new(base: u64) -> Self {
        Self { base }
    }

    /// Delay in seconds for the given attempt count (already incremented for
    /// the failure being recorded). Saturates instead of overflowing.
    pub fn delay_secs(&self, attempts: u32) -> u64 {
        self.base.checked_pow(attempts).unwrap_or(u64::MAX)
    }

    /// Instant at which a job that just reached `attempts` becomes claimable again.
    ///
    /// Clamped to the end of year 9999 so stored timestamps keep sorting lexically.
    pub fn retry_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        i64::try_from(self.delay_secs(attempts))
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|delay| now.checked_add_signed(delay))
            .map(|at| at.min(latest_instant()))
            .unwrap_or_else(latest_instant)
    }
}

fn latest_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
