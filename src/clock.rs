use chrono::{Local, NaiveDateTime};
use std::time::Duration;
use tokio::time::Instant;

/// Source of wall-clock time for segment naming and sidecar timestamps.
///
/// Segment times are naive local time: folders and file names follow the
/// local calendar day.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    /// Monotonic instant at which wall time `at` is reached
    fn instant_at(&self, at: NaiveDateTime) -> Instant {
        let wait = (at - self.now()).to_std().unwrap_or(Duration::ZERO);
        Instant::now() + wait
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Wall time derived from tokio's clock, starting at a fixed moment.
///
/// Advances with `tokio::time` so a paused runtime can move through hours of
/// recording (and across midnight) instantly.
#[derive(Debug, Clone)]
pub struct TokioClock {
    base: NaiveDateTime,
    origin: Instant,
}

impl TokioClock {
    pub fn starting_at(base: NaiveDateTime) -> Self {
        Self {
            base,
            origin: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.base + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock::starting_at(at(23, 59, 0));
        assert_eq!(clock.now(), at(23, 59, 0));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(clock.now(), at(23, 59, 30));

        let target = clock.instant_at(at(23, 59, 45));
        assert_eq!(target - Instant::now(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_instant_at_past_time_is_now() {
        let clock = TokioClock::starting_at(at(12, 0, 0));
        let target = clock.instant_at(at(11, 0, 0));
        assert_eq!(target, Instant::now());
    }
}
