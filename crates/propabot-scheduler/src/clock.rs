use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};

/// Source of wall-clock time for the trigger loop.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock derived from tokio's clock, starting at a fixed UTC instant.
///
/// Under a paused runtime it only moves when tokio time moves, so timers and
/// wall time stay in lockstep. [`TokioClock::jump`] shifts the wall clock
/// without touching timers, like a host waking from suspend.
pub struct TokioClock {
    origin: DateTime<Utc>,
    start: tokio::time::Instant,
    skew_ms: AtomicI64,
}

impl TokioClock {
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            start: tokio::time::Instant::now(),
            skew_ms: AtomicI64::new(0),
        }
    }

    pub fn jump(&self, by: Duration) {
        self.skew_ms.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Duration::from_std(self.start.elapsed()).unwrap_or_else(|_| Duration::zero());
        self.origin + elapsed + Duration::milliseconds(self.skew_ms.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test(start_paused = true)]
    async fn follows_paused_time() {
        let origin = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = TokioClock::starting_at(origin);
        assert_eq!(clock.now(), origin);

        tokio::time::sleep(std::time::Duration::from_secs(90)).await;
        assert_eq!(clock.now(), origin + Duration::seconds(90));

        clock.jump(Duration::hours(1));
        assert_eq!(clock.now(), origin + Duration::seconds(3690));
    }
}
