use crate::acquisition::position::Clock;
use crate::telemetry::metrics::MetricsRecorder;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop request shared between the signal handler and the ray
/// loop. Setting it never touches any buffer; the loop polls it at ray start,
/// inside the scan-position waits and after each moments-iteration.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run-wide state threaded through the ray loop by reference.
pub struct RunContext {
    cancel: CancellationToken,
    metrics: Arc<MetricsRecorder>,
    clock: Arc<dyn Clock + Send + Sync>,
    start_day: NaiveDate,
    max_rays: Option<u64>,
}

impl RunContext {
    pub fn new(
        cancel: CancellationToken,
        metrics: Arc<MetricsRecorder>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let start_day = clock.now().date_naive();
        Self {
            cancel,
            metrics,
            clock,
            start_day,
            max_rays: None,
        }
    }

    /// Stops the run after `max_rays` written rays.
    pub fn with_max_rays(mut self, max_rays: Option<u64>) -> Self {
        self.max_rays = max_rays;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Output files are per UTC day, so the run ends at the first ray
    /// boundary after midnight.
    pub fn day_changed(&self) -> bool {
        self.clock.now().date_naive() != self.start_day
    }

    pub fn max_rays(&self) -> Option<u64> {
        self.max_rays
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct SteppedClock(Mutex<DateTime<Utc>>);

    impl Clock for SteppedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[test]
    fn token_clones_share_state() {
        let token = CancellationToken::new();
        let handler_side = token.clone();
        assert!(!token.is_cancelled());
        handler_side.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn day_change_detected_after_midnight() {
        let before = Utc.with_ymd_and_hms(2024, 6, 1, 23, 59, 50).unwrap();
        let clock = Arc::new(SteppedClock(Mutex::new(before)));
        let ctx = RunContext::new(
            CancellationToken::new(),
            Arc::new(MetricsRecorder::new()),
            clock.clone(),
        );
        assert!(!ctx.day_changed());
        *clock.0.lock().unwrap() = before + chrono::Duration::seconds(20);
        assert!(ctx.day_changed());
    }
}
