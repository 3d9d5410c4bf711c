//! Scoped timing for convolution stages.
//!
//! A [`TimingGuard`] measures a scope and, on drop, logs the elapsed time under the
//! `winoconv::telemetry` target and optionally appends it to a [`StageTimings`] collector.
//! Logging is gated twice: by the runtime switch set through [`configure`] and by the
//! global `log` filter.

use std::{
    borrow::Cow,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    time::{Duration, Instant},
};

use log::{Level, LevelFilter, log, log_enabled};

/// Log target used by every telemetry record.
pub const TELEMETRY_TARGET: &str = "winoconv::telemetry";

static TELEMETRY_ENABLED: AtomicBool = AtomicBool::new(false);
static TELEMETRY_LEVEL: AtomicU8 = AtomicU8::new(0);

/// Ordered list of `(label, duration)` samples recorded by timing guards.
#[derive(Debug, Default)]
pub struct StageTimings {
    samples: Mutex<Vec<(String, Duration)>>,
}

impl StageTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, label: impl Into<String>, duration: Duration) {
        let mut samples = match self.samples.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        samples.push((label.into(), duration));
    }

    /// Copy of every recorded sample, in recording order.
    pub fn snapshot(&self) -> Vec<(String, Duration)> {
        self.samples
            .lock()
            .map(|samples| samples.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Sum of all samples carrying `label`.
    pub fn total_for(&self, label: &str) -> Duration {
        self.snapshot()
            .into_iter()
            .filter(|(name, _)| name == label)
            .map(|(_, duration)| duration)
            .sum()
    }

    pub fn clear(&self) {
        match self.samples.lock() {
            Ok(mut samples) => samples.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

/// Measures a scope; logs and/or records the duration when dropped.
pub struct TimingGuard<'a> {
    label: Cow<'static, str>,
    level: Level,
    start: Instant,
    log_on_drop: bool,
    sink: Option<&'a StageTimings>,
}

impl<'a> TimingGuard<'a> {
    fn new(label: Cow<'static, str>, level: Level, log_on_drop: bool) -> Self {
        Self {
            label,
            level,
            start: Instant::now(),
            log_on_drop,
            sink: None,
        }
    }

    /// Also append the measured duration to `timings` when the guard drops.
    pub fn record_into(mut self, timings: &'a StageTimings) -> Self {
        self.sink = Some(timings);
        self
    }

    pub fn is_logging(&self) -> bool {
        self.log_on_drop
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the guard early, returning the duration without logging or recording it.
    pub fn finish(mut self) -> Duration {
        self.log_on_drop = false;
        self.sink = None;
        self.start.elapsed()
    }
}

impl Drop for TimingGuard<'_> {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        if let Some(sink) = self.sink {
            sink.push(self.label.as_ref(), duration);
        }
        if self.log_on_drop {
            log!(
                target: TELEMETRY_TARGET,
                self.level,
                "{} took {:.2?}",
                self.label,
                duration
            );
        }
    }
}

/// Guard that logs at `level` when telemetry is switched on and the logger accepts it.
pub fn timing_guard(label: impl Into<Cow<'static, str>>, level: Level) -> TimingGuard<'static> {
    let log_on_drop = telemetry_allows(level) && log_enabled!(target: TELEMETRY_TARGET, level);
    TimingGuard::new(label.into(), level, log_on_drop)
}

/// Switch telemetry on or off and set its verbosity threshold.
pub fn configure(enabled: bool, level: LevelFilter) {
    TELEMETRY_ENABLED.store(enabled, Ordering::Relaxed);
    TELEMETRY_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn telemetry_enabled() -> bool {
    TELEMETRY_ENABLED.load(Ordering::Relaxed)
}

pub fn telemetry_level() -> LevelFilter {
    match TELEMETRY_LEVEL.load(Ordering::Relaxed) {
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        5 => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// `true` when telemetry is on and `level` is within the configured threshold.
pub fn telemetry_allows(level: Level) -> bool {
    telemetry_enabled() && level <= telemetry_level()
}
