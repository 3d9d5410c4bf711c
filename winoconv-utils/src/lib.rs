//! Common helpers shared across winoconv crates.

/// Engine settings persisted as JSON.
pub mod config;
/// Scoped timing guards for stage-level tracing.
pub mod telemetry;

use anyhow::Result;
use log::LevelFilter;

pub use config::{
    EngineSettings, LayoutPreference, PrecisionPreference, RuntimeSettings, TelemetrySettings,
};
pub use telemetry::{
    StageTimings, TELEMETRY_TARGET, TimingGuard, configure as configure_telemetry,
    telemetry_allows, telemetry_enabled, telemetry_level, timing_guard,
};

/// Initialize logging once per process.
///
/// `RUST_LOG` takes precedence when set; otherwise `default_filter` applies. Telemetry records
/// are always passed through so the runtime switch in [`telemetry`] is the only gate.
pub fn init_logging(default_filter: LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    builder.filter_module(TELEMETRY_TARGET, LevelFilter::Trace);

    if builder.try_init().is_err() {
        // Logger already initialized; nothing to do.
    }
    Ok(())
}
