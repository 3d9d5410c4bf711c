//! Engine settings persisted as JSON and shared by the CLI and library callers.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path, str::FromStr};

/// Memory layout requested for activations and weights.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum LayoutPreference {
    #[default]
    Nchw,
    Nhwc,
}

impl fmt::Display for LayoutPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LayoutPreference::Nchw => "nchw",
            LayoutPreference::Nhwc => "nhwc",
        })
    }
}

impl FromStr for LayoutPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nchw" => Ok(LayoutPreference::Nchw),
            "nhwc" => Ok(LayoutPreference::Nhwc),
            other => Err(format!(
                "invalid layout '{other}'; expected 'nchw' or 'nhwc'"
            )),
        }
    }
}

/// Element precision requested for tensors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrecisionPreference {
    #[default]
    F32,
    F16,
}

impl fmt::Display for PrecisionPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PrecisionPreference::F32 => "f32",
            PrecisionPreference::F16 => "f16",
        })
    }
}

impl FromStr for PrecisionPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "f32" | "float32" | "single" => Ok(PrecisionPreference::F32),
            "f16" | "float16" | "half" => Ok(PrecisionPreference::F16),
            other => Err(format!("invalid precision '{other}'; expected 'f32' or 'f16'")),
        }
    }
}

/// Execution preferences for the convolution operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Worker threads for the stage scheduler. `0` uses rayon's global pool.
    pub threads: usize,
    /// Permit tile configurations whose numerical error exceeds strict tolerances.
    pub allow_fast_math: bool,
    pub layout: LayoutPreference,
    pub precision: PrecisionPreference,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            threads: 0,
            allow_fast_math: false,
            layout: LayoutPreference::Nchw,
            precision: PrecisionPreference::F32,
        }
    }
}

/// Telemetry logging preferences.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    /// One of off, error, warn, info, debug, trace.
    pub level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "debug".to_string(),
        }
    }
}

impl TelemetrySettings {
    /// Parse the level string, falling back to `Debug` for unknown values.
    pub fn level_filter(&self) -> LevelFilter {
        self.level
            .trim()
            .parse::<LevelFilter>()
            .unwrap_or(LevelFilter::Debug)
    }

    pub fn set_level(&mut self, level: LevelFilter) {
        self.level = level.as_str().to_ascii_lowercase();
    }

    /// Push these settings into the global telemetry switch.
    pub fn apply(&self) {
        crate::telemetry::configure(self.enabled, self.level_filter());
    }
}

/// Top-level settings document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSettings {
    pub runtime: RuntimeSettings,
    pub telemetry: TelemetrySettings,
}

impl EngineSettings {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))
    }

    /// Write settings as pretty-printed JSON, replacing any existing file.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }
}
