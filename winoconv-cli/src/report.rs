//! JSON report records printed by the driver.

use std::time::Duration;

use serde::Serialize;
use winoconv_core::{AuxBufferDescriptor, Tensor, WinogradConvOperator};

#[derive(Debug, Serialize)]
pub struct ProblemSummary {
    pub input: String,
    pub kernel: String,
    pub out_channels: usize,
    pub output: Vec<usize>,
    pub layout: String,
    pub data_type: String,
    pub padding: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation: Option<String>,
    pub bias: bool,
}

#[derive(Debug, Serialize)]
pub struct PlanSummary {
    pub variant: String,
    pub output_tile: [usize; 2],
    pub input_tile: [usize; 2],
    pub n_block: usize,
    pub fast_math: bool,
    pub threads: usize,
    pub total_bytes: usize,
    pub peak_bytes: usize,
    pub buffers: Vec<AuxBufferDescriptor>,
}

impl PlanSummary {
    pub fn from_operator(op: &WinogradConvOperator) -> Self {
        let config = op.tile_config();
        let plan = op.aux_plan();
        let output_tile = config.output_tile();
        let input_tile = config.input_tile();
        Self {
            variant: config.variant().to_string(),
            output_tile: [output_tile.height, output_tile.width],
            input_tile: [input_tile.height, input_tile.width],
            n_block: config.n_block(),
            fast_math: config.requires_fast_math(),
            threads: plan.threads(),
            total_bytes: plan.total_bytes(),
            peak_bytes: plan.peak_bytes(),
            buffers: plan.buffers().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSummary {
    pub label: String,
    pub calls: usize,
    pub total_ms: f64,
}

/// Fold raw timing records into one entry per label, in first-seen order.
pub fn summarize_stages(records: &[(String, Duration)]) -> Vec<StageSummary> {
    let mut stages: Vec<StageSummary> = Vec::new();
    for (label, duration) in records {
        let ms = duration_to_ms(*duration);
        match stages.iter_mut().find(|stage| &stage.label == label) {
            Some(stage) => {
                stage.calls += 1;
                stage.total_ms += ms;
            }
            None => stages.push(StageSummary {
                label: label.clone(),
                calls: 1,
                total_ms: ms,
            }),
        }
    }
    stages
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParitySummary {
    pub max_abs_diff: f32,
    pub tolerance: f32,
    pub passed: bool,
}

impl ParitySummary {
    /// Compare elementwise with an `abs + abs * |expected|` bound.
    pub fn compare(actual: &Tensor, expected: &Tensor, tolerance: f32) -> Self {
        let mut max_abs_diff = 0.0f32;
        let mut passed = actual.descriptor() == expected.descriptor();
        for (&got, &want) in actual.data().iter().zip(expected.data()) {
            let diff = (got - want).abs();
            max_abs_diff = max_abs_diff.max(diff);
            if !(diff <= tolerance * (1.0 + want.abs())) {
                passed = false;
            }
        }
        Self {
            max_abs_diff,
            tolerance,
            passed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BenchmarkSummary {
    pub label: String,
    pub samples: usize,
    pub total_ms: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl BenchmarkSummary {
    pub fn from_samples(label: &str, samples: &[Duration]) -> Self {
        Self {
            label: label.to_string(),
            samples: samples.len(),
            total_ms: sum_durations_ms(samples),
            avg_ms: avg_duration_ms(samples),
            min_ms: samples
                .iter()
                .map(|d| duration_to_ms(*d))
                .fold(f64::MAX, f64::min),
            max_ms: samples
                .iter()
                .map(|d| duration_to_ms(*d))
                .fold(0.0, f64::max),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Report {
    /// `winoconv-core` version that produced the numbers.
    pub version: &'static str,
    pub problem: ProblemSummary,
    pub plan: PlanSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<StageSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parity: Option<ParitySummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub benchmarks: Vec<BenchmarkSummary>,
}

fn sum_durations_ms(samples: &[Duration]) -> f64 {
    samples.iter().map(|d| duration_to_ms(*d)).sum()
}

fn avg_duration_ms(samples: &[Duration]) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        sum_durations_ms(samples) / samples.len() as f64
    }
}

fn duration_to_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}
