mod args;
mod report;

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};
use winoconv_core::{
    DataLayout, DataType, Tensor, TensorDescriptor, WinogradConvInfo, WinogradConvOperator,
    conv2d_direct,
};
use winoconv_utils::{EngineSettings, StageTimings, init_logging};

use crate::args::{Cli, Command, ProblemArgs};
use crate::report::{
    BenchmarkSummary, ParitySummary, PlanSummary, ProblemSummary, Report, summarize_stages,
};

const F32_PARITY_TOLERANCE: f32 = 1e-3;
const F16_PARITY_TOLERANCE: f32 = 0.25;

fn main() -> Result<()> {
    init_logging(LevelFilter::Info)?;
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_ref())?;
    apply_cli_overrides(&mut settings, &cli);
    settings.telemetry.apply();

    let report = execute(&cli.command, &settings)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn load_settings(path: Option<&PathBuf>) -> Result<EngineSettings> {
    match path {
        Some(path) => {
            let settings = EngineSettings::load_from_path(path)?;
            info!("Loaded settings from {}", path.display());
            Ok(settings)
        }
        None => Ok(EngineSettings::default()),
    }
}

fn apply_cli_overrides(settings: &mut EngineSettings, cli: &Cli) {
    let problem = cli.command.problem();
    if let Some(layout) = problem.layout {
        settings.runtime.layout = layout;
    }
    if let Some(precision) = problem.precision {
        settings.runtime.precision = precision;
    }
    if let Some(threads) = problem.threads {
        settings.runtime.threads = threads;
    }
    if problem.fast_math {
        settings.runtime.allow_fast_math = true;
    }
    if cli.telemetry {
        settings.telemetry.enabled = true;
    }
    if let Some(level) = cli.telemetry_level.as_deref() {
        match level.trim().parse::<LevelFilter>() {
            Ok(filter) => settings.telemetry.set_level(filter),
            Err(_) => warn!("Ignoring unknown telemetry level '{level}'"),
        }
    }
}

/// Synthetic input, weights and bias for one convolution.
struct Workload {
    info: WinogradConvInfo,
    input: Tensor,
    weights: Tensor,
    bias: Option<Tensor>,
}

impl Workload {
    fn build(problem: &ProblemArgs, settings: &EngineSettings) -> Result<Self> {
        let data_type = DataType::from(settings.runtime.precision);
        let layout = DataLayout::from(settings.runtime.layout);
        let dims = problem.input;

        let input_desc = TensorDescriptor::activation(
            dims.batches,
            dims.channels,
            dims.height,
            dims.width,
            data_type,
            layout,
        )?;
        let weights_desc = TensorDescriptor::weights(
            problem.out_channels,
            dims.channels,
            problem.kernel.height,
            problem.kernel.width,
            data_type,
            layout,
        )?;
        let bias_desc = if problem.no_bias {
            None
        } else {
            Some(TensorDescriptor::bias(problem.out_channels, data_type)?)
        };

        let seed = problem.seed;
        let input = Tensor::from_fn(input_desc.clone(), |i| synthetic(i, seed));
        let weights = Tensor::from_fn(weights_desc.clone(), |i| {
            0.5 * synthetic(i, seed.wrapping_add(1))
        });
        let bias = bias_desc
            .clone()
            .map(|desc| Tensor::from_fn(desc, |i| 0.25 * synthetic(i, seed.wrapping_add(2))));

        let mut info = WinogradConvInfo::new(input_desc, weights_desc, bias_desc, problem.pad_stride())
            .with_context(|| format!("invalid convolution {} * {}", dims, problem.kernel))?
            .with_fast_math(settings.runtime.allow_fast_math);
        if let Some(activation) = problem.activation {
            info = info.with_activation(activation.into());
        }
        Ok(Self {
            info,
            input,
            weights,
            bias,
        })
    }

    fn summary(&self, problem: &ProblemArgs) -> ProblemSummary {
        ProblemSummary {
            input: problem.input.to_string(),
            kernel: problem.kernel.to_string(),
            out_channels: problem.out_channels,
            output: self.info.output.dims().to_vec(),
            layout: self.info.input.layout().to_string().to_ascii_lowercase(),
            data_type: self.info.input.data_type().to_string(),
            padding: format!("{:?}", problem.padding).to_ascii_lowercase(),
            activation: self.info.activation.map(|kind| format!("{kind:?}")),
            bias: self.bias.is_some(),
        }
    }

    fn reference(&self) -> Result<Tensor> {
        conv2d_direct(
            &self.input,
            &self.weights,
            self.bias.as_ref(),
            &self.info.pad_stride,
            self.info.activation,
        )
        .context("direct convolution failed")
    }
}

/// Deterministic value in `[-1, 1)`.
fn synthetic(index: usize, seed: u32) -> f32 {
    let mixed = (index as u32)
        .wrapping_mul(2_654_435_761)
        .wrapping_add(seed.wrapping_mul(40_503))
        .rotate_left(13)
        .wrapping_mul(2_246_822_519);
    (mixed >> 8) as f32 / (1u32 << 23) as f32 - 1.0
}

fn execute(command: &Command, settings: &EngineSettings) -> Result<Report> {
    let problem = command.problem();
    let workload = Workload::build(problem, settings)?;
    let timings = Arc::new(StageTimings::new());
    let mut op = WinogradConvOperator::from_settings(&settings.runtime)
        .context("failed to build the stage scheduler")?
        .with_timings(Arc::clone(&timings));

    op.configure(&workload.info)
        .with_context(|| format!("cannot run {} with a {} kernel", problem.input, problem.kernel))?;
    let plan = PlanSummary::from_operator(&op);
    info!(
        "Configured {} ({} threads, {} scratch bytes)",
        plan.variant, plan.threads, plan.total_bytes
    );

    let mut report = Report {
        version: winoconv_core::version(),
        problem: workload.summary(problem),
        plan,
        stages: Vec::new(),
        parity: None,
        benchmarks: Vec::new(),
    };

    match command {
        Command::Plan { .. } => {}
        Command::Run { parity, .. } => {
            let output = op.run_with_weights(
                &workload.input,
                &workload.weights,
                workload.bias.as_ref(),
            );
            if *parity {
                let expected = workload.reference()?;
                let summary =
                    ParitySummary::compare(&output, &expected, parity_tolerance(&workload));
                if summary.passed {
                    info!("Parity ok (max abs diff {:.3e})", summary.max_abs_diff);
                } else {
                    warn!(
                        "Parity failed: max abs diff {:.3e} exceeds tolerance {}",
                        summary.max_abs_diff, summary.tolerance
                    );
                }
                report.parity = Some(summary);
            }
        }
        Command::Bench {
            iterations,
            compare_direct,
            ..
        } => {
            anyhow::ensure!(*iterations > 0, "benchmark requires at least one iteration");
            op.prepare(&workload.weights, workload.bias.as_ref());
            let mut output = Tensor::zeros(op.output_descriptor().clone());
            op.run_into(&workload.input, &mut output);

            info!("Timing {iterations} Winograd run(s)...");
            let samples = time_iterations(*iterations, || {
                op.run_into(&workload.input, &mut output);
                Ok(())
            })?;
            report
                .benchmarks
                .push(BenchmarkSummary::from_samples("winograd", &samples));

            if *compare_direct {
                info!("Timing {iterations} direct run(s)...");
                let samples = time_iterations(*iterations, || workload.reference().map(drop))?;
                report
                    .benchmarks
                    .push(BenchmarkSummary::from_samples("direct", &samples));
            }
        }
    }

    report.stages = summarize_stages(&timings.snapshot());
    debug!("Recorded {} stage label(s)", report.stages.len());
    Ok(report)
}

fn parity_tolerance(workload: &Workload) -> f32 {
    match workload.info.input.data_type() {
        DataType::F32 => F32_PARITY_TOLERANCE,
        DataType::F16 => F16_PARITY_TOLERANCE,
    }
}

fn time_iterations(iterations: usize, mut f: impl FnMut() -> Result<()>) -> Result<Vec<Duration>> {
    let mut samples = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let start = Instant::now();
        f()?;
        samples.push(start.elapsed());
    }
    Ok(samples)
}
