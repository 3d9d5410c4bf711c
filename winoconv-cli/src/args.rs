//! Command-line argument definitions for the winoconv driver.

use std::{fmt, path::PathBuf, str::FromStr};

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use winoconv_core::{ActivationKind, PadStrideInfo};
use winoconv_utils::{LayoutPreference, PrecisionPreference};

/// Configure and run Winograd convolutions on synthetic tensors.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Optional settings JSON (defaults to built-in engine settings).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable telemetry timing logs (defaults to settings file).
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub telemetry: bool,

    /// Override telemetry logging level (error, warn, info, debug, trace).
    #[arg(long, global = true, value_name = "LEVEL")]
    pub telemetry_level: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the convolution once and report stage timings.
    Run {
        #[command(flatten)]
        problem: ProblemArgs,

        /// Compare the result against the direct convolution.
        #[arg(long, action = ArgAction::SetTrue)]
        parity: bool,
    },
    /// Time repeated runs, optionally against the direct convolution.
    Bench {
        #[command(flatten)]
        problem: ProblemArgs,

        /// Timed runs after one warm-up run.
        #[arg(long, default_value_t = 10)]
        iterations: usize,

        /// Also time the direct convolution.
        #[arg(long, action = ArgAction::SetTrue)]
        compare_direct: bool,
    },
    /// Print the selected tile and scratch-buffer plan without running.
    Plan {
        #[command(flatten)]
        problem: ProblemArgs,
    },
}

impl Command {
    pub fn problem(&self) -> &ProblemArgs {
        match self {
            Command::Run { problem, .. }
            | Command::Bench { problem, .. }
            | Command::Plan { problem } => problem,
        }
    }
}

/// Shape and numeric options shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct ProblemArgs {
    /// Input shape as `NxCxHxW`.
    #[arg(long, default_value = "1x16x32x32")]
    pub input: InputDims,

    /// Number of output channels.
    #[arg(long, default_value_t = 16)]
    pub out_channels: usize,

    /// Kernel size as `HxW`.
    #[arg(long, default_value = "3x3")]
    pub kernel: KernelDims,

    #[arg(long, value_enum, default_value_t = PaddingMode::Same)]
    pub padding: PaddingMode,

    /// Tensor layout (overrides settings file).
    #[arg(long)]
    pub layout: Option<LayoutPreference>,

    /// Element precision (overrides settings file).
    #[arg(long)]
    pub precision: Option<PrecisionPreference>,

    /// Scheduler threads, `0` for the rayon default (overrides settings file).
    #[arg(long)]
    pub threads: Option<usize>,

    /// Permit lossy tile configurations.
    #[arg(long, action = ArgAction::SetTrue)]
    pub fast_math: bool,

    #[arg(long, value_enum)]
    pub activation: Option<ActivationArg>,

    /// Skip the bias tensor.
    #[arg(long = "no-bias", action = ArgAction::SetTrue)]
    pub no_bias: bool,

    /// Seed for the synthetic tensors.
    #[arg(long, default_value_t = 0)]
    pub seed: u32,
}

impl ProblemArgs {
    pub fn pad_stride(&self) -> PadStrideInfo {
        match self.padding {
            PaddingMode::Same => PadStrideInfo::same(self.kernel.height, self.kernel.width),
            PaddingMode::Valid => PadStrideInfo::valid(),
        }
    }
}

/// `NxCxHxW` input shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputDims {
    pub batches: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl FromStr for InputDims {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_dims(s)?.as_slice() {
            &[batches, channels, height, width] => Ok(Self {
                batches,
                channels,
                height,
                width,
            }),
            _ => Err(format!("invalid input shape '{s}'; expected NxCxHxW")),
        }
    }
}

impl fmt::Display for InputDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}x{}",
            self.batches, self.channels, self.height, self.width
        )
    }
}

/// `HxW` kernel size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelDims {
    pub height: usize,
    pub width: usize,
}

impl FromStr for KernelDims {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_dims(s)?.as_slice() {
            &[height, width] => Ok(Self { height, width }),
            &[side] => Ok(Self {
                height: side,
                width: side,
            }),
            _ => Err(format!("invalid kernel size '{s}'; expected HxW")),
        }
    }
}

impl fmt::Display for KernelDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

fn parse_dims(s: &str) -> Result<Vec<usize>, String> {
    s.trim()
        .split(['x', 'X'])
        .map(|part| match part.trim().parse::<usize>() {
            Ok(0) => Err(format!("dimension in '{s}' must be positive")),
            Ok(value) => Ok(value),
            Err(_) => Err(format!("invalid dimension '{part}' in '{s}'")),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PaddingMode {
    /// Keep the spatial size.
    Same,
    /// No padding.
    Valid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActivationArg {
    Relu,
    /// Bounded ReLU clamped at 6.
    Relu6,
    /// Leaky ReLU with slope 0.1.
    LeakyRelu,
    Sigmoid,
    Tanh,
}

impl From<ActivationArg> for ActivationKind {
    fn from(value: ActivationArg) -> Self {
        match value {
            ActivationArg::Relu => ActivationKind::Relu,
            ActivationArg::Relu6 => ActivationKind::BoundedRelu { upper: 6.0 },
            ActivationArg::LeakyRelu => ActivationKind::LeakyRelu { alpha: 0.1 },
            ActivationArg::Sigmoid => ActivationKind::Sigmoid,
            ActivationArg::Tanh => ActivationKind::Tanh,
        }
    }
}
