//! Error types for configuration and precondition failures.
//!
//! [`ConfigurationError`] is returned from `validate`/`configure` and descriptor constructors;
//! callers can recover by choosing another configuration. [`PreconditionViolation`] describes
//! a caller bug and is only ever raised as a panic.

use thiserror::Error;

use crate::tensor::{DataLayout, DataType};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("no Winograd configuration for a {kernel_h}x{kernel_w} kernel with {data_type} data")]
    UnsupportedKernel {
        kernel_h: usize,
        kernel_w: usize,
        data_type: DataType,
    },
    #[error(
        "Winograd F({tile_h}x{tile_w}, {kernel_h}x{kernel_w}) with {data_type} data requires fast math"
    )]
    FastMathRequired {
        tile_h: usize,
        tile_w: usize,
        kernel_h: usize,
        kernel_w: usize,
        data_type: DataType,
    },
    #[error("Winograd convolution only supports unit stride (got {stride_x}x{stride_y})")]
    NonUnitStride { stride_x: usize, stride_y: usize },
    #[error("unsupported padding: {0}")]
    UnsupportedPadding(String),
    #[error("{tensor} has data type {actual}, expected {expected}")]
    DataTypeMismatch {
        tensor: &'static str,
        expected: DataType,
        actual: DataType,
    },
    #[error("{tensor} has layout {actual}, expected {expected}")]
    LayoutMismatch {
        tensor: &'static str,
        expected: DataLayout,
        actual: DataLayout,
    },
    #[error("{tensor} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        tensor: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("invalid shape {dims:?}: {reason}")]
    InvalidShape { dims: Vec<usize>, reason: String },
    #[error("invalid permutation {perm:?} for rank {rank}")]
    InvalidPermutation { perm: Vec<usize>, rank: usize },
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

/// Programmer errors detected at run time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionViolation {
    #[error("operator used before a successful configure")]
    NotConfigured,
    #[error("operator run before weights were prepared")]
    NotPrepared,
    #[error("{tensor} descriptor does not match the configured one")]
    DescriptorMismatch { tensor: &'static str },
    #[error("bias {0} at prepare but the operator was configured otherwise")]
    BiasMismatch(&'static str),
    #[error("workspace was not created for this operator configuration")]
    ForeignWorkspace,
}

impl PreconditionViolation {
    /// Abort the current call with this violation as the panic message.
    #[track_caller]
    pub fn raise(self) -> ! {
        panic!("precondition violated: {self}")
    }
}
