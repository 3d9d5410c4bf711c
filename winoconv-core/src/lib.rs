//! Winograd minimal-filtering convolution.
//!
//! This crate selects a Winograd tile for a convolution, plans its scratch memory, prepares
//! weights once and then runs the input transform, batched GEMM and output transform on a
//! pluggable scheduler. A direct convolution is included as the numerical reference.

/// Elementwise activations, fused or applied as a separate pass.
pub mod activation;
/// Configuration and precondition errors.
pub mod error;
/// Strided GEMM backends.
pub mod gemm;
/// NCHW/NHWC and weight-layout permutation.
pub mod layout;
/// Scratch-buffer planning and the aligned arena.
pub mod memory;
/// The configure/prepare/run operator.
pub mod operator;
/// Padding validation and output geometry.
pub mod padding;
/// Direct convolution used for parity checks.
pub mod reference;
/// Work distribution across threads.
pub mod scheduler;
/// Tile-size selection and the compatibility table.
pub mod selector;
/// The four Winograd pipeline stages.
pub mod stages;
/// Tensor descriptors and host tensors.
pub mod tensor;
/// Winograd transform matrices.
pub mod transform;

pub use activation::ActivationKind;
pub use error::{ConfigurationError, PreconditionViolation};
pub use gemm::{GemmBackend, MatrixMultiplyGemm, MatrixView, MatrixViewMut, NaiveGemm};
pub use layout::{LayoutAdapter, permute_tensor};
pub use memory::{
    AuxArena, AuxBufferDescriptor, AuxBufferId, AuxBufferPlan, AuxBufferPlanner, MemoryLifetime,
    PipelineStep,
};
pub use operator::{OperatorState, WinogradConvInfo, WinogradConvOperator};
pub use padding::{PadStrideInfo, PaddingPolicy, compute_output_dim, compute_output_shape};
pub use reference::conv2d_direct;
pub use scheduler::{RayonScheduler, Scheduler, SerialScheduler};
pub use selector::{Size2D, WinogradConfigSelector, WinogradTileConfig, WinogradVariant};
pub use tensor::{DataLayout, DataType, Tensor, TensorDescriptor, TensorShape};

/// Returns the crate version for diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
