//! Convolution padding, stride and output geometry.

use crate::error::ConfigurationError;
use crate::tensor::{TensorDescriptor, TensorShape};

/// Whether a convolution keeps the spatial size (`Same`) or shrinks it (`Valid`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingPolicy {
    Valid,
    Same,
}

/// Stride and per-edge padding of a 2-D convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PadStrideInfo {
    pub stride_x: usize,
    pub stride_y: usize,
    pub pad_left: usize,
    pub pad_right: usize,
    pub pad_top: usize,
    pub pad_bottom: usize,
}

impl PadStrideInfo {
    /// Unit stride with symmetric padding.
    pub const fn symmetric(pad_x: usize, pad_y: usize) -> Self {
        Self {
            stride_x: 1,
            stride_y: 1,
            pad_left: pad_x,
            pad_right: pad_x,
            pad_top: pad_y,
            pad_bottom: pad_y,
        }
    }

    pub const fn valid() -> Self {
        Self::symmetric(0, 0)
    }

    /// SAME padding for an odd `kernel_h x kernel_w` kernel.
    pub const fn same(kernel_h: usize, kernel_w: usize) -> Self {
        Self::symmetric(kernel_w / 2, kernel_h / 2)
    }

    pub const fn with_stride(mut self, stride_x: usize, stride_y: usize) -> Self {
        self.stride_x = stride_x;
        self.stride_y = stride_y;
        self
    }

    pub fn has_padding(&self) -> bool {
        self.pad_left != 0 || self.pad_right != 0 || self.pad_top != 0 || self.pad_bottom != 0
    }

    /// Any non-zero leading pad means SAME.
    pub fn policy(&self) -> PaddingPolicy {
        if self.pad_top != 0 || self.pad_left != 0 {
            PaddingPolicy::Same
        } else {
            PaddingPolicy::Valid
        }
    }

    /// Check that this is a unit-stride SAME or VALID padding for the given kernel.
    ///
    /// Each axis must be symmetric and padded by either `0` or `kernel / 2`; an axis whose
    /// kernel extent is 1 takes no padding. Square kernels use one policy on both axes.
    pub fn validate_for_kernel(
        &self,
        kernel_h: usize,
        kernel_w: usize,
    ) -> Result<PaddingPolicy, ConfigurationError> {
        if self.stride_x != 1 || self.stride_y != 1 {
            return Err(ConfigurationError::NonUnitStride {
                stride_x: self.stride_x,
                stride_y: self.stride_y,
            });
        }
        check_axis("horizontal", self.pad_left, self.pad_right, kernel_w)?;
        check_axis("vertical", self.pad_top, self.pad_bottom, kernel_h)?;
        if kernel_h == kernel_w && kernel_h > 1 && self.pad_left != self.pad_top {
            return Err(ConfigurationError::UnsupportedPadding(format!(
                "{kernel_h}x{kernel_w} kernels need the same policy on both axes \
                 (left {}, top {})",
                self.pad_left, self.pad_top
            )));
        }
        Ok(self.policy())
    }
}

fn check_axis(
    axis: &str,
    before: usize,
    after: usize,
    kernel: usize,
) -> Result<(), ConfigurationError> {
    if before != after {
        return Err(ConfigurationError::UnsupportedPadding(format!(
            "{axis} padding must be symmetric (got {before} and {after})"
        )));
    }
    let same = kernel / 2;
    if before != 0 && before != same {
        return Err(ConfigurationError::UnsupportedPadding(format!(
            "{axis} padding must be 0 or {same} for kernel extent {kernel} (got {before})"
        )));
    }
    Ok(())
}

/// Output extent of one spatial axis.
pub fn compute_output_dim(
    size: usize,
    pad_before: usize,
    pad_after: usize,
    kernel: usize,
    stride: usize,
) -> Result<usize, ConfigurationError> {
    let invalid = |reason: &str| ConfigurationError::InvalidShape {
        dims: vec![size, kernel],
        reason: reason.to_string(),
    };
    if stride == 0 {
        return Err(invalid("stride must be > 0"));
    }
    if kernel == 0 {
        return Err(invalid("kernel must be > 0"));
    }
    let numerator = size
        .checked_add(pad_before)
        .and_then(|v| v.checked_add(pad_after))
        .ok_or_else(|| invalid("padding overflowed usize"))?
        .checked_sub(kernel)
        .ok_or_else(|| invalid("kernel larger than padded input"))?;
    Ok(numerator / stride + 1)
}

/// Output shape of a convolution, in the input's layout.
pub fn compute_output_shape(
    input: &TensorDescriptor,
    weights: &TensorDescriptor,
    info: &PadStrideInfo,
) -> Result<TensorShape, ConfigurationError> {
    let out_h = compute_output_dim(
        input.height(),
        info.pad_top,
        info.pad_bottom,
        weights.height(),
        info.stride_y,
    )?;
    let out_w = compute_output_dim(
        input.width(),
        info.pad_left,
        info.pad_right,
        weights.width(),
        info.stride_x,
    )?;
    TensorShape::new(
        input
            .layout()
            .dims(input.batches(), weights.batches(), out_h, out_w),
    )
}
