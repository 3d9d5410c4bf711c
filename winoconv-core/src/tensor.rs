//! Host tensors and their descriptors.
//!
//! Half-precision tensors keep their values in `f32` lanes. Every write through
//! [`DataType::round_slice`] snaps the values to the nearest representable `f16`, so the
//! numerics match a native half pipeline at each stage boundary.

use std::fmt;

use half::f16;
use serde::Serialize;
use winoconv_utils::{LayoutPreference, PrecisionPreference};

use crate::error::ConfigurationError;

/// Element precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    F32,
    F16,
}

impl DataType {
    pub const fn element_size(self) -> usize {
        match self {
            DataType::F32 => 4,
            DataType::F16 => 2,
        }
    }

    /// Round a single value to this precision.
    #[inline]
    pub fn round(self, value: f32) -> f32 {
        match self {
            DataType::F32 => value,
            DataType::F16 => f16::from_f32(value).to_f32(),
        }
    }

    pub fn round_slice(self, values: &mut [f32]) {
        if self == DataType::F16 {
            for value in values {
                *value = f16::from_f32(*value).to_f32();
            }
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataType::F32 => "f32",
            DataType::F16 => "f16",
        })
    }
}

impl From<PrecisionPreference> for DataType {
    fn from(value: PrecisionPreference) -> Self {
        match value {
            PrecisionPreference::F32 => DataType::F32,
            PrecisionPreference::F16 => DataType::F16,
        }
    }
}

/// Dimension order of 4-D activation and weight tensors.
///
/// Activations are `[N, C, H, W]` or `[N, H, W, C]`; weights follow the same tag as
/// `[O, I, H, W]` or `[O, H, W, I]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataLayout {
    Nchw,
    Nhwc,
}

impl DataLayout {
    /// Positions of (batch, channel, height, width) within a 4-D shape.
    pub const fn axes(self) -> [usize; 4] {
        match self {
            DataLayout::Nchw => [0, 1, 2, 3],
            DataLayout::Nhwc => [0, 3, 1, 2],
        }
    }

    /// Assemble a shape in this layout from logical (n, c, h, w) sizes.
    pub fn dims(self, n: usize, c: usize, h: usize, w: usize) -> [usize; 4] {
        match self {
            DataLayout::Nchw => [n, c, h, w],
            DataLayout::Nhwc => [n, h, w, c],
        }
    }
}

impl fmt::Display for DataLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataLayout::Nchw => "NCHW",
            DataLayout::Nhwc => "NHWC",
        })
    }
}

impl From<LayoutPreference> for DataLayout {
    fn from(value: LayoutPreference) -> Self {
        match value {
            LayoutPreference::Nchw => DataLayout::Nchw,
            LayoutPreference::Nhwc => DataLayout::Nhwc,
        }
    }
}

/// Ordered dimension sizes with a cached element count.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorShape {
    dims: Vec<usize>,
    elements: usize,
}

impl TensorShape {
    pub fn new<D: Into<Vec<usize>>>(dims: D) -> Result<Self, ConfigurationError> {
        let dims = dims.into();
        if dims.is_empty() {
            return Err(ConfigurationError::InvalidShape {
                dims,
                reason: "shape must have at least one dimension".into(),
            });
        }
        if dims.contains(&0) {
            return Err(ConfigurationError::InvalidShape {
                dims,
                reason: "dimensions must be non-zero".into(),
            });
        }
        let elements = dims
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim));
        match elements {
            Some(elements) => Ok(Self { dims, elements }),
            None => Err(ConfigurationError::InvalidShape {
                dims,
                reason: "element count overflows usize".into(),
            }),
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn elements(&self) -> usize {
        self.elements
    }

    /// Dense row-major strides in elements.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.dims.len()];
        for axis in (0..self.dims.len().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * self.dims[axis + 1];
        }
        strides
    }
}

/// Shape, element type and layout of a dense tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorDescriptor {
    shape: TensorShape,
    data_type: DataType,
    layout: DataLayout,
    strides: Vec<usize>,
}

impl TensorDescriptor {
    pub fn new(shape: TensorShape, data_type: DataType, layout: DataLayout) -> Self {
        let strides = shape.strides();
        Self {
            shape,
            data_type,
            layout,
            strides,
        }
    }

    pub fn from_dims<D: Into<Vec<usize>>>(
        dims: D,
        data_type: DataType,
        layout: DataLayout,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self::new(TensorShape::new(dims)?, data_type, layout))
    }

    /// 4-D activation descriptor from logical sizes.
    pub fn activation(
        batches: usize,
        channels: usize,
        height: usize,
        width: usize,
        data_type: DataType,
        layout: DataLayout,
    ) -> Result<Self, ConfigurationError> {
        Self::from_dims(layout.dims(batches, channels, height, width), data_type, layout)
    }

    /// 4-D weight descriptor: `[O, I, H, W]` for NCHW, `[O, H, W, I]` for NHWC.
    pub fn weights(
        out_channels: usize,
        in_channels: usize,
        kernel_h: usize,
        kernel_w: usize,
        data_type: DataType,
        layout: DataLayout,
    ) -> Result<Self, ConfigurationError> {
        Self::from_dims(
            layout.dims(out_channels, in_channels, kernel_h, kernel_w),
            data_type,
            layout,
        )
    }

    /// 1-D bias descriptor.
    pub fn bias(channels: usize, data_type: DataType) -> Result<Self, ConfigurationError> {
        Self::from_dims([channels], data_type, DataLayout::Nchw)
    }

    pub fn shape(&self) -> &TensorShape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn layout(&self) -> DataLayout {
        self.layout
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn elements(&self) -> usize {
        self.shape.elements()
    }

    pub fn byte_size(&self) -> usize {
        self.elements() * self.data_type.element_size()
    }

    fn axis(&self, logical: usize) -> usize {
        self.dims()
            .get(self.layout.axes()[logical])
            .copied()
            .unwrap_or(1)
    }

    /// Batch count, or output channels for a weight descriptor.
    pub fn batches(&self) -> usize {
        self.axis(0)
    }

    /// Channel count, or input channels for a weight descriptor.
    pub fn channels(&self) -> usize {
        self.axis(1)
    }

    pub fn height(&self) -> usize {
        self.axis(2)
    }

    pub fn width(&self) -> usize {
        self.axis(3)
    }

    /// Same logical sizes re-expressed in another layout.
    pub fn with_layout(&self, layout: DataLayout) -> Self {
        if self.shape.rank() != 4 || layout == self.layout {
            return Self::new(self.shape.clone(), self.data_type, layout);
        }
        let dims = layout.dims(self.batches(), self.channels(), self.height(), self.width());
        let shape = TensorShape {
            elements: self.shape.elements,
            dims: dims.to_vec(),
        };
        Self::new(shape, self.data_type, layout)
    }
}

/// Dense host tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    descriptor: TensorDescriptor,
    data: Vec<f32>,
}

impl Tensor {
    /// Wrap `data`, rounding it to the descriptor's precision.
    pub fn new(descriptor: TensorDescriptor, mut data: Vec<f32>) -> Result<Self, ConfigurationError> {
        if data.len() != descriptor.elements() {
            return Err(ConfigurationError::ShapeMismatch {
                tensor: "tensor data",
                expected: vec![descriptor.elements()],
                actual: vec![data.len()],
            });
        }
        descriptor.data_type().round_slice(&mut data);
        Ok(Self { descriptor, data })
    }

    pub fn zeros(descriptor: TensorDescriptor) -> Self {
        let data = vec![0.0; descriptor.elements()];
        Self { descriptor, data }
    }

    /// Fill in storage order from `f(flat_index)`.
    pub fn from_fn(descriptor: TensorDescriptor, mut f: impl FnMut(usize) -> f32) -> Self {
        let data_type = descriptor.data_type();
        let data = (0..descriptor.elements())
            .map(|index| data_type.round(f(index)))
            .collect();
        Self { descriptor, data }
    }

    pub fn descriptor(&self) -> &TensorDescriptor {
        &self.descriptor
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_rejects_zero_and_empty_dims() {
        assert!(TensorShape::new(Vec::<usize>::new()).is_err());
        assert!(matches!(
            TensorShape::new([1, 0, 3]),
            Err(ConfigurationError::InvalidShape { .. })
        ));
        assert!(TensorShape::new([usize::MAX, 2]).is_err());
        let shape = TensorShape::new([2, 3, 4]).unwrap();
        assert_eq!(shape.elements(), 24);
        assert_eq!(shape.strides(), vec![12, 4, 1]);
    }

    #[test]
    fn logical_axes_follow_layout() {
        let nchw = TensorDescriptor::activation(2, 3, 5, 7, DataType::F32, DataLayout::Nchw).unwrap();
        assert_eq!(nchw.dims(), &[2, 3, 5, 7]);
        let nhwc = nchw.with_layout(DataLayout::Nhwc);
        assert_eq!(nhwc.dims(), &[2, 5, 7, 3]);
        assert_eq!(
            (nhwc.batches(), nhwc.channels(), nhwc.height(), nhwc.width()),
            (2, 3, 5, 7)
        );
        assert_eq!(nhwc.strides(), &[105, 21, 3, 1]);
    }

    #[test]
    fn half_tensors_are_rounded_on_construction() {
        let desc = TensorDescriptor::from_dims([2], DataType::F16, DataLayout::Nchw).unwrap();
        let tensor = Tensor::new(desc, vec![1.0 / 3.0, 2048.5]).unwrap();
        assert_eq!(tensor.data()[0], f16::from_f32(1.0 / 3.0).to_f32());
        assert_eq!(tensor.data()[1], 2048.0);
    }

    #[test]
    fn tensor_length_is_checked() {
        let desc = TensorDescriptor::from_dims([4], DataType::F32, DataLayout::Nchw).unwrap();
        assert!(Tensor::new(desc, vec![0.0; 3]).is_err());
    }
}
