//! Direct convolution used as the numerical reference for the Winograd path.

use ndarray::{Array4, ArrayView4};

use crate::activation::ActivationKind;
use crate::error::ConfigurationError;
use crate::padding::{PadStrideInfo, compute_output_shape};
use crate::tensor::{DataLayout, Tensor, TensorDescriptor};

/// Naive 2-D cross-correlation with f64 accumulation.
///
/// Accepts either layout (weights follow the input layout: OIHW for NCHW, OHWI for NHWC) and
/// any stride, and returns the output in the input's layout and data type.
pub fn conv2d_direct(
    input: &Tensor,
    weights: &Tensor,
    bias: Option<&Tensor>,
    pad_stride: &PadStrideInfo,
    activation: Option<ActivationKind>,
) -> Result<Tensor, ConfigurationError> {
    let desc = input.descriptor();
    let shape = compute_output_shape(desc, weights.descriptor(), pad_stride)?;
    let out_desc = TensorDescriptor::new(shape, desc.data_type(), desc.layout());

    let src = logical_view(input)?;
    let filters = logical_view(weights)?;
    let (batches, channels, height, width) = src.dim();
    let (outputs, filter_channels, kernel_h, kernel_w) = filters.dim();
    if filter_channels != channels {
        return Err(ConfigurationError::ShapeMismatch {
            tensor: "weights",
            expected: vec![outputs, channels, kernel_h, kernel_w],
            actual: vec![outputs, filter_channels, kernel_h, kernel_w],
        });
    }
    let bias = bias.map(Tensor::data);
    if bias.is_some_and(|values| values.len() != outputs) {
        return Err(ConfigurationError::ShapeMismatch {
            tensor: "bias",
            expected: vec![outputs],
            actual: bias.map(|values| vec![values.len()]).unwrap_or_default(),
        });
    }

    let mut out = Array4::<f32>::zeros((batches, outputs, out_desc.height(), out_desc.width()));
    for ((batch, oc, y, x), value) in out.indexed_iter_mut() {
        let mut acc = bias.map_or(0.0, |values| f64::from(values[oc]));
        for ic in 0..channels {
            for ky in 0..kernel_h {
                let Some(iy) = source_index(y, ky, pad_stride.stride_y, pad_stride.pad_top, height)
                else {
                    continue;
                };
                for kx in 0..kernel_w {
                    let Some(ix) =
                        source_index(x, kx, pad_stride.stride_x, pad_stride.pad_left, width)
                    else {
                        continue;
                    };
                    acc += f64::from(src[[batch, ic, iy, ix]])
                        * f64::from(filters[[oc, ic, ky, kx]]);
                }
            }
        }
        let result = acc as f32;
        *value = activation.map_or(result, |kind| kind.apply(result));
    }

    let data: Vec<f32> = match out_desc.layout() {
        DataLayout::Nchw => out.iter().copied().collect(),
        DataLayout::Nhwc => out.view().permuted_axes([0, 2, 3, 1]).iter().copied().collect(),
    };
    Tensor::new(out_desc, data)
}

/// A 4-D tensor viewed with logical `[N, C, H, W]` axes.
fn logical_view(tensor: &Tensor) -> Result<ArrayView4<'_, f32>, ConfigurationError> {
    let desc = tensor.descriptor();
    let dims: [usize; 4] = desc.dims().try_into().map_err(|_| ConfigurationError::InvalidShape {
        dims: desc.dims().to_vec(),
        reason: "expected a 4-D tensor".to_string(),
    })?;
    let view = ArrayView4::from_shape(dims, tensor.data()).map_err(|err| {
        ConfigurationError::InvalidShape {
            dims: dims.to_vec(),
            reason: err.to_string(),
        }
    })?;
    Ok(match desc.layout() {
        DataLayout::Nchw => view,
        DataLayout::Nhwc => view.permuted_axes([0, 3, 1, 2]),
    })
}

fn source_index(out: usize, tap: usize, stride: usize, pad: usize, size: usize) -> Option<usize> {
    (out * stride + tap)
        .checked_sub(pad)
        .filter(|&index| index < size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::permute_tensor;
    use crate::tensor::DataType;

    #[test]
    fn box_filter_over_a_ramp() {
        // 1x1x3x3 input 0..9, 2x2 box filter, VALID.
        let input = Tensor::from_fn(
            TensorDescriptor::activation(1, 1, 3, 3, DataType::F32, DataLayout::Nchw).unwrap(),
            |i| i as f32,
        );
        let weights = Tensor::from_fn(
            TensorDescriptor::weights(1, 1, 2, 2, DataType::F32, DataLayout::Nchw).unwrap(),
            |_| 1.0,
        );
        let out = conv2d_direct(&input, &weights, None, &PadStrideInfo::valid(), None).unwrap();
        assert_eq!(out.descriptor().dims(), &[1, 1, 2, 2]);
        assert_eq!(out.data(), &[8.0, 12.0, 20.0, 24.0]);
    }

    #[test]
    fn padding_bias_and_activation() {
        let input = Tensor::from_fn(
            TensorDescriptor::activation(1, 1, 2, 2, DataType::F32, DataLayout::Nchw).unwrap(),
            |_| 1.0,
        );
        let weights = Tensor::from_fn(
            TensorDescriptor::weights(1, 1, 3, 3, DataType::F32, DataLayout::Nchw).unwrap(),
            |_| -1.0,
        );
        let bias = Tensor::new(TensorDescriptor::bias(1, DataType::F32).unwrap(), vec![2.5])
            .unwrap();
        let out = conv2d_direct(
            &input,
            &weights,
            Some(&bias),
            &PadStrideInfo::same(3, 3),
            Some(ActivationKind::Relu),
        )
        .unwrap();
        // Every output sees all four inputs: 2.5 - 4 clamps to zero.
        assert_eq!(out.data(), &[0.0; 4]);

        let out = conv2d_direct(&input, &weights, Some(&bias), &PadStrideInfo::same(3, 3), None)
            .unwrap();
        assert_eq!(out.data(), &[-1.5; 4]);
    }

    #[test]
    fn layouts_agree() {
        let input = Tensor::from_fn(
            TensorDescriptor::activation(2, 3, 5, 4, DataType::F32, DataLayout::Nchw).unwrap(),
            |i| ((i * 7) % 11) as f32 - 5.0,
        );
        let weights = Tensor::from_fn(
            TensorDescriptor::weights(2, 3, 3, 3, DataType::F32, DataLayout::Nchw).unwrap(),
            |i| ((i * 5) % 7) as f32 * 0.25,
        );
        let info = PadStrideInfo::same(3, 3);
        let nchw = conv2d_direct(&input, &weights, None, &info, None).unwrap();

        let input_nhwc = permute_tensor(&input, DataLayout::Nhwc).unwrap();
        // OIHW -> OHWI uses the same axis move as NCHW -> NHWC.
        let weights_nhwc = permute_tensor(&weights, DataLayout::Nhwc).unwrap();
        let nhwc = conv2d_direct(&input_nhwc, &weights_nhwc, None, &info, None).unwrap();

        assert_eq!(permute_tensor(&nhwc, DataLayout::Nchw).unwrap(), nchw);
    }
}
