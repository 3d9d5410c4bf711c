#![allow(dead_code)]

use winoconv_core::{
    ActivationKind, DataLayout, DataType, PadStrideInfo, Tensor, TensorDescriptor,
    WinogradConvInfo,
};

/// Deterministic value in `[-1, 1)` for element `index`.
pub fn sample(index: usize, seed: u32) -> f32 {
    let mixed = (index as u32)
        .wrapping_mul(2_654_435_761)
        .wrapping_add(seed.wrapping_mul(40_503))
        .rotate_left(13)
        .wrapping_mul(2_246_822_519);
    (mixed >> 8) as f32 / (1u32 << 23) as f32 - 1.0
}

/// Sizes of one synthetic convolution.
#[derive(Debug, Clone, Copy)]
pub struct Problem {
    pub batches: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub height: usize,
    pub width: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
}

pub struct Tensors {
    pub info: WinogradConvInfo,
    pub input: Tensor,
    pub weights: Tensor,
    pub bias: Option<Tensor>,
}

pub fn build(
    problem: Problem,
    data_type: DataType,
    layout: DataLayout,
    pad_stride: PadStrideInfo,
    with_bias: bool,
    activation: Option<ActivationKind>,
) -> Tensors {
    let input_desc = TensorDescriptor::activation(
        problem.batches,
        problem.in_channels,
        problem.height,
        problem.width,
        data_type,
        layout,
    )
    .unwrap();
    let weights_desc = TensorDescriptor::weights(
        problem.out_channels,
        problem.in_channels,
        problem.kernel_h,
        problem.kernel_w,
        data_type,
        layout,
    )
    .unwrap();
    let bias_desc =
        with_bias.then(|| TensorDescriptor::bias(problem.out_channels, data_type).unwrap());

    let input = Tensor::from_fn(input_desc.clone(), |i| sample(i, 1));
    let weights = Tensor::from_fn(weights_desc.clone(), |i| 0.5 * sample(i, 2));
    let bias = bias_desc
        .clone()
        .map(|desc| Tensor::from_fn(desc, |i| 0.25 * sample(i, 3)));

    let mut info = WinogradConvInfo::new(input_desc, weights_desc, bias_desc, pad_stride).unwrap();
    info.activation = activation;
    Tensors {
        info,
        input,
        weights,
        bias,
    }
}

/// Largest absolute difference between two equally shaped tensors.
pub fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
    assert_eq!(a.descriptor(), b.descriptor());
    a.data()
        .iter()
        .zip(b.data())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}

/// Assert `actual` matches `expected` within `abs + rel * |expected|` per element.
pub fn assert_close(actual: &Tensor, expected: &Tensor, abs: f32, rel: f32, context: &str) {
    assert_eq!(actual.descriptor(), expected.descriptor(), "{context}");
    for (index, (&got, &want)) in actual.data().iter().zip(expected.data()).enumerate() {
        let tolerance = abs + rel * want.abs();
        assert!(
            (got - want).abs() <= tolerance,
            "{context}: element {index} is {got}, expected {want} (tolerance {tolerance})"
        );
    }
}
