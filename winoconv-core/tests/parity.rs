mod common;

use std::sync::Arc;

use common::{Problem, assert_close, build};
use winoconv_core::{
    ActivationKind, DataLayout, DataType, MatrixMultiplyGemm, NaiveGemm, PadStrideInfo,
    RayonScheduler, SerialScheduler, Size2D, WinogradConfigSelector, WinogradConvOperator,
    WinogradVariant, conv2d_direct,
};

const F32_TOLERANCE: f32 = 1e-3;
const F16_TOLERANCE: f32 = 0.25;

/// Input extent that makes the selector pick `variant` for its kernel.
fn input_for(variant: WinogradVariant) -> Size2D {
    let kernel = variant.kernel();
    match variant {
        WinogradVariant::F2x2K3x3 => Size2D::new(4, 7),
        _ => Size2D::new(kernel.width + 8, kernel.height + 6),
    }
}

fn run_case(
    variant: WinogradVariant,
    layout: DataLayout,
    pad_stride: PadStrideInfo,
    activation: Option<ActivationKind>,
) -> anyhow::Result<()> {
    let kernel = variant.kernel();
    let input = input_for(variant);
    let config = WinogradConfigSelector::select(kernel, input, DataType::F32, true)?;
    assert_eq!(config.variant(), variant, "selector for {input} input");

    let problem = Problem {
        batches: 2,
        in_channels: 3,
        out_channels: 5,
        height: input.height,
        width: input.width,
        kernel_h: kernel.height,
        kernel_w: kernel.width,
    };
    let mut case = build(problem, DataType::F32, layout, pad_stride, true, activation);
    case.info.allow_fast_math = config.requires_fast_math();

    let mut op = WinogradConvOperator::default();
    op.configure(&case.info)?;
    assert_eq!(op.tile_config().variant(), variant);
    let actual = op.run_with_weights(&case.input, &case.weights, case.bias.as_ref());
    let expected = conv2d_direct(
        &case.input,
        &case.weights,
        case.bias.as_ref(),
        &pad_stride,
        activation,
    )?;

    let context = format!("{variant} {layout} {pad_stride:?}");
    assert_close(&actual, &expected, F32_TOLERANCE, F32_TOLERANCE, &context);
    Ok(())
}

#[test]
fn every_variant_matches_direct_convolution_valid() -> anyhow::Result<()> {
    for variant in WinogradVariant::ALL {
        for layout in [DataLayout::Nchw, DataLayout::Nhwc] {
            run_case(variant, layout, PadStrideInfo::valid(), None)?;
        }
    }
    Ok(())
}

#[test]
fn every_variant_matches_direct_convolution_same() -> anyhow::Result<()> {
    for variant in WinogradVariant::ALL {
        let kernel = variant.kernel();
        let same = PadStrideInfo::same(kernel.height, kernel.width);
        for layout in [DataLayout::Nchw, DataLayout::Nhwc] {
            run_case(variant, layout, same, Some(ActivationKind::Relu))?;
        }
    }
    Ok(())
}

#[test]
fn non_fusable_activations_run_after_the_output_transform() -> anyhow::Result<()> {
    let activations = [
        ActivationKind::Sigmoid,
        ActivationKind::Tanh,
        ActivationKind::LeakyRelu { alpha: 0.1 },
        ActivationKind::LuBoundedRelu {
            upper: 0.5,
            lower: -0.25,
        },
        ActivationKind::BoundedRelu { upper: 0.75 },
    ];
    for activation in activations {
        for layout in [DataLayout::Nchw, DataLayout::Nhwc] {
            run_case(
                WinogradVariant::F4x4K3x3,
                layout,
                PadStrideInfo::same(3, 3),
                Some(activation),
            )?;
        }
    }
    Ok(())
}

#[test]
fn half_precision_stays_within_tolerance() -> anyhow::Result<()> {
    for layout in [DataLayout::Nchw, DataLayout::Nhwc] {
        for pad_stride in [PadStrideInfo::valid(), PadStrideInfo::same(3, 3)] {
            let problem = Problem {
                batches: 1,
                in_channels: 3,
                out_channels: 4,
                height: 10,
                width: 9,
                kernel_h: 3,
                kernel_w: 3,
            };
            let mut case = build(problem, DataType::F16, layout, pad_stride, true, None);
            case.info.allow_fast_math = true;

            let mut op = WinogradConvOperator::default();
            op.configure(&case.info)?;
            assert_eq!(op.tile_config().variant(), WinogradVariant::F4x4K3x3);
            assert_eq!(op.tile_config().n_block(), 24);
            let actual = op.run_with_weights(&case.input, &case.weights, case.bias.as_ref());
            let expected =
                conv2d_direct(&case.input, &case.weights, case.bias.as_ref(), &pad_stride, None)?;

            let context = format!("f16 {layout} {pad_stride:?}");
            assert_close(&actual, &expected, F16_TOLERANCE, 0.0, &context);
        }
    }
    Ok(())
}

#[test]
fn schedulers_and_gemm_backends_agree() -> anyhow::Result<()> {
    let problem = Problem {
        batches: 3,
        in_channels: 7,
        out_channels: 19,
        height: 13,
        width: 11,
        kernel_h: 3,
        kernel_w: 3,
    };
    let case = build(
        problem,
        DataType::F32,
        DataLayout::Nchw,
        PadStrideInfo::same(3, 3),
        true,
        None,
    );

    let mut serial = WinogradConvOperator::new(Arc::new(SerialScheduler), Arc::new(NaiveGemm));
    serial.configure(&case.info)?;
    let expected = serial.run_with_weights(&case.input, &case.weights, case.bias.as_ref());

    for threads in [2, 3, 8] {
        let scheduler = RayonScheduler::with_threads(threads)?;
        let mut op = WinogradConvOperator::new(Arc::new(scheduler), Arc::new(MatrixMultiplyGemm));
        op.configure(&case.info)?;
        assert_eq!(op.aux_plan().threads(), threads);
        let actual = op.run_with_weights(&case.input, &case.weights, case.bias.as_ref());
        assert_close(&actual, &expected, 2e-3, 2e-3, &format!("{threads} threads"));
    }
    Ok(())
}
