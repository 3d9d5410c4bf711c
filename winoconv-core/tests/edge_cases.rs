mod common;

use winoconv_core::{
    ConfigurationError, DataLayout, DataType, PadStrideInfo, Size2D, Tensor, TensorDescriptor,
    WinogradConfigSelector, WinogradConvInfo, WinogradConvOperator, WinogradVariant,
    compute_output_dim, conv2d_direct,
};

fn ones_case(
    size: Size2D,
    kernel: Size2D,
    pad_stride: PadStrideInfo,
    layout: DataLayout,
) -> (WinogradConvInfo, Tensor, Tensor) {
    let input = TensorDescriptor::activation(1, 1, size.height, size.width, DataType::F32, layout)
        .unwrap();
    let weights =
        TensorDescriptor::weights(1, 1, kernel.height, kernel.width, DataType::F32, layout)
            .unwrap();
    let info = WinogradConvInfo::new(input.clone(), weights.clone(), None, pad_stride).unwrap();
    (
        info,
        Tensor::from_fn(input, |_| 1.0),
        Tensor::from_fn(weights, |_| 1.0),
    )
}

#[test]
fn same_padding_counts_in_bounds_taps() -> anyhow::Result<()> {
    for layout in [DataLayout::Nchw, DataLayout::Nhwc] {
        let (info, input, weights) = ones_case(
            Size2D::new(8, 8),
            Size2D::new(3, 3),
            PadStrideInfo::same(3, 3),
            layout,
        );
        let mut op = WinogradConvOperator::default();
        op.configure(&info)?;
        assert_eq!(op.tile_config().variant(), WinogradVariant::F4x4K3x3);
        let out = op.run_with_weights(&input, &weights, None);
        assert_eq!(out.descriptor().height(), 8);
        assert_eq!(out.descriptor().width(), 8);

        for y in 0..8 {
            for x in 0..8 {
                let edges = usize::from(y == 0 || y == 7) + usize::from(x == 0 || x == 7);
                let expected = match edges {
                    2 => 4.0,
                    1 => 6.0,
                    _ => 9.0,
                };
                let value = out.data()[y * 8 + x];
                assert!(
                    (value - expected).abs() < 1e-4,
                    "{layout} ({y}, {x}) = {value}, expected {expected}"
                );
            }
        }
    }
    Ok(())
}

#[test]
fn partial_tile_is_clipped_to_the_output() -> anyhow::Result<()> {
    // 5x5 input, 3x3 kernel, VALID: a single 4x4 tile covering a 3x3 output.
    let input_desc =
        TensorDescriptor::activation(1, 2, 5, 5, DataType::F32, DataLayout::Nhwc).unwrap();
    let weights_desc =
        TensorDescriptor::weights(3, 2, 3, 3, DataType::F32, DataLayout::Nhwc).unwrap();
    let info = WinogradConvInfo::new(
        input_desc.clone(),
        weights_desc.clone(),
        None,
        PadStrideInfo::valid(),
    )?;
    assert_eq!(info.output.dims(), &[1, 3, 3, 3]);

    let input = Tensor::from_fn(input_desc, |i| common::sample(i, 7));
    let weights = Tensor::from_fn(weights_desc, |i| common::sample(i, 8));
    let mut op = WinogradConvOperator::default();
    op.configure(&info)?;
    assert_eq!(op.tile_config().output_tile(), Size2D::new(4, 4));
    let actual = op.run_with_weights(&input, &weights, None);
    let expected = conv2d_direct(&input, &weights, None, &PadStrideInfo::valid(), None)?;
    common::assert_close(&actual, &expected, 1e-4, 1e-4, "clipped tile");
    Ok(())
}

#[test]
fn output_shape_matches_the_direct_formula() -> anyhow::Result<()> {
    let kernels = [
        Size2D::new(3, 3),
        Size2D::new(5, 5),
        Size2D::new(1, 3),
        Size2D::new(3, 1),
        Size2D::new(1, 7),
        Size2D::new(5, 1),
    ];
    for kernel in kernels {
        for (width, height) in [(7, 7), (16, 9), (10, 23)] {
            for same in [false, true] {
                let pad = if same {
                    PadStrideInfo::same(kernel.height, kernel.width)
                } else {
                    PadStrideInfo::valid()
                };
                let (info, _, _) =
                    ones_case(Size2D::new(width, height), kernel, pad, DataLayout::Nchw);
                let mut op = WinogradConvOperator::default();
                op.configure(&info.with_fast_math(true))?;

                let out = op.output_descriptor();
                let expected_h = height + 2 * pad.pad_top - kernel.height + 1;
                let expected_w = width + 2 * pad.pad_left - kernel.width + 1;
                assert_eq!(out.height(), expected_h);
                assert_eq!(out.width(), expected_w);
                assert_eq!(
                    compute_output_dim(height, pad.pad_top, pad.pad_bottom, kernel.height, 1)?,
                    expected_h
                );
                if same {
                    assert_eq!((out.height(), out.width()), (height, width));
                }
            }
        }
    }
    Ok(())
}

#[test]
fn fast_math_gates_lossy_configurations() {
    let input = Size2D::new(16, 16);
    let f16 = WinogradConfigSelector::select(Size2D::new(3, 3), input, DataType::F16, false);
    assert!(matches!(f16, Err(ConfigurationError::FastMathRequired { .. })));
    let five = WinogradConfigSelector::select(Size2D::new(5, 5), input, DataType::F32, false);
    assert!(matches!(five, Err(ConfigurationError::FastMathRequired { .. })));
    assert!(WinogradConfigSelector::select(Size2D::new(5, 5), input, DataType::F32, true).is_ok());
    assert!(WinogradConfigSelector::select(Size2D::new(3, 3), input, DataType::F32, false).is_ok());

    let (info, _, _) = ones_case(
        Size2D::new(9, 9),
        Size2D::new(5, 5),
        PadStrideInfo::valid(),
        DataLayout::Nhwc,
    );
    let mut op = WinogradConvOperator::default();
    assert!(matches!(
        op.configure(&info),
        Err(ConfigurationError::FastMathRequired { .. })
    ));
    assert!(op.configure(&info.with_fast_math(true)).is_ok());
}

#[test]
fn unsupported_kernels_and_padding_are_rejected() {
    let input = Size2D::new(16, 16);
    for kernel in [Size2D::new(2, 2), Size2D::new(7, 7), Size2D::new(3, 5)] {
        assert!(matches!(
            WinogradConfigSelector::select(kernel, input, DataType::F32, true),
            Err(ConfigurationError::UnsupportedKernel { .. })
        ));
    }
    assert!(matches!(
        WinogradConfigSelector::select(Size2D::new(1, 3), input, DataType::F16, true),
        Err(ConfigurationError::UnsupportedKernel { .. })
    ));

    let rejected = [
        (Size2D::new(3, 3), PadStrideInfo::symmetric(2, 2)),
        (Size2D::new(1, 3), PadStrideInfo::symmetric(1, 1)),
        (Size2D::new(3, 3), PadStrideInfo::symmetric(1, 0)),
        (
            Size2D::new(3, 3),
            PadStrideInfo {
                pad_right: 0,
                ..PadStrideInfo::same(3, 3)
            },
        ),
    ];
    for (kernel, pad) in rejected {
        let (info, _, _) = ones_case(Size2D::new(8, 8), kernel, pad, DataLayout::Nchw);
        assert!(
            matches!(
                WinogradConvOperator::validate(&info),
                Err(ConfigurationError::UnsupportedPadding(_))
            ),
            "{kernel} {pad:?}"
        );
    }
}

#[test]
fn selection_is_deterministic_and_size_aware() {
    let pick = |input| {
        WinogradConfigSelector::select(Size2D::new(3, 3), input, DataType::F32, false)
            .map(|config| config.variant())
    };
    assert_eq!(pick(Size2D::new(4, 16)), Ok(WinogradVariant::F2x2K3x3));
    assert_eq!(pick(Size2D::new(16, 4)), Ok(WinogradVariant::F2x2K3x3));
    assert_eq!(pick(Size2D::new(5, 5)), Ok(WinogradVariant::F4x4K3x3));
    for _ in 0..3 {
        assert_eq!(pick(Size2D::new(32, 32)), pick(Size2D::new(32, 32)));
    }
}
