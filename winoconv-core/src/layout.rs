//! Dimension permutation between NCHW and NHWC.
//!
//! The Winograd stages work on channel-innermost data (NHWC activations, HWIO weights).
//! Anything else is copied through a [`LayoutAdapter`] first.

use ndarray::{ArrayViewD, ArrayViewMutD, IxDyn};

use crate::error::ConfigurationError;
use crate::tensor::{DataLayout, Tensor, TensorDescriptor};

/// Activation permutation NCHW → NHWC.
pub const NCHW_TO_NHWC: [usize; 4] = [0, 2, 3, 1];
/// Activation permutation NHWC → NCHW.
pub const NHWC_TO_NCHW: [usize; 4] = [0, 3, 1, 2];
/// Weight permutation OIHW → HWIO.
pub const OIHW_TO_HWIO: [usize; 4] = [2, 3, 1, 0];
/// Weight permutation OHWI → HWIO.
pub const OHWI_TO_HWIO: [usize; 4] = [1, 2, 3, 0];

/// A configured element permutation: output axis `i` is source axis `perm[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutAdapter {
    src_dims: Vec<usize>,
    perm: Vec<usize>,
    dst_dims: Vec<usize>,
}

impl LayoutAdapter {
    pub fn new(src_dims: &[usize], perm: &[usize]) -> Result<Self, ConfigurationError> {
        let rank = src_dims.len();
        let invalid = || ConfigurationError::InvalidPermutation {
            perm: perm.to_vec(),
            rank,
        };
        if !(3..=4).contains(&perm.len()) || perm.len() != rank {
            return Err(invalid());
        }
        let mut seen = [false; 4];
        for &axis in perm {
            if axis >= rank || seen[axis] {
                return Err(invalid());
            }
            seen[axis] = true;
        }
        let dst_dims = perm.iter().map(|&axis| src_dims[axis]).collect();
        Ok(Self {
            src_dims: src_dims.to_vec(),
            perm: perm.to_vec(),
            dst_dims,
        })
    }

    /// Adapter converting activations with `src_dims` from one layout to another.
    pub fn for_layouts(
        src_dims: &[usize],
        from: DataLayout,
        to: DataLayout,
    ) -> Result<Self, ConfigurationError> {
        let perm: &[usize] = match (from, to) {
            (DataLayout::Nchw, DataLayout::Nhwc) => &NCHW_TO_NHWC,
            (DataLayout::Nhwc, DataLayout::Nchw) => &NHWC_TO_NCHW,
            _ => &[0, 1, 2, 3],
        };
        Self::new(src_dims, perm)
    }

    /// Adapter producing HWIO weights from the layout's native weight order.
    pub fn weights_to_hwio(
        src_dims: &[usize],
        layout: DataLayout,
    ) -> Result<Self, ConfigurationError> {
        match layout {
            DataLayout::Nchw => Self::new(src_dims, &OIHW_TO_HWIO),
            DataLayout::Nhwc => Self::new(src_dims, &OHWI_TO_HWIO),
        }
    }

    pub fn src_dims(&self) -> &[usize] {
        &self.src_dims
    }

    pub fn dst_dims(&self) -> &[usize] {
        &self.dst_dims
    }

    pub fn perm(&self) -> &[usize] {
        &self.perm
    }

    pub fn elements(&self) -> usize {
        self.src_dims.iter().product()
    }

    pub fn is_identity(&self) -> bool {
        self.perm.iter().enumerate().all(|(i, &axis)| i == axis)
    }

    /// Copy `src` into `dst` in permuted order. `dst` must hold at least
    /// [`elements`](Self::elements) values; extra trailing space is left untouched.
    pub fn run(&self, src: &[f32], dst: &mut [f32]) {
        let elements = self.elements();
        assert!(src.len() >= elements, "layout source too small");
        assert!(dst.len() >= elements, "layout destination too small");
        if self.is_identity() {
            dst[..elements].copy_from_slice(&src[..elements]);
            return;
        }

        let source = ArrayViewD::from_shape(IxDyn(&self.src_dims), &src[..elements])
            .expect("source length matches its dims")
            .permuted_axes(IxDyn(&self.perm));
        let mut target = ArrayViewMutD::from_shape(IxDyn(&self.dst_dims), &mut dst[..elements])
            .expect("destination length matches its dims");
        target.assign(&source);
    }
}

/// Return a copy of a 4-D activation tensor in `layout`.
pub fn permute_tensor(tensor: &Tensor, layout: DataLayout) -> Result<Tensor, ConfigurationError> {
    let desc = tensor.descriptor();
    if desc.layout() == layout {
        return Ok(tensor.clone());
    }
    let adapter = LayoutAdapter::for_layouts(desc.dims(), desc.layout(), layout)?;
    let target: TensorDescriptor = desc.with_layout(layout);
    let mut out = Tensor::zeros(target);
    adapter.run(tensor.data(), out.data_mut());
    Ok(out)
}
