//! The four compute stages of a Winograd convolution and the geometry they share.
//!
//! Activations enter and leave these stages channel-innermost (NHWC) and weights arrive as
//! HWIO; layout conversion happens before and after, in the operator.

mod input;
mod matmul;
mod output;
mod weights;

pub use input::InputTransformStage;
pub use matmul::BatchedMatMulStage;
pub use output::OutputTransformStage;
pub use weights::WeightTransformStage;

use crate::error::ConfigurationError;
use crate::memory::{STORAGE_ALIGNMENT, STORAGE_ELEMENT_BYTES};
use crate::padding::PadStrideInfo;
use crate::selector::{Size2D, WinogradTileConfig};

/// Sizes of one convolution, independent of memory layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub batches: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub input: Size2D,
    pub kernel: Size2D,
    pub output: Size2D,
    pub padding: PadStrideInfo,
}

impl ConvGeometry {
    fn check_kernel(&self, config: &WinogradTileConfig) -> Result<(), ConfigurationError> {
        if self.kernel != config.kernel() {
            return Err(ConfigurationError::UnsupportedKernel {
                kernel_h: self.kernel.height,
                kernel_w: self.kernel.width,
                data_type: config.data_type(),
            });
        }
        Ok(())
    }
}

/// How output tiles cover the output plane.
///
/// A *band* is one batch × one row of tiles; bands are the unit of parallel work for the
/// transform stages and map to contiguous runs of both transformed rows and NHWC output rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub batches: usize,
    pub tiles_h: usize,
    pub tiles_w: usize,
    pub tile: Size2D,
}

impl TileGrid {
    pub fn new(batches: usize, output: Size2D, tile: Size2D) -> Self {
        Self {
            batches,
            tiles_h: output.height.div_ceil(tile.height),
            tiles_w: output.width.div_ceil(tile.width),
            tile,
        }
    }

    pub fn bands(&self) -> usize {
        self.batches * self.tiles_h
    }

    /// Rows of every GEMM: one per tile across all batches.
    pub fn tiles(&self) -> usize {
        self.bands() * self.tiles_w
    }

    /// `(batch, tile_row)` of a band.
    pub fn band_position(&self, band: usize) -> (usize, usize) {
        (band / self.tiles_h, band % self.tiles_h)
    }
}

/// One logical `rows x cols` matrix per Winograd coefficient inside a flat buffer.
///
/// Element `(coeff, row, col)` lives at `coeff * matrix_stride + row * row_stride + col`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixLayout {
    pub num_coeffs: usize,
    pub rows: usize,
    pub cols: usize,
    pub row_stride: usize,
    pub matrix_stride: usize,
    /// Elements the backing buffer must hold.
    pub elements: usize,
}

impl MatrixLayout {
    /// Coefficients interleaved inside each row: a row holds every coefficient's columns,
    /// each group padded to the storage alignment.
    pub fn tile_major(num_coeffs: usize, rows: usize, cols: usize) -> Self {
        let padded = round_up(cols, ALIGNMENT_ELEMENTS);
        let row_stride = num_coeffs * padded;
        Self {
            num_coeffs,
            rows,
            cols,
            row_stride,
            matrix_stride: padded,
            elements: rows * row_stride,
        }
    }

    /// One contiguous matrix per coefficient, each starting on the storage alignment.
    pub fn coeff_major(num_coeffs: usize, rows: usize, cols: usize, row_stride: usize) -> Self {
        let matrix_stride = round_up(rows * row_stride, ALIGNMENT_ELEMENTS);
        Self {
            num_coeffs,
            rows,
            cols,
            row_stride,
            matrix_stride,
            elements: num_coeffs * matrix_stride,
        }
    }

    #[inline]
    pub fn index(&self, coeff: usize, row: usize, col: usize) -> usize {
        coeff * self.matrix_stride + row * self.row_stride + col
    }

    /// 4-D shape `[cols, rows, 1, num_coeffs]`, innermost first.
    pub fn shape(&self) -> [usize; 4] {
        [self.cols, self.rows, 1, self.num_coeffs]
    }
}

pub(crate) fn round_up(value: usize, multiple: usize) -> usize {
    value.next_multiple_of(multiple.max(1))
}

/// Elements per aligned block. F16 values sit in f32 lanes too.
const ALIGNMENT_ELEMENTS: usize = STORAGE_ALIGNMENT / STORAGE_ELEMENT_BYTES;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_counts_partial_tiles() {
        let grid = TileGrid::new(2, Size2D::new(7, 5), Size2D::new(4, 4));
        assert_eq!((grid.tiles_h, grid.tiles_w), (2, 2));
        assert_eq!(grid.bands(), 4);
        assert_eq!(grid.tiles(), 8);
        assert_eq!(grid.band_position(3), (1, 1));
    }

    #[test]
    fn matrix_layouts_keep_coefficients_aligned() {
        let a = MatrixLayout::tile_major(16, 10, 3);
        assert_eq!(a.matrix_stride, 16);
        assert_eq!(a.row_stride, 256);
        assert_eq!(a.index(2, 1, 1), 2 * 16 + 256 + 1);
        assert_eq!(a.elements, 2560);

        let b = MatrixLayout::coeff_major(36, 5, 48, 48);
        assert_eq!(b.matrix_stride % 16, 0);
        assert!(b.matrix_stride >= 5 * 48);
        assert_eq!(b.shape(), [48, 5, 1, 36]);
    }
}
