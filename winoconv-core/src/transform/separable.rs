use super::cook_toom::{CookToom1d, Matrix};
use super::{MAX_TILE_AREA, WinogradTransform};
use crate::selector::WinogradVariant;

/// 2-D transform built as the outer product of a vertical and a horizontal 1-D algorithm.
#[derive(Debug, Clone)]
pub struct SeparableTransform {
    variant: WinogradVariant,
    vertical: CookToom1d,
    horizontal: CookToom1d,
}

impl SeparableTransform {
    pub fn new(variant: WinogradVariant) -> Self {
        let (tile, kernel) = (variant.output_tile(), variant.kernel());
        let vertical = CookToom1d::new(tile.height, kernel.height);
        let horizontal = CookToom1d::new(tile.width, kernel.width);
        assert!(
            vertical.alpha() * horizontal.alpha() <= MAX_TILE_AREA,
            "{variant} exceeds the tile scratch size"
        );
        Self {
            variant,
            vertical,
            horizontal,
        }
    }
}

/// `out[a][b] = Σ_y Σ_x left[a][y] · src[y][x] · right[b][x]`, i.e. `L · S · Rᵀ`.
///
/// `src` is `left.cols() x right.cols()` row-major; `out` is `left.rows() x right.rows()`.
fn sandwich(left: &Matrix, src: &[f32], right: &Matrix, out: &mut [f32]) {
    let (src_rows, src_cols) = (left.cols(), right.cols());
    let out_cols = right.rows();
    let mut tmp = [0.0f32; MAX_TILE_AREA];
    for y in 0..src_rows {
        let src_row = &src[y * src_cols..(y + 1) * src_cols];
        for b in 0..out_cols {
            tmp[y * out_cols + b] = right
                .row(b)
                .iter()
                .zip(src_row)
                .map(|(r, s)| r * s)
                .sum();
        }
    }
    for a in 0..left.rows() {
        let left_row = left.row(a);
        for b in 0..out_cols {
            let mut acc = 0.0f32;
            for (y, &l) in left_row.iter().enumerate() {
                acc += l * tmp[y * out_cols + b];
            }
            out[a * out_cols + b] = acc;
        }
    }
}

impl WinogradTransform for SeparableTransform {
    fn variant(&self) -> WinogradVariant {
        self.variant
    }

    fn input(&self, tile: &[f32], out: &mut [f32]) {
        sandwich(self.vertical.bt(), tile, self.horizontal.bt(), out);
    }

    fn weights(&self, kernel: &[f32], out: &mut [f32]) {
        sandwich(self.vertical.g(), kernel, self.horizontal.g(), out);
    }

    fn output(&self, coeffs: &[f32], out: &mut [f32]) {
        sandwich(self.vertical.at(), coeffs, self.horizontal.at(), out);
    }
}
