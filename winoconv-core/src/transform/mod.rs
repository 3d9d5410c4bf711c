//! Per-tile Winograd transforms.
//!
//! Every [`WinogradVariant`] maps to one [`WinogradTransform`] implementation, chosen once
//! when the operator is configured. Tiles are row-major; coefficient `(a, b)` of an
//! `alpha_h x alpha_w` Winograd-domain tile sits at index `a * alpha_w + b`.

mod cook_toom;
mod f2x2_3x3;
mod separable;

use std::fmt;
use std::sync::Arc;

pub use cook_toom::{CookToom1d, Matrix};
pub use f2x2_3x3::F2x2K3x3;
pub use separable::SeparableTransform;

use crate::selector::WinogradVariant;

/// Largest Winograd-domain tile (`alpha_h * alpha_w`) any variant produces.
pub const MAX_TILE_AREA: usize = 64;

pub trait WinogradTransform: Send + Sync + fmt::Debug {
    fn variant(&self) -> WinogradVariant;

    /// `Bᵀ d B`: an input patch of the variant's input-tile size to `num_coeffs` values.
    fn input(&self, tile: &[f32], out: &mut [f32]);

    /// `G g Gᵀ`: a `kernel_h x kernel_w` filter slice to `num_coeffs` values.
    fn weights(&self, kernel: &[f32], out: &mut [f32]);

    /// `Aᵀ M A`: `num_coeffs` values back to an output-tile patch.
    fn output(&self, coeffs: &[f32], out: &mut [f32]);
}

/// Build the transform implementing `variant`.
pub fn transform_for(variant: WinogradVariant) -> Arc<dyn WinogradTransform> {
    match variant {
        WinogradVariant::F2x2K3x3 => Arc::new(F2x2K3x3),
        other => Arc::new(SeparableTransform::new(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run one tile through the three transforms and compare with direct correlation.
    fn check_single_tile(transform: &dyn WinogradTransform) {
        let variant = transform.variant();
        let (tile, kernel) = (variant.output_tile(), variant.kernel());
        let in_h = tile.height + kernel.height - 1;
        let in_w = tile.width + kernel.width - 1;

        let d: Vec<f32> = (0..in_h * in_w).map(|i| ((i as f32) * 0.73).sin()).collect();
        let g: Vec<f32> = (0..kernel.area())
            .map(|i| ((i as f32) * 1.3 + 0.2).cos() * 0.5)
            .collect();

        let mut v = vec![0.0; in_h * in_w];
        let mut u = vec![0.0; in_h * in_w];
        transform.input(&d, &mut v);
        transform.weights(&g, &mut u);
        let m: Vec<f32> = v.iter().zip(&u).map(|(a, b)| a * b).collect();
        let mut y = vec![0.0; tile.area()];
        transform.output(&m, &mut y);

        for oy in 0..tile.height {
            for ox in 0..tile.width {
                let mut direct = 0.0f32;
                for ky in 0..kernel.height {
                    for kx in 0..kernel.width {
                        direct += d[(oy + ky) * in_w + ox + kx] * g[ky * kernel.width + kx];
                    }
                }
                let got = y[oy * tile.width + ox];
                assert!(
                    (got - direct).abs() < 1e-4,
                    "{variant} at ({oy}, {ox}): {got} vs {direct}"
                );
            }
        }
    }

    #[test]
    fn every_variant_reproduces_direct_correlation() {
        for variant in WinogradVariant::ALL {
            let transform = transform_for(variant);
            assert_eq!(transform.variant(), variant);
            check_single_tile(transform.as_ref());
        }
    }

    #[test]
    fn generated_f2x2_matches_unrolled() {
        check_single_tile(&SeparableTransform::new(WinogradVariant::F2x2K3x3));
        check_single_tile(&F2x2K3x3);
    }
}
