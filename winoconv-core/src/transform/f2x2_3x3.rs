//! Unrolled F(2x2, 3x3) with the classic Lavin–Gray matrices.
//!
//! ```text
//! Bᵀ = [ 1  0 -1  0 ]   G = [ 1    0    0   ]   Aᵀ = [ 1  1  1  0 ]
//!      [ 0  1  1  0 ]       [ 1/2  1/2  1/2 ]        [ 0  1 -1 -1 ]
//!      [ 0 -1  1  0 ]       [ 1/2 -1/2  1/2 ]
//!      [ 0  1  0 -1 ]       [ 0    0    1   ]
//! ```

use super::WinogradTransform;
use crate::selector::WinogradVariant;

#[derive(Debug, Clone, Copy, Default)]
pub struct F2x2K3x3;

impl WinogradTransform for F2x2K3x3 {
    fn variant(&self) -> WinogradVariant {
        WinogradVariant::F2x2K3x3
    }

    #[inline]
    fn input(&self, d: &[f32], v: &mut [f32]) {
        let mut tmp = [0.0f32; 16];
        for j in 0..4 {
            let (d0, d1, d2, d3) = (d[j], d[4 + j], d[8 + j], d[12 + j]);
            tmp[j] = d0 - d2;
            tmp[4 + j] = d1 + d2;
            tmp[8 + j] = d2 - d1;
            tmp[12 + j] = d1 - d3;
        }
        for i in 0..4 {
            let t = &tmp[i * 4..i * 4 + 4];
            v[i * 4] = t[0] - t[2];
            v[i * 4 + 1] = t[1] + t[2];
            v[i * 4 + 2] = t[2] - t[1];
            v[i * 4 + 3] = t[1] - t[3];
        }
    }

    #[inline]
    fn weights(&self, g: &[f32], u: &mut [f32]) {
        let mut tmp = [0.0f32; 12];
        for j in 0..3 {
            let (g0, g1, g2) = (g[j], g[3 + j], g[6 + j]);
            tmp[j] = g0;
            tmp[3 + j] = (g0 + g1 + g2) * 0.5;
            tmp[6 + j] = (g0 - g1 + g2) * 0.5;
            tmp[9 + j] = g2;
        }
        for i in 0..4 {
            let t = &tmp[i * 3..i * 3 + 3];
            u[i * 4] = t[0];
            u[i * 4 + 1] = (t[0] + t[1] + t[2]) * 0.5;
            u[i * 4 + 2] = (t[0] - t[1] + t[2]) * 0.5;
            u[i * 4 + 3] = t[2];
        }
    }

    #[inline]
    fn output(&self, m: &[f32], out: &mut [f32]) {
        let mut tmp = [0.0f32; 8];
        for j in 0..4 {
            let (m0, m1, m2, m3) = (m[j], m[4 + j], m[8 + j], m[12 + j]);
            tmp[j] = m0 + m1 + m2;
            tmp[4 + j] = m1 - m2 - m3;
        }
        for i in 0..2 {
            let t = &tmp[i * 4..i * 4 + 4];
            out[i * 2] = t[0] + t[1] + t[2];
            out[i * 2 + 1] = t[1] - t[2] - t[3];
        }
    }
}
