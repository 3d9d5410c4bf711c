//! One-dimensional Winograd matrices generated by Cook–Toom interpolation.
//!
//! For `F(m, r)` with `alpha = m + r - 1`, the finite interpolation points `p_0..p_{alpha-2}`
//! plus the point at infinity give
//!
//! * `Aᵀ[j][i] = p_i^j`, with the infinity column selecting `j == m - 1`;
//! * `G[i][k] = p_i^k / Π_{k'≠i}(p_i - p_k')`, with the infinity row selecting `k == r - 1`;
//! * `Bᵀ[i]` = coefficients of `Π_{k≠i}(x - p_k)`, with the infinity row holding the
//!   coefficients of `Π_k(x - p_k)`.
//!
//! Matrices are built in `f64` and stored as `f32`.

/// Interpolation points in the order they are consumed.
const POINTS: [f64; 9] = [0.0, 1.0, -1.0, 2.0, -2.0, 0.5, -0.5, 3.0, -3.0];

/// Dense row-major matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    fn from_f64(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), rows * cols);
        Self {
            rows,
            cols,
            data: data.into_iter().map(|v| v as f32).collect(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }
}

/// Transform matrices of a 1-D `F(m, r)` algorithm.
#[derive(Debug, Clone, PartialEq)]
pub struct CookToom1d {
    outputs: usize,
    taps: usize,
    /// `m x alpha`
    at: Matrix,
    /// `alpha x r`
    g: Matrix,
    /// `alpha x alpha`
    bt: Matrix,
}

impl CookToom1d {
    /// Build `F(outputs, taps)`. Panics if more interpolation points are needed than defined.
    pub fn new(outputs: usize, taps: usize) -> Self {
        assert!(outputs > 0 && taps > 0, "F(m, r) needs m, r > 0");
        let alpha = outputs + taps - 1;
        let finite = alpha - 1;
        assert!(finite <= POINTS.len(), "F({outputs}, {taps}) needs too many points");
        let points = &POINTS[..finite];

        let mut at = vec![0.0f64; outputs * alpha];
        for j in 0..outputs {
            for (i, &p) in points.iter().enumerate() {
                at[j * alpha + i] = p.powi(j as i32);
            }
            at[j * alpha + finite] = if j == outputs - 1 { 1.0 } else { 0.0 };
        }

        let mut g = vec![0.0f64; alpha * taps];
        for (i, &p) in points.iter().enumerate() {
            let scale: f64 = points
                .iter()
                .enumerate()
                .filter(|&(k, _)| k != i)
                .map(|(_, &q)| p - q)
                .product();
            for k in 0..taps {
                g[i * taps + k] = p.powi(k as i32) / scale;
            }
        }
        g[finite * taps + taps - 1] = 1.0;

        let mut bt = vec![0.0f64; alpha * alpha];
        for i in 0..finite {
            let roots = points
                .iter()
                .enumerate()
                .filter(|&(k, _)| k != i)
                .map(|(_, &q)| q);
            let coeffs = poly_from_roots(roots);
            bt[i * alpha..i * alpha + coeffs.len()].copy_from_slice(&coeffs);
        }
        let full = poly_from_roots(points.iter().copied());
        bt[finite * alpha..finite * alpha + full.len()].copy_from_slice(&full);

        Self {
            outputs,
            taps,
            at: Matrix::from_f64(outputs, alpha, at),
            g: Matrix::from_f64(alpha, taps, g),
            bt: Matrix::from_f64(alpha, alpha, bt),
        }
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }

    pub fn taps(&self) -> usize {
        self.taps
    }

    pub fn alpha(&self) -> usize {
        self.outputs + self.taps - 1
    }

    pub fn at(&self) -> &Matrix {
        &self.at
    }

    pub fn g(&self) -> &Matrix {
        &self.g
    }

    pub fn bt(&self) -> &Matrix {
        &self.bt
    }
}

/// Ascending coefficients of `Π (x - root)`.
fn poly_from_roots(roots: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut coeffs = vec![1.0];
    for root in roots {
        let mut next = vec![0.0; coeffs.len() + 1];
        for (n, &c) in coeffs.iter().enumerate() {
            next[n + 1] += c;
            next[n] -= root * c;
        }
        coeffs = next;
    }
    coeffs
}
