//! Dense single-precision matrix multiply behind a small trait.

use std::fmt;

/// Read-only row-major matrix with an arbitrary row stride.
#[derive(Clone, Copy)]
pub struct MatrixView<'a> {
    data: &'a [f32],
    rows: usize,
    cols: usize,
    row_stride: usize,
}

impl<'a> MatrixView<'a> {
    /// Panics if `data` cannot hold the described matrix.
    pub fn new(data: &'a [f32], rows: usize, cols: usize, row_stride: usize) -> Self {
        assert!(row_stride >= cols, "row stride {row_stride} < cols {cols}");
        assert!(
            required_len(rows, cols, row_stride) <= data.len(),
            "{rows}x{cols} matrix (stride {row_stride}) does not fit {} elements",
            data.len()
        );
        Self {
            data,
            rows,
            cols,
            row_stride,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn data(&self) -> &'a [f32] {
        self.data
    }
}

/// Writable counterpart of [`MatrixView`].
pub struct MatrixViewMut<'a> {
    data: &'a mut [f32],
    rows: usize,
    cols: usize,
    row_stride: usize,
}

impl<'a> MatrixViewMut<'a> {
    pub fn new(data: &'a mut [f32], rows: usize, cols: usize, row_stride: usize) -> Self {
        assert!(row_stride >= cols, "row stride {row_stride} < cols {cols}");
        assert!(
            required_len(rows, cols, row_stride) <= data.len(),
            "{rows}x{cols} matrix (stride {row_stride}) does not fit {} elements",
            data.len()
        );
        Self {
            data,
            rows,
            cols,
            row_stride,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut *self.data
    }
}

fn required_len(rows: usize, cols: usize, row_stride: usize) -> usize {
    if rows == 0 || cols == 0 {
        0
    } else {
        (rows - 1) * row_stride + cols
    }
}

/// `C = A · B`, overwriting `C`. Implementations must not spawn threads of their own; the
/// caller already parallelizes across independent products.
pub trait GemmBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn multiply(&self, a: MatrixView<'_>, b: MatrixView<'_>, c: MatrixViewMut<'_>);
}

/// Packed blocked kernels from the `matrixmultiply` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatrixMultiplyGemm;

impl GemmBackend for MatrixMultiplyGemm {
    fn name(&self) -> &'static str {
        "matrixmultiply"
    }

    fn multiply(&self, a: MatrixView<'_>, b: MatrixView<'_>, mut c: MatrixViewMut<'_>) {
        let (m, k, n) = (a.rows(), a.cols(), b.cols());
        assert_eq!(b.rows(), k, "inner dimensions differ");
        assert_eq!(c.rows(), m, "output rows differ");
        assert_eq!(c.cols(), n, "output cols differ");
        if m == 0 || n == 0 {
            return;
        }
        if k == 0 {
            let stride = c.row_stride();
            for row in c.data_mut().chunks_mut(stride).take(m) {
                row[..n].fill(0.0);
            }
            return;
        }
        let (rsa, rsb, rsc) = (a.row_stride(), b.row_stride(), c.row_stride());
        // SAFETY: the view constructors checked that every addressed element lies inside the
        // backing slices, and `c` is uniquely borrowed.
        unsafe {
            matrixmultiply::sgemm(
                m,
                k,
                n,
                1.0,
                a.data().as_ptr(),
                rsa as isize,
                1,
                b.data().as_ptr(),
                rsb as isize,
                1,
                0.0,
                c.data_mut().as_mut_ptr(),
                rsc as isize,
                1,
            );
        }
    }
}

/// Triple loop, kept for cross-checking the optimized backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveGemm;

impl GemmBackend for NaiveGemm {
    fn name(&self) -> &'static str {
        "naive"
    }

    fn multiply(&self, a: MatrixView<'_>, b: MatrixView<'_>, mut c: MatrixViewMut<'_>) {
        let (m, k, n) = (a.rows(), a.cols(), b.cols());
        assert_eq!(b.rows(), k, "inner dimensions differ");
        let (rsa, rsb, rsc) = (a.row_stride(), b.row_stride(), c.row_stride());
        let (a, b) = (a.data(), b.data());
        let out = c.data_mut();
        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0f32;
                for p in 0..k {
                    acc += a[i * rsa + p] * b[p * rsb + j];
                }
                out[i * rsc + j] = acc;
            }
        }
    }
}
