use super::MatrixLayout;
use crate::error::ConfigurationError;
use crate::gemm::{GemmBackend, MatrixView, MatrixViewMut};
use crate::scheduler::{Scheduler, lock_chunk, partition_mut};
use crate::tensor::DataType;

/// One independent GEMM per Winograd coefficient: `[tiles x in] · [in x out] -> [tiles x out]`.
///
/// Products are purely linear; bias and activation belong to the output transform.
#[derive(Debug, Clone, Copy)]
pub struct BatchedMatMulStage {
    data_type: DataType,
    lhs: MatrixLayout,
    rhs: MatrixLayout,
    out: MatrixLayout,
}

impl BatchedMatMulStage {
    pub fn configure(
        lhs: MatrixLayout,
        rhs: MatrixLayout,
        data_type: DataType,
    ) -> Result<Self, ConfigurationError> {
        if lhs.num_coeffs != rhs.num_coeffs || lhs.cols != rhs.rows {
            return Err(ConfigurationError::ShapeMismatch {
                tensor: "winograd weights",
                expected: vec![lhs.cols, lhs.num_coeffs],
                actual: vec![rhs.rows, rhs.num_coeffs],
            });
        }
        let out = MatrixLayout::coeff_major(lhs.num_coeffs, lhs.rows, rhs.cols, rhs.cols);
        Ok(Self {
            data_type,
            lhs,
            rhs,
            out,
        })
    }

    pub fn output_matrix(&self) -> MatrixLayout {
        self.out
    }

    /// Multiply every coefficient pair, one scheduler slice per coefficient.
    pub fn run(
        &self,
        lhs: &[f32],
        rhs: &[f32],
        out: &mut [f32],
        gemm: &dyn GemmBackend,
        scheduler: &dyn Scheduler,
    ) {
        let (a, b, d) = (self.lhs, self.rhs, self.out);
        let bounds: Vec<usize> = (0..=d.num_coeffs).map(|c| c * d.matrix_stride).collect();
        let chunks = partition_mut(&mut out[..d.elements], &bounds);
        let data_type = self.data_type;

        scheduler.schedule(d.num_coeffs, &|coeff, _| {
            let mut chunk = lock_chunk(&chunks[coeff]);
            gemm.multiply(
                MatrixView::new(&lhs[coeff * a.matrix_stride..], a.rows, a.cols, a.row_stride),
                MatrixView::new(&rhs[coeff * b.matrix_stride..], b.rows, b.cols, b.row_stride),
                MatrixViewMut::new(&mut chunk[..], d.rows, d.cols, d.row_stride),
            );
            data_type.round_slice(&mut chunk[..]);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemm::{MatrixMultiplyGemm, NaiveGemm};
    use crate::scheduler::{RayonScheduler, SerialScheduler};

    #[test]
    fn each_coefficient_is_an_independent_product() {
        let lhs = MatrixLayout::tile_major(4, 3, 2);
        let rhs = MatrixLayout::coeff_major(4, 2, 16, 16);
        let stage = BatchedMatMulStage::configure(lhs, rhs, DataType::F32).unwrap();
        let out = stage.output_matrix();
        assert_eq!((out.rows, out.cols, out.num_coeffs), (3, 16, 4));

        let mut a = vec![0.0; lhs.elements];
        for c in 0..4 {
            for r in 0..3 {
                for k in 0..2 {
                    a[lhs.index(c, r, k)] = (c + 1) as f32 * (r + k) as f32;
                }
            }
        }
        let mut b = vec![0.0; rhs.elements];
        for c in 0..4 {
            for k in 0..2 {
                b[rhs.index(c, k, 0)] = 1.0;
                b[rhs.index(c, k, 1)] = k as f32;
            }
        }

        let mut expected = vec![0.0; out.elements];
        stage.run(&a, &b, &mut expected, &NaiveGemm, &SerialScheduler);
        let mut got = vec![f32::NAN; out.elements];
        stage.run(&a, &b, &mut got, &MatrixMultiplyGemm, &RayonScheduler::global());

        for c in 0..4 {
            for r in 0..3 {
                let scale = (c + 1) as f32;
                // Column 0 sums the row; column 1 picks k = 1.
                assert_eq!(expected[out.index(c, r, 0)], scale * (2 * r + 1) as f32);
                assert_eq!(expected[out.index(c, r, 1)], scale * (r + 1) as f32);
                for col in 0..16 {
                    let i = out.index(c, r, col);
                    assert!((got[i] - expected[i]).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn inner_dimension_mismatch_is_rejected() {
        let lhs = MatrixLayout::tile_major(16, 3, 2);
        let rhs = MatrixLayout::coeff_major(16, 3, 16, 16);
        assert!(BatchedMatMulStage::configure(lhs, rhs, DataType::F32).is_err());
    }
}
