use std::sync::Arc;

use super::{ConvGeometry, MatrixLayout, round_up};
use crate::error::ConfigurationError;
use crate::selector::{Size2D, WinogradTileConfig};
use crate::tensor::DataType;
use crate::transform::{MAX_TILE_AREA, WinogradTransform};

/// Transforms HWIO filters into one `[in_channels x round_up(out_channels, n_block)]` matrix
/// per coefficient (`G g Gᵀ`). Runs once per prepare.
#[derive(Debug, Clone)]
pub struct WeightTransformStage {
    transform: Arc<dyn WinogradTransform>,
    data_type: DataType,
    kernel: Size2D,
    in_channels: usize,
    out_channels: usize,
    matrix: MatrixLayout,
}

impl WeightTransformStage {
    pub fn configure(
        geometry: &ConvGeometry,
        config: &WinogradTileConfig,
        transform: Arc<dyn WinogradTransform>,
    ) -> Result<Self, ConfigurationError> {
        geometry.check_kernel(config)?;
        let row_stride = round_up(geometry.out_channels, config.n_block());
        let matrix = MatrixLayout::coeff_major(
            config.num_coeffs(),
            geometry.in_channels,
            row_stride,
            row_stride,
        );
        Ok(Self {
            transform,
            data_type: config.data_type(),
            kernel: geometry.kernel,
            in_channels: geometry.in_channels,
            out_channels: geometry.out_channels,
            matrix,
        })
    }

    pub fn matrix(&self) -> MatrixLayout {
        self.matrix
    }

    /// Elements of the HWIO input this stage consumes.
    pub fn weight_elements(&self) -> usize {
        self.kernel.area() * self.in_channels * self.out_channels
    }

    pub fn run(&self, hwio: &[f32], output: &mut [f32]) {
        let (kernel_w, inputs, outputs) = (self.kernel.width, self.in_channels, self.out_channels);
        let mut slice = [0.0f32; MAX_TILE_AREA];
        let mut coeffs = [0.0f32; MAX_TILE_AREA];
        let (slice, coeffs) = (
            &mut slice[..self.kernel.area()],
            &mut coeffs[..self.matrix.num_coeffs],
        );

        output[..self.matrix.elements].fill(0.0);
        for input in 0..inputs {
            for out in 0..outputs {
                for (tap, value) in slice.iter_mut().enumerate() {
                    let (ky, kx) = (tap / kernel_w, tap % kernel_w);
                    *value = hwio[((ky * kernel_w + kx) * inputs + input) * outputs + out];
                }
                self.transform.weights(slice, coeffs);
                for (coeff, &value) in coeffs.iter().enumerate() {
                    output[self.matrix.index(coeff, input, out)] = self.data_type.round(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::padding::PadStrideInfo;
    use crate::selector::{N_BLOCK_F32, WinogradConfigSelector};
    use crate::transform::transform_for;

    #[test]
    fn output_channels_are_padded_to_the_row_block() {
        let config = WinogradConfigSelector::select(
            Size2D::new(1, 3),
            Size2D::new(8, 8),
            DataType::F32,
            false,
        )
        .unwrap();
        let geometry = ConvGeometry {
            batches: 1,
            in_channels: 2,
            out_channels: 3,
            input: Size2D::new(8, 8),
            kernel: Size2D::new(1, 3),
            output: Size2D::new(8, 6),
            padding: PadStrideInfo::valid(),
        };
        let stage =
            WeightTransformStage::configure(&geometry, &config, transform_for(config.variant()))
                .unwrap();
        let matrix = stage.matrix();
        assert_eq!(matrix.row_stride, N_BLOCK_F32);
        assert_eq!(matrix.num_coeffs, 8);

        // HWIO with a single non-zero tap: ky = 2 (last tap), input 1, output 2.
        let mut hwio = vec![0.0; stage.weight_elements()];
        hwio[(2 * 2 + 1) * 3 + 2] = 1.0;
        let mut output = vec![f32::NAN; matrix.elements];
        stage.run(&hwio, &mut output);

        let mut expected = [0.0f32; 8];
        transform_for(config.variant()).weights(&[0.0, 0.0, 1.0], &mut expected);
        for coeff in 0..8 {
            assert_eq!(output[matrix.index(coeff, 1, 2)], expected[coeff]);
            assert_eq!(output[matrix.index(coeff, 0, 2)], 0.0);
            for padded in 3..N_BLOCK_F32 {
                assert_eq!(output[matrix.index(coeff, 1, padded)], 0.0);
            }
        }
    }

    #[test]
    fn mismatched_kernel_is_rejected() {
        let config = WinogradConfigSelector::select(
            Size2D::new(3, 3),
            Size2D::new(8, 8),
            DataType::F32,
            false,
        )
        .unwrap();
        let geometry = ConvGeometry {
            batches: 1,
            in_channels: 1,
            out_channels: 1,
            input: Size2D::new(8, 8),
            kernel: Size2D::new(5, 5),
            output: Size2D::new(4, 4),
            padding: PadStrideInfo::valid(),
        };
        assert!(
            WeightTransformStage::configure(&geometry, &config, transform_for(config.variant()))
                .is_err()
        );
    }
}
