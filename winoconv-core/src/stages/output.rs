use std::ops::Range;
use std::sync::Arc;

use super::{ConvGeometry, MatrixLayout, TileGrid};
use crate::activation::ActivationKind;
use crate::error::ConfigurationError;
use crate::scheduler::split_range;
use crate::selector::{Size2D, WinogradTileConfig};
use crate::tensor::DataType;
use crate::transform::WinogradTransform;

/// Gathers GEMM results back into spatial NHWC output (`Aᵀ M A`), adding bias and applying a
/// fusable activation on the way out. Partial tiles at the right and bottom edges are
/// clipped.
#[derive(Debug, Clone)]
pub struct OutputTransformStage {
    transform: Arc<dyn WinogradTransform>,
    data_type: DataType,
    output: Size2D,
    channels: usize,
    grid: TileGrid,
    matrix: MatrixLayout,
    fused: Option<ActivationKind>,
}

impl OutputTransformStage {
    pub fn configure(
        geometry: &ConvGeometry,
        config: &WinogradTileConfig,
        transform: Arc<dyn WinogradTransform>,
        matrix: MatrixLayout,
        activation: Option<ActivationKind>,
    ) -> Result<Self, ConfigurationError> {
        geometry.check_kernel(config)?;
        let grid = TileGrid::new(geometry.batches, geometry.output, config.output_tile());
        if matrix.num_coeffs != config.num_coeffs()
            || matrix.rows != grid.tiles()
            || matrix.cols < geometry.out_channels
        {
            return Err(ConfigurationError::ShapeMismatch {
                tensor: "winograd output matrix",
                expected: vec![geometry.out_channels, grid.tiles(), 1, config.num_coeffs()],
                actual: matrix.shape().to_vec(),
            });
        }
        Ok(Self {
            transform,
            data_type: config.data_type(),
            output: geometry.output,
            channels: geometry.out_channels,
            grid,
            matrix,
            fused: activation.filter(|kind| kind.is_fusable()),
        })
    }

    /// NHWC dims of the spatial output.
    pub fn spatial_dims(&self) -> [usize; 4] {
        [
            self.grid.batches,
            self.output.height,
            self.output.width,
            self.channels,
        ]
    }

    pub fn spatial_elements(&self) -> usize {
        self.spatial_dims().iter().product()
    }

    /// Scratch each thread needs: one coefficient vector and one output patch.
    pub fn workspace_per_thread(&self) -> usize {
        self.matrix.num_coeffs + self.grid.tile.area()
    }

    pub fn fused_activation(&self) -> Option<ActivationKind> {
        self.fused
    }

    pub fn band_range(&self, thread_id: usize, thread_count: usize) -> Range<usize> {
        split_range(self.grid.bands(), thread_id, thread_count)
    }

    /// First output element written by `band`; `band == bands()` yields the end.
    fn band_offset(&self, band: usize) -> usize {
        let (batch, tile_y) = self.grid.band_position(band);
        let row = batch * self.output.height
            + (tile_y * self.grid.tile.height).min(self.output.height);
        row * self.output.width * self.channels
    }

    /// Offsets into the spatial output at which each thread's rows begin, plus the end.
    pub fn chunk_bounds(&self, thread_count: usize) -> Vec<usize> {
        let mut bounds: Vec<usize> = (0..thread_count)
            .map(|t| self.band_offset(self.band_range(t, thread_count).start))
            .collect();
        bounds.push(self.band_offset(self.grid.bands()));
        bounds
    }

    /// Transform the bands owned by `thread_id` into `output`, this thread's chunk of the NHWC
    /// result as delimited by [`chunk_bounds`](Self::chunk_bounds).
    pub fn run(
        &self,
        transformed: &[f32],
        bias: Option<&[f32]>,
        output: &mut [f32],
        workspace: &mut [f32],
        thread_id: usize,
        thread_count: usize,
    ) {
        let bands = self.band_range(thread_id, thread_count);
        let base = self.band_offset(bands.start);
        let tile = self.grid.tile;
        let (coeffs, patch) =
            workspace[..self.workspace_per_thread()].split_at_mut(self.matrix.num_coeffs);
        let (height, width, channels) = (self.output.height, self.output.width, self.channels);

        for band in bands {
            let (batch, tile_y) = self.grid.band_position(band);
            let rows = tile.height.min(height - tile_y * tile.height);
            for tile_x in 0..self.grid.tiles_w {
                let row = band * self.grid.tiles_w + tile_x;
                let cols = tile.width.min(width - tile_x * tile.width);
                for channel in 0..channels {
                    for (coeff, value) in coeffs.iter_mut().enumerate() {
                        *value = transformed[self.matrix.index(coeff, row, channel)];
                    }
                    self.transform.output(coeffs, patch);
                    let shift = bias.map_or(0.0, |b| b[channel]);

                    for py in 0..rows {
                        let y = tile_y * tile.height + py;
                        let line = ((batch * height + y) * width + tile_x * tile.width) * channels;
                        for px in 0..cols {
                            let mut value = patch[py * tile.width + px] + shift;
                            if let Some(kind) = self.fused {
                                value = kind.apply(value);
                            }
                            output[line + px * channels + channel - base] =
                                self.data_type.round(value);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::padding::PadStrideInfo;
    use crate::selector::WinogradConfigSelector;
    use crate::transform::transform_for;

    fn build(
        output: Size2D,
        activation: Option<ActivationKind>,
    ) -> (OutputTransformStage, MatrixLayout) {
        let kernel = Size2D::new(3, 3);
        let input = Size2D::new(output.width + 2, output.height + 2);
        let config =
            WinogradConfigSelector::select(kernel, input, DataType::F32, false).unwrap();
        let geometry = ConvGeometry {
            batches: 2,
            in_channels: 1,
            out_channels: 2,
            input,
            kernel,
            output,
            padding: PadStrideInfo::valid(),
        };
        let grid = TileGrid::new(2, output, config.output_tile());
        let matrix = MatrixLayout::coeff_major(config.num_coeffs(), grid.tiles(), 16, 16);
        let stage = OutputTransformStage::configure(
            &geometry,
            &config,
            transform_for(config.variant()),
            matrix,
            activation,
        )
        .unwrap();
        (stage, matrix)
    }

    #[test]
    fn bias_and_fused_relu_reach_every_output() {
        // 3x3 outputs from 4x4 tiles: one clipped tile per batch.
        let (stage, matrix) = build(Size2D::new(3, 3), Some(ActivationKind::Relu));
        assert_eq!(stage.spatial_dims(), [2, 3, 3, 2]);
        let transformed = vec![0.0; matrix.elements];
        let mut output = vec![f32::NAN; stage.spatial_elements()];
        let mut workspace = vec![0.0; stage.workspace_per_thread()];
        let bias = [1.5f32, -2.0];
        stage.run(&transformed, Some(&bias[..]), &mut output, &mut workspace, 0, 1);

        for (index, &value) in output.iter().enumerate() {
            let expected = if index % 2 == 0 { 1.5 } else { 0.0 };
            assert_eq!(value, expected, "element {index}");
        }
    }

    #[test]
    fn non_fusable_activation_is_left_for_later() {
        let (stage, _) = build(Size2D::new(3, 3), Some(ActivationKind::Sigmoid));
        assert_eq!(stage.fused_activation(), None);
        let (stage, _) = build(Size2D::new(3, 3), Some(ActivationKind::BoundedRelu { upper: 6.0 }));
        assert!(stage.fused_activation().is_some());
    }

    #[test]
    fn thread_chunks_partition_the_output() {
        let (stage, matrix) = build(Size2D::new(9, 7), None);
        let transformed: Vec<f32> = (0..matrix.elements).map(|i| (i as f32 * 0.01).cos()).collect();
        let bias = [0.25f32, -0.5];

        let mut serial = vec![0.0; stage.spatial_elements()];
        let mut workspace = vec![0.0; stage.workspace_per_thread()];
        stage.run(&transformed, Some(&bias[..]), &mut serial, &mut workspace, 0, 1);

        for threads in [2, 3, 5] {
            let bounds = stage.chunk_bounds(threads);
            assert_eq!(bounds[0], 0);
            assert_eq!(*bounds.last().unwrap(), stage.spatial_elements());
            let mut split = vec![0.0; stage.spatial_elements()];
            for t in 0..threads {
                stage.run(
                    &transformed,
                    Some(&bias[..]),
                    &mut split[bounds[t]..bounds[t + 1]],
                    &mut workspace,
                    t,
                    threads,
                );
            }
            assert_eq!(serial, split, "{threads} threads");
        }
    }
}
