use std::ops::Range;
use std::sync::Arc;

use super::{ConvGeometry, MatrixLayout, TileGrid};
use crate::error::ConfigurationError;
use crate::scheduler::split_range;
use crate::selector::{Size2D, WinogradTileConfig};
use crate::tensor::DataType;
use crate::transform::WinogradTransform;

/// Scatters overlapping input patches into the Winograd domain (`Bᵀ d B`).
///
/// The output is the GEMM left-hand side, stored tile-major: row `(batch, tile)` holds every
/// coefficient's channel vector, so each band of tiles owns a contiguous block of rows.
#[derive(Debug, Clone)]
pub struct InputTransformStage {
    transform: Arc<dyn WinogradTransform>,
    data_type: DataType,
    channels: usize,
    input: Size2D,
    pad_top: usize,
    pad_left: usize,
    input_tile: Size2D,
    grid: TileGrid,
    matrix: MatrixLayout,
}

impl InputTransformStage {
    pub fn configure(
        geometry: &ConvGeometry,
        config: &WinogradTileConfig,
        transform: Arc<dyn WinogradTransform>,
    ) -> Result<Self, ConfigurationError> {
        geometry.check_kernel(config)?;
        let grid = TileGrid::new(geometry.batches, geometry.output, config.output_tile());
        let matrix =
            MatrixLayout::tile_major(config.num_coeffs(), grid.tiles(), geometry.in_channels);
        Ok(Self {
            transform,
            data_type: config.data_type(),
            channels: geometry.in_channels,
            input: geometry.input,
            pad_top: geometry.padding.pad_top,
            pad_left: geometry.padding.pad_left,
            input_tile: config.input_tile(),
            grid,
            matrix,
        })
    }

    pub fn matrix(&self) -> MatrixLayout {
        self.matrix
    }

    pub fn grid(&self) -> TileGrid {
        self.grid
    }

    /// Scratch each thread needs: one input patch and its coefficients.
    pub fn workspace_per_thread(&self) -> usize {
        2 * self.input_tile.area()
    }

    pub fn band_range(&self, thread_id: usize, thread_count: usize) -> Range<usize> {
        split_range(self.grid.bands(), thread_id, thread_count)
    }

    /// Offsets into the transformed buffer at which each thread's rows begin, plus the end.
    pub fn chunk_bounds(&self, thread_count: usize) -> Vec<usize> {
        let row_elements = self.grid.tiles_w * self.matrix.row_stride;
        let mut bounds: Vec<usize> = (0..thread_count)
            .map(|t| self.band_range(t, thread_count).start * row_elements)
            .collect();
        bounds.push(self.grid.bands() * row_elements);
        bounds
    }

    /// Transform the bands owned by `thread_id`.
    ///
    /// `input` is the whole NHWC tensor; `output` is only this thread's chunk as delimited by
    /// [`chunk_bounds`](Self::chunk_bounds); `workspace` holds at least
    /// [`workspace_per_thread`](Self::workspace_per_thread) values.
    pub fn run(
        &self,
        input: &[f32],
        output: &mut [f32],
        workspace: &mut [f32],
        thread_id: usize,
        thread_count: usize,
    ) {
        let bands = self.band_range(thread_id, thread_count);
        let first_row = bands.start * self.grid.tiles_w;
        let area = self.input_tile.area();
        let (patch, coeffs) = workspace[..2 * area].split_at_mut(area);

        let (height, width, channels) = (self.input.height, self.input.width, self.channels);
        let (stride, padded) = (self.matrix.row_stride, self.matrix.matrix_stride);
        let tile = self.grid.tile;

        for band in bands {
            let (batch, tile_y) = self.grid.band_position(band);
            let plane = batch * height * width * channels;
            for tile_x in 0..self.grid.tiles_w {
                let row = band * self.grid.tiles_w + tile_x - first_row;
                let dst = &mut output[row * stride..(row + 1) * stride];
                let y0 = (tile_y * tile.height) as isize - self.pad_top as isize;
                let x0 = (tile_x * tile.width) as isize - self.pad_left as isize;

                for channel in 0..channels {
                    for py in 0..self.input_tile.height {
                        let y = y0 + py as isize;
                        let row_in = (0..height as isize).contains(&y);
                        for px in 0..self.input_tile.width {
                            let x = x0 + px as isize;
                            patch[py * self.input_tile.width + px] =
                                if row_in && (0..width as isize).contains(&x) {
                                    input[plane + ((y as usize) * width + x as usize) * channels
                                        + channel]
                                } else {
                                    0.0
                                };
                        }
                    }
                    self.transform.input(patch, coeffs);
                    for (coeff, &value) in coeffs.iter().enumerate() {
                        dst[coeff * padded + channel] = self.data_type.round(value);
                    }
                }
                if padded > channels {
                    for coeff in 0..self.matrix.num_coeffs {
                        dst[coeff * padded + channels..(coeff + 1) * padded].fill(0.0);
                    }
                }
            }
        }
    }
}
