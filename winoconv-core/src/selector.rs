//! Choice of Winograd output tile for a kernel, data type and input size.

use std::fmt;

use crate::error::ConfigurationError;
use crate::tensor::DataType;

/// GEMM row block used to round weight and output row strides.
pub const N_BLOCK_F32: usize = 16;
pub const N_BLOCK_F16: usize = 24;

/// Width and height of a 2-D extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size2D {
    pub width: usize,
    pub height: usize,
}

impl Size2D {
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub const fn area(self) -> usize {
        self.width * self.height
    }
}

impl fmt::Display for Size2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

/// The closed set of Winograd kernels this engine implements, named F(tile, kernel) with
/// extents written height x width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WinogradVariant {
    F2x2K3x3,
    F4x4K3x3,
    F2x2K5x5,
    F6x1K3x1,
    F1x6K1x3,
    F4x1K5x1,
    F1x4K1x5,
    F2x1K7x1,
    F1x2K1x7,
}

impl WinogradVariant {
    pub const ALL: [WinogradVariant; 9] = [
        WinogradVariant::F2x2K3x3,
        WinogradVariant::F4x4K3x3,
        WinogradVariant::F2x2K5x5,
        WinogradVariant::F6x1K3x1,
        WinogradVariant::F1x6K1x3,
        WinogradVariant::F4x1K5x1,
        WinogradVariant::F1x4K1x5,
        WinogradVariant::F2x1K7x1,
        WinogradVariant::F1x2K1x7,
    ];

    pub const fn output_tile(self) -> Size2D {
        match self {
            WinogradVariant::F2x2K3x3 | WinogradVariant::F2x2K5x5 => Size2D::new(2, 2),
            WinogradVariant::F4x4K3x3 => Size2D::new(4, 4),
            WinogradVariant::F6x1K3x1 => Size2D::new(1, 6),
            WinogradVariant::F1x6K1x3 => Size2D::new(6, 1),
            WinogradVariant::F4x1K5x1 => Size2D::new(1, 4),
            WinogradVariant::F1x4K1x5 => Size2D::new(4, 1),
            WinogradVariant::F2x1K7x1 => Size2D::new(1, 2),
            WinogradVariant::F1x2K1x7 => Size2D::new(2, 1),
        }
    }

    pub const fn kernel(self) -> Size2D {
        match self {
            WinogradVariant::F2x2K3x3 | WinogradVariant::F4x4K3x3 => Size2D::new(3, 3),
            WinogradVariant::F2x2K5x5 => Size2D::new(5, 5),
            WinogradVariant::F6x1K3x1 => Size2D::new(1, 3),
            WinogradVariant::F1x6K1x3 => Size2D::new(3, 1),
            WinogradVariant::F4x1K5x1 => Size2D::new(1, 5),
            WinogradVariant::F1x4K1x5 => Size2D::new(5, 1),
            WinogradVariant::F2x1K7x1 => Size2D::new(1, 7),
            WinogradVariant::F1x2K1x7 => Size2D::new(7, 1),
        }
    }

    fn from_tile_and_kernel(tile: Size2D, kernel: Size2D) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.output_tile() == tile && v.kernel() == kernel)
    }
}

impl fmt::Display for WinogradVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F({}, {})", self.output_tile(), self.kernel())
    }
}

/// Output tile / kernel pairings (height x width) that only meet strict tolerances with
/// fast math allowed.
const FAST_MATH_CONFIGS: [(DataType, [usize; 4]); 3] = [
    (DataType::F16, [4, 4, 3, 3]),
    (DataType::F32, [2, 2, 5, 5]),
    (DataType::F32, [4, 4, 5, 5]),
];

/// A legal pairing of output tile, kernel and precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WinogradTileConfig {
    variant: WinogradVariant,
    data_type: DataType,
}

impl WinogradTileConfig {
    pub fn variant(&self) -> WinogradVariant {
        self.variant
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn output_tile(&self) -> Size2D {
        self.variant.output_tile()
    }

    pub fn kernel(&self) -> Size2D {
        self.variant.kernel()
    }

    /// Input patch read per tile: output tile plus kernel minus one on each axis.
    pub fn input_tile(&self) -> Size2D {
        let (tile, kernel) = (self.output_tile(), self.kernel());
        Size2D::new(
            tile.width + kernel.width - 1,
            tile.height + kernel.height - 1,
        )
    }

    /// Number of independent GEMMs, one per Winograd-domain coefficient.
    pub fn num_coeffs(&self) -> usize {
        self.input_tile().area()
    }

    pub fn n_block(&self) -> usize {
        match self.data_type {
            DataType::F32 => N_BLOCK_F32,
            DataType::F16 => N_BLOCK_F16,
        }
    }

    pub fn requires_fast_math(&self) -> bool {
        let (tile, kernel) = (self.output_tile(), self.kernel());
        let key = [tile.height, tile.width, kernel.height, kernel.width];
        FAST_MATH_CONFIGS
            .iter()
            .any(|&(data_type, entry)| data_type == self.data_type && entry == key)
    }
}

/// Picks the output tile for a convolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct WinogradConfigSelector;

impl WinogradConfigSelector {
    pub fn select(
        kernel: Size2D,
        input: Size2D,
        data_type: DataType,
        allow_fast_math: bool,
    ) -> Result<WinogradTileConfig, ConfigurationError> {
        let tile = output_tile_for(kernel, input, data_type).ok_or(
            ConfigurationError::UnsupportedKernel {
                kernel_h: kernel.height,
                kernel_w: kernel.width,
                data_type,
            },
        )?;
        let variant = WinogradVariant::from_tile_and_kernel(tile, kernel).ok_or(
            ConfigurationError::UnsupportedKernel {
                kernel_h: kernel.height,
                kernel_w: kernel.width,
                data_type,
            },
        )?;
        let config = WinogradTileConfig { variant, data_type };
        if config.requires_fast_math() && !allow_fast_math {
            return Err(ConfigurationError::FastMathRequired {
                tile_h: tile.height,
                tile_w: tile.width,
                kernel_h: kernel.height,
                kernel_w: kernel.width,
                data_type,
            });
        }
        Ok(config)
    }

    /// Every `(kernel, data_type)` pairing with at least one implemented tile.
    pub fn supported_configurations() -> Vec<(Size2D, DataType)> {
        let mut out: Vec<(Size2D, DataType)> = WinogradVariant::ALL
            .into_iter()
            .map(|v| (v.kernel(), DataType::F32))
            .collect();
        out.dedup();
        out.push((Size2D::new(3, 3), DataType::F16));
        out
    }
}

fn output_tile_for(kernel: Size2D, input: Size2D, data_type: DataType) -> Option<Size2D> {
    match data_type {
        DataType::F32 => match (kernel.height, kernel.width) {
            (3, 3) if input.width > 4 && input.height > 4 => Some(Size2D::new(4, 4)),
            (3, 3) | (5, 5) => Some(Size2D::new(2, 2)),
            (3, 1) => Some(Size2D::new(1, 6)),
            (1, 3) => Some(Size2D::new(6, 1)),
            (5, 1) => Some(Size2D::new(1, 4)),
            (1, 5) => Some(Size2D::new(4, 1)),
            (7, 1) => Some(Size2D::new(1, 2)),
            (1, 7) => Some(Size2D::new(2, 1)),
            _ => None,
        },
        DataType::F16 => match (kernel.height, kernel.width) {
            (3, 3) => Some(Size2D::new(4, 4)),
            _ => None,
        },
    }
}
