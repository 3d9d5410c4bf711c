use rayon::prelude::*;

const PARALLEL_CHUNK: usize = 16 * 1024;

/// Supported activation operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActivationKind {
    /// Rectified Linear Unit.
    Relu,
    /// `min(upper, max(0, x))`.
    BoundedRelu { upper: f32 },
    /// `min(upper, max(lower, x))`.
    LuBoundedRelu { upper: f32, lower: f32 },
    /// `x` for positive inputs, `alpha * x` otherwise.
    LeakyRelu { alpha: f32 },
    /// Sigmoid.
    Sigmoid,
    /// Hyperbolic tangent.
    Tanh,
}

impl ActivationKind {
    /// Whether the output transform can apply this activation while writing results.
    pub fn is_fusable(self) -> bool {
        matches!(self, ActivationKind::Relu | ActivationKind::BoundedRelu { .. })
    }

    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            ActivationKind::Relu => x.max(0.0),
            ActivationKind::BoundedRelu { upper } => x.max(0.0).min(upper),
            ActivationKind::LuBoundedRelu { upper, lower } => x.max(lower).min(upper),
            ActivationKind::LeakyRelu { alpha } => {
                if x > 0.0 {
                    x
                } else {
                    alpha * x
                }
            }
            ActivationKind::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            ActivationKind::Tanh => x.tanh(),
        }
    }

    /// Elementwise pass over `values`, split across the rayon pool for large buffers.
    pub fn apply_in_place(self, values: &mut [f32]) {
        if values.len() < PARALLEL_CHUNK {
            values.iter_mut().for_each(|v| *v = self.apply(*v));
        } else {
            values
                .par_chunks_mut(PARALLEL_CHUNK)
                .for_each(|chunk| chunk.iter_mut().for_each(|v| *v = self.apply(*v)));
        }
    }
}
