//! Connectivity strategies: how one layer's output feeds the next layer's sum.
//!
//! A [`Connectivity`] owns its weights, their gradient and momentum, plus any
//! kind-specific tensors ([`Addressing`]). The weight tensor size is fixed
//! once from `(from_size, to_size, sparsity, kernels_count)` by
//! [`Geometry::resolve`] and never changes.
//!
//! | Kind | Weights | Constraint |
//! |------|---------|------------|
//! | Direct | `T × T` | `F == T` |
//! | Full | `(T·F)²` + mip-reduced products | `F`, `T` powers of two |
//! | FullNPoT | `(T·F)²` | none |
//! | Square | `(T·k)²` + index tensors | `k ≤ F` |
//! | SquareFast | `(T·k)²` | `F % T == 0` |
//! | Convolutional | `(kk·k)²` shared | `kk² = kernels`, `T % kk == 0`, `F % (T/kk) == 0` |
//!
//! Every kind follows the same contract:
//!
//! - [`Connectivity::feedforward`] writes `Σ w·x + bias` into a `T × T` sum
//! - [`Connectivity::backpropagate`] writes `Σ w·delta` into an `F × F` tensor
//! - [`Connectivity::compute_gradients`] writes the weight gradient
//! - [`Connectivity::apply_update`] runs one SGD step on the weights

mod convolutional;
mod dense;
mod direct;
mod square;

pub use convolutional::{reorganize, unreorganize};
pub use square::SquareIndex;

use rand::Rng;

use crate::backend::Backend;
use crate::config::{ConnectivityConfig, ConnectivityKind};
use crate::error::{NeurotexError, NeurotexResult};
use crate::optimizer::{SgdParams, SgdState};
use crate::tensor::{TensorBuffer, CHANNELS};

/// Resolved sizes and addressing constants of a connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Kind.
    pub kind: ConnectivityKind,
    /// Side of the input grid (`F`).
    pub from_size: usize,
    /// Side of the sum grid (`T`, before pooling).
    pub to_size: usize,
    /// Window or kernel side (`k`); `F` for dense kinds, 1 for direct.
    pub sparsity: usize,
    /// Input step between neighbouring windows.
    pub stride: usize,
    /// Window start relative to `position · stride`.
    pub offset: i64,
    /// Kernels per side (`kk`); 1 except for convolutions.
    pub kernels_side: usize,
    /// Positions per side (`M = T / kk`).
    pub positions: usize,
    /// Output is reorganized from interleaved to tiled layout.
    pub reorganize: bool,
}

impl Geometry {
    /// Resolves the geometry of a layer's connectivity.
    ///
    /// `to_size` is the pre-pooling side, `pooling` the pooling factor and
    /// `next` the kind of the following layer's connectivity, if any.
    pub fn resolve(
        config: &ConnectivityConfig,
        from_size: usize,
        to_size: usize,
        pooling: usize,
        next: Option<ConnectivityKind>,
    ) -> Result<Self, String> {
        let mut geometry = Geometry {
            kind: config.kind(),
            from_size,
            to_size,
            sparsity: 1,
            stride: 1,
            offset: 0,
            kernels_side: 1,
            positions: to_size,
            reorganize: false,
        };
        let window = |k: usize| -> Result<usize, String> {
            if k == 0 || k > from_size {
                Err(format!("sparsity {} must be in 1..={}", k, from_size))
            } else {
                Ok(k)
            }
        };

        match *config {
            ConnectivityConfig::Direct => {
                if from_size != to_size {
                    return Err(format!(
                        "direct connectivity needs equal sizes, got {} -> {}",
                        from_size, to_size
                    ));
                }
            }
            ConnectivityConfig::Full => {
                if !from_size.is_power_of_two() || !to_size.is_power_of_two() {
                    return Err(format!(
                        "full connectivity needs power-of-two sizes, got {} -> {} (use fullNPoT)",
                        from_size, to_size
                    ));
                }
                geometry.sparsity = from_size;
            }
            ConnectivityConfig::FullNPoT => {
                geometry.sparsity = from_size;
            }
            ConnectivityConfig::Square { sparsity } => {
                geometry.sparsity = window(sparsity)?;
                geometry.stride = (from_size / to_size).max(1);
            }
            ConnectivityConfig::SquareFast { sparsity } => {
                geometry.sparsity = window(sparsity)?;
                if from_size % to_size != 0 {
                    return Err(format!(
                        "squareFast needs the previous size {} to be a multiple of {} (use square)",
                        from_size, to_size
                    ));
                }
                geometry.stride = from_size / to_size;
                geometry.offset = centered_offset(geometry.stride, geometry.sparsity);
            }
            ConnectivityConfig::Convolutional {
                sparsity,
                kernels_count,
            } => {
                geometry.sparsity = window(sparsity)?;
                let kk = (kernels_count as f64).sqrt().round() as usize;
                if kk == 0 || kk * kk != kernels_count {
                    return Err(format!(
                        "kernels count {} must be a non-zero perfect square",
                        kernels_count
                    ));
                }
                if to_size % kk != 0 {
                    return Err(format!(
                        "size {} must be a multiple of the kernels per side {}",
                        to_size, kk
                    ));
                }
                let positions = to_size / kk;
                if from_size % positions != 0 {
                    return Err(format!(
                        "previous size {} must be a multiple of the {} positions per side",
                        from_size, positions
                    ));
                }
                geometry.kernels_side = kk;
                geometry.positions = positions;
                geometry.stride = from_size / positions;
                geometry.offset = centered_offset(geometry.stride, geometry.sparsity);
                geometry.reorganize = pooling > 1 || next.is_some_and(|kind| !kind.is_dense());
                if pooling > 1 && positions % pooling != 0 {
                    return Err(format!(
                        "pooling factor {} must divide the {} positions per side",
                        pooling, positions
                    ));
                }
            }
        }
        Ok(geometry)
    }

    /// Side of the weight tensor.
    pub fn weights_side(&self) -> usize {
        match self.kind {
            ConnectivityKind::Direct => self.to_size,
            ConnectivityKind::Full | ConnectivityKind::FullNPoT => self.to_size * self.from_size,
            ConnectivityKind::Square | ConnectivityKind::SquareFast => self.to_size * self.sparsity,
            ConnectivityKind::Convolutional => self.kernels_side * self.sparsity,
        }
    }

    /// Inputs read by one output neuron.
    pub fn fan_in(&self) -> usize {
        self.sparsity * self.sparsity
    }

    /// Number of kernels (1 except for convolutions).
    pub fn kernels_count(&self) -> usize {
        self.kernels_side * self.kernels_side
    }
}

/// `floor((stride − k) / 2)`: centres a `k` window on a `stride` cell.
pub(crate) fn centered_offset(stride: usize, k: usize) -> i64 {
    (stride as i64 - k as i64).div_euclid(2)
}

/// Kind-specific tensors.
pub enum Addressing<B: Backend> {
    /// One-to-one, nothing extra.
    Direct,
    /// Products tensors reduced through their mip chains.
    Full {
        /// Forward products, `(T·F)²`.
        products: TensorBuffer<B>,
        /// Backward products, `(F·T)²`.
        back_products: TensorBuffer<B>,
    },
    /// Looping kernels, nothing extra.
    FullNPoT,
    /// Precomputed index tensors.
    Square(SquareIndex<B>),
    /// Arithmetic addressing, nothing extra.
    SquareFast,
    /// Shared kernel bank, nothing extra.
    Convolutional,
}

/// Weights and addressing of one layer's input mapping.
pub struct Connectivity<B: Backend> {
    geometry: Geometry,
    weights: SgdState<B>,
    gradient: TensorBuffer<B>,
    addressing: Addressing<B>,
}

impl<B: Backend> Connectivity<B> {
    /// Builds a connectivity with random weights drawn from `rng`.
    pub fn build<R: Rng>(backend: &mut B, geometry: Geometry, rng: &mut R) -> NeurotexResult<Self> {
        let side = geometry.weights_side();
        let limit = (3.0 / geometry.fan_in() as f32).sqrt();
        let data: Vec<f32> = (0..side * side * CHANNELS)
            .map(|_| rng.gen_range(-limit..limit))
            .collect();
        Self::with_weights(backend, geometry, &data)
    }

    /// Builds a connectivity with the given weights.
    pub fn with_weights(backend: &mut B, geometry: Geometry, weights: &[f32]) -> NeurotexResult<Self> {
        let side = geometry.weights_side();
        let addressing = match geometry.kind {
            ConnectivityKind::Direct => Addressing::Direct,
            ConnectivityKind::Full => Addressing::Full {
                products: TensorBuffer::with_mipmaps(backend, side, side)?,
                back_products: TensorBuffer::with_mipmaps(backend, side, side)?,
            },
            ConnectivityKind::FullNPoT => Addressing::FullNPoT,
            ConnectivityKind::Square => Addressing::Square(SquareIndex::build(backend, &geometry)?),
            ConnectivityKind::SquareFast => Addressing::SquareFast,
            ConnectivityKind::Convolutional => Addressing::Convolutional,
        };
        log::debug!(
            "built {} connectivity {} -> {} (weights {}x{})",
            geometry.kind,
            geometry.from_size,
            geometry.to_size,
            side,
            side
        );
        Ok(Self {
            geometry,
            weights: SgdState::new(backend, side, side, weights)?,
            gradient: TensorBuffer::square(backend, side)?,
            addressing,
        })
    }

    /// Resolved geometry.
    #[inline]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Kind.
    #[inline]
    pub fn kind(&self) -> ConnectivityKind {
        self.geometry.kind
    }

    /// Current weights.
    #[inline]
    pub fn weights(&self) -> &TensorBuffer<B> {
        self.weights.front()
    }

    /// Last computed weight gradient.
    #[inline]
    pub fn gradient(&self) -> &TensorBuffer<B> {
        &self.gradient
    }

    /// Kind-specific tensors.
    #[inline]
    pub fn addressing(&self) -> &Addressing<B> {
        &self.addressing
    }

    /// Replaces the weights.
    pub fn upload_weights(&mut self, backend: &mut B, data: &[f32]) -> NeurotexResult<()> {
        self.weights.values.front_mut().upload(backend, data)
    }

    /// Writes `Σ w·x + bias` into `sum` (`T × T`).
    pub fn feedforward(
        &mut self,
        backend: &mut B,
        input: &TensorBuffer<B>,
        bias: &TensorBuffer<B>,
        sum: &mut TensorBuffer<B>,
    ) -> NeurotexResult<()> {
        let g = &self.geometry;
        expect_dims(input, g.from_size)?;
        expect_dims(sum, g.to_size)?;
        let weights = self.weights.front();
        match &mut self.addressing {
            Addressing::Direct => direct::feedforward(backend, input, weights, bias, sum),
            Addressing::Full { products, .. } => {
                dense::feedforward_mip(backend, g, input, weights, bias, products, sum)
            }
            Addressing::FullNPoT => dense::feedforward_loop(backend, g, input, weights, bias, sum),
            Addressing::Square(index) => square::feedforward(backend, g, index, input, weights, bias, sum),
            Addressing::SquareFast => square::feedforward_fast(backend, g, input, weights, bias, sum),
            Addressing::Convolutional => convolutional::feedforward(backend, g, input, weights, bias, sum),
        }
    }

    /// Writes `Σ w·delta` into `out` (`F × F`).
    pub fn backpropagate(
        &mut self,
        backend: &mut B,
        delta: &TensorBuffer<B>,
        out: &mut TensorBuffer<B>,
    ) -> NeurotexResult<()> {
        let g = &self.geometry;
        expect_dims(delta, g.to_size)?;
        expect_dims(out, g.from_size)?;
        let weights = self.weights.front();
        match &mut self.addressing {
            Addressing::Direct => direct::backpropagate(backend, delta, weights, out),
            Addressing::Full { back_products, .. } => {
                dense::backpropagate_mip(backend, g, delta, weights, back_products, out)
            }
            Addressing::FullNPoT => dense::backpropagate_loop(backend, g, delta, weights, out),
            Addressing::Square(index) => square::backpropagate(backend, index, delta, weights, out),
            Addressing::SquareFast => square::backpropagate_fast(backend, g, delta, weights, out),
            Addressing::Convolutional => convolutional::backpropagate(backend, g, delta, weights, out),
        }
    }

    /// Writes the weight gradient from the saved input and this layer's delta.
    pub fn compute_gradients(
        &mut self,
        backend: &mut B,
        input: &TensorBuffer<B>,
        delta: &TensorBuffer<B>,
    ) -> NeurotexResult<()> {
        let g = &self.geometry;
        expect_dims(input, g.from_size)?;
        expect_dims(delta, g.to_size)?;
        let gradient = &mut self.gradient;
        match &self.addressing {
            Addressing::Direct => direct::gradients(backend, input, delta, gradient),
            Addressing::Full { .. } | Addressing::FullNPoT => dense::gradients(backend, g, input, delta, gradient),
            Addressing::Square(index) => square::gradients(backend, g, index, input, delta, gradient),
            Addressing::SquareFast => square::gradients_fast(backend, g, input, delta, gradient),
            Addressing::Convolutional => convolutional::gradients(backend, g, input, delta, gradient),
        }
    }

    /// Applies one SGD step with the last computed gradient.
    pub fn apply_update(&mut self, backend: &mut B, params: &SgdParams) -> NeurotexResult<()> {
        self.weights.step(backend, &self.gradient, params)
    }

    /// Zeroes the momentum accumulator.
    pub fn reset_momentum(&mut self, backend: &mut B) -> NeurotexResult<()> {
        self.weights.reset_momentum(backend)
    }
}

impl<B: Backend> std::fmt::Debug for Connectivity<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connectivity")
            .field("geometry", &self.geometry)
            .finish()
    }
}

fn expect_dims<B: Backend>(tensor: &TensorBuffer<B>, size: usize) -> NeurotexResult<()> {
    if tensor.dims() != (size, size) {
        return Err(NeurotexError::shape_mismatch((size, size), tensor.dims()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(config: ConnectivityConfig, from: usize, to: usize) -> Result<Geometry, String> {
        Geometry::resolve(&config, from, to, 1, None)
    }

    #[test]
    fn test_direct_geometry() {
        let g = resolve(ConnectivityConfig::Direct, 4, 4).unwrap();
        assert_eq!(g.weights_side(), 4);
        assert!(resolve(ConnectivityConfig::Direct, 4, 2).is_err());
    }

    #[test]
    fn test_full_requires_power_of_two() {
        assert!(resolve(ConnectivityConfig::Full, 4, 2).is_ok());
        assert!(resolve(ConnectivityConfig::Full, 6, 2).is_err());
        let g = resolve(ConnectivityConfig::FullNPoT, 6, 3).unwrap();
        assert_eq!(g.weights_side(), 18);
    }

    #[test]
    fn test_square_fast_geometry() {
        let g = resolve(ConnectivityConfig::SquareFast { sparsity: 3 }, 8, 4).unwrap();
        assert_eq!(g.stride, 2);
        assert_eq!(g.offset, -1);
        assert_eq!(g.weights_side(), 12);
        assert!(resolve(ConnectivityConfig::SquareFast { sparsity: 2 }, 7, 4).is_err());
        assert!(resolve(ConnectivityConfig::Square { sparsity: 2 }, 7, 4).is_ok());
    }

    #[test]
    fn test_conv_geometry() {
        let config = ConnectivityConfig::Convolutional {
            sparsity: 3,
            kernels_count: 4,
        };
        let g = Geometry::resolve(&config, 8, 8, 1, Some(ConnectivityKind::Full)).unwrap();
        assert_eq!(g.kernels_side, 2);
        assert_eq!(g.positions, 4);
        assert_eq!(g.stride, 2);
        assert_eq!(g.weights_side(), 6);
        assert!(!g.reorganize);

        let g = Geometry::resolve(&config, 8, 8, 1, Some(ConnectivityKind::Direct)).unwrap();
        assert!(g.reorganize);
        let g = Geometry::resolve(&config, 8, 8, 2, None).unwrap();
        assert!(g.reorganize);

        let bad = ConnectivityConfig::Convolutional {
            sparsity: 3,
            kernels_count: 3,
        };
        assert!(Geometry::resolve(&bad, 8, 8, 1, None).is_err());
    }

    #[test]
    fn test_centered_offset() {
        assert_eq!(centered_offset(2, 2), 0);
        assert_eq!(centered_offset(2, 3), -1);
        assert_eq!(centered_offset(1, 3), -1);
        assert_eq!(centered_offset(4, 1), 1);
    }
}
