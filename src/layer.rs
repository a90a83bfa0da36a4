//! Layer: connectivity, activation, optional pooling and output options.
//!
//! # Forward
//!
//! ```text
//! input ─► connectivity (+bias) ─► sum z ─► activate ─► [reorganize] ─► [max pool] ─► output
//! ```
//!
//! The connectivity writes a `T × T` grid, `T = size · pooling`; pooling
//! brings the output back to `size × size`. The output layer may scale its
//! activation by `1 / size²` (normalize) and clamp it to a fixed range, or
//! only where the sample's clamp mask is set. With `want_result` the layer
//! also writes `output − expected` into its result tensor.
//!
//! # Backward
//!
//! The output layer computes its delta from the cost derivative. A hidden
//! layer receives `∂C/∂output` from the next layer's connectivity, expands it
//! through the pool mask, unreorganizes it and multiplies by `act'(z)`.
//! The delta is always taken with respect to `z`, in the connectivity's
//! layout, so it feeds both the gradients and the previous layer.

use rand::Rng;

use crate::activation::Activation;
use crate::backend::Backend;
use crate::config::{ConfigError, ConnectivityKind, LayerConfig};
use crate::connectivity::{reorganize, unreorganize, Connectivity, Geometry};
use crate::cost::CostFunction;
use crate::error::{NeurotexError, NeurotexResult};
use crate::kernel::{KernelCall, Program};
use crate::optimizer::{LearningMask, SgdParams, SgdState};
use crate::tensor::{StorageMode, TensorBuffer, CHANNELS};

/// One layer of the chain.
pub struct Layer<B: Backend> {
    index: usize,
    config: LayerConfig,
    is_output: bool,
    connectivity: Connectivity<B>,
    bias: SgdState<B>,
    sum: TensorBuffer<B>,
    activation: TensorBuffer<B>,
    tiled: Option<TensorBuffer<B>>,
    pool_mask: Option<TensorBuffer<B>>,
    pooled: Option<TensorBuffer<B>>,
    result: TensorBuffer<B>,
    upstream: TensorBuffer<B>,
    expanded: Option<TensorBuffer<B>>,
    interleaved: Option<TensorBuffer<B>>,
    delta: TensorBuffer<B>,
}

impl<B: Backend> Layer<B> {
    /// Builds a layer with random weights and zero bias.
    pub fn new<R: Rng>(
        backend: &mut B,
        index: usize,
        config: &LayerConfig,
        from_size: usize,
        next: Option<ConnectivityKind>,
        rng: &mut R,
    ) -> NeurotexResult<Self> {
        let geometry = Self::geometry_for(index, config, from_size, next)?;
        let connectivity = Connectivity::build(backend, geometry, rng)?;
        let bias = vec![0.0; geometry.to_size * geometry.to_size * CHANNELS];
        Self::assemble(backend, index, config, next.is_none(), connectivity, &bias)
    }

    /// Builds a layer from stored weights and bias.
    pub fn from_parts(
        backend: &mut B,
        index: usize,
        config: &LayerConfig,
        from_size: usize,
        next: Option<ConnectivityKind>,
        weights: &[f32],
        bias: &[f32],
    ) -> NeurotexResult<Self> {
        let geometry = Self::geometry_for(index, config, from_size, next)?;
        let connectivity = Connectivity::with_weights(backend, geometry, weights)?;
        Self::assemble(backend, index, config, next.is_none(), connectivity, bias)
    }

    fn geometry_for(
        index: usize,
        config: &LayerConfig,
        from_size: usize,
        next: Option<ConnectivityKind>,
    ) -> NeurotexResult<Geometry> {
        Geometry::resolve(
            &config.connectivity,
            from_size,
            config.pre_pool_size(),
            config.pooling_factor(),
            next,
        )
        .map_err(|reason| NeurotexError::Config(ConfigError::layer(index, reason)))
    }

    fn assemble(
        backend: &mut B,
        index: usize,
        config: &LayerConfig,
        is_output: bool,
        connectivity: Connectivity<B>,
        bias: &[f32],
    ) -> NeurotexResult<Self> {
        let size = config.size;
        let t = config.pre_pool_size();
        let pooling = config.pooling_factor() > 1;
        let reorganizing = connectivity.geometry().reorganize;
        let optional = |backend: &mut B, enabled: bool| -> NeurotexResult<Option<TensorBuffer<B>>> {
            if enabled {
                TensorBuffer::square(backend, t).map(Some)
            } else {
                Ok(None)
            }
        };

        log::debug!(
            "layer {}: {} {} size {} (pre-pool {}), reorganize {}",
            index,
            connectivity.kind(),
            config.activation,
            size,
            t,
            reorganizing
        );

        Ok(Self {
            index,
            config: config.clone(),
            is_output,
            bias: SgdState::new(backend, t, t, bias)?,
            sum: TensorBuffer::square(backend, t)?,
            activation: TensorBuffer::square(backend, t)?,
            tiled: optional(backend, reorganizing)?,
            pool_mask: optional(backend, pooling)?,
            pooled: if pooling {
                Some(TensorBuffer::square(backend, size)?)
            } else {
                None
            },
            result: TensorBuffer::square(backend, size)?,
            upstream: TensorBuffer::square(backend, size)?,
            expanded: optional(backend, pooling)?,
            interleaved: optional(backend, reorganizing)?,
            delta: TensorBuffer::square(backend, t)?,
            connectivity,
        })
    }

    /// Position in the chain.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Side of the output grid.
    #[inline]
    pub fn size(&self) -> usize {
        self.config.size
    }

    /// Configuration this layer was built from.
    #[inline]
    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    /// Activation kind.
    #[inline]
    pub fn activation(&self) -> Activation {
        self.config.activation
    }

    /// Whether this is the last layer.
    #[inline]
    pub fn is_output(&self) -> bool {
        self.is_output
    }

    /// The input mapping.
    #[inline]
    pub fn connectivity(&self) -> &Connectivity<B> {
        &self.connectivity
    }

    /// Current bias (`T × T`).
    #[inline]
    pub fn bias(&self) -> &TensorBuffer<B> {
        self.bias.front()
    }

    /// Weighted sum `z` of the last feedforward.
    #[inline]
    pub fn sum(&self) -> &TensorBuffer<B> {
        &self.sum
    }

    /// Delta with respect to `z` of the last backpropagation.
    #[inline]
    pub fn delta(&self) -> &TensorBuffer<B> {
        &self.delta
    }

    /// `output − expected` of the last feedforward with `want_result`.
    #[inline]
    pub fn result(&self) -> &TensorBuffer<B> {
        &self.result
    }

    /// Output of the last feedforward (`size × size`).
    pub fn output(&self) -> &TensorBuffer<B> {
        self.pooled
            .as_ref()
            .or(self.tiled.as_ref())
            .unwrap_or(&self.activation)
    }

    /// Scale applied to the output layer's activation.
    pub fn output_scale(&self) -> f32 {
        if self.is_output && self.config.normalize {
            let size = self.config.size as f32;
            1.0 / (size * size)
        } else {
            1.0
        }
    }

    /// Replaces weights and bias.
    pub fn upload_parameters(&mut self, backend: &mut B, weights: &[f32], bias: &[f32]) -> NeurotexResult<()> {
        self.connectivity.upload_weights(backend, weights)?;
        self.bias.values.front_mut().upload(backend, bias)
    }

    /// Runs the forward chain.
    pub fn feedforward(
        &mut self,
        backend: &mut B,
        input: &TensorBuffer<B>,
        want_result: bool,
        expected: Option<&TensorBuffer<B>>,
        clamp_mask: Option<&TensorBuffer<B>>,
    ) -> NeurotexResult<()> {
        self.connectivity
            .feedforward(backend, input, self.bias.front(), &mut self.sum)?;

        let clamp = if self.is_output { self.config.clamp } else { None };
        let (mode, lo, hi) = match clamp {
            None => (0, 0.0, 0.0),
            Some(c) if !c.masked => (1, c.min, c.max),
            Some(c) => (2, c.min, c.max),
        };
        KernelCall::new(Program::Activate(self.config.activation))
            .input(&self.sum)
            .input_or_zeros(clamp_mask.filter(|_| mode == 2))
            .float(0, self.output_scale())
            .float(1, lo)
            .float(2, hi)
            .int(0, mode)
            .run(backend, &mut self.activation)?;

        let geometry = *self.connectivity.geometry();
        if let Some(tiled) = self.tiled.as_mut() {
            reorganize(backend, &geometry, &self.activation, tiled)?;
        }

        if let (Some(mask), Some(pooled)) = (self.pool_mask.as_mut(), self.pooled.as_mut()) {
            let source = self.tiled.as_ref().unwrap_or(&self.activation);
            let p = self.config.pooling_factor() as i32;
            KernelCall::new(Program::MaxPoolMask)
                .input(source)
                .int(0, p)
                .run(backend, mask)?;
            KernelCall::new(Program::MaxPool)
                .input(source)
                .int(0, p)
                .run(backend, pooled)?;
        }

        if want_result {
            let output = self
                .pooled
                .as_ref()
                .or(self.tiled.as_ref())
                .unwrap_or(&self.activation);
            KernelCall::new(Program::Residual)
                .input(output)
                .input_or_zeros(expected)
                .run(backend, &mut self.result)?;
        }
        Ok(())
    }

    /// Output-layer delta from the cost derivative.
    pub fn backpropagate_output(
        &mut self,
        backend: &mut B,
        cost: CostFunction,
        expected: &TensorBuffer<B>,
        delta_mask: Option<&TensorBuffer<B>>,
    ) -> NeurotexResult<()> {
        if !self.is_output {
            return Err(NeurotexError::invalid_state(format!(
                "layer {} is not the output layer",
                self.index
            )));
        }
        KernelCall::new(Program::OutputDelta(self.config.activation, cost))
            .input(&self.activation)
            .input(expected)
            .input(&self.sum)
            .input_or_ones(delta_mask)
            .float(0, self.output_scale())
            .run(backend, &mut self.delta)
    }

    /// Pulls this layer's delta back through its connectivity into `out`,
    /// the previous layer's upstream gradient.
    pub fn propagate_back(&mut self, backend: &mut B, out: &mut TensorBuffer<B>) -> NeurotexResult<()> {
        self.connectivity.backpropagate(backend, &self.delta, out)
    }

    /// Upstream gradient written by the next layer.
    pub fn upstream_mut(&mut self) -> &mut TensorBuffer<B> {
        &mut self.upstream
    }

    /// Hidden-layer delta from the upstream gradient.
    pub fn backpropagate_hidden(&mut self, backend: &mut B) -> NeurotexResult<()> {
        let geometry = *self.connectivity.geometry();

        if let (Some(mask), Some(expanded)) = (self.pool_mask.as_ref(), self.expanded.as_mut()) {
            KernelCall::new(Program::MaxPoolBackward)
                .input(&self.upstream)
                .input(mask)
                .int(0, self.config.pooling_factor() as i32)
                .run(backend, expanded)?;
        }

        if let Some(interleaved) = self.interleaved.as_mut() {
            let source = self.expanded.as_ref().unwrap_or(&self.upstream);
            unreorganize(backend, &geometry, source, interleaved)?;
        }

        let gradient = self
            .interleaved
            .as_ref()
            .or(self.expanded.as_ref())
            .unwrap_or(&self.upstream);
        KernelCall::new(Program::ActivationDerivative(self.config.activation))
            .input(gradient)
            .input(&self.sum)
            .run(backend, &mut self.delta)
    }

    /// Computes gradients from `input` and the bound delta, then updates
    /// the parameters selected by `mask`. The bias never receives L2 decay.
    pub fn learn(
        &mut self,
        backend: &mut B,
        input: &TensorBuffer<B>,
        params: &SgdParams,
        mask: LearningMask,
    ) -> NeurotexResult<()> {
        if mask.weights {
            self.connectivity.compute_gradients(backend, input, &self.delta)?;
            self.connectivity.apply_update(backend, params)?;
        }
        if mask.bias {
            let bias_params = SgdParams {
                l2_decay: 0.0,
                ..*params
            };
            self.bias.step(backend, &self.delta, &bias_params)?;
        }
        Ok(())
    }

    /// Zeroes weight and bias momentum.
    pub fn reset_momentum(&mut self, backend: &mut B) -> NeurotexResult<()> {
        self.connectivity.reset_momentum(backend)?;
        self.bias.reset_momentum(backend)
    }

    /// Copies the output into a byte (display) tensor.
    pub fn render_output(&self, backend: &mut B) -> NeurotexResult<TensorBuffer<B>> {
        let size = self.config.size;
        let mut display = TensorBuffer::new(backend, size, size, StorageMode::Byte)?;
        KernelCall::new(Program::Copy)
            .input(self.output())
            .run(backend, &mut display)?;
        Ok(display)
    }
}

impl<B: Backend> std::fmt::Debug for Layer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("index", &self.index)
            .field("size", &self.config.size)
            .field("activation", &self.config.activation)
            .field("connectivity", self.connectivity.geometry())
            .field("is_output", &self.is_output)
            .finish()
    }
}
