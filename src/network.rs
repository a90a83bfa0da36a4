//! Network: an arena of layers addressed by index.
//!
//! Layer `i` reads layer `i − 1`'s output (the network input for layer 0)
//! and, during backpropagation, writes its upstream gradient from layer
//! `i + 1`'s delta. Neighbours are reached through `split_at_mut`, so no
//! layer holds a reference to another.

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::backend::Backend;
use crate::config::{NetworkConfig, ProblemKind};
use crate::cost::CostFunction;
use crate::error::{NeurotexError, NeurotexResult};
use crate::kernel::{KernelCall, Program};
use crate::layer::Layer;
use crate::optimizer::{LearningMask, SgdParams};
use crate::problem::{Expected, Sample};
use crate::tensor::{TensorBuffer, CHANNELS};

/// Downloaded weights and bias of one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerParameters {
    /// Connectivity weights.
    pub weights: Vec<f32>,
    /// Bias (`T × T`).
    pub bias: Vec<f32>,
}

/// A chain of layers plus global hyperparameters.
pub struct Network<B: Backend> {
    config: NetworkConfig,
    layers: Vec<Layer<B>>,
    one_hot: TensorBuffer<B>,
}

impl<B: Backend> Network<B> {
    /// Builds a network with random weights.
    ///
    /// Weights are drawn from a `SmallRng` seeded with `init_seed`, or from
    /// entropy when no seed is set.
    pub fn build(backend: &mut B, config: NetworkConfig) -> NeurotexResult<Self> {
        config.validate()?;
        let mut rng = match config.init_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let mut layers = Vec::with_capacity(config.layers.len());
        for (index, layer) in config.layers.iter().enumerate() {
            let next = config.layers.get(index + 1).map(|l| l.connectivity.kind());
            layers.push(Layer::new(
                backend,
                index,
                layer,
                config.from_size(index),
                next,
                &mut rng,
            )?);
        }
        Self::assemble(backend, config, layers)
    }

    /// Builds a network from stored parameters, one entry per layer.
    pub fn from_parameters(
        backend: &mut B,
        config: NetworkConfig,
        parameters: &[LayerParameters],
    ) -> NeurotexResult<Self> {
        config.validate()?;
        if parameters.len() != config.layers.len() {
            return Err(NeurotexError::invalid_state(format!(
                "{} parameter sets for {} layers",
                parameters.len(),
                config.layers.len()
            )));
        }
        let mut layers = Vec::with_capacity(config.layers.len());
        for (index, (layer, params)) in config.layers.iter().zip(parameters).enumerate() {
            let next = config.layers.get(index + 1).map(|l| l.connectivity.kind());
            layers.push(Layer::from_parts(
                backend,
                index,
                layer,
                config.from_size(index),
                next,
                &params.weights,
                &params.bias,
            )?);
        }
        Self::assemble(backend, config, layers)
    }

    fn assemble(backend: &mut B, config: NetworkConfig, layers: Vec<Layer<B>>) -> NeurotexResult<Self> {
        let output_size = layers.last().map_or(1, |l| l.size());
        log::info!(
            "network built: input {}, {} layers, output {}, {} cost, {} problem",
            config.input_size,
            layers.len(),
            output_size,
            config.cost,
            config.problem_kind
        );
        Ok(Self {
            one_hot: TensorBuffer::square(backend, output_size)?,
            config,
            layers,
        })
    }

    /// Configuration the network was built from.
    #[inline]
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Side of the input tensor.
    #[inline]
    pub fn input_size(&self) -> usize {
        self.config.input_size
    }

    /// Side of the output tensor.
    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, |l| l.size())
    }

    /// Cost function from the configuration.
    #[inline]
    pub fn cost(&self) -> CostFunction {
        self.config.cost
    }

    /// Problem kind.
    #[inline]
    pub fn problem_kind(&self) -> ProblemKind {
        self.config.problem_kind
    }

    /// Number of layers.
    #[inline]
    pub fn layers_count(&self) -> usize {
        self.layers.len()
    }

    /// All layers in order.
    #[inline]
    pub fn layers(&self) -> &[Layer<B>] {
        &self.layers
    }

    /// Layer at `index`.
    pub fn layer(&self, index: usize) -> Option<&Layer<B>> {
        self.layers.get(index)
    }

    /// The last layer.
    pub fn output_layer(&self) -> Option<&Layer<B>> {
        self.layers.last()
    }

    /// Layer before `index`.
    pub fn previous(&self, index: usize) -> Option<&Layer<B>> {
        index.checked_sub(1).and_then(|i| self.layers.get(i))
    }

    /// Layer after `index`.
    pub fn next(&self, index: usize) -> Option<&Layer<B>> {
        self.layers.get(index + 1)
    }

    /// Runs every layer forward.
    ///
    /// With `want_result` the output layer also writes `output − expected`
    /// (or the plain output when `expected` is `None`).
    pub fn feedforward(
        &mut self,
        backend: &mut B,
        input: &TensorBuffer<B>,
        want_result: bool,
        expected: Option<Expected<'_, B>>,
        clamp_mask: Option<&TensorBuffer<B>>,
    ) -> NeurotexResult<()> {
        let size = self.config.input_size;
        if input.dims() != (size, size) {
            return Err(NeurotexError::shape_mismatch((size, size), input.dims()));
        }
        let output_size = self.output_size();
        let Self { layers, one_hot, .. } = self;
        let expected = match expected {
            Some(e) => Some(bind_expected(backend, one_hot, e, output_size)?),
            None => None,
        };
        if let Some(mask) = clamp_mask {
            check_dims(mask, output_size)?;
        }

        for i in 0..layers.len() {
            let (head, tail) = layers.split_at_mut(i);
            let layer = &mut tail[0];
            let input = if i == 0 { input } else { head[i - 1].output() };
            if layer.is_output() {
                layer.feedforward(backend, input, want_result, expected, clamp_mask)?;
            } else {
                layer.feedforward(backend, input, false, None, None)?;
            }
        }
        Ok(())
    }

    /// Computes every layer's delta, output layer first.
    pub fn backpropagate(
        &mut self,
        backend: &mut B,
        cost: CostFunction,
        expected: Expected<'_, B>,
        delta_mask: Option<&TensorBuffer<B>>,
    ) -> NeurotexResult<()> {
        let output_size = self.output_size();
        let Self { layers, one_hot, .. } = self;
        let Some(last) = layers.len().checked_sub(1) else {
            return Ok(());
        };
        let expected = bind_expected(backend, one_hot, expected, output_size)?;
        if let Some(mask) = delta_mask {
            check_dims(mask, output_size)?;
        }

        layers[last].backpropagate_output(backend, cost, expected, delta_mask)?;
        for i in (0..last).rev() {
            let (head, tail) = layers.split_at_mut(i + 1);
            tail[0].propagate_back(backend, head[i].upstream_mut())?;
            head[i].backpropagate_hidden(backend)?;
        }
        Ok(())
    }

    /// Updates every layer from its bound delta, one parameter set per layer.
    pub fn learn(
        &mut self,
        backend: &mut B,
        input: &TensorBuffer<B>,
        params: &[SgdParams],
        mask: LearningMask,
    ) -> NeurotexResult<()> {
        if params.len() != self.layers.len() {
            return Err(NeurotexError::invalid_state(format!(
                "{} learning parameter sets for {} layers",
                params.len(),
                self.layers.len()
            )));
        }
        for i in 0..self.layers.len() {
            let (head, tail) = self.layers.split_at_mut(i);
            let input = if i == 0 { input } else { head[i - 1].output() };
            tail[0].learn(backend, input, &params[i], mask)?;
        }
        Ok(())
    }

    /// Feedforward, backpropagation and update for one sample.
    pub fn train_sample(
        &mut self,
        backend: &mut B,
        sample: &Sample<'_, B>,
        cost: CostFunction,
        params: &[SgdParams],
        mask: LearningMask,
    ) -> NeurotexResult<()> {
        self.feedforward(backend, sample.input, false, Some(sample.expected), sample.clamp_mask)?;
        self.backpropagate(backend, cost, sample.expected, sample.delta_mask)?;
        self.learn(backend, sample.input, params, mask)
    }

    /// Downloads the output of the last feedforward.
    pub fn download_output(&self, backend: &B) -> NeurotexResult<Vec<f32>> {
        self.output_layer()
            .ok_or_else(|| NeurotexError::invalid_state("network has no layers"))?
            .output()
            .download(backend)
    }

    /// Downloads the result of the last feedforward with `want_result`.
    pub fn download_result(&self, backend: &B) -> NeurotexResult<Vec<f32>> {
        self.output_layer()
            .ok_or_else(|| NeurotexError::invalid_state("network has no layers"))?
            .result()
            .download(backend)
    }

    /// Downloads every layer's weights and bias.
    pub fn parameters(&self, backend: &B) -> NeurotexResult<Vec<LayerParameters>> {
        self.layers
            .iter()
            .map(|layer| {
                Ok(LayerParameters {
                    weights: layer.connectivity().weights().download(backend)?,
                    bias: layer.bias().download(backend)?,
                })
            })
            .collect()
    }

    /// Replaces every layer's weights and bias.
    pub fn upload_parameters(&mut self, backend: &mut B, parameters: &[LayerParameters]) -> NeurotexResult<()> {
        if parameters.len() != self.layers.len() {
            return Err(NeurotexError::invalid_state(format!(
                "{} parameter sets for {} layers",
                parameters.len(),
                self.layers.len()
            )));
        }
        for (layer, params) in self.layers.iter_mut().zip(parameters) {
            layer.upload_parameters(backend, &params.weights, &params.bias)?;
        }
        Ok(())
    }

    /// Zeroes every momentum accumulator.
    pub fn reset_momentum(&mut self, backend: &mut B) -> NeurotexResult<()> {
        for layer in &mut self.layers {
            layer.reset_momentum(backend)?;
        }
        Ok(())
    }

    /// Total number of stored parameter values (weights and bias, 4 lanes each).
    pub fn param_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| (l.connectivity().weights().texel_count() + l.bias().texel_count()) * CHANNELS)
            .sum()
    }
}

impl<B: Backend> std::fmt::Debug for Network<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("input_size", &self.config.input_size)
            .field("layers", &self.layers)
            .field("cost", &self.config.cost)
            .field("problem_kind", &self.config.problem_kind)
            .finish()
    }
}

fn check_dims<B: Backend>(tensor: &TensorBuffer<B>, size: usize) -> NeurotexResult<()> {
    if tensor.dims() != (size, size) {
        return Err(NeurotexError::shape_mismatch((size, size), tensor.dims()));
    }
    Ok(())
}

/// Resolves an expected output to a tensor, writing class indices into `one_hot`.
fn bind_expected<'t, B: Backend>(
    backend: &mut B,
    one_hot: &'t mut TensorBuffer<B>,
    expected: Expected<'t, B>,
    size: usize,
) -> NeurotexResult<&'t TensorBuffer<B>> {
    match expected {
        Expected::Tensor(tensor) => {
            check_dims(tensor, size)?;
            Ok(tensor)
        }
        Expected::Class(class) => {
            if class >= size * size {
                return Err(NeurotexError::problem(format!(
                    "class {} does not fit a {}x{} output",
                    class, size, size
                )));
            }
            KernelCall::new(Program::OneHot)
                .int(0, class as i32)
                .run(backend, one_hot)?;
            Ok(one_hot)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::Activation;
    use crate::config::{ConnectivityConfig, LayerConfig};
    use crate::host::HostBackend;

    fn two_layer() -> NetworkConfig {
        NetworkConfig::new(4, ProblemKind::Classification)
            .layer(LayerConfig::new(2, ConnectivityConfig::SquareFast { sparsity: 2 }, Activation::Relu))
            .layer(LayerConfig::new(2, ConnectivityConfig::Full, Activation::Sigmoid))
            .with_seed(3)
    }

    #[test]
    fn test_seeded_build_is_deterministic() {
        let mut backend = HostBackend::new();
        let a = Network::build(&mut backend, two_layer()).unwrap();
        let b = Network::build(&mut backend, two_layer()).unwrap();
        assert_eq!(a.parameters(&backend).unwrap(), b.parameters(&backend).unwrap());
        assert_eq!(a.layers_count(), 2);
        assert!(a.previous(0).is_none());
        assert_eq!(a.next(0).map(|l| l.index()), Some(1));
    }

    #[test]
    fn test_feedforward_rejects_wrong_input() {
        let mut backend = HostBackend::new();
        let mut network = Network::build(&mut backend, two_layer()).unwrap();
        let input = TensorBuffer::square(&mut backend, 3).unwrap();
        let err = network
            .feedforward(&mut backend, &input, false, None, None)
            .unwrap_err();
        assert!(matches!(err, NeurotexError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_class_expected_becomes_one_hot_residual() {
        let mut backend = HostBackend::new();
        let mut network = Network::build(&mut backend, two_layer()).unwrap();
        let input = TensorBuffer::from_data(&mut backend, 4, 4, &[0.5; 64]).unwrap();
        network
            .feedforward(&mut backend, &input, true, None, None)
            .unwrap();
        let output = network.download_output(&backend).unwrap();
        network
            .feedforward(&mut backend, &input, true, Some(Expected::Class(2)), None)
            .unwrap();
        let residual = network.download_result(&backend).unwrap();
        for (i, (r, y)) in residual.iter().zip(&output).enumerate() {
            let one_hot = if i / 4 == 2 { 1.0 } else { 0.0 };
            assert!((r - (y - one_hot)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_training_step_changes_every_layer() {
        let mut backend = HostBackend::new();
        let mut network = Network::build(&mut backend, two_layer()).unwrap();
        let before = network.parameters(&backend).unwrap();
        let input = TensorBuffer::from_data(&mut backend, 4, 4, &[1.0; 64]).unwrap();
        let sample = Sample::new(&input, Expected::Class(1));
        let params = vec![SgdParams::new(0.5); 2];
        network
            .train_sample(&mut backend, &sample, CostFunction::Quadratic, &params, LearningMask::ALL)
            .unwrap();
        let after = network.parameters(&backend).unwrap();
        assert_ne!(before[1].weights, after[1].weights);
        assert_ne!(before[1].bias, after[1].bias);
    }

    #[test]
    fn test_frozen_mask_keeps_parameters() {
        let mut backend = HostBackend::new();
        let mut network = Network::build(&mut backend, two_layer()).unwrap();
        let before = network.parameters(&backend).unwrap();
        let input = TensorBuffer::from_data(&mut backend, 4, 4, &[1.0; 64]).unwrap();
        let sample = Sample::new(&input, Expected::Class(0));
        let params = vec![SgdParams::new(0.5); 2];
        network
            .train_sample(&mut backend, &sample, CostFunction::Quadratic, &params, LearningMask::NONE)
            .unwrap();
        assert_eq!(before, network.parameters(&backend).unwrap());
    }
}
