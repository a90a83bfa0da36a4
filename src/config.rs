//! Network and trainer configuration.
//!
//! This module provides [`NetworkConfig`] (topology and global
//! hyperparameters), [`LayerConfig`] (one layer of the chain) and
//! [`TrainerConfig`] (the options structure driving the minibatch loop).
//!
//! Every kind carried as a string in configuration files (connectivity,
//! activation, cost, problem) parses into a closed enum; unknown strings are
//! rejected with [`ConfigError::UnknownKind`] at construction.
//!
//! # Example
//!
//! ```rust
//! use neurotex::{Activation, ConnectivityConfig, LayerConfig, NetworkConfig, ProblemKind};
//!
//! let config = NetworkConfig::new(8, ProblemKind::Classification)
//!     .layer(LayerConfig::new(4, ConnectivityConfig::SquareFast { sparsity: 2 }, Activation::Relu))
//!     .layer(LayerConfig::new(2, ConnectivityConfig::FullNPoT, Activation::Sigmoid).with_classes(4));
//!
//! config.validate().expect("valid topology");
//! assert_eq!(config.layer_sizes(), vec![8, 4, 2]);
//! ```

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::connectivity::Geometry;
use crate::cost::CostFunction;

/// Default number of minibatches between two test cycles.
pub const DEFAULT_TEST_INTERVAL: usize = 10;

/// Default learning rate.
pub const DEFAULT_LEARNING_RATE: f32 = 0.01;

/// Errors raised while building or validating a configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A kind string (connectivity, activation, cost, problem) is not supported.
    #[error("Unknown {what} kind '{value}'")]
    UnknownKind {
        /// Which kind was being parsed.
        what: &'static str,
        /// The rejected string.
        value: String,
    },

    /// A dimension parameter is invalid.
    #[error("Invalid dimension: {0}")]
    InvalidDimension(Cow<'static, str>),

    /// A layer is incompatible with its neighbours or its own settings.
    #[error("Layer {layer}: {reason}")]
    IncompatibleLayer {
        /// Layer index in the chain.
        layer: usize,
        /// Description of the incompatibility.
        reason: String,
    },

    /// A required field was not supplied.
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    /// A field has an out-of-range value.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an unknown kind error.
    pub fn unknown_kind(what: &'static str, value: &str) -> Self {
        ConfigError::UnknownKind {
            what,
            value: value.to_string(),
        }
    }

    /// Creates a layer incompatibility error.
    pub fn layer<S: Into<String>>(layer: usize, reason: S) -> Self {
        ConfigError::IncompatibleLayer {
            layer,
            reason: reason.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Kind of problem the network solves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProblemKind {
    /// Ground truth is a class index; best test maximizes the success rate.
    #[default]
    Classification,
    /// Ground truth is a tensor; best test minimizes the error.
    Identification,
}

impl ProblemKind {
    /// Name used in configuration and export documents.
    pub fn name(self) -> &'static str {
        match self {
            ProblemKind::Classification => "classification",
            ProblemKind::Identification => "identification",
        }
    }
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProblemKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "classification" => Ok(ProblemKind::Classification),
            "identification" => Ok(ProblemKind::Identification),
            other => Err(ConfigError::unknown_kind("problem", other)),
        }
    }
}

/// Connectivity kind without its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityKind {
    /// One-to-one.
    Direct,
    /// Dense, power-of-two sizes.
    Full,
    /// Dense, any sizes.
    FullNPoT,
    /// Window per neuron through index tensors.
    Square,
    /// Window per neuron with arithmetic addressing.
    SquareFast,
    /// Shared kernel bank.
    Convolutional,
}

impl ConnectivityKind {
    /// Name used in configuration and export documents.
    pub fn name(self) -> &'static str {
        match self {
            ConnectivityKind::Direct => "direct",
            ConnectivityKind::Full => "full",
            ConnectivityKind::FullNPoT => "fullNPoT",
            ConnectivityKind::Square => "square",
            ConnectivityKind::SquareFast => "squareFast",
            ConnectivityKind::Convolutional => "conv",
        }
    }

    /// Whether the kind connects every input to every output.
    pub fn is_dense(self) -> bool {
        matches!(self, ConnectivityKind::Full | ConnectivityKind::FullNPoT)
    }
}

impl fmt::Display for ConnectivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConnectivityKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(ConnectivityKind::Direct),
            "full" => Ok(ConnectivityKind::Full),
            "fullNPoT" => Ok(ConnectivityKind::FullNPoT),
            "square" => Ok(ConnectivityKind::Square),
            "squareFast" => Ok(ConnectivityKind::SquareFast),
            "conv" | "convolutional" => Ok(ConnectivityKind::Convolutional),
            other => Err(ConfigError::unknown_kind("connectivity", other)),
        }
    }
}

/// Connectivity of a layer with its kind-specific parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ConnectivityConfig {
    /// One-to-one, previous size must equal this layer's size.
    #[serde(rename = "direct")]
    Direct,
    /// Dense with mip-reduced sums; both sizes must be powers of two.
    #[serde(rename = "full")]
    Full,
    /// Dense with looping sums; any sizes.
    #[serde(rename = "fullNPoT")]
    FullNPoT,
    /// Each neuron reads a `sparsity × sparsity` window through index tensors.
    #[serde(rename = "square")]
    Square {
        /// Window side.
        sparsity: usize,
    },
    /// Same window, addressed arithmetically; previous size must be a multiple.
    #[serde(rename = "squareFast")]
    SquareFast {
        /// Window side.
        sparsity: usize,
    },
    /// `kernels_count` shared kernels of side `sparsity`.
    #[serde(rename = "conv", alias = "convolutional")]
    Convolutional {
        /// Kernel side.
        sparsity: usize,
        /// Number of kernels, a perfect square.
        #[serde(rename = "kernelsCount")]
        kernels_count: usize,
    },
}

impl ConnectivityConfig {
    /// Returns the kind without parameters.
    pub fn kind(&self) -> ConnectivityKind {
        match self {
            ConnectivityConfig::Direct => ConnectivityKind::Direct,
            ConnectivityConfig::Full => ConnectivityKind::Full,
            ConnectivityConfig::FullNPoT => ConnectivityKind::FullNPoT,
            ConnectivityConfig::Square { .. } => ConnectivityKind::Square,
            ConnectivityConfig::SquareFast { .. } => ConnectivityKind::SquareFast,
            ConnectivityConfig::Convolutional { .. } => ConnectivityKind::Convolutional,
        }
    }

    /// Builds a connectivity from its kind string and parameters.
    ///
    /// `sparsity` and `kernels_count` are ignored by kinds that have none.
    pub fn from_parts(
        kind: &str,
        sparsity: Option<usize>,
        kernels_count: Option<usize>,
    ) -> Result<Self, ConfigError> {
        let kind: ConnectivityKind = kind.parse()?;
        let sparsity = || sparsity.ok_or(ConfigError::MissingField("sparsity"));
        Ok(match kind {
            ConnectivityKind::Direct => ConnectivityConfig::Direct,
            ConnectivityKind::Full => ConnectivityConfig::Full,
            ConnectivityKind::FullNPoT => ConnectivityConfig::FullNPoT,
            ConnectivityKind::Square => ConnectivityConfig::Square {
                sparsity: sparsity()?,
            },
            ConnectivityKind::SquareFast => ConnectivityConfig::SquareFast {
                sparsity: sparsity()?,
            },
            ConnectivityKind::Convolutional => ConnectivityConfig::Convolutional {
                sparsity: sparsity()?,
                kernels_count: kernels_count.ok_or(ConfigError::MissingField("kernelsCount"))?,
            },
        })
    }
}

/// Clamp applied to the output layer after activation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClampConfig {
    /// Lower bound.
    pub min: f32,
    /// Upper bound.
    pub max: f32,
    /// When true, only texels where the sample's clamp mask is above 0.5 are clamped.
    #[serde(default)]
    pub masked: bool,
}

impl ClampConfig {
    /// Clamp every output texel to `[min, max]`.
    pub fn fixed(min: f32, max: f32) -> Self {
        Self {
            min,
            max,
            masked: false,
        }
    }

    /// Clamp only where the clamp mask is set.
    pub fn masked(min: f32, max: f32) -> Self {
        Self {
            min,
            max,
            masked: true,
        }
    }
}

/// One layer of the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerConfig {
    /// Side length of the output grid.
    pub size: usize,
    /// Activation applied to the weighted sum.
    #[serde(default)]
    pub activation: Activation,
    /// How the previous layer feeds this one.
    pub connectivity: ConnectivityConfig,
    /// Max-pooling factor; the connectivity targets `size · factor`.
    #[serde(default)]
    pub max_pooling: Option<usize>,
    /// Output layer only: clamp range.
    #[serde(default)]
    pub clamp: Option<ClampConfig>,
    /// Output layer only: divide the output by `size²`.
    #[serde(default)]
    pub normalize: bool,
    /// Output layer only: number of classes for classification problems.
    #[serde(default)]
    pub classes_count: Option<usize>,
}

impl LayerConfig {
    /// Creates a layer with no pooling and no output flags.
    pub fn new(size: usize, connectivity: ConnectivityConfig, activation: Activation) -> Self {
        Self {
            size,
            activation,
            connectivity,
            max_pooling: None,
            clamp: None,
            normalize: false,
            classes_count: None,
        }
    }

    /// Sets the max-pooling factor.
    pub fn with_max_pooling(mut self, factor: usize) -> Self {
        self.max_pooling = Some(factor);
        self
    }

    /// Sets the output clamp.
    pub fn with_clamp(mut self, clamp: ClampConfig) -> Self {
        self.clamp = Some(clamp);
        self
    }

    /// Enables output normalization.
    pub fn normalized(mut self) -> Self {
        self.normalize = true;
        self
    }

    /// Sets the number of classes.
    pub fn with_classes(mut self, classes_count: usize) -> Self {
        self.classes_count = Some(classes_count);
        self
    }

    /// Pooling factor, 1 when pooling is off.
    #[inline]
    pub fn pooling_factor(&self) -> usize {
        self.max_pooling.unwrap_or(1)
    }

    /// Side of the grid the connectivity writes (before pooling).
    #[inline]
    pub fn pre_pool_size(&self) -> usize {
        self.size * self.pooling_factor()
    }
}

/// Network topology and global hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Side of the input tensor fed to layer 0.
    pub input_size: usize,
    /// Layers in order; the last one is the output layer.
    pub layers: Vec<LayerConfig>,
    /// Cost function used by backpropagation.
    #[serde(default)]
    pub cost: CostFunction,
    /// Problem kind; selects the evaluation policy.
    #[serde(default)]
    pub problem_kind: ProblemKind,
    /// Optional seed for deterministic weight initialization (None => random).
    #[serde(default)]
    pub init_seed: Option<u64>,
}

impl NetworkConfig {
    /// Creates an empty network configuration.
    pub fn new(input_size: usize, problem_kind: ProblemKind) -> Self {
        Self {
            input_size,
            layers: Vec::new(),
            cost: CostFunction::default(),
            problem_kind,
            init_seed: None,
        }
    }

    /// Appends a layer.
    pub fn layer(mut self, layer: LayerConfig) -> Self {
        self.layers.push(layer);
        self
    }

    /// Sets the cost function.
    pub fn with_cost(mut self, cost: CostFunction) -> Self {
        self.cost = cost;
        self
    }

    /// Sets the initialization seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.init_seed = Some(seed);
        self
    }

    /// Returns `[input_size, layer sizes...]`.
    pub fn layer_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.layers.len() + 1);
        sizes.push(self.input_size);
        sizes.extend(self.layers.iter().map(|l| l.size));
        sizes
    }

    /// Returns the size feeding layer `index`.
    pub fn from_size(&self, index: usize) -> usize {
        if index == 0 {
            self.input_size
        } else {
            self.layers[index - 1].size
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - the input size is zero or there are no layers
    /// - a layer has zero size or a zero pooling factor
    /// - pooling, clamp, normalize or classes are set where they are not allowed
    /// - a connectivity's geometry is incompatible with its neighbours
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_size == 0 {
            return Err(ConfigError::InvalidDimension(Cow::Borrowed(
                "input_size must be > 0",
            )));
        }
        if self.layers.is_empty() {
            return Err(ConfigError::InvalidDimension(Cow::Borrowed(
                "network needs at least one layer",
            )));
        }

        let last = self.layers.len() - 1;
        for (index, layer) in self.layers.iter().enumerate() {
            if layer.size == 0 {
                return Err(ConfigError::layer(index, "size must be > 0"));
            }
            if layer.max_pooling == Some(0) {
                return Err(ConfigError::layer(index, "max pooling factor must be > 0"));
            }
            if index == last {
                if layer.pooling_factor() > 1 {
                    return Err(ConfigError::layer(
                        index,
                        "max pooling is not supported on the output layer",
                    ));
                }
                if let Some(clamp) = layer.clamp {
                    if !(clamp.min < clamp.max) {
                        return Err(ConfigError::layer(index, "clamp min must be < max"));
                    }
                }
                if let Some(classes) = layer.classes_count {
                    if classes == 0 || classes > layer.size * layer.size {
                        return Err(ConfigError::layer(
                            index,
                            format!(
                                "classes count {} must be in 1..={}",
                                classes,
                                layer.size * layer.size
                            ),
                        ));
                    }
                }
            } else if layer.clamp.is_some() || layer.normalize || layer.classes_count.is_some() {
                return Err(ConfigError::layer(
                    index,
                    "clamp, normalize and classes count are output layer options",
                ));
            }

            let next_kind = self.layers.get(index + 1).map(|l| l.connectivity.kind());
            Geometry::resolve(
                &layer.connectivity,
                self.from_size(index),
                layer.pre_pool_size(),
                layer.pooling_factor(),
                next_kind,
            )
            .map_err(|reason| ConfigError::layer(index, reason))?;
        }

        Ok(())
    }

    /// Returns the output layer configuration.
    pub fn output_layer(&self) -> Option<&LayerConfig> {
        self.layers.last()
    }
}

/// Learning rate: one value for every layer or one per layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LearningRate {
    /// Same rate everywhere.
    Scalar(f32),
    /// One rate per layer, in chain order.
    PerLayer(Vec<f32>),
}

impl Default for LearningRate {
    fn default() -> Self {
        LearningRate::Scalar(DEFAULT_LEARNING_RATE)
    }
}

impl LearningRate {
    /// Rate for layer `index`.
    pub fn for_layer(&self, index: usize) -> f32 {
        match self {
            LearningRate::Scalar(rate) => *rate,
            LearningRate::PerLayer(rates) => rates[index.min(rates.len().saturating_sub(1))],
        }
    }

    /// Expands the rate into one value per layer.
    pub fn expand(&self, layers_count: usize) -> Result<Vec<f32>, ConfigError> {
        if let LearningRate::PerLayer(rates) = self {
            if rates.len() != layers_count {
                return Err(ConfigError::invalid(
                    "SGDLearningRate",
                    format!("{} rates for {} layers", rates.len(), layers_count),
                ));
            }
        }
        Ok((0..layers_count).map(|i| self.for_layer(i)).collect())
    }
}

/// Options of the training loop.
///
/// Serialized field names are the camelCase option keys (`minibatchSize`,
/// `SGDLearningRate`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Samples per test cycle; `None` asks the problem provider.
    #[serde(rename = "testsCount")]
    pub tests_count: Option<usize>,
    /// Minibatches between two test cycles.
    #[serde(rename = "testMinibatchsInterval")]
    pub test_minibatchs_interval: usize,
    /// Run a test cycle before the first minibatch.
    #[serde(rename = "testFirst")]
    pub test_first: bool,
    /// Samples per minibatch.
    #[serde(rename = "minibatchSize")]
    pub minibatch_size: usize,
    /// Pause automatically after this many test cycles.
    #[serde(rename = "pauseAfterNTests")]
    pub pause_after_n_tests: Option<usize>,
    /// Finish after this many minibatches.
    #[serde(rename = "stopAfterMinibatchsCount")]
    pub stop_after_minibatchs_count: Option<usize>,
    /// Delay between two minibatches, in milliseconds.
    #[serde(rename = "delayBetweenMinibatchs")]
    pub delay_between_minibatchs: u64,
    /// Overrides the network's cost function.
    pub cost: Option<CostFunction>,
    /// L2 weight decay applied every update.
    #[serde(rename = "l2Decay")]
    pub l2_decay: f32,
    /// Base learning rate.
    #[serde(rename = "SGDLearningRate")]
    pub sgd_learning_rate: LearningRate,
    /// Multiplier applied to every layer's rate.
    #[serde(rename = "SGDLearningRateFactor")]
    pub sgd_learning_rate_factor: f32,
    /// Momentum coefficient in `[0, 1)`.
    #[serde(rename = "SGDMomentum")]
    pub sgd_momentum: f32,
    /// Half-life of the learning rate, in minibatches.
    #[serde(rename = "SGDLearningRatePeriod")]
    pub sgd_learning_rate_period: Option<f32>,
    /// Send monitoring notifications to observers.
    #[serde(rename = "enableUI")]
    pub enable_ui: bool,
    /// Log each test result at info level.
    pub display: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            tests_count: None,
            test_minibatchs_interval: DEFAULT_TEST_INTERVAL,
            test_first: false,
            minibatch_size: 1,
            pause_after_n_tests: None,
            stop_after_minibatchs_count: None,
            delay_between_minibatchs: 0,
            cost: None,
            l2_decay: 0.0,
            sgd_learning_rate: LearningRate::default(),
            sgd_learning_rate_factor: 1.0,
            sgd_momentum: 0.0,
            sgd_learning_rate_period: None,
            enable_ui: false,
            display: false,
        }
    }
}

impl TrainerConfig {
    /// Validates the options.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.minibatch_size == 0 {
            return Err(ConfigError::invalid("minibatchSize", "must be > 0"));
        }
        if self.test_minibatchs_interval == 0 {
            return Err(ConfigError::invalid("testMinibatchsInterval", "must be > 0"));
        }
        if !(self.l2_decay.is_finite() && (0.0..1.0).contains(&self.l2_decay)) {
            return Err(ConfigError::invalid("l2Decay", "must be in [0, 1)"));
        }
        if !(self.sgd_momentum.is_finite() && (0.0..1.0).contains(&self.sgd_momentum)) {
            return Err(ConfigError::invalid("SGDMomentum", "must be in [0, 1)"));
        }
        if !(self.sgd_learning_rate_factor.is_finite() && self.sgd_learning_rate_factor > 0.0) {
            return Err(ConfigError::invalid("SGDLearningRateFactor", "must be > 0"));
        }
        if let Some(period) = self.sgd_learning_rate_period {
            if !(period.is_finite() && period > 0.0) {
                return Err(ConfigError::invalid("SGDLearningRatePeriod", "must be > 0"));
            }
        }
        let rates: &[f32] = match &self.sgd_learning_rate {
            LearningRate::Scalar(rate) => std::slice::from_ref(rate),
            LearningRate::PerLayer(rates) => rates,
        };
        if rates.is_empty() || rates.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err(ConfigError::invalid(
                "SGDLearningRate",
                "rates must be finite and >= 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_network() -> NetworkConfig {
        NetworkConfig::new(4, ProblemKind::Identification)
            .layer(LayerConfig::new(4, ConnectivityConfig::Direct, Activation::Linear))
    }

    #[test]
    fn test_default_trainer_config() {
        assert!(TrainerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_simple_network_valid() {
        assert!(simple_network().validate().is_ok());
        assert_eq!(simple_network().layer_sizes(), vec![4, 4]);
    }

    #[test]
    fn test_unknown_connectivity_rejected() {
        let err = ConnectivityConfig::from_parts("spiral", None, None).unwrap_err();
        assert_eq!(err, ConfigError::unknown_kind("connectivity", "spiral"));
    }

    #[test]
    fn test_unknown_problem_rejected() {
        assert!("regression".parse::<ProblemKind>().is_err());
    }

    #[test]
    fn test_conv_requires_kernels_count() {
        let err = ConnectivityConfig::from_parts("conv", Some(3), None).unwrap_err();
        assert_eq!(err, ConfigError::MissingField("kernelsCount"));
    }

    #[test]
    fn test_pooling_on_output_rejected() {
        let config = NetworkConfig::new(8, ProblemKind::Classification).layer(
            LayerConfig::new(4, ConnectivityConfig::FullNPoT, Activation::Sigmoid)
                .with_max_pooling(2),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IncompatibleLayer { layer: 0, .. })
        ));
    }

    #[test]
    fn test_classes_count_bounded_by_grid() {
        let config = NetworkConfig::new(4, ProblemKind::Classification).layer(
            LayerConfig::new(2, ConnectivityConfig::FullNPoT, Activation::Sigmoid)
                .with_classes(5),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_output_flags_on_hidden_rejected() {
        let config = NetworkConfig::new(4, ProblemKind::Identification)
            .layer(LayerConfig::new(4, ConnectivityConfig::Direct, Activation::Relu).normalized())
            .layer(LayerConfig::new(4, ConnectivityConfig::Direct, Activation::Linear));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_direct_size_mismatch_rejected() {
        let config = NetworkConfig::new(4, ProblemKind::Identification)
            .layer(LayerConfig::new(2, ConnectivityConfig::Direct, Activation::Linear));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_learning_rate_expand() {
        assert_eq!(LearningRate::Scalar(0.1).expand(3).unwrap(), vec![0.1; 3]);
        assert_eq!(
            LearningRate::PerLayer(vec![0.1, 0.2]).expand(2).unwrap(),
            vec![0.1, 0.2]
        );
        assert!(LearningRate::PerLayer(vec![0.1]).expand(2).is_err());
    }

    #[test]
    fn test_trainer_config_json_names() {
        let json = r#"{
            "testsCount": 20,
            "minibatchSize": 8,
            "SGDLearningRate": [0.1, 0.05],
            "SGDMomentum": 0.5,
            "SGDLearningRatePeriod": 100,
            "cost": "cross-entropy",
            "enableUI": true
        }"#;
        let config: TrainerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.tests_count, Some(20));
        assert_eq!(config.minibatch_size, 8);
        assert_eq!(config.sgd_learning_rate, LearningRate::PerLayer(vec![0.1, 0.05]));
        assert_eq!(config.cost, Some(CostFunction::CrossEntropy));
        assert_eq!(config.sgd_learning_rate_period, Some(100.0));
        assert!(config.enable_ui);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_momentum_rejected() {
        let config = TrainerConfig {
            sgd_momentum: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_network_config_json() {
        let json = r#"{
            "inputSize": 8,
            "problemKind": "classification",
            "layers": [
                {"size": 4, "activation": "relu", "connectivity": {"kind": "squareFast", "sparsity": 2}},
                {"size": 2, "activation": "sigmoid", "connectivity": {"kind": "fullNPoT"}, "classesCount": 3}
            ]
        }"#;
        let config: NetworkConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.layers.len(), 2);
        assert_eq!(
            config.layers[0].connectivity,
            ConnectivityConfig::SquareFast { sparsity: 2 }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_network_config_unknown_kind_json() {
        let json = r#"{
            "inputSize": 8,
            "layers": [{"size": 4, "connectivity": {"kind": "spiral"}}]
        }"#;
        assert!(serde_json::from_str::<NetworkConfig>(json).is_err());
    }
}
