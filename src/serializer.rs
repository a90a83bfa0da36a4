//! Export and import of networks.
//!
//! A [`NetworkDocument`] carries the topology, every layer's weights and bias
//! and, when exported from a trainer, its [`TrainingInfos`]. Connectivity
//! records are tagged by kind, each variant with exactly its own parameters.
//!
//! Tensor payloads are either [`TensorData::Raw`] (bit-exact: f32 widened to
//! f64 so JSON round trips do not re-round) or [`TensorData::Quantized`]
//! (`i8` per value with `scale = 127 / max|v|`, reconstruction error at most
//! `0.5 / scale`).
//!
//! Two encodings: JSON ([`NetworkDocument::to_json`]) and bincode
//! ([`NetworkDocument::to_bytes`]).

use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::backend::Backend;
use crate::config::{ClampConfig, ConfigError, ConnectivityConfig, LayerConfig, NetworkConfig, ProblemKind};
use crate::cost::CostFunction;
use crate::error::{NeurotexError, NeurotexResult};
use crate::network::{LayerParameters, Network};
use crate::trainer::TrainingInfos;

/// Application name written into every document.
pub const TRAINER_APP: &str = "neurotex";

/// Document layout version; imports of any other version are rejected.
pub const DOCUMENT_VERSION: u32 = 1;

/// A tensor's values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorData {
    /// Exact values.
    #[serde(rename = "raw")]
    Raw(Vec<f64>),
    /// Lossy `i8` values; `value = q / scale`.
    #[serde(rename = "quantized")]
    Quantized {
        /// Quantization scale.
        scale: f32,
        /// Quantized values.
        values: Vec<i8>,
    },
}

impl TensorData {
    /// Encodes `values`, quantized or exact.
    pub fn encode(values: &[f32], quantize: bool) -> Self {
        if !quantize {
            return TensorData::Raw(values.iter().map(|&v| f64::from(v)).collect());
        }
        let max_abs = values.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        let scale = if max_abs > 0.0 { 127.0 / max_abs } else { 1.0 };
        TensorData::Quantized {
            scale,
            values: values
                .iter()
                .map(|&v| (v * scale).round().clamp(-127.0, 127.0) as i8)
                .collect(),
        }
    }

    /// Decoded values.
    pub fn decode(&self) -> Vec<f32> {
        match self {
            TensorData::Raw(values) => values.iter().map(|&v| v as f32).collect(),
            TensorData::Quantized { scale, values } => values.iter().map(|&q| f32::from(q) / scale).collect(),
        }
    }

    /// Largest reconstruction error of a value.
    pub fn tolerance(&self) -> f32 {
        match self {
            TensorData::Raw(_) => 0.0,
            TensorData::Quantized { scale, .. } => 0.5 / scale,
        }
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        match self {
            TensorData::Raw(values) => values.len(),
            TensorData::Quantized { values, .. } => values.len(),
        }
    }

    /// Whether there are no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Connectivity kind, its parameters and its weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectivityRecord {
    /// One-to-one.
    #[serde(rename = "direct")]
    Direct {
        /// Weights.
        weights: TensorData,
    },
    /// Dense, mip-reduced.
    #[serde(rename = "full")]
    Full {
        /// Weights.
        weights: TensorData,
    },
    /// Dense, looping.
    #[serde(rename = "fullNPoT")]
    FullNPoT {
        /// Weights.
        weights: TensorData,
    },
    /// Window via index tensors.
    #[serde(rename = "square")]
    Square {
        /// Window side.
        sparsity: usize,
        /// Weights.
        weights: TensorData,
    },
    /// Window, arithmetic addressing.
    #[serde(rename = "squareFast")]
    SquareFast {
        /// Window side.
        sparsity: usize,
        /// Weights.
        weights: TensorData,
    },
    /// Shared kernel bank.
    #[serde(rename = "conv", rename_all = "camelCase")]
    Convolutional {
        /// Kernel side.
        sparsity: usize,
        /// Number of kernels.
        kernels_count: usize,
        /// Output was reorganized into tiled layout.
        is_reorganize: bool,
        /// Kernel weights.
        weights: TensorData,
    },
}

impl ConnectivityRecord {
    fn new(config: &ConnectivityConfig, weights: TensorData, is_reorganize: bool) -> Self {
        match *config {
            ConnectivityConfig::Direct => ConnectivityRecord::Direct { weights },
            ConnectivityConfig::Full => ConnectivityRecord::Full { weights },
            ConnectivityConfig::FullNPoT => ConnectivityRecord::FullNPoT { weights },
            ConnectivityConfig::Square { sparsity } => ConnectivityRecord::Square { sparsity, weights },
            ConnectivityConfig::SquareFast { sparsity } => ConnectivityRecord::SquareFast { sparsity, weights },
            ConnectivityConfig::Convolutional {
                sparsity,
                kernels_count,
            } => ConnectivityRecord::Convolutional {
                sparsity,
                kernels_count,
                is_reorganize,
                weights,
            },
        }
    }

    /// Connectivity configuration.
    pub fn config(&self) -> ConnectivityConfig {
        match *self {
            ConnectivityRecord::Direct { .. } => ConnectivityConfig::Direct,
            ConnectivityRecord::Full { .. } => ConnectivityConfig::Full,
            ConnectivityRecord::FullNPoT { .. } => ConnectivityConfig::FullNPoT,
            ConnectivityRecord::Square { sparsity, .. } => ConnectivityConfig::Square { sparsity },
            ConnectivityRecord::SquareFast { sparsity, .. } => ConnectivityConfig::SquareFast { sparsity },
            ConnectivityRecord::Convolutional {
                sparsity,
                kernels_count,
                ..
            } => ConnectivityConfig::Convolutional {
                sparsity,
                kernels_count,
            },
        }
    }

    /// Weights payload.
    pub fn weights(&self) -> &TensorData {
        match self {
            ConnectivityRecord::Direct { weights }
            | ConnectivityRecord::Full { weights }
            | ConnectivityRecord::FullNPoT { weights }
            | ConnectivityRecord::Square { weights, .. }
            | ConnectivityRecord::SquareFast { weights, .. }
            | ConnectivityRecord::Convolutional { weights, .. } => weights,
        }
    }

    /// Stored reorganization flag (false for non-convolutional kinds).
    pub fn is_reorganize(&self) -> bool {
        matches!(
            self,
            ConnectivityRecord::Convolutional {
                is_reorganize: true,
                ..
            }
        )
    }
}

/// One exported layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerRecord {
    /// Output side.
    pub size: usize,
    /// Activation.
    pub activation: Activation,
    /// Connectivity with its weights.
    pub connectivity: ConnectivityRecord,
    /// Bias (`T × T`).
    pub bias: TensorData,
    /// Output layer only: number of classes.
    #[serde(default)]
    pub classes_count: Option<usize>,
    /// Output layer only: divide by `size²`.
    #[serde(default)]
    pub normalize: bool,
    /// Max-pooling factor.
    #[serde(default)]
    pub max_pooling: Option<usize>,
    /// Output layer only: clamp.
    #[serde(default)]
    pub clamp: Option<ClampConfig>,
}

impl LayerRecord {
    /// Layer configuration.
    pub fn config(&self) -> LayerConfig {
        LayerConfig {
            size: self.size,
            activation: self.activation,
            connectivity: self.connectivity.config(),
            max_pooling: self.max_pooling,
            clamp: self.clamp,
            normalize: self.normalize,
            classes_count: self.classes_count,
        }
    }
}

/// Export options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportOptions {
    /// Quantize weights and bias to `i8`.
    pub quantize: bool,
}

/// Exported network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDocument {
    /// Exporting application.
    pub trainer_app: String,
    /// Exporting application version.
    pub trainer_version: String,
    /// Layout version.
    pub document_version: u32,
    /// Input side.
    pub input_size: usize,
    /// Cost function.
    pub cost: CostFunction,
    /// Problem kind.
    pub problem_kind: ProblemKind,
    /// Trainer progress at export time.
    #[serde(default)]
    pub training_infos: Option<TrainingInfos>,
    /// Layers in order.
    pub layers: Vec<LayerRecord>,
}

impl NetworkDocument {
    /// Network configuration described by the document.
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            input_size: self.input_size,
            layers: self.layers.iter().map(LayerRecord::config).collect(),
            cost: self.cost,
            problem_kind: self.problem_kind,
            init_seed: None,
        }
    }

    /// Decoded weights and bias of every layer.
    pub fn parameters(&self) -> Vec<LayerParameters> {
        self.layers
            .iter()
            .map(|l| LayerParameters {
                weights: l.connectivity.weights().decode(),
                bias: l.bias.decode(),
            })
            .collect()
    }

    /// Fails unless the document was written with this layout version.
    pub fn check_version(&self) -> NeurotexResult<()> {
        if self.document_version != DOCUMENT_VERSION {
            return Err(NeurotexError::incompatible_version(DOCUMENT_VERSION, self.document_version));
        }
        if self.trainer_app != TRAINER_APP {
            log::warn!("importing a document written by '{}'", self.trainer_app);
        }
        Ok(())
    }

    /// Compact JSON.
    pub fn to_json(&self) -> NeurotexResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Indented JSON.
    pub fn to_json_pretty(&self) -> NeurotexResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses JSON.
    pub fn from_json(json: &str) -> NeurotexResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Bincode encoding.
    pub fn to_bytes(&self) -> NeurotexResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Parses a bincode encoding.
    pub fn from_bytes(bytes: &[u8]) -> NeurotexResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Downloads a network into a document.
pub fn export_network<B: Backend>(
    backend: &B,
    network: &Network<B>,
    training_infos: Option<TrainingInfos>,
    options: ExportOptions,
) -> NeurotexResult<NetworkDocument> {
    let config = network.config();
    let layers = network
        .layers()
        .iter()
        .map(|layer| {
            let connectivity = layer.connectivity();
            let weights = TensorData::encode(&connectivity.weights().download(backend)?, options.quantize);
            let lc = layer.config();
            Ok(LayerRecord {
                size: lc.size,
                activation: lc.activation,
                connectivity: ConnectivityRecord::new(&lc.connectivity, weights, connectivity.geometry().reorganize),
                bias: TensorData::encode(&layer.bias().download(backend)?, options.quantize),
                classes_count: lc.classes_count,
                normalize: lc.normalize,
                max_pooling: lc.max_pooling,
                clamp: lc.clamp,
            })
        })
        .collect::<NeurotexResult<Vec<_>>>()?;

    log::debug!(
        "exported {} layers (quantized: {})",
        layers.len(),
        options.quantize
    );
    Ok(NetworkDocument {
        trainer_app: TRAINER_APP.to_string(),
        trainer_version: crate::VERSION.to_string(),
        document_version: DOCUMENT_VERSION,
        input_size: config.input_size,
        cost: config.cost,
        problem_kind: config.problem_kind,
        training_infos,
        layers,
    })
}

/// Rebuilds a network from a document and uploads its parameters.
pub fn import_network<B: Backend>(backend: &mut B, document: &NetworkDocument) -> NeurotexResult<Network<B>> {
    document.check_version()?;
    let network = Network::from_parameters(backend, document.network_config(), &document.parameters())?;
    for (index, (layer, record)) in network.layers().iter().zip(&document.layers).enumerate() {
        if layer.connectivity().geometry().reorganize != record.connectivity.is_reorganize() {
            return Err(ConfigError::layer(index, "stored isReorganize does not match the topology").into());
        }
    }
    Ok(network)
}
