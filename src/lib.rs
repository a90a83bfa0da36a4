//! # neurotex - GPU-resident micro training engine
//!
//! Small, fixed-topology neural networks whose every tensor is a 2D,
//! 4-channel buffer and whose every computation is a named compute kernel.
//!
//! ## Architecture
//! - [`TensorBuffer`]: the only storage primitive (float or byte, optional mips)
//! - [`KernelCall`] / [`dispatch`]: the only computation primitive, validated per call
//! - [`Connectivity`]: Direct, Full, FullNPoT, Square, SquareFast, Convolutional
//! - [`Layer`] and [`Network`]: feedforward, backpropagation, SGD updates
//! - [`TrainerContext`]: minibatch loop, test cycles, decay, run-state machine
//! - [`NetworkDocument`]: JSON / bincode export, optionally quantized
//!
//! Kernels run on a [`Backend`]: [`HostBackend`] emulates the dispatch
//! model on the CPU, `gpu::WgpuBackend` (feature `gpu`) runs WGSL pipelines.
//!
//! ## Usage
//! ```rust,no_run
//! use neurotex::{
//!     Activation, ConnectivityConfig, HostBackend, IdentificationProblem, IdentificationSample,
//!     LayerConfig, NetworkConfig, ProblemKind, TrainerBuilder, TrainerConfig,
//! };
//!
//! let network = NetworkConfig::new(2, ProblemKind::Identification)
//!     .layer(LayerConfig::new(2, ConnectivityConfig::Full, Activation::Sigmoid));
//! let mut problem = IdentificationProblem::new(1e-3);
//! problem.add_training(IdentificationSample::new(vec![0.5; 16], vec![0.25; 16]));
//!
//! let mut trainer = TrainerBuilder::new(HostBackend::new())
//!     .network(network)
//!     .problem(problem)
//!     .config(TrainerConfig {
//!         stop_after_minibatchs_count: Some(100),
//!         ..TrainerConfig::default()
//!     })
//!     .build()?;
//! trainer.run()?;
//! # Ok::<(), neurotex::NeurotexError>(())
//! ```

pub mod activation;
pub mod backend;
pub mod config;
pub mod connectivity;
pub mod cost;
pub mod error;
pub mod evaluator;
pub mod host;
pub mod kernel;
pub mod layer;
pub mod network;
pub mod observer;
pub mod optimizer;
pub mod problem;
pub mod serializer;
pub mod tensor;
pub mod trainer;

#[cfg(feature = "gpu")]
pub mod gpu;

// Re-exports
pub use activation::Activation;
pub use backend::{Backend, BufferDesc};
pub use config::{
    ClampConfig, ConfigError, ConnectivityConfig, ConnectivityKind, LayerConfig, LearningRate, NetworkConfig,
    ProblemKind, TrainerConfig,
};
pub use connectivity::{Connectivity, Geometry};
pub use cost::CostFunction;
pub use error::{NeurotexError, NeurotexResult};
pub use evaluator::{Evaluator, LearningPoint, TestRecord, TestResult};
pub use host::HostBackend;
pub use kernel::{dispatch, KernelCall, Program, Uniforms};
pub use layer::Layer;
pub use network::{LayerParameters, Network};
pub use observer::{LogObserver, MinibatchProgress, TrainerObserver};
pub use optimizer::{ConstantRate, HalfLifeDecay, LearningMask, LrScheduler, SgdParams};
pub use problem::{
    ClassificationProblem, EvaluationType, Expected, IdentificationProblem, IdentificationSample, ProblemProvider,
    Sample, TestEvaluation,
};
pub use serializer::{
    export_network, import_network, ConnectivityRecord, ExportOptions, LayerRecord, NetworkDocument, TensorData,
    DOCUMENT_VERSION, TRAINER_APP,
};
pub use tensor::{PingPong, StorageMode, TensorBuffer, Texel, CHANNELS};
pub use trainer::{NetworkSource, PauseHandle, RunState, TrainerBuilder, TrainerContext, TrainingInfos};

#[cfg(feature = "gpu")]
pub use gpu::{WgpuBackend, WgpuOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
