//! Unified error types for neurotex.
//!
//! This module provides [`NeurotexError`], a unified error type that covers
//! configuration, dispatch, training and serialization failures on every
//! backend. It uses the `thiserror` crate for ergonomic error handling.
//!
//! # Failure model
//!
//! - Construction-time problems (unknown kinds, incompatible sizes, missing
//!   trainer inputs) are [`NeurotexError::Config`] and are never recovered.
//! - Numeric assertions on kernel uniforms fail fast with
//!   [`NeurotexError::InvalidUniform`] before anything is dispatched.
//! - Losing the backend context is [`NeurotexError::ContextLost`]; the trainer
//!   moves to its `Error` state and the engine must be rebuilt.
//!
//! # Example
//!
//! ```rust
//! use neurotex::NeurotexError;
//!
//! fn validate_size(expected: (usize, usize), got: (usize, usize)) -> Result<(), NeurotexError> {
//!     if expected != got {
//!         return Err(NeurotexError::shape_mismatch(expected, got));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::config::ConfigError;

/// Unified error type for neurotex operations.
///
/// GPU-specific variants are only available when the `gpu` feature is enabled.
#[derive(Error, Debug)]
pub enum NeurotexError {
    /// Configuration error, raised synchronously at construction.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Tensor dimensions do not match what the operation expects.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected (width, height).
        expected: (usize, usize),
        /// Actual (width, height).
        got: (usize, usize),
    },

    /// Host data length does not match the tensor texel count.
    #[error("Data length mismatch: expected {expected} floats, got {got}")]
    DataLength {
        /// Expected number of floats (texels × 4).
        expected: usize,
        /// Number of floats supplied.
        got: usize,
    },

    /// A kernel uniform is missing or NaN.
    #[error("Invalid uniform {slot} for kernel '{program}': {reason}")]
    InvalidUniform {
        /// Kernel program name.
        program: &'static str,
        /// Uniform slot index.
        slot: usize,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// A kernel was bound with the wrong number of inputs.
    #[error("Kernel '{program}' expects {expected} inputs, got {got}")]
    BindingCount {
        /// Kernel program name.
        program: &'static str,
        /// Number of inputs the program samples.
        expected: usize,
        /// Number of inputs bound.
        got: usize,
    },

    /// A byte (display) buffer was used as the target of a numeric kernel.
    #[error("Kernel '{0}' cannot write numeric data into a byte buffer")]
    ChannelSemantics(&'static str),

    /// A mip level was bound that the tensor does not have.
    #[error("Mip level {level} requested but tensor only has {available} levels")]
    MissingMipLevel {
        /// Requested level.
        level: usize,
        /// Levels available (level 0 included).
        available: usize,
    },

    /// The backend context was lost. Unrecoverable: rebuild the engine.
    #[error("Backend context lost: {0}")]
    ContextLost(String),

    /// An operation is not valid in the current trainer state.
    #[error("Invalid trainer state: {0}")]
    InvalidState(String),

    /// The problem provider failed.
    #[error("Problem provider error: {0}")]
    Problem(String),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary (de)serialization failed.
    #[error("Binary encoding error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Incompatible document version.
    #[error("Incompatible document version: expected {expected}, got {got}")]
    IncompatibleVersion {
        /// Version this build writes.
        expected: u32,
        /// Version found in the document.
        got: u32,
    },

    /// I/O error during model save/load operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// GPU device request failed.
    #[cfg(feature = "gpu")]
    #[error("Failed to create GPU device: {0}")]
    DeviceRequestFailed(#[from] wgpu::RequestDeviceError),

    /// No suitable GPU adapter was found.
    #[cfg(feature = "gpu")]
    #[error("Failed to find suitable GPU adapter: {0}")]
    AdapterNotFound(String),

    /// GPU buffer async operation failed.
    #[cfg(feature = "gpu")]
    #[error("Buffer async error: {0}")]
    BufferAsync(#[from] wgpu::BufferAsyncError),

    /// GPU buffer operation failed.
    #[cfg(feature = "gpu")]
    #[error("Buffer operation failed: {0}")]
    Buffer(String),

    /// The adapter does not meet the requested limits.
    #[cfg(feature = "gpu")]
    #[error("Unsupported device limits: {0}")]
    UnsupportedLimits(String),
}

/// Result type alias for neurotex operations.
pub type NeurotexResult<T> = Result<T, NeurotexError>;

impl NeurotexError {
    /// Creates a shape mismatch error.
    pub fn shape_mismatch(expected: (usize, usize), got: (usize, usize)) -> Self {
        NeurotexError::ShapeMismatch { expected, got }
    }

    /// Creates an invalid uniform error.
    pub fn invalid_uniform(program: &'static str, slot: usize, reason: &'static str) -> Self {
        NeurotexError::InvalidUniform {
            program,
            slot,
            reason,
        }
    }

    /// Creates a context lost error.
    pub fn context_lost<S: Into<String>>(msg: S) -> Self {
        NeurotexError::ContextLost(msg.into())
    }

    /// Creates an invalid state error.
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        NeurotexError::InvalidState(msg.into())
    }

    /// Creates a problem provider error.
    pub fn problem<S: Into<String>>(msg: S) -> Self {
        NeurotexError::Problem(msg.into())
    }

    /// Creates an incompatible version error.
    pub fn incompatible_version(expected: u32, got: u32) -> Self {
        NeurotexError::IncompatibleVersion { expected, got }
    }

    /// Creates a GPU buffer error.
    #[cfg(feature = "gpu")]
    pub fn buffer<S: Into<String>>(msg: S) -> Self {
        NeurotexError::Buffer(msg.into())
    }

    /// Creates an adapter not found error.
    #[cfg(feature = "gpu")]
    pub fn adapter_not_found<S: Into<String>>(msg: S) -> Self {
        NeurotexError::AdapterNotFound(msg.into())
    }

    /// Creates an unsupported limits error.
    #[cfg(feature = "gpu")]
    pub fn unsupported_limits<S: Into<String>>(msg: S) -> Self {
        NeurotexError::UnsupportedLimits(msg.into())
    }

    /// Returns true when the error means the backend context is gone.
    pub fn is_context_lost(&self) -> bool {
        matches!(self, NeurotexError::ContextLost(_))
    }
}
