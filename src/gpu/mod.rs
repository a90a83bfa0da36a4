//! wgpu backend.
//!
//! Runs every kernel [`Program`](crate::Program) as a WGSL compute pipeline.
//! It is only available when the `gpu` feature is enabled; everything above
//! the [`Backend`](crate::Backend) trait is shared with the host backend, so a
//! network trains the same way on either.
//!
//! # Example
//!
//! ```rust,no_run
//! use neurotex::gpu::{WgpuBackend, WgpuOptions};
//! use neurotex::TensorBuffer;
//!
//! # fn main() -> neurotex::NeurotexResult<()> {
//! let mut backend = WgpuBackend::init(WgpuOptions::default())?;
//! let tensor = TensorBuffer::from_data(&mut backend, 2, 2, &[0.5; 16])?;
//! let data = tensor.download(&backend)?;
//! assert_eq!(data.len(), 16);
//! # Ok(())
//! # }
//! ```
//!
//! # Public API
//!
//! - [`WgpuBackend`]: device initialization and kernel execution
//! - [`PipelineCache`]: one compute pipeline per program, built lazily
//! - [`KernelUniforms`]: the uniform block every kernel reads
//! - [`shaders`]: WGSL generation

mod backend;
mod pipeline;
pub mod shaders;
mod uniforms;

pub use backend::{PowerPreference, WgpuBackend, WgpuOptions};
pub use pipeline::{workgroup_count, PipelineCache};
pub use uniforms::{KernelUniforms, SOURCE_BUFFER, SOURCE_ONES, SOURCE_ZEROS};
