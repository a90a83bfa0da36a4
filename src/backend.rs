//! Backend abstraction: where tensor buffers live and kernels run.
//!
//! A [`Backend`] allocates buffers, moves data in and out, and executes one
//! named kernel [`Program`] over a full target buffer. Validation of the
//! per-call binding descriptor happens in [`crate::kernel::dispatch`] before
//! a backend is ever reached; backends only execute.
//!
//! Implementations:
//!
//! - [`crate::HostBackend`]: host emulation of the dispatch model, always available.
//! - `gpu::WgpuBackend`: wgpu compute pipelines (feature `gpu`).

use crate::error::NeurotexResult;
use crate::kernel::{Program, Uniforms};
use crate::tensor::StorageMode;

/// Shape and storage of a buffer as seen by a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    /// Width in texels.
    pub width: usize,
    /// Height in texels.
    pub height: usize,
    /// Storage mode.
    pub mode: StorageMode,
}

impl BufferDesc {
    /// Creates a descriptor.
    #[inline]
    pub const fn new(width: usize, height: usize, mode: StorageMode) -> Self {
        Self {
            width,
            height,
            mode,
        }
    }

    /// Texel count.
    #[inline]
    pub const fn texels(&self) -> usize {
        self.width * self.height
    }
}

/// A resolved kernel input.
pub enum Input<'a, Buf> {
    /// A buffer level with its shape.
    Buffer(&'a Buf, BufferDesc),
    /// The shared all-zeros binding.
    Zeros,
    /// The shared all-ones binding.
    Ones,
}

impl<Buf> Clone for Input<'_, Buf> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Buf> Copy for Input<'_, Buf> {}

/// The buffer a kernel writes, every texel once.
pub struct Target<'a, Buf> {
    /// Buffer written by the kernel.
    pub buffer: &'a mut Buf,
    /// Its shape.
    pub desc: BufferDesc,
}

/// Storage and execution backend.
///
/// All calls are synchronous: when `execute` returns, the target holds the
/// result and can be sampled by the next kernel.
pub trait Backend {
    /// Backend-owned buffer handle.
    type Buffer;

    /// Human-readable backend name.
    fn name(&self) -> String;

    /// Allocates a buffer, zero-filled unless `data` is given.
    fn allocate(&mut self, desc: BufferDesc, data: Option<&[f32]>) -> NeurotexResult<Self::Buffer>;

    /// Replaces the content of a buffer.
    fn upload(&mut self, buffer: &mut Self::Buffer, desc: BufferDesc, data: &[f32]) -> NeurotexResult<()>;

    /// Reads a buffer back as `texels × 4` floats.
    fn download(&self, buffer: &Self::Buffer, desc: BufferDesc) -> NeurotexResult<Vec<f32>>;

    /// Runs `program` once per target texel.
    fn execute(
        &mut self,
        program: Program,
        inputs: &[Input<'_, Self::Buffer>],
        uniforms: &Uniforms,
        target: Target<'_, Self::Buffer>,
    ) -> NeurotexResult<()>;

    /// Whether the execution context is gone for good.
    fn is_context_lost(&self) -> bool;
}
