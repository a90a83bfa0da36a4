//! Uniform block shared by every kernel pipeline.
//!
//! WGSL uniform arrays need a 16-byte element stride, so the scalar slots are
//! packed four to a `vec4`.
//!
//! # Layout
//!
//! ```text
//! Offset  Size  Field
//! 0       32    floats   array<vec4<f32>, 2>
//! 32      32    ints     array<vec4<i32>, 2>
//! 64      64    inputs   array<vec4<i32>, 4>  (width, height, source, _)
//! 128     16    target   vec4<i32>            (width, height, byte mode, _)
//! ```

use bytemuck::{Pod, Zeroable};

use crate::backend::{BufferDesc, Input};
use crate::kernel::{Uniforms, FLOAT_SLOTS, INT_SLOTS, MAX_INPUTS};
use crate::tensor::StorageMode;

/// Input slot reads its bound buffer.
pub const SOURCE_BUFFER: i32 = 0;
/// Input slot reads zero everywhere.
pub const SOURCE_ZEROS: i32 = 1;
/// Input slot reads one everywhere.
pub const SOURCE_ONES: i32 = 2;

/// Per-dispatch uniform data.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct KernelUniforms {
    /// Float slots.
    pub floats: [[f32; 4]; 2],
    /// Integer slots.
    pub ints: [[i32; 4]; 2],
    /// Shape and source kind of each input slot.
    pub inputs: [[i32; 4]; MAX_INPUTS],
    /// Shape and storage mode of the target.
    pub target: [i32; 4],
}

impl KernelUniforms {
    /// Packs a call. Input slots past `inputs.len()` read zeros.
    pub fn pack<Buf>(uniforms: &Uniforms, inputs: &[Input<'_, Buf>], target: BufferDesc) -> Self {
        let mut packed = Self::zeroed();
        let floats = uniforms.resolved_floats();
        for slot in 0..FLOAT_SLOTS {
            packed.floats[slot / 4][slot % 4] = floats[slot];
        }
        let ints = uniforms.ints();
        for slot in 0..INT_SLOTS {
            packed.ints[slot / 4][slot % 4] = ints[slot];
        }
        for (slot, entry) in packed.inputs.iter_mut().enumerate() {
            *entry = match inputs.get(slot) {
                Some(Input::Buffer(_, desc)) => [desc.width as i32, desc.height as i32, SOURCE_BUFFER, 0],
                Some(Input::Ones) => [1, 1, SOURCE_ONES, 0],
                Some(Input::Zeros) | None => [1, 1, SOURCE_ZEROS, 0],
            };
        }
        packed.target = [
            target.width as i32,
            target.height as i32,
            i32::from(target.mode == StorageMode::Byte),
            0,
        ];
        packed
    }

    /// Size in bytes.
    pub const fn size_bytes() -> usize {
        std::mem::size_of::<Self>()
    }
}
