//! Tensor buffers: the sole storage primitive.
//!
//! A [`TensorBuffer`] is a `width × height` grid of 4-channel texels owned by
//! a backend. Row-major layout, texel `(x, y)` at index `y · width + x`, and
//! host data is always exchanged as a flat `f32` slice of `texels × 4` values.
//!
//! # Storage modes
//!
//! - [`StorageMode::Float`]: raw numeric data.
//! - [`StorageMode::Byte`]: display data. Every write is quantized to 1/255
//!   steps in `[0, 1]`, and numeric kernels refuse a byte target.
//!
//! # Mip levels
//!
//! Power-of-two tensors can carry a mip chain ([`TensorBuffer::with_mipmaps`]);
//! each level halves both sides and holds the mean of the 2×2 block below it.
//! Dense connectivities reduce their products tensor through this chain.
//!
//! # Example
//!
//! ```rust
//! use neurotex::{HostBackend, TensorBuffer};
//!
//! # fn main() -> neurotex::NeurotexResult<()> {
//! let mut backend = HostBackend::new();
//! let tensor = TensorBuffer::from_data(&mut backend, 2, 1, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0])?;
//! assert_eq!(tensor.download(&backend)?[4], 5.0);
//! # Ok(())
//! # }
//! ```

use std::ops::{Add, AddAssign, Mul, Sub};

use bytemuck::{Pod, Zeroable};

use crate::backend::{Backend, BufferDesc, Input, Target};
use crate::error::{NeurotexError, NeurotexResult};
use crate::kernel::{Program, Uniforms};

/// Number of channels per texel.
pub const CHANNELS: usize = 4;

/// One 4-channel element. Every kernel works channel-wise.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Texel(pub [f32; 4]);

impl Texel {
    /// All channels zero.
    pub const ZERO: Texel = Texel([0.0; 4]);
    /// All channels one.
    pub const ONE: Texel = Texel([1.0; 4]);

    /// Same value in every channel.
    #[inline]
    pub fn splat(v: f32) -> Self {
        Texel([v; 4])
    }

    /// Applies `f` to each channel.
    #[inline]
    pub fn map(self, f: impl Fn(f32) -> f32) -> Self {
        let [a, b, c, d] = self.0;
        Texel([f(a), f(b), f(c), f(d)])
    }

    /// Combines two texels channel by channel.
    #[inline]
    pub fn zip(self, other: Texel, f: impl Fn(f32, f32) -> f32) -> Self {
        let (l, r) = (self.0, other.0);
        Texel([f(l[0], r[0]), f(l[1], r[1]), f(l[2], r[2]), f(l[3], r[3])])
    }

    /// Channel-wise maximum.
    #[inline]
    pub fn max(self, other: Texel) -> Self {
        self.zip(other, f32::max)
    }

    /// Mean of the four channels.
    #[inline]
    pub fn mean(self) -> f32 {
        (self.0[0] + self.0[1] + self.0[2] + self.0[3]) * 0.25
    }
}

impl Add for Texel {
    type Output = Texel;
    #[inline]
    fn add(self, rhs: Texel) -> Texel {
        self.zip(rhs, |a, b| a + b)
    }
}

impl AddAssign for Texel {
    #[inline]
    fn add_assign(&mut self, rhs: Texel) {
        *self = *self + rhs;
    }
}

impl Sub for Texel {
    type Output = Texel;
    #[inline]
    fn sub(self, rhs: Texel) -> Texel {
        self.zip(rhs, |a, b| a - b)
    }
}

impl Mul for Texel {
    type Output = Texel;
    #[inline]
    fn mul(self, rhs: Texel) -> Texel {
        self.zip(rhs, |a, b| a * b)
    }
}

impl Mul<f32> for Texel {
    type Output = Texel;
    #[inline]
    fn mul(self, rhs: f32) -> Texel {
        self.map(|a| a * rhs)
    }
}

/// Storage mode of a tensor buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageMode {
    /// Raw numeric data.
    #[default]
    Float,
    /// Display data quantized to 1/255 steps in `[0, 1]`.
    Byte,
}

impl StorageMode {
    /// Quantizes a value the way this storage stores it.
    #[inline]
    pub fn store(self, v: f32) -> f32 {
        match self {
            StorageMode::Float => v,
            StorageMode::Byte => (v.clamp(0.0, 1.0) * 255.0).round() / 255.0,
        }
    }
}

/// A backend-resident 2D, 4-channel buffer with an optional mip chain.
pub struct TensorBuffer<B: Backend> {
    width: usize,
    height: usize,
    mode: StorageMode,
    buffer: B::Buffer,
    /// Levels 1.. of the mip chain; level 0 is `buffer`.
    mips: Vec<B::Buffer>,
}

impl<B: Backend> TensorBuffer<B> {
    /// Allocates a zero-filled tensor.
    pub fn new(backend: &mut B, width: usize, height: usize, mode: StorageMode) -> NeurotexResult<Self> {
        if width == 0 || height == 0 {
            return Err(NeurotexError::shape_mismatch((1, 1), (width, height)));
        }
        let desc = BufferDesc::new(width, height, mode);
        let buffer = backend.allocate(desc, None)?;
        Ok(Self {
            width,
            height,
            mode,
            buffer,
            mips: Vec::new(),
        })
    }

    /// Allocates a zero-filled square float tensor.
    pub fn square(backend: &mut B, size: usize) -> NeurotexResult<Self> {
        Self::new(backend, size, size, StorageMode::Float)
    }

    /// Allocates a float tensor and uploads `data` (`width · height · 4` values).
    pub fn from_data(backend: &mut B, width: usize, height: usize, data: &[f32]) -> NeurotexResult<Self> {
        let desc = BufferDesc::new(width, height, StorageMode::Float);
        check_len(desc, data)?;
        let buffer = backend.allocate(desc, Some(data))?;
        Ok(Self {
            width,
            height,
            mode: StorageMode::Float,
            buffer,
            mips: Vec::new(),
        })
    }

    /// Allocates a zero-filled float tensor with a full mip chain.
    ///
    /// Both sides must be powers of two.
    pub fn with_mipmaps(backend: &mut B, width: usize, height: usize) -> NeurotexResult<Self> {
        if !width.is_power_of_two() || !height.is_power_of_two() {
            return Err(NeurotexError::shape_mismatch(
                (width.next_power_of_two(), height.next_power_of_two()),
                (width, height),
            ));
        }
        let mut tensor = Self::new(backend, width, height, StorageMode::Float)?;
        let (mut w, mut h) = (width, height);
        while w > 1 || h > 1 {
            w = (w / 2).max(1);
            h = (h / 2).max(1);
            let buffer = backend.allocate(BufferDesc::new(w, h, StorageMode::Float), None)?;
            tensor.mips.push(buffer);
        }
        Ok(tensor)
    }

    /// Width in texels.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in texels.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)`.
    #[inline]
    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Storage mode.
    #[inline]
    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Number of texels at level 0.
    #[inline]
    pub fn texel_count(&self) -> usize {
        self.width * self.height
    }

    /// Number of mip levels, level 0 included.
    #[inline]
    pub fn mip_levels(&self) -> usize {
        self.mips.len() + 1
    }

    /// Descriptor of level 0.
    #[inline]
    pub fn desc(&self) -> BufferDesc {
        BufferDesc::new(self.width, self.height, self.mode)
    }

    /// Descriptor of a mip level.
    pub fn level_desc(&self, level: usize) -> Option<BufferDesc> {
        if level >= self.mip_levels() {
            return None;
        }
        Some(BufferDesc::new(
            (self.width >> level).max(1),
            (self.height >> level).max(1),
            self.mode,
        ))
    }

    /// Backend buffer of a mip level.
    pub fn level_buffer(&self, level: usize) -> Option<&B::Buffer> {
        match level {
            0 => Some(&self.buffer),
            l => self.mips.get(l - 1),
        }
    }

    /// Binds level 0 as a kernel input.
    #[inline]
    pub fn as_input(&self) -> Input<'_, B::Buffer> {
        Input::Buffer(&self.buffer, self.desc())
    }

    /// Binds level 0 as a kernel target.
    #[inline]
    pub fn as_target(&mut self) -> Target<'_, B::Buffer> {
        let desc = self.desc();
        Target {
            buffer: &mut self.buffer,
            desc,
        }
    }

    /// Downloads level 0 as `texels × 4` floats.
    pub fn download(&self, backend: &B) -> NeurotexResult<Vec<f32>> {
        backend.download(&self.buffer, self.desc())
    }

    /// Downloads a mip level.
    pub fn download_level(&self, backend: &B, level: usize) -> NeurotexResult<Vec<f32>> {
        let (buffer, desc) = self
            .level_buffer(level)
            .zip(self.level_desc(level))
            .ok_or(NeurotexError::MissingMipLevel {
                level,
                available: self.mip_levels(),
            })?;
        backend.download(buffer, desc)
    }

    /// Downloads level 0 as texels.
    pub fn download_texels(&self, backend: &B) -> NeurotexResult<Vec<Texel>> {
        let data = self.download(backend)?;
        Ok(bytemuck::cast_slice::<f32, Texel>(&data).to_vec())
    }

    /// Uploads `texels × 4` floats into level 0.
    pub fn upload(&mut self, backend: &mut B, data: &[f32]) -> NeurotexResult<()> {
        let desc = self.desc();
        check_len(desc, data)?;
        backend.upload(&mut self.buffer, desc, data)
    }

    /// Rebuilds levels 1.. from level 0.
    pub fn generate_mipmaps(&mut self, backend: &mut B) -> NeurotexResult<()> {
        let uniforms = Uniforms::new();
        for level in 1..self.mip_levels() {
            let (Some(src_desc), Some(dst_desc)) = (self.level_desc(level - 1), self.level_desc(level)) else {
                break;
            };
            let (below, rest) = self.mips.split_at_mut(level - 1);
            let source = if level == 1 { &self.buffer } else { &below[level - 2] };
            backend.execute(
                Program::Downsample,
                &[Input::Buffer(source, src_desc)],
                &uniforms,
                Target {
                    buffer: &mut rest[0],
                    desc: dst_desc,
                },
            )?;
        }
        Ok(())
    }
}

impl<B: Backend> std::fmt::Debug for TensorBuffer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("mode", &self.mode)
            .field("mip_levels", &self.mip_levels())
            .finish()
    }
}

fn check_len(desc: BufferDesc, data: &[f32]) -> NeurotexResult<()> {
    let expected = desc.texels() * CHANNELS;
    if data.len() != expected {
        return Err(NeurotexError::DataLength {
            expected,
            got: data.len(),
        });
    }
    Ok(())
}

/// Two tensors alternating as source and target.
///
/// Update kernels read `front` and write `back`, then [`PingPong::swap`]
/// makes the result the new front.
pub struct PingPong<B: Backend> {
    front: TensorBuffer<B>,
    back: TensorBuffer<B>,
}

impl<B: Backend> PingPong<B> {
    /// Allocates a zero-filled pair.
    pub fn square(backend: &mut B, size: usize) -> NeurotexResult<Self> {
        Ok(Self {
            front: TensorBuffer::square(backend, size)?,
            back: TensorBuffer::square(backend, size)?,
        })
    }

    /// Allocates a pair whose front holds `data`.
    pub fn from_data(backend: &mut B, width: usize, height: usize, data: &[f32]) -> NeurotexResult<Self> {
        Ok(Self {
            front: TensorBuffer::from_data(backend, width, height, data)?,
            back: TensorBuffer::new(backend, width, height, StorageMode::Float)?,
        })
    }

    /// Current values.
    #[inline]
    pub fn front(&self) -> &TensorBuffer<B> {
        &self.front
    }

    /// Current values, writable (uploads on import).
    #[inline]
    pub fn front_mut(&mut self) -> &mut TensorBuffer<B> {
        &mut self.front
    }

    /// Front for reading, back for writing.
    #[inline]
    pub fn split(&mut self) -> (&TensorBuffer<B>, &mut TensorBuffer<B>) {
        (&self.front, &mut self.back)
    }

    /// Makes the last written buffer the front.
    #[inline]
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.front, &mut self.back);
    }

    /// Zeroes both buffers.
    pub fn reset(&mut self, backend: &mut B) -> NeurotexResult<()> {
        let zeros = vec![0.0; self.front.texel_count() * CHANNELS];
        self.front.upload(backend, &zeros)?;
        self.back.upload(backend, &zeros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostBackend;

    #[test]
    fn test_texel_ops() {
        let a = Texel([1.0, 2.0, 3.0, 4.0]);
        let b = Texel::splat(2.0);
        assert_eq!(a + b, Texel([3.0, 4.0, 5.0, 6.0]));
        assert_eq!(a * b, Texel([2.0, 4.0, 6.0, 8.0]));
        assert_eq!(a - b, Texel([-1.0, 0.0, 1.0, 2.0]));
        assert_eq!(a.mean(), 2.5);
    }

    #[test]
    fn test_byte_quantization() {
        assert_eq!(StorageMode::Byte.store(1.5), 1.0);
        assert_eq!(StorageMode::Byte.store(-0.2), 0.0);
        assert_eq!(StorageMode::Byte.store(0.5), 128.0 / 255.0);
        assert_eq!(StorageMode::Float.store(1.5), 1.5);
    }

    #[test]
    fn test_upload_download() {
        let mut backend = HostBackend::new();
        let data: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let mut tensor = TensorBuffer::new(&mut backend, 2, 2, StorageMode::Float).unwrap();
        tensor.upload(&mut backend, &data).unwrap();
        assert_eq!(tensor.download(&backend).unwrap(), data);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let mut backend = HostBackend::new();
        let err = TensorBuffer::from_data(&mut backend, 2, 2, &[0.0; 15]).unwrap_err();
        assert!(matches!(err, NeurotexError::DataLength { expected: 16, got: 15 }));
    }

    #[test]
    fn test_mipmaps_average() {
        let mut backend = HostBackend::new();
        let mut tensor = TensorBuffer::with_mipmaps(&mut backend, 4, 4).unwrap();
        assert_eq!(tensor.mip_levels(), 3);
        let data: Vec<f32> = (0..16).flat_map(|i| [i as f32; 4]).collect();
        tensor.upload(&mut backend, &data).unwrap();
        tensor.generate_mipmaps(&mut backend).unwrap();

        let level1 = tensor.download_level(&backend, 1).unwrap();
        // top-left block: 0, 1, 4, 5
        assert_eq!(level1[0], 2.5);
        let level2 = tensor.download_level(&backend, 2).unwrap();
        assert_eq!(level2[0], 7.5);
        assert!(tensor.download_level(&backend, 3).is_err());
    }

    #[test]
    fn test_mipmaps_require_power_of_two() {
        let mut backend = HostBackend::new();
        assert!(TensorBuffer::with_mipmaps(&mut backend, 6, 6).is_err());
    }

    #[test]
    fn test_ping_pong_swap() {
        let mut backend = HostBackend::new();
        let mut pair = PingPong::from_data(&mut backend, 1, 1, &[1.0; 4]).unwrap();
        pair.swap();
        assert_eq!(pair.front().download(&backend).unwrap(), vec![0.0; 4]);
        pair.swap();
        assert_eq!(pair.front().download(&backend).unwrap(), vec![1.0; 4]);
    }
}
