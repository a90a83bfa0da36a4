//! Dense connectivities.
//!
//! Weight for output `(x, y)` and input `(u, v)` lives at `(x·F + u, y·F + v)`,
//! so each output owns a contiguous `F × F` block.
//!
//! - `Full` multiplies every weight by its input into a products tensor, then
//!   reduces each block through the mip chain: level `log2 F` holds the block
//!   mean, and `MipSum` scales it back by `F²` and adds the bias.
//! - `FullNPoT` loops over the block inside one kernel, for any sizes.
//!
//! Backward passes use the transposed arrangement: block `(u, v)` of the
//! back-products tensor holds `w(x·F + u, y·F + v) · delta(x, y)` for every
//! output, reduced at level `log2 T`.

use super::Geometry;
use crate::backend::Backend;
use crate::error::NeurotexResult;
use crate::kernel::{KernelCall, Program};
use crate::tensor::TensorBuffer;

pub(super) fn feedforward_mip<B: Backend>(
    backend: &mut B,
    g: &Geometry,
    input: &TensorBuffer<B>,
    weights: &TensorBuffer<B>,
    bias: &TensorBuffer<B>,
    products: &mut TensorBuffer<B>,
    sum: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    let fs = g.from_size;
    KernelCall::new(Program::FullProducts)
        .input(input)
        .input(weights)
        .int(0, fs as i32)
        .run(backend, products)?;
    products.generate_mipmaps(backend)?;
    KernelCall::new(Program::MipSum)
        .level(products, fs.trailing_zeros() as usize)
        .input(bias)
        .float(0, (fs * fs) as f32)
        .run(backend, sum)
}

pub(super) fn backpropagate_mip<B: Backend>(
    backend: &mut B,
    g: &Geometry,
    delta: &TensorBuffer<B>,
    weights: &TensorBuffer<B>,
    back_products: &mut TensorBuffer<B>,
    out: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    let (fs, ts) = (g.from_size, g.to_size);
    KernelCall::new(Program::FullBackProducts)
        .input(delta)
        .input(weights)
        .ints(&[fs as i32, ts as i32])
        .run(backend, back_products)?;
    back_products.generate_mipmaps(backend)?;
    KernelCall::new(Program::MipSum)
        .level(back_products, ts.trailing_zeros() as usize)
        .zeros()
        .float(0, (ts * ts) as f32)
        .run(backend, out)
}

pub(super) fn feedforward_loop<B: Backend>(
    backend: &mut B,
    g: &Geometry,
    input: &TensorBuffer<B>,
    weights: &TensorBuffer<B>,
    bias: &TensorBuffer<B>,
    sum: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    KernelCall::new(Program::ForwardFullNPoT)
        .input(input)
        .input(weights)
        .input(bias)
        .int(0, g.from_size as i32)
        .run(backend, sum)
}

pub(super) fn backpropagate_loop<B: Backend>(
    backend: &mut B,
    g: &Geometry,
    delta: &TensorBuffer<B>,
    weights: &TensorBuffer<B>,
    out: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    KernelCall::new(Program::BackwardFull)
        .input(delta)
        .input(weights)
        .ints(&[g.from_size as i32, g.to_size as i32])
        .run(backend, out)
}

pub(super) fn gradients<B: Backend>(
    backend: &mut B,
    g: &Geometry,
    input: &TensorBuffer<B>,
    delta: &TensorBuffer<B>,
    gradient: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    KernelCall::new(Program::GradFull)
        .input(input)
        .input(delta)
        .int(0, g.from_size as i32)
        .run(backend, gradient)
}
