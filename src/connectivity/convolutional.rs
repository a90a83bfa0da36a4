//! Convolutional connectivity: a bank of `kk²` shared `k × k` kernels.
//!
//! The sum is written in interleaved layout: texel `(x, y)` belongs to kernel
//! `(x mod kk, y mod kk)` at position `(x div kk, y div kk)` of an `M × M`
//! grid, `M = T / kk`. Position `p` reads the window starting at
//! `p·s + floor((s − k) / 2)`, `s = F / M`. Each neuron keeps its own bias.
//!
//! When the next layer is not dense, or the layer max-pools, the activation
//! is reorganized into tiled layout (one contiguous `M × M` map per kernel)
//! and deltas are unreorganized before the activation derivative.

use super::Geometry;
use crate::backend::Backend;
use crate::error::NeurotexResult;
use crate::kernel::{KernelCall, Program};
use crate::tensor::TensorBuffer;

fn conv_ints(g: &Geometry) -> [i32; 5] {
    [
        g.sparsity as i32,
        g.kernels_side as i32,
        g.stride as i32,
        g.offset as i32,
        g.positions as i32,
    ]
}

pub(super) fn feedforward<B: Backend>(
    backend: &mut B,
    g: &Geometry,
    input: &TensorBuffer<B>,
    weights: &TensorBuffer<B>,
    bias: &TensorBuffer<B>,
    sum: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    KernelCall::new(Program::ForwardConv)
        .input(input)
        .input(weights)
        .input(bias)
        .ints(&conv_ints(g))
        .run(backend, sum)
}

pub(super) fn backpropagate<B: Backend>(
    backend: &mut B,
    g: &Geometry,
    delta: &TensorBuffer<B>,
    weights: &TensorBuffer<B>,
    out: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    KernelCall::new(Program::BackwardConv)
        .input(delta)
        .input(weights)
        .ints(&conv_ints(g))
        .run(backend, out)
}

pub(super) fn gradients<B: Backend>(
    backend: &mut B,
    g: &Geometry,
    input: &TensorBuffer<B>,
    delta: &TensorBuffer<B>,
    gradient: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    KernelCall::new(Program::GradConv)
        .input(input)
        .input(delta)
        .ints(&conv_ints(g))
        .run(backend, gradient)
}

/// Interleaved to tiled layout.
pub fn reorganize<B: Backend>(
    backend: &mut B,
    g: &Geometry,
    interleaved: &TensorBuffer<B>,
    tiled: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    KernelCall::new(Program::Reorganize)
        .input(interleaved)
        .ints(&[g.kernels_side as i32, g.positions as i32])
        .run(backend, tiled)
}

/// Tiled to interleaved layout.
pub fn unreorganize<B: Backend>(
    backend: &mut B,
    g: &Geometry,
    tiled: &TensorBuffer<B>,
    interleaved: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    KernelCall::new(Program::Unreorganize)
        .input(tiled)
        .ints(&[g.kernels_side as i32, g.positions as i32])
        .run(backend, interleaved)
}
