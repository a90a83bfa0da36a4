//! Direct connectivity: neuron `(x, y)` reads input `(x, y)` only.

use crate::backend::Backend;
use crate::error::NeurotexResult;
use crate::kernel::{KernelCall, Program};
use crate::tensor::TensorBuffer;

pub(super) fn feedforward<B: Backend>(
    backend: &mut B,
    input: &TensorBuffer<B>,
    weights: &TensorBuffer<B>,
    bias: &TensorBuffer<B>,
    sum: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    KernelCall::new(Program::ForwardDirect)
        .input(input)
        .input(weights)
        .input(bias)
        .run(backend, sum)
}

pub(super) fn backpropagate<B: Backend>(
    backend: &mut B,
    delta: &TensorBuffer<B>,
    weights: &TensorBuffer<B>,
    out: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    KernelCall::new(Program::BackwardDirect)
        .input(delta)
        .input(weights)
        .run(backend, out)
}

pub(super) fn gradients<B: Backend>(
    backend: &mut B,
    input: &TensorBuffer<B>,
    delta: &TensorBuffer<B>,
    gradient: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    KernelCall::new(Program::GradDirect)
        .input(input)
        .input(delta)
        .run(backend, gradient)
}
