//! Windowed connectivities.
//!
//! Output neuron `p` (per axis) reads a `k`-wide window of inputs starting at
//! `floor((p + ½)·F/T − k/2)`, so the window is centred on the neuron's
//! footprint in the input grid. Weight `(i, j)` of neuron `(x, y)` lives at
//! `(x·k + i, y·k + j)`. Inputs outside the grid contribute zero.
//!
//! `Square` works for any sizes by precomputing two index tensors:
//!
//! - `from` `(T·k)²`: for each weight texel, the input it multiplies
//!   (`x`, `y`, valid flag).
//! - `to` `(F·m)²`: for each input, up to `m²` `(weight, output)` pairs reading
//!   it (`weight x`, `weight y`, `output x`, `output y`, or all `-1`).
//!
//! `SquareFast` requires `F % T == 0` and computes the same addresses
//! arithmetically (`start = p·s + floor((s − k) / 2)`, `s = F/T`).

use super::Geometry;
use crate::backend::Backend;
use crate::error::NeurotexResult;
use crate::kernel::{KernelCall, Program};
use crate::tensor::{TensorBuffer, Texel};

/// Index tensors of a `Square` connectivity.
pub struct SquareIndex<B: Backend> {
    from: TensorBuffer<B>,
    to: TensorBuffer<B>,
    coverage: usize,
}

/// Window start of output `p` on one axis.
fn window_start(p: usize, from_size: usize, to_size: usize, k: usize) -> i64 {
    let numerator = (2 * p as i64 + 1) * from_size as i64 - (k * to_size) as i64;
    numerator.div_euclid(2 * to_size as i64)
}

/// For each input on one axis, the `(output, offset in window)` pairs reading it.
fn readers(from_size: usize, to_size: usize, k: usize) -> Vec<Vec<(usize, usize)>> {
    let mut lists = vec![Vec::new(); from_size];
    for p in 0..to_size {
        let start = window_start(p, from_size, to_size, k);
        for i in 0..k {
            let u = start + i as i64;
            if (0..from_size as i64).contains(&u) {
                lists[u as usize].push((p, i));
            }
        }
    }
    lists
}

impl<B: Backend> SquareIndex<B> {
    /// Precomputes both index tensors.
    pub fn build(backend: &mut B, g: &Geometry) -> NeurotexResult<Self> {
        let (fs, ts, k) = (g.from_size, g.to_size, g.sparsity);
        let starts: Vec<i64> = (0..ts).map(|p| window_start(p, fs, ts, k)).collect();

        let side = ts * k;
        let mut from = vec![Texel::ZERO; side * side];
        for y in 0..ts {
            for x in 0..ts {
                for j in 0..k {
                    for i in 0..k {
                        let (u, v) = (starts[x] + i as i64, starts[y] + j as i64);
                        let valid = (0..fs as i64).contains(&u) && (0..fs as i64).contains(&v);
                        from[(y * k + j) * side + x * k + i] =
                            Texel([u as f32, v as f32, if valid { 1.0 } else { 0.0 }, 0.0]);
                    }
                }
            }
        }

        let lists = readers(fs, ts, k);
        let coverage = lists.iter().map(Vec::len).max().unwrap_or(0).max(1);
        let to_side = fs * coverage;
        let mut to = vec![Texel::splat(-1.0); to_side * to_side];
        for v in 0..fs {
            for u in 0..fs {
                for (b, &(py, iy)) in lists[v].iter().enumerate() {
                    for (a, &(px, ix)) in lists[u].iter().enumerate() {
                        to[(v * coverage + b) * to_side + u * coverage + a] = Texel([
                            (px * k + ix) as f32,
                            (py * k + iy) as f32,
                            px as f32,
                            py as f32,
                        ]);
                    }
                }
            }
        }

        Ok(Self {
            from: TensorBuffer::from_data(backend, side, side, bytemuck::cast_slice(&from))?,
            to: TensorBuffer::from_data(backend, to_side, to_side, bytemuck::cast_slice(&to))?,
            coverage,
        })
    }

    /// Maximum number of outputs reading one input, per axis (`m`).
    pub fn coverage(&self) -> usize {
        self.coverage
    }

    /// The `from` index tensor.
    pub fn from_index(&self) -> &TensorBuffer<B> {
        &self.from
    }

    /// The `to` index tensor.
    pub fn to_index(&self) -> &TensorBuffer<B> {
        &self.to
    }
}

pub(super) fn feedforward<B: Backend>(
    backend: &mut B,
    g: &Geometry,
    index: &SquareIndex<B>,
    input: &TensorBuffer<B>,
    weights: &TensorBuffer<B>,
    bias: &TensorBuffer<B>,
    sum: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    KernelCall::new(Program::ForwardSquare)
        .input(input)
        .input(weights)
        .input(bias)
        .input(&index.from)
        .int(0, g.sparsity as i32)
        .run(backend, sum)
}

pub(super) fn backpropagate<B: Backend>(
    backend: &mut B,
    index: &SquareIndex<B>,
    delta: &TensorBuffer<B>,
    weights: &TensorBuffer<B>,
    out: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    KernelCall::new(Program::BackwardSquare)
        .input(delta)
        .input(weights)
        .input(&index.to)
        .int(0, index.coverage as i32)
        .run(backend, out)
}

pub(super) fn gradients<B: Backend>(
    backend: &mut B,
    g: &Geometry,
    index: &SquareIndex<B>,
    input: &TensorBuffer<B>,
    delta: &TensorBuffer<B>,
    gradient: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    KernelCall::new(Program::GradSquare)
        .input(input)
        .input(delta)
        .input(&index.from)
        .int(0, g.sparsity as i32)
        .run(backend, gradient)
}

fn fast_ints(g: &Geometry) -> [i32; 4] {
    [
        g.sparsity as i32,
        g.stride as i32,
        g.offset as i32,
        g.to_size as i32,
    ]
}

pub(super) fn feedforward_fast<B: Backend>(
    backend: &mut B,
    g: &Geometry,
    input: &TensorBuffer<B>,
    weights: &TensorBuffer<B>,
    bias: &TensorBuffer<B>,
    sum: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    KernelCall::new(Program::ForwardSquareFast)
        .input(input)
        .input(weights)
        .input(bias)
        .ints(&fast_ints(g))
        .run(backend, sum)
}

pub(super) fn backpropagate_fast<B: Backend>(
    backend: &mut B,
    g: &Geometry,
    delta: &TensorBuffer<B>,
    weights: &TensorBuffer<B>,
    out: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    KernelCall::new(Program::BackwardSquareFast)
        .input(delta)
        .input(weights)
        .ints(&fast_ints(g))
        .run(backend, out)
}

pub(super) fn gradients_fast<B: Backend>(
    backend: &mut B,
    g: &Geometry,
    input: &TensorBuffer<B>,
    delta: &TensorBuffer<B>,
    gradient: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    KernelCall::new(Program::GradSquareFast)
        .input(input)
        .input(delta)
        .ints(&fast_ints(g))
        .run(backend, gradient)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::centered_offset;

    #[test]
    fn test_window_start_matches_fast_addressing() {
        for (fs, ts) in [(8, 4), (6, 2), (9, 3), (4, 4)] {
            let s = fs / ts;
            for k in 1..=fs {
                for p in 0..ts {
                    assert_eq!(
                        window_start(p, fs, ts, k),
                        (p * s) as i64 + centered_offset(s, k),
                        "F={} T={} k={} p={}",
                        fs,
                        ts,
                        k,
                        p
                    );
                }
            }
        }
    }

    #[test]
    fn test_readers_coverage() {
        let lists = readers(4, 2, 2);
        assert!(lists.iter().all(|l| l.len() == 1));
        let lists = readers(4, 2, 3);
        assert_eq!(lists[1], vec![(0, 2), (1, 0)]);
        assert_eq!(lists.iter().map(Vec::len).max(), Some(2));
    }

    #[test]
    fn test_non_multiple_sizes() {
        // 5 inputs, 3 outputs, window 2: centres 0.83, 2.5, 4.17
        assert_eq!(window_start(0, 5, 3, 2), -1);
        assert_eq!(window_start(1, 5, 3, 2), 1);
        assert_eq!(window_start(2, 5, 3, 2), 3);
    }
}
