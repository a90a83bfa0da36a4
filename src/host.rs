//! Host emulation of the kernel dispatch model.
//!
//! [`HostBackend`] stores every buffer as a `Vec<Texel>` and runs each
//! [`Program`] once per target texel, the same way the WGSL pipelines of the
//! `gpu` backend do: rows are processed in parallel with rayon, every texel
//! only reads its inputs, reads outside a bound buffer return zero, and the
//! shared zeros/ones bindings return their constant everywhere.
//!
//! It is the reference backend for headless runs and tests, and it can
//! simulate losing its context ([`HostBackend::lose_context`]).

use rayon::prelude::*;

use crate::backend::{Backend, BufferDesc, Input, Target};
use crate::error::{NeurotexError, NeurotexResult};
use crate::kernel::{Program, Uniforms, FLOAT_SLOTS, INT_SLOTS};
use crate::tensor::{Texel, CHANNELS};

/// Targets smaller than this run on the calling thread.
const PARALLEL_THRESHOLD: usize = 4096;

/// Host-side backend.
#[derive(Debug, Default)]
pub struct HostBackend {
    lost: bool,
    dispatches: u64,
}

impl HostBackend {
    /// Creates a live backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the context as lost; every later call fails.
    pub fn lose_context(&mut self) {
        log::warn!("host backend context marked as lost");
        self.lost = true;
    }

    /// Number of kernels executed so far.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches
    }

    fn check_alive(&self, what: &str) -> NeurotexResult<()> {
        if self.lost {
            return Err(NeurotexError::context_lost(format!("host backend: {}", what)));
        }
        Ok(())
    }
}

impl Backend for HostBackend {
    type Buffer = Vec<Texel>;

    fn name(&self) -> String {
        "host".to_string()
    }

    fn allocate(&mut self, desc: BufferDesc, data: Option<&[f32]>) -> NeurotexResult<Vec<Texel>> {
        self.check_alive("allocate")?;
        let mut buffer = vec![Texel::ZERO; desc.texels()];
        if let Some(data) = data {
            self.upload(&mut buffer, desc, data)?;
        }
        Ok(buffer)
    }

    fn upload(&mut self, buffer: &mut Vec<Texel>, desc: BufferDesc, data: &[f32]) -> NeurotexResult<()> {
        self.check_alive("upload")?;
        if data.len() != desc.texels() * CHANNELS || buffer.len() != desc.texels() {
            return Err(NeurotexError::DataLength {
                expected: buffer.len() * CHANNELS,
                got: data.len(),
            });
        }
        let texels: &[Texel] = bytemuck::cast_slice(data);
        for (dst, src) in buffer.iter_mut().zip(texels) {
            *dst = src.map(|v| desc.mode.store(v));
        }
        Ok(())
    }

    fn download(&self, buffer: &Vec<Texel>, _desc: BufferDesc) -> NeurotexResult<Vec<f32>> {
        self.check_alive("download")?;
        Ok(bytemuck::cast_slice(buffer.as_slice()).to_vec())
    }

    fn execute(
        &mut self,
        program: Program,
        inputs: &[Input<'_, Vec<Texel>>],
        uniforms: &Uniforms,
        target: Target<'_, Vec<Texel>>,
    ) -> NeurotexResult<()> {
        self.check_alive(program.name())?;
        let Target { buffer, desc } = target;
        if buffer.len() != desc.texels() {
            return Err(NeurotexError::DataLength {
                expected: desc.texels() * CHANNELS,
                got: buffer.len() * CHANNELS,
            });
        }

        let mut sources = [Source::Const(Texel::ZERO); 4];
        for (slot, input) in sources.iter_mut().zip(inputs) {
            *slot = match input {
                Input::Buffer(data, d) => Source::Data(data.as_slice(), d.width as i64, d.height as i64),
                Input::Zeros => Source::Const(Texel::ZERO),
                Input::Ones => Source::Const(Texel::ONE),
            };
        }
        let ctx = KernelContext {
            program,
            sources,
            floats: uniforms.resolved_floats(),
            ints: uniforms.ints().map(i64::from),
            width: desc.width as i64,
        };
        let mode = desc.mode;

        let run_row = |(y, row): (usize, &mut [Texel])| {
            for (x, texel) in row.iter_mut().enumerate() {
                *texel = ctx.evaluate(x as i64, y as i64).map(|v| mode.store(v));
            }
        };
        if desc.texels() >= PARALLEL_THRESHOLD {
            buffer.par_chunks_mut(desc.width).enumerate().for_each(run_row);
        } else {
            buffer.chunks_mut(desc.width).enumerate().for_each(run_row);
        }

        self.dispatches += 1;
        Ok(())
    }

    fn is_context_lost(&self) -> bool {
        self.lost
    }
}

#[derive(Clone, Copy)]
enum Source<'a> {
    Data(&'a [Texel], i64, i64),
    Const(Texel),
}

impl Source<'_> {
    #[inline]
    fn read(&self, x: i64, y: i64) -> Texel {
        match *self {
            Source::Data(data, w, h) => {
                if x < 0 || y < 0 || x >= w || y >= h {
                    Texel::ZERO
                } else {
                    data[(y * w + x) as usize]
                }
            }
            Source::Const(value) => value,
        }
    }
}

struct KernelContext<'a> {
    program: Program,
    sources: [Source<'a>; 4],
    floats: [f32; FLOAT_SLOTS],
    ints: [i64; INT_SLOTS],
    width: i64,
}

impl KernelContext<'_> {
    #[inline]
    fn read(&self, input: usize, x: i64, y: i64) -> Texel {
        self.sources[input].read(x, y)
    }

    fn evaluate(&self, x: i64, y: i64) -> Texel {
        let f = &self.floats;
        let n = &self.ints;
        match self.program {
            Program::Fill => Texel([f[0], f[1], f[2], f[3]]),
            Program::Copy => self.read(0, x, y),
            Program::Downsample => {
                let (sx, sy) = (2 * x, 2 * y);
                (self.read(0, sx, sy)
                    + self.read(0, sx + 1, sy)
                    + self.read(0, sx, sy + 1)
                    + self.read(0, sx + 1, sy + 1))
                    * 0.25
            }
            Program::Residual => self.read(0, x, y) - self.read(1, x, y),
            Program::OneHot => {
                if y * self.width + x == n[0] {
                    Texel::ONE
                } else {
                    Texel::ZERO
                }
            }
            Program::ForwardDirect => self.read(1, x, y) * self.read(0, x, y) + self.read(2, x, y),
            Program::FullProducts => {
                let fs = n[0];
                self.read(1, x, y) * self.read(0, x % fs, y % fs)
            }
            Program::MipSum => self.read(0, x, y) * f[0] + self.read(1, x, y),
            Program::ForwardFullNPoT => {
                let fs = n[0];
                let mut acc = self.read(2, x, y);
                for v in 0..fs {
                    for u in 0..fs {
                        acc += self.read(1, x * fs + u, y * fs + v) * self.read(0, u, v);
                    }
                }
                acc
            }
            Program::ForwardSquare => {
                let k = n[0];
                let mut acc = self.read(2, x, y);
                for j in 0..k {
                    for i in 0..k {
                        let (wx, wy) = (x * k + i, y * k + j);
                        let from = self.read(3, wx, wy).0;
                        let input = self.read(0, from[0] as i64, from[1] as i64) * from[2];
                        acc += self.read(1, wx, wy) * input;
                    }
                }
                acc
            }
            Program::ForwardSquareFast => {
                let (k, s, off) = (n[0], n[1], n[2]);
                let mut acc = self.read(2, x, y);
                for j in 0..k {
                    for i in 0..k {
                        acc += self.read(1, x * k + i, y * k + j)
                            * self.read(0, x * s + off + i, y * s + off + j);
                    }
                }
                acc
            }
            Program::ForwardConv => {
                let (k, kk, s, off) = (n[0], n[1], n[2], n[3]);
                let (a, b) = (x % kk, y % kk);
                let (px, py) = (x / kk, y / kk);
                let mut acc = self.read(2, x, y);
                for j in 0..k {
                    for i in 0..k {
                        acc += self.read(1, a * k + i, b * k + j)
                            * self.read(0, px * s + off + i, py * s + off + j);
                    }
                }
                acc
            }
            Program::Reorganize => {
                let (kk, m) = (n[0], n[1]);
                self.read(0, (x % m) * kk + x / m, (y % m) * kk + y / m)
            }
            Program::Unreorganize => {
                let (kk, m) = (n[0], n[1]);
                self.read(0, (x % kk) * m + x / kk, (y % kk) * m + y / kk)
            }
            Program::Activate(act) => {
                let a = self.read(0, x, y).map(|z| act.apply(z)) * f[0];
                let (lo, hi) = (f[1], f[2]);
                match n[0] {
                    1 => a.map(|v| v.clamp(lo, hi)),
                    2 => a.zip(self.read(1, x, y), |v, m| if m > 0.5 { v.clamp(lo, hi) } else { v }),
                    _ => a,
                }
            }
            Program::MaxPool => {
                let p = n[0];
                let mut acc = self.read(0, x * p, y * p);
                for j in 0..p {
                    for i in 0..p {
                        acc = acc.max(self.read(0, x * p + i, y * p + j));
                    }
                }
                acc
            }
            Program::MaxPoolMask => {
                let p = n[0];
                let (bx, by) = (x / p * p, y / p * p);
                let mut best = self.read(0, bx, by);
                for j in 0..p {
                    for i in 0..p {
                        best = best.max(self.read(0, bx + i, by + j));
                    }
                }
                // first position in scan order reaching the max, per channel
                let mut first = [-1i64; 4];
                for j in 0..p {
                    for i in 0..p {
                        let v = self.read(0, bx + i, by + j).0;
                        for c in 0..4 {
                            if first[c] < 0 && v[c] == best.0[c] {
                                first[c] = j * p + i;
                            }
                        }
                    }
                }
                let own = (y - by) * p + (x - bx);
                Texel(first.map(|idx| if idx == own { 1.0 } else { 0.0 }))
            }
            Program::MaxPoolBackward => {
                let p = n[0];
                self.read(0, x / p, y / p) * self.read(1, x, y)
            }
            Program::OutputDelta(act, cost) => {
                let out = self.read(0, x, y).0;
                let expected = self.read(1, x, y).0;
                let z = self.read(2, x, y).0;
                let mask = self.read(3, x, y).0;
                let mut delta = [0.0f32; 4];
                for c in 0..4 {
                    delta[c] = cost.output_delta(act, out[c], expected[c], z[c], f[0]) * mask[c];
                }
                Texel(delta)
            }
            Program::ActivationDerivative(act) => self
                .read(0, x, y)
                .zip(self.read(1, x, y), |d, z| d * act.derivative(z)),
            Program::BackwardDirect => self.read(1, x, y) * self.read(0, x, y),
            Program::FullBackProducts => {
                let (fs, ts) = (n[0], n[1]);
                let (u, xo) = (x / ts, x % ts);
                let (v, yo) = (y / ts, y % ts);
                self.read(1, xo * fs + u, yo * fs + v) * self.read(0, xo, yo)
            }
            Program::BackwardFull => {
                let (fs, ts) = (n[0], n[1]);
                let mut acc = Texel::ZERO;
                for yo in 0..ts {
                    for xo in 0..ts {
                        acc += self.read(1, xo * fs + x, yo * fs + y) * self.read(0, xo, yo);
                    }
                }
                acc
            }
            Program::BackwardSquare => {
                let m = n[0];
                let mut acc = Texel::ZERO;
                for b in 0..m {
                    for a in 0..m {
                        let to = self.read(2, x * m + a, y * m + b).0;
                        if to[0] >= 0.0 {
                            acc += self.read(1, to[0] as i64, to[1] as i64)
                                * self.read(0, to[2] as i64, to[3] as i64);
                        }
                    }
                }
                acc
            }
            Program::BackwardSquareFast => {
                let (k, s, off, ts) = (n[0], n[1], n[2], n[3]);
                let mut acc = Texel::ZERO;
                for j in 0..k {
                    for i in 0..k {
                        if let (Some(ox), Some(oy)) =
                            (window_owner(x - off - i, s, ts), window_owner(y - off - j, s, ts))
                        {
                            acc += self.read(1, ox * k + i, oy * k + j) * self.read(0, ox, oy);
                        }
                    }
                }
                acc
            }
            Program::BackwardConv => {
                let (k, kk, s, off, m) = (n[0], n[1], n[2], n[3], n[4]);
                let mut acc = Texel::ZERO;
                for b in 0..kk {
                    for a in 0..kk {
                        for j in 0..k {
                            for i in 0..k {
                                if let (Some(px), Some(py)) =
                                    (window_owner(x - off - i, s, m), window_owner(y - off - j, s, m))
                                {
                                    acc += self.read(1, a * k + i, b * k + j)
                                        * self.read(0, px * kk + a, py * kk + b);
                                }
                            }
                        }
                    }
                }
                acc
            }
            Program::GradDirect => self.read(1, x, y) * self.read(0, x, y),
            Program::GradFull => {
                let fs = n[0];
                self.read(1, x / fs, y / fs) * self.read(0, x % fs, y % fs)
            }
            Program::GradSquare => {
                let k = n[0];
                let from = self.read(2, x, y).0;
                let input = self.read(0, from[0] as i64, from[1] as i64) * from[2];
                self.read(1, x / k, y / k) * input
            }
            Program::GradSquareFast => {
                let (k, s, off) = (n[0], n[1], n[2]);
                let (ox, oy) = (x / k, y / k);
                self.read(1, ox, oy) * self.read(0, ox * s + off + x % k, oy * s + off + y % k)
            }
            Program::GradConv => {
                let (k, kk, s, off, m) = (n[0], n[1], n[2], n[3], n[4]);
                let (a, i) = (x / k, x % k);
                let (b, j) = (y / k, y % k);
                let mut acc = Texel::ZERO;
                for py in 0..m {
                    for px in 0..m {
                        acc += self.read(1, px * kk + a, py * kk + b)
                            * self.read(0, px * s + off + i, py * s + off + j);
                    }
                }
                acc
            }
            Program::MomentumBlend => self.read(0, x, y) + self.read(1, x, y) * f[0],
            Program::SgdUpdate => self.read(0, x, y) * (1.0 - f[1]) - self.read(1, x, y) * f[0],
        }
    }
}

/// Output position whose window starts `rel` inputs before, if any.
#[inline]
fn window_owner(rel: i64, stride: i64, count: i64) -> Option<i64> {
    if rel < 0 || rel % stride != 0 || rel / stride >= count {
        None
    } else {
        Some(rel / stride)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::Activation;
    use crate::kernel::KernelCall;
    use crate::tensor::TensorBuffer;

    fn splat(backend: &mut HostBackend, size: usize, values: &[f32]) -> TensorBuffer<HostBackend> {
        let data: Vec<f32> = values.iter().flat_map(|&v| [v; 4]).collect();
        TensorBuffer::from_data(backend, size, size, &data).unwrap()
    }

    fn lane0(t: &TensorBuffer<HostBackend>, backend: &HostBackend) -> Vec<f32> {
        t.download(backend).unwrap().chunks(4).map(|c| c[0]).collect()
    }

    #[test]
    fn test_out_of_range_reads_zero() {
        let mut backend = HostBackend::new();
        let input = splat(&mut backend, 2, &[1.0, 2.0, 3.0, 4.0]);
        let mut out = TensorBuffer::square(&mut backend, 2).unwrap();
        // stride 2, offset 1: only the top-left window overlaps the input
        KernelCall::new(Program::ForwardSquareFast)
            .input(&input)
            .ones()
            .zeros()
            .ints(&[2, 2, 1])
            .run(&mut backend, &mut out)
            .unwrap();
        assert_eq!(lane0(&out, &backend), vec![4.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_activate_clamp_modes() {
        let mut backend = HostBackend::new();
        let z = splat(&mut backend, 2, &[-2.0, 0.5, 2.0, 3.0]);
        let mask = splat(&mut backend, 2, &[1.0, 1.0, 0.0, 1.0]);
        let mut out = TensorBuffer::square(&mut backend, 2).unwrap();

        KernelCall::new(Program::Activate(Activation::Linear))
            .input(&z)
            .zeros()
            .float(0, 1.0)
            .float(1, 0.0)
            .float(2, 1.0)
            .int(0, 1)
            .run(&mut backend, &mut out)
            .unwrap();
        assert_eq!(lane0(&out, &backend), vec![0.0, 0.5, 1.0, 1.0]);

        KernelCall::new(Program::Activate(Activation::Linear))
            .input(&z)
            .input(&mask)
            .float(0, 1.0)
            .float(1, 0.0)
            .float(2, 1.0)
            .int(0, 2)
            .run(&mut backend, &mut out)
            .unwrap();
        assert_eq!(lane0(&out, &backend), vec![0.0, 0.5, 2.0, 1.0]);
    }

    #[test]
    fn test_max_pool_and_mask() {
        let mut backend = HostBackend::new();
        let a = splat(
            &mut backend,
            4,
            &[
                1.0, 3.0, 0.0, 0.0, //
                2.0, 3.0, 0.0, 0.0, //
                5.0, 1.0, 7.0, 7.0, //
                0.0, 0.0, 7.0, 7.0,
            ],
        );
        let mut pooled = TensorBuffer::square(&mut backend, 2).unwrap();
        KernelCall::new(Program::MaxPool)
            .input(&a)
            .int(0, 2)
            .run(&mut backend, &mut pooled)
            .unwrap();
        assert_eq!(lane0(&pooled, &backend), vec![3.0, 0.0, 5.0, 7.0]);

        let mut mask = TensorBuffer::square(&mut backend, 4).unwrap();
        KernelCall::new(Program::MaxPoolMask)
            .input(&a)
            .int(0, 2)
            .run(&mut backend, &mut mask)
            .unwrap();
        // one winner per block, ties go to the first in scan order
        assert_eq!(
            lane0(&mask, &backend),
            vec![
                0.0, 1.0, 1.0, 0.0, //
                0.0, 0.0, 0.0, 0.0, //
                1.0, 0.0, 1.0, 0.0, //
                0.0, 0.0, 0.0, 0.0,
            ]
        );
    }

    #[test]
    fn test_one_hot() {
        let mut backend = HostBackend::new();
        let mut out = TensorBuffer::square(&mut backend, 3).unwrap();
        KernelCall::new(Program::OneHot)
            .int(0, 5)
            .run(&mut backend, &mut out)
            .unwrap();
        let lanes = lane0(&out, &backend);
        assert_eq!(lanes.iter().sum::<f32>(), 1.0);
        assert_eq!(lanes[5], 1.0);
    }

    #[test]
    fn test_parallel_matches_sequential_size() {
        // 128×128 crosses the parallel threshold
        let mut backend = HostBackend::new();
        let values: Vec<f32> = (0..128 * 128).map(|i| (i % 17) as f32).collect();
        let a = splat(&mut backend, 128, &values);
        let mut out = TensorBuffer::square(&mut backend, 128).unwrap();
        KernelCall::new(Program::Copy)
            .input(&a)
            .run(&mut backend, &mut out)
            .unwrap();
        assert_eq!(lane0(&out, &backend), values);
        assert_eq!(backend.dispatch_count(), 1);
    }

    #[test]
    fn test_window_owner() {
        assert_eq!(window_owner(4, 2, 3), Some(2));
        assert_eq!(window_owner(3, 2, 3), None);
        assert_eq!(window_owner(-1, 1, 3), None);
        assert_eq!(window_owner(6, 2, 3), None);
    }
}
