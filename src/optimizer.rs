//! SGD with momentum and L2 decay, run as kernels.
//!
//! One update of a parameter tensor `w` with gradient `g`:
//!
//! ```text
//! v ← g + μ·v              (MomentumBlend, only when μ > 0)
//! w ← w·(1 − l2) − rate·v  (SgdUpdate; v = g when μ = 0)
//! ```
//!
//! With `μ = 0` and `l2 = 0` the update is exactly `w − rate·g`.
//! Both `w` and `v` are [`PingPong`] pairs: kernels never write what they read.
//!
//! The learning rate follows a [`LrScheduler`]; the trainer uses
//! [`HalfLifeDecay`], an exponential schedule that halves the rate every
//! `period` minibatches.

use crate::backend::Backend;
use crate::error::NeurotexResult;
use crate::kernel::{KernelCall, Program};
use crate::tensor::{PingPong, TensorBuffer};

/// Hyperparameters of one update step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SgdParams {
    /// Effective learning rate (decay already applied).
    pub rate: f32,
    /// Effective L2 decay (decay already applied).
    pub l2_decay: f32,
    /// Momentum coefficient.
    pub momentum: f32,
}

impl SgdParams {
    /// Plain SGD.
    pub fn new(rate: f32) -> Self {
        Self {
            rate,
            l2_decay: 0.0,
            momentum: 0.0,
        }
    }

    /// Sets the L2 decay.
    pub fn with_l2(mut self, l2_decay: f32) -> Self {
        self.l2_decay = l2_decay;
        self
    }

    /// Sets the momentum coefficient.
    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }
}

/// Which parameters of a layer are updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearningMask {
    /// Update connectivity weights.
    pub weights: bool,
    /// Update the bias.
    pub bias: bool,
}

impl Default for LearningMask {
    fn default() -> Self {
        Self::ALL
    }
}

impl LearningMask {
    /// Weights and bias.
    pub const ALL: LearningMask = LearningMask {
        weights: true,
        bias: true,
    };
    /// Weights only.
    pub const WEIGHTS_ONLY: LearningMask = LearningMask {
        weights: true,
        bias: false,
    };
    /// Frozen layer.
    pub const NONE: LearningMask = LearningMask {
        weights: false,
        bias: false,
    };
}

/// Parameter tensor with its momentum accumulator.
pub struct SgdState<B: Backend> {
    /// Parameter values.
    pub values: PingPong<B>,
    /// Momentum accumulator.
    pub velocity: PingPong<B>,
}

impl<B: Backend> SgdState<B> {
    /// Wraps initial values with a zero accumulator.
    pub fn new(backend: &mut B, width: usize, height: usize, data: &[f32]) -> NeurotexResult<Self> {
        Ok(Self {
            values: PingPong::from_data(backend, width, height, data)?,
            velocity: PingPong::from_data(backend, width, height, &vec![0.0; data.len()])?,
        })
    }

    /// Current values.
    #[inline]
    pub fn front(&self) -> &TensorBuffer<B> {
        self.values.front()
    }

    /// Applies one update with `gradient`.
    pub fn step(&mut self, backend: &mut B, gradient: &TensorBuffer<B>, params: &SgdParams) -> NeurotexResult<()> {
        if params.momentum > 0.0 {
            let (previous, next) = self.velocity.split();
            KernelCall::new(Program::MomentumBlend)
                .input(gradient)
                .input(previous)
                .float(0, params.momentum)
                .run(backend, next)?;
            self.velocity.swap();
        }
        let step = if params.momentum > 0.0 {
            self.velocity.front()
        } else {
            gradient
        };
        let (current, next) = self.values.split();
        KernelCall::new(Program::SgdUpdate)
            .input(current)
            .input(step)
            .float(0, params.rate)
            .float(1, params.l2_decay)
            .run(backend, next)?;
        self.values.swap();
        Ok(())
    }

    /// Zeroes the momentum accumulator.
    pub fn reset_momentum(&mut self, backend: &mut B) -> NeurotexResult<()> {
        self.velocity.reset(backend)
    }
}

/// Learning-rate schedule.
pub trait LrScheduler {
    /// Multiplier applied to the base rate at `minibatch`.
    fn factor(&self, minibatch: usize) -> f32;
}

/// No decay.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantRate;

impl LrScheduler for ConstantRate {
    fn factor(&self, _minibatch: usize) -> f32 {
        1.0
    }
}

/// `exp(−ln 2 / period · minibatch)`: the factor halves every `period` minibatches.
#[derive(Debug, Clone, Copy)]
pub struct HalfLifeDecay {
    /// Half-life in minibatches.
    pub period: f32,
}

impl HalfLifeDecay {
    /// Creates a schedule with the given half-life.
    pub fn new(period: f32) -> Self {
        Self { period }
    }
}

impl LrScheduler for HalfLifeDecay {
    fn factor(&self, minibatch: usize) -> f32 {
        (-(std::f64::consts::LN_2 / self.period as f64) * minibatch as f64).exp() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostBackend;

    fn state(backend: &mut HostBackend, w: f32) -> SgdState<HostBackend> {
        SgdState::new(backend, 1, 1, &[w; 4]).unwrap()
    }

    fn grad(backend: &mut HostBackend, g: f32) -> TensorBuffer<HostBackend> {
        TensorBuffer::from_data(backend, 1, 1, &[g; 4]).unwrap()
    }

    #[test]
    fn test_plain_step_is_exact() {
        let mut backend = HostBackend::new();
        let (w, g, rate) = (0.731f32, -0.277f32, 0.013f32);
        let mut s = state(&mut backend, w);
        let gradient = grad(&mut backend, g);
        s.step(&mut backend, &gradient, &SgdParams::new(rate)).unwrap();
        assert_eq!(s.front().download(&backend).unwrap()[0], w - rate * g);
    }

    #[test]
    fn test_momentum_accumulates() {
        let mut backend = HostBackend::new();
        let mut s = state(&mut backend, 1.0);
        let gradient = grad(&mut backend, 1.0);
        let params = SgdParams::new(0.1).with_momentum(0.5);
        s.step(&mut backend, &gradient, &params).unwrap();
        // v = 1
        assert!((s.front().download(&backend).unwrap()[0] - 0.9).abs() < 1e-6);
        s.step(&mut backend, &gradient, &params).unwrap();
        // v = 1 + 0.5 = 1.5
        assert!((s.front().download(&backend).unwrap()[0] - 0.75).abs() < 1e-6);

        s.reset_momentum(&mut backend).unwrap();
        s.step(&mut backend, &gradient, &params).unwrap();
        assert!((s.front().download(&backend).unwrap()[0] - 0.65).abs() < 1e-6);
    }

    #[test]
    fn test_l2_decay_shrinks() {
        let mut backend = HostBackend::new();
        let mut s = state(&mut backend, 2.0);
        let gradient = grad(&mut backend, 0.0);
        s.step(&mut backend, &gradient, &SgdParams::new(0.1).with_l2(0.5))
            .unwrap();
        assert_eq!(s.front().download(&backend).unwrap()[0], 1.0);
    }

    #[test]
    fn test_half_life_decay() {
        let decay = HalfLifeDecay::new(100.0);
        assert_eq!(decay.factor(0), 1.0);
        assert!((decay.factor(100) - 0.5).abs() < 1e-6);
        assert!((decay.factor(200) - 0.25).abs() < 1e-6);
        assert_eq!(ConstantRate.factor(1000), 1.0);
    }
}
