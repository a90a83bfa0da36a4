//! Compute kernel dispatcher.
//!
//! Every computation is one [`Program`] executed over a full target tensor.
//! A call is described explicitly by a [`KernelCall`]: the program, its
//! ordered input [`Binding`]s and its [`Uniforms`]. [`dispatch`] validates
//! the descriptor and then hands it to the backend; nothing is bound
//! implicitly between calls.
//!
//! # Validation
//!
//! Before any backend work, [`dispatch`] checks that:
//!
//! - the backend context is still alive
//! - the number of inputs matches the program
//! - every float uniform the program reads is set, and no float uniform is NaN
//! - the target is not a byte buffer, unless the program is `Copy` or `Fill`
//! - every mip-level binding names an existing level
//!
//! The target is a `&mut` borrow and inputs are `&` borrows, so a kernel can
//! never sample its own target.
//!
//! # Example
//!
//! ```rust
//! use neurotex::{dispatch, HostBackend, KernelCall, Program, TensorBuffer};
//!
//! # fn main() -> neurotex::NeurotexResult<()> {
//! let mut backend = HostBackend::new();
//! let mut target = TensorBuffer::square(&mut backend, 2)?;
//! let call = KernelCall::new(Program::Fill)
//!     .float(0, 1.0)
//!     .float(1, 2.0)
//!     .float(2, 3.0)
//!     .float(3, 4.0);
//! dispatch(&mut backend, call, &mut target)?;
//! assert_eq!(&target.download(&backend)?[..4], &[1.0, 2.0, 3.0, 4.0]);
//! # Ok(())
//! # }
//! ```

use crate::activation::Activation;
use crate::backend::{Backend, Input};
use crate::cost::CostFunction;
use crate::error::{NeurotexError, NeurotexResult};
use crate::tensor::{StorageMode, TensorBuffer};

/// Number of float uniform slots.
pub const FLOAT_SLOTS: usize = 8;

/// Number of integer uniform slots.
pub const INT_SLOTS: usize = 8;

/// Maximum number of inputs a program samples.
pub const MAX_INPUTS: usize = 4;

/// Named kernel programs.
///
/// Inputs are listed in binding order. Integer uniforms carry geometry;
/// float uniforms carry numeric parameters and are validated at dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    /// Constant fill; floats 0..4 per channel.
    Fill,
    /// `out = in`.
    Copy,
    /// Mean of the 2×2 block of the level below.
    Downsample,
    /// `out = a − b`.
    Residual,
    /// One-hot class grid; int 0 = class index.
    OneHot,
    /// `out = w·x + b`.
    ForwardDirect,
    /// Dense products `w(X, Y) · x(X mod F, Y mod F)`; int 0 = F.
    FullProducts,
    /// `out = level · f0 + extra`, completes a mip reduction.
    MipSum,
    /// Dense weighted sum by looping; int 0 = F.
    ForwardFullNPoT,
    /// Window sum through the `from` index tensor; int 0 = k.
    ForwardSquare,
    /// Window sum with arithmetic addressing; ints k, stride, offset.
    ForwardSquareFast,
    /// Kernel bank sum, interleaved output; ints k, kk, stride, offset.
    ForwardConv,
    /// Interleaved to tiled layout; ints kk, M.
    Reorganize,
    /// Tiled to interleaved layout; ints kk, M.
    Unreorganize,
    /// Activation, scale and clamp; floats scale, min, max; int clamp mode.
    Activate(Activation),
    /// Max over `p × p` blocks; int 0 = p.
    MaxPool,
    /// 1 where a texel is the first maximum of its block; int 0 = p.
    MaxPoolMask,
    /// Expands a pooled delta through the mask; int 0 = p.
    MaxPoolBackward,
    /// Output-layer delta; float 0 = output scale.
    OutputDelta(Activation, CostFunction),
    /// `out = delta · act'(z)`.
    ActivationDerivative(Activation),
    /// `out = w · delta`.
    BackwardDirect,
    /// Transposed dense products; ints F, T.
    FullBackProducts,
    /// Transposed dense sum by looping; ints F, T.
    BackwardFull,
    /// Transposed window sum through the `to` index tensor; int 0 = m.
    BackwardSquare,
    /// Transposed window sum, arithmetic; ints k, stride, offset, T.
    BackwardSquareFast,
    /// Transposed kernel bank sum; ints k, kk, stride, offset, M.
    BackwardConv,
    /// `g = delta · x`.
    GradDirect,
    /// Dense weight gradient; int 0 = F.
    GradFull,
    /// Window weight gradient through `from`; int 0 = k.
    GradSquare,
    /// Window weight gradient, arithmetic; ints k, stride, offset.
    GradSquareFast,
    /// Kernel gradient summed over positions; ints k, kk, stride, offset, M.
    GradConv,
    /// `v = g + f0 · v_prev`.
    MomentumBlend,
    /// `w = w · (1 − f1) − f0 · step`.
    SgdUpdate,
}

impl Program {
    /// Stable program name, used for pipeline labels and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Program::Fill => "fill",
            Program::Copy => "copy",
            Program::Downsample => "downsample",
            Program::Residual => "residual",
            Program::OneHot => "one_hot",
            Program::ForwardDirect => "forward_direct",
            Program::FullProducts => "full_products",
            Program::MipSum => "mip_sum",
            Program::ForwardFullNPoT => "forward_full_npot",
            Program::ForwardSquare => "forward_square",
            Program::ForwardSquareFast => "forward_square_fast",
            Program::ForwardConv => "forward_conv",
            Program::Reorganize => "reorganize",
            Program::Unreorganize => "unreorganize",
            Program::Activate(_) => "activate",
            Program::MaxPool => "max_pool",
            Program::MaxPoolMask => "max_pool_mask",
            Program::MaxPoolBackward => "max_pool_backward",
            Program::OutputDelta(..) => "output_delta",
            Program::ActivationDerivative(_) => "activation_derivative",
            Program::BackwardDirect => "backward_direct",
            Program::FullBackProducts => "full_back_products",
            Program::BackwardFull => "backward_full",
            Program::BackwardSquare => "backward_square",
            Program::BackwardSquareFast => "backward_square_fast",
            Program::BackwardConv => "backward_conv",
            Program::GradDirect => "grad_direct",
            Program::GradFull => "grad_full",
            Program::GradSquare => "grad_square",
            Program::GradSquareFast => "grad_square_fast",
            Program::GradConv => "grad_conv",
            Program::MomentumBlend => "momentum_blend",
            Program::SgdUpdate => "sgd_update",
        }
    }

    /// Number of inputs the program samples.
    pub fn input_count(&self) -> usize {
        match self {
            Program::Fill | Program::OneHot => 0,
            Program::Copy
            | Program::Downsample
            | Program::Reorganize
            | Program::Unreorganize
            | Program::MaxPool
            | Program::MaxPoolMask => 1,
            Program::ForwardDirect
            | Program::ForwardFullNPoT
            | Program::ForwardSquareFast
            | Program::ForwardConv
            | Program::BackwardSquare
            | Program::GradSquare => 3,
            Program::ForwardSquare | Program::OutputDelta(..) => 4,
            _ => 2,
        }
    }

    /// Float uniform slots the program reads.
    pub fn required_floats(&self) -> &'static [usize] {
        match self {
            Program::Fill => &[0, 1, 2, 3],
            Program::Activate(_) => &[0, 1, 2],
            Program::MipSum | Program::OutputDelta(..) | Program::MomentumBlend => &[0],
            Program::SgdUpdate => &[0, 1],
            _ => &[],
        }
    }

    /// Whether the program may write a byte (display) buffer.
    pub fn writes_display(&self) -> bool {
        matches!(self, Program::Fill | Program::Copy)
    }
}

impl std::fmt::Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Program::Activate(act) | Program::ActivationDerivative(act) => {
                write!(f, "{}_{}", self.name(), act)
            }
            Program::OutputDelta(act, cost) => write!(f, "{}_{}_{}", self.name(), act, cost),
            _ => f.write_str(self.name()),
        }
    }
}

/// Uniform parameters of one call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Uniforms {
    floats: [Option<f32>; FLOAT_SLOTS],
    ints: [i32; INT_SLOTS],
}

impl Uniforms {
    /// No uniform set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a float slot.
    pub fn with_float(mut self, slot: usize, value: f32) -> Self {
        self.floats[slot] = Some(value);
        self
    }

    /// Sets an integer slot.
    pub fn with_int(mut self, slot: usize, value: i32) -> Self {
        self.ints[slot] = value;
        self
    }

    /// Float slot value, if set.
    pub fn float(&self, slot: usize) -> Option<f32> {
        self.floats.get(slot).copied().flatten()
    }

    /// Float slots with unset ones as zero.
    pub fn resolved_floats(&self) -> [f32; FLOAT_SLOTS] {
        self.floats.map(|f| f.unwrap_or(0.0))
    }

    /// Integer slots.
    pub fn ints(&self) -> [i32; INT_SLOTS] {
        self.ints
    }

    fn validate(&self, program: Program) -> NeurotexResult<()> {
        for &slot in program.required_floats() {
            if self.floats[slot].is_none() {
                return Err(NeurotexError::invalid_uniform(program.name(), slot, "not set"));
            }
        }
        for (slot, value) in self.floats.iter().enumerate() {
            if value.is_some_and(f32::is_nan) {
                return Err(NeurotexError::invalid_uniform(program.name(), slot, "NaN"));
            }
        }
        Ok(())
    }
}

/// One kernel input.
pub enum Binding<'a, B: Backend> {
    /// Level 0 of a tensor.
    Tensor(&'a TensorBuffer<B>),
    /// A mip level of a tensor.
    Level(&'a TensorBuffer<B>, usize),
    /// Shared all-zeros binding.
    Zeros,
    /// Shared all-ones binding.
    Ones,
}

/// Explicit binding descriptor for one dispatch.
pub struct KernelCall<'a, B: Backend> {
    program: Program,
    inputs: Vec<Binding<'a, B>>,
    uniforms: Uniforms,
}

impl<'a, B: Backend> KernelCall<'a, B> {
    /// Starts a call with no inputs and no uniforms.
    pub fn new(program: Program) -> Self {
        Self {
            program,
            inputs: Vec::with_capacity(MAX_INPUTS),
            uniforms: Uniforms::new(),
        }
    }

    /// Binds level 0 of a tensor.
    pub fn input(mut self, tensor: &'a TensorBuffer<B>) -> Self {
        self.inputs.push(Binding::Tensor(tensor));
        self
    }

    /// Binds a mip level of a tensor.
    pub fn level(mut self, tensor: &'a TensorBuffer<B>, level: usize) -> Self {
        self.inputs.push(Binding::Level(tensor, level));
        self
    }

    /// Binds the shared zeros.
    pub fn zeros(mut self) -> Self {
        self.inputs.push(Binding::Zeros);
        self
    }

    /// Binds the shared ones.
    pub fn ones(mut self) -> Self {
        self.inputs.push(Binding::Ones);
        self
    }

    /// Binds a tensor, or the shared zeros when absent.
    pub fn input_or_zeros(mut self, tensor: Option<&'a TensorBuffer<B>>) -> Self {
        self.inputs.push(tensor.map_or(Binding::Zeros, Binding::Tensor));
        self
    }

    /// Binds a tensor, or the shared ones when absent.
    pub fn input_or_ones(mut self, tensor: Option<&'a TensorBuffer<B>>) -> Self {
        self.inputs.push(tensor.map_or(Binding::Ones, Binding::Tensor));
        self
    }

    /// Sets a float uniform.
    pub fn float(mut self, slot: usize, value: f32) -> Self {
        self.uniforms = self.uniforms.with_float(slot, value);
        self
    }

    /// Sets an integer uniform.
    pub fn int(mut self, slot: usize, value: i32) -> Self {
        self.uniforms = self.uniforms.with_int(slot, value);
        self
    }

    /// Sets several integer uniforms from slot 0.
    pub fn ints(mut self, values: &[i32]) -> Self {
        for (slot, &value) in values.iter().enumerate() {
            self.uniforms = self.uniforms.with_int(slot, value);
        }
        self
    }

    /// Program of the call.
    pub fn program(&self) -> Program {
        self.program
    }

    /// Dispatches into `target`.
    pub fn run(self, backend: &mut B, target: &mut TensorBuffer<B>) -> NeurotexResult<()> {
        dispatch(backend, self, target)
    }
}

/// Validates a call and executes it over the whole target.
pub fn dispatch<B: Backend>(
    backend: &mut B,
    call: KernelCall<'_, B>,
    target: &mut TensorBuffer<B>,
) -> NeurotexResult<()> {
    let KernelCall {
        program,
        inputs,
        uniforms,
    } = call;

    if backend.is_context_lost() {
        return Err(NeurotexError::context_lost(format!(
            "cannot dispatch '{}'",
            program.name()
        )));
    }
    if inputs.len() != program.input_count() {
        return Err(NeurotexError::BindingCount {
            program: program.name(),
            expected: program.input_count(),
            got: inputs.len(),
        });
    }
    uniforms.validate(program)?;
    if target.mode() == StorageMode::Byte && !program.writes_display() {
        return Err(NeurotexError::ChannelSemantics(program.name()));
    }

    let mut resolved = Vec::with_capacity(inputs.len());
    for binding in &inputs {
        resolved.push(match binding {
            Binding::Tensor(tensor) => tensor.as_input(),
            Binding::Level(tensor, level) => {
                match (tensor.level_buffer(*level), tensor.level_desc(*level)) {
                    (Some(buffer), Some(desc)) => Input::Buffer(buffer, desc),
                    _ => {
                        return Err(NeurotexError::MissingMipLevel {
                            level: *level,
                            available: tensor.mip_levels(),
                        })
                    }
                }
            }
            Binding::Zeros => Input::Zeros,
            Binding::Ones => Input::Ones,
        });
    }

    log::trace!(
        "dispatch {} -> {}x{}",
        program,
        target.width(),
        target.height()
    );
    backend.execute(program, &resolved, &uniforms, target.as_target())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostBackend;

    fn tensor(backend: &mut HostBackend, value: f32) -> TensorBuffer<HostBackend> {
        TensorBuffer::from_data(backend, 2, 2, &[value; 16]).unwrap()
    }

    #[test]
    fn test_input_counts() {
        assert_eq!(Program::Fill.input_count(), 0);
        assert_eq!(Program::ForwardSquare.input_count(), 4);
        assert_eq!(Program::SgdUpdate.input_count(), 2);
        assert_eq!(Program::Activate(Activation::Relu).input_count(), 2);
    }

    #[test]
    fn test_nan_uniform_rejected() {
        let mut backend = HostBackend::new();
        let w = tensor(&mut backend, 1.0);
        let g = tensor(&mut backend, 1.0);
        let mut out = tensor(&mut backend, 0.0);
        let err = KernelCall::new(Program::SgdUpdate)
            .input(&w)
            .input(&g)
            .float(0, f32::NAN)
            .float(1, 0.0)
            .run(&mut backend, &mut out)
            .unwrap_err();
        assert!(matches!(err, NeurotexError::InvalidUniform { slot: 0, .. }));
        // nothing was written
        assert_eq!(out.download(&backend).unwrap(), vec![0.0; 16]);
    }

    #[test]
    fn test_missing_uniform_rejected() {
        let mut backend = HostBackend::new();
        let w = tensor(&mut backend, 1.0);
        let g = tensor(&mut backend, 1.0);
        let mut out = tensor(&mut backend, 0.0);
        let err = KernelCall::new(Program::SgdUpdate)
            .input(&w)
            .input(&g)
            .float(0, 0.1)
            .run(&mut backend, &mut out)
            .unwrap_err();
        assert!(matches!(err, NeurotexError::InvalidUniform { slot: 1, reason: "not set", .. }));
    }

    #[test]
    fn test_binding_count_checked() {
        let mut backend = HostBackend::new();
        let a = tensor(&mut backend, 1.0);
        let mut out = tensor(&mut backend, 0.0);
        let err = KernelCall::new(Program::Residual)
            .input(&a)
            .run(&mut backend, &mut out)
            .unwrap_err();
        assert!(matches!(err, NeurotexError::BindingCount { expected: 2, got: 1, .. }));
    }

    #[test]
    fn test_byte_target_rejected_for_numeric_kernel() {
        let mut backend = HostBackend::new();
        let a = tensor(&mut backend, 0.25);
        let mut display = TensorBuffer::new(&mut backend, 2, 2, StorageMode::Byte).unwrap();
        let err = KernelCall::new(Program::Residual)
            .input(&a)
            .zeros()
            .run(&mut backend, &mut display)
            .unwrap_err();
        assert!(matches!(err, NeurotexError::ChannelSemantics("residual")));

        KernelCall::new(Program::Copy)
            .input(&a)
            .run(&mut backend, &mut display)
            .unwrap();
        assert_eq!(display.download(&backend).unwrap()[0], 64.0 / 255.0);
    }

    #[test]
    fn test_missing_mip_level_rejected() {
        let mut backend = HostBackend::new();
        let products = TensorBuffer::with_mipmaps(&mut backend, 2, 2).unwrap();
        let mut out = TensorBuffer::square(&mut backend, 1).unwrap();
        let err = KernelCall::new(Program::MipSum)
            .level(&products, 4)
            .zeros()
            .float(0, 4.0)
            .run(&mut backend, &mut out)
            .unwrap_err();
        assert!(matches!(err, NeurotexError::MissingMipLevel { level: 4, available: 2 }));
    }

    #[test]
    fn test_lost_context_rejected() {
        let mut backend = HostBackend::new();
        let mut out = tensor(&mut backend, 0.0);
        backend.lose_context();
        let err = KernelCall::new(Program::Fill)
            .float(0, 1.0)
            .float(1, 1.0)
            .float(2, 1.0)
            .float(3, 1.0)
            .run(&mut backend, &mut out)
            .unwrap_err();
        assert!(err.is_context_lost());
    }

    #[test]
    fn test_program_display() {
        assert_eq!(Program::Activate(Activation::Sigmoid).to_string(), "activate_sigmoid");
        assert_eq!(
            Program::OutputDelta(Activation::Linear, CostFunction::Quadratic).to_string(),
            "output_delta_linear_quadratic"
        );
    }
}
