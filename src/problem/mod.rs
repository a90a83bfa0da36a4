//! Problem providers: where training and test samples come from.
//!
//! The trainer never loads data itself. It asks a [`ProblemProvider`] for one
//! [`Sample`] at a time, runs it through the network, and hands the raw
//! downloaded result back to [`ProblemProvider::evaluate_test`].
//!
//! Two in-memory providers are included:
//!
//! - [`ClassificationProblem`]: expected output is a class index, scored by
//!   argmax over the mean of the 4 channels.
//! - [`IdentificationProblem`]: expected output is a tensor, scored by mean
//!   squared residual against a threshold.

mod classification;
mod identification;

pub use classification::ClassificationProblem;
pub use identification::{IdentificationProblem, IdentificationSample};

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::config::{NetworkConfig, ProblemKind};
use crate::error::{NeurotexError, NeurotexResult};
use crate::tensor::{TensorBuffer, CHANNELS};

/// Expected network output of a sample.
pub enum Expected<'a, B: Backend> {
    /// Full expected tensor (identification).
    Tensor(&'a TensorBuffer<B>),
    /// Class index; expands to a one-hot tensor on the backend.
    Class(usize),
}

impl<B: Backend> Clone for Expected<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: Backend> Copy for Expected<'_, B> {}

impl<B: Backend> std::fmt::Debug for Expected<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expected::Tensor(t) => f.debug_tuple("Tensor").field(&t.dims()).finish(),
            Expected::Class(c) => f.debug_tuple("Class").field(c).finish(),
        }
    }
}

/// One training or test sample, borrowed from its provider.
pub struct Sample<'a, B: Backend> {
    /// Network input (`input_size × input_size`).
    pub input: &'a TensorBuffer<B>,
    /// Expected output.
    pub expected: Expected<'a, B>,
    /// Restricts which outputs contribute to the output delta.
    pub delta_mask: Option<&'a TensorBuffer<B>>,
    /// Selects the outputs a masked clamp applies to.
    pub clamp_mask: Option<&'a TensorBuffer<B>>,
}

impl<'a, B: Backend> Sample<'a, B> {
    /// Sample with no masks.
    pub fn new(input: &'a TensorBuffer<B>, expected: Expected<'a, B>) -> Self {
        Self {
            input,
            expected,
            delta_mask: None,
            clamp_mask: None,
        }
    }
}

/// How test results are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvaluationType {
    /// Higher success rate wins (classification).
    #[serde(rename = "MAXSUCCESSRATE")]
    MaxSuccessRate,
    /// Lower cumulative error wins (identification).
    #[serde(rename = "MINERROR")]
    MinError,
}

impl EvaluationType {
    /// Policy attached to a problem kind.
    pub fn for_problem(kind: ProblemKind) -> Self {
        match kind {
            ProblemKind::Classification => EvaluationType::MaxSuccessRate,
            ProblemKind::Identification => EvaluationType::MinError,
        }
    }
}

/// Outcome of one test sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TestEvaluation {
    /// Whether the sample counts toward the test result.
    pub is_consider: bool,
    /// Whether the network got it right.
    pub success: bool,
    /// Error contributed by this sample.
    pub error: f32,
    /// Predicted positive where the truth is the negative class.
    pub false_positive: bool,
    /// Predicted the negative class where the truth is positive.
    pub false_negative: bool,
}

/// Source of samples and judge of test outputs.
pub trait ProblemProvider<B: Backend> {
    /// Uploads the problem's data once the network topology is known.
    fn init(&mut self, backend: &mut B, network: &NetworkConfig) -> NeurotexResult<()>;

    /// Sample used by the `index`-th training step (minibatch × size + slot).
    fn generate_training_sample(&mut self, backend: &mut B, index: usize) -> NeurotexResult<Sample<'_, B>>;

    /// `index`-th sample of a test cycle.
    fn generate_testing_sample(&mut self, backend: &mut B, index: usize) -> NeurotexResult<Sample<'_, B>>;

    /// Samples in one test cycle.
    fn tests_count(&self) -> usize;

    /// Scores the raw result of test `index`.
    ///
    /// `raw` is `output − expected` when [`needs_test_subtract_expected`]
    /// returns true and the plain output otherwise.
    ///
    /// [`needs_test_subtract_expected`]: ProblemProvider::needs_test_subtract_expected
    fn evaluate_test(&mut self, index: usize, raw: &[f32]) -> TestEvaluation;

    /// Whether the trainer binds the expected tensor during test feedforward.
    fn needs_test_subtract_expected(&self) -> bool {
        true
    }

    /// How test results are compared.
    fn evaluation_type(&self) -> EvaluationType;
}

/// Checks a host sample against the network's input size.
pub(crate) fn check_input(data: &[f32], size: usize) -> NeurotexResult<()> {
    let expected = size * size * CHANNELS;
    if data.len() != expected {
        return Err(NeurotexError::DataLength {
            expected,
            got: data.len(),
        });
    }
    Ok(())
}

/// Mean of the 4 channels of each texel.
pub(crate) fn channel_means(raw: &[f32]) -> impl Iterator<Item = f32> + '_ {
    raw.chunks_exact(CHANNELS)
        .map(|c| c.iter().sum::<f32>() / CHANNELS as f32)
}
