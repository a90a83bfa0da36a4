//! In-memory identification (regression) problem.

use super::{check_input, EvaluationType, Expected, ProblemProvider, Sample, TestEvaluation};
use crate::backend::Backend;
use crate::config::NetworkConfig;
use crate::error::{NeurotexError, NeurotexResult};
use crate::tensor::TensorBuffer;

/// Host copy of one identification sample.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentificationSample {
    /// Network input (`input_size² · 4` values).
    pub input: Vec<f32>,
    /// Expected output (`output_size² · 4` values).
    pub expected: Vec<f32>,
    /// Per-value weight of the residual, in `[0, 1]`.
    pub delta_mask: Option<Vec<f32>>,
    /// Where a masked output clamp applies.
    pub clamp_mask: Option<Vec<f32>>,
}

impl IdentificationSample {
    /// Sample without masks.
    pub fn new(input: Vec<f32>, expected: Vec<f32>) -> Self {
        Self {
            input,
            expected,
            delta_mask: None,
            clamp_mask: None,
        }
    }

    /// Sets the delta mask.
    pub fn with_delta_mask(mut self, mask: Vec<f32>) -> Self {
        self.delta_mask = Some(mask);
        self
    }

    /// Sets the clamp mask.
    pub fn with_clamp_mask(mut self, mask: Vec<f32>) -> Self {
        self.clamp_mask = Some(mask);
        self
    }
}

struct Uploaded<B: Backend> {
    input: TensorBuffer<B>,
    expected: TensorBuffer<B>,
    delta_mask: Option<TensorBuffer<B>>,
    clamp_mask: Option<TensorBuffer<B>>,
}

impl<B: Backend> Uploaded<B> {
    fn sample(&self) -> Sample<'_, B> {
        Sample {
            input: &self.input,
            expected: Expected::Tensor(&self.expected),
            delta_mask: self.delta_mask.as_ref(),
            clamp_mask: self.clamp_mask.as_ref(),
        }
    }
}

/// Samples with an expected tensor; a test succeeds when the masked mean
/// squared residual is below the threshold.
pub struct IdentificationProblem<B: Backend> {
    threshold: f32,
    subtract_on_device: bool,
    training: Vec<IdentificationSample>,
    testing: Vec<IdentificationSample>,
    training_tensors: Vec<Uploaded<B>>,
    testing_tensors: Vec<Uploaded<B>>,
}

impl<B: Backend> IdentificationProblem<B> {
    /// Empty problem with a success threshold on the mean squared residual.
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            subtract_on_device: true,
            training: Vec::new(),
            testing: Vec::new(),
            training_tensors: Vec::new(),
            testing_tensors: Vec::new(),
        }
    }

    /// Skips binding the expected tensor during tests and computes the
    /// residual on the host from the plain output.
    pub fn without_device_subtraction(mut self) -> Self {
        self.subtract_on_device = false;
        self
    }

    /// Adds a training sample.
    pub fn add_training(&mut self, sample: IdentificationSample) -> &mut Self {
        self.training.push(sample);
        self
    }

    /// Adds a test sample.
    pub fn add_testing(&mut self, sample: IdentificationSample) -> &mut Self {
        self.testing.push(sample);
        self
    }

    /// Success threshold.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

fn upload<B: Backend>(
    backend: &mut B,
    input_size: usize,
    output_size: usize,
    sample: &IdentificationSample,
) -> NeurotexResult<Uploaded<B>> {
    check_input(&sample.input, input_size)?;
    check_input(&sample.expected, output_size)?;
    let mut mask = |data: &Option<Vec<f32>>| -> NeurotexResult<Option<TensorBuffer<B>>> {
        match data {
            Some(values) => {
                check_input(values, output_size)?;
                TensorBuffer::from_data(backend, output_size, output_size, values).map(Some)
            }
            None => Ok(None),
        }
    };
    let delta_mask = mask(&sample.delta_mask)?;
    let clamp_mask = mask(&sample.clamp_mask)?;
    Ok(Uploaded {
        input: TensorBuffer::from_data(backend, input_size, input_size, &sample.input)?,
        expected: TensorBuffer::from_data(backend, output_size, output_size, &sample.expected)?,
        delta_mask,
        clamp_mask,
    })
}

impl<B: Backend> ProblemProvider<B> for IdentificationProblem<B> {
    fn init(&mut self, backend: &mut B, network: &NetworkConfig) -> NeurotexResult<()> {
        let output_size = network
            .output_layer()
            .map(|l| l.size)
            .ok_or_else(|| NeurotexError::problem("network has no output layer"))?;
        if self.training.is_empty() {
            return Err(NeurotexError::problem("no training samples"));
        }
        self.training_tensors = self
            .training
            .iter()
            .map(|s| upload(backend, network.input_size, output_size, s))
            .collect::<NeurotexResult<_>>()?;
        self.testing_tensors = self
            .testing
            .iter()
            .map(|s| upload(backend, network.input_size, output_size, s))
            .collect::<NeurotexResult<_>>()?;
        log::debug!(
            "identification problem: {} training, {} test samples",
            self.training.len(),
            self.testing.len()
        );
        Ok(())
    }

    fn generate_training_sample(&mut self, _backend: &mut B, index: usize) -> NeurotexResult<Sample<'_, B>> {
        if self.training_tensors.is_empty() {
            return Err(NeurotexError::invalid_state("identification problem not initialized"));
        }
        let slot = index % self.training_tensors.len();
        Ok(self.training_tensors[slot].sample())
    }

    fn generate_testing_sample(&mut self, _backend: &mut B, index: usize) -> NeurotexResult<Sample<'_, B>> {
        if self.testing_tensors.is_empty() {
            return Err(NeurotexError::problem("no test samples"));
        }
        let slot = index % self.testing_tensors.len();
        Ok(self.testing_tensors[slot].sample())
    }

    fn tests_count(&self) -> usize {
        self.testing.len()
    }

    fn evaluate_test(&mut self, index: usize, raw: &[f32]) -> TestEvaluation {
        let Some(sample) = self.testing.get(index % self.testing.len().max(1)) else {
            return TestEvaluation::default();
        };
        let mut weight = 0.0f32;
        let mut squared = 0.0f32;
        for (i, &value) in raw.iter().enumerate().take(sample.expected.len()) {
            let residual = if self.subtract_on_device {
                value
            } else {
                sample.expected[i] - value
            };
            let m = sample.delta_mask.as_ref().map_or(1.0, |mask| mask[i]);
            weight += m;
            squared += m * residual * residual;
        }
        if weight <= 0.0 {
            return TestEvaluation::default();
        }
        let error = squared / weight;
        TestEvaluation {
            is_consider: true,
            success: error < self.threshold,
            error,
            false_positive: false,
            false_negative: false,
        }
    }

    fn needs_test_subtract_expected(&self) -> bool {
        self.subtract_on_device
    }

    fn evaluation_type(&self) -> EvaluationType {
        EvaluationType::MinError
    }
}
