//! In-memory classification problem.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{channel_means, check_input, EvaluationType, Expected, ProblemProvider, Sample, TestEvaluation};
use crate::backend::Backend;
use crate::config::{ConfigError, NetworkConfig};
use crate::error::{NeurotexError, NeurotexResult};
use crate::tensor::TensorBuffer;

/// Labelled inputs; the network's first `classes_count` output texels are
/// the class scores.
pub struct ClassificationProblem<B: Backend> {
    classes_count: usize,
    negative_class: Option<usize>,
    training: Vec<(Vec<f32>, usize)>,
    testing: Vec<(Vec<f32>, usize)>,
    training_tensors: Vec<TensorBuffer<B>>,
    testing_tensors: Vec<TensorBuffer<B>>,
    order: Vec<usize>,
    epoch: Option<usize>,
    rng: Option<SmallRng>,
}

impl<B: Backend> ClassificationProblem<B> {
    /// Empty problem with `classes_count` classes.
    pub fn new(classes_count: usize) -> Self {
        Self {
            classes_count,
            negative_class: None,
            training: Vec::new(),
            testing: Vec::new(),
            training_tensors: Vec::new(),
            testing_tensors: Vec::new(),
            order: Vec::new(),
            epoch: None,
            rng: None,
        }
    }

    /// Class counted for false positives and negatives.
    pub fn with_negative_class(mut self, class: usize) -> Self {
        self.negative_class = Some(class);
        self
    }

    /// Visits training samples in a fresh random order every epoch.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.rng = Some(SmallRng::seed_from_u64(seed));
        self
    }

    /// Adds a training sample (`input_size² · 4` values).
    pub fn add_training(&mut self, input: Vec<f32>, class: usize) -> &mut Self {
        self.training.push((input, class));
        self
    }

    /// Adds a test sample.
    pub fn add_testing(&mut self, input: Vec<f32>, class: usize) -> &mut Self {
        self.testing.push((input, class));
        self
    }

    /// Number of classes.
    pub fn classes_count(&self) -> usize {
        self.classes_count
    }

    fn training_slot(&mut self, index: usize) -> usize {
        let len = self.training.len();
        let epoch = index / len;
        if self.epoch != Some(epoch) {
            self.order = (0..len).collect();
            if let Some(rng) = self.rng.as_mut() {
                self.order.shuffle(rng);
            }
            self.epoch = Some(epoch);
        }
        self.order[index % len]
    }

    /// Index of the highest score, first one on ties.
    pub fn predict(&self, raw: &[f32]) -> Option<usize> {
        channel_means(raw)
            .take(self.classes_count)
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (class, score)| match best {
                Some((_, top)) if top >= score => best,
                _ => Some((class, score)),
            })
            .map(|(class, _)| class)
    }
}

fn upload_all<B: Backend>(
    backend: &mut B,
    size: usize,
    samples: &[(Vec<f32>, usize)],
    classes: usize,
) -> NeurotexResult<Vec<TensorBuffer<B>>> {
    samples
        .iter()
        .map(|(input, class)| {
            check_input(input, size)?;
            if *class >= classes {
                return Err(NeurotexError::problem(format!(
                    "class {} out of range 0..{}",
                    class, classes
                )));
            }
            TensorBuffer::from_data(backend, size, size, input)
        })
        .collect()
}

impl<B: Backend> ProblemProvider<B> for ClassificationProblem<B> {
    fn init(&mut self, backend: &mut B, network: &NetworkConfig) -> NeurotexResult<()> {
        let output = network
            .output_layer()
            .ok_or(ConfigError::MissingField("layers"))?;
        let available = output.classes_count.unwrap_or(output.size * output.size);
        if self.classes_count == 0 || self.classes_count > available {
            return Err(ConfigError::invalid(
                "classesCount",
                format!("{} classes for {} output texels", self.classes_count, available),
            )
            .into());
        }
        if self.training.is_empty() {
            return Err(NeurotexError::problem("no training samples"));
        }
        self.training_tensors = upload_all(backend, network.input_size, &self.training, self.classes_count)?;
        self.testing_tensors = upload_all(backend, network.input_size, &self.testing, self.classes_count)?;
        self.epoch = None;
        log::debug!(
            "classification problem: {} training, {} test samples, {} classes",
            self.training.len(),
            self.testing.len(),
            self.classes_count
        );
        Ok(())
    }

    fn generate_training_sample(&mut self, _backend: &mut B, index: usize) -> NeurotexResult<Sample<'_, B>> {
        if self.training_tensors.len() != self.training.len() || self.training.is_empty() {
            return Err(NeurotexError::invalid_state("classification problem not initialized"));
        }
        let slot = self.training_slot(index);
        Ok(Sample::new(
            &self.training_tensors[slot],
            Expected::Class(self.training[slot].1),
        ))
    }

    fn generate_testing_sample(&mut self, _backend: &mut B, index: usize) -> NeurotexResult<Sample<'_, B>> {
        if self.testing_tensors.is_empty() {
            return Err(NeurotexError::problem("no test samples"));
        }
        let slot = index % self.testing_tensors.len();
        Ok(Sample::new(
            &self.testing_tensors[slot],
            Expected::Class(self.testing[slot].1),
        ))
    }

    fn tests_count(&self) -> usize {
        self.testing.len()
    }

    fn evaluate_test(&mut self, index: usize, raw: &[f32]) -> TestEvaluation {
        let Some(&(_, expected)) = self.testing.get(index % self.testing.len().max(1)) else {
            return TestEvaluation::default();
        };
        let predicted = self.predict(raw);
        let error = channel_means(raw)
            .take(self.classes_count)
            .enumerate()
            .map(|(class, score)| {
                let target = if class == expected { 1.0 } else { 0.0 };
                0.5 * (score - target) * (score - target)
            })
            .sum();
        let (false_positive, false_negative) = match (self.negative_class, predicted) {
            (Some(negative), Some(p)) => (
                expected == negative && p != negative,
                expected != negative && p == negative,
            ),
            _ => (false, false),
        };
        TestEvaluation {
            is_consider: true,
            success: predicted == Some(expected),
            error,
            false_positive,
            false_negative,
        }
    }

    fn needs_test_subtract_expected(&self) -> bool {
        false
    }

    fn evaluation_type(&self) -> EvaluationType {
        EvaluationType::MaxSuccessRate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostBackend;

    fn scores(values: &[[f32; 4]]) -> Vec<f32> {
        values.iter().flatten().copied().collect()
    }

    #[test]
    fn test_argmax_uses_channel_mean() {
        let problem = ClassificationProblem::<HostBackend>::new(3);
        // lane 0 alone would pick class 0; the means pick class 1
        let raw = scores(&[[0.9, 0.0, 0.0, 0.0], [0.5, 0.5, 0.5, 0.5], [0.1; 4]]);
        assert_eq!(problem.predict(&raw), Some(1));
    }

    #[test]
    fn test_ties_pick_first() {
        let problem = ClassificationProblem::<HostBackend>::new(2);
        assert_eq!(problem.predict(&scores(&[[0.3; 4], [0.3; 4]])), Some(0));
    }

    #[test]
    fn test_evaluate_success_iff_argmax_matches() {
        let mut problem = ClassificationProblem::<HostBackend>::new(2).with_negative_class(0);
        problem.add_testing(vec![0.0; 4], 1).add_testing(vec![0.0; 4], 0);

        let hit = problem.evaluate_test(0, &scores(&[[0.2; 4], [0.8; 4]]));
        assert!(hit.success && !hit.false_negative && !hit.false_positive);

        let miss = problem.evaluate_test(0, &scores(&[[0.8; 4], [0.2; 4]]));
        assert!(!miss.success && miss.false_negative);

        let fp = problem.evaluate_test(1, &scores(&[[0.1; 4], [0.9; 4]]));
        assert!(!fp.success && fp.false_positive);
    }

    #[test]
    fn test_shuffled_order_visits_every_sample() {
        let mut backend = HostBackend::new();
        let config = NetworkConfig::new(1, crate::config::ProblemKind::Classification).layer(
            crate::config::LayerConfig::new(
                2,
                crate::config::ConnectivityConfig::FullNPoT,
                crate::activation::Activation::Sigmoid,
            ),
        );
        let mut problem = ClassificationProblem::new(3).shuffled(7);
        for class in 0..3 {
            problem.add_training(vec![class as f32; 4], class);
        }
        problem.init(&mut backend, &config).unwrap();

        let mut seen: Vec<usize> = (3..6)
            .map(|i| match problem.generate_training_sample(&mut backend, i).unwrap().expected {
                Expected::Class(c) => c,
                Expected::Tensor(_) => unreachable!(),
            })
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_init_rejects_too_many_classes() {
        let mut backend = HostBackend::new();
        let config = NetworkConfig::new(1, crate::config::ProblemKind::Classification).layer(
            crate::config::LayerConfig::new(
                1,
                crate::config::ConnectivityConfig::Direct,
                crate::activation::Activation::Sigmoid,
            ),
        );
        let mut problem = ClassificationProblem::<HostBackend>::new(2);
        problem.add_training(vec![0.0; 4], 0);
        assert!(problem.init(&mut backend, &config).is_err());
    }
}
