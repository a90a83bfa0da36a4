//! Test results and the best-record policy.

use serde::{Deserialize, Serialize};

use crate::problem::{EvaluationType, TestEvaluation};

/// Aggregate of one test cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// Samples that counted.
    pub trials: usize,
    /// Successful samples.
    pub successes: usize,
    /// False positives.
    pub false_positives: usize,
    /// False negatives.
    pub false_negatives: usize,
    /// Sum of the per-sample errors.
    pub error: f64,
}

impl TestResult {
    /// Adds one sample's evaluation; ignored unless it is considered.
    pub fn record(&mut self, evaluation: &TestEvaluation) {
        if !evaluation.is_consider {
            return;
        }
        self.trials += 1;
        self.successes += usize::from(evaluation.success);
        self.false_positives += usize::from(evaluation.false_positive);
        self.false_negatives += usize::from(evaluation.false_negative);
        self.error += f64::from(evaluation.error);
    }

    /// `successes / trials`, 0 when nothing counted.
    pub fn success_rate(&self) -> f64 {
        if self.trials == 0 {
            0.0
        } else {
            self.successes as f64 / self.trials as f64
        }
    }
}

/// A test result with the point of training it was taken at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRecord {
    /// Minibatches done when the test ran.
    pub minibatch_index: usize,
    /// Test cycles done before this one.
    pub test_index: usize,
    /// Aggregate result.
    pub result: TestResult,
}

/// One point of the learning curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPoint {
    /// Minibatches done.
    pub minibatch_index: usize,
    /// Success rate of the test cycle.
    pub success_rate: f64,
    /// Cumulative error of the test cycle.
    pub error: f64,
}

impl From<&TestRecord> for LearningPoint {
    fn from(record: &TestRecord) -> Self {
        Self {
            minibatch_index: record.minibatch_index,
            success_rate: record.result.success_rate(),
            error: record.result.error,
        }
    }
}

/// Decides whether a new test result becomes the best one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluator {
    kind: EvaluationType,
}

impl Evaluator {
    /// Evaluator with a fixed policy.
    pub fn new(kind: EvaluationType) -> Self {
        Self { kind }
    }

    /// Policy in use.
    pub fn kind(&self) -> EvaluationType {
        self.kind
    }

    /// Whether `candidate` replaces `best`. Always true when there is no best yet.
    pub fn supersedes(&self, candidate: &TestResult, best: Option<&TestResult>) -> bool {
        let Some(best) = best else {
            return true;
        };
        match self.kind {
            EvaluationType::MaxSuccessRate => candidate.success_rate() > best.success_rate(),
            EvaluationType::MinError => candidate.error < best.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(successes: usize, trials: usize, error: f64) -> TestResult {
        TestResult {
            trials,
            successes,
            error,
            ..TestResult::default()
        }
    }

    #[test]
    fn test_max_success_rate_strict() {
        let evaluator = Evaluator::new(EvaluationType::MaxSuccessRate);
        let best = result(5, 10, 1.0);
        assert!(evaluator.supersedes(&result(6, 10, 9.0), Some(&best)));
        assert!(!evaluator.supersedes(&result(5, 10, 0.0), Some(&best)));
        assert!(!evaluator.supersedes(&result(4, 10, 0.0), Some(&best)));
        assert!(evaluator.supersedes(&result(0, 10, 0.0), None));
    }

    #[test]
    fn test_min_error_strict() {
        let evaluator = Evaluator::new(EvaluationType::MinError);
        let best = result(0, 10, 2.0);
        assert!(evaluator.supersedes(&result(0, 10, 1.5), Some(&best)));
        assert!(!evaluator.supersedes(&result(10, 10, 2.0), Some(&best)));
        assert!(!evaluator.supersedes(&result(10, 10, 2.5), Some(&best)));
    }

    #[test]
    fn test_record_skips_ignored_samples() {
        let mut r = TestResult::default();
        r.record(&TestEvaluation {
            is_consider: true,
            success: true,
            error: 0.25,
            false_positive: false,
            false_negative: false,
        });
        r.record(&TestEvaluation::default());
        r.record(&TestEvaluation {
            is_consider: true,
            error: 0.5,
            false_negative: true,
            ..TestEvaluation::default()
        });
        assert_eq!(r.trials, 2);
        assert_eq!(r.successes, 1);
        assert_eq!(r.false_negatives, 1);
        assert_eq!(r.error, 0.75);
        assert_eq!(r.success_rate(), 0.5);
    }
}
