//! Monitoring callbacks.
//!
//! Observers are notified fire-and-forget: nothing they do feeds back into
//! training. They only run when `enableUI` is set.

use crate::evaluator::TestRecord;
use crate::trainer::RunState;

/// Progress after one minibatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinibatchProgress {
    /// Minibatches done.
    pub minibatch_index: usize,
    /// Samples trained so far.
    pub samples_seen: usize,
    /// Learning-rate decay factor in use.
    pub decay: f32,
    /// Samples per second over the last minibatch.
    pub samples_per_second: f64,
}

/// Receiver of trainer notifications.
pub trait TrainerObserver {
    /// Run state changed.
    fn on_status_change(&mut self, _previous: RunState, _current: RunState) {}

    /// A minibatch finished.
    fn on_minibatch(&mut self, _progress: &MinibatchProgress) {}

    /// A test cycle finished. `is_best` is true when it became the best record.
    fn on_test(&mut self, _last: &TestRecord, _best: Option<&TestRecord>, _is_best: bool) {}
}

/// Forwards notifications to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl TrainerObserver for LogObserver {
    fn on_status_change(&mut self, previous: RunState, current: RunState) {
        log::info!("trainer: {} -> {}", previous, current);
    }

    fn on_minibatch(&mut self, progress: &MinibatchProgress) {
        log::debug!(
            "minibatch {} ({} samples, {:.1} samples/s, decay {:.4})",
            progress.minibatch_index,
            progress.samples_seen,
            progress.samples_per_second,
            progress.decay
        );
    }

    fn on_test(&mut self, last: &TestRecord, _best: Option<&TestRecord>, is_best: bool) {
        log::info!(
            "test {} at minibatch {}: success {:.2}%, error {:.6}{}",
            last.test_index,
            last.minibatch_index,
            last.result.success_rate() * 100.0,
            last.result.error,
            if is_best { " (best)" } else { "" }
        );
    }
}
