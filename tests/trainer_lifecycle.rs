//! Trainer run-state tests.
//!
//! - pause, resume and single steps keep every counter consistent
//! - `pauseAfterNTests` also counts the initial test cycle
//! - losing the backend context moves the trainer to `Error`
//! - observers see every state change when monitoring is enabled
//! - an exported document resumes training with the same weights

use std::sync::{Arc, Mutex};

use neurotex::{
    Activation, ConnectivityConfig, ExportOptions, HostBackend, IdentificationProblem, IdentificationSample,
    LayerConfig, LogObserver, MinibatchProgress, NetworkConfig, NeurotexError, ProblemKind, RunState, TestRecord, TrainerBuilder,
    TrainerConfig, TrainerContext, TrainerObserver,
};

fn problem() -> IdentificationProblem<HostBackend> {
    let sample = IdentificationSample::new(vec![0.5; 16], vec![0.3; 16]);
    let mut problem = IdentificationProblem::new(1e-4);
    problem.add_training(sample.clone()).add_testing(sample);
    problem
}

fn network() -> NetworkConfig {
    NetworkConfig::new(2, ProblemKind::Identification)
        .layer(LayerConfig::new(2, ConnectivityConfig::Direct, Activation::Tanh))
        .layer(LayerConfig::new(2, ConnectivityConfig::FullNPoT, Activation::Linear))
        .with_seed(9)
}

fn trainer(config: TrainerConfig) -> TrainerContext<HostBackend> {
    TrainerBuilder::new(HostBackend::new())
        .network(network())
        .problem(problem())
        .config(config)
        .build()
        .expect("trainer")
}

#[test]
fn test_pause_resume_and_step_counters() {
    let mut t = trainer(TrainerConfig {
        minibatch_size: 3,
        test_minibatchs_interval: 5,
        pause_after_n_tests: Some(2),
        ..TrainerConfig::default()
    });

    assert_eq!(t.run().unwrap(), RunState::Paused);
    assert_eq!(t.minibatch_index(), 10);
    assert_eq!(t.tests_done(), 2);
    assert_eq!(t.training_infos().samples_seen, 30);

    assert_eq!(t.step().unwrap(), RunState::Paused);
    assert_eq!(t.minibatch_index(), 11);
    assert_eq!(t.training_infos().samples_seen, 33);
    assert_eq!(t.tests_done(), 2);

    // a tick does nothing while paused
    assert_eq!(t.tick().unwrap(), RunState::Paused);
    assert_eq!(t.minibatch_index(), 11);

    assert_eq!(t.resume(), RunState::Running);
    t.tick().unwrap();
    assert_eq!(t.minibatch_index(), 12);

    let handle = t.pause_handle();
    handle.request_pause();
    assert_eq!(t.run().unwrap(), RunState::Paused);
    assert_eq!(t.minibatch_index(), 12);
    assert!(!handle.is_requested());
}

#[test]
fn test_pause_after_the_initial_test() {
    let mut t = trainer(TrainerConfig {
        test_first: true,
        test_minibatchs_interval: 5,
        pause_after_n_tests: Some(1),
        stop_after_minibatchs_count: Some(50),
        ..TrainerConfig::default()
    });

    assert_eq!(t.run().unwrap(), RunState::Paused);
    assert_eq!(t.minibatch_index(), 0);
    assert_eq!(t.tests_done(), 1);

    // the threshold is passed once, later tests do not pause again
    assert_eq!(t.resume(), RunState::Running);
    assert_eq!(t.run().unwrap(), RunState::Finished);
    assert_eq!(t.minibatch_index(), 50);
    assert_eq!(t.tests_done(), 11);
}

#[test]
fn test_step_reaching_the_limit_finishes() {
    let mut t = trainer(TrainerConfig {
        stop_after_minibatchs_count: Some(2),
        ..TrainerConfig::default()
    });
    assert_eq!(t.step().unwrap(), RunState::Paused);
    assert_eq!(t.step().unwrap(), RunState::Finished);
    assert_eq!(t.minibatch_index(), 2);
    assert_eq!(t.tick().unwrap(), RunState::Finished);
}

#[test]
fn test_step_from_not_loaded() {
    let mut t = trainer(TrainerConfig::default());
    assert_eq!(t.state(), RunState::NotLoaded);
    assert!(t.network().is_none());
    assert_eq!(t.step().unwrap(), RunState::Paused);
    assert_eq!(t.minibatch_index(), 1);
    assert!(t.network().is_some());
}

#[test]
fn test_finished_trainer_restarts_from_zero() {
    let mut t = trainer(TrainerConfig {
        stop_after_minibatchs_count: Some(4),
        test_minibatchs_interval: 2,
        ..TrainerConfig::default()
    });
    assert_eq!(t.run().unwrap(), RunState::Finished);
    assert_eq!(t.tests_done(), 2);

    assert_eq!(t.train().unwrap(), RunState::Running);
    assert_eq!(t.minibatch_index(), 0);
    assert_eq!(t.tests_done(), 0);
    assert!(t.best_test().is_none());
}

#[test]
fn test_context_loss_moves_to_error() {
    let mut t = trainer(TrainerConfig::default());
    t.train().unwrap();
    t.tick().unwrap();
    assert_eq!(t.minibatch_index(), 1);

    t.backend_mut().lose_context();
    let err = t.tick().unwrap_err();
    assert!(err.is_context_lost());
    assert_eq!(t.state(), RunState::Error);
    assert!(t.last_error().is_some());
    assert_eq!(t.minibatch_index(), 1);

    // the error state is terminal
    assert!(matches!(t.train(), Err(NeurotexError::InvalidState(_))));
    assert!(t.step().is_err());
    assert_eq!(t.resume(), RunState::Error);
}

#[test]
fn test_load_on_lost_context_fails() {
    let mut backend = HostBackend::new();
    backend.lose_context();
    let mut t = TrainerBuilder::new(backend)
        .network(network())
        .problem(problem())
        .build()
        .unwrap();
    assert!(t.train().unwrap_err().is_context_lost());
    assert_eq!(t.state(), RunState::Error);
    assert!(t.network().is_none());
}

#[test]
fn test_invalid_config_rejected_at_build() {
    let err = TrainerBuilder::new(HostBackend::new())
        .network(network())
        .problem(problem())
        .config(TrainerConfig {
            sgd_learning_rate: neurotex::LearningRate::Scalar(f32::NAN),
            ..TrainerConfig::default()
        })
        .build()
        .unwrap_err();
    assert!(matches!(err, NeurotexError::Config(_)));
}

#[derive(Default)]
struct Recording {
    transitions: Vec<(RunState, RunState)>,
    minibatches: usize,
    tests: Vec<bool>,
}

struct Recorder(Arc<Mutex<Recording>>);

impl TrainerObserver for Recorder {
    fn on_status_change(&mut self, previous: RunState, current: RunState) {
        self.0.lock().unwrap().transitions.push((previous, current));
    }

    fn on_minibatch(&mut self, _progress: &MinibatchProgress) {
        self.0.lock().unwrap().minibatches += 1;
    }

    fn on_test(&mut self, _last: &TestRecord, _best: Option<&TestRecord>, is_best: bool) {
        self.0.lock().unwrap().tests.push(is_best);
    }
}

#[test]
fn test_observers_follow_the_run() {
    let recording = Arc::new(Mutex::new(Recording::default()));
    let mut t = TrainerBuilder::new(HostBackend::new())
        .network(network())
        .problem(problem())
        .config(TrainerConfig {
            enable_ui: true,
            test_minibatchs_interval: 3,
            stop_after_minibatchs_count: Some(6),
            ..TrainerConfig::default()
        })
        .observer(Recorder(Arc::clone(&recording)))
        .observer(LogObserver)
        .build()
        .unwrap();
    t.run().unwrap();

    let recording = recording.lock().unwrap();
    assert_eq!(
        recording.transitions,
        vec![
            (RunState::NotLoaded, RunState::Loading),
            (RunState::Loading, RunState::Running),
            (RunState::Running, RunState::Finished),
        ]
    );
    assert_eq!(recording.minibatches, 6);
    assert_eq!(recording.tests.len(), 2);
    // the first test is always the best so far
    assert!(recording.tests[0]);
}

#[test]
fn test_observers_silent_without_ui() {
    let recording = Arc::new(Mutex::new(Recording::default()));
    let mut t = TrainerBuilder::new(HostBackend::new())
        .network(network())
        .problem(problem())
        .config(TrainerConfig {
            stop_after_minibatchs_count: Some(2),
            ..TrainerConfig::default()
        })
        .observer(Recorder(Arc::clone(&recording)))
        .build()
        .unwrap();
    t.run().unwrap();
    assert!(recording.lock().unwrap().transitions.is_empty());
}

#[test]
fn test_export_resumes_with_same_weights() {
    let mut t = trainer(TrainerConfig {
        stop_after_minibatchs_count: Some(5),
        ..TrainerConfig::default()
    });
    t.run().unwrap();
    let document = t.export(ExportOptions::default()).unwrap();
    let infos = document.training_infos.as_ref().expect("training infos");
    assert_eq!(infos.minibatch_index, 5);
    assert_eq!(infos.state, Some(RunState::Finished));

    let trained = t.network().unwrap().parameters(t.backend()).unwrap();
    let mut resumed = TrainerBuilder::new(HostBackend::new())
        .document(document)
        .problem(problem())
        .build()
        .unwrap();
    assert_eq!(resumed.train().unwrap(), RunState::Running);
    let loaded = resumed.network().unwrap().parameters(resumed.backend()).unwrap();
    assert_eq!(loaded, trained);
}
