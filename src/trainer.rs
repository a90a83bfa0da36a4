//! Training loop and run-state machine.
//!
//! ```text
//! NotLoaded ─train─► Loading ─► Running ⇄ Paused
//!                                  │
//!                                  ▼
//!                               Finished          (any) ─► Error
//! ```
//!
//! A [`TrainerContext`] owns the backend, the network, the problem provider
//! and every counter; there is no global state. Loading is synchronous:
//! [`TrainerContext::train`] either reaches `Running` or moves to `Error` and
//! returns the failure.
//!
//! One minibatch trains `minibatchSize` samples, each with its own
//! feedforward, backpropagation and update. Every `testMinibatchsInterval`
//! minibatches a test cycle runs without updates and the [`Evaluator`]
//! decides whether it becomes the best record.
//!
//! With `SGDLearningRatePeriod = P` the rate and the L2 decay are scaled by
//! `exp(−ln 2 / P · minibatch)` ([`HalfLifeDecay`]).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::config::{ConfigError, NetworkConfig, TrainerConfig};
use crate::error::{NeurotexError, NeurotexResult};
use crate::evaluator::{Evaluator, LearningPoint, TestRecord, TestResult};
use crate::network::Network;
use crate::observer::{MinibatchProgress, TrainerObserver};
use crate::optimizer::{ConstantRate, HalfLifeDecay, LearningMask, LrScheduler, SgdParams};
use crate::problem::{EvaluationType, ProblemProvider};
use crate::serializer::{export_network, import_network, ExportOptions, NetworkDocument};

/// Run state of a trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    /// Nothing built yet.
    NotLoaded,
    /// Building the network and initializing the problem.
    Loading,
    /// Minibatches are being scheduled.
    Running,
    /// Counters kept, nothing scheduled.
    Paused,
    /// Minibatch limit reached.
    Finished,
    /// Unrecoverable failure; rebuild the trainer.
    Error,
}

impl RunState {
    /// Stable lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            RunState::NotLoaded => "notLoaded",
            RunState::Loading => "loading",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Finished => "finished",
            RunState::Error => "error",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cooperative pause request, checked before each scheduled minibatch.
///
/// Clones share the same flag, so another thread can stop [`TrainerContext::run`].
#[derive(Debug, Clone, Default)]
pub struct PauseHandle(Arc<AtomicBool>);

impl PauseHandle {
    /// Asks the trainer to pause before its next minibatch.
    pub fn request_pause(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a pause is pending.
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Where the network comes from on each load.
#[derive(Debug, Clone)]
pub enum NetworkSource {
    /// Fresh weights from a configuration.
    Config(NetworkConfig),
    /// Weights from an exported document.
    Document(Box<NetworkDocument>),
}

impl NetworkSource {
    /// Topology of the network.
    pub fn network_config(&self) -> NetworkConfig {
        match self {
            NetworkSource::Config(config) => config.clone(),
            NetworkSource::Document(document) => document.network_config(),
        }
    }

    fn build<B: Backend>(&self, backend: &mut B) -> NeurotexResult<Network<B>> {
        match self {
            NetworkSource::Config(config) => Network::build(backend, config.clone()),
            NetworkSource::Document(document) => import_network(backend, document),
        }
    }
}

/// Trainer progress, also written into exported documents.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingInfos {
    /// Run state at export time.
    pub state: Option<RunState>,
    /// Minibatches done.
    pub minibatch_index: usize,
    /// Test cycles done.
    pub tests_done: usize,
    /// Samples trained.
    pub samples_seen: usize,
    /// Updates that used momentum.
    pub momentum_steps: usize,
    /// Decay factor of the last minibatch.
    pub decay: f32,
    /// Base learning rate per layer.
    pub learning_rates: Vec<f32>,
    /// Success rate and error of every test cycle.
    pub learning_curve: Vec<LearningPoint>,
    /// Most recent test.
    pub last_test: Option<TestRecord>,
    /// Best test so far.
    pub best_test: Option<TestRecord>,
}

/// Builder for [`TrainerContext`].
pub struct TrainerBuilder<B: Backend> {
    backend: B,
    network: Option<NetworkSource>,
    problem: Option<Box<dyn ProblemProvider<B>>>,
    config: TrainerConfig,
    mask: LearningMask,
    observers: Vec<Box<dyn TrainerObserver>>,
}

impl<B: Backend> TrainerBuilder<B> {
    /// Starts a builder around a backend.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            network: None,
            problem: None,
            config: TrainerConfig::default(),
            mask: LearningMask::ALL,
            observers: Vec::new(),
        }
    }

    /// Trains a new network built from `config`.
    pub fn network(mut self, config: NetworkConfig) -> Self {
        self.network = Some(NetworkSource::Config(config));
        self
    }

    /// Continues training an exported network.
    pub fn document(mut self, document: NetworkDocument) -> Self {
        self.network = Some(NetworkSource::Document(Box::new(document)));
        self
    }

    /// Sample source.
    pub fn problem<P: ProblemProvider<B> + 'static>(mut self, problem: P) -> Self {
        self.problem = Some(Box::new(problem));
        self
    }

    /// Loop options.
    pub fn config(mut self, config: TrainerConfig) -> Self {
        self.config = config;
        self
    }

    /// Parameters updated by every step.
    pub fn learning_mask(mut self, mask: LearningMask) -> Self {
        self.mask = mask;
        self
    }

    /// Adds a monitoring observer (notified only with `enableUI`).
    pub fn observer<O: TrainerObserver + 'static>(mut self, observer: O) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Validates everything and returns a `NotLoaded` trainer.
    pub fn build(self) -> NeurotexResult<TrainerContext<B>> {
        self.config.validate()?;
        let source = self.network.ok_or(ConfigError::MissingField("network"))?;
        let problem = self.problem.ok_or(ConfigError::MissingField("problem"))?;

        let network_config = source.network_config();
        network_config.validate()?;
        self.config
            .sgd_learning_rate
            .expand(network_config.layers.len())?;

        let evaluation = EvaluationType::for_problem(network_config.problem_kind);
        if problem.evaluation_type() != evaluation {
            log::warn!(
                "problem provider asks for {:?}, {} problems use {:?}",
                problem.evaluation_type(),
                network_config.problem_kind,
                evaluation
            );
        }

        let scheduler: Box<dyn LrScheduler> = match self.config.sgd_learning_rate_period {
            Some(period) => Box::new(HalfLifeDecay::new(period)),
            None => Box::new(ConstantRate),
        };

        Ok(TrainerContext {
            backend: self.backend,
            source,
            network: None,
            evaluator: Evaluator::new(evaluation),
            problem,
            config: self.config,
            mask: self.mask,
            scheduler,
            state: RunState::NotLoaded,
            infos: TrainingInfos::default(),
            observers: self.observers,
            pause: PauseHandle::default(),
            last_error: None,
        })
    }
}

/// Everything one training run needs, owned in one place.
pub struct TrainerContext<B: Backend> {
    backend: B,
    source: NetworkSource,
    network: Option<Network<B>>,
    problem: Box<dyn ProblemProvider<B>>,
    config: TrainerConfig,
    mask: LearningMask,
    scheduler: Box<dyn LrScheduler>,
    evaluator: Evaluator,
    state: RunState,
    infos: TrainingInfos,
    observers: Vec<Box<dyn TrainerObserver>>,
    pause: PauseHandle,
    last_error: Option<String>,
}

impl<B: Backend> TrainerContext<B> {
    /// Current run state.
    #[inline]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Minibatches done since the last load.
    #[inline]
    pub fn minibatch_index(&self) -> usize {
        self.infos.minibatch_index
    }

    /// Test cycles done since the last load.
    #[inline]
    pub fn tests_done(&self) -> usize {
        self.infos.tests_done
    }

    /// Progress snapshot.
    pub fn training_infos(&self) -> TrainingInfos {
        TrainingInfos {
            state: Some(self.state),
            ..self.infos.clone()
        }
    }

    /// Success rate and error of every test cycle.
    pub fn learning_curve(&self) -> &[LearningPoint] {
        &self.infos.learning_curve
    }

    /// Most recent test.
    pub fn last_test(&self) -> Option<&TestRecord> {
        self.infos.last_test.as_ref()
    }

    /// Best test so far.
    pub fn best_test(&self) -> Option<&TestRecord> {
        self.infos.best_test.as_ref()
    }

    /// The network, once loaded.
    pub fn network(&self) -> Option<&Network<B>> {
        self.network.as_ref()
    }

    /// The backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The backend, mutably (for uploads outside the loop).
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Loop options.
    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Best-record policy.
    pub fn evaluator(&self) -> Evaluator {
        self.evaluator
    }

    /// Handle to request a pause from elsewhere.
    pub fn pause_handle(&self) -> PauseHandle {
        self.pause.clone()
    }

    /// Message of the failure that moved the trainer to `Error`.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Starts training: loads when not loaded or finished, resumes when paused.
    pub fn train(&mut self) -> NeurotexResult<RunState> {
        match self.state {
            RunState::Running | RunState::Loading => Ok(self.state),
            RunState::Paused => Ok(self.resume()),
            RunState::Error => Err(NeurotexError::invalid_state(
                "trainer is in the error state; rebuild it",
            )),
            RunState::NotLoaded | RunState::Finished => {
                self.set_state(RunState::Loading);
                match self.load() {
                    Ok(()) => {
                        self.set_state(RunState::Running);
                        if self.config.test_first && self.pause_due() {
                            self.pause();
                        }
                        Ok(self.state)
                    }
                    Err(err) => Err(self.fail(err)),
                }
            }
        }
    }

    /// Back to `Running` from `Paused`; no-op otherwise.
    pub fn resume(&mut self) -> RunState {
        if self.state == RunState::Paused {
            self.pause.clear();
            self.set_state(RunState::Running);
        }
        self.state
    }

    /// `Running` to `Paused`; no-op otherwise. Counters are kept.
    pub fn pause(&mut self) -> RunState {
        if self.state == RunState::Running {
            self.set_state(RunState::Paused);
        }
        self.state
    }

    /// Runs exactly one minibatch and leaves the trainer paused.
    ///
    /// Loads first when nothing is loaded yet. A minibatch that reaches
    /// `stopAfterMinibatchsCount` leaves it `Finished` instead.
    pub fn step(&mut self) -> NeurotexResult<RunState> {
        match self.state {
            RunState::NotLoaded | RunState::Finished => {
                self.train()?;
                self.pause();
            }
            RunState::Running => {
                self.pause();
            }
            RunState::Error => {
                return Err(NeurotexError::invalid_state(
                    "trainer is in the error state; rebuild it",
                ))
            }
            RunState::Loading | RunState::Paused => {}
        }
        if self.state != RunState::Paused {
            return Ok(self.state);
        }
        self.execute_minibatch()?;
        if self.state == RunState::Running {
            self.set_state(RunState::Paused);
        }
        Ok(self.state)
    }

    /// One scheduling slot: runs a minibatch when running and no pause is pending.
    pub fn tick(&mut self) -> NeurotexResult<RunState> {
        if self.state != RunState::Running {
            return Ok(self.state);
        }
        if self.pause.take() {
            return Ok(self.pause());
        }
        self.execute_minibatch()?;
        Ok(self.state)
    }

    /// Trains until paused, finished or failed, waiting
    /// `delayBetweenMinibatchs` between minibatches.
    pub fn run(&mut self) -> NeurotexResult<RunState> {
        self.train()?;
        let delay = Duration::from_millis(self.config.delay_between_minibatchs);
        while self.state == RunState::Running {
            self.tick()?;
            if !delay.is_zero() && self.state == RunState::Running {
                std::thread::sleep(delay);
            }
        }
        Ok(self.state)
    }

    /// Exports the network with the trainer's progress.
    pub fn export(&self, options: ExportOptions) -> NeurotexResult<NetworkDocument> {
        let network = self
            .network
            .as_ref()
            .ok_or_else(|| NeurotexError::invalid_state("no network loaded"))?;
        export_network(&self.backend, network, Some(self.training_infos()), options)
    }

    fn load(&mut self) -> NeurotexResult<()> {
        if self.backend.is_context_lost() {
            return Err(NeurotexError::context_lost("cannot load the network"));
        }
        let network_config = self.source.network_config();
        self.problem.init(&mut self.backend, &network_config)?;
        let network = self.source.build(&mut self.backend)?;
        let learning_rates = self
            .config
            .sgd_learning_rate
            .expand(network.layers_count())?;

        self.network = Some(network);
        self.infos = TrainingInfos {
            decay: 1.0,
            learning_rates,
            ..TrainingInfos::default()
        };
        self.pause.clear();
        log::info!(
            "trainer loaded on {} backend: minibatch {}, test every {} minibatches",
            self.backend.name(),
            self.config.minibatch_size,
            self.config.test_minibatchs_interval
        );

        if self.config.test_first {
            self.run_test_cycle()?;
        }
        Ok(())
    }

    fn execute_minibatch(&mut self) -> NeurotexResult<()> {
        self.minibatch().map_err(|err| self.fail(err))
    }

    fn minibatch(&mut self) -> NeurotexResult<()> {
        let network = self
            .network
            .as_mut()
            .ok_or_else(|| NeurotexError::invalid_state("no network loaded"))?;
        let config = &self.config;
        let decay = self.scheduler.factor(self.infos.minibatch_index);
        let params: Vec<SgdParams> = self
            .infos
            .learning_rates
            .iter()
            .map(|rate| SgdParams {
                rate: rate * config.sgd_learning_rate_factor * decay,
                l2_decay: config.l2_decay * decay,
                momentum: config.sgd_momentum,
            })
            .collect();
        let cost = config.cost.unwrap_or_else(|| network.cost());
        let size = config.minibatch_size;

        let started = Instant::now();
        for slot in 0..size {
            let index = self.infos.minibatch_index * size + slot;
            let sample = self.problem.generate_training_sample(&mut self.backend, index)?;
            network.train_sample(&mut self.backend, &sample, cost, &params, self.mask)?;
        }
        let elapsed = started.elapsed().as_secs_f64();

        self.infos.minibatch_index += 1;
        self.infos.samples_seen += size;
        self.infos.decay = decay;
        if config.sgd_momentum > 0.0 {
            self.infos.momentum_steps += 1;
        }
        let progress = MinibatchProgress {
            minibatch_index: self.infos.minibatch_index,
            samples_seen: self.infos.samples_seen,
            decay,
            samples_per_second: if elapsed > 0.0 { size as f64 / elapsed } else { 0.0 },
        };
        log::debug!(
            "minibatch {} done ({} samples, decay {:.4})",
            progress.minibatch_index,
            progress.samples_seen,
            decay
        );
        if self.config.enable_ui {
            for observer in &mut self.observers {
                observer.on_minibatch(&progress);
            }
        }

        let tested = self.infos.minibatch_index % self.config.test_minibatchs_interval == 0;
        if tested {
            self.run_test_cycle()?;
        }

        if self
            .config
            .stop_after_minibatchs_count
            .is_some_and(|limit| self.infos.minibatch_index >= limit)
        {
            self.set_state(RunState::Finished);
        } else if tested && self.pause_due() {
            self.pause();
        }
        Ok(())
    }

    fn pause_due(&self) -> bool {
        self.config
            .pause_after_n_tests
            .is_some_and(|n| self.infos.tests_done == n)
    }

    fn run_test_cycle(&mut self) -> NeurotexResult<()> {
        let network = self
            .network
            .as_mut()
            .ok_or_else(|| NeurotexError::invalid_state("no network loaded"))?;
        let count = self
            .config
            .tests_count
            .unwrap_or_else(|| self.problem.tests_count());
        if count == 0 {
            log::debug!("no test samples, test cycle skipped");
            return Ok(());
        }
        let subtract = self.problem.needs_test_subtract_expected();

        let mut result = TestResult::default();
        for index in 0..count {
            let raw = {
                let sample = self.problem.generate_testing_sample(&mut self.backend, index)?;
                let expected = subtract.then_some(sample.expected);
                network.feedforward(&mut self.backend, sample.input, true, expected, sample.clamp_mask)?;
                network.download_result(&self.backend)?
            };
            result.record(&self.problem.evaluate_test(index, &raw));
        }
        if result.trials == 0 {
            log::debug!("no test sample counted, test cycle skipped");
            return Ok(());
        }

        let record = TestRecord {
            minibatch_index: self.infos.minibatch_index,
            test_index: self.infos.tests_done,
            result,
        };
        let is_best = self
            .evaluator
            .supersedes(&record.result, self.infos.best_test.as_ref().map(|b| &b.result));
        self.infos.tests_done += 1;
        self.infos.learning_curve.push(LearningPoint::from(&record));
        self.infos.last_test = Some(record);
        if is_best {
            self.infos.best_test = Some(record);
        }

        if self.config.display {
            log::info!(
                "test {} at minibatch {}: {}/{} successes ({:.2}%), error {:.6}{}",
                record.test_index,
                record.minibatch_index,
                result.successes,
                result.trials,
                result.success_rate() * 100.0,
                result.error,
                if is_best { ", best so far" } else { "" }
            );
        }
        if self.config.enable_ui {
            let best = self.infos.best_test;
            for observer in &mut self.observers {
                observer.on_test(&record, best.as_ref(), is_best);
            }
        }
        Ok(())
    }

    fn set_state(&mut self, next: RunState) {
        let previous = self.state;
        if previous == next {
            return;
        }
        self.state = next;
        log::info!("trainer state: {} -> {}", previous, next);
        if self.config.enable_ui {
            for observer in &mut self.observers {
                observer.on_status_change(previous, next);
            }
        }
    }

    fn fail(&mut self, err: NeurotexError) -> NeurotexError {
        if err.is_context_lost() || self.backend.is_context_lost() {
            log::warn!("backend context lost: {}", err);
        } else {
            log::error!("training failed: {}", err);
        }
        self.last_error = Some(err.to_string());
        self.set_state(RunState::Error);
        err
    }
}

impl<B: Backend> fmt::Debug for TrainerContext<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainerContext")
            .field("backend", &self.backend.name())
            .field("state", &self.state)
            .field("minibatch_index", &self.infos.minibatch_index)
            .field("tests_done", &self.infos.tests_done)
            .finish()
    }
}
