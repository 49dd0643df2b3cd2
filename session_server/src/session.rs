//! Session state machine gating collection, training and prediction.
//!
//! ```text
//! Idle --begin_collecting--> Collecting --sample--> Collecting
//! Collecting --end_collecting--> Idle
//! Idle --begin_training--> Training --finish_training(ok)--> Predicting
//! Training --finish_training(err)--> Idle
//! Training | Predicting --reset--> Idle
//! ```
//!
//! Operations called in any other phase fail with `InvalidState` and leave
//! the session untouched.
use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SessionError},
    meter::METER,
    model::{Task, TrainedModel},
    normalizer::Normalizer,
    predictor::{PredictInput, PredictOutput, Predictor},
    store::{SampleStore, Target, TargetKind},
    trainer::{TrainConfig, TrainingJob, TrainingOutcome, TrainingSet},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Collecting,
    Training,
    Predicting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Collecting => "collecting",
            Phase::Training => "training",
            Phase::Predicting => "predicting",
        };
        f.write_str(name)
    }
}

/// How a finished training run was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The model was installed and the session is predicting.
    Applied,
    /// The run was abandoned by a reset or superseded; its result was dropped.
    Discarded,
}

pub struct Session {
    task: Task,
    phase: Phase,
    active_target: Option<Target>,
    store: SampleStore,
    normalizer: Normalizer,
    model: Option<Arc<TrainedModel>>,
    next_run_id: u64,
    in_flight: Option<u64>,
}

impl Session {
    pub fn new(task: Task) -> Self {
        Self::with_store(task, SampleStore::new())
    }

    /// Start a session whose store has a fixed arity, e.g. 34 keypoint coordinates and one label.
    pub fn with_arity(task: Task, inputs: usize, targets: usize) -> Self {
        Self::with_store(task, SampleStore::with_arity(inputs, targets))
    }

    fn with_store(task: Task, store: SampleStore) -> Self {
        Self {
            task,
            phase: Phase::Idle,
            active_target: None,
            store,
            normalizer: Normalizer::new(),
            model: None,
            next_run_id: 1,
            in_flight: None,
        }
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn active_target(&self) -> Option<&Target> {
        self.active_target.as_ref()
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn model(&self) -> Option<&Arc<TrainedModel>> {
        self.model.as_ref()
    }

    /// Identifier of the training run currently in flight, if any.
    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    fn expect_phase(&self, operation: &'static str, allowed: &[Phase]) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                phase: self.phase,
            })
        }
    }

    fn check_target(&self, target: &Target) -> Result<()> {
        let expected = match self.task {
            Task::Regression => TargetKind::Values,
            Task::Classification => TargetKind::Label,
        };
        if target.kind() != expected {
            return Err(SessionError::TargetKindMismatch {
                expected: expected.name(),
                got: target.kind().name(),
            });
        }
        if let Some(arity) = self.store.target_arity() {
            if target.arity() != arity {
                return Err(SessionError::ArityMismatch {
                    what: "target",
                    expected: arity,
                    got: target.arity(),
                });
            }
        }
        Ok(())
    }

    pub fn begin_collecting(&mut self, target: impl Into<Target>) -> Result<()> {
        self.expect_phase("begin_collecting", &[Phase::Idle])?;
        let target = target.into();
        self.check_target(&target)?;

        log::info!("Collecting samples for {:?}", target);
        self.active_target = Some(target);
        self.phase = Phase::Collecting;
        Ok(())
    }

    /// Append a sample tagged with the active target.
    pub fn sample(&mut self, inputs: Vec<f64>) -> Result<()> {
        self.expect_phase("sample", &[Phase::Collecting])?;
        let target = self
            .active_target
            .clone()
            .ok_or(SessionError::InvalidState {
                operation: "sample",
                phase: self.phase,
            })?;
        self.store.append(inputs, target)?;
        METER.add_samples(1);
        Ok(())
    }

    pub fn end_collecting(&mut self) -> Result<()> {
        self.expect_phase("end_collecting", &[Phase::Collecting])?;
        log::info!("Stopped collecting, {} samples in store", self.store.size());
        self.active_target = None;
        self.phase = Phase::Idle;
        Ok(())
    }

    /// Append one labeled sample without opening a collection window.
    pub fn record(&mut self, inputs: Vec<f64>, target: impl Into<Target>) -> Result<()> {
        self.expect_phase("record", &[Phase::Idle])?;
        let target = target.into();
        self.check_target(&target)?;
        self.store.append(inputs, target)?;
        METER.add_samples(1);
        Ok(())
    }

    /// Replace the store with previously saved samples. A session created
    /// with a fixed arity keeps it, and every loaded sample is checked
    /// against it.
    pub fn load_store(&mut self, store: SampleStore) -> Result<()> {
        self.expect_phase("load_store", &[Phase::Idle])?;
        if let Some(sample) = store.samples().first() {
            self.check_target(&sample.target)?;
            match self.store.input_arity() {
                Some(arity) if arity != sample.inputs.len() => {
                    return Err(SessionError::ArityMismatch {
                        what: "input",
                        expected: arity,
                        got: sample.inputs.len(),
                    })
                }
                _ => (),
            }
        }
        let store = match self.store.fixed_arity() {
            Some((inputs, targets)) => {
                let mut fixed = SampleStore::with_arity(inputs, targets);
                for sample in store.samples() {
                    fixed.append(sample.inputs.clone(), sample.target.clone())?;
                }
                fixed
            }
            None => store,
        };
        log::info!("Loaded {} samples", store.size());
        self.store = store;
        Ok(())
    }

    /// Install a previously trained model and start predicting.
    pub fn load_model(&mut self, model: TrainedModel) -> Result<()> {
        self.expect_phase("load_model", &[Phase::Idle])?;
        if model.task() != self.task {
            return Err(SessionError::InvalidConfig(format!(
                "model was trained for {}, session runs {}",
                model.task(),
                self.task
            )));
        }
        self.model = Some(Arc::new(model));
        self.phase = Phase::Predicting;
        Ok(())
    }

    /// Fit the normalizer, freeze the store into a training set and move to
    /// `Training`. The returned job must be run and its outcome handed to
    /// [`Session::finish_training`].
    pub fn begin_training(&mut self, config: TrainConfig) -> Result<TrainingJob> {
        self.expect_phase("begin_training", &[Phase::Idle])?;
        if self.store.is_empty() {
            return Err(SessionError::EmptyStore);
        }
        config.validate()?;
        if self.store.size() < config.batch_size {
            return Err(SessionError::InsufficientData {
                have: self.store.size(),
                need: config.batch_size,
            });
        }

        let mut normalizer = Normalizer::new();
        normalizer.fit(&self.store, self.task == Task::Regression)?;
        let set = TrainingSet::from_store(&self.store, &normalizer)?;
        self.normalizer = normalizer;

        let run_id = self.next_run_id;
        self.next_run_id += 1;
        self.in_flight = Some(run_id);
        self.phase = Phase::Training;
        log::info!("Starting training run {}", run_id);

        Ok(TrainingJob {
            run_id,
            set,
            config,
        })
    }

    /// Apply the outcome of a training job. Results of runs that are no
    /// longer in flight are dropped.
    pub fn finish_training(&mut self, outcome: TrainingOutcome) -> Result<Completion> {
        if self.phase != Phase::Training || self.in_flight != Some(outcome.run_id) {
            log::info!("Discarding stale result of training run {}", outcome.run_id);
            return Ok(Completion::Discarded);
        }
        self.in_flight = None;

        match outcome.result {
            Ok(model) => {
                log::info!(
                    "Training run {} finished after {} epochs",
                    outcome.run_id,
                    outcome.history.len()
                );
                self.model = Some(Arc::new(model));
                self.phase = Phase::Predicting;
                Ok(Completion::Applied)
            }
            Err(err) => {
                self.phase = Phase::Idle;
                Err(err)
            }
        }
    }

    /// Train synchronously on the calling thread.
    pub fn train(&mut self, config: TrainConfig) -> Result<Completion> {
        let job = self.begin_training(config)?;
        self.finish_training(job.execute())
    }

    /// Drop the model and all samples. Abandons a training run in flight.
    pub fn reset(&mut self) -> Result<()> {
        self.expect_phase("reset", &[Phase::Training, Phase::Predicting])?;
        if let Some(run_id) = self.in_flight.take() {
            log::info!("Abandoning training run {}", run_id);
        }
        self.model = None;
        self.store.clear();
        self.normalizer = Normalizer::new();
        self.active_target = None;
        self.phase = Phase::Idle;
        Ok(())
    }

    pub fn predictor(&self) -> Result<Predictor> {
        match (&self.phase, &self.model) {
            (Phase::Predicting, Some(model)) => Ok(Predictor::new(Arc::clone(model))),
            _ => Err(SessionError::NotReady),
        }
    }

    pub fn predict(&self, input: impl Into<PredictInput>) -> Result<PredictOutput> {
        self.predictor()?.predict(input.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;

    fn small_config() -> TrainConfig {
        TrainConfig {
            epochs: 5,
            batch_size: 2,
            ..Default::default()
        }
    }

    fn collected_session() -> Session {
        let mut session = Session::new(Task::Regression);
        session.begin_collecting(vec![255.0, 0.0, 0.0]).unwrap();
        session.sample(vec![10.0, 10.0]).unwrap();
        session.sample(vec![12.0, 9.0]).unwrap();
        session.end_collecting().unwrap();
        session.begin_collecting(vec![0.0, 0.0, 255.0]).unwrap();
        session.sample(vec![400.0, 400.0]).unwrap();
        session.end_collecting().unwrap();
        session
    }

    #[test]
    fn collecting_tags_samples_with_active_target() {
        let session = collected_session();
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.active_target(), None);
        let samples = session.store().samples();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[1].target, Target::Values(vec![255.0, 0.0, 0.0]));
        assert_eq!(samples[2].target, Target::Values(vec![0.0, 0.0, 255.0]));
    }

    #[test]
    fn begin_training_while_collecting_is_invalid() {
        let mut session = collected_session();
        session.begin_collecting(vec![0.0, 255.0, 0.0]).unwrap();
        let err = session.begin_training(small_config()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(session.phase(), Phase::Collecting);
        assert_eq!(session.in_flight(), None);
    }

    #[test]
    fn sample_outside_collecting_is_invalid() {
        let mut session = Session::new(Task::Regression);
        let err = session.sample(vec![1.0, 2.0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(session.end_collecting().is_err());
        assert!(session.reset().is_err());
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn predict_before_training_is_not_ready() {
        let session = collected_session();
        let err = session.predict(vec![10.0, 10.0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotReady);
    }

    #[test]
    fn begin_training_on_empty_store() {
        let mut session = Session::new(Task::Classification);
        let err = session.begin_training(small_config()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyStore);
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn store_is_frozen_during_training() {
        let mut session = collected_session();
        let job = session.begin_training(small_config()).unwrap();
        assert_eq!(session.phase(), Phase::Training);
        assert!(session.record(vec![1.0, 1.0], vec![0.0, 0.0, 0.0]).is_err());
        assert!(session.begin_collecting(vec![0.0, 0.0, 0.0]).is_err());
        assert_eq!(session.store().size(), 3);

        assert_eq!(session.finish_training(job.execute()).unwrap(), Completion::Applied);
        assert_eq!(session.phase(), Phase::Predicting);
        assert!(session.model().is_some());
    }

    #[test]
    fn failed_training_returns_to_idle() {
        let mut session = collected_session();
        let job = session.begin_training(small_config()).unwrap();
        let outcome = TrainingOutcome {
            run_id: job.run_id(),
            result: Err(SessionError::InsufficientData { have: 0, need: 2 }),
            history: vec![],
        };
        let err = session.finish_training(outcome).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.model().is_none());
    }

    #[test]
    fn stale_result_after_reset_is_discarded() {
        let mut session = collected_session();
        let job = session.begin_training(small_config()).unwrap();
        session.reset().unwrap();
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.store().size(), 0);

        assert_eq!(
            session.finish_training(job.execute()).unwrap(),
            Completion::Discarded
        );
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.model().is_none());
    }

    #[test]
    fn reset_from_predicting_starts_fresh() {
        let mut session = collected_session();
        session.train(small_config()).unwrap();
        assert!(session.predict(vec![10.0, 10.0]).is_ok());

        session.reset().unwrap();
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.store().is_empty());
        assert_eq!(
            session.predict(vec![10.0, 10.0]).unwrap_err().kind(),
            ErrorKind::NotReady
        );
    }

    #[test]
    fn target_kind_must_match_task() {
        let mut session = Session::new(Task::Classification);
        let err = session.begin_collecting(vec![1.0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArityMismatch);
        assert_eq!(session.phase(), Phase::Idle);
        session.record(vec![1.0, 2.0], "a").unwrap();
    }

    #[test]
    fn batch_size_larger_than_store_is_insufficient() {
        let mut session = collected_session();
        let err = session
            .begin_training(TrainConfig {
                batch_size: 4,
                ..small_config()
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn loaded_store_keeps_fixed_arity() {
        let mut session = Session::with_arity(Task::Classification, 34, 1);
        session.load_store(SampleStore::new()).unwrap();
        assert_eq!(session.store().input_arity(), Some(34));
        let err = session.record(vec![1.0, 2.0], "a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArityMismatch);

        let mut narrow = SampleStore::new();
        narrow.append(vec![1.0, 2.0], "a").unwrap();
        let err = session.load_store(narrow).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArityMismatch);
        assert!(session.store().is_empty());

        let mut wide = SampleStore::new();
        wide.append(vec![0.5; 34], "a").unwrap();
        session.load_store(wide).unwrap();
        session.record(vec![0.25; 34], "b").unwrap();
        assert_eq!(session.store().size(), 2);

        // Clearing the loaded store still returns to the fixed arity.
        session.train(TrainConfig {
            epochs: 1,
            batch_size: 2,
            ..Default::default()
        })
        .unwrap();
        session.reset().unwrap();
        assert_eq!(session.store().fixed_arity(), Some((34, 1)));
        let err = session.record(vec![1.0], "a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArityMismatch);
    }
}
