//! Mini-batch training of the session network.
//!
use ndarray::{Array2, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SessionError},
    model::{ModelKind, TrainedModel},
    nn::{Network, Optimizer, OptimizerKind},
    normalizer::Normalizer,
    store::{SampleStore, Target},
};

/// Training options. Missing fields fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Share of samples held out for reporting, in `[0, 1)`.
    pub validation_fraction: f64,
    pub optimizer: OptimizerKind,
    pub hidden_units: usize,
    /// Seed for weight initialization, the validation split and batch shuffling.
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 32,
            batch_size: 32,
            learning_rate: 0.2,
            validation_fraction: 0.0,
            optimizer: OptimizerKind::Adam,
            hidden_units: 16,
            seed: 42,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(SessionError::InvalidConfig("epochs must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(SessionError::InvalidConfig(
                "batch size must be positive".into(),
            ));
        }
        if self.hidden_units == 0 {
            return Err(SessionError::InvalidConfig(
                "hidden units must be positive".into(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(SessionError::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err(SessionError::InvalidConfig(format!(
                "validation fraction must be in [0, 1), got {}",
                self.validation_fraction
            )));
        }
        Ok(())
    }
}

/// Normalized samples as dense matrices, ready for training.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    inputs: Array2<f64>,
    targets: Array2<f64>,
    kind: ModelKind,
    normalizer: Normalizer,
}

impl TrainingSet {
    /// Apply a fitted normalizer to every sample of the store. Labels become
    /// one-hot rows indexed by first appearance.
    pub fn from_store(store: &SampleStore, normalizer: &Normalizer) -> Result<Self> {
        let input_dim = store.input_arity().ok_or(SessionError::EmptyStore)?;
        if store.is_empty() {
            return Err(SessionError::EmptyStore);
        }

        let kind = match store.samples()[0].target {
            Target::Values(ref values) => ModelKind::Regression {
                outputs: values.len(),
            },
            Target::Label(_) => ModelKind::Classification {
                labels: store.labels().to_vec(),
            },
        };
        let output_dim = match &kind {
            ModelKind::Regression { outputs } => *outputs,
            ModelKind::Classification { labels } => labels.len(),
        };

        let mut inputs = Array2::zeros((store.size(), input_dim));
        let mut targets = Array2::zeros((store.size(), output_dim));
        for (row, sample) in store.samples().iter().enumerate() {
            let scaled = normalizer.apply(sample)?;
            for (col, value) in scaled.inputs.iter().enumerate() {
                inputs[[row, col]] = *value;
            }
            match scaled.target {
                Target::Values(values) => {
                    for (col, value) in values.iter().enumerate() {
                        targets[[row, col]] = *value;
                    }
                }
                Target::Label(label) => {
                    if let Some(col) = store.labels().iter().position(|l| *l == label) {
                        targets[[row, col]] = 1.0;
                    }
                }
            }
        }

        Ok(Self {
            inputs,
            targets,
            kind,
            normalizer: normalizer.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &ModelKind {
        &self.kind
    }
}

/// Loss summary of one finished epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub loss: f64,
    pub val_loss: Option<f64>,
}

pub struct Trainer {
    config: TrainConfig,
}

impl Trainer {
    pub fn new(config: TrainConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Fit a fresh network to the training set. `on_epoch` is called after
    /// every epoch with the mean training loss.
    pub fn train<F>(&self, set: &TrainingSet, mut on_epoch: F) -> Result<TrainedModel>
    where
        F: FnMut(&EpochReport),
    {
        let config = &self.config;
        if set.len() < config.batch_size {
            return Err(SessionError::InsufficientData {
                have: set.len(),
                need: config.batch_size,
            });
        }

        let mut rng = StdRng::seed_from_u64(config.seed);

        let mut indices: Vec<usize> = (0..set.len()).collect();
        indices.shuffle(&mut rng);
        let num_validation = (set.len() as f64 * config.validation_fraction).floor() as usize;
        let validation = indices.split_off(set.len() - num_validation);
        let mut training = indices;
        if training.is_empty() {
            return Err(SessionError::InsufficientData {
                have: 0,
                need: config.batch_size,
            });
        }

        let input_dim = set.inputs.ncols();
        let mut network = match &set.kind {
            ModelKind::Regression { outputs } => {
                Network::regression(input_dim, config.hidden_units, *outputs, &mut rng)
            }
            ModelKind::Classification { labels } => {
                Network::classification(input_dim, config.hidden_units, labels.len(), &mut rng)
            }
        };
        let mut optimizer = Optimizer::new(config.optimizer, config.learning_rate, &network);

        let val_inputs = set.inputs.select(Axis(0), &validation);
        let val_targets = set.targets.select(Axis(0), &validation);

        log::info!(
            "Training {:?} on {} samples ({} held out) for {} epochs",
            set.kind.task(),
            training.len(),
            validation.len(),
            config.epochs
        );

        for epoch in 0..config.epochs {
            training.shuffle(&mut rng);

            let mut epoch_loss = 0.0;
            for batch in training.chunks(config.batch_size) {
                let inputs = set.inputs.select(Axis(0), batch);
                let targets = set.targets.select(Axis(0), batch);
                let (loss, grads) = network.backprop(&inputs, &targets);
                optimizer.step(&mut network, &grads);
                epoch_loss += loss * batch.len() as f64;
            }

            let val_loss = (!validation.is_empty())
                .then(|| network.loss().compute(&network.forward(&val_inputs), &val_targets));
            let report = EpochReport {
                epoch,
                loss: epoch_loss / training.len() as f64,
                val_loss,
            };
            log::debug!("Epoch {}: loss {:.5} val_loss {:?}", epoch, report.loss, val_loss);
            on_epoch(&report);
        }

        Ok(TrainedModel {
            network,
            normalizer: set.normalizer.clone(),
            kind: set.kind.clone(),
        })
    }
}

/// Training work detached from the session, tagged with the run it belongs to.
#[derive(Debug)]
pub struct TrainingJob {
    pub(crate) run_id: u64,
    pub(crate) set: TrainingSet,
    pub(crate) config: TrainConfig,
}

/// Result of a training job, handed back to the session.
#[derive(Debug)]
pub struct TrainingOutcome {
    pub run_id: u64,
    pub result: Result<TrainedModel>,
    pub history: Vec<EpochReport>,
}

impl TrainingJob {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Train and hand the outcome to `on_complete`. Consuming the job makes
    /// the callback fire exactly once.
    pub fn run<F>(self, on_complete: F)
    where
        F: FnOnce(TrainingOutcome),
    {
        on_complete(self.execute())
    }

    pub fn execute(self) -> TrainingOutcome {
        let mut history = Vec::with_capacity(self.config.epochs);
        let result = Trainer::new(self.config)
            .and_then(|trainer| trainer.train(&self.set, |report| history.push(*report)));
        if let Err(err) = &result {
            log::warn!("Training run {} failed: {}", self.run_id, err);
        }
        TrainingOutcome {
            run_id: self.run_id,
            result,
            history,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;

    fn fitted_set(store: &SampleStore) -> TrainingSet {
        let mut normalizer = Normalizer::new();
        normalizer.fit(store, true).unwrap();
        TrainingSet::from_store(store, &normalizer).unwrap()
    }

    fn line_store(n: usize) -> SampleStore {
        let mut store = SampleStore::new();
        for i in 0..n {
            let x = i as f64;
            store.append(vec![x], vec![2.0 * x + 1.0]).unwrap();
        }
        store
    }

    #[test]
    fn config_validation() {
        assert!(TrainConfig::default().validate().is_ok());
        for config in [
            TrainConfig { epochs: 0, ..Default::default() },
            TrainConfig { batch_size: 0, ..Default::default() },
            TrainConfig { learning_rate: -0.1, ..Default::default() },
            TrainConfig { validation_fraction: 1.0, ..Default::default() },
        ] {
            let err = Trainer::new(config).err().unwrap();
            assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        }
    }

    #[test]
    fn config_fields_default_when_missing() {
        let config: TrainConfig =
            serde_json::from_str(r#"{"epochs": 35, "batch_size": 12}"#).unwrap();
        assert_eq!(config.epochs, 35);
        assert_eq!(config.batch_size, 12);
        assert_eq!(config.learning_rate, 0.2);
        assert_eq!(config.optimizer, OptimizerKind::Adam);
    }

    #[test]
    fn fewer_samples_than_batch_size_is_insufficient() {
        let set = fitted_set(&line_store(5));
        let trainer = Trainer::new(TrainConfig {
            batch_size: 6,
            ..Default::default()
        })
        .unwrap();
        let mut epochs = 0;
        let err = trainer.train(&set, |_| epochs += 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
        assert_eq!(epochs, 0);
    }

    #[test]
    fn reports_every_epoch_with_validation_loss() {
        let set = fitted_set(&line_store(20));
        let trainer = Trainer::new(TrainConfig {
            epochs: 7,
            batch_size: 4,
            validation_fraction: 0.25,
            ..Default::default()
        })
        .unwrap();
        let mut reports = Vec::new();
        let model = trainer.train(&set, |r| reports.push(*r)).unwrap();

        assert_eq!(reports.len(), 7);
        assert!(reports.iter().all(|r| r.val_loss.is_some()));
        assert_eq!(reports.last().map(|r| r.epoch), Some(6));
        assert_eq!(model.output_dim(), 1);
    }

    #[test]
    fn same_seed_gives_same_model() {
        let set = fitted_set(&line_store(12));
        let config = TrainConfig {
            epochs: 5,
            batch_size: 3,
            ..Default::default()
        };
        let a = Trainer::new(config.clone()).unwrap().train(&set, |_| ()).unwrap();
        let b = Trainer::new(config).unwrap().train(&set, |_| ()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn labels_become_one_hot_rows() {
        let mut store = SampleStore::new();
        store.append(vec![0.0], "b").unwrap();
        store.append(vec![1.0], "a").unwrap();
        store.append(vec![2.0], "b").unwrap();
        let set = fitted_set(&store);

        assert_eq!(
            set.kind(),
            &ModelKind::Classification {
                labels: vec!["b".into(), "a".into()]
            }
        );
        assert_eq!(set.targets.row(0).to_vec(), vec![1.0, 0.0]);
        assert_eq!(set.targets.row(1).to_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn job_completes_exactly_once() {
        let job = TrainingJob {
            run_id: 9,
            set: fitted_set(&line_store(8)),
            config: TrainConfig {
                epochs: 3,
                batch_size: 8,
                ..Default::default()
            },
        };
        let mut calls = 0;
        job.run(|outcome| {
            calls += 1;
            assert_eq!(outcome.run_id, 9);
            assert_eq!(outcome.history.len(), 3);
            assert!(outcome.result.is_ok());
        });
        assert_eq!(calls, 1);
    }
}
