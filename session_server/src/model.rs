//! Trained model artifact shared by the trainer, the predictor and persistence.
//!
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{nn::Network, normalizer::Normalizer};

/// Learning task of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Regression,
    Classification,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Regression => write!(f, "regression"),
            Task::Classification => write!(f, "classification"),
        }
    }
}

impl std::str::FromStr for Task {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regression" => Ok(Task::Regression),
            "classification" => Ok(Task::Classification),
            other => Err(format!("unknown task {other}")),
        }
    }
}

/// What the output layer of a model means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelKind {
    Regression { outputs: usize },
    /// Class labels in the order they were first seen while collecting.
    Classification { labels: Vec<String> },
}

impl ModelKind {
    pub fn task(&self) -> Task {
        match self {
            ModelKind::Regression { .. } => Task::Regression,
            ModelKind::Classification { .. } => Task::Classification,
        }
    }
}

/// Immutable result of one training run.
///
/// Carries its own copy of the normalization parameters so that refitting
/// the session's normalizer never changes how an existing model sees input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub(crate) network: Network,
    pub(crate) normalizer: Normalizer,
    pub(crate) kind: ModelKind,
}

impl TrainedModel {
    pub fn kind(&self) -> &ModelKind {
        &self.kind
    }

    pub fn task(&self) -> Task {
        self.kind.task()
    }

    pub fn input_dim(&self) -> usize {
        self.network.input_dim()
    }

    pub fn output_dim(&self) -> usize {
        self.network.output_dim()
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }
}
