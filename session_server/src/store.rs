//! Sample store holding labeled training examples in insertion order.
//!
use serde::{Deserialize, Serialize};

use crate::error::{check_finite, Result, SessionError};

/// Training target of a single sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    Values(Vec<f64>),
    Label(String),
}

impl Target {
    /// Number of target values, labels count as one.
    pub fn arity(&self) -> usize {
        match self {
            Target::Values(values) => values.len(),
            Target::Label(_) => 1,
        }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Values(_) => TargetKind::Values,
            Target::Label(_) => TargetKind::Label,
        }
    }
}

impl From<Vec<f64>> for Target {
    fn from(values: Vec<f64>) -> Self {
        Target::Values(values)
    }
}

impl From<&str> for Target {
    fn from(label: &str) -> Self {
        Target::Label(label.to_owned())
    }
}

impl From<String> for Target {
    fn from(label: String) -> Self {
        Target::Label(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    Values,
    Label,
}

impl TargetKind {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            TargetKind::Values => "numeric",
            TargetKind::Label => "label",
        }
    }
}

/// One labeled training example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub inputs: Vec<f64>,
    pub target: Target,
}

impl Sample {
    pub fn new(inputs: Vec<f64>, target: impl Into<Target>) -> Self {
        Self {
            inputs,
            target: target.into(),
        }
    }
}

/// Append-only collection of samples with fixed input and target arity.
///
/// The arity is either given at construction or fixed by the first sample.
/// Label targets count as arity one and a store never mixes label and
/// numeric targets. Labels are remembered in the order they were first
/// seen, which later defines class indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleStore {
    samples: Vec<Sample>,
    initial_arity: Option<(usize, usize)>,
    arity: Option<(usize, usize)>,
    kind: Option<TargetKind>,
    labels: Vec<String>,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose input and target arity are fixed up front.
    pub fn with_arity(inputs: usize, targets: usize) -> Self {
        Self {
            initial_arity: Some((inputs, targets)),
            arity: Some((inputs, targets)),
            ..Self::default()
        }
    }

    /// Append a sample, fixing the arity if it is the first one.
    pub fn append(&mut self, inputs: Vec<f64>, target: impl Into<Target>) -> Result<()> {
        let target = target.into();

        if let Some((input_arity, target_arity)) = self.arity {
            if inputs.len() != input_arity {
                return Err(SessionError::ArityMismatch {
                    what: "input",
                    expected: input_arity,
                    got: inputs.len(),
                });
            }
            if target.arity() != target_arity {
                return Err(SessionError::ArityMismatch {
                    what: "target",
                    expected: target_arity,
                    got: target.arity(),
                });
            }
        }
        if let Some(kind) = self.kind {
            if kind != target.kind() {
                return Err(SessionError::TargetKindMismatch {
                    expected: kind.name(),
                    got: target.kind().name(),
                });
            }
        }

        check_finite("input", &inputs)?;
        if let Target::Values(values) = &target {
            check_finite("target", values)?;
        }

        self.arity = Some((inputs.len(), target.arity()));
        self.kind = Some(target.kind());
        if let Target::Label(label) = &target {
            if !self.labels.contains(label) {
                self.labels.push(label.clone());
            }
        }
        self.samples.push(Sample { inputs, target });

        Ok(())
    }

    /// Drop all samples and labels and unfix any arity learned from them.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.labels.clear();
        self.kind = None;
        self.arity = self.initial_arity;
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.size()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Arity given at construction, kept across `clear`.
    pub fn fixed_arity(&self) -> Option<(usize, usize)> {
        self.initial_arity
    }

    pub fn input_arity(&self) -> Option<usize> {
        self.arity.map(|(inputs, _)| inputs)
    }

    pub fn target_arity(&self) -> Option<usize> {
        self.arity.map(|(_, targets)| targets)
    }

    pub fn kind(&self) -> Option<TargetKind> {
        self.kind
    }

    /// Labels in order of first appearance.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}
