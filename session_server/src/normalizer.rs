//! Min/max feature scaling.
//!
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::store::{Sample, SampleStore, Target};

/// Observed range of one feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRange {
    pub min: f64,
    pub max: f64,
}

impl FeatureRange {
    fn empty() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn include(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Map `value` into `[0, 1]` relative to the range. A constant feature maps to 0.
    pub fn normalize(&self, value: f64) -> f64 {
        let span = self.max - self.min;
        if span == 0.0 {
            return 0.0;
        }
        (value - self.min) / span
    }

    pub fn denormalize(&self, value: f64) -> f64 {
        value * (self.max - self.min) + self.min
    }
}

/// Per-feature scaling parameters fitted on a sample store.
///
/// Inputs are always scaled. Targets are scaled only for regression stores,
/// label targets pass through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    inputs: Option<Vec<FeatureRange>>,
    targets: Option<Vec<FeatureRange>>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute ranges over the whole store, replacing earlier parameters.
    pub fn fit(&mut self, store: &SampleStore, normalize_targets: bool) -> Result<()> {
        let first = store.samples().first().ok_or(SessionError::EmptyStore)?;

        let mut inputs = vec![FeatureRange::empty(); first.inputs.len()];
        let mut targets = match (&first.target, normalize_targets) {
            (Target::Values(values), true) => Some(vec![FeatureRange::empty(); values.len()]),
            _ => None,
        };

        for sample in store.samples() {
            for (range, value) in inputs.iter_mut().zip(sample.inputs.iter()) {
                range.include(*value);
            }
            if let (Some(ranges), Target::Values(values)) = (targets.as_mut(), &sample.target) {
                for (range, value) in ranges.iter_mut().zip(values.iter()) {
                    range.include(*value);
                }
            }
        }

        log::debug!(
            "Fitted normalizer on {} samples ({} input features)",
            store.size(),
            inputs.len()
        );
        self.inputs = Some(inputs);
        self.targets = targets;

        Ok(())
    }

    pub fn is_fitted(&self) -> bool {
        self.inputs.is_some()
    }

    pub fn input_ranges(&self) -> Option<&[FeatureRange]> {
        self.inputs.as_deref()
    }

    pub fn target_ranges(&self) -> Option<&[FeatureRange]> {
        self.targets.as_deref()
    }

    /// Scale an input vector. Values outside the fitted range are not clamped.
    pub fn apply_inputs(&self, inputs: &[f64]) -> Result<Vec<f64>> {
        let ranges = self.inputs.as_ref().ok_or(SessionError::NotFitted)?;
        if ranges.len() != inputs.len() {
            return Err(SessionError::ArityMismatch {
                what: "input",
                expected: ranges.len(),
                got: inputs.len(),
            });
        }
        Ok(scale(ranges, inputs, FeatureRange::normalize))
    }

    /// Scale a whole sample, including numeric targets when they were fitted.
    pub fn apply(&self, sample: &Sample) -> Result<Sample> {
        let inputs = self.apply_inputs(&sample.inputs)?;
        let target = match (&self.targets, &sample.target) {
            (Some(ranges), Target::Values(values)) => {
                Target::Values(scale(ranges, values, FeatureRange::normalize))
            }
            (_, target) => target.clone(),
        };
        Ok(Sample { inputs, target })
    }

    /// Map normalized targets back to the original units. Without fitted
    /// target ranges the values are returned as they are.
    pub fn invert_targets(&self, values: &[f64]) -> Result<Vec<f64>> {
        if !self.is_fitted() {
            return Err(SessionError::NotFitted);
        }
        match &self.targets {
            Some(ranges) => Ok(scale(ranges, values, FeatureRange::denormalize)),
            None => Ok(values.to_vec()),
        }
    }
}

fn scale(ranges: &[FeatureRange], values: &[f64], f: fn(&FeatureRange, f64) -> f64) -> Vec<f64> {
    ranges
        .iter()
        .zip(values.iter())
        .map(|(range, value)| f(range, *value))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;

    fn colour_store() -> SampleStore {
        let mut store = SampleStore::new();
        store.append(vec![10.0, 5.0], vec![255.0, 0.0, 0.0]).unwrap();
        store.append(vec![400.0, 5.0], vec![0.0, 0.0, 255.0]).unwrap();
        store.append(vec![200.0, 5.0], vec![0.0, 0.0, 128.0]).unwrap();
        store
    }

    #[test]
    fn min_maps_to_zero_and_max_to_one() {
        let store = colour_store();
        let mut normalizer = Normalizer::new();
        normalizer.fit(&store, true).unwrap();

        let low = normalizer.apply(&store.samples()[0]).unwrap();
        let high = normalizer.apply(&store.samples()[1]).unwrap();
        assert_eq!(low.inputs[0], 0.0);
        assert_eq!(high.inputs[0], 1.0);
        assert_eq!(low.target, Target::Values(vec![1.0, 0.0, 0.0]));
        assert_eq!(high.target, Target::Values(vec![0.0, 0.0, 1.0]));
    }

    #[test]
    fn constant_feature_maps_to_zero() {
        let store = colour_store();
        let mut normalizer = Normalizer::new();
        normalizer.fit(&store, true).unwrap();

        for sample in store.samples() {
            let scaled = normalizer.apply(sample).unwrap();
            assert_eq!(scaled.inputs[1], 0.0);
        }
        // Constant green channel is restored to its only observed value.
        let restored = normalizer.invert_targets(&[0.5, 0.7, 0.5]).unwrap();
        assert_eq!(restored[1], 0.0);
        assert_eq!(restored[0], 127.5);
    }

    #[test]
    fn apply_before_fit_fails() {
        let normalizer = Normalizer::new();
        let err = normalizer.apply_inputs(&[1.0, 2.0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFitted);
        assert!(normalizer.invert_targets(&[1.0]).is_err());
    }

    #[test]
    fn fit_on_empty_store_fails() {
        let mut normalizer = Normalizer::new();
        let err = normalizer.fit(&SampleStore::new(), true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyStore);
        assert!(!normalizer.is_fitted());
    }

    #[test]
    fn label_targets_are_left_alone() {
        let mut store = SampleStore::new();
        store.append(vec![0.0, 2.0], "a").unwrap();
        store.append(vec![4.0, 2.0], "b").unwrap();
        let mut normalizer = Normalizer::new();
        normalizer.fit(&store, true).unwrap();

        assert!(normalizer.target_ranges().is_none());
        let scaled = normalizer.apply(&store.samples()[1]).unwrap();
        assert_eq!(scaled.inputs, vec![1.0, 0.0]);
        assert_eq!(scaled.target, Target::Label("b".into()));
    }
}
