//! Prediction on a trained model.
//!
//! Output shape mirrors the input shape: one input vector gives one
//! prediction, a batch of vectors gives a batch of predictions in the same
//! order.
use std::{cmp::Ordering, sync::Arc};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{
    error::{check_finite, Result, SessionError},
    meter::METER,
    model::{ModelKind, TrainedModel},
};

/// One or many input vectors. Deserializes from `[..]` or `[[..], ..]`;
/// a bare `[]` lands in `Single` and is predicted as an empty batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictInput {
    Single(Vec<f64>),
    Batch(Vec<Vec<f64>>),
}

impl From<Vec<f64>> for PredictInput {
    fn from(inputs: Vec<f64>) -> Self {
        PredictInput::Single(inputs)
    }
}

impl From<Vec<Vec<f64>>> for PredictInput {
    fn from(inputs: Vec<Vec<f64>>) -> Self {
        PredictInput::Batch(inputs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelConfidence {
    pub label: String,
    pub confidence: f64,
}

/// Result for a single input vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prediction {
    /// Regression output in the units of the training targets.
    Values(Vec<f64>),
    /// Classes sorted by descending confidence.
    Classes(Vec<LabelConfidence>),
}

impl Prediction {
    /// The most likely label, for classification results.
    pub fn top_label(&self) -> Option<&LabelConfidence> {
        match self {
            Prediction::Classes(classes) => classes.first(),
            Prediction::Values(_) => None,
        }
    }

    pub fn values(&self) -> Option<&[f64]> {
        match self {
            Prediction::Values(values) => Some(values),
            Prediction::Classes(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictOutput {
    Single(Prediction),
    Batch(Vec<Prediction>),
}

impl PredictOutput {
    pub fn into_single(self) -> Option<Prediction> {
        match self {
            PredictOutput::Single(prediction) => Some(prediction),
            PredictOutput::Batch(_) => None,
        }
    }

    pub fn into_batch(self) -> Option<Vec<Prediction>> {
        match self {
            PredictOutput::Batch(predictions) => Some(predictions),
            PredictOutput::Single(_) => None,
        }
    }
}

/// Cheap, cloneable handle running predictions on a shared model.
#[derive(Debug, Clone)]
pub struct Predictor {
    model: Arc<TrainedModel>,
}

impl Predictor {
    pub fn new(model: Arc<TrainedModel>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &Arc<TrainedModel> {
        &self.model
    }

    /// Predict one vector or a batch. Every served prediction is counted on
    /// the global meter.
    ///
    /// An empty vector is taken as an empty batch: JSON `[]` cannot tell the
    /// two apart and no model has zero inputs.
    pub fn predict(&self, input: PredictInput) -> Result<PredictOutput> {
        let output = match input {
            PredictInput::Single(inputs) if inputs.is_empty() => PredictOutput::Batch(Vec::new()),
            PredictInput::Single(inputs) => {
                let mut predictions = self.predict_rows(std::slice::from_ref(&inputs))?;
                let prediction = predictions.pop().ok_or(SessionError::NotReady)?;
                PredictOutput::Single(prediction)
            }
            PredictInput::Batch(batch) => PredictOutput::Batch(self.predict_rows(&batch)?),
        };
        Ok(output)
    }

    pub fn predict_one(&self, inputs: &[f64]) -> Result<Prediction> {
        let mut predictions = self.predict_rows(&[inputs.to_vec()])?;
        predictions.pop().ok_or(SessionError::NotReady)
    }

    fn predict_rows(&self, rows: &[Vec<f64>]) -> Result<Vec<Prediction>> {
        let normalizer = &self.model.normalizer;
        let input_dim = self.model.input_dim();

        let mut batch = Array2::zeros((rows.len(), input_dim));
        for (i, row) in rows.iter().enumerate() {
            check_finite("input", row)?;
            let scaled = normalizer.apply_inputs(row)?;
            for (j, value) in scaled.into_iter().enumerate() {
                batch[[i, j]] = value;
            }
        }

        let outputs = self.model.network.forward(&batch);

        let predictions = outputs
            .rows()
            .into_iter()
            .map(|row| match &self.model.kind {
                ModelKind::Regression { .. } => {
                    Ok(Prediction::Values(normalizer.invert_targets(&row.to_vec())?))
                }
                ModelKind::Classification { labels } => {
                    Ok(Prediction::Classes(rank_labels(labels, &row.to_vec())))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        METER.add_predictions(predictions.len() as u64);
        Ok(predictions)
    }
}

/// Pair labels with probabilities and sort by descending probability. The
/// sort is stable, so ties keep the first-seen label order.
fn rank_labels(labels: &[String], probabilities: &[f64]) -> Vec<LabelConfidence> {
    let mut ranked: Vec<_> = labels
        .iter()
        .zip(probabilities.iter())
        .map(|(label, confidence)| LabelConfidence {
            label: label.clone(),
            confidence: *confidence,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    ranked
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn ties_keep_first_seen_order() {
        let labels = vec!["c".to_owned(), "a".to_owned(), "b".to_owned()];
        let ranked = rank_labels(&labels, &[0.25, 0.5, 0.25]);
        let order: Vec<_> = ranked.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(order, vec!["a", "c", "b"]);
    }

    #[test]
    fn input_shape_from_json() {
        let single: PredictInput = serde_json::from_str("[10, 10]").unwrap();
        assert_eq!(single, PredictInput::Single(vec![10.0, 10.0]));
        let batch: PredictInput = serde_json::from_str("[[10, 10], [400, 400]]").unwrap();
        assert!(matches!(batch, PredictInput::Batch(ref rows) if rows.len() == 2));
    }

    fn trained_regressor() -> Predictor {
        use crate::{model::Task, session::Session, trainer::TrainConfig};

        let mut session = Session::new(Task::Regression);
        for i in 0..4 {
            session.record(vec![i as f64, 1.0], vec![2.0 * i as f64]).unwrap();
        }
        session
            .train(TrainConfig {
                epochs: 2,
                batch_size: 4,
                ..Default::default()
            })
            .unwrap();
        session.predictor().unwrap()
    }

    #[test]
    fn non_finite_inputs_fail_the_whole_request() {
        let predictor = trained_regressor();

        let err = predictor
            .predict(PredictInput::Single(vec![f64::NAN, 1.0]))
            .unwrap_err();
        assert!(matches!(err, SessionError::NonFinite { index: 0, .. }), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::ArityMismatch);

        let batch = vec![vec![1.0, 1.0], vec![2.0, f64::INFINITY], vec![3.0, 1.0]];
        let err = predictor.predict(PredictInput::Batch(batch)).unwrap_err();
        assert!(matches!(err, SessionError::NonFinite { index: 1, .. }), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::ArityMismatch);

        assert!(predictor.predict_one(&[1.0, f64::NEG_INFINITY]).is_err());
    }

    #[test]
    fn empty_json_array_is_an_empty_batch() {
        let predictor = trained_regressor();

        let input: PredictInput = serde_json::from_str("[]").unwrap();
        assert_eq!(predictor.predict(input).unwrap(), PredictOutput::Batch(Vec::new()));
        assert_eq!(
            predictor.predict(PredictInput::Batch(Vec::new())).unwrap(),
            PredictOutput::Batch(Vec::new())
        );
    }

    #[test]
    fn every_predicted_row_is_metered() {
        let predictor = trained_regressor();
        let rows = vec![vec![1.0, 1.0], vec![2.0, 1.0], vec![3.0, 1.0]];

        METER.take(std::time::Duration::from_secs(1));
        predictor.predict(PredictInput::Batch(rows)).unwrap();
        predictor.predict(PredictInput::Single(vec![0.0, 1.0])).unwrap();
        // Other tests may predict concurrently, so only a lower bound holds.
        assert!(METER.take(std::time::Duration::from_secs(1)).predictions >= 4);
    }
}
