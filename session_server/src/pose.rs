//! Turning body keypoints into feature vectors and stabilizing the labels
//! predicted from them.
use serde::{Deserialize, Serialize};

use crate::predictor::Prediction;

/// Number of keypoints produced by MoveNet.
pub const MOVENET_KEYPOINTS: usize = 17;

/// Default confidence a label needs before it replaces the shown one.
pub const DEFAULT_HOLD_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub confidence: f64,
}

/// Interleave keypoint coordinates as `[x0, y0, x1, y1, ..]`.
pub fn flatten_keypoints(keypoints: &[Keypoint]) -> Vec<f64> {
    keypoints
        .iter()
        .flat_map(|keypoint| [keypoint.x, keypoint.y])
        .collect()
}

/// Keeps the last label that was predicted with high enough confidence, so
/// a displayed label does not flicker on uncertain frames.
#[derive(Debug, Clone)]
pub struct LabelHold {
    threshold: f64,
    current: Option<String>,
}

impl Default for LabelHold {
    fn default() -> Self {
        Self::new(DEFAULT_HOLD_THRESHOLD)
    }
}

impl LabelHold {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            current: None,
        }
    }

    /// Feed a new prediction and get the label to display.
    pub fn update(&mut self, prediction: &Prediction) -> Option<&str> {
        if let Some(top) = prediction.top_label() {
            if top.confidence > self.threshold {
                self.current = Some(top.label.clone());
            }
        }
        self.current.as_deref()
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }
}
