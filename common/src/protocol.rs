//! Protocol definition for the data socket.
//!
use serde::{Deserialize, Serialize};

/// Definition of protocol messages.
#[derive(Debug, Clone, Deserialize, PartialEq, Serialize)]
pub enum ProtoMsg {
    /// First message of a client, carrying its name.
    ConnectReq(String),
    /// Unlabeled features: collected while the session collects, predicted
    /// while it predicts.
    FrameMsg(FrameMsg),
    /// Features with an explicit target, recorded while the session is idle.
    LabeledMsg(LabeledMsg),
    /// Server reply with the latest prediction.
    PredictionMsg(PredictionMsg),
    ErrorMsg(String),
}

/// Frame message.
#[derive(Debug, Clone, Deserialize, PartialEq, Serialize)]
pub struct FrameMsg {
    pub id: String,
    pub features: Vec<f64>,
}

impl FrameMsg {
    pub fn new(id: String, features: Vec<f64>) -> Self {
        Self { id, features }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Serialize)]
pub enum TargetMsg {
    Values(Vec<f64>),
    Label(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Serialize)]
pub struct LabeledMsg {
    pub id: String,
    pub features: Vec<f64>,
    pub target: TargetMsg,
}

impl LabeledMsg {
    pub fn new(id: String, features: Vec<f64>, target: TargetMsg) -> Self {
        Self {
            id,
            features,
            target,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Serialize)]
pub enum PredictionBody {
    Values(Vec<f64>),
    /// `(label, confidence)` pairs, most likely first.
    Classes(Vec<(String, f64)>),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Serialize)]
pub struct PredictionMsg {
    pub id: String,
    /// Sequence number of the frame this prediction belongs to.
    pub seq: u64,
    pub result: Result<PredictionBody, String>,
}

impl ProtoMsg {
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Box<bincode::ErrorKind>> {
        bincode::deserialize(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, Box<bincode::ErrorKind>> {
        bincode::serialize(self)
    }
}
