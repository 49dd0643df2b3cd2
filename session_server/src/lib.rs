pub mod collector;
pub mod data_socket;
pub mod endpoints;
pub mod error;
pub mod meter;
pub mod model;
pub mod nn;
pub mod normalizer;
pub mod persist;
pub mod pose;
pub mod predictor;
pub mod pubsub;
pub mod session;
pub mod store;
pub mod trainer;
pub mod worker;

pub use error::{ErrorKind, Result, SessionError};
pub use model::{Task, TrainedModel};
pub use predictor::{PredictInput, PredictOutput, Prediction, Predictor};
pub use session::{Completion, Phase, Session};
pub use store::{Sample, SampleStore, Target};
pub use trainer::TrainConfig;
