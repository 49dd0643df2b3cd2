//! Error types of the training session.
//!
use thiserror::Error;

use crate::session::Phase;

/// Result alias used throughout the session library.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Coarse classification of errors, used to pick a status code or decide
/// whether collecting more samples could help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ArityMismatch,
    EmptyStore,
    NotFitted,
    InsufficientData,
    InvalidState,
    NotReady,
    InvalidConfig,
    Persist,
    Internal,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{what} arity mismatch: expected {expected}, got {got}")]
    ArityMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("target kind mismatch: store holds {expected} targets, got {got}")]
    TargetKindMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("non-finite value {value} at {what} index {index}")]
    NonFinite {
        what: &'static str,
        index: usize,
        value: f64,
    },

    #[error("sample store is empty")]
    EmptyStore,

    #[error("normalizer has not been fitted")]
    NotFitted,

    #[error("insufficient data: {have} samples available, {need} required")]
    InsufficientData { have: usize, need: usize },

    #[error("operation `{operation}` is not allowed while {phase}")]
    InvalidState {
        operation: &'static str,
        phase: Phase,
    },

    #[error("no trained model available")]
    NotReady,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to encode or decode: {0}")]
    Persist(String),

    #[error("training worker stopped: {0}")]
    Worker(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::ArityMismatch { .. }
            | SessionError::TargetKindMismatch { .. }
            | SessionError::NonFinite { .. } => ErrorKind::ArityMismatch,
            SessionError::EmptyStore => ErrorKind::EmptyStore,
            SessionError::NotFitted => ErrorKind::NotFitted,
            SessionError::InsufficientData { .. } => ErrorKind::InsufficientData,
            SessionError::InvalidState { .. } => ErrorKind::InvalidState,
            SessionError::NotReady => ErrorKind::NotReady,
            SessionError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            SessionError::Persist(_) | SessionError::Io(_) => ErrorKind::Persist,
            SessionError::Worker(_) => ErrorKind::Internal,
        }
    }
}

impl From<Box<bincode::ErrorKind>> for SessionError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        SessionError::Persist(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Persist(err.to_string())
    }
}

/// Reject NaN and infinite values in a feature or target vector.
pub(crate) fn check_finite(what: &'static str, values: &[f64]) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(SessionError::NonFinite {
            what,
            index,
            value: values[index],
        }),
        None => Ok(()),
    }
}
