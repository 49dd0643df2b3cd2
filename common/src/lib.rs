//! Common code shared between `session_server` and `sample_sender`.
pub mod protocol;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
