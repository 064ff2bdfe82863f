//! Common code shared between `classify_server` and `cam_sender`.
pub mod prediction;
pub mod protocol;

/// Error type.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
