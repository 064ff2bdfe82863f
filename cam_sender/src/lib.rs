//! Capture frames from a webcam and send them to the classify server.
pub mod sensors;

/// Error type.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
