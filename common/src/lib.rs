//! Types shared between `overlay_server` and `cam_feed`.
pub mod protocol;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
