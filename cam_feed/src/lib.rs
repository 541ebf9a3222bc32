//! Webcam capture client feeding JPEG frames to `overlay_server`.
pub mod sensors;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
