//! Camera access via V4L2 on a Linux machine.
//!
use std::io;

use rscam::{Camera, Config, Frame};
use thiserror::Error;

/// Panel message for a denied device permission.
pub const PERMISSION_DENIED_MSG: &str =
    "Camera permission denied. Allow access to the video device in your system settings.";

/// Panel message when no capture device exists.
pub const NO_CAMERA_MSG: &str = "No camera found on this device.";

/// ENODEV surfaces as a raw os error, not as an `io::ErrorKind`.
const ENODEV: i32 = 19;

/// Why the camera could not be used.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("no camera device found")]
    NotFound,
    #[error("failed to open camera: {0}")]
    Open(#[source] io::Error),
    #[error("failed to configure camera: {0}")]
    Configure(#[from] rscam::Error),
    #[error("{0}")]
    Unsupported(String),
}

impl CameraError {
    /// Classify the error from opening the device node.
    pub fn from_open(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => CameraError::PermissionDenied,
            io::ErrorKind::NotFound => CameraError::NotFound,
            _ if err.raw_os_error() == Some(ENODEV) => CameraError::NotFound,
            _ => CameraError::Open(err),
        }
    }

    /// String shown verbatim on the display panel for this failure.
    pub fn user_message(&self) -> String {
        match self {
            CameraError::PermissionDenied => PERMISSION_DENIED_MSG.to_owned(),
            CameraError::NotFound => NO_CAMERA_MSG.to_owned(),
            other => format!("Failed to access camera: {other}"),
        }
    }
}

pub type CaptureFn = Box<dyn Fn() -> Option<Frame> + Send + Sync>;

/// Open a video device and return a capture closure together with the
/// negotiated resolution.
///
/// Preferred resolution and frame rate are used as-is; without a preference
/// the camera's maximum discrete values are selected.
pub fn open_capture(
    device: &str,
    format: &str,
    resolution: Option<(u32, u32)>,
    frame_rate: Option<(u32, u32)>,
) -> Result<(CaptureFn, (u32, u32)), CameraError> {
    let mut cam = Camera::new(device).map_err(CameraError::from_open)?;
    log_supported_formats(&cam, format);
    let format = format.as_bytes();

    log::info!("Using camera {}", device);

    let resolution = resolution
        .map(Ok)
        .unwrap_or_else(|| max_resolution(&cam, format))?;

    let frame_rate = frame_rate
        .map(Ok)
        .unwrap_or_else(|| max_frame_rate(&cam, format, resolution))?;

    cam.start(&Config {
        interval: frame_rate,
        resolution,
        format,
        ..Default::default()
    })?;

    let callback = move || cam.capture().ok();
    Ok((Box::new(callback), resolution))
}

/// Highest discrete resolution the camera offers for the given format.
fn max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32), CameraError> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            .max_by_key(|res| res.0 * res.1)
            .copied(),
        rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
    }
    .ok_or_else(|| CameraError::Unsupported("no resolution found".into()))
}

/// Highest frame rate the camera offers for the given format and resolution.
fn max_frame_rate(
    cam: &Camera,
    format: &[u8],
    resolution: (u32, u32),
) -> Result<(u32, u32), CameraError> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        // Intervals are (denominator, numerator); rate is numerator/denominator.
        rscam::IntervalInfo::Discretes(frame_rates) => frame_rates
            .iter()
            .max_by_key(|(denominator, numerator)| numerator / denominator)
            .copied(),
        rscam::IntervalInfo::Stepwise { max, .. } => Some(max),
    }
    .ok_or_else(|| CameraError::Unsupported("no frame rate found".into()))
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn permission_denied_maps_to_its_own_message() {
        let err = CameraError::from_open(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, CameraError::PermissionDenied));
        assert_eq!(err.user_message(), PERMISSION_DENIED_MSG);
    }

    #[test]
    fn missing_device_maps_to_no_camera_message() {
        let err = CameraError::from_open(io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, CameraError::NotFound));
        assert_eq!(err.user_message(), NO_CAMERA_MSG);

        let err = CameraError::from_open(io::Error::from_raw_os_error(ENODEV));
        assert!(matches!(err, CameraError::NotFound));
    }

    #[test]
    fn other_open_errors_keep_the_generic_message() {
        let err = CameraError::from_open(io::Error::from(io::ErrorKind::Interrupted));
        assert!(matches!(err, CameraError::Open(_)));
        let message = err.user_message();
        assert!(message.starts_with("Failed to access camera"));
        assert_ne!(message, PERMISSION_DENIED_MSG);
        assert_ne!(message, NO_CAMERA_MSG);
    }

    #[test]
    fn get_cam_info_if_available() -> Result<(), crate::Error> {
        let cam_name = "/dev/video0";
        let cam = Camera::new(cam_name);

        match cam {
            Err(err) => println!("Could not initialize camera (maybe none available): {err}"),
            Ok(cam) => {
                let format = b"MJPG";

                let selected_resolution = max_resolution(&cam, format)?;
                let frame_rates = cam.intervals(format, selected_resolution)?;
                println!("Supported frame rates: {frame_rates:?}");
            }
        }

        Ok(())
    }
}
