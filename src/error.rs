//! # `cv_cameras` Error module
//!
//! Provides abstractions over errors which can occur during this crate's use.
//!
//! Only camera construction and the SDK seams report errors. Once a camera is running every
//! operation signals failure through a `bool` or an `Option` and logs a warning.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::PathBuf;
use std::time::Duration;

use serde_any;
use thiserror;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Result type used by faillible functions inside the `cv_cameras` crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents errors which can occur during use of the `cv_cameras` crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Cannot find file at {0:?}")]
    FileNotFound(PathBuf),

    #[error("Error deserialising data: {0}")]
    DeserialisationError(serde_any::Error),

    #[error("Cannot start vendor runtime: {0}")]
    RuntimeStartupError(String),

    #[error("The {0} runtime is already in use by another camera in this process")]
    RuntimeInUse(&'static str),

    #[error("Camera {id} not found ({available} camera(s) detected)")]
    DeviceNotFound { id: usize, available: usize },

    #[error("Cannot open camera: {0}")]
    DeviceOpenError(String),

    #[error("Cannot access feature {name}: {reason}")]
    FeatureError { name: String, reason: String },

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("No frame received within {0:?}")]
    GrabTimeout(Duration),

    #[error("Error capturing camera image: {0}")]
    CameraCaptureError(std::io::Error),

    #[error("Error occured while converting an image: {0}")]
    ImageConversionError(image::ImageError),

    #[error("Frame buffer of {actual} bytes does not match {width} x {height} x {channels}")]
    FrameSizeError {
        width: u32,
        height: u32,
        channels: usize,
        actual: usize,
    },

    #[cfg(feature = "v4l2")]
    #[error("Error starting the camera stream: {0}")]
    CamStartError(rscam::Error),
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Error {
    /// Shorthand for a failed named feature access.
    pub fn feature<N: Into<String>, R: ToString>(name: N, reason: R) -> Self {
        Error::FeatureError {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}
