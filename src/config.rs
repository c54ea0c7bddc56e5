//! # Camera configuration
//!
//! Settings applied when a camera is built, loadable from any file format supported by
//! [`serde_any`](https://docs.rs/serde_any/0.5.0/serde_any/).
//!
//! ```toml
//! camera_id = 0
//! pixel_format = "Mono8"
//! binning = [2, 2]
//! frame_rate = 30.0
//! auto_exposure = "Off"
//! exposure_time_us = 5000.0
//! ```

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use log::warn;
use serde::Deserialize;

use crate::camera::Camera;
use crate::types::{AutoMode, PixelFormat, Resolution, ResolutionPreset};

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Construction and acquisition settings of a camera.
///
/// Missing fields take their default value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Index of the camera among the devices detected by its backend
    pub camera_id: usize,

    pub pixel_format: PixelFormat,

    /// Horizontal and vertical binning factor
    pub binning: (u32, u32),

    /// Frame size, takes precedence over `preset`
    pub resolution: Option<Resolution>,

    pub preset: Option<ResolutionPreset>,

    pub frame_rate: Option<f64>,

    /// Auto modes, `None` keeps the mode the camera starts with
    pub auto_exposure: Option<AutoMode>,

    pub auto_gain: Option<AutoMode>,

    pub auto_white_balance: Option<AutoMode>,

    /// Fixed exposure time, switches auto exposure off
    pub exposure_time_us: Option<f64>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            camera_id: 0,
            pixel_format: PixelFormat::Bgr8,
            binning: (1, 1),
            resolution: None,
            preset: None,
            frame_rate: None,
            auto_exposure: None,
            auto_gain: None,
            auto_white_balance: None,
            exposure_time_us: None,
        }
    }
}

impl CameraConfig {
    /// Apply the acquisition settings to a streaming camera.
    ///
    /// Settings the camera rejects are logged and skipped. Returns `true` if everything was
    /// applied.
    pub fn apply<C: Camera + ?Sized>(&self, camera: &mut C) -> bool {
        let mut ok = true;

        if let Some(res) = self.resolution {
            ok &= camera.set_resolution(res.width, res.height);
        } else if let Some(preset) = self.preset {
            ok &= camera.set_resolution_preset(preset);
        }

        if let Some(fps) = self.frame_rate {
            ok &= camera.set_frame_rate(fps);
        }

        if let Some(mode) = self.auto_gain {
            ok &= camera.set_auto_gain(mode);
        }

        // A fixed exposure time switches auto exposure off
        if let Some(exposure) = self.exposure_time_us {
            ok &= camera.set_exposure_time_us(exposure);
        } else if let Some(mode) = self.auto_exposure {
            ok &= camera.set_auto_exposure(mode);
        }

        if let Some(mode) = self.auto_white_balance {
            ok &= camera.set_auto_white_balance(mode);
        }

        if !ok {
            warn!("Not all settings could be applied to {}", camera.name());
        }

        ok
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
