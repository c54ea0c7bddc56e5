//! # Basler ace
//!
//! Camera adapter for Basler ace cameras driven through the pylon runtime.
//!
//! Frames are pulled synchronously: the camera grabs with the latest-image-only strategy and
//! [`get_frame`](Camera::get_frame) waits up to five seconds for the next frame.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::camera::Camera;
use crate::error::{Error, Result};
use crate::frame::FrameBuffer;
use crate::sdk::{self, Device, GrabStrategy, Runtime, ACQUISITION_FRAME_RATE, EXPOSURE_TIME};
use crate::types::{AutoMode, PixelFormat, Resolution, Switch};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

const GRAB_TIMEOUT: Duration = Duration::from_millis(5000);

const FRAME_RATE_TOLERANCE: f64 = 0.1;

const EXPOSURE_TOLERANCE: f64 = 0.01;

/// User set loaded on release to bring the camera back to its factory settings.
const DEFAULT_USER_SET: &str = "Default";

// -----------------------------------------------------------------------------------------------
// DATA STRUCTS
// -----------------------------------------------------------------------------------------------

pub struct BaslerAce {
    runtime: Arc<dyn Runtime>,

    device: Option<Box<dyn Device>>,

    pixel_format: PixelFormat,

    name: String,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl BaslerAce {
    /// Open the camera at index `camera_id` and start grabbing.
    ///
    /// Binning is not available, a request other than 1 x 1 only logs a warning.
    pub fn new(
        runtime: Arc<dyn Runtime>,
        camera_id: usize,
        pixel_format: PixelFormat,
        binning: (u32, u32),
    ) -> Result<Self> {
        let device = sdk::open_device(runtime.as_ref(), camera_id)?;
        let name = format!("Basler {}", device.info().model);

        let mut cam = Self {
            runtime,
            device: Some(device),
            pixel_format,
            name,
        };

        if let Err(e) = cam.configure(binning) {
            cam.release();
            return Err(e);
        }

        Ok(cam)
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn configure(&mut self, binning: (u32, u32)) -> Result<()> {
        let pixel_format = self.pixel_format;

        // Colour is delivered as BGR or converted from the raw Bayer data, both are fine
        if let Err(e) = self.device_mut()?.set_enum_feature("PixelFormat", &pixel_format.to_string()) {
            warn!("Cannot set pixel format {}, converting frames instead: {}", pixel_format, e);
        }

        if binning != (1, 1) {
            self.set_binning(binning.0, binning.1);
        }

        self.set_auto_exposure(AutoMode::Continuous);
        self.set_auto_gain(AutoMode::Continuous);
        self.set_auto_white_balance(AutoMode::Once);

        info!("----------------------------------------");
        info!("Camera: {}", self.name);
        info!("Image size: {}", self.resolution());
        info!("Frame rate: {} fps", self.frame_rate());
        info!("Pixel format: {}", self.pixel_format);
        info!("----------------------------------------");

        self.device_mut()?.start_grabbing(GrabStrategy::LatestImageOnly)
    }

    fn device(&self) -> Result<&dyn Device> {
        self.device.as_deref().ok_or(Error::Unsupported("camera has been released"))
    }

    fn device_mut(&mut self) -> Result<&mut dyn Device> {
        match self.device {
            Some(ref mut d) => Ok(d.as_mut()),
            None => Err(Error::Unsupported("camera has been released")),
        }
    }

    fn set_auto(&mut self, feature: &str, mode: AutoMode) -> bool {
        self.device_mut()
            .and_then(|device| sdk::set_auto_feature(device, feature, mode))
            .map_err(|e| warn!("Cannot set {} to {}: {}", feature, mode, e))
            .is_ok()
    }
}

impl Camera for BaslerAce {
    fn release(&mut self) {
        let mut device = match self.device.take() {
            Some(d) => d,
            None => return,
        };

        info!("Release camera: {}", self.name);

        if let Err(e) = device.stop_grabbing() {
            warn!("Cannot stop grabbing: {}", e);
        }

        info!("Reset camera: {}", self.name);
        let reset = device
            .set_enum_feature("UserSetSelector", DEFAULT_USER_SET)
            .and_then(|_| device.execute_command("UserSetLoad"));
        if let Err(e) = reset {
            warn!("Cannot load user set {}: {}", DEFAULT_USER_SET, e);
        }

        if let Err(e) = device.close() {
            warn!("Cannot close camera: {}", e);
        }

        if let Err(e) = self.runtime.shutdown() {
            warn!("Cannot shut down {} runtime: {}", self.runtime.name(), e);
        }
    }

    fn get_frame(&mut self) -> Option<FrameBuffer> {
        let pixel_format = self.pixel_format;
        let device = self.device_mut().ok()?;

        if !device.is_grabbing() {
            warn!("Camera is not grabbing");
            return None;
        }

        let raw = match device.retrieve(GRAB_TIMEOUT) {
            Ok(r) => r,
            Err(e) => {
                warn!("No frame grabbed: {}", e);
                return None;
            }
        };

        FrameBuffer::from_raw_frame(&raw, pixel_format)
            .map_err(|e| warn!("Cannot convert frame: {}", e))
            .ok()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn resolution(&self) -> Resolution {
        self.device()
            .and_then(sdk::device_resolution)
            .map_err(|e| warn!("Cannot get resolution: {}", e))
            .unwrap_or_default()
    }

    fn set_resolution(&mut self, width: u32, height: u32) -> bool {
        let result = self.device_mut().and_then(|device| {
            device.stop_grabbing()?;
            let set = sdk::set_device_resolution(device, width, height);
            device.start_grabbing(GrabStrategy::LatestImageOnly)?;
            set
        });

        result.map_err(|e| warn!("Cannot set resolution: {}", e)).is_ok()
    }

    fn frame_rate(&self) -> f64 {
        self.device()
            .and_then(|d| d.float_feature(ACQUISITION_FRAME_RATE))
            .map_err(|e| warn!("Cannot get frame rate: {}", e))
            .unwrap_or(0.0)
    }

    fn set_frame_rate(&mut self, fps: f64) -> bool {
        self.device_mut()
            .and_then(|device| {
                device.set_float_feature(ACQUISITION_FRAME_RATE, fps)?;
                sdk::check_frame_rate(device, fps, FRAME_RATE_TOLERANCE)
            })
            .map_err(|e| warn!("Cannot set frame rate: {}", e))
            .is_ok()
    }

    fn set_autofocus(&mut self, state: Switch) -> bool {
        let mode = match state {
            Switch::Off => AutoMode::Off,
            Switch::On => AutoMode::Continuous,
        };

        self.set_auto("FocusAuto", mode)
    }

    fn exposure_time_range_us(&self) -> Option<(f64, f64)> {
        self.device()
            .and_then(|d| d.float_range(EXPOSURE_TIME))
            .map_err(|e| warn!("Cannot get exposure time range: {}", e))
            .ok()
    }

    fn set_exposure_time_us(&mut self, exposure_time: f64) -> bool {
        self.device_mut()
            .and_then(|device| sdk::set_exposure_time(device, exposure_time, EXPOSURE_TOLERANCE))
            .map_err(|e| warn!("Cannot set exposure time: {}", e))
            .is_ok()
    }

    fn set_auto_exposure(&mut self, mode: AutoMode) -> bool {
        self.set_auto("ExposureAuto", mode)
    }

    fn set_auto_gain(&mut self, mode: AutoMode) -> bool {
        self.set_auto("GainAuto", mode)
    }

    fn set_auto_white_balance(&mut self, mode: AutoMode) -> bool {
        self.set_auto("BalanceWhiteAuto", mode)
    }
}

impl Drop for BaslerAce {
    fn drop(&mut self) {
        self.release();
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(all(test, feature = "sim"))]
mod tests {

    use super::*;
    use crate::sim::{SimProfile, SimRuntime};

    fn camera(runtime: &SimRuntime, format: PixelFormat) -> BaslerAce {
        BaslerAce::new(Arc::new(runtime.clone()), 0, format, (1, 1)).unwrap()
    }

    #[test]
    fn test_name() {
        let runtime = SimRuntime::pylon();
        assert_eq!(camera(&runtime, PixelFormat::Bgr8).name(), "Basler acA1920-40uc");
    }

    /// Autofocus maps each state to its own entry
    #[test]
    fn test_autofocus_modes() {
        let runtime = SimRuntime::new("pylon", vec![SimProfile::ace().with_focus_auto()]);
        let mut cam = camera(&runtime, PixelFormat::Bgr8);

        assert!(cam.set_autofocus(Switch::On));
        assert_eq!(runtime.device_state("BA-0001").unwrap().focus_auto, "Continuous");
        assert!(cam.set_autofocus(Switch::Off));
        assert_eq!(runtime.device_state("BA-0001").unwrap().focus_auto, "Off");
    }

    #[test]
    fn test_autofocus_missing() {
        let runtime = SimRuntime::pylon();
        assert!(!camera(&runtime, PixelFormat::Bgr8).set_autofocus(Switch::On));
    }

    /// A stalled camera times out instead of blocking forever
    #[test]
    fn test_grab_timeout() {
        let runtime = SimRuntime::pylon();
        let mut cam = camera(&runtime, PixelFormat::Mono8);

        assert_eq!(cam.get_frame().unwrap().channels(), 1);

        runtime.configure("BA-0001", |s| s.stalled = true);
        assert!(cam.get_frame().is_none());
    }

    /// Release loads the default user set, even after the camera was reconfigured
    #[test]
    fn test_release_resets_user_set() {
        let runtime = SimRuntime::pylon();
        let mut cam = camera(&runtime, PixelFormat::Bgr8);

        assert!(cam.set_resolution(640, 480));
        cam.release();

        let state = runtime.device_state("BA-0001").unwrap();
        assert_eq!(state.resets, 1);
        assert_eq!((state.width, state.height), (1920, 1200));
        assert!(!runtime.is_open("BA-0001"));
    }

    #[test]
    fn test_failed_reset_still_closes() {
        let runtime = SimRuntime::pylon();
        let mut cam = camera(&runtime, PixelFormat::Bgr8);

        runtime.configure("BA-0001", |s| s.fail_reset = true);
        cam.release();

        assert!(!runtime.is_open("BA-0001"));
        assert!(!runtime.is_started());
    }
}
