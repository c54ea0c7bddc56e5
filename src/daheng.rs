//! # Daheng Imaging
//!
//! Camera adapter for Daheng Imaging cameras driven through the Galaxy runtime.
//!
//! The camera keeps its native pixel format. Colour frames are demosaiced from the raw Bayer data
//! on the host, grayscale frames use the raw sensor values directly. Frames are pulled with a one
//! second timeout.

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

const GRAB_TIMEOUT: Duration = Duration::from_millis(1000);

const FRAME_RATE_TOLERANCE: f64 = 1.0;

const EXPOSURE_TOLERANCE: f64 = 0.05;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTS
// -----------------------------------------------------------------------------------------------

pub struct DahengVision {
    runtime: Arc<dyn Runtime>,

    device: Option<Box<dyn Device>>,

    pixel_format: PixelFormat,

    name: String,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DahengVision {
    /// Open the camera at index `camera_id` and start grabbing.
    pub fn new(
        runtime: Arc<dyn Runtime>,
        camera_id: usize,
        pixel_format: PixelFormat,
        binning: (u32, u32),
    ) -> Result<Self> {
        let device = sdk::open_device(runtime.as_ref(), camera_id)?;
        let name = format!("Daheng Imaging {}", device.info().model);

        let mut cam = Self {
            runtime,
            device: Some(device),
            pixel_format,
            name,
        };

        if binning != (1, 1) {
            cam.set_binning(binning.0, binning.1);
        }

        cam.set_auto_exposure(AutoMode::Continuous);
        cam.set_auto_gain(AutoMode::Continuous);
        cam.set_auto_white_balance(AutoMode::Once);

        info!("----------------------------------------");
        info!("Camera: {}", cam.name);
        info!("Image size: {}", cam.resolution());
        info!("Sensor size: {}", cam.sensor_resolution().unwrap_or_default());
        info!("Frame rate: {} fps", cam.frame_rate());
        info!("----------------------------------------");

        if let Err(e) = cam.start_acquisition() {
            cam.release();
            return Err(e);
        }

        Ok(cam)
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn start_acquisition(&mut self) -> Result<()> {
        let device = self.device_mut()?;
        device.start_grabbing(GrabStrategy::LatestImageOnly)?;
        device.execute_command("AcquisitionStart")
    }

    fn stop_acquisition(&mut self) -> Result<()> {
        let device = self.device_mut()?;
        device.execute_command("AcquisitionStop")?;
        device.stop_grabbing()
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

impl Camera for DahengVision {
    fn release(&mut self) {
        if self.device.is_none() {
            return;
        }

        info!("Release camera: {}", self.name);

        if let Err(e) = self.stop_acquisition() {
            warn!("Cannot stop acquisition: {}", e);
        }

        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.execute_command("DeviceReset") {
                warn!("Cannot reset camera: {}", e);
            }
            if let Err(e) = device.close() {
                warn!("Cannot close camera: {}", e);
            }
        }

        if let Err(e) = self.runtime.shutdown() {
            warn!("Cannot shut down {} runtime: {}", self.runtime.name(), e);
        }
    }

    fn get_frame(&mut self) -> Option<FrameBuffer> {
        let pixel_format = self.pixel_format;
        let device = self.device_mut().ok()?;

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
        let stopped = self.stop_acquisition();
        let set = stopped.and_then(|_| {
            let device = self.device_mut()?;
            sdk::set_device_resolution(device, width, height)
        });
        let restarted = self.start_acquisition();

        set.and(restarted).map_err(|e| warn!("Cannot set resolution: {}", e)).is_ok()
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

    fn set_autofocus(&mut self, _state: Switch) -> bool {
        warn!("Autofocus not supported");
        false
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

    fn sensor_resolution(&self) -> Option<Resolution> {
        let device = self.device().ok()?;

        match (device.int_feature("SensorWidth"), device.int_feature("SensorHeight")) {
            (Ok(w), Ok(h)) => Some(Resolution::new(w as u32, h as u32)),
            _ => None,
        }
    }
}

impl Drop for DahengVision {
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
    use crate::sim::SimRuntime;

    fn camera(runtime: &SimRuntime, format: PixelFormat) -> DahengVision {
        DahengVision::new(Arc::new(runtime.clone()), 0, format, (1, 1)).unwrap()
    }

    #[test]
    fn test_name_and_sensor() {
        let runtime = SimRuntime::galaxy();
        let cam = camera(&runtime, PixelFormat::Bgr8);

        assert_eq!(cam.name(), "Daheng Imaging MER2-160-227U3C");
        assert_eq!(cam.sensor_resolution(), Some(Resolution::new(1440, 1080)));
    }

    /// The raw Bayer frames are delivered as BGR or as the raw gray values
    #[test]
    fn test_frame_formats() {
        let runtime = SimRuntime::galaxy();

        let mut cam = camera(&runtime, PixelFormat::Bgr8);
        let frame = cam.get_frame().unwrap();
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.resolution(), Resolution::new(1440, 1080));
        cam.release();

        let mut cam = camera(&runtime, PixelFormat::Mono8);
        let frame = cam.get_frame().unwrap();
        assert_eq!(frame.channels(), 1);
        assert_eq!(runtime.device_state("DH-0001").unwrap().pixel_format, "BayerRG8");
    }

    #[test]
    fn test_binning_not_supported() {
        let runtime = SimRuntime::galaxy();
        let mut cam = DahengVision::new(Arc::new(runtime.clone()), 0, PixelFormat::Bgr8, (2, 2)).unwrap();

        assert_eq!(cam.resolution(), Resolution::new(1440, 1080));
        assert!(!cam.set_binning(2, 2));
    }

    #[test]
    fn test_set_resolution_restarts_grabbing() {
        let runtime = SimRuntime::galaxy();
        let mut cam = camera(&runtime, PixelFormat::Bgr8);

        assert!(cam.set_resolution(640, 480));
        assert!(!cam.set_resolution(642, 480));
        assert!(!cam.set_resolution(4000, 480));

        let frame = cam.get_frame().unwrap();
        assert_eq!(frame.resolution(), Resolution::new(640, 480));
    }
}
