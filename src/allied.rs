//! # Allied Vision Alvium
//!
//! Camera adapter for Allied Vision Alvium cameras driven through the Vimba X runtime.
//!
//! Acquisition is asynchronous: the runtime pushes frames from its own thread into a
//! [`FrameObserver`], and [`get_frame`](Camera::get_frame) collects the latest one without
//! blocking. Vimba X can only be started once per process, so only one `AlliedAlvium` may exist
//! at a time; constructing a second one fails with [`Error::RuntimeInUse`].

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::{info, warn};

use crate::camera::Camera;
use crate::error::{Error, Result};
use crate::frame::FrameBuffer;
use crate::observer::FrameObserver;
use crate::sdk::{self, Device, Runtime, RuntimeClaim, ACQUISITION_FRAME_RATE, EXPOSURE_TIME};
use crate::types::{AutoMode, PixelFormat, Resolution, Switch};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Set while a camera holds the Vimba X runtime.
static VIMBA_RUNTIME: AtomicBool = AtomicBool::new(false);

/// Number of frame buffers handed to the runtime.
const FRAME_BUFFER_COUNT: usize = 2;

const FRAME_RATE_TOLERANCE: f64 = 1.0;

/// Default relative exposure time tolerance.
pub const DEFAULT_EXPOSURE_TOLERANCE: f64 = 0.01;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTS
// -----------------------------------------------------------------------------------------------

pub struct AlliedAlvium {
    runtime: Arc<dyn Runtime>,

    /// `None` once released
    device: Option<Box<dyn Device>>,

    /// Observer of the running acquisition
    observer: Option<Arc<FrameObserver>>,

    pixel_format: PixelFormat,

    name: String,

    exposure_tolerance: f64,

    claim: Option<RuntimeClaim>,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl AlliedAlvium {
    /// Open the camera at index `camera_id` and start streaming.
    ///
    /// Binning other than 1 x 1 is applied before acquisition starts. Auto exposure and auto gain
    /// are switched to continuous, white balance is adjusted once.
    pub fn new(
        runtime: Arc<dyn Runtime>,
        camera_id: usize,
        pixel_format: PixelFormat,
        binning: (u32, u32),
    ) -> Result<Self> {
        let claim = RuntimeClaim::acquire(&VIMBA_RUNTIME, runtime.name())?;
        let device = sdk::open_device(runtime.as_ref(), camera_id)?;
        let name = format!("{} {}", device.info().vendor, device.info().model);

        let mut cam = Self {
            runtime,
            device: Some(device),
            observer: None,
            pixel_format,
            name,
            exposure_tolerance: DEFAULT_EXPOSURE_TOLERANCE,
            claim: Some(claim),
        };

        if let Err(e) = cam.configure(binning) {
            cam.release();
            return Err(e);
        }

        Ok(cam)
    }

    /// Set the relative tolerance used to verify exposure times, e.g. `0.05` for 5 %.
    pub fn set_exposure_tolerance(&mut self, tolerance: f64) {
        self.exposure_tolerance = tolerance;
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Number of frames the runtime delivered that were never collected.
    pub fn dropped_frames(&self) -> usize {
        self.observer.as_ref().map_or(0, |o| o.dropped_frames())
    }

    fn configure(&mut self, binning: (u32, u32)) -> Result<()> {
        let pixel_format = self.pixel_format;
        let device = self.device_mut()?;

        device
            .set_enum_feature("PixelFormat", &pixel_format.to_string())
            .map_err(|e| Error::DeviceOpenError(format!("cannot set pixel format {}: {}", pixel_format, e)))?;

        if binning != (1, 1) {
            set_device_binning(device, binning.0, binning.1)?;
        }

        self.apply_auto_modes();
        self.log_properties();
        self.start_acquisition()
    }

    fn apply_auto_modes(&mut self) {
        self.set_auto_exposure(AutoMode::Continuous);
        self.set_auto_gain(AutoMode::Continuous);
        self.set_auto_white_balance(AutoMode::Once);
    }

    fn log_properties(&self) {
        let sensor = self.sensor_resolution().unwrap_or_default();

        info!("----------------------------------------");
        info!("Camera: {}", self.name);
        info!("Image size: {}", self.resolution());
        info!("Sensor size: {}", sensor);
        info!("Frame rate: {} fps", self.frame_rate());
        info!("Pixel format: {}", self.pixel_format);
        info!("----------------------------------------");
    }

    fn start_acquisition(&mut self) -> Result<()> {
        let observer = Arc::new(FrameObserver::new(self.pixel_format));
        self.device_mut()?.start_async(FRAME_BUFFER_COUNT, observer.clone())?;
        self.observer = Some(observer);
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<()> {
        if self.observer.take().is_some() {
            self.device_mut()?.stop_async()?;
        }
        Ok(())
    }

    /// Run `f` with acquisition stopped, restarting it afterwards even if `f` fails.
    fn with_acquisition_stopped<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Device) -> Result<T>,
    {
        self.stop_acquisition()?;
        let result = f(self.device_mut()?);

        if let Err(e) = self.start_acquisition() {
            warn!(
                "Cannot restart acquisition on {}, no more frames will be delivered: {}",
                self.name, e
            );
            return Err(e);
        }

        result
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
}

impl Camera for AlliedAlvium {
    fn release(&mut self) {
        if self.device.is_none() && self.claim.is_none() {
            return;
        }

        info!("Release camera: {}", self.name);

        if let Err(e) = self.stop_acquisition() {
            warn!("Cannot stop acquisition: {}", e);
        }

        if let Some(mut device) = self.device.take() {
            // Binning can only be reduced after a reset, leave the camera in its default state
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

        self.claim = None;
    }

    fn get_frame(&mut self) -> Option<FrameBuffer> {
        self.observer.as_ref().and_then(|o| o.get_next_frame())
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn resolution(&self) -> Resolution {
        match self.device().and_then(sdk::device_resolution) {
            Ok(r) => r,
            Err(e) => {
                warn!("Cannot get resolution: {}", e);
                Resolution::default()
            }
        }
    }

    fn set_resolution(&mut self, width: u32, height: u32) -> bool {
        self.with_acquisition_stopped(|device| sdk::set_device_resolution(device, width, height))
            .map_err(|e| warn!("Cannot set resolution: {}", e))
            .is_ok()
    }

    fn frame_rate(&self) -> f64 {
        match self.device().and_then(|d| d.float_feature(ACQUISITION_FRAME_RATE)) {
            Ok(fps) => fps,
            Err(e) => {
                warn!("Cannot get frame rate: {}", e);
                0.0
            }
        }
    }

    fn set_frame_rate(&mut self, fps: f64) -> bool {
        self.device_mut()
            .and_then(|device| {
                device.set_bool_feature("AcquisitionFrameRateEnable", true)?;
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
        let tolerance = self.exposure_tolerance;

        self.device_mut()
            .and_then(|device| sdk::set_exposure_time(device, exposure_time, tolerance))
            .map_err(|e| warn!("Cannot set exposure time: {}", e))
            .is_ok()
    }

    fn set_auto_exposure(&mut self, mode: AutoMode) -> bool {
        self.device_mut()
            .and_then(|device| sdk::set_auto_feature(device, "ExposureAuto", mode))
            .map_err(|e| warn!("Cannot set auto exposure {}: {}", mode, e))
            .is_ok()
    }

    fn set_auto_gain(&mut self, mode: AutoMode) -> bool {
        self.device_mut()
            .and_then(|device| sdk::set_auto_feature(device, "GainAuto", mode))
            .map_err(|e| warn!("Cannot set auto gain {}: {}", mode, e))
            .is_ok()
    }

    fn set_auto_white_balance(&mut self, mode: AutoMode) -> bool {
        self.device_mut()
            .and_then(|device| sdk::set_auto_feature(device, "BalanceWhiteAuto", mode))
            .map_err(|e| warn!("Cannot set auto white balance {}: {}", mode, e))
            .is_ok()
    }

    fn set_binning(&mut self, x: u32, y: u32) -> bool {
        self.with_acquisition_stopped(|device| set_device_binning(device, x, y))
            .map_err(|e| warn!("Cannot set binning: {}", e))
            .is_ok()
    }

    fn sensor_resolution(&self) -> Option<Resolution> {
        let device = self.device().ok()?;

        match (device.int_feature("SensorWidth"), device.int_feature("SensorHeight")) {
            (Ok(w), Ok(h)) => Some(Resolution::new(w as u32, h as u32)),
            _ => None,
        }
    }
}

impl Drop for AlliedAlvium {
    fn drop(&mut self) {
        self.release();
    }
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Write both binning factors and check the camera took them.
///
/// Alvium cameras accept a lower binning without applying it until the next `DeviceReset`.
fn set_device_binning(device: &mut dyn Device, x: u32, y: u32) -> Result<()> {
    device.set_int_feature("BinningHorizontal", x as i64)?;
    device.set_int_feature("BinningVertical", y as i64)?;

    let actual = (
        device.int_feature("BinningHorizontal")? as u32,
        device.int_feature("BinningVertical")? as u32,
    );

    if actual != (x, y) {
        return Err(Error::feature(
            "BinningHorizontal",
            format!(
                "requested {} x {}, camera reports {} x {}, binning can only be reduced after a reset",
                x, y, actual.0, actual.1
            ),
        ));
    }

    Ok(())
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
