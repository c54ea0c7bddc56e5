//! # `CameraBuilder` implementation
//!
//! This module implements the builder for camera objects.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::allied::AlliedAlvium;
use crate::basler::BaslerAce;
use crate::camera::Camera;
use crate::capture::{CaptureCamera, CaptureDevice};
use crate::config::CameraConfig;
use crate::daheng::DahengVision;
use crate::error::{Error, Result};
use crate::sdk::Runtime;
use crate::types::{AutoMode, PixelFormat, Resolution, ResolutionPreset};

#[cfg(feature = "v4l2")]
use crate::v4l2::V4l2Device;

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// Provides common methods for loading the settings of a builder from a file.
pub trait Configurable: Sized {
    /// The settings, must be deserialisable.
    type Config: DeserializeOwned;

    fn config(self, config: Self::Config) -> Self;

    /// Load the settings from a file.
    ///
    /// The file type will be guessed at runtime, any file type supported by
    /// [`serde_any`](https://docs.rs/serde_any/0.5.0/serde_any/) is supported, but it must be
    /// deserialisable into `Self::Config`.
    fn config_from_file<P: AsRef<Path>>(self, path: P) -> Result<Self> {
        if !path.as_ref().exists() {
            return Err(Error::FileNotFound(path.as_ref().to_path_buf()));
        }

        let c = serde_any::from_file(path).map_err(Error::DeserialisationError)?;

        Ok(self.config(c))
    }
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Builds cameras of any backend from a [`CameraConfig`].
///
/// ```no_run
/// use std::sync::Arc;
/// use cv_cameras::prelude::*;
/// use cv_cameras::sim::SimRuntime;
///
/// let mut camera = CameraBuilder::new()
///     .pixel_format(PixelFormat::Mono8)
///     .binning(2, 2)
///     .frame_rate(30.0)
///     .allied(Arc::new(SimRuntime::vimba()))
///     .expect("Failed to open camera");
///
/// let frame = camera.get_frame();
/// ```
#[derive(Debug, Clone, Default)]
pub struct CameraBuilder {
    config: CameraConfig,
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Vendor runtimes a camera can be built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Vendor {
    AlliedVision,
    Basler,
    DahengImaging,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl CameraBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the camera among the devices detected by its backend, default is 0.
    pub fn camera_id(mut self, camera_id: usize) -> Self {
        self.config.camera_id = camera_id;

        self
    }

    /// Pixel format of the frames, default is `Bgr8`. Fixed for the lifetime of the camera.
    pub fn pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.config.pixel_format = pixel_format;

        self
    }

    /// Binning applied before acquisition starts, default is `(1, 1)`.
    pub fn binning(mut self, x: u32, y: u32) -> Self {
        self.config.binning = (x, y);

        self
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.config.resolution = Some(Resolution::new(width, height));

        self
    }

    pub fn preset(mut self, preset: ResolutionPreset) -> Self {
        self.config.preset = Some(preset);

        self
    }

    pub fn frame_rate(mut self, fps: f64) -> Self {
        self.config.frame_rate = Some(fps);

        self
    }

    /// Fixed exposure time in microseconds, turns auto exposure off.
    pub fn exposure_time_us(mut self, exposure_time: f64) -> Self {
        self.config.exposure_time_us = Some(exposure_time);

        self
    }

    pub fn auto_exposure(mut self, mode: AutoMode) -> Self {
        self.config.auto_exposure = Some(mode);

        self
    }

    pub fn auto_gain(mut self, mode: AutoMode) -> Self {
        self.config.auto_gain = Some(mode);

        self
    }

    pub fn auto_white_balance(mut self, mode: AutoMode) -> Self {
        self.config.auto_white_balance = Some(mode);

        self
    }

    pub fn get_config(&self) -> &CameraConfig {
        &self.config
    }

    /// Build a camera over an opened capture device.
    pub fn capture<D: CaptureDevice>(self, device: D) -> Result<CaptureCamera<D>> {
        let c = &self.config;
        let mut cam = CaptureCamera::new(device, c.pixel_format, c.binning)?;
        c.apply(&mut cam);

        Ok(cam)
    }

    /// Build a camera over the V4L2 device `/dev/video<camera_id>`.
    #[cfg(feature = "v4l2")]
    pub fn v4l2(self) -> Result<CaptureCamera<V4l2Device>> {
        let device = V4l2Device::open_index(self.config.camera_id)?;
        self.capture(device)
    }

    pub fn allied(self, runtime: Arc<dyn Runtime>) -> Result<AlliedAlvium> {
        let c = &self.config;
        let mut cam = AlliedAlvium::new(runtime, c.camera_id, c.pixel_format, c.binning)?;
        c.apply(&mut cam);

        Ok(cam)
    }

    pub fn basler(self, runtime: Arc<dyn Runtime>) -> Result<BaslerAce> {
        let c = &self.config;
        let mut cam = BaslerAce::new(runtime, c.camera_id, c.pixel_format, c.binning)?;
        c.apply(&mut cam);

        Ok(cam)
    }

    pub fn daheng(self, runtime: Arc<dyn Runtime>) -> Result<DahengVision> {
        let c = &self.config;
        let mut cam = DahengVision::new(runtime, c.camera_id, c.pixel_format, c.binning)?;
        c.apply(&mut cam);

        Ok(cam)
    }

    /// Build a camera of the given vendor behind a trait object.
    pub fn build(self, vendor: Vendor, runtime: Arc<dyn Runtime>) -> Result<Box<dyn Camera>> {
        let cam: Box<dyn Camera> = match vendor {
            Vendor::AlliedVision => Box::new(self.allied(runtime)?),
            Vendor::Basler => Box::new(self.basler(runtime)?),
            Vendor::DahengImaging => Box::new(self.daheng(runtime)?),
        };

        Ok(cam)
    }
}

impl Configurable for CameraBuilder {
    type Config = CameraConfig;

    fn config(mut self, config: Self::Config) -> Self {
        self.config = config;

        self
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(all(test, feature = "sim"))]
mod tests {

    use std::io::Write;

    use super::*;
    use crate::sim::{SimCaptureDevice, SimRuntime};

    #[test]
    fn test_missing_config_file() {
        match CameraBuilder::new().config_from_file("does/not/exist.toml") {
            Err(Error::FileNotFound(p)) => assert_eq!(p, Path::new("does/not/exist.toml")),
            _ => panic!("Expected FileNotFound"),
        }
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "pixel_format = \"Mono8\"\npreset = \"720p\"").unwrap();

        let builder = CameraBuilder::new().config_from_file(file.path()).unwrap();
        assert_eq!(builder.get_config().pixel_format, PixelFormat::Mono8);

        let mut cam = builder.capture(SimCaptureDevice::new()).unwrap();
        assert_eq!(cam.resolution(), Resolution::new(1280, 720));
        assert_eq!(cam.get_frame().unwrap().channels(), 1);
    }

    #[test]
    fn test_build_trait_object() {
        let runtime = SimRuntime::galaxy();

        let mut cam = CameraBuilder::new()
            .resolution(800, 600)
            .frame_rate(10.0)
            .build(Vendor::DahengImaging, Arc::new(runtime.clone()))
            .unwrap();

        assert_eq!(cam.name(), "Daheng Imaging MER2-160-227U3C");
        assert_eq!(cam.resolution(), Resolution::new(800, 600));
        assert!((cam.frame_rate() - 10.0).abs() < 1e-9);
        assert!(cam.get_frame().is_some());

        cam.release();
        assert!(!runtime.is_open("DH-0001"));
    }

    #[test]
    fn test_exposure_from_builder() {
        let runtime = SimRuntime::pylon();

        let _cam = CameraBuilder::new()
            .exposure_time_us(2000.0)
            .basler(Arc::new(runtime.clone()))
            .unwrap();

        let state = runtime.device_state("BA-0001").unwrap();
        assert_eq!(state.exposure_auto, "Off");
        assert_eq!(state.exposure_time, 2000.0);
    }
}
