//! # V4L2 capture device
//!
//! [`CaptureDevice`] over Video4Linux2 using [`rscam`](https://github.com/loyd/rscam), only
//! available on Linux with the `v4l2` feature.
//!
//! V4L2 cannot change the format of a running stream, so every change of the frame size or the
//! frame interval restarts it. A new frame size is applied with a single restart.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use log::{debug, warn};
use rscam::Config;

use crate::capture::{CaptureDevice, CaptureProperty};
use crate::error::{Error, Result};
use crate::frame::{RawFrame, RawLayout};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// `V4L2_EXPOSURE_MANUAL`
const EXPOSURE_MANUAL: i32 = 1;

/// `V4L2_EXPOSURE_APERTURE_PRIORITY`, the automatic mode most webcams support
const EXPOSURE_APERTURE_PRIORITY: i32 = 3;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTS
// -----------------------------------------------------------------------------------------------

/// A V4L2 video device such as `/dev/video0`.
pub struct V4l2Device {
    path: String,

    camera: Option<rscam::Camera>,

    mode: StreamMode,

    autofocus: f64,
    auto_exposure: f64,
    auto_white_balance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct StreamMode {
    resolution: (u32, u32),
    fps: u32,
    format: &'static [u8],
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl V4l2Device {
    /// Open `/dev/video<index>`.
    pub fn open_index(index: usize) -> Result<Self> {
        Self::open(format!("/dev/video{}", index))
    }

    /// Open the device at `path` and start streaming MJPEG at 640 x 480, 30 fps.
    pub fn open<S: Into<String>>(path: S) -> Result<Self> {
        let path = path.into();
        let camera = rscam::Camera::new(&path).map_err(Error::CameraCaptureError)?;

        let mut dev = Self {
            path,
            camera: Some(camera),
            mode: StreamMode {
                resolution: (640, 480),
                fps: 30,
                format: b"MJPG",
            },
            autofocus: 0.0,
            auto_exposure: 1.0,
            auto_white_balance: 1.0,
        };

        let mode = dev.mode;
        dev.start(mode)?;

        Ok(dev)
    }

    fn start(&mut self, mode: StreamMode) -> Result<()> {
        let camera = match self.camera {
            Some(ref mut c) => c,
            None => return Err(Error::DeviceOpenError(format!("{} is not open", self.path))),
        };

        camera
            .start(&Config {
                interval: (1, mode.fps),
                resolution: mode.resolution,
                format: mode.format,
                ..Default::default()
            })
            .map_err(Error::CamStartError)?;

        self.mode = mode;
        debug!("Started {} with {:?}", self.path, mode);
        Ok(())
    }

    /// Restart the stream with a new mode, falling back to the previous one on failure.
    fn restart(&mut self, mode: StreamMode) -> bool {
        if let Some(ref mut camera) = self.camera {
            if let Err(e) = camera.stop() {
                warn!("Cannot stop {}: {}", self.path, e);
            }
        }

        match self.start(mode) {
            Ok(()) => true,
            Err(e) => {
                warn!("Cannot restart {} with {:?}: {}", self.path, mode, e);
                let previous = self.mode;
                if let Err(e) = self.start(previous) {
                    warn!("Cannot restart {}: {}", self.path, e);
                }
                false
            }
        }
    }

    fn set_control(&mut self, id: u32, value: i32) -> bool {
        match self.camera {
            Some(ref camera) => match camera.set_control(id, &value) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Cannot set control {:#x} on {}: {}", id, self.path, e);
                    false
                }
            },
            None => false,
        }
    }
}

impl CaptureDevice for V4l2Device {
    fn name(&self) -> String {
        format!("V4L2 video capture ({})", self.path)
    }

    fn is_opened(&self) -> bool {
        self.camera.is_some()
    }

    fn read(&mut self) -> Result<RawFrame> {
        let camera = match self.camera {
            Some(ref c) => c,
            None => return Err(Error::DeviceOpenError(format!("{} is not open", self.path))),
        };

        let frame = camera.capture().map_err(Error::CameraCaptureError)?;

        let layout = match &frame.format {
            b"YUYV" => RawLayout::Yuyv,
            b"GREY" => RawLayout::Mono8,
            b"RGB3" => RawLayout::Rgb8,
            b"BGR3" => RawLayout::Bgr8,
            _ => RawLayout::Mjpeg,
        };

        Ok(RawFrame::new(frame.resolution.0, frame.resolution.1, layout, frame.to_vec()))
    }

    fn get(&self, prop: CaptureProperty) -> f64 {
        match prop {
            CaptureProperty::FrameWidth => self.mode.resolution.0 as f64,
            CaptureProperty::FrameHeight => self.mode.resolution.1 as f64,
            CaptureProperty::Fps => self.mode.fps as f64,
            CaptureProperty::Autofocus => self.autofocus,
            CaptureProperty::AutoExposure => self.auto_exposure,
            CaptureProperty::AutoWhiteBalance => self.auto_white_balance,
        }
    }

    fn set(&mut self, prop: CaptureProperty, value: f64) -> bool {
        let mut mode = self.mode;
        let on = value != 0.0;

        match prop {
            CaptureProperty::FrameWidth => {
                mode.resolution.0 = value as u32;
                self.restart(mode)
            }
            CaptureProperty::FrameHeight => {
                mode.resolution.1 = value as u32;
                self.restart(mode)
            }
            CaptureProperty::Fps => {
                mode.fps = value.round().max(1.0) as u32;
                self.restart(mode)
            }
            CaptureProperty::Autofocus => {
                let ok = self.set_control(rscam::CID_FOCUS_AUTO, on as i32);
                if ok {
                    self.autofocus = value;
                }
                ok
            }
            CaptureProperty::AutoExposure => {
                let mode = if on { EXPOSURE_APERTURE_PRIORITY } else { EXPOSURE_MANUAL };
                let ok = self.set_control(rscam::CID_EXPOSURE_AUTO, mode);
                if ok {
                    self.auto_exposure = value;
                }
                ok
            }
            CaptureProperty::AutoWhiteBalance => {
                let ok = self.set_control(rscam::CID_AUTO_WHITE_BALANCE, on as i32);
                if ok {
                    self.auto_white_balance = value;
                }
                ok
            }
        }
    }

    /// Restart once with both dimensions, the intermediate sizes of two separate writes are
    /// usually not supported by the driver.
    fn set_resolution(&mut self, width: u32, height: u32) -> bool {
        let mut mode = self.mode;
        mode.resolution = (width, height);
        self.restart(mode)
    }

    fn release(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            if let Err(e) = camera.stop() {
                debug!("Cannot stop {}: {}", self.path, e);
            }
        }
    }
}
