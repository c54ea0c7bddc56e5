//! # Generic capture camera
//!
//! Camera adapter over an OS-level video capture device, such as a webcam driven through V4L2.
//!
//! The device side is the [`CaptureDevice`] trait: a numeric property protocol where every
//! property is read and written as a `f64`, the way common video capture backends expose them.
//! [`CaptureCamera`] maps the [`Camera`] capability set onto it.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use log::{info, warn};

use crate::camera::Camera;
use crate::error::{Error, Result};
use crate::frame::{FrameBuffer, RawFrame};
use crate::types::{AutoMode, PixelFormat, Resolution, Switch};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Maximum difference in fps between the requested and achieved frame rate.
const FRAME_RATE_TOLERANCE: f64 = 1.0;

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// An OS-level video capture device.
pub trait CaptureDevice: Send {
    /// Name of the capture backend.
    fn name(&self) -> String;

    fn is_opened(&self) -> bool;

    /// Grab and decode the next frame.
    ///
    /// An empty frame means the device had nothing to deliver.
    fn read(&mut self) -> Result<RawFrame>;

    /// Current value of a property, `0.0` if the device does not know it.
    fn get(&self, prop: CaptureProperty) -> f64;

    /// Request a new value for a property.
    ///
    /// Returns `false` if the device refused the request. Accepting it does not mean the value is
    /// applied exactly, devices are free to pick the closest mode they support.
    fn set(&mut self, prop: CaptureProperty, value: f64) -> bool;

    /// Request a new frame size in one step.
    ///
    /// Devices which can only change their size as a whole override this, the default writes the
    /// width then the height.
    fn set_resolution(&mut self, width: u32, height: u32) -> bool {
        let w = self.set(CaptureProperty::FrameWidth, width as f64);
        let h = self.set(CaptureProperty::FrameHeight, height as f64);
        w && h
    }

    fn release(&mut self);
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Properties understood by a [`CaptureDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureProperty {
    FrameWidth,
    FrameHeight,
    Fps,

    /// 1 on, 0 off
    Autofocus,

    /// 1 automatic, 0 manual
    AutoExposure,

    /// 1 automatic, 0 manual
    AutoWhiteBalance,
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTS
// -----------------------------------------------------------------------------------------------

/// Camera over a generic [`CaptureDevice`].
pub struct CaptureCamera<D: CaptureDevice> {
    device: D,

    pixel_format: PixelFormat,

    released: bool,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl<D: CaptureDevice> CaptureCamera<D> {
    /// Wrap an opened capture device.
    ///
    /// Fails if the device is not open. Binning is not available for capture devices, a request
    /// other than 1 x 1 only logs a warning.
    pub fn new(device: D, pixel_format: PixelFormat, binning: (u32, u32)) -> Result<Self> {
        if !device.is_opened() {
            return Err(Error::DeviceOpenError(format!("{} is not open", device.name())));
        }

        let mut cam = Self {
            device,
            pixel_format,
            released: false,
        };

        if binning != (1, 1) {
            cam.set_binning(binning.0, binning.1);
        }

        info!("Opened {}: {} @ {} fps", cam.name(), cam.resolution(), cam.frame_rate());

        Ok(cam)
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Access the underlying device.
    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    fn set_auto(&mut self, prop: CaptureProperty, mode: AutoMode) -> bool {
        let value = match mode {
            AutoMode::Off => 0.0,
            AutoMode::Continuous => 1.0,
            AutoMode::Once => {
                warn!("{:?} mode Once not supported", prop);
                return false;
            }
        };

        if !self.device.set(prop, value) {
            warn!("Cannot set {:?} to {}", prop, mode);
            return false;
        }

        true
    }
}

impl<D: CaptureDevice> Camera for CaptureCamera<D> {
    fn release(&mut self) {
        if self.released {
            return;
        }

        info!("Release camera: {}", self.name());
        self.device.release();
        self.released = true;
    }

    fn get_frame(&mut self) -> Option<FrameBuffer> {
        if self.released {
            warn!("Camera has been released");
            return None;
        }

        let raw = match self.device.read() {
            Ok(r) if !r.is_empty() => r,
            Ok(_) => {
                warn!("No frame grabbed");
                return None;
            }
            Err(e) => {
                warn!("No frame grabbed: {}", e);
                return None;
            }
        };

        // Devices deliver colour frames, converted to gray on request
        match FrameBuffer::from_raw_frame(&raw, PixelFormat::Bgr8) {
            Ok(frame) => Some(frame.into_format(self.pixel_format)),
            Err(e) => {
                warn!("Cannot decode frame: {}", e);
                None
            }
        }
    }

    fn name(&self) -> String {
        self.device.name()
    }

    fn resolution(&self) -> Resolution {
        Resolution::new(
            self.device.get(CaptureProperty::FrameWidth) as u32,
            self.device.get(CaptureProperty::FrameHeight) as u32,
        )
    }

    fn set_resolution(&mut self, width: u32, height: u32) -> bool {
        self.device.set_resolution(width, height);

        let res = self.resolution();
        if res != Resolution::new(width, height) {
            warn!("Cannot set resolution to {} x {}, camera reports {}", width, height, res);
            return false;
        }

        true
    }

    fn frame_rate(&self) -> f64 {
        self.device.get(CaptureProperty::Fps)
    }

    fn set_frame_rate(&mut self, fps: f64) -> bool {
        self.device.set(CaptureProperty::Fps, fps);

        let actual = self.frame_rate();
        if (actual - fps).abs() > FRAME_RATE_TOLERANCE {
            warn!("Cannot set frame rate to {} fps, camera reports {} fps", fps, actual);
            return false;
        }

        true
    }

    fn set_autofocus(&mut self, state: Switch) -> bool {
        let value = if state.is_on() { 1.0 } else { 0.0 };

        if !self.device.set(CaptureProperty::Autofocus, value) {
            warn!("Cannot set autofocus {}", state);
            return false;
        }

        true
    }

    fn exposure_time_range_us(&self) -> Option<(f64, f64)> {
        warn!("Exposure time range not available");
        None
    }

    fn set_exposure_time_us(&mut self, _exposure_time: f64) -> bool {
        warn!("Exposure time not supported");
        false
    }

    fn set_auto_exposure(&mut self, mode: AutoMode) -> bool {
        self.set_auto(CaptureProperty::AutoExposure, mode)
    }

    fn set_auto_gain(&mut self, _mode: AutoMode) -> bool {
        warn!("Auto gain not supported");
        false
    }

    fn set_auto_white_balance(&mut self, mode: AutoMode) -> bool {
        self.set_auto(CaptureProperty::AutoWhiteBalance, mode)
    }
}

impl<D: CaptureDevice> Drop for CaptureCamera<D> {
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
    use crate::frame::RawLayout;
    use crate::sim::SimCaptureDevice;

    fn camera(format: PixelFormat) -> CaptureCamera<SimCaptureDevice> {
        CaptureCamera::new(SimCaptureDevice::new(), format, (1, 1)).unwrap()
    }

    #[test]
    fn test_unopened_device_is_rejected() {
        match CaptureCamera::new(SimCaptureDevice::unavailable(), PixelFormat::Bgr8, (1, 1)) {
            Err(Error::DeviceOpenError(_)) => (),
            Err(e) => panic!("Unexpected error {}", e),
            Ok(_) => panic!("Camera constructed on a closed device"),
        }
    }

    #[test]
    fn test_frame_channels() {
        let mut bgr = camera(PixelFormat::Bgr8);
        let frame = bgr.get_frame().unwrap();
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.resolution(), Resolution::new(640, 480));

        let mut mono = camera(PixelFormat::Mono8);
        let frame = mono.get_frame().unwrap();
        assert_eq!(frame.channels(), 1);
        assert_eq!(frame.data().len(), 640 * 480);
    }

    /// An empty read is reported as no frame, the next one succeeds again
    #[test]
    fn test_empty_frame() {
        let mut cam = camera(PixelFormat::Bgr8);
        cam.device_mut().empty_reads = 1;

        assert!(cam.get_frame().is_none());
        assert!(cam.get_frame().is_some());
    }

    #[test]
    fn test_resolution_post_condition() {
        let mut cam = camera(PixelFormat::Bgr8);

        assert!(cam.set_resolution(1920, 1080));
        assert_eq!(cam.resolution(), Resolution::new(1920, 1080));

        // The device snaps to its closest mode, which is not what was asked for
        assert!(!cam.set_resolution(800, 600));
        assert_ne!(cam.resolution(), Resolution::new(800, 600));
    }

    /// Accepts a fixed list of frame sizes, a size can only change as a whole
    struct FixedModes {
        resolution: Resolution,
        released: bool,
    }

    const MODES: [(u32, u32); 2] = [(640, 480), (1280, 720)];

    impl FixedModes {
        fn switch_to(&mut self, width: u32, height: u32) -> bool {
            if !MODES.contains(&(width, height)) {
                return false;
            }
            self.resolution = Resolution::new(width, height);
            true
        }
    }

    impl CaptureDevice for FixedModes {
        fn name(&self) -> String {
            "Fixed modes".into()
        }

        fn is_opened(&self) -> bool {
            !self.released
        }

        fn read(&mut self) -> Result<RawFrame> {
            let Resolution { width, height } = self.resolution;
            Ok(RawFrame::new(width, height, RawLayout::Bgr8, vec![0; (width * height * 3) as usize]))
        }

        fn get(&self, prop: CaptureProperty) -> f64 {
            match prop {
                CaptureProperty::FrameWidth => self.resolution.width as f64,
                CaptureProperty::FrameHeight => self.resolution.height as f64,
                CaptureProperty::Fps => 30.0,
                _ => 0.0,
            }
        }

        fn set(&mut self, prop: CaptureProperty, value: f64) -> bool {
            let Resolution { width, height } = self.resolution;
            match prop {
                CaptureProperty::FrameWidth => self.switch_to(value as u32, height),
                CaptureProperty::FrameHeight => self.switch_to(width, value as u32),
                _ => false,
            }
        }

        fn set_resolution(&mut self, width: u32, height: u32) -> bool {
            self.switch_to(width, height)
        }

        fn release(&mut self) {
            self.released = true;
        }
    }

    /// Neither 1280 x 480 nor 640 x 720 exist, the size has to change in one step
    #[test]
    fn test_resolution_changes_as_a_whole() {
        let device = FixedModes {
            resolution: Resolution::new(640, 480),
            released: false,
        };
        let mut cam = CaptureCamera::new(device, PixelFormat::Mono8, (1, 1)).unwrap();

        assert!(cam.set_resolution(1280, 720));
        assert_eq!(cam.resolution(), Resolution::new(1280, 720));
        assert_eq!(cam.get_frame().unwrap().resolution(), Resolution::new(1280, 720));

        assert!(!cam.set_resolution(800, 600));
        assert_eq!(cam.resolution(), Resolution::new(1280, 720));
    }

    #[test]
    fn test_frame_rate_tolerance() {
        let mut cam = camera(PixelFormat::Bgr8);

        assert!(cam.set_frame_rate(15.0));
        assert!(cam.set_frame_rate(30.5));
        assert!(!cam.set_frame_rate(45.0));
    }

    #[test]
    fn test_auto_modes() {
        let mut cam = camera(PixelFormat::Bgr8);

        assert!(cam.set_auto_exposure(AutoMode::Off));
        assert_eq!(cam.device().get(CaptureProperty::AutoExposure), 0.0);
        assert!(cam.set_auto_exposure(AutoMode::Continuous));
        assert_eq!(cam.device().get(CaptureProperty::AutoExposure), 1.0);
        assert!(!cam.set_auto_exposure(AutoMode::Once));
        assert_eq!(cam.device().get(CaptureProperty::AutoExposure), 1.0);

        assert!(cam.set_auto_white_balance(AutoMode::Off));
        assert!(!cam.set_auto_gain(AutoMode::Continuous));
    }

    #[test]
    fn test_unsupported_operations() {
        let mut cam = CaptureCamera::new(SimCaptureDevice::new().without_autofocus(), PixelFormat::Bgr8, (2, 2))
            .unwrap();

        assert!(!cam.set_autofocus(Switch::On));
        assert!(cam.exposure_time_range_us().is_none());
        assert!(!cam.set_exposure_time_us(1000.0));
        assert!(!cam.set_binning(2, 2));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut cam = camera(PixelFormat::Bgr8);

        cam.release();
        assert!(!cam.device().is_opened());
        cam.release();
        assert!(cam.get_frame().is_none());
    }
}
