//! # Camera Module
//!
//! This module provides the [`Camera`] trait, the capability set every camera adapter exposes
//! independent of its vendor.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::time::Duration;

use log::{info, warn};

use crate::display::Display;
use crate::frame::FrameBuffer;
use crate::types::{AutoMode, Resolution, ResolutionPreset, Switch};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Key poll interval of [`Camera::show_stream`].
const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(1);

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// A physical camera.
///
/// A camera is streaming as soon as it has been constructed. Frames are polled with
/// [`get_frame`](Camera::get_frame) and [`release`](Camera::release) is called once at the end.
/// Setters return `true` on success and log a warning otherwise; they never panic.
pub trait Camera {
    /// Stop acquisition and release the device.
    ///
    /// The camera must not be used afterwards. A new instance has to be constructed to stream
    /// again.
    fn release(&mut self);

    /// Get the most recent frame.
    ///
    /// Returns `None` if no frame is available right now or it could not be decoded. Pull based
    /// cameras wait a bounded time for the frame, this never blocks indefinitely.
    fn get_frame(&mut self) -> Option<FrameBuffer>;

    /// Manufacturer and model name.
    fn name(&self) -> String;

    /// Width and height of the grabbed frames.
    fn resolution(&self) -> Resolution;

    /// Set width and height of the grabbed frames.
    ///
    /// Returns `true` only if [`resolution`](Camera::resolution) now reports exactly the
    /// requested size.
    fn set_resolution(&mut self, width: u32, height: u32) -> bool;

    /// Acquisition frame rate in frames per second.
    fn frame_rate(&self) -> f64;

    /// Set the acquisition frame rate.
    ///
    /// Returns `true` if the achieved rate is within the camera's tolerance of the request.
    fn set_frame_rate(&mut self, fps: f64) -> bool;

    fn set_autofocus(&mut self, state: Switch) -> bool;

    /// Valid exposure time range `(min, max)` in microseconds.
    fn exposure_time_range_us(&self) -> Option<(f64, f64)>;

    /// Set a fixed exposure time in microseconds.
    ///
    /// Values outside of [`exposure_time_range_us`](Camera::exposure_time_range_us) are rejected
    /// without touching the device. Auto exposure is switched off first.
    fn set_exposure_time_us(&mut self, exposure_time: f64) -> bool;

    fn set_auto_exposure(&mut self, mode: AutoMode) -> bool;

    fn set_auto_gain(&mut self, mode: AutoMode) -> bool;

    fn set_auto_white_balance(&mut self, mode: AutoMode) -> bool;

    /// Combine `x` by `y` sensor pixels into one frame pixel.
    fn set_binning(&mut self, x: u32, y: u32) -> bool {
        let _ = (x, y);
        warn!("Binning not supported");
        false
    }

    /// Width and height of the physical sensor, if the camera reports it.
    fn sensor_resolution(&self) -> Option<Resolution> {
        None
    }

    fn set_resolution_preset(&mut self, preset: ResolutionPreset) -> bool {
        let res = preset.resolution();
        self.set_resolution(res.width, res.height)
    }

    /// Show the camera stream until any key is pressed.
    ///
    /// Only the window is closed when the stream ends, the camera keeps running.
    fn show_stream<D: Display>(&mut self, display: &mut D)
    where
        Self: Sized,
    {
        show_stream(self, display)
    }
}

// -----------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Show the stream of any camera, including trait objects, until any key is pressed.
pub fn show_stream<C: Camera + ?Sized, D: Display>(camera: &mut C, display: &mut D) {
    let title = format!("{} (Press any key to terminate)", camera.name());
    info!("Showing stream: {}", title);

    loop {
        if let Some(frame) = camera.get_frame() {
            display.show(&title, &frame);
        }

        if display.wait_key(STREAM_POLL_INTERVAL) {
            display.close(&title);
            break;
        }
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;
    use crate::display::tests::ScriptedDisplay;
    use crate::types::PixelFormat;

    /// Camera that delivers a frame on every other call.
    struct AlternatingCamera {
        calls: usize,
        resolution: Resolution,
    }

    impl Camera for AlternatingCamera {
        fn release(&mut self) {}

        fn get_frame(&mut self) -> Option<FrameBuffer> {
            self.calls += 1;
            if self.calls % 2 == 1 {
                Some(FrameBuffer::new(self.resolution.width, self.resolution.height, PixelFormat::Mono8))
            } else {
                None
            }
        }

        fn name(&self) -> String {
            "Test camera".to_string()
        }

        fn resolution(&self) -> Resolution {
            self.resolution
        }

        fn set_resolution(&mut self, width: u32, height: u32) -> bool {
            self.resolution = Resolution::new(width, height);
            true
        }

        fn frame_rate(&self) -> f64 {
            30.0
        }

        fn set_frame_rate(&mut self, _fps: f64) -> bool {
            false
        }

        fn set_autofocus(&mut self, _state: Switch) -> bool {
            false
        }

        fn exposure_time_range_us(&self) -> Option<(f64, f64)> {
            None
        }

        fn set_exposure_time_us(&mut self, _exposure_time: f64) -> bool {
            false
        }

        fn set_auto_exposure(&mut self, _mode: AutoMode) -> bool {
            false
        }

        fn set_auto_gain(&mut self, _mode: AutoMode) -> bool {
            false
        }

        fn set_auto_white_balance(&mut self, _mode: AutoMode) -> bool {
            false
        }
    }

    fn camera() -> AlternatingCamera {
        AlternatingCamera {
            calls: 0,
            resolution: Resolution::new(8, 6),
        }
    }

    /// Only the frames actually delivered are shown, and the window closes on the key press
    #[test]
    fn test_show_stream() {
        let mut cam = camera();
        let mut display = ScriptedDisplay::new(4);

        cam.show_stream(&mut display);

        assert_eq!(cam.calls, 4);
        assert_eq!(display.shown.len(), 2);
        assert_eq!(display.shown[0], ("Test camera (Press any key to terminate)".to_string(), 8, 6, 1));
        assert_eq!(display.closed, vec!["Test camera (Press any key to terminate)".to_string()]);
    }

    #[test]
    fn test_show_stream_trait_object() {
        let mut cam: Box<dyn Camera> = Box::new(camera());
        let mut display = ScriptedDisplay::new(1);

        show_stream(cam.as_mut(), &mut display);

        assert_eq!(display.shown.len(), 1);
        assert_eq!(display.closed.len(), 1);
    }

    #[test]
    fn test_provided_methods() {
        let mut cam = camera();

        assert!(!cam.set_binning(2, 2));
        assert_eq!(cam.sensor_resolution(), None);
        assert!(cam.set_resolution_preset(ResolutionPreset::Hd720));
        assert_eq!(cam.resolution(), Resolution::new(1280, 720));
    }
}
