//! # Vendor SDK seams
//!
//! The machine vision cameras are driven through vendor runtimes (Vimba X, pylon, Galaxy). All of
//! them follow the GenICam model: devices are enumerated and opened through a runtime, configured
//! through named features, and deliver frames either by pushing them to a callback or by being
//! polled with a timeout. The traits in this module capture exactly that surface, so the camera
//! adapters can be written once against it and bound to a real SDK or to the simulator in
//! [`crate::sim`].

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::error::{Error, Result};
use crate::frame::RawFrame;
use crate::types::{AutoMode, Resolution};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

pub(crate) const EXPOSURE_TIME: &str = "ExposureTime";
pub(crate) const ACQUISITION_FRAME_RATE: &str = "AcquisitionFrameRate";

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// A vendor runtime, the entry point of an SDK.
pub trait Runtime: Send + Sync {
    /// Human readable name of the runtime, e.g. `"Vimba X"`.
    fn name(&self) -> &'static str;

    /// Start the runtime. Must be called before any other method.
    fn startup(&self) -> Result<()>;

    /// Shut the runtime down. Affects the whole process.
    fn shutdown(&self) -> Result<()>;

    /// Enumerate the connected devices.
    fn devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Open a device for exclusive access.
    fn open(&self, info: &DeviceInfo) -> Result<Box<dyn Device>>;
}

/// Access to the named GenICam features of a device.
pub trait FeatureControl {
    fn int_feature(&self, name: &str) -> Result<i64>;

    fn set_int_feature(&mut self, name: &str, value: i64) -> Result<()>;

    fn float_feature(&self, name: &str) -> Result<f64>;

    fn set_float_feature(&mut self, name: &str, value: f64) -> Result<()>;

    /// Valid `(min, max)` range of a float feature.
    fn float_range(&self, name: &str) -> Result<(f64, f64)>;

    /// Current entry of an enumeration feature.
    fn enum_feature(&self, name: &str) -> Result<String>;

    fn set_enum_feature(&mut self, name: &str, entry: &str) -> Result<()>;

    fn set_bool_feature(&mut self, name: &str, value: bool) -> Result<()>;

    /// Run a command feature such as `DeviceReset`.
    fn execute_command(&mut self, name: &str) -> Result<()>;
}

/// An opened device.
pub trait Device: FeatureControl + Send {
    fn info(&self) -> &DeviceInfo;

    /// Start asynchronous acquisition.
    ///
    /// The runtime's acquisition thread calls `sink` for every frame. The raw frame is only
    /// borrowed for the duration of the call and goes back into the pool of `buffer_count`
    /// buffers afterwards.
    fn start_async(&mut self, buffer_count: usize, sink: Arc<dyn FrameSink>) -> Result<()>;

    /// Stop asynchronous acquisition. Once this returns the sink is no longer called.
    fn stop_async(&mut self) -> Result<()>;

    /// Start synchronous acquisition, frames are fetched with [`Device::retrieve`].
    fn start_grabbing(&mut self, strategy: GrabStrategy) -> Result<()>;

    fn stop_grabbing(&mut self) -> Result<()>;

    fn is_grabbing(&self) -> bool;

    /// Wait up to `timeout` for the next frame of a synchronous acquisition.
    fn retrieve(&mut self, timeout: Duration) -> Result<RawFrame>;

    /// Close the device, making it available to be opened again.
    fn close(&mut self) -> Result<()>;
}

/// Receiver of frames pushed by a runtime's acquisition thread.
pub trait FrameSink: Send + Sync {
    /// Called on the runtime's thread for each frame. Must return quickly, the hardware may drop
    /// frames while the callback runs.
    fn on_frame_received(&self, frame: &RawFrame);
}

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Identification of a device found by a runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Serial number, unique per runtime
    pub serial: String,

    pub vendor: String,

    pub model: String,
}

/// Process-wide claim on a vendor runtime.
///
/// Some runtimes can only be started once per process, and shutting them down affects every user.
/// A camera holding such a runtime takes a claim when it is constructed and drops it when it is
/// released; a second claim while the first one is alive fails with [`Error::RuntimeInUse`].
#[derive(Debug)]
pub struct RuntimeClaim {
    flag: &'static AtomicBool,
    name: &'static str,
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Buffer handling of a synchronous acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabStrategy {
    /// Always serve the newest frame, discarding older ones
    LatestImageOnly,

    /// Serve frames in the order they arrived
    OneByOne,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl DeviceInfo {
    pub fn new<S: Into<String>, V: Into<String>, M: Into<String>>(serial: S, vendor: V, model: M) -> Self {
        Self {
            serial: serial.into(),
            vendor: vendor.into(),
            model: model.into(),
        }
    }
}

impl RuntimeClaim {
    /// Claim the runtime guarded by `flag`.
    pub fn acquire(flag: &'static AtomicBool, name: &'static str) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::RuntimeInUse(name))?;

        debug!("Claimed {} runtime", name);
        Ok(Self { flag, name })
    }
}

impl Drop for RuntimeClaim {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        debug!("Released {} runtime", self.name);
    }
}

// -----------------------------------------------------------------------------------------------
// CRATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Start `runtime` and open the device at index `camera_id` of its device list.
///
/// The runtime is shut down again if no device could be opened.
pub(crate) fn open_device(runtime: &dyn Runtime, camera_id: usize) -> Result<Box<dyn Device>> {
    runtime
        .startup()
        .map_err(|e| Error::RuntimeStartupError(e.to_string()))?;

    let opened = runtime.devices().and_then(|devices| {
        debug!("{} runtime detected {} camera(s)", runtime.name(), devices.len());
        let info = devices.get(camera_id).ok_or(Error::DeviceNotFound {
            id: camera_id,
            available: devices.len(),
        })?;
        runtime.open(info)
    });

    if opened.is_err() {
        if let Err(e) = runtime.shutdown() {
            debug!("Cannot shut down {} runtime: {}", runtime.name(), e);
        }
    }

    opened
}

/// Set an enumeration feature to the entry of an automatic mode.
pub(crate) fn set_auto_feature(device: &mut dyn Device, name: &str, mode: AutoMode) -> Result<()> {
    device.set_enum_feature(name, &mode.to_string())
}

/// Set a fixed exposure time after checking it against the device's range.
///
/// Auto exposure is switched off first. Succeeds if the exposure time read back is within
/// `tolerance` (relative) of the request.
pub(crate) fn set_exposure_time(device: &mut dyn Device, exposure_time: f64, tolerance: f64) -> Result<()> {
    let (min, max) = device.float_range(EXPOSURE_TIME)?;
    if !(exposure_time >= min && exposure_time <= max) {
        return Err(Error::feature(
            EXPOSURE_TIME,
            format!("{} us outside of [{}, {}] us", exposure_time, min, max),
        ));
    }

    set_auto_feature(device, "ExposureAuto", AutoMode::Off)?;
    device.set_float_feature(EXPOSURE_TIME, exposure_time)?;

    let actual = device.float_feature(EXPOSURE_TIME)?;
    if (actual - exposure_time).abs() > exposure_time * tolerance {
        return Err(Error::feature(
            EXPOSURE_TIME,
            format!("requested {} us, camera reports {} us", exposure_time, actual),
        ));
    }

    Ok(())
}

/// Width and height as reported by the device.
pub(crate) fn device_resolution(device: &dyn Device) -> Result<Resolution> {
    Ok(Resolution::new(
        device.int_feature("Width")? as u32,
        device.int_feature("Height")? as u32,
    ))
}

/// Write width and height and check the device reports exactly that size.
pub(crate) fn set_device_resolution(device: &mut dyn Device, width: u32, height: u32) -> Result<()> {
    device.set_int_feature("Width", width as i64)?;
    device.set_int_feature("Height", height as i64)?;

    let res = device_resolution(device)?;
    if res != Resolution::new(width, height) {
        return Err(Error::feature(
            "Width",
            format!("requested {} x {}, camera reports {}", width, height, res),
        ));
    }

    Ok(())
}

/// Check an achieved frame rate against the requested one.
pub(crate) fn check_frame_rate(device: &dyn Device, fps: f64, tolerance: f64) -> Result<()> {
    let actual = device.float_feature(ACQUISITION_FRAME_RATE)?;
    if (actual - fps).abs() > tolerance {
        return Err(Error::feature(
            ACQUISITION_FRAME_RATE,
            format!("requested {} fps, camera reports {} fps", fps, actual),
        ));
    }

    Ok(())
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(all(test, feature = "sim"))]
mod tests {

    use super::*;
    use crate::sim::SimRuntime;

    static TEST_RUNTIME: AtomicBool = AtomicBool::new(false);

    #[test]
    fn test_runtime_claim() {
        let claim = RuntimeClaim::acquire(&TEST_RUNTIME, "Test").unwrap();

        match RuntimeClaim::acquire(&TEST_RUNTIME, "Test") {
            Err(Error::RuntimeInUse("Test")) => (),
            other => panic!("Expected RuntimeInUse, got {:?}", other),
        }

        drop(claim);
        assert!(RuntimeClaim::acquire(&TEST_RUNTIME, "Test").is_ok());
    }

    /// A missing device leaves the runtime shut down again
    #[test]
    fn test_open_missing_device() {
        let runtime = SimRuntime::vimba();

        match open_device(&runtime, 3) {
            Err(Error::DeviceNotFound { id: 3, available: 1 }) => (),
            Err(e) => panic!("Unexpected error {}", e),
            Ok(_) => panic!("Opened a device that does not exist"),
        }
        assert!(!runtime.is_started());
        assert_eq!(runtime.lifecycle_counts(), (1, 1));
    }

    #[test]
    fn test_set_exposure_time() {
        let runtime = SimRuntime::galaxy();
        let mut device = open_device(&runtime, 0).unwrap();
        device.set_enum_feature("ExposureAuto", "Continuous").unwrap();

        // Out of range values leave the device untouched
        assert!(set_exposure_time(device.as_mut(), 1.0, 0.05).is_err());
        assert_eq!(device.enum_feature("ExposureAuto").unwrap(), "Continuous");

        // Rounded to the 20 us step, within 5 %
        set_exposure_time(device.as_mut(), 1005.0, 0.05).unwrap();
        assert_eq!(device.enum_feature("ExposureAuto").unwrap(), "Off");
        assert_eq!(device.float_feature(EXPOSURE_TIME).unwrap(), 1000.0);

        // But not within 0.1 %
        assert!(set_exposure_time(device.as_mut(), 1005.0, 0.001).is_err());
    }
}
