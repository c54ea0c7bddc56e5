//! # Simulated cameras
//!
//! A software stand-in for the vendor runtimes and for a generic capture device, used by the
//! tests and by the `camera_probe` binary when no hardware is connected.
//!
//! [`SimRuntime`] implements [`Runtime`] with GenICam-like devices described by a [`SimProfile`].
//! The simulated devices keep their settings between sessions like real hardware does, lock the
//! image format features while acquiring, and reproduce the binning quirk of the Alvium cameras:
//! binning can be increased at any time but decreasing it has no effect until `DeviceReset`.
//! Frames are a test pattern generated at the configured frame rate.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::capture::{CaptureDevice, CaptureProperty};
use crate::error::{Error, Result};
use crate::frame::{RawFrame, RawLayout};
use crate::sdk::{Device, DeviceInfo, FeatureControl, FrameSink, GrabStrategy, Runtime};
use crate::types::{AutoMode, Resolution};

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Description of a simulated camera model.
#[derive(Debug, Clone)]
pub struct SimProfile {
    pub vendor: String,
    pub model: String,
    pub serial: String,

    /// Physical sensor size
    pub sensor: Resolution,

    /// Width and height are rounded down to multiples of this
    pub size_increment: u32,

    pub frame_rate_range: (f64, f64),

    /// Frame rates are rounded to multiples of this above the minimum, 0 for any value
    pub frame_rate_step: f64,

    pub exposure_range: (f64, f64),

    /// Exposure times are rounded to multiples of this above the minimum
    pub exposure_step: f64,

    /// `PixelFormat` entries the device accepts, the first one is the default
    pub pixel_formats: Vec<String>,

    /// Largest supported binning factor, 1 if binning is not available
    pub max_binning: u32,

    pub has_focus_auto: bool,

    pub has_device_reset: bool,

    pub has_user_sets: bool,

    /// `AcquisitionFrameRate` is only writable with `AcquisitionFrameRateEnable` set
    pub frame_rate_needs_enable: bool,
}

/// Current settings and counters of a simulated device.
#[derive(Debug, Clone)]
pub struct DeviceState {
    pub width: u32,
    pub height: u32,
    pub binning: (u32, u32),
    pub pixel_format: String,
    pub frame_rate: f64,
    pub frame_rate_enabled: bool,
    pub exposure_time: f64,
    pub exposure_auto: String,
    pub gain_auto: String,
    pub balance_white_auto: String,
    pub focus_auto: String,
    pub user_set_selector: String,

    /// Acquisition running, image format features are locked
    pub acquiring: bool,

    pub frames_generated: u64,
    pub resets: usize,

    /// Make `DeviceReset` and `UserSetLoad` fail
    pub fail_reset: bool,

    /// Make starting asynchronous acquisition fail
    pub fail_start: bool,

    /// Stop delivering frames, synchronous grabs time out
    pub stalled: bool,
}

/// Simulated vendor runtime.
#[derive(Clone)]
pub struct SimRuntime {
    name: &'static str,
    inner: Arc<Mutex<RuntimeState>>,
}

/// An opened simulated device.
pub struct SimDevice {
    info: DeviceInfo,
    profile: SimProfile,
    state: Arc<Mutex<DeviceState>>,
    open: Arc<AtomicBool>,
    grabbing: bool,
    last_grab: Option<Instant>,
    acquisition: Option<AsyncAcquisition>,
}

/// Simulated OS-level capture device, answering the numeric property protocol.
pub struct SimCaptureDevice {
    opened: bool,
    resolutions: Vec<Resolution>,
    resolution: Resolution,
    fps: f64,
    autofocus: Option<f64>,
    auto_exposure: f64,
    auto_white_balance: f64,
    counter: u8,

    /// Number of upcoming reads returning an empty frame
    pub empty_reads: usize,
}

struct RuntimeState {
    started: bool,
    startups: usize,
    shutdowns: usize,
    cameras: Vec<SimCamera>,
}

struct SimCamera {
    profile: SimProfile,
    state: Arc<Mutex<DeviceState>>,
    open: Arc<AtomicBool>,
}

struct AsyncAcquisition {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

// -----------------------------------------------------------------------------------------------
// PROFILES
// -----------------------------------------------------------------------------------------------

impl SimProfile {
    /// Allied Vision Alvium 1800 U-158c.
    pub fn alvium() -> Self {
        Self {
            vendor: "Allied Vision".into(),
            model: "1800 U-158c".into(),
            serial: "AV-0001".into(),
            sensor: Resolution::new(1456, 1088),
            size_increment: 8,
            frame_rate_range: (1.0, 60.0),
            frame_rate_step: 0.0,
            exposure_range: (32.0, 10_000_000.0),
            exposure_step: 1.0,
            pixel_formats: vec!["BGR8".into(), "Mono8".into(), "RGB8".into()],
            max_binning: 4,
            has_focus_auto: false,
            has_device_reset: true,
            has_user_sets: false,
            frame_rate_needs_enable: true,
        }
    }

    /// Basler ace acA1920-40uc.
    pub fn ace() -> Self {
        Self {
            vendor: "Basler".into(),
            model: "acA1920-40uc".into(),
            serial: "BA-0001".into(),
            sensor: Resolution::new(1920, 1200),
            size_increment: 4,
            frame_rate_range: (1.0, 41.0),
            frame_rate_step: 0.0,
            exposure_range: (34.0, 1_000_000.0),
            exposure_step: 1.0,
            pixel_formats: vec!["BGR8".into(), "Mono8".into(), "BayerRG8".into()],
            max_binning: 1,
            has_focus_auto: false,
            has_device_reset: false,
            has_user_sets: true,
            frame_rate_needs_enable: false,
        }
    }

    /// Daheng Imaging Mercury2 MER2-160-227U3C.
    pub fn mercury() -> Self {
        Self {
            vendor: "Daheng Imaging".into(),
            model: "MER2-160-227U3C".into(),
            serial: "DH-0001".into(),
            sensor: Resolution::new(1440, 1080),
            size_increment: 8,
            frame_rate_range: (1.0, 227.0),
            frame_rate_step: 0.0,
            exposure_range: (20.0, 1_000_000.0),
            exposure_step: 20.0,
            pixel_formats: vec!["BayerRG8".into()],
            max_binning: 1,
            has_focus_auto: false,
            has_device_reset: true,
            has_user_sets: false,
            frame_rate_needs_enable: false,
        }
    }

    pub fn with_serial<S: Into<String>>(mut self, serial: S) -> Self {
        self.serial = serial.into();
        self
    }

    pub fn with_sensor(mut self, width: u32, height: u32) -> Self {
        self.sensor = Resolution::new(width, height);
        self
    }

    pub fn with_frame_rate_step(mut self, step: f64) -> Self {
        self.frame_rate_step = step;
        self
    }

    pub fn with_focus_auto(mut self) -> Self {
        self.has_focus_auto = true;
        self
    }

    fn default_state(&self) -> DeviceState {
        DeviceState {
            width: self.sensor.width,
            height: self.sensor.height,
            binning: (1, 1),
            pixel_format: self.pixel_formats.first().cloned().unwrap_or_else(|| "Mono8".into()),
            frame_rate: self.frame_rate_range.1.min(30.0),
            frame_rate_enabled: false,
            exposure_time: 10_000.0_f64.max(self.exposure_range.0).min(self.exposure_range.1),
            exposure_auto: AutoMode::Off.to_string(),
            gain_auto: AutoMode::Off.to_string(),
            balance_white_auto: AutoMode::Off.to_string(),
            focus_auto: AutoMode::Off.to_string(),
            user_set_selector: "Default".into(),
            acquiring: false,
            frames_generated: 0,
            resets: 0,
            fail_reset: false,
            fail_start: false,
            stalled: false,
        }
    }
}

// -----------------------------------------------------------------------------------------------
// RUNTIME
// -----------------------------------------------------------------------------------------------

impl SimRuntime {
    /// Create a runtime with the given name and connected cameras.
    pub fn new(name: &'static str, profiles: Vec<SimProfile>) -> Self {
        let cameras = profiles
            .into_iter()
            .map(|profile| SimCamera {
                state: Arc::new(Mutex::new(profile.default_state())),
                open: Arc::new(AtomicBool::new(false)),
                profile,
            })
            .collect();

        Self {
            name,
            inner: Arc::new(Mutex::new(RuntimeState {
                started: false,
                startups: 0,
                shutdowns: 0,
                cameras,
            })),
        }
    }

    pub fn vimba() -> Self {
        Self::new("Vimba X", vec![SimProfile::alvium()])
    }

    pub fn pylon() -> Self {
        Self::new("pylon", vec![SimProfile::ace()])
    }

    pub fn galaxy() -> Self {
        Self::new("Galaxy", vec![SimProfile::mercury()])
    }

    /// Snapshot of the settings of the device with the given serial number.
    pub fn device_state(&self, serial: &str) -> Option<DeviceState> {
        let inner = self.lock();
        inner
            .cameras
            .iter()
            .find(|c| c.profile.serial == serial)
            .map(|c| lock(&c.state).clone())
    }

    /// Modify the settings of a device, e.g. to inject faults.
    pub fn configure<F: FnOnce(&mut DeviceState)>(&self, serial: &str, f: F) {
        let inner = self.lock();
        if let Some(camera) = inner.cameras.iter().find(|c| c.profile.serial == serial) {
            f(&mut lock(&camera.state));
        }
    }

    pub fn is_open(&self, serial: &str) -> bool {
        self.lock()
            .cameras
            .iter()
            .any(|c| c.profile.serial == serial && c.open.load(Ordering::Acquire))
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    /// Number of `(startup, shutdown)` calls so far.
    pub fn lifecycle_counts(&self) -> (usize, usize) {
        let inner = self.lock();
        (inner.startups, inner.shutdowns)
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        lock(&self.inner)
    }
}

impl Runtime for SimRuntime {
    fn name(&self) -> &'static str {
        self.name
    }

    fn startup(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.started = true;
        inner.startups += 1;
        debug!("{} runtime started", self.name);
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        let mut inner = self.lock();
        if !inner.started {
            return Err(Error::RuntimeStartupError(format!("{} runtime not started", self.name)));
        }
        inner.started = false;
        inner.shutdowns += 1;
        debug!("{} runtime shut down", self.name);
        Ok(())
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let inner = self.lock();
        if !inner.started {
            return Err(Error::RuntimeStartupError(format!("{} runtime not started", self.name)));
        }

        Ok(inner
            .cameras
            .iter()
            .map(|c| DeviceInfo::new(c.profile.serial.clone(), c.profile.vendor.clone(), c.profile.model.clone()))
            .collect())
    }

    fn open(&self, info: &DeviceInfo) -> Result<Box<dyn Device>> {
        let inner = self.lock();
        if !inner.started {
            return Err(Error::RuntimeStartupError(format!("{} runtime not started", self.name)));
        }

        let camera = inner
            .cameras
            .iter()
            .find(|c| c.profile.serial == info.serial)
            .ok_or_else(|| Error::DeviceOpenError(format!("no device with serial {}", info.serial)))?;

        camera
            .open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::DeviceOpenError(format!("{} is already open", info.serial)))?;

        info!("Opened simulated device {} {} ({})", info.vendor, info.model, info.serial);

        Ok(Box::new(SimDevice {
            info: info.clone(),
            profile: camera.profile.clone(),
            state: camera.state.clone(),
            open: camera.open.clone(),
            grabbing: false,
            last_grab: None,
            acquisition: None,
        }))
    }
}

// -----------------------------------------------------------------------------------------------
// DEVICE
// -----------------------------------------------------------------------------------------------

impl SimDevice {
    fn state(&self) -> MutexGuard<'_, DeviceState> {
        lock(&self.state)
    }

    fn unknown(name: &str) -> Error {
        Error::feature(name, "feature not available")
    }

    /// Image format features can only be written while not acquiring.
    fn check_unlocked(state: &DeviceState, name: &str) -> Result<()> {
        if state.acquiring {
            Err(Error::feature(name, "not writable while acquiring"))
        } else {
            Ok(())
        }
    }

    fn max_size(&self, state: &DeviceState) -> Resolution {
        Resolution::new(self.profile.sensor.width / state.binning.0, self.profile.sensor.height / state.binning.1)
    }

    fn round_size(&self, v: u32) -> u32 {
        let inc = self.profile.size_increment.max(1);
        (v / inc * inc).max(inc)
    }

    fn set_binning(&self, state: &mut DeviceState, horizontal: bool, value: i64) -> Result<()> {
        let name = if horizontal { "BinningHorizontal" } else { "BinningVertical" };
        if self.profile.max_binning <= 1 {
            return Err(Self::unknown(name));
        }
        Self::check_unlocked(state, name)?;
        if value < 1 || value > self.profile.max_binning as i64 {
            return Err(Error::feature(name, format!("{} out of range [1, {}]", value, self.profile.max_binning)));
        }

        let current = if horizontal { state.binning.0 } else { state.binning.1 };
        let value = value as u32;

        // Reducing the binning is accepted but has no effect until the device is reset
        if value < current {
            debug!("{} reduced to {} without effect", name, value);
            return Ok(());
        }

        if horizontal {
            state.binning.0 = value;
            state.width = self.round_size(self.profile.sensor.width / value);
        } else {
            state.binning.1 = value;
            state.height = self.round_size(self.profile.sensor.height / value);
        }

        Ok(())
    }

    fn reset(&self) -> Result<()> {
        let mut state = self.state();
        if state.fail_reset {
            return Err(Error::feature("DeviceReset", "device did not respond"));
        }

        let resets = state.resets + 1;
        let fail_reset = state.fail_reset;
        *state = self.profile.default_state();
        state.resets = resets;
        state.fail_reset = fail_reset;
        Ok(())
    }

    fn stop_acquisition_thread(&mut self) {
        if let Some(acq) = self.acquisition.take() {
            acq.stop.store(true, Ordering::Release);
            if acq.handle.join().is_err() {
                debug!("Simulated acquisition thread panicked");
            }
        }
    }
}

impl FeatureControl for SimDevice {
    fn int_feature(&self, name: &str) -> Result<i64> {
        let state = self.state();
        match name {
            "Width" => Ok(state.width as i64),
            "Height" => Ok(state.height as i64),
            "SensorWidth" => Ok(self.profile.sensor.width as i64),
            "SensorHeight" => Ok(self.profile.sensor.height as i64),
            "BinningHorizontal" if self.profile.max_binning > 1 => Ok(state.binning.0 as i64),
            "BinningVertical" if self.profile.max_binning > 1 => Ok(state.binning.1 as i64),
            _ => Err(Self::unknown(name)),
        }
    }

    fn set_int_feature(&mut self, name: &str, value: i64) -> Result<()> {
        let mut state = self.state();
        match name {
            "Width" | "Height" => {
                Self::check_unlocked(&state, name)?;
                let max = self.max_size(&state);
                let max = if name == "Width" { max.width } else { max.height };
                if value < 1 || value > max as i64 {
                    return Err(Error::feature(name, format!("{} out of range [1, {}]", value, max)));
                }
                let rounded = self.round_size(value as u32);
                if name == "Width" {
                    state.width = rounded;
                } else {
                    state.height = rounded;
                }
                Ok(())
            }
            "BinningHorizontal" => self.set_binning(&mut state, true, value),
            "BinningVertical" => self.set_binning(&mut state, false, value),
            "SensorWidth" | "SensorHeight" => Err(Error::feature(name, "read only")),
            _ => Err(Self::unknown(name)),
        }
    }

    fn float_feature(&self, name: &str) -> Result<f64> {
        let state = self.state();
        match name {
            "AcquisitionFrameRate" => Ok(state.frame_rate),
            "ExposureTime" => Ok(state.exposure_time),
            _ => Err(Self::unknown(name)),
        }
    }

    fn set_float_feature(&mut self, name: &str, value: f64) -> Result<()> {
        let mut state = self.state();
        let (min, max) = self.float_range(name)?;
        if !(value >= min && value <= max) {
            return Err(Error::feature(name, format!("{} out of range [{}, {}]", value, min, max)));
        }

        match name {
            "AcquisitionFrameRate" => {
                if self.profile.frame_rate_needs_enable && !state.frame_rate_enabled {
                    return Err(Error::feature(name, "not writable, AcquisitionFrameRateEnable is off"));
                }
                let step = self.profile.frame_rate_step;
                state.frame_rate = if step > 0.0 {
                    (min + ((value - min) / step).round() * step).min(max)
                } else {
                    value
                };
                Ok(())
            }
            "ExposureTime" => {
                if state.exposure_auto != AutoMode::Off.to_string() {
                    return Err(Error::feature(name, "not writable while ExposureAuto is on"));
                }
                let step = self.profile.exposure_step;
                state.exposure_time = (min + ((value - min) / step).round() * step).min(max);
                Ok(())
            }
            _ => Err(Self::unknown(name)),
        }
    }

    fn float_range(&self, name: &str) -> Result<(f64, f64)> {
        match name {
            "AcquisitionFrameRate" => Ok(self.profile.frame_rate_range),
            "ExposureTime" => Ok(self.profile.exposure_range),
            _ => Err(Self::unknown(name)),
        }
    }

    fn enum_feature(&self, name: &str) -> Result<String> {
        let state = self.state();
        match name {
            "PixelFormat" => Ok(state.pixel_format.clone()),
            "ExposureAuto" => Ok(state.exposure_auto.clone()),
            "GainAuto" => Ok(state.gain_auto.clone()),
            "BalanceWhiteAuto" => Ok(state.balance_white_auto.clone()),
            "FocusAuto" if self.profile.has_focus_auto => Ok(state.focus_auto.clone()),
            "UserSetSelector" if self.profile.has_user_sets => Ok(state.user_set_selector.clone()),
            _ => Err(Self::unknown(name)),
        }
    }

    fn set_enum_feature(&mut self, name: &str, entry: &str) -> Result<()> {
        let auto_entries = ["Off", "Once", "Continuous"];
        let mut state = self.state();

        let invalid = || Error::feature(name, format!("invalid entry {}", entry));

        match name {
            "PixelFormat" => {
                Self::check_unlocked(&state, name)?;
                if !self.profile.pixel_formats.iter().any(|f| f == entry) {
                    return Err(invalid());
                }
                state.pixel_format = entry.to_string();
            }
            "ExposureAuto" | "GainAuto" | "BalanceWhiteAuto" | "FocusAuto" => {
                if name == "FocusAuto" && !self.profile.has_focus_auto {
                    return Err(Self::unknown(name));
                }
                if !auto_entries.contains(&entry) {
                    return Err(invalid());
                }
                let target = match name {
                    "ExposureAuto" => &mut state.exposure_auto,
                    "GainAuto" => &mut state.gain_auto,
                    "BalanceWhiteAuto" => &mut state.balance_white_auto,
                    _ => &mut state.focus_auto,
                };
                *target = entry.to_string();
            }
            "UserSetSelector" if self.profile.has_user_sets => {
                if !["Default", "UserSet1", "UserSet2"].contains(&entry) {
                    return Err(invalid());
                }
                state.user_set_selector = entry.to_string();
            }
            _ => return Err(Self::unknown(name)),
        }

        Ok(())
    }

    fn set_bool_feature(&mut self, name: &str, value: bool) -> Result<()> {
        match name {
            "AcquisitionFrameRateEnable" if self.profile.frame_rate_needs_enable => {
                self.state().frame_rate_enabled = value;
                Ok(())
            }
            _ => Err(Self::unknown(name)),
        }
    }

    fn execute_command(&mut self, name: &str) -> Result<()> {
        match name {
            "DeviceReset" if self.profile.has_device_reset => self.reset(),
            "UserSetLoad" if self.profile.has_user_sets => {
                if self.state().user_set_selector != "Default" {
                    return Err(Error::feature(name, "only the default user set is stored"));
                }
                self.reset()
            }
            "AcquisitionStart" | "AcquisitionStop" => Ok(()),
            _ => Err(Self::unknown(name)),
        }
    }
}

impl Device for SimDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn start_async(&mut self, buffer_count: usize, sink: Arc<dyn FrameSink>) -> Result<()> {
        if self.acquisition.is_some() || self.grabbing {
            return Err(Error::feature("AcquisitionStart", "acquisition already running"));
        }

        {
            let mut state = self.state();
            if state.fail_start {
                return Err(Error::feature("AcquisitionStart", "device did not start"));
            }
            state.acquiring = true;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = stop.clone();
            let state = self.state.clone();
            thread::spawn(move || acquisition_thread(state, buffer_count.max(1), sink, stop))
        };

        self.acquisition = Some(AsyncAcquisition { stop, handle });
        debug!("Started asynchronous acquisition with {} buffers", buffer_count);
        Ok(())
    }

    fn stop_async(&mut self) -> Result<()> {
        if self.acquisition.is_none() {
            return Err(Error::feature("AcquisitionStop", "acquisition not running"));
        }

        self.stop_acquisition_thread();
        self.state().acquiring = false;
        Ok(())
    }

    fn start_grabbing(&mut self, _strategy: GrabStrategy) -> Result<()> {
        if self.acquisition.is_some() {
            return Err(Error::feature("AcquisitionStart", "asynchronous acquisition running"));
        }

        self.state().acquiring = true;
        self.grabbing = true;
        self.last_grab = None;
        Ok(())
    }

    fn stop_grabbing(&mut self) -> Result<()> {
        if self.grabbing {
            self.grabbing = false;
            self.state().acquiring = false;
        }
        Ok(())
    }

    fn is_grabbing(&self) -> bool {
        self.grabbing
    }

    fn retrieve(&mut self, timeout: Duration) -> Result<RawFrame> {
        if !self.grabbing {
            return Err(Error::feature("AcquisitionStart", "not grabbing"));
        }

        let (period, stalled) = {
            let state = self.state();
            (frame_period(state.frame_rate), state.stalled)
        };

        // A stalled device reports the timeout without actually waiting for it
        if stalled {
            return Err(Error::GrabTimeout(timeout));
        }

        if let Some(last) = self.last_grab {
            let due = last + period;
            let now = Instant::now();
            if due > now {
                let wait = due - now;
                if wait > timeout {
                    thread::sleep(timeout);
                    return Err(Error::GrabTimeout(timeout));
                }
                thread::sleep(wait);
            }
        }
        self.last_grab = Some(Instant::now());

        let mut state = self.state();
        let mut frame = RawFrame::new(0, 0, RawLayout::Mono8, Vec::new());
        fill_test_pattern(&mut frame, &state);
        state.frames_generated += 1;

        Ok(frame)
    }

    fn close(&mut self) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(Error::DeviceOpenError(format!("{} is not open", self.info.serial)));
        }

        self.stop_acquisition_thread();
        self.grabbing = false;
        self.state().acquiring = false;
        self.open.store(false, Ordering::Release);
        info!("Closed simulated device {}", self.info.serial);
        Ok(())
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        if self.open.load(Ordering::Acquire) {
            let _ = self.close();
        }
    }
}

// -----------------------------------------------------------------------------------------------
// CAPTURE DEVICE
// -----------------------------------------------------------------------------------------------

impl SimCaptureDevice {
    /// A webcam offering VGA, 720p and 1080p at up to 60 fps.
    pub fn new() -> Self {
        let resolutions = vec![
            Resolution::new(640, 480),
            Resolution::new(1280, 720),
            Resolution::new(1920, 1080),
        ];

        Self {
            opened: true,
            resolution: resolutions[0],
            resolutions,
            fps: 30.0,
            autofocus: Some(1.0),
            auto_exposure: 1.0,
            auto_white_balance: 1.0,
            counter: 0,
            empty_reads: 0,
        }
    }

    /// A device without autofocus control.
    pub fn without_autofocus(mut self) -> Self {
        self.autofocus = None;
        self
    }

    /// A device that failed to open.
    pub fn unavailable() -> Self {
        let mut dev = Self::new();
        dev.opened = false;
        dev
    }
}

impl Default for SimCaptureDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureDevice for SimCaptureDevice {
    fn name(&self) -> String {
        "Simulated video capture".into()
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn read(&mut self) -> Result<RawFrame> {
        if !self.opened {
            return Err(Error::DeviceOpenError("device not open".into()));
        }

        if self.empty_reads > 0 {
            self.empty_reads -= 1;
            return Ok(RawFrame::new(0, 0, RawLayout::Yuyv, Vec::new()));
        }

        self.counter = self.counter.wrapping_add(1);
        let (w, h) = (self.resolution.width, self.resolution.height);

        // Gray ramp with neutral chroma
        let mut data = Vec::with_capacity((w * h * 2) as usize);
        for y in 0..h {
            for x in 0..w {
                data.push(((x + y) as u8).wrapping_add(self.counter));
                data.push(128);
            }
        }

        Ok(RawFrame::new(w, h, RawLayout::Yuyv, data))
    }

    fn get(&self, prop: CaptureProperty) -> f64 {
        match prop {
            CaptureProperty::FrameWidth => self.resolution.width as f64,
            CaptureProperty::FrameHeight => self.resolution.height as f64,
            CaptureProperty::Fps => self.fps,
            CaptureProperty::Autofocus => self.autofocus.unwrap_or(0.0),
            CaptureProperty::AutoExposure => self.auto_exposure,
            CaptureProperty::AutoWhiteBalance => self.auto_white_balance,
        }
    }

    fn set(&mut self, prop: CaptureProperty, value: f64) -> bool {
        match prop {
            // Like most drivers, pick the closest supported mode
            CaptureProperty::FrameWidth | CaptureProperty::FrameHeight => {
                let (width, height) = match prop {
                    CaptureProperty::FrameWidth => (value, self.resolution.height as f64),
                    _ => (self.resolution.width as f64, value),
                };
                let closest = self.resolutions.iter().min_by_key(|r| {
                    ((r.width as f64 - width).abs() + (r.height as f64 - height).abs()) as u64
                });
                if let Some(r) = closest {
                    self.resolution = *r;
                }
                true
            }
            CaptureProperty::Fps => {
                self.fps = [15.0, 30.0, 60.0]
                    .iter()
                    .copied()
                    .min_by_key(|f: &f64| ((f - value).abs() * 1000.0) as u64)
                    .unwrap_or(30.0);
                true
            }
            CaptureProperty::Autofocus => match self.autofocus {
                Some(ref mut v) => {
                    *v = value;
                    true
                }
                None => false,
            },
            CaptureProperty::AutoExposure => {
                self.auto_exposure = value;
                true
            }
            CaptureProperty::AutoWhiteBalance => {
                self.auto_white_balance = value;
                true
            }
        }
    }

    fn release(&mut self) {
        self.opened = false;
    }
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn frame_period(fps: f64) -> Duration {
    Duration::from_secs_f64(1.0 / fps.max(1.0))
}

fn layout_of(pixel_format: &str) -> RawLayout {
    match pixel_format {
        "BGR8" => RawLayout::Bgr8,
        "RGB8" => RawLayout::Rgb8,
        "BayerRG8" => RawLayout::BayerRg8,
        _ => RawLayout::Mono8,
    }
}

/// Fill `frame` with a pattern in the device's current geometry and pixel format, reusing its
/// allocation.
fn fill_test_pattern(frame: &mut RawFrame, state: &DeviceState) {
    let layout = layout_of(&state.pixel_format);
    let channels = match layout {
        RawLayout::Bgr8 | RawLayout::Rgb8 => 3,
        _ => 1,
    };
    let (w, h) = (state.width, state.height);
    let tick = state.frames_generated as u8;

    frame.width = w;
    frame.height = h;
    frame.layout = layout;
    frame.data.clear();
    frame.data.reserve((w * h) as usize * channels);

    for y in 0..h {
        for x in 0..w {
            let v = (x as u8).wrapping_add(y as u8).wrapping_add(tick);
            for c in 0..channels {
                frame.data.push(v.wrapping_add(c as u8 * 64));
            }
        }
    }
}

/// Body of the runtime's acquisition thread: deliver frames from a fixed pool of buffers at the
/// configured frame rate until stopped.
fn acquisition_thread(
    state: Arc<Mutex<DeviceState>>,
    buffer_count: usize,
    sink: Arc<dyn FrameSink>,
    stop: Arc<AtomicBool>,
) {
    let mut pool: Vec<RawFrame> = (0..buffer_count)
        .map(|_| RawFrame::new(0, 0, RawLayout::Mono8, Vec::new()))
        .collect();
    let mut next = 0;
    let mut deadline = Instant::now();

    while !stop.load(Ordering::Acquire) {
        let (period, deliver) = {
            let mut state = lock(&state);
            if !state.stalled {
                fill_test_pattern(&mut pool[next], &state);
                state.frames_generated += 1;
            }
            (frame_period(state.frame_rate), !state.stalled)
        };

        if deliver {
            // The buffer returns to the pool as soon as the callback is done with it
            sink.on_frame_received(&pool[next]);
            next = (next + 1) % buffer_count;
        }

        // Time spent on a frame counts towards its period
        deadline += period;
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline.saturating_duration_since(now));
        } else {
            deadline = now;
        }
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
