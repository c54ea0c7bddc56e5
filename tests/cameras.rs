//! # Camera Tests
//!
//! Exercises the camera adapters on the simulated runtimes.

#![cfg(feature = "sim")]

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use cv_cameras::prelude::*;
use cv_cameras::sim::{SimCaptureDevice, SimProfile, SimRuntime};
use cv_cameras::{AlliedAlvium, Error};

/// Only one Alvium camera may exist per process
static VIMBA: Mutex<()> = Mutex::new(());

fn vimba_lock() -> MutexGuard<'static, ()> {
    VIMBA.lock().unwrap_or_else(|e| e.into_inner())
}

/// Poll a push based camera until a frame arrives.
fn wait_for_frame(camera: &mut dyn Camera) -> Option<FrameBuffer> {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(2) {
        if let Some(f) = camera.get_frame() {
            return Some(f);
        }
        thread::sleep(Duration::from_millis(1));
    }
    None
}

/// One camera of every kind, each on its own simulated backend.
fn all_cameras(format: PixelFormat) -> Vec<(Box<dyn Camera>, Option<SimRuntime>)> {
    let vimba = SimRuntime::vimba();
    let pylon = SimRuntime::pylon();
    let galaxy = SimRuntime::galaxy();

    let builder = CameraBuilder::new().pixel_format(format);

    vec![
        (
            Box::new(builder.clone().capture(SimCaptureDevice::new()).unwrap()) as Box<dyn Camera>,
            None,
        ),
        (
            builder.clone().build(Vendor::AlliedVision, Arc::new(vimba.clone())).unwrap(),
            Some(vimba),
        ),
        (builder.clone().build(Vendor::Basler, Arc::new(pylon.clone())).unwrap(), Some(pylon)),
        (builder.build(Vendor::DahengImaging, Arc::new(galaxy.clone())).unwrap(), Some(galaxy)),
    ]
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

/// Frames carry one channel in Mono8 and three in BGR8, at the reported resolution
#[test]
fn frame_channels_match_pixel_format() {
    let _guard = vimba_lock();

    for (format, channels) in [(PixelFormat::Mono8, 1), (PixelFormat::Bgr8, 3)].iter() {
        for (mut camera, _) in all_cameras(*format) {
            let frame = wait_for_frame(camera.as_mut()).expect("No frame received");

            assert_eq!(frame.channels(), *channels, "{}", camera.name());
            assert_eq!(frame.resolution(), camera.resolution(), "{}", camera.name());
            assert_eq!(
                frame.data().len(),
                frame.resolution().area() * channels,
                "{}",
                camera.name()
            );
        }
    }
}

/// A successful resolution change is reported exactly by the camera afterwards
#[test]
fn resolution_post_condition() {
    let _guard = vimba_lock();

    for (mut camera, _) in all_cameras(PixelFormat::Bgr8) {
        let before = camera.resolution();

        if camera.set_resolution(1280, 720) {
            assert_eq!(camera.resolution(), Resolution::new(1280, 720), "{}", camera.name());
        } else {
            assert_eq!(camera.resolution(), before, "{}", camera.name());
        }

        let frame = wait_for_frame(camera.as_mut()).expect("No frame after resolution change");
        assert_eq!(frame.resolution(), camera.resolution(), "{}", camera.name());
    }
}

/// Frame rates within range are accepted, others are rejected
#[test]
fn frame_rate_tolerance() {
    let _guard = vimba_lock();

    for (mut camera, _) in all_cameras(PixelFormat::Bgr8) {
        assert!(camera.set_frame_rate(15.0), "{}", camera.name());
        assert!((camera.frame_rate() - 15.0).abs() <= 1.0, "{}", camera.name());
        assert!(!camera.set_frame_rate(10_000.0), "{}", camera.name());
    }
}

/// A frame rate the camera can only approach to within 0.2 fps is accepted by the adapters with
/// a 1 fps tolerance and rejected by the Basler one
#[test]
fn frame_rate_tolerance_per_vendor() {
    let _guard = vimba_lock();

    let vimba = SimRuntime::new("Vimba X", vec![SimProfile::alvium().with_frame_rate_step(0.5)]);
    let pylon = SimRuntime::new("pylon", vec![SimProfile::ace().with_frame_rate_step(0.5)]);
    let galaxy = SimRuntime::new("Galaxy", vec![SimProfile::mercury().with_frame_rate_step(0.5)]);

    let mut allied = CameraBuilder::new().allied(Arc::new(vimba)).unwrap();
    let mut basler = CameraBuilder::new().basler(Arc::new(pylon)).unwrap();
    let mut daheng = CameraBuilder::new().daheng(Arc::new(galaxy)).unwrap();

    assert!(allied.set_frame_rate(10.3));
    assert!(daheng.set_frame_rate(10.3));
    assert!(!basler.set_frame_rate(10.3));

    assert!((allied.frame_rate() - 10.5).abs() < 1e-9);
    assert!((daheng.frame_rate() - 10.5).abs() < 1e-9);
    assert!((basler.frame_rate() - 10.5).abs() < 1e-9);

    // Reachable rates pass everywhere
    assert!(allied.set_frame_rate(12.0));
    assert!(daheng.set_frame_rate(12.0));
    assert!(basler.set_frame_rate(12.0));
}

/// Out of range exposure times are rejected without touching the camera
#[test]
fn exposure_out_of_range_is_rejected() {
    let _guard = vimba_lock();

    for (mut camera, runtime) in all_cameras(PixelFormat::Bgr8) {
        let runtime = match runtime {
            Some(r) => r,
            None => {
                assert!(camera.exposure_time_range_us().is_none());
                assert!(!camera.set_exposure_time_us(1000.0));
                continue;
            }
        };

        let serial = runtime_serial(&runtime);
        let before = runtime.device_state(&serial).unwrap();
        let (min, max) = camera.exposure_time_range_us().unwrap();

        assert!(!camera.set_exposure_time_us(min - 1.0), "{}", camera.name());
        assert!(!camera.set_exposure_time_us(max * 2.0), "{}", camera.name());

        let after = runtime.device_state(&serial).unwrap();
        assert_eq!(after.exposure_auto, before.exposure_auto, "{}", camera.name());
        assert_eq!(after.exposure_time, before.exposure_time, "{}", camera.name());

        // A valid one turns auto exposure off
        assert!(camera.set_exposure_time_us(min * 10.0), "{}", camera.name());
        assert_eq!(runtime.device_state(&serial).unwrap().exposure_auto, "Off");
    }
}

/// Releasing a camera makes its device available to a new instance
#[test]
fn release_frees_the_device() {
    let _guard = vimba_lock();

    for (mut camera, runtime) in all_cameras(PixelFormat::Mono8) {
        let runtime = match runtime {
            Some(r) => r,
            None => continue,
        };
        let serial = runtime_serial(&runtime);

        assert!(runtime.is_open(&serial));
        camera.release();
        assert!(!runtime.is_open(&serial));
        assert!(!runtime.is_started());

        // Releasing twice is harmless
        camera.release();
        assert!(camera.get_frame().is_none());
    }

    let vimba = SimRuntime::vimba();
    let mut first = CameraBuilder::new().allied(Arc::new(vimba.clone())).unwrap();
    first.release();
    let second = CameraBuilder::new().allied(Arc::new(vimba.clone()));
    assert!(second.is_ok());
}

/// A second Alvium camera fails while the first holds the runtime
#[test]
fn allied_runtime_is_exclusive() {
    let _guard = vimba_lock();

    let vimba = SimRuntime::new(
        "Vimba X",
        vec![
            SimProfile::alvium(),
            SimProfile::alvium().with_serial("AV-0002"),
        ],
    );

    let first = AlliedAlvium::new(Arc::new(vimba.clone()), 0, PixelFormat::Bgr8, (1, 1)).unwrap();

    match AlliedAlvium::new(Arc::new(vimba.clone()), 1, PixelFormat::Bgr8, (1, 1)) {
        Err(Error::RuntimeInUse(_)) => (),
        Err(e) => panic!("Unexpected error {}", e),
        Ok(_) => panic!("Second camera shared the runtime"),
    }

    // The failed attempt did not disturb the first camera
    assert!(vimba.is_started());
    drop(first);
    assert!(!vimba.is_started());

    assert!(AlliedAlvium::new(Arc::new(vimba.clone()), 1, PixelFormat::Bgr8, (1, 1)).is_ok());
}

/// 2 x 2 binning halves the sensor size
#[test]
fn allied_binning() {
    let _guard = vimba_lock();

    let camera = CameraBuilder::new()
        .binning(2, 2)
        .allied(Arc::new(SimRuntime::vimba()))
        .unwrap();

    let sensor = camera.sensor_resolution().unwrap();
    assert_eq!(camera.resolution(), Resolution::new(sensor.width / 2, sensor.height / 2));
}

/// Asking for a camera that is not connected fails and leaves the runtime stopped
#[test]
fn missing_camera() {
    let galaxy = SimRuntime::galaxy();

    match CameraBuilder::new().camera_id(1).daheng(Arc::new(galaxy.clone())) {
        Err(Error::DeviceNotFound { id: 1, available: 1 }) => (),
        Err(e) => panic!("Unexpected error {}", e),
        Ok(_) => panic!("Built a camera that does not exist"),
    }

    assert!(!galaxy.is_started());
}

/// A slow consumer of a push based camera gets the newest frame, every frame before it is dropped
#[test]
fn allied_slow_consumer() {
    let _guard = vimba_lock();

    let vimba = SimRuntime::vimba();
    let mut camera = CameraBuilder::new()
        .frame_rate(20.0)
        .allied(Arc::new(vimba.clone()))
        .unwrap();

    let generated = || vimba.device_state("AV-0001").unwrap().frames_generated;

    let start = Instant::now();
    while generated() < 3 && start.elapsed() < Duration::from_secs(5) {
        thread::sleep(Duration::from_millis(10));
    }

    // Stop delivery and let the last frame in flight reach the observer
    vimba.configure("AV-0001", |s| s.stalled = true);
    thread::sleep(Duration::from_millis(300));

    let generated = generated();
    assert!(generated >= 3);

    let frame = camera.get_frame().expect("No frame received");
    assert_eq!(frame.resolution(), camera.resolution());
    assert_eq!(camera.dropped_frames() as u64, generated - 1);
    assert!(camera.get_frame().is_none());
}

/// The simulated runtime keeps up with the configured frame rate
#[test]
fn allied_delivers_at_frame_rate() {
    let _guard = vimba_lock();

    let vimba = SimRuntime::vimba();
    let mut camera = CameraBuilder::new()
        .pixel_format(PixelFormat::Mono8)
        .binning(4, 4)
        .frame_rate(20.0)
        .allied(Arc::new(vimba.clone()))
        .unwrap();

    let before = vimba.device_state("AV-0001").unwrap().frames_generated;
    thread::sleep(Duration::from_millis(1000));
    let after = vimba.device_state("AV-0001").unwrap().frames_generated;

    // 20 frames expected, allow for scheduling jitter
    assert!(after - before >= 15, "{} frames in 1 s", after - before);
    assert!(after - before <= 22, "{} frames in 1 s", after - before);
    assert!(camera.get_frame().is_some());
}

fn runtime_serial(runtime: &SimRuntime) -> String {
    ["AV-0001", "BA-0001", "DH-0001"]
        .iter()
        .find(|s| runtime.device_state(s).is_some())
        .map(|s| s.to_string())
        .unwrap()
}
