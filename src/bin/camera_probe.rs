//! # Camera probe
//!
//! Opens a camera, prints its properties and grabs a few frames.
//!
//! ```shell
//! RUST_LOG=info camera_probe <allied|basler|daheng|capture> [config file]
//! ```
//!
//! Built with the `display` feature and `SHOW_STREAM` set in the environment, the stream is shown
//! in a window afterwards until any key is pressed.
//!
//! Without hardware bindings the vendor cameras run on the simulated runtimes.

use std::env;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cv_cameras::prelude::*;
use cv_cameras::sim::{SimCaptureDevice, SimRuntime};

const FRAMES: usize = 10;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <allied|basler|daheng|capture> [config file]", args[0]);
        process::exit(2);
    }

    if let Err(e) = run(&args[1], args.get(2).map(String::as_str)) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(backend: &str, config: Option<&str>) -> cv_cameras::Result<()> {
    let builder = match config {
        Some(path) => CameraBuilder::new().config_from_file(path)?,
        None => CameraBuilder::new(),
    };

    let mut camera: Box<dyn Camera> = match backend {
        "allied" => Box::new(builder.allied(Arc::new(SimRuntime::vimba()))?),
        "basler" => Box::new(builder.basler(Arc::new(SimRuntime::pylon()))?),
        "daheng" => Box::new(builder.daheng(Arc::new(SimRuntime::galaxy()))?),
        "capture" => Box::new(builder.capture(SimCaptureDevice::new())?),
        other => {
            eprintln!("Unknown backend {}", other);
            process::exit(2);
        }
    };

    println!("Camera:      {}", camera.name());
    println!("Resolution:  {}", camera.resolution());
    if let Some(sensor) = camera.sensor_resolution() {
        println!("Sensor:      {}", sensor);
    }
    println!("Frame rate:  {} fps", camera.frame_rate());
    if let Some((min, max)) = camera.exposure_time_range_us() {
        println!("Exposure:    {} - {} us", min, max);
    }

    let start = Instant::now();
    let mut grabbed = 0;
    while grabbed < FRAMES {
        if let Some(frame) = camera.get_frame() {
            grabbed += 1;
            println!(
                "Frame {:2}: {} {} at {:?}",
                grabbed,
                frame.resolution(),
                frame.format(),
                start.elapsed()
            );
        } else {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[cfg(feature = "display")]
    {
        if env::var_os("SHOW_STREAM").is_some() {
            cv_cameras::show_stream(camera.as_mut(), &mut cv_cameras::MinifbDisplay::new());
        }
    }

    camera.release();

    Ok(())
}
