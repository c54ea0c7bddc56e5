//! # Cameras for use in the CV system
//!
//! This crate provides a uniform API over the cameras used in the CV system: industrial machine
//! vision cameras (Allied Vision Alvium, Basler ace, Daheng Imaging) driven through their vendor
//! runtimes, and generic video capture devices such as webcams.
//!
//! Every camera implements the [`Camera`] trait. A camera is streaming as soon as it is built,
//! frames are polled with [`Camera::get_frame`] and the acquisition settings (resolution, frame
//! rate, exposure, automatic modes) can be changed while it runs.
//!
//! ## Backends
//!
//! The vendor runtimes are reached through the traits in [`sdk`]. Bindings to the real SDKs
//! implement these traits; the `sim` feature (enabled by default) provides a simulated runtime
//! for every vendor, used by the tests and for development without hardware.
//!
//! With the `v4l2` feature, generic capture devices are opened over Video4Linux2 using
//! [`rscam`](https://github.com/loyd/rscam). Before enabling it make sure V4L2 and its dev headers
//! are installed:
//!
//! ```shell
//! sudo apt install v4l-utils libv4l-dev
//! ```
//!
//! The `display` feature adds a window to watch a camera stream, backed by `minifb`.
//!
//! ## Usage
//!
//! Cameras are built with [`CameraBuilder`]:
//!
//! ```rust
//! # use std::sync::Arc;
//! use cv_cameras::prelude::*;
//! # use cv_cameras::sim::SimRuntime;
//! # let runtime = Arc::new(SimRuntime::galaxy());
//!
//! let mut camera = CameraBuilder::new()
//!     // Index of the camera among those the runtime detected
//!     .camera_id(0)
//!     .pixel_format(PixelFormat::Bgr8)
//!     .resolution(640, 480)
//!     .frame_rate(30.0)
//!     // Build on the Galaxy runtime
//!     .daheng(runtime)
//!     .expect("Failed to open camera");
//!
//! if let Some(frame) = camera.get_frame() {
//!     println!("Got a {} frame", frame.resolution());
//! }
//!
//! camera.release();
//! ```
//!
//! The settings can also be loaded from a file with [`Configurable::config_from_file`].

// -----------------------------------------------------------------------------------------------
// EXPORTS
// -----------------------------------------------------------------------------------------------

pub use crate::allied::AlliedAlvium;
pub use crate::basler::BaslerAce;
pub use crate::builder::{CameraBuilder, Configurable, Vendor};
pub use crate::camera::{show_stream, Camera};
pub use crate::capture::{CaptureCamera, CaptureDevice, CaptureProperty};
pub use crate::config::CameraConfig;
pub use crate::daheng::DahengVision;
pub use crate::display::Display;
pub use crate::error::{Error, Result};
pub use crate::frame::{FrameBuffer, RawFrame, RawLayout};
pub use crate::observer::FrameObserver;
pub use crate::types::{AutoMode, PixelFormat, Resolution, ResolutionPreset, Switch};

#[cfg(feature = "display")]
pub use crate::display::MinifbDisplay;

#[cfg(feature = "v4l2")]
pub use crate::v4l2::V4l2Device;

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

mod allied;
mod basler;
mod builder;
mod camera;
mod capture;
mod config;
mod daheng;
mod display;
mod error;
mod frame;
mod observer;
mod types;

pub mod sdk;

#[cfg(feature = "sim")]
pub mod sim;

#[cfg(feature = "v4l2")]
mod v4l2;

pub mod prelude {
    pub use crate::{CameraBuilder, Configurable, Vendor};
    pub use crate::{AutoMode, PixelFormat, Resolution, ResolutionPreset, Switch};
    pub use crate::{Camera, FrameBuffer};
}
