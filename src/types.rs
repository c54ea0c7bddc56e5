//! # Camera value types
//!
//! Plain data shared by every camera: frame geometry, pixel formats and the modes used by the
//! acquisition controls.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use derive_more::Display;
use serde::Deserialize;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Width and height of a frame in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Display)]
#[display(fmt = "{} x {}", width, height)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Pixel format of the frames handed out by a camera.
///
/// The format is negotiated with the device when the camera is constructed and cannot be changed
/// afterwards. The display form is the GenICam `PixelFormat` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Display)]
pub enum PixelFormat {
    /// 24-bit colour, interleaved blue, green, red
    #[serde(rename = "BGR8", alias = "Bgr8")]
    #[display(fmt = "BGR8")]
    Bgr8,

    /// 8-bit grayscale
    #[serde(rename = "Mono8")]
    #[display(fmt = "Mono8")]
    Mono8,
}

/// Tri-state setting of the automatic exposure, gain and white balance controls.
///
/// The display form matches the GenICam enumeration entries used by the vendor SDKs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Display)]
pub enum AutoMode {
    /// Fixed value, no automatic adjustment
    Off,

    /// Converge once, then keep the value
    Once,

    /// Adjust for every frame
    Continuous,
}

/// Binary setting, only used for autofocus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Display)]
pub enum Switch {
    Off,
    On,
}

/// Commonly used frame sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Display)]
pub enum ResolutionPreset {
    /// 1280 x 720
    #[serde(rename = "720p")]
    #[display(fmt = "720p")]
    Hd720,

    /// 1920 x 1080
    #[serde(rename = "1080p")]
    #[display(fmt = "1080p")]
    FullHd1080,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels in a frame of this size.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new(width, height)
    }
}

impl PixelFormat {
    /// Number of interleaved 8-bit channels per pixel.
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Bgr8 => 3,
            PixelFormat::Mono8 => 1,
        }
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        PixelFormat::Bgr8
    }
}

impl Switch {
    pub fn is_on(&self) -> bool {
        *self == Switch::On
    }
}

impl ResolutionPreset {
    pub fn resolution(&self) -> Resolution {
        match self {
            ResolutionPreset::Hd720 => Resolution::new(1280, 720),
            ResolutionPreset::FullHd1080 => Resolution::new(1920, 1080),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
