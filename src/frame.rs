//! # Frame buffers
//!
//! [`FrameBuffer`] is the common image representation handed out by every camera, [`RawFrame`]
//! is the buffer as a device or vendor SDK delivers it. This module also holds the colour
//! conversions needed to get from one to the other.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::iter;

use image::{Bgr, DynamicImage, ImageBuffer, ImageFormat, Luma};
use ndarray::Array3;

use crate::error::{Error, Result};
use crate::types::{PixelFormat, Resolution};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Fixed point (14 bit) weights of the ITU-R BT.601 luma transform.
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTS
// -----------------------------------------------------------------------------------------------

/// A decoded frame with interleaved 8-bit channels.
///
/// Every frame returned by a camera is an independent copy, the caller may mutate or drop it
/// freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

/// A frame as delivered by a device, before conversion to a [`FrameBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub layout: RawLayout,
    pub data: Vec<u8>,
}

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

/// Memory layouts devices deliver frames in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawLayout {
    Mono8,
    Bgr8,
    Rgb8,

    /// Bayer mosaic with a red pixel at the top left
    BayerRg8,

    /// Packed 4:2:2 luma/chroma, two pixels in four bytes
    Yuyv,

    /// Motion JPEG, one compressed image per frame
    Mjpeg,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl FrameBuffer {
    /// Create a black frame.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let len = width as usize * height as usize * format.channels();

        Self {
            width,
            height,
            format,
            data: vec![0; len],
        }
    }

    /// Wrap existing pixel data, checking that it matches the given geometry.
    pub fn from_raw(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        check_len(width, height, format.channels(), data.len())?;

        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Decode a device frame into the requested pixel format.
    pub fn from_raw_frame(raw: &RawFrame, format: PixelFormat) -> Result<Self> {
        raw.check()?;

        let (width, height) = (raw.width, raw.height);

        let data = match (raw.layout, format) {
            (RawLayout::Mono8, PixelFormat::Mono8) => raw.data.clone(),
            (RawLayout::Mono8, PixelFormat::Bgr8) => gray_to_bgr(&raw.data),
            (RawLayout::Bgr8, PixelFormat::Bgr8) => raw.data.clone(),
            (RawLayout::Bgr8, PixelFormat::Mono8) => bgr_to_gray(&raw.data),
            (RawLayout::Rgb8, PixelFormat::Bgr8) => swap_red_blue(raw.data.clone()),
            (RawLayout::Rgb8, PixelFormat::Mono8) => bgr_to_gray(&swap_red_blue(raw.data.clone())),
            // Raw sensor values are used as the gray image, without demosaicing
            (RawLayout::BayerRg8, PixelFormat::Mono8) => raw.data.clone(),
            (RawLayout::BayerRg8, PixelFormat::Bgr8) => {
                swap_red_blue(bayer_rg8_to_rgb(&raw.data, width, height))
            }
            (RawLayout::Yuyv, PixelFormat::Bgr8) => yuyv_to_bgr(&raw.data),
            (RawLayout::Yuyv, PixelFormat::Mono8) => {
                raw.data.iter().step_by(2).copied().collect()
            }
            (RawLayout::Mjpeg, _) => {
                let decoded = decode_jpeg(&raw.data)?;
                return Ok(decoded.into_format(format));
            }
        };

        Self::from_raw(width, height, format, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Number of interleaved channels, 3 for BGR8 and 1 for Mono8.
    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row-major pixel data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// The channel values of the pixel at the given position, `None` if outside of the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }

        let c = self.channels();
        let idx = (y as usize * self.width as usize + x as usize) * c;

        Some(&self.data[idx..idx + c])
    }

    /// Convert the frame to the given pixel format.
    ///
    /// Colour to gray uses the BT.601 luma weights, gray to colour replicates the channel.
    pub fn into_format(self, format: PixelFormat) -> Self {
        let data = match (self.format, format) {
            (PixelFormat::Bgr8, PixelFormat::Mono8) => bgr_to_gray(&self.data),
            (PixelFormat::Mono8, PixelFormat::Bgr8) => gray_to_bgr(&self.data),
            _ => self.data,
        };

        Self {
            width: self.width,
            height: self.height,
            format,
            data,
        }
    }

    /// Copy the frame into an [`image::DynamicImage`].
    pub fn to_dynamic_image(&self) -> Result<DynamicImage> {
        let err = || Error::FrameSizeError {
            width: self.width,
            height: self.height,
            channels: self.channels(),
            actual: self.data.len(),
        };

        match self.format {
            PixelFormat::Bgr8 => {
                ImageBuffer::<Bgr<u8>, Vec<u8>>::from_raw(self.width, self.height, self.data.clone())
                    .map(DynamicImage::ImageBgr8)
                    .ok_or_else(err)
            }
            PixelFormat::Mono8 => {
                ImageBuffer::<Luma<u8>, Vec<u8>>::from_raw(self.width, self.height, self.data.clone())
                    .map(DynamicImage::ImageLuma8)
                    .ok_or_else(err)
            }
        }
    }

    /// Copy the frame into a `height x width x channels` array.
    pub fn to_ndarray(&self) -> Result<Array3<u8>> {
        let shape = (self.height as usize, self.width as usize, self.channels());

        Array3::from_shape_vec(shape, self.data.clone()).map_err(|_| Error::FrameSizeError {
            width: self.width,
            height: self.height,
            channels: self.channels(),
            actual: self.data.len(),
        })
    }
}

impl RawFrame {
    pub fn new(width: u32, height: u32, layout: RawLayout, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            layout,
            data,
        }
    }

    /// Check the buffer length against the geometry. Compressed layouts only need to be
    /// non-empty.
    pub fn check(&self) -> Result<()> {
        match self.layout {
            RawLayout::Mono8 | RawLayout::BayerRg8 => {
                check_len(self.width, self.height, 1, self.data.len())
            }
            RawLayout::Bgr8 | RawLayout::Rgb8 => check_len(self.width, self.height, 3, self.data.len()),
            RawLayout::Yuyv => check_len(self.width, self.height, 2, self.data.len()),
            RawLayout::Mjpeg if self.data.is_empty() => Err(Error::FrameSizeError {
                width: self.width,
                height: self.height,
                channels: 0,
                actual: 0,
            }),
            RawLayout::Mjpeg => Ok(()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// -----------------------------------------------------------------------------------------------
// CONVERSION FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Swap the first and third channel of every pixel, converting RGB to BGR and back.
pub(crate) fn swap_red_blue(mut data: Vec<u8>) -> Vec<u8> {
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }

    data
}

/// Repeat each gray value over the three colour channels.
fn gray_to_bgr(data: &[u8]) -> Vec<u8> {
    data.iter().flat_map(|&v| iter::repeat(v).take(3)).collect()
}

/// Convert interleaved BGR to gray.
pub(crate) fn bgr_to_gray(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(3)
        .map(|px| {
            let y = px[0] as u32 * LUMA_B + px[1] as u32 * LUMA_G + px[2] as u32 * LUMA_R;
            ((y + (1 << (LUMA_SHIFT - 1))) >> LUMA_SHIFT) as u8
        })
        .collect()
}

/// Nearest neighbour demosaicing of an RGGB Bayer mosaic into interleaved RGB.
///
/// Every 2 x 2 cell takes red and blue from its own pixels and the mean of its two greens.
pub(crate) fn bayer_rg8_to_rgb(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let at = |x: usize, y: usize| data[y.min(h - 1) * w + x.min(w - 1)];
    let mut rgb = vec![0u8; w * h * 3];

    for y in 0..h {
        for x in 0..w {
            let (cx, cy) = (x & !1, y & !1);
            let r = at(cx, cy);
            let g = ((at(cx + 1, cy) as u16 + at(cx, cy + 1) as u16) / 2) as u8;
            let b = at(cx + 1, cy + 1);

            let idx = (y * w + x) * 3;
            rgb[idx] = r;
            rgb[idx + 1] = g;
            rgb[idx + 2] = b;
        }
    }

    rgb
}

/// Convert packed YUYV (BT.601, studio range) to interleaved BGR.
pub(crate) fn yuyv_to_bgr(data: &[u8]) -> Vec<u8> {
    let mut bgr = Vec::with_capacity(data.len() / 2 * 3);

    for quad in data.chunks_exact(4) {
        let (u, v) = (quad[1] as i32 - 128, quad[3] as i32 - 128);

        for &y in [quad[0], quad[2]].iter() {
            let c = 298 * (y as i32 - 16);
            let r = (c + 409 * v + 128) >> 8;
            let g = (c - 100 * u - 208 * v + 128) >> 8;
            let b = (c + 516 * u + 128) >> 8;

            bgr.push(clamp_u8(b));
            bgr.push(clamp_u8(g));
            bgr.push(clamp_u8(r));
        }
    }

    bgr
}

// -----------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn check_len(width: u32, height: u32, channels: usize, actual: usize) -> Result<()> {
    if width as usize * height as usize * channels == actual && actual > 0 {
        Ok(())
    } else {
        Err(Error::FrameSizeError {
            width,
            height,
            channels,
            actual,
        })
    }
}

fn clamp_u8(v: i32) -> u8 {
    v.max(0).min(255) as u8
}

/// Decode a JPEG image into a BGR frame.
fn decode_jpeg(data: &[u8]) -> Result<FrameBuffer> {
    let rgb = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .map_err(Error::ImageConversionError)?
        .to_rgb();

    let (width, height) = rgb.dimensions();

    FrameBuffer::from_raw(width, height, PixelFormat::Bgr8, swap_red_blue(rgb.into_raw()))
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_buffer_size_check() {
        assert!(FrameBuffer::from_raw(4, 2, PixelFormat::Bgr8, vec![0; 24]).is_ok());
        assert!(FrameBuffer::from_raw(4, 2, PixelFormat::Mono8, vec![0; 24]).is_err());
        assert!(RawFrame::new(4, 2, RawLayout::Yuyv, vec![0; 15]).check().is_err());
        assert!(RawFrame::new(4, 2, RawLayout::Mjpeg, vec![]).check().is_err());
    }

    #[test]
    fn test_gray_weights() {
        // Pure blue, green and red, BGR order
        let gray = bgr_to_gray(&[255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255]);
        assert_eq!(gray, vec![29, 150, 76, 255]);
    }

    #[test]
    fn test_gray_to_bgr() {
        let raw = RawFrame::new(2, 1, RawLayout::Mono8, vec![7, 200]);
        let frame = FrameBuffer::from_raw_frame(&raw, PixelFormat::Bgr8).unwrap();
        assert_eq!(frame.data(), &[7, 7, 7, 200, 200, 200][..]);

        let back = FrameBuffer::from_raw(2, 1, PixelFormat::Mono8, vec![7, 200]).unwrap();
        assert_eq!(back.into_format(PixelFormat::Bgr8).data(), frame.data());
    }

    #[test]
    fn test_rgb_is_reinterpreted_as_bgr() {
        let raw = RawFrame::new(1, 1, RawLayout::Rgb8, vec![10, 20, 30]);
        let frame = FrameBuffer::from_raw_frame(&raw, PixelFormat::Bgr8).unwrap();
        assert_eq!(frame.pixel(0, 0), Some(&[30u8, 20, 10][..]));
    }

    #[test]
    fn test_bayer_demosaic() {
        // R G
        // G B
        let raw = RawFrame::new(2, 2, RawLayout::BayerRg8, vec![200, 100, 50, 10]);
        let frame = FrameBuffer::from_raw_frame(&raw, PixelFormat::Bgr8).unwrap();

        for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)].iter() {
            assert_eq!(frame.pixel(*x, *y), Some(&[10u8, 75, 200][..]));
        }

        let mono = FrameBuffer::from_raw_frame(&raw, PixelFormat::Mono8).unwrap();
        assert_eq!(mono.data(), &[200, 100, 50, 10]);
    }

    #[test]
    fn test_yuyv_gray_levels() {
        // Neutral chroma, so every output channel equals the expanded luma
        let raw = RawFrame::new(2, 1, RawLayout::Yuyv, vec![16, 128, 235, 128]);
        let frame = FrameBuffer::from_raw_frame(&raw, PixelFormat::Bgr8).unwrap();
        assert_eq!(frame.data(), &[0, 0, 0, 255, 255, 255]);

        let mono = FrameBuffer::from_raw_frame(&raw, PixelFormat::Mono8).unwrap();
        assert_eq!(mono.data(), &[16, 235]);
    }

    #[test]
    fn test_hand_off_containers() {
        let mut frame = FrameBuffer::new(3, 2, PixelFormat::Bgr8);
        frame.data_mut()[3] = 7;

        let array = frame.to_ndarray().unwrap();
        assert_eq!(array.shape(), &[2, 3, 3]);
        assert_eq!(array[[0, 1, 0]], 7);

        let img = frame.clone().into_format(PixelFormat::Mono8).to_dynamic_image().unwrap();
        assert_eq!(img.to_luma().dimensions(), (3, 2));
    }
}
