//! # Display surface
//!
//! The minimal windowing surface [`Camera::show_stream`](crate::Camera::show_stream) needs: show a
//! frame and wait a short time for a key press.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::time::Duration;

use crate::frame::FrameBuffer;

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// A surface frames can be shown on.
pub trait Display {
    /// Show the frame in the window with the given title, creating the window if needed.
    fn show(&mut self, title: &str, frame: &FrameBuffer);

    /// Wait up to `timeout` for a key press. Returns `true` if any key was pressed.
    fn wait_key(&mut self, timeout: Duration) -> bool;

    /// Close the window with the given title.
    fn close(&mut self, title: &str);
}

// -----------------------------------------------------------------------------------------------
// MINIFB DISPLAY
// -----------------------------------------------------------------------------------------------

#[cfg(feature = "display")]
pub use self::minifb_display::MinifbDisplay;

#[cfg(feature = "display")]
mod minifb_display {
    use std::thread;
    use std::time::{Duration, Instant};

    use log::warn;
    use minifb::{KeyRepeat, Window, WindowOptions};

    use super::Display;
    use crate::frame::FrameBuffer;
    use crate::types::PixelFormat;

    /// Window backed by `minifb`.
    #[derive(Default)]
    pub struct MinifbDisplay {
        window: Option<(String, Window)>,
        buffer: Vec<u32>,
    }

    impl MinifbDisplay {
        pub fn new() -> Self {
            Self::default()
        }

        fn window_for(&mut self, title: &str, width: usize, height: usize) -> Option<&mut Window> {
            let reopen = match self.window {
                Some((ref t, ref w)) => t != title || w.get_size() != (width, height),
                None => true,
            };

            if reopen {
                self.window = match Window::new(title, width, height, WindowOptions::default()) {
                    Ok(w) => Some((title.to_string(), w)),
                    Err(e) => {
                        warn!("Cannot open window: {}", e);
                        None
                    }
                };
            }

            self.window.as_mut().map(|(_, w)| w)
        }
    }

    impl Display for MinifbDisplay {
        fn show(&mut self, title: &str, frame: &FrameBuffer) {
            let (width, height) = (frame.width() as usize, frame.height() as usize);

            // minifb expects 0RGB packed into a u32
            let mut buffer = std::mem::replace(&mut self.buffer, Vec::new());
            buffer.clear();
            match frame.format() {
                PixelFormat::Bgr8 => buffer.extend(frame.data().chunks_exact(3).map(|px| {
                    (px[2] as u32) << 16 | (px[1] as u32) << 8 | px[0] as u32
                })),
                PixelFormat::Mono8 => buffer.extend(
                    frame.data().iter().map(|&l| (l as u32) << 16 | (l as u32) << 8 | l as u32),
                ),
            }

            if let Some(window) = self.window_for(title, width, height) {
                if let Err(e) = window.update_with_buffer(&buffer, width, height) {
                    warn!("Cannot update window: {}", e);
                }
            }

            self.buffer = buffer;
        }

        fn wait_key(&mut self, timeout: Duration) -> bool {
            let start = Instant::now();

            loop {
                match self.window {
                    Some((_, ref mut window)) => {
                        if !window.is_open() {
                            return true;
                        }
                        window.update();
                        if !window.get_keys_pressed(KeyRepeat::No).unwrap_or_default().is_empty() {
                            return true;
                        }
                    }
                    None => thread::sleep(timeout),
                }

                if start.elapsed() >= timeout {
                    return false;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }

        fn close(&mut self, title: &str) {
            if matches!(self.window, Some((ref t, _)) if t == title) {
                self.window = None;
            }
        }
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {

    use super::*;

    /// Display that records what it was asked to do and reports a key press after a fixed
    /// number of waits.
    pub(crate) struct ScriptedDisplay {
        pub shown: Vec<(String, u32, u32, usize)>,
        pub closed: Vec<String>,
        pub waits: usize,
        pub key_after: usize,
    }

    impl ScriptedDisplay {
        pub(crate) fn new(key_after: usize) -> Self {
            Self {
                shown: Vec::new(),
                closed: Vec::new(),
                waits: 0,
                key_after,
            }
        }
    }

    impl Display for ScriptedDisplay {
        fn show(&mut self, title: &str, frame: &FrameBuffer) {
            self.shown.push((title.to_string(), frame.width(), frame.height(), frame.channels()));
        }

        fn wait_key(&mut self, _timeout: Duration) -> bool {
            self.waits += 1;
            self.waits >= self.key_after
        }

        fn close(&mut self, title: &str) {
            self.closed.push(title.to_string());
        }
    }
}
