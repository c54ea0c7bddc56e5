//! # Frame observer
//!
//! Hands frames from a runtime's acquisition thread to a consumer polling from its own thread.
//!
//! The observer keeps a single slot holding the latest frame and a flag telling whether it has
//! been collected yet. A frame arriving before the previous one was collected replaces it, so a
//! slow consumer sees the most recent frame and skips the ones in between. Memory use and latency
//! stay bounded and the acquisition thread never waits on the consumer.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::warn;

use crate::frame::{FrameBuffer, RawFrame};
use crate::sdk::FrameSink;
use crate::types::PixelFormat;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTS
// -----------------------------------------------------------------------------------------------

/// Single slot mailbox between an acquisition callback and a polling consumer.
pub struct FrameObserver {
    format: PixelFormat,

    slot: Mutex<Slot>,

    dropped: AtomicUsize,
}

struct Slot {
    frame: Option<FrameBuffer>,

    is_new: bool,
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl FrameObserver {
    /// Create an observer converting received frames to `format`.
    ///
    /// `format` must be the pixel format negotiated with the device the observer is attached to.
    pub fn new(format: PixelFormat) -> Self {
        Self {
            format,
            slot: Mutex::new(Slot {
                frame: None,
                is_new: false,
            }),
            dropped: AtomicUsize::new(0),
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Collect the latest frame.
    ///
    /// Returns `None` immediately if no frame arrived since the last call.
    pub fn get_next_frame(&self) -> Option<FrameBuffer> {
        let mut slot = self.lock();

        if !slot.is_new {
            return None;
        }

        slot.is_new = false;
        slot.frame.clone()
    }

    /// Number of frames that were replaced before being collected.
    pub fn dropped_frames(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// The slot is only ever replaced as a whole, so a poisoned lock still guards a valid frame.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrameSink for FrameObserver {
    fn on_frame_received(&self, raw: &RawFrame) {
        // Convert before locking, the consumer only waits for the swap
        let frame = match FrameBuffer::from_raw_frame(raw, self.format) {
            Ok(f) => f,
            Err(e) => {
                warn!("Cannot convert received frame: {}", e);
                return;
            }
        };

        let mut slot = self.lock();
        if slot.is_new {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        slot.frame = Some(frame);
        slot.is_new = true;
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
