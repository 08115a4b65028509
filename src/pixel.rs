//! Pixel driver seam.
//!
//! The strip hardware lives behind this trait: the scheduler hands it a
//! finished frame, the driver pushes bits on the data line. Real
//! implementations are platform glue outside this crate.

use tracing::debug;

use crate::color::Rgb;

/// Hardware interface consumed by the render scheduler.
pub trait PixelDriver: Send {
    /// One-time hardware initialization.
    fn begin(&mut self) {}

    /// Push one complete frame to the strip.
    fn push(&mut self, pixels: &[Rgb]);

    /// Entering or leaving the upgrade window; drivers typically park
    /// the data line.
    fn set_ota_mode(&mut self, _enabled: bool) {}
}

/// Driver that discards frames; used headless and in tests.
#[derive(Default)]
pub struct NullPixelDriver {
    frames: u64,
}

impl NullPixelDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_pushed(&self) -> u64 {
        self.frames
    }
}

impl PixelDriver for NullPixelDriver {
    fn push(&mut self, _pixels: &[Rgb]) {
        self.frames += 1;
        if self.frames % 6000 == 0 {
            debug!(frames = self.frames, "render heartbeat");
        }
    }
}
