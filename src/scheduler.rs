//! Fixed-rate render scheduler.
//!
//! A dedicated task ticks every 10 ms, derives the shared epoch from
//! network time, renders the current animation (or black when powered
//! off) and pushes the frame to the pixel driver. During an OTA window
//! the task stops producing frames entirely.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;

use crate::animation::AnimationManager;
use crate::clock::NetworkClock;
use crate::color::Rgb;
use crate::pixel::PixelDriver;

/// Render tick period.
pub const RENDER_TICK_MS: u64 = 10;

/// The render loop and the state it owns.
pub struct RenderScheduler {
    clock: Arc<NetworkClock>,
    animations: Arc<Mutex<AnimationManager>>,
    driver: Box<dyn PixelDriver>,
    pixels: Vec<Rgb>,
    ota_halt: Arc<AtomicBool>,
}

impl RenderScheduler {
    pub fn new(
        clock: Arc<NetworkClock>,
        animations: Arc<Mutex<AnimationManager>>,
        driver: Box<dyn PixelDriver>,
        num_leds: usize,
        ota_halt: Arc<AtomicBool>,
    ) -> Self {
        Self {
            clock,
            animations,
            driver,
            pixels: vec![Rgb::BLACK; num_leds],
            ota_halt,
        }
    }

    /// Run until the task is dropped.
    pub async fn run(mut self) {
        self.driver.begin();

        let mut tick = interval(Duration::from_millis(RENDER_TICK_MS));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(leds = self.pixels.len(), "render scheduler started");

        let mut in_ota = false;
        loop {
            tick.tick().await;

            let halted = self.ota_halt.load(Ordering::Relaxed);
            if halted != in_ota {
                in_ota = halted;
                self.driver.set_ota_mode(halted);
            }
            if halted {
                continue;
            }

            let epoch = self.clock.network_time() / 10;
            {
                let mut animations = self.animations.lock().unwrap();
                if animations.power() {
                    animations.render(epoch, &mut self.pixels);
                } else {
                    self.pixels.fill(Rgb::BLACK);
                }
            }
            self.driver.push(&self.pixels);
        }
    }
}
