//! Synchronized network time.
//!
//! The elected master periodically broadcasts its monotonic millisecond
//! counter; every other node tracks a smoothed offset so that
//! `network_time() = local_monotonic() + offset` agrees across the
//! fleet. Animations consume this value as their epoch, which is what
//! makes independent strips render in phase.
//!
//! The offset is written by the network task only and read lock-free by
//! the render task; reads tolerate being one store behind.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info};

/// Fixed one-way latency estimate added to the master's timestamp.
pub const LATENCY_COMPENSATION_MS: u32 = 15;

/// Offset jumps beyond this snap instead of smoothing.
pub const SNAP_THRESHOLD_MS: i32 = 500;

/// Exponential smoothing factor for offset updates.
pub const SMOOTHING_ALPHA: f64 = 0.2;

/// Shared clock state: monotonic base plus the replicated offset.
pub struct NetworkClock {
    start: Instant,
    offset_ms: AtomicI32,
    has_synced: AtomicBool,
}

impl NetworkClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start: Instant::now(),
            offset_ms: AtomicI32::new(0),
            has_synced: AtomicBool::new(false),
        })
    }

    /// Milliseconds since this node booted.
    pub fn local_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Common fleet time: local monotonic milliseconds plus the offset,
    /// wrapping 32-bit. On the master the offset is whatever it last
    /// learned as a slave (zero from a fresh boot), so its network time
    /// is simply its own clock.
    pub fn network_time(&self) -> u32 {
        let local = self.local_millis() as u32;
        local.wrapping_add(self.offset_ms.load(Ordering::Relaxed) as u32)
    }

    pub fn offset_ms(&self) -> i32 {
        self.offset_ms.load(Ordering::Relaxed)
    }

    /// Whether at least one TimeSync has ever been applied.
    pub fn has_synced(&self) -> bool {
        self.has_synced.load(Ordering::Relaxed)
    }

    fn store(&self, offset: i32, synced: bool) {
        self.offset_ms.store(offset, Ordering::Relaxed);
        self.has_synced.store(synced, Ordering::Relaxed);
    }
}

/// Smoothing state for inbound TimeSync samples.
///
/// Owned by the network task; pushes results into the shared
/// [`NetworkClock`].
pub struct ClockSync {
    clock: Arc<NetworkClock>,
    smoothed: f64,
    has_synced: bool,
}

impl ClockSync {
    pub fn new(clock: Arc<NetworkClock>) -> Self {
        Self {
            clock,
            smoothed: 0.0,
            has_synced: false,
        }
    }

    /// Apply one TimeSync sample from the accepted master.
    ///
    /// First sync, or a jump beyond [`SNAP_THRESHOLD_MS`], snaps the
    /// offset; otherwise an exponential filter absorbs jitter. Returns
    /// the offset now in effect.
    pub fn apply_time_sync(&mut self, master_millis: u32) -> i32 {
        let local = self.clock.local_millis() as u32;
        let compensated = master_millis.wrapping_add(LATENCY_COMPENSATION_MS);
        let instantaneous = compensated.wrapping_sub(local) as i32;

        let jump = (f64::from(instantaneous) - self.smoothed).abs() > f64::from(SNAP_THRESHOLD_MS);
        let offset = if !self.has_synced || jump {
            self.smoothed = f64::from(instantaneous);
            self.has_synced = true;
            info!(offset_ms = instantaneous, "clock hard sync");
            instantaneous
        } else {
            self.smoothed =
                SMOOTHING_ALPHA * f64::from(instantaneous) + (1.0 - SMOOTHING_ALPHA) * self.smoothed;
            let offset = self.smoothed.floor() as i32;
            debug!(offset_ms = offset, raw_ms = instantaneous, "clock smooth sync");
            offset
        };

        self.clock.store(offset, true);
        offset
    }

    pub fn has_synced(&self) -> bool {
        self.has_synced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sync() -> (ClockSync, Arc<NetworkClock>) {
        let clock = NetworkClock::new();
        (ClockSync::new(clock.clone()), clock)
    }

    #[test]
    fn test_first_sync_snaps() {
        let (mut sync, clock) = make_sync();
        assert!(!clock.has_synced());

        // Master is 10 seconds ahead of us.
        let local = clock.local_millis() as u32;
        let offset = sync.apply_time_sync(local.wrapping_add(10_000));

        assert_eq!(offset, 10_000 + LATENCY_COMPENSATION_MS as i32);
        assert_eq!(clock.offset_ms(), offset);
        assert!(clock.has_synced());
    }

    #[test]
    fn test_small_drift_is_smoothed() {
        let (mut sync, clock) = make_sync();
        let local = clock.local_millis() as u32;
        let first = sync.apply_time_sync(local.wrapping_add(1_000));

        // 100 ms of drift: the filtered offset moves toward the new
        // sample but by no more than the raw error.
        let second = sync.apply_time_sync(local.wrapping_add(1_100));
        assert!((second - first).abs() <= 100);
        assert!(second > first);
        assert_eq!(clock.offset_ms(), second);
    }

    #[test]
    fn test_large_jump_snaps_again() {
        let (mut sync, clock) = make_sync();
        let local = clock.local_millis() as u32;
        sync.apply_time_sync(local.wrapping_add(1_000));

        // A new master far from the old offset: snap, don't glide.
        let offset = sync.apply_time_sync(local.wrapping_add(60_000));
        assert_eq!(offset, 60_000 + LATENCY_COMPENSATION_MS as i32);
        assert_eq!(clock.offset_ms(), offset);
    }

    #[test]
    fn test_network_time_applies_offset() {
        let (mut sync, clock) = make_sync();
        let local = clock.local_millis() as u32;
        sync.apply_time_sync(local.wrapping_add(5_000));

        let network = clock.network_time();
        let local_now = clock.local_millis() as u32;
        let delta = network.wrapping_sub(local_now) as i32;
        assert_eq!(delta, clock.offset_ms());
    }

    #[test]
    fn test_negative_offset() {
        let (mut sync, clock) = make_sync();
        // Master booted later than us: its counter is far behind.
        // Fake it by handing a sample smaller than local time.
        std::thread::sleep(std::time::Duration::from_millis(5));
        let local = clock.local_millis() as u32;
        let offset = sync.apply_time_sync(local.wrapping_sub(2_000));
        assert_eq!(offset, -(2_000 - LATENCY_COMPENSATION_MS as i32));
        assert!(clock.offset_ms() < 0);
    }
}
