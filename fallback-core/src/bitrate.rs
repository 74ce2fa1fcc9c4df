//! Sliding-window byte counter / average rate meter (spec.md component
//! table). One meter lives on each throttled `Fh` (the "outgoing-bitrate
//! meter") and one is process-wide (the "global" meter §4.6 throttle_sends
//! and §9 "Global bitrate sampling reduction" refer to).

use std::time::{Duration, Instant};

const WINDOW_SECS: usize = 8;

/// A ring of one-second byte buckets. `rate_bps` averages over however many
/// buckets are currently populated, so a freshly-reset meter doesn't report
/// a misleadingly high rate from a single early byte.
pub struct BitrateMeter {
    buckets: Vec<u64>,
    bucket_start: Instant,
    window: usize,
}

impl BitrateMeter {
    pub fn new() -> Self {
        Self::with_window(WINDOW_SECS)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            buckets: vec![0; window.max(1)],
            bucket_start: Instant::now(),
            window: window.max(1),
        }
    }

    fn advance(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.bucket_start).as_secs() as usize;
        if elapsed == 0 {
            return;
        }
        let shift = elapsed.min(self.buckets.len());
        self.buckets.rotate_left(shift);
        for slot in self.buckets.iter_mut().rev().take(shift) {
            *slot = 0;
        }
        self.bucket_start = now;
    }

    pub fn add(&mut self, bytes: u64) {
        self.add_at(bytes, Instant::now());
    }

    pub fn add_at(&mut self, bytes: u64, now: Instant) {
        self.advance(now);
        if let Some(last) = self.buckets.last_mut() {
            *last += bytes;
        }
    }

    /// Average bytes/sec over the populated window.
    pub fn rate_bps(&self) -> u64 {
        let total: u64 = self.buckets.iter().sum();
        total / self.window as u64
    }

    /// Shrinks the window so a newly started session doesn't distort the
    /// average (spec.md §9 "Global bitrate sampling reduction"). Shrinking
    /// also zeroes the retained buckets, matching "re-arm a fresh outgoing
    /// bitrate meter" in spec.md §4.5.
    pub fn shrink(&mut self, window: usize) {
        self.window = window.max(1);
        self.buckets = vec![0; self.window];
        self.bucket_start = Instant::now();
    }

    pub fn reset(&mut self) {
        for slot in &mut self.buckets {
            *slot = 0;
        }
        self.bucket_start = Instant::now();
    }
}

impl Default for BitrateMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// `1000 / (limit / chunk)` style pacing helper used throughout the
/// throttled sender (spec.md §4.6), expressed once so every call site uses
/// the same floor.
pub fn pacing_delay(limit_bps: u64, chunk: u64, floor_ms: u64) -> Duration {
    if limit_bps == 0 {
        return Duration::from_millis(floor_ms);
    }
    let per_chunk_ms = 1000u64.saturating_mul(chunk) / limit_bps.max(1);
    Duration::from_millis(per_chunk_ms.max(floor_ms))
}
