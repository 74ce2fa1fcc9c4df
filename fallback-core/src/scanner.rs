//! Periodic scanner (spec.md §4.7). Runs from a single task on a coarse
//! interval, updates per-FH stats, and reaps listener-less handles past
//! their expiry. Doubles as the shutdown-progress driver: a forced pass
//! with `now = None` zeroes every handle's expiry so the next pass
//! destroys it all down to the sentinel.

use crate::cache::FhCache;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::info;

/// Coarse scan cadence — "order of seconds" (spec.md §4.7).
pub const SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// Background task body: `tokio::spawn(run_scan_loop(cache, cancel))`.
/// Ticks until `cancel` resolves, then performs one final forced
/// (`now = None`) pass before returning, so shutdown can wait on this
/// task's join handle to know the cache has drained to the sentinel.
pub async fn run_scan_loop(cache: Arc<FhCache>, mut cancel: tokio::sync::oneshot::Receiver<()>) {
    let mut ticker = interval(SCAN_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                cache.scan(Some(Instant::now())).await;
            }
            _ = &mut cancel => {
                info!("scanner received shutdown signal; forcing final reap pass");
                cache.scan(None).await;
                return;
            }
        }
    }
}
