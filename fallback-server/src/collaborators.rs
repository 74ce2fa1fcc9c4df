//! Concrete collaborator implementations (spec.md §6 "inward" contracts).
//! Minimal by design: the core's Non-goals exclude authentication and
//! cross-process clustering, so `NoopAuth`/`LocalMover` are intentionally
//! thin rather than stubs-pending-implementation.

use dashmap::DashMap;
use fallback_core::{AuthCollaborator, MountConfig, MountConfigProvider, MoveCollaborator, Ownership, StatsHandle, StatsSink};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Per-mount policy, held in memory. Real deployments would source this
/// from the bootstrap config file; here it's populated once at startup
/// and consulted read-only, matching spec.md §6's `find_mount`.
pub struct InMemoryMountConfigProvider {
    mounts: DashMap<String, MountConfig>,
    default: MountConfig,
}

impl InMemoryMountConfigProvider {
    pub fn new(default: MountConfig) -> Self {
        Self {
            mounts: DashMap::new(),
            default,
        }
    }

    pub fn set(&self, mount: impl Into<String>, cfg: MountConfig) {
        self.mounts.insert(mount.into(), cfg);
    }
}

impl MountConfigProvider for InMemoryMountConfigProvider {
    fn find_mount(&self, mount: &str) -> Option<MountConfig> {
        Some(self.mounts.get(mount).map(|c| c.clone()).unwrap_or_else(|| self.default.clone()))
    }
}

/// Publishes per-handle stats through `tracing` rather than an external
/// metrics sink (spec.md §6 "Stats"; SPEC_FULL.md notes this stays an
/// ambient logging concern rather than a new metrics pipeline).
pub struct TracingStatsHandle {
    mount: String,
    listeners: AtomicI64,
    peak: AtomicI64,
    kbitrate: AtomicU64,
}

impl StatsHandle for TracingStatsHandle {
    fn set_listeners(&self, count: i64, peak: i64) {
        self.listeners.store(count, Ordering::Relaxed);
        self.peak.store(peak, Ordering::Relaxed);
        debug!(mount = %self.mount, listeners = count, peak, "stats update");
    }

    fn set_kbitrate(&self, kbps: u64) {
        self.kbitrate.store(kbps, Ordering::Relaxed);
        debug!(mount = %self.mount, kbitrate = kbps, "bitrate update");
    }

    fn disable(&self) {
        info!(mount = %self.mount, "stats disabled (fallback handle emptied)");
    }
}

pub struct TracingStatsSink;

impl StatsSink for TracingStatsSink {
    fn handle(&self, mount: &str) -> Arc<dyn StatsHandle> {
        Arc::new(TracingStatsHandle {
            mount: mount.to_string(),
            listeners: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            kbitrate: AtomicU64::new(0),
        })
    }
}

/// No authentication is modeled (spec.md §1 Non-goals): every departure
/// releases its listener unconditionally rather than attempting to rebind
/// it to a reappeared live source.
pub struct NoopAuth;

#[async_trait::async_trait]
impl AuthCollaborator for NoopAuth {
    async fn release_listener(&self, _listener_id: u64, _mount: &str) -> Ownership {
        Ownership::Release
    }
}

/// Single-process deployment (spec.md §1 Non-goals: "no clustering/shared
/// cache across processes"), so rebinding a migrating listener is just a
/// policy stamp — the actual cache re-open happens in the caller's own
/// connection loop, which already owns the listener's sink.
pub struct LocalMover;

#[async_trait::async_trait]
impl MoveCollaborator for LocalMover {
    async fn move_listener(&self, listener_id: u64, target_mount: &str) -> bool {
        debug!(listener = listener_id, target = %target_mount, "migration approved");
        true
    }
}
