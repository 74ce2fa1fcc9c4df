//! Inward collaborator contracts (spec.md §6). `fallback-core` depends on
//! these traits, never on a concrete auth/config/stats implementation —
//! the embedder (`fallback-server`) supplies them.

use async_trait::async_trait;

/// Per-mount policy, supplied by the `Config` collaborator's
/// `find_mount`.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// `None` means unlimited. `Some(0)` means fallback admission is
    /// disabled for this mount (spec.md §4.4 step 4).
    pub max_listeners: Option<i64>,
    pub allow_duplicate_login: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            max_listeners: None,
            allow_duplicate_login: true,
        }
    }
}

/// `Config::find_mount` (spec.md §6).
pub trait MountConfigProvider: Send + Sync {
    fn find_mount(&self, mount: &str) -> Option<MountConfig>;
}

/// `Auth::release_listener` (spec.md §6, §4.5). A negative result means
/// "I took ownership of this departure; don't destroy the client" — mapped
/// here to `Ownership::Retained` instead of a signed integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Caller should destroy the client as usual.
    Release,
    /// The collaborator took ownership (e.g. rebound the listener to a
    /// live mount that reappeared).
    Retained,
}

#[async_trait]
pub trait AuthCollaborator: Send + Sync {
    async fn release_listener(&self, listener_id: u64, mount: &str) -> Ownership;
}

/// `Move::move_listener` (spec.md §6, §4.6 "migrate"). Negative in the
/// original means "refuse, terminate" — `false` here.
#[async_trait]
pub trait MoveCollaborator: Send + Sync {
    async fn move_listener(&self, listener_id: u64, target_mount: &str) -> bool;
}

/// A single stats handle for one mount (spec.md §6 "Stats").
pub trait StatsHandle: Send + Sync {
    fn set_listeners(&self, count: i64, peak: i64);
    fn set_kbitrate(&self, kbps: u64);
    fn disable(&self);
}

/// `Stats::handle(name)` (spec.md §6).
pub trait StatsSink: Send + Sync {
    fn handle(&self, mount: &str) -> std::sync::Arc<dyn StatsHandle>;
}

/// A stats handle that does nothing — used by default and in unit tests
/// that don't care about stats emission.
pub struct NullStatsHandle;
impl StatsHandle for NullStatsHandle {
    fn set_listeners(&self, _count: i64, _peak: i64) {}
    fn set_kbitrate(&self, _kbps: u64) {}
    fn disable(&self) {}
}

pub struct NullStatsSink;
impl StatsSink for NullStatsSink {
    fn handle(&self, _mount: &str) -> std::sync::Arc<dyn StatsHandle> {
        std::sync::Arc::new(NullStatsHandle)
    }
}
