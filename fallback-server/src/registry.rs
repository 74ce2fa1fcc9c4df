//! Tracks which connection ids are live right now and how to cancel them.
//! `fallback-core`'s `FhInner::listeners` is only a `BTreeSet<u64>` — it
//! knows *who* is attached, not how to reach them. `kill_client` and
//! `list_clients` (spec.md §6 outward contracts) need the latter, so the
//! embedder keeps this side table, mirroring the teacher's
//! `ConnectionManager` (`DashMap<id, handle>` plus a by-mount index).

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

pub struct ActiveListener {
    pub mount: String,
    /// Caller-supplied identity, used only for the duplicate-login check
    /// (spec.md §4.4 step 3, §8 scenario 5). `None` if the client sent none
    /// — such clients are never considered duplicates of one another.
    pub principal: Option<String>,
    pub cancel: mpsc::Sender<()>,
}

pub struct Registry {
    next_id: AtomicU64,
    listeners: DashMap<u64, ActiveListener>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: DashMap::new(),
        }
    }

    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, id: u64, mount: String, principal: Option<String>, cancel: mpsc::Sender<()>) {
        self.listeners.insert(id, ActiveListener { mount, principal, cancel });
    }

    /// Duplicate-login policy check (spec.md §4.4 step 3): true if
    /// `principal` already has a live listener attached to `mount`.
    pub fn has_duplicate(&self, mount: &str, principal: &str) -> bool {
        self.listeners
            .iter()
            .any(|entry| entry.mount == mount && entry.principal.as_deref() == Some(principal))
    }

    pub fn remove(&self, id: u64) {
        self.listeners.remove(&id);
    }

    /// `kill_client(mount, id)` (spec.md §6): finds the listener, verifies
    /// it belongs to `mount`, and signals its cancellation. Returns
    /// whether a matching listener was found — the caller still waits for
    /// the listener's own next tick to actually terminate (spec.md §5
    /// "Cancellation").
    pub fn kill(&self, mount: &str, id: u64) -> bool {
        match self.listeners.get(&id) {
            Some(entry) if entry.mount == mount => {
                let _ = entry.cancel.try_send(());
                true
            }
            _ => false,
        }
    }

    /// `list_clients(mount)` (spec.md §6): connection ids currently
    /// attached to `mount`.
    pub fn list_for_mount(&self, mount: &str) -> Vec<u64> {
        self.listeners
            .iter()
            .filter(|entry| entry.mount == mount)
            .map(|entry| *entry.key())
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
