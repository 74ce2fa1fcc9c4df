//! The handle (`Fh`) — spec.md §3 "Handle (FH)" and component table (35%).
//! Aggregates the pieces that are shared by every listener attached to one
//! logical (mount, flags): the open descriptor, format parser, listener
//! set, stats, and bitrate meter. Immutable-after-insert fields live on
//! `Fh` directly; everything mutated per spec.md §3 lives in `FhInner`
//! behind the per-`Fh` lock.

use crate::bitrate::BitrateMeter;
use crate::collaborators::StatsHandle;
use crate::fd::PositionalFile;
use crate::finfo::FInfo;
use crate::format::FormatPlugin;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

pub type ListenerId = u64;

/// When a listener-less `Fh` should be reaped by the scanner (spec.md §3
/// invariant 2). `Never` covers "just-opened fallback" and the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    At(Instant),
}

impl Expiry {
    pub fn is_due(&self, now: Instant) -> bool {
        matches!(self, Expiry::At(t) if now >= *t)
    }
}

/// Mutable, per-`Fh` state — everything spec.md §3 says is "mutable under
/// the per-FH lock".
pub struct FhInner {
    pub refcount: u64,
    pub peak: u64,
    pub listeners: BTreeSet<ListenerId>,
    pub stats: Arc<dyn StatsHandle>,
    pub meter: BitrateMeter,
    pub expire: Expiry,
    pub prev_count: u64,
    pub stats_update: Instant,
    /// Set by `FhCache::set_override`; consulted by the sender on its next
    /// tick (spec.md §4.2, §4.6).
    pub override_dest: Option<String>,
}

impl FhInner {
    fn new(stats: Arc<dyn StatsHandle>) -> Self {
        Self {
            refcount: 0,
            peak: 0,
            listeners: BTreeSet::new(),
            stats,
            meter: BitrateMeter::new(),
            expire: Expiry::Never,
            prev_count: 0,
            stats_update: Instant::now(),
            override_dest: None,
        }
    }

    /// Debug-only assertion of spec.md §3 invariant 1.
    fn assert_refcount_matches(&self) {
        debug_assert_eq!(
            self.refcount,
            self.listeners.len() as u64,
            "refcount/listener-set mismatch"
        );
    }

    pub fn attach(&mut self, listener: ListenerId) {
        self.listeners.insert(listener);
        self.refcount += 1;
        self.peak = self.peak.max(self.refcount);
        self.expire = Expiry::Never;
        self.assert_refcount_matches();
    }

    /// Returns the new refcount after detaching.
    pub fn detach(&mut self, listener: ListenerId) -> u64 {
        let removed = self.listeners.remove(&listener);
        if removed && self.refcount > 0 {
            self.refcount -= 1;
        }
        self.assert_refcount_matches();
        self.refcount
    }
}

/// A cache entry: the open descriptor, parser, and listener set shared by
/// every listener attached to this (mount, flags).
pub struct Fh {
    pub finfo: FInfo,
    pub parser: Box<dyn FormatPlugin>,
    pub fd: Option<PositionalFile>,
    pub frame_start_pos: u64,
    /// `Arc<Mutex<..>>` rather than a bare `Mutex` so the cache's
    /// find-or-insert lock handoff (spec.md §5) can take an *owned* guard
    /// — pin the handle by locking it — before it releases the cache lock,
    /// without a self-referential struct tying the guard's lifetime to the
    /// cache lock it's replacing.
    pub inner: Arc<Mutex<FhInner>>,
}

impl Fh {
    pub fn new(
        finfo: FInfo,
        parser: Box<dyn FormatPlugin>,
        fd: Option<PositionalFile>,
        frame_start_pos: u64,
        stats: Arc<dyn StatsHandle>,
    ) -> Self {
        Self {
            finfo,
            parser,
            fd,
            frame_start_pos,
            inner: Arc::new(Mutex::new(FhInner::new(stats))),
        }
    }

    /// Builds the non-evictable sentinel `no_file` handle (spec.md §3). It
    /// carries a synthetic reference so `refcount` never reaches zero.
    pub fn sentinel(parser: Box<dyn FormatPlugin>, stats: Arc<dyn StatsHandle>) -> Self {
        let fh = Self::new(FInfo::new("", crate::key::MountFlags::empty()), parser, None, 0, stats);
        // Synthetic reference: invariant 1 notes the sentinel "adds one
        // synthetic reference (it is never reaped)". Constructed before
        // the handle is shared, so the lock is always uncontended here.
        fh.inner
            .try_lock()
            .expect("sentinel construction is uncontended")
            .refcount = 1;
        fh
    }

    pub fn is_fallback(&self) -> bool {
        self.finfo.is_fallback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NullStatsHandle;
    use crate::format::RawFormat;
    use crate::key::MountFlags;

    fn test_fh() -> Fh {
        Fh::new(
            FInfo::new("/a.mp3", MountFlags::empty()),
            Box::new(RawFormat::default()),
            None,
            0,
            Arc::new(NullStatsHandle),
        )
    }

    #[tokio::test]
    async fn attach_and_detach_keep_refcount_in_sync() {
        let fh = test_fh();
        {
            let mut inner = fh.inner.lock().await;
            inner.attach(1);
            inner.attach(2);
            assert_eq!(inner.refcount, 2);
            assert_eq!(inner.peak, 2);
        }
        let mut inner = fh.inner.lock().await;
        let remaining = inner.detach(1);
        assert_eq!(remaining, 1);
        assert_eq!(inner.listeners.len(), 1);
    }

    #[tokio::test]
    async fn sentinel_has_synthetic_refcount_of_one() {
        let fh = Fh::sentinel(Box::new(RawFormat::default()), Arc::new(NullStatsHandle));
        let inner = fh.inner.lock().await;
        assert_eq!(inner.refcount, 1);
        assert!(inner.listeners.is_empty());
    }

    #[tokio::test]
    async fn expire_never_is_not_due() {
        assert!(!Expiry::Never.is_due(Instant::now()));
        assert!(Expiry::At(Instant::now() - std::time::Duration::from_secs(1)).is_due(Instant::now()));
    }
}
