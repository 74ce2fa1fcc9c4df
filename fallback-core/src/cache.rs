//! FH cache (spec.md §4.2; component table, 20%). An ordered map under a
//! reader/writer lock, with the find-or-insert lock-handoff idiom from
//! spec.md §5: "take inner, drop outer" so a handle observed through the
//! cache can always be pinned without racing the scanner's reaper pass.

use crate::collaborators::{MountConfig, StatsSink};
use crate::errors::FallbackError;
use crate::finfo::FInfo;
use crate::format::{bitrate_deviates, FormatPlugin};
use crate::handle::{Expiry, Fh, FhInner};
use crate::key::{CacheKey, MountFlags};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedMutexGuard, RwLock};
use tracing::{info, warn};

/// What it takes to construct a brand-new `Fh` for a cache miss: resolve
/// the mount to a path, open it, and probe its format (spec.md §4.3).
/// Implemented by `fallback-server` (path resolution + real format
/// plugins); kept as a trait so `fallback-core` never touches a
/// filesystem-layout policy of its own.
pub trait FhBuilder: Send + Sync {
    fn resolve_path(&self, finfo: &FInfo) -> Option<PathBuf>;
    /// Picks a format plugin for the resolved content type / declared
    /// format. Returning `None` means "format undefined" (spec.md §4.3) —
    /// the open still proceeds, just without a parser capable of framed
    /// reads (falls back to raw byte streaming).
    fn select_format(&self, finfo: &FInfo) -> Box<dyn FormatPlugin>;
    fn content_type_for(&self, path: &std::path::Path) -> String;
}

/// Handle pinned under a fresh lock, with the cache lock already released
/// — the result of the lock-handoff idiom.
pub struct PinnedFh {
    pub fh: Arc<Fh>,
    pub guard: OwnedMutexGuard<FhInner>,
}

pub struct FhCache {
    map: RwLock<BTreeMap<CacheKey, Arc<Fh>>>,
    stats: Arc<dyn StatsSink>,
    builder: Arc<dyn FhBuilder>,
    /// Seconds a listener-less non-DELETE handle lingers before expiry
    /// (spec.md §4.5: "set `expire = now + 120s`").
    expire_after: Duration,
}

impl FhCache {
    pub fn new(stats: Arc<dyn StatsSink>, builder: Arc<dyn FhBuilder>) -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
            stats,
            builder,
            expire_after: Duration::from_secs(120),
        }
    }

    #[cfg(test)]
    pub fn with_expiry(stats: Arc<dyn StatsSink>, builder: Arc<dyn FhBuilder>, expire_after: Duration) -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
            stats,
            builder,
            expire_after,
        }
    }

    fn probe_key(finfo: &FInfo) -> CacheKey {
        CacheKey::from_query(&finfo.mount, finfo.flags)
    }

    /// `find` (spec.md §4.2): read- or write-locked by the caller (taking
    /// the cache's own read lock here), returns the matched `Fh` without
    /// taking its per-handle lock.
    pub async fn find(&self, finfo: &FInfo) -> Option<Arc<Fh>> {
        let key = Self::probe_key(finfo);
        self.map.read().await.get(&key).cloned()
    }

    /// Non-blocking variant of `find`, used by `query_count`/`contains`
    /// style callers that must not wait on a write-locked cache (spec.md
    /// §6 `contains`, §7 "would-block"). Returns `Err(WouldBlock)` rather
    /// than blocking.
    pub fn try_find(&self, finfo: &FInfo) -> Result<Option<Arc<Fh>>, FallbackError> {
        let key = Self::probe_key(finfo);
        match self.map.try_read() {
            Ok(guard) => Ok(guard.get(&key).cloned()),
            Err(_) => Err(FallbackError::WouldBlock),
        }
    }

    /// `open` (spec.md §4.2). On hit, pins and returns the existing handle
    /// (or `FormatMismatch` if the caller wants `FALLBACK` and the existing
    /// format conflicts). On miss, builds and inserts a new handle.
    pub async fn open(&self, finfo: &FInfo, mountcfg: &MountConfig) -> Result<PinnedFh, FallbackError> {
        let key = Self::probe_key(finfo);
        let mut map = self.map.write().await;

        if let Some(existing) = map.get(&key) {
            if finfo.is_fallback() && existing.is_fallback() {
                if let Some(declared) = finfo.content_type.as_deref()
                    && let Some(existing_type) = existing.finfo.content_type.as_deref()
                    && declared != existing_type
                {
                    return Err(FallbackError::FormatMismatch);
                }
            }
            let fh = existing.clone();
            // Take inner, *then* drop outer: the handle can't be reaped by
            // the scanner once we hold this guard, because the scanner
            // also needs the cache write lock we're still holding.
            let guard = fh.inner.clone().lock_owned().await;
            drop(map);
            return Ok(PinnedFh { fh, guard });
        }

        let _ = mountcfg; // capacity/duplicate-login checks happen in setup_client, not here.
        let path = self
            .builder
            .resolve_path(finfo)
            .ok_or_else(|| FallbackError::NotFound(finfo.mount.clone()))?;

        let fd = crate::fd::PositionalFile::open(&path).map_err(|_| FallbackError::NotFound(finfo.mount.clone()))?;
        let content_type = self.builder.content_type_for(&path);
        let parser = self.builder.select_format(finfo);

        let probe = parser.check_frames(&fd, finfo.limit);
        if probe.format_name.is_none() {
            warn!(mount = %finfo.mount, "format probe returned undefined; serving unframed");
        } else if finfo.limit > 0 && bitrate_deviates(probe.bitrate_bps, finfo.limit) {
            warn!(
                mount = %finfo.mount,
                probed = probe.bitrate_bps,
                target = finfo.limit,
                "probed bitrate deviates from target by more than 10%"
            );
        }

        let mut built_finfo = finfo.clone();
        built_finfo.content_type.get_or_insert(content_type);
        built_finfo.file_size = fd.len();

        let stats = self.stats.handle(&finfo.mount);
        let fh = Arc::new(Fh::new(built_finfo, parser, Some(fd), probe.frame_start_pos, stats));
        let guard = fh.inner.clone().lock_owned().await;
        map.insert(key, fh.clone());
        drop(map);

        info!(mount = %finfo.mount, fallback = finfo.is_fallback(), "opened new handle");
        Ok(PinnedFh { fh, guard })
    }

    /// `scan(now)` (spec.md §4.2, §4.7). `now = None` signals shutdown:
    /// every handle's expiry is forced to "due now" so the next pass
    /// destroys it.
    pub async fn scan(&self, now: Option<Instant>) {
        let mut map = self.map.write().await;
        let mut to_remove = Vec::new();

        for (key, fh) in map.iter() {
            let mut inner = fh.inner.lock().await;

            if inner.refcount != inner.prev_count
                || now.is_some_and(|n| n >= inner.stats_update)
            {
                inner.stats.set_listeners(inner.refcount as i64, inner.peak as i64);
                inner.stats.set_kbitrate(inner.meter.rate_bps() * 8 / 1000);
                inner.prev_count = inner.refcount;
                inner.stats_update = now.unwrap_or_else(Instant::now) + Duration::from_secs(5);
            }

            match now {
                None => {
                    // Shutdown: force every handle to expire immediately.
                    inner.expire = Expiry::At(Instant::now());
                }
                Some(n) => {
                    if inner.refcount == 0 && inner.expire.is_due(n) {
                        to_remove.push(key.clone());
                    }
                }
            }

            if now.is_none() && inner.refcount == 0 {
                to_remove.push(key.clone());
            }
        }

        for key in to_remove {
            if let Some(fh) = map.remove(&key) {
                info!(mount = ?key.mount, "scanner reaped expired handle");
                drop(fh);
            }
        }
    }

    /// `set_override` (spec.md §4.2): atomically redirects every listener
    /// on a fallback mount to `dest`, while giving new arrivals a fresh,
    /// empty entry under the same key.
    pub async fn set_override(&self, mount: &str, dest: &str, content_type: Option<String>) -> bool {
        let key = CacheKey::new(mount, MountFlags::FALLBACK);
        let mut map = self.map.write().await;

        let Some(old) = map.remove(&key) else {
            return false;
        };

        {
            let mut inner = old.inner.lock().await;
            inner.override_dest = Some(dest.to_string());
        }

        // The detached (tombstoned) entry drains its existing listeners on
        // their own next ticks; it isn't reinserted. A fresh entry takes
        // its place so new arrivals don't see the override.
        let stats = self.stats.handle(mount);
        let mut fresh_finfo = old.finfo.clone();
        fresh_finfo.content_type = content_type.or(fresh_finfo.content_type);
        let fresh = Arc::new(Fh::new(fresh_finfo, old.parser_clone_hint(), None, old.frame_start_pos, stats));
        map.insert(key, fresh);

        info!(mount = %mount, dest = %dest, "override installed");
        true
    }

    pub async fn len(&self) -> usize {
        self.map.read().await.len()
    }

    pub async fn contains_mount(&self, mount: &str, flags: MountFlags) -> Option<bool> {
        let key = CacheKey::new(mount, flags);
        match self.map.try_read() {
            Ok(guard) => Some(guard.contains_key(&key)),
            Err(_) => None,
        }
    }
}

impl Fh {
    /// The tombstoned handle keeps serving existing listeners through its
    /// own parser/descriptor; the fresh replacement entry needs *a*
    /// parser to satisfy its own type, but never reads through it before
    /// a real listener attaches and triggers a fresh `open`. Real
    /// deployments would re-probe on first attach; this hint just avoids
    /// an `Option<Box<dyn FormatPlugin>>` everywhere for a path that's
    /// re-resolved on the next real open anyway.
    fn parser_clone_hint(&self) -> Box<dyn FormatPlugin> {
        Box::new(crate::format::RawFormat::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NullStatsSink;
    use crate::format::RawFormat;
    use crate::key::MountFlags;
    use std::io::Write;

    struct FixtureBuilder {
        root: std::path::PathBuf,
    }

    impl FhBuilder for FixtureBuilder {
        fn resolve_path(&self, finfo: &FInfo) -> Option<PathBuf> {
            let p = self.root.join(finfo.mount.trim_start_matches('/'));
            p.exists().then_some(p)
        }
        fn select_format(&self, _finfo: &FInfo) -> Box<dyn FormatPlugin> {
            Box::new(RawFormat::default())
        }
        fn content_type_for(&self, _path: &std::path::Path) -> String {
            "application/octet-stream".to_string()
        }
    }

    fn fixture() -> (tempfile::TempDir, Arc<FhCache>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("a.mp3"))
            .unwrap()
            .write_all(&[0u8; 1024])
            .unwrap();
        let builder = Arc::new(FixtureBuilder {
            root: dir.path().to_path_buf(),
        });
        let cache = Arc::new(FhCache::new(Arc::new(NullStatsSink), builder));
        (dir, cache)
    }

    #[tokio::test]
    async fn open_miss_then_hit_returns_same_handle() {
        let (_dir, cache) = fixture();
        let finfo = FInfo::new("/a.mp3", MountFlags::empty());
        let cfg = MountConfig::default();

        let first = cache.open(&finfo, &cfg).await.unwrap();
        let ptr_a = Arc::as_ptr(&first.fh);
        drop(first);

        let second = cache.open(&finfo, &cfg).await.unwrap();
        assert_eq!(ptr_a, Arc::as_ptr(&second.fh));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn open_missing_file_returns_not_found() {
        let (_dir, cache) = fixture();
        let finfo = FInfo::new("/missing.mp3", MountFlags::empty());
        let err = cache.open(&finfo, &MountConfig::default()).await.unwrap_err();
        assert_eq!(err, FallbackError::NotFound("/missing.mp3".to_string()));
    }

    #[tokio::test]
    async fn scan_reaps_expired_listenerless_handle() {
        let (_dir, cache) = fixture();
        let finfo = FInfo::new("/a.mp3", MountFlags::empty());
        let pinned = cache.open(&finfo, &MountConfig::default()).await.unwrap();
        {
            let mut guard = pinned.guard;
            guard.expire = Expiry::At(Instant::now() - Duration::from_secs(1));
        }
        drop(pinned.fh);

        cache.scan(Some(Instant::now())).await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn shutdown_scan_forces_every_handle_to_expire() {
        let (_dir, cache) = fixture();
        let finfo = FInfo::new("/a.mp3", MountFlags::empty());
        let pinned = cache.open(&finfo, &MountConfig::default()).await.unwrap();
        drop(pinned);

        cache.scan(None).await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn set_override_leaves_a_fresh_empty_entry_and_tombstones_the_old() {
        let (_dir, cache) = fixture();
        let finfo = FInfo::new("/a.mp3", MountFlags::FALLBACK).with_limit(128_000);
        let pinned = cache.open(&finfo, &MountConfig::default()).await.unwrap();
        let old_ptr = Arc::as_ptr(&pinned.fh);
        drop(pinned);

        let ok = cache.set_override("/a.mp3", "/live", None).await;
        assert!(ok);

        let fresh = cache.find(&finfo).await.unwrap();
        assert_ne!(Arc::as_ptr(&fresh), old_ptr);
        let inner = fresh.inner.lock().await;
        assert_eq!(inner.refcount, 0);
        assert!(inner.override_dest.is_none());
    }

    #[tokio::test]
    async fn try_find_reports_would_block_under_write_lock() {
        let (_dir, cache) = fixture();
        let _write_guard = cache.map.write().await;
        let finfo = FInfo::new("/a.mp3", MountFlags::empty());
        let err = cache.try_find(&finfo).unwrap_err();
        assert_eq!(err, FallbackError::WouldBlock);
    }
}
