//! Cache key: a mount string paired with the flag bitset described in
//! spec.md §3. Ordering matters — the cache is an ordered map, sorted
//! first by mount (`None`/empty sorts before any real mount), then by
//! flags, so `FhCache::scan` walks handles in a stable, predictable order.

use bitflags::bitflags;
use std::cmp::Ordering;

bitflags! {
    /// Flags that, together with a mount string, identify a cache entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct MountFlags: u8 {
        /// This handle serves fallback content for a live mount.
        const FALLBACK = 0b0001;
        /// Resolve the mount path under the admin root rather than the media root.
        const USE_ADMIN = 0b0010;
        /// Tombstoned: destroy as soon as the last listener leaves.
        const DELETE = 0b0100;
        /// A prior lookup for this (mount, flags) failed; don't retry this request.
        const MISSING = 0b1000;
    }
}

/// Cache key: `(mount, flags)`. `mount` of `None` sorts before any `Some`,
/// matching spec.md §3 ("null sorts before non-null").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub mount: Option<String>,
    pub flags: MountFlags,
}

impl CacheKey {
    pub fn new(mount: impl Into<String>, flags: MountFlags) -> Self {
        Self {
            mount: Some(mount.into()),
            flags,
        }
    }

    pub fn sentinel() -> Self {
        Self {
            mount: None,
            flags: MountFlags::empty(),
        }
    }

    /// Strips the synthetic `fallback-` / `file-` mount prefixes used by
    /// query keys (spec.md §4.2, §6), OR-ing `FALLBACK` into the returned
    /// flags when the `fallback-` prefix was present. Returns the key
    /// unchanged (prefix intact) if neither prefix matches.
    pub fn from_query(mount: &str, flags: MountFlags) -> Self {
        if let Some(stripped) = mount.strip_prefix("fallback-") {
            Self::new(stripped, flags | MountFlags::FALLBACK)
        } else if let Some(stripped) = mount.strip_prefix("file-") {
            Self::new(stripped, flags)
        } else {
            Self::new(mount, flags)
        }
    }
}

impl PartialOrd for CacheKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CacheKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.mount, &other.mount) {
            (None, None) => self.flags.bits().cmp(&other.flags.bits()),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b).then(self.flags.bits().cmp(&other.flags.bits())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_sorts_before_any_real_mount() {
        let sentinel = CacheKey::sentinel();
        let real = CacheKey::new("/live", MountFlags::FALLBACK);
        assert!(sentinel < real);
    }

    #[test]
    fn ordering_is_mount_then_flags() {
        let a = CacheKey::new("/live", MountFlags::empty());
        let b = CacheKey::new("/live", MountFlags::FALLBACK);
        let c = CacheKey::new("/zzz", MountFlags::empty());
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn from_query_strips_fallback_prefix_and_sets_flag() {
        let key = CacheKey::from_query("fallback-/live", MountFlags::empty());
        assert_eq!(key.mount.as_deref(), Some("/live"));
        assert!(key.flags.contains(MountFlags::FALLBACK));
    }

    #[test]
    fn from_query_strips_file_prefix_without_fallback_flag() {
        let key = CacheKey::from_query("file-/a.mp3", MountFlags::empty());
        assert_eq!(key.mount.as_deref(), Some("/a.mp3"));
        assert!(!key.flags.contains(MountFlags::FALLBACK));
    }

    #[test]
    fn from_query_passes_through_unprefixed_mounts() {
        let key = CacheKey::from_query("/a.mp3", MountFlags::empty());
        assert_eq!(key.mount.as_deref(), Some("/a.mp3"));
    }
}
