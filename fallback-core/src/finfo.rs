//! Caller-supplied file descriptor (spec.md §3 "FInfo").

use crate::key::MountFlags;
use std::path::PathBuf;

/// Declared/known content format of a handle. "Undefined" means the caller
/// didn't specify one — it's derived from the MIME type at open time, or
/// left unset if the format probe can't determine it (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredFormat {
    Undefined,
    Named(String),
}

impl Default for DeclaredFormat {
    fn default() -> Self {
        Self::Undefined
    }
}

/// The caller-supplied descriptor for a requested file/fallback.
#[derive(Debug, Clone)]
pub struct FInfo {
    pub mount: String,
    pub flags: MountFlags,
    /// Target bitrate in bytes/sec. `0` means untimed (no throttling).
    pub limit: u64,
    pub content_type: Option<String>,
    pub format: DeclaredFormat,
    pub file_size: u64,
    /// Present only while migrating (spec.md §4.6 "migrate").
    pub r#override: Option<String>,
}

impl FInfo {
    pub fn new(mount: impl Into<String>, flags: MountFlags) -> Self {
        Self {
            mount: mount.into(),
            flags,
            limit: 0,
            content_type: None,
            format: DeclaredFormat::Undefined,
            file_size: 0,
            r#override: None,
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_file_size(mut self, size: u64) -> Self {
        self.file_size = size;
        self
    }

    /// spec.md §4.4 step 1: "reject if `MISSING` is set or if it is a
    /// fallback with `limit == 0`".
    pub fn is_admissible(&self) -> bool {
        if self.flags.contains(MountFlags::MISSING) {
            return false;
        }
        if self.flags.contains(MountFlags::FALLBACK) && self.limit == 0 {
            return false;
        }
        true
    }

    pub fn is_fallback(&self) -> bool {
        self.flags.contains(MountFlags::FALLBACK)
    }
}

/// Resolves a filesystem path for a mount. In a real deployment this
/// consults the media/admin roots (spec.md §3 `USE_ADMIN` flag); kept as a
/// free function here so tests can exercise it directly. `fallback-server`
/// supplies the roots.
pub fn resolve_mount_path(media_root: &std::path::Path, admin_root: &std::path::Path, finfo: &FInfo) -> PathBuf {
    let root = if finfo.flags.contains(MountFlags::USE_ADMIN) {
        admin_root
    } else {
        media_root
    };
    let relative = finfo.mount.trim_start_matches('/');
    root.join(relative)
}
