//! MIME registry (spec.md §4.1). Thread-safe extension -> content-type
//! mapping with atomic hot reload: build a fresh map, then swap it in
//! under a short lock so lookups never observe a half-built table.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

const DEFAULT_TYPE: &str = "application/octet-stream";
const MAX_LINE_LEN: usize = 4096;

fn builtin_defaults() -> HashMap<String, String> {
    [
        ("mp3", "audio/mpeg"),
        ("ogg", "application/ogg"),
        ("oga", "audio/ogg"),
        ("ogv", "video/ogg"),
        ("opus", "audio/opus"),
        ("flac", "audio/flac"),
        ("wav", "audio/wav"),
        ("aac", "audio/aac"),
        ("m3u", "audio/x-mpegurl"),
        ("m3u8", "application/vnd.apple.mpegurl"),
        ("xspf", "application/xspf+xml"),
        ("xml", "text/xml"),
        ("html", "text/html"),
        ("txt", "text/plain"),
    ]
    .into_iter()
    .map(|(ext, ty)| (ext.to_string(), ty.to_string()))
    .collect()
}

/// Extension -> content-type table, swapped atomically on reload.
pub struct MimeRegistry {
    inner: RwLock<Arc<HashMap<String, String>>>,
}

impl MimeRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(builtin_defaults())),
        }
    }

    /// Returns an owned copy of the content-type for `extension`, defaulting
    /// to `application/octet-stream` when unknown.
    pub fn lookup(&self, extension: &str) -> String {
        let ext = extension.to_ascii_lowercase();
        self.inner
            .read()
            .get(&ext)
            .cloned()
            .unwrap_or_else(|| DEFAULT_TYPE.to_string())
    }

    /// Reverse lookup: first extension registered for `content_type`, used
    /// when generating playlist filenames (spec.md §4.1).
    pub fn extension_for(&self, content_type: &str) -> Option<String> {
        self.inner
            .read()
            .iter()
            .find(|(_, ty)| ty.as_str() == content_type)
            .map(|(ext, _)| ext.clone())
    }

    /// Reload from built-in defaults plus an optional MIME file
    /// (`type ext1 ext2 …`, `#` comments, blank lines skipped, per spec.md
    /// §6). Builds the new map off to the side, then swaps it in — the old
    /// map is simply dropped (freed) once the last `Arc` clone is gone.
    pub fn reload(&self, mime_file: Option<&Path>) -> std::io::Result<()> {
        let mut map = builtin_defaults();
        if let Some(path) = mime_file {
            let contents = std::fs::read_to_string(path)?;
            parse_mime_file(&contents, &mut map);
        }
        *self.inner.write() = Arc::new(map);
        Ok(())
    }
}

impl Default for MimeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_mime_file(contents: &str, map: &mut HashMap<String, String>) {
    for (lineno, line) in contents.lines().enumerate() {
        if line.len() > MAX_LINE_LEN {
            warn!("mime file line {} exceeds {} bytes, skipping", lineno + 1, MAX_LINE_LEN);
            continue;
        }
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(content_type) = parts.next() else {
            continue;
        };
        for ext in parts {
            map.insert(ext.to_ascii_lowercase(), content_type.to_string());
        }
    }
}
