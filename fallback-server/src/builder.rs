//! The concrete `FhBuilder` (spec.md §6 "Format" + path-resolution
//! collaborators): resolves a mount against the configured media/admin
//! roots, looks up its content type through a `MimeRegistry`, and picks
//! between the raw byte-stream and MP3 frame readers.

use fallback_core::{finfo::resolve_mount_path, FInfo, FhBuilder, FormatPlugin, MimeRegistry, Mp3Format, RawFormat};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct FileBuilder {
    media_root: PathBuf,
    admin_root: PathBuf,
    mime: Arc<MimeRegistry>,
}

impl FileBuilder {
    pub fn new(media_root: PathBuf, admin_root: PathBuf, mime: Arc<MimeRegistry>) -> Self {
        Self {
            media_root,
            admin_root,
            mime,
        }
    }

    fn extension(path: &Path) -> Option<&str> {
        path.extension().and_then(|e| e.to_str())
    }
}

impl FhBuilder for FileBuilder {
    fn resolve_path(&self, finfo: &FInfo) -> Option<PathBuf> {
        let path = resolve_mount_path(&self.media_root, &self.admin_root, finfo);
        path.is_file().then_some(path)
    }

    /// Picks a parser by the caller's declared format first (spec.md §4.3),
    /// falling back to the file extension, and finally to the untimed raw
    /// reader when neither tells us anything.
    fn select_format(&self, finfo: &FInfo) -> Box<dyn FormatPlugin> {
        let declared = match &finfo.format {
            fallback_core::DeclaredFormat::Named(name) => Some(name.as_str()),
            fallback_core::DeclaredFormat::Undefined => None,
        };
        let path = resolve_mount_path(&self.media_root, &self.admin_root, finfo);
        let ext = Self::extension(&path);

        match declared.or(ext).map(str::to_ascii_lowercase).as_deref() {
            Some("mp3") => Box::new(Mp3Format::default()),
            _ => Box::new(RawFormat::default()),
        }
    }

    fn content_type_for(&self, path: &Path) -> String {
        Self::extension(path)
            .map(|ext| self.mime.lookup(ext))
            .unwrap_or_else(|| self.mime.lookup(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fallback_core::key::MountFlags;
    use std::io::Write;

    fn fixture() -> (tempfile::TempDir, FileBuilder) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("a.mp3"))
            .unwrap()
            .write_all(&[0u8; 8])
            .unwrap();
        let builder = FileBuilder::new(dir.path().to_path_buf(), dir.path().join("admin"), Arc::new(MimeRegistry::new()));
        (dir, builder)
    }

    #[test]
    fn resolves_existing_file_under_media_root() {
        let (_dir, builder) = fixture();
        let finfo = FInfo::new("/a.mp3", MountFlags::empty());
        assert!(builder.resolve_path(&finfo).is_some());
    }

    #[test]
    fn missing_file_resolves_to_none() {
        let (_dir, builder) = fixture();
        let finfo = FInfo::new("/missing.mp3", MountFlags::empty());
        assert!(builder.resolve_path(&finfo).is_none());
    }

    #[test]
    fn mp3_extension_selects_mp3_format() {
        let (_dir, builder) = fixture();
        let finfo = FInfo::new("/a.mp3", MountFlags::empty());
        assert_eq!(builder.select_format(&finfo).name(), "mp3");
    }

    #[test]
    fn content_type_falls_back_to_mime_registry() {
        let (_dir, builder) = fixture();
        let path = PathBuf::from("track.mp3");
        assert_eq!(builder.content_type_for(&path), "audio/mpeg");
    }
}
