//! File descriptor wrapper: positional (offset-based) reads, open/close
//! (spec.md component table). Owned by exactly one `Fh` (spec.md §3
//! invariant 5); listeners never touch it directly, only through
//! `sender::tick`.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// A file opened for positional reads. Doesn't track an internal cursor —
/// every read specifies its offset explicitly, so concurrent reads from
/// different listeners sharing one `Fh` never race on a shared seek
/// position (spec.md §5 "Ordering guarantees").
#[derive(Debug)]
pub struct PositionalFile {
    file: File,
    len: u64,
}

impl PositionalFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads up to `buf.len()` bytes starting at `offset`. Returns the
    /// number of bytes read; `0` means end-of-file.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let remaining = (self.len - offset) as usize;
        let want = buf.len().min(remaining);
        self.file.read_at(&mut buf[..want], offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_are_independent_of_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::File::create(&path).unwrap().write_all(b"0123456789").unwrap();

        let pf = PositionalFile::open(&path).unwrap();
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        let na = pf.read_at(&mut a, 0).unwrap();
        let nb = pf.read_at(&mut b, 6).unwrap();
        assert_eq!(&a[..na], b"0123");
        assert_eq!(&b[..nb], b"6789");
    }

    #[test]
    fn read_past_eof_returns_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::File::create(&path).unwrap().write_all(b"abc").unwrap();
        let pf = PositionalFile::open(&path).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(pf.read_at(&mut buf, 3).unwrap(), 0);
        assert_eq!(pf.read_at(&mut buf, 100).unwrap(), 0);
    }
}
