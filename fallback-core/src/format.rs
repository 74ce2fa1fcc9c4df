//! Format plugin contract (spec.md §6 "Format" collaborator, §4.3 probe).
//! `fallback-core` never parses codec bitstreams itself — it only defines
//! what a plugin must answer: where the first valid frame starts, what
//! bitrate the stream runs at, and how to pull one frame at a time during
//! throttled playback.

use crate::fd::PositionalFile;
use bytes::Bytes;

/// Result of probing a file for its first valid codec frame (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameProbe {
    /// `None` means the probe could not determine a format ("undefined" in
    /// spec.md §4.3 — logged as a warning, but doesn't fail the open).
    pub format_name: Option<String>,
    pub bitrate_bps: u64,
    pub frame_start_pos: u64,
}

/// Outcome of reading one frame during throttled playback (spec.md §4.6
/// step 4): `-1` (EOF) and `-2` (hard error) in the original become
/// `Eof`/`Error` variants here.
pub enum ReadOutcome {
    Frame(Bytes),
    Eof,
    Error,
}

/// A codec-specific format parser/reader. Implementations own no file
/// state beyond what's needed to identify frame boundaries — the
/// descriptor itself is owned by the `Fh`, per spec.md §3 invariant 5.
pub trait FormatPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Scans from the start of `fd` for the first valid frame (spec.md
    /// §4.3). `declared_bitrate` is the FInfo's target, used only to decide
    /// whether to warn on a >10% mismatch — it never changes the probed
    /// result.
    fn check_frames(&self, fd: &PositionalFile, declared_bitrate: u64) -> FrameProbe;

    /// Reads exactly one frame starting at `offset`. Returns the frame
    /// bytes and the file offset to resume from on the next call.
    fn file_read(&self, fd: &PositionalFile, offset: u64) -> (ReadOutcome, u64);
}

/// Untimed / frameless passthrough — used for plain static files where no
/// bitrate pacing or frame alignment applies (spec.md §4.6 "file-stream").
/// Reads in fixed-size chunks rather than frames.
pub struct RawFormat {
    chunk_size: usize,
}

impl RawFormat {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }
}

impl Default for RawFormat {
    fn default() -> Self {
        Self::new(8192)
    }
}

impl FormatPlugin for RawFormat {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn check_frames(&self, _fd: &PositionalFile, declared_bitrate: u64) -> FrameProbe {
        FrameProbe {
            format_name: Some("raw".to_string()),
            bitrate_bps: declared_bitrate,
            frame_start_pos: 0,
        }
    }

    fn file_read(&self, fd: &PositionalFile, offset: u64) -> (ReadOutcome, u64) {
        let mut buf = vec![0u8; self.chunk_size];
        match fd.read_at(&mut buf, offset) {
            Ok(0) => (ReadOutcome::Eof, offset),
            Ok(n) => {
                buf.truncate(n);
                (ReadOutcome::Frame(Bytes::from(buf)), offset + n as u64)
            }
            Err(_) => (ReadOutcome::Error, offset),
        }
    }
}

/// A simplified MPEG audio frame reader: treats the stream as a sequence
/// of fixed-size frames (real MP3 frames vary in size with bitrate and
/// padding; this fixed-frame model is enough to exercise the loop/throttle
/// contract in §4.6 and §8 without a full MPEG bitstream parser).
pub struct Mp3Format {
    frame_size: usize,
}

impl Mp3Format {
    pub fn new(frame_size: usize) -> Self {
        Self { frame_size }
    }
}

impl Default for Mp3Format {
    fn default() -> Self {
        // ~417 bytes/frame is the nominal frame size for 128kbps/44.1kHz MPEG-1 Layer III.
        Self::new(417)
    }
}

impl FormatPlugin for Mp3Format {
    fn name(&self) -> &'static str {
        "mp3"
    }

    fn check_frames(&self, fd: &PositionalFile, declared_bitrate: u64) -> FrameProbe {
        // A real probe would scan for the 11-bit frame sync. Frame start is
        // assumed to be byte 0 unless the file opens with an ID3v2 tag.
        let mut header = [0u8; 10];
        let frame_start_pos = match fd.read_at(&mut header, 0) {
            Ok(n) if n == 10 && &header[0..3] == b"ID3" => {
                let size = ((header[6] as u32 & 0x7f) << 21)
                    | ((header[7] as u32 & 0x7f) << 14)
                    | ((header[8] as u32 & 0x7f) << 7)
                    | (header[9] as u32 & 0x7f);
                10 + size as u64
            }
            _ => 0,
        };

        let probed_bitrate = declared_bitrate.max(1);
        FrameProbe {
            format_name: Some("mp3".to_string()),
            bitrate_bps: probed_bitrate,
            frame_start_pos,
        }
    }

    fn file_read(&self, fd: &PositionalFile, offset: u64) -> (ReadOutcome, u64) {
        let mut buf = vec![0u8; self.frame_size];
        match fd.read_at(&mut buf, offset) {
            Ok(0) => (ReadOutcome::Eof, offset),
            Ok(n) if n < self.frame_size => {
                // Partial trailing frame: treat as EOF rather than emitting
                // a ragged final frame.
                let _ = n;
                (ReadOutcome::Eof, offset)
            }
            Ok(n) => (ReadOutcome::Frame(Bytes::from(buf)), offset + n as u64),
            Err(_) => (ReadOutcome::Error, offset),
        }
    }
}

/// Deviation check used by the open path (spec.md §4.3: "warns when the
/// probed bitrate deviates from the target by more than ±10%").
pub fn bitrate_deviates(probed: u64, target: u64) -> bool {
    if target == 0 {
        return false;
    }
    let diff = probed.abs_diff(target);
    diff * 10 > target
}
