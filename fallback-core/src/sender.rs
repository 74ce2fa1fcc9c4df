//! The sender state machine (spec.md §4.6, component table 25%). Modeled
//! as a closed tagged enum rather than virtual dispatch (spec.md §9
//! "Sender polymorphism" design note) — the three states plus the migrate
//! action are known and closed, so a `match` costs nothing a vtable would
//! save and keeps every transition visible in one place.

use crate::bitrate::{pacing_delay, BitrateMeter};
use crate::finfo::FInfo;
use crate::format::ReadOutcome;
use crate::handle::{Fh, ListenerId};
use crate::key::MountFlags;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

const BUFFER_MAX_ITERS: u32 = 8;
const BUFFER_MAX_BYTES: usize = 30_000;
const FILE_MAX_ITERS: u32 = 6;
const FILE_MAX_BYTES: usize = 48_000;
const SHORT_WRITE_FLOOR_MS: u64 = 80;
const SHORT_WRITE_CEIL_MS: u64 = 150;
const THROTTLE_ALLOWANCE_BYTES: u64 = 8192;
const THROTTLE_COUNTER_CAP: u64 = 8192;
const GLOBAL_SLOWDOWN_MS: u64 = 300;
const PACING_CHUNK_BYTES: u64 = 1400;
const LOOP_RESCHEDULE_MS: u64 = 150;

/// Where bytes actually go. `fallback-server` implements this over a real
/// socket (or a hyper/axum body channel); it owns short-write behaviour —
/// `write` returns however many bytes it actually accepted, which may be
/// less than `data.len()` (spec.md §7 "transient-io").
pub trait ListenerSink: Send {
    fn write(&mut self, data: &[u8]) -> usize;
}

/// Process-wide outgoing-bitrate meter, guarded by the innermost lock in
/// the hierarchy (spec.md §5 step 4, "used only for counter adjustments").
/// `parking_lot` rather than `tokio::sync` here: holds are microsecond-scale
/// counter bumps, never awaited across, so a plain spinning-friendly mutex
/// is the right tool — and nothing about it needs to be `try`-able the way
/// the cache/per-FH locks do.
pub type GlobalMeter = parking_lot::Mutex<BitrateMeter>;

/// The three sender states plus the migrate action (spec.md §4.6).
pub enum SenderState {
    /// Draining in-memory intro/header buffers before the file body.
    BufferContent {
        refbufs: VecDeque<Bytes>,
        offset: usize,
    },
    /// Untimed pread-and-write loop.
    FileStream { read_pos: u64, connected_at: Instant },
    /// Paced to `fh.finfo.limit` bytes/sec.
    ThrottledFileStream {
        read_pos: u64,
        timer_start: Instant,
        counter: u64,
    },
    /// Transitioning to another mount; terminal for this `Listener`.
    Migrate,
}

impl SenderState {
    /// Builds the initial state for a freshly admitted listener (spec.md
    /// §4.4 step 7: "set the sender to the buffer-content state").
    /// `backdate` matches step 5's "2-second backdate if the connection has
    /// not yet sent anything, to avoid a first-second burst".
    pub fn initial(refbufs: VecDeque<Bytes>) -> Self {
        SenderState::BufferContent { refbufs, offset: 0 }
    }
}

/// One admitted client's sender-side state. Carries no socket — writes go
/// through a caller-supplied `ListenerSink` so `tick` stays testable
/// without real I/O.
pub struct Listener {
    pub id: ListenerId,
    pub fh: Arc<Fh>,
    pub state: SenderState,
    /// Observed at the top of every tick (spec.md §5 "Cancellation").
    pub error: bool,
}

impl Listener {
    pub fn new(id: ListenerId, fh: Arc<Fh>, refbufs: VecDeque<Bytes>) -> Self {
        Self {
            id,
            fh,
            state: SenderState::initial(refbufs),
            error: false,
        }
    }

    /// Throttled listeners start their pacing window backdated by 2s
    /// (spec.md §4.4 step 5) unless `has_sent` is already true.
    pub fn arm_throttle(&mut self, read_pos: u64, has_sent: bool) {
        let backdate = if has_sent { Duration::ZERO } else { Duration::from_secs(2) };
        self.state = SenderState::ThrottledFileStream {
            read_pos,
            timer_start: Instant::now() - backdate,
            counter: 0,
        };
    }

    pub fn arm_file_stream(&mut self, read_pos: u64) {
        self.state = SenderState::FileStream {
            read_pos,
            connected_at: Instant::now(),
        };
    }
}

/// Result of one `tick` call.
pub enum Tick {
    /// Wrote `bytes` (possibly 0, e.g. a throttle-withheld tick);
    /// caller should wait `reschedule` before the next tick.
    Progressed { bytes: usize, reschedule: Duration },
    /// The FInfo to rebind to, per spec.md §4.6 "migrate": build a new
    /// FInfo from the override target, preserving limit/type and
    /// clearing `DELETE`.
    Migrate(FInfo),
    /// Sender reached a terminal condition (EOF on a non-looping stream,
    /// hard I/O error, cancellation, or a refused migration).
    Terminated,
}

/// Advances `listener` by one tick. `global_slowdown` mirrors spec.md
/// §4.6's `throttle_sends > 1` condition — computed by the caller from
/// process-wide state, since a single listener's tick has no visibility
/// into how many other throttled senders are currently active.
pub async fn tick(
    listener: &mut Listener,
    sink: &mut dyn ListenerSink,
    global_meter: &GlobalMeter,
    global_slowdown: bool,
) -> Tick {
    if listener.error {
        return Tick::Terminated;
    }

    // Override takes priority over whatever state we're in, checked once
    // per tick rather than mid-write (spec.md §4.6: "transitions happen
    // between sender ticks, never mid-write").
    let override_dest = listener.fh.inner.lock().await.override_dest.clone();
    if let Some(dest) = override_dest {
        if !matches!(listener.state, SenderState::Migrate) {
            let mut finfo = listener.fh.finfo.clone();
            finfo.mount = dest;
            finfo.flags.remove(MountFlags::DELETE);
            finfo.r#override = None;
            listener.state = SenderState::Migrate;
            return Tick::Migrate(finfo);
        }
    }

    match &mut listener.state {
        SenderState::BufferContent { .. } => tick_buffer_content(listener, sink).await,
        SenderState::FileStream { .. } => tick_file_stream(listener, sink, global_slowdown).await,
        SenderState::ThrottledFileStream { .. } => {
            tick_throttled(listener, sink, global_meter, global_slowdown).await
        }
        SenderState::Migrate => Tick::Terminated,
    }
}

async fn tick_buffer_content(listener: &mut Listener, sink: &mut dyn ListenerSink) -> Tick {
    let mut total = 0usize;

    for _ in 0..BUFFER_MAX_ITERS {
        if total >= BUFFER_MAX_BYTES {
            break;
        }

        let SenderState::BufferContent { refbufs, offset } = &mut listener.state else {
            unreachable!("tick_buffer_content called outside BufferContent");
        };

        let Some(buf) = refbufs.front() else {
            // No buffers left: hand off to the file body, if any.
            let has_fd = listener.fh.fd.is_some();
            let frame_start = listener.fh.frame_start_pos;
            let limit = listener.fh.finfo.limit;
            drop(refbufs);
            return if !has_fd {
                Tick::Terminated
            } else if limit > 0 {
                listener.arm_throttle(frame_start, false);
                Tick::Progressed {
                    bytes: total,
                    reschedule: Duration::ZERO,
                }
            } else {
                listener.arm_file_stream(frame_start);
                Tick::Progressed {
                    bytes: total,
                    reschedule: Duration::ZERO,
                }
            };
        };

        let remaining = &buf[*offset..];
        if remaining.is_empty() {
            refbufs.pop_front();
            continue;
        }

        let written = sink.write(remaining);
        total += written;
        *offset += written;
        if written < remaining.len() {
            // Short write mid-buffer: stop this tick, don't force another
            // buffer transition until the socket drains.
            return Tick::Progressed {
                bytes: total,
                reschedule: Duration::from_millis(SHORT_WRITE_FLOOR_MS),
            };
        }
        refbufs.pop_front();
        *offset = 0;
    }

    Tick::Progressed {
        bytes: total,
        reschedule: Duration::ZERO,
    }
}

async fn tick_file_stream(listener: &mut Listener, sink: &mut dyn ListenerSink, global_slowdown: bool) -> Tick {
    let SenderState::FileStream { read_pos, connected_at } = &mut listener.state else {
        unreachable!("tick_file_stream called outside FileStream");
    };
    let up_over_1s = connected_at.elapsed() > Duration::from_secs(1);

    if global_slowdown && up_over_1s {
        // spec.md §4.6: "single iteration" slowdown tick.
        let Some(fd) = listener.fh.fd.as_ref() else {
            return Tick::Terminated;
        };
        let (outcome, next) = listener.fh.parser.file_read(fd, *read_pos);
        return match outcome {
            ReadOutcome::Eof => Tick::Terminated,
            ReadOutcome::Error => Tick::Terminated,
            ReadOutcome::Frame(data) => {
                let written = sink.write(&data);
                *read_pos = next;
                Tick::Progressed {
                    bytes: written,
                    reschedule: Duration::from_millis(GLOBAL_SLOWDOWN_MS),
                }
            }
        };
    }

    let mut total = 0usize;
    for _ in 0..FILE_MAX_ITERS {
        if total >= FILE_MAX_BYTES {
            break;
        }
        let Some(fd) = listener.fh.fd.as_ref() else {
            return Tick::Terminated;
        };
        let (outcome, next) = listener.fh.parser.file_read(fd, *read_pos);
        match outcome {
            ReadOutcome::Eof => return Tick::Terminated,
            ReadOutcome::Error => return Tick::Terminated,
            ReadOutcome::Frame(data) => {
                let written = sink.write(&data);
                *read_pos = next;
                total += written;
                if written < data.len() {
                    return Tick::Progressed {
                        bytes: total,
                        reschedule: short_write_backoff(),
                    };
                }
            }
        }
    }

    Tick::Progressed {
        bytes: total,
        reschedule: Duration::ZERO,
    }
}

async fn tick_throttled(
    listener: &mut Listener,
    sink: &mut dyn ListenerSink,
    global_meter: &GlobalMeter,
    global_slowdown: bool,
) -> Tick {
    let limit = listener.fh.finfo.limit.max(1);

    let SenderState::ThrottledFileStream { read_pos, timer_start, counter } = &mut listener.state else {
        unreachable!("tick_throttled called outside ThrottledFileStream");
    };

    let secs = timer_start.elapsed().as_secs().max(1);
    let rate = (*counter + THROTTLE_ALLOWANCE_BYTES) / secs;

    if rate > limit || *counter > THROTTLE_COUNTER_CAP {
        listener.fh.inner.lock().await.meter.add(0);
        global_meter.lock().add(0);
        let delay = pacing_delay(limit, PACING_CHUNK_BYTES, 50);
        return Tick::Progressed { bytes: 0, reschedule: delay };
    }

    let Some(fd) = listener.fh.fd.as_ref() else {
        return Tick::Terminated;
    };
    let (outcome, next) = listener.fh.parser.file_read(fd, *read_pos);

    match outcome {
        ReadOutcome::Eof => {
            // Fallback loop semantics (spec.md §9): wrap to frame_start_pos,
            // never to 0, so frame-aligned codecs don't emit a partial
            // frame after wrap.
            *read_pos = listener.fh.frame_start_pos;
            let reschedule = Duration::from_millis(LOOP_RESCHEDULE_MS);
            Tick::Progressed { bytes: 0, reschedule }
        }
        ReadOutcome::Error => Tick::Terminated,
        ReadOutcome::Frame(data) => {
            let written = sink.write(&data);
            *read_pos = next;
            *counter += written as u64;
            listener.fh.inner.lock().await.meter.add(written as u64);
            global_meter.lock().add(written as u64);

            let mut delay = pacing_delay(limit, PACING_CHUNK_BYTES * 2, 50);
            if global_slowdown {
                delay += Duration::from_millis(GLOBAL_SLOWDOWN_MS);
            }
            Tick::Progressed { bytes: written, reschedule: delay }
        }
    }
}

fn short_write_backoff() -> Duration {
    Duration::from_millis(rand::random_range(SHORT_WRITE_FLOOR_MS..=SHORT_WRITE_CEIL_MS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NullStatsHandle;
    use crate::fd::PositionalFile;
    use crate::finfo::FInfo;
    use crate::format::{Mp3Format, RawFormat};
    use std::io::Write;

    struct VecSink(Vec<u8>);
    impl ListenerSink for VecSink {
        fn write(&mut self, data: &[u8]) -> usize {
            self.0.extend_from_slice(data);
            data.len()
        }
    }

    struct ShortSink {
        buf: Vec<u8>,
        cap: usize,
    }
    impl ListenerSink for ShortSink {
        fn write(&mut self, data: &[u8]) -> usize {
            let n = data.len().min(self.cap);
            self.buf.extend_from_slice(&data[..n]);
            n
        }
    }

    fn write_file(bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::File::create(&path).unwrap().write_all(bytes).unwrap();
        (dir, path)
    }

    fn meter() -> GlobalMeter {
        parking_lot::Mutex::new(BitrateMeter::new())
    }

    #[tokio::test]
    async fn buffer_content_drains_then_moves_to_file_stream() {
        let (_dir, path) = write_file(&[0xffu8; 1024]);
        let fd = PositionalFile::open(&path).unwrap();
        let fh = Arc::new(Fh::new(
            FInfo::new("/a.mp3", MountFlags::empty()),
            Box::new(RawFormat::default()),
            Some(fd),
            0,
            Arc::new(NullStatsHandle),
        ));
        let mut refbufs = VecDeque::new();
        refbufs.push_back(Bytes::from_static(b"HEADER"));
        let mut listener = Listener::new(1, fh, refbufs);
        let mut sink = VecSink(Vec::new());
        let gm = meter();

        let out = tick(&mut listener, &mut sink, &gm, false).await;
        assert!(matches!(out, Tick::Progressed { .. }));
        assert_eq!(sink.0, b"HEADER");
        assert!(matches!(listener.state, SenderState::FileStream { .. }));
    }

    #[tokio::test]
    async fn file_stream_terminates_at_eof() {
        let (_dir, path) = write_file(&[1u8; 10]);
        let fd = PositionalFile::open(&path).unwrap();
        let fh = Arc::new(Fh::new(
            FInfo::new("/a.bin", MountFlags::empty()),
            Box::new(RawFormat::new(4)),
            Some(fd),
            0,
            Arc::new(NullStatsHandle),
        ));
        let mut listener = Listener::new(1, fh, VecDeque::new());
        listener.arm_file_stream(0);
        let mut sink = VecSink(Vec::new());
        let gm = meter();

        let first = tick(&mut listener, &mut sink, &gm, false).await;
        assert!(matches!(first, Tick::Progressed { .. }));
        assert_eq!(sink.0.len(), 10);

        let second = tick(&mut listener, &mut sink, &gm, false).await;
        assert!(matches!(second, Tick::Terminated));
    }

    #[tokio::test]
    async fn throttled_stream_loops_to_frame_start_not_zero() {
        let (_dir, path) = write_file(&[0xffu8; 417 * 2]);
        let fd = PositionalFile::open(&path).unwrap();
        let fh = Arc::new(Fh::new(
            FInfo::new("/live", MountFlags::FALLBACK).with_limit(128_000),
            Box::new(Mp3Format::default()),
            Some(fd),
            417,
            Arc::new(NullStatsHandle),
        ));
        let mut listener = Listener::new(1, fh, VecDeque::new());
        listener.arm_throttle(417, true);
        let mut sink = VecSink(Vec::new());
        let gm = meter();

        // Drain the single remaining frame.
        let _ = tick(&mut listener, &mut sink, &gm, false).await;
        // Next tick hits EOF and should wrap to 417, not 0.
        loop {
            match tick(&mut listener, &mut sink, &gm, false).await {
                Tick::Progressed { .. } => {
                    if let SenderState::ThrottledFileStream { read_pos, .. } = &listener.state {
                        if *read_pos == 417 {
                            break;
                        }
                    }
                }
                _ => panic!("expected Progressed before wrap, got a different tick"),
            }
        }
    }

    #[tokio::test]
    async fn override_triggers_migration_on_next_tick() {
        let (_dir, path) = write_file(&[1u8; 10]);
        let fd = PositionalFile::open(&path).unwrap();
        let fh = Arc::new(Fh::new(
            FInfo::new("/m", MountFlags::FALLBACK).with_limit(0),
            Box::new(RawFormat::default()),
            Some(fd),
            0,
            Arc::new(NullStatsHandle),
        ));
        fh.inner.lock().await.override_dest = Some("/live".to_string());
        let mut listener = Listener::new(1, fh, VecDeque::new());
        let mut sink = VecSink(Vec::new());
        let gm = meter();

        match tick(&mut listener, &mut sink, &gm, false).await {
            Tick::Migrate(finfo) => assert_eq!(finfo.mount, "/live"),
            _ => panic!("expected migration"),
        }
        assert!(matches!(listener.state, SenderState::Migrate));
    }

    #[tokio::test]
    async fn errored_listener_terminates_immediately() {
        let (_dir, path) = write_file(&[1u8; 10]);
        let fd = PositionalFile::open(&path).unwrap();
        let fh = Arc::new(Fh::new(
            FInfo::new("/a", MountFlags::empty()),
            Box::new(RawFormat::default()),
            Some(fd),
            0,
            Arc::new(NullStatsHandle),
        ));
        let mut listener = Listener::new(1, fh, VecDeque::new());
        listener.error = true;
        let mut sink = VecSink(Vec::new());
        let gm = meter();
        assert!(matches!(tick(&mut listener, &mut sink, &gm, false).await, Tick::Terminated));
    }

    #[tokio::test]
    async fn short_write_reschedules_without_losing_position() {
        let (_dir, path) = write_file(&[1u8; 10]);
        let fd = PositionalFile::open(&path).unwrap();
        let fh = Arc::new(Fh::new(
            FInfo::new("/a", MountFlags::empty()),
            Box::new(RawFormat::new(8)),
            Some(fd),
            0,
            Arc::new(NullStatsHandle),
        ));
        let mut listener = Listener::new(1, fh, VecDeque::new());
        listener.arm_file_stream(0);
        let mut sink = ShortSink { buf: Vec::new(), cap: 4 };
        let gm = meter();

        let out = tick(&mut listener, &mut sink, &gm, false).await;
        match out {
            Tick::Progressed { bytes, reschedule } => {
                assert_eq!(bytes, 4);
                assert!(reschedule >= Duration::from_millis(SHORT_WRITE_FLOOR_MS));
            }
            _ => panic!("expected progressed tick"),
        }
        if let SenderState::FileStream { read_pos, .. } = listener.state {
            assert_eq!(read_pos, 8);
        }
    }
}
