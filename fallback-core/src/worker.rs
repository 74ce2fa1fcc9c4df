//! Scheduling model (spec.md §5 "Scheduling model"). The original assumes
//! a fixed pool of worker threads, each cooperatively driving a bounded
//! set of clients and respecting `schedule_ms` to avoid busy-waiting.
//!
//! Reinterpreted here as one Tokio task per listener: each task loops
//! `tick → sleep(reschedule) → tick`, and the Tokio multi-threaded runtime
//! plays the role the hand-rolled worker pool played in the original — it
//! already balances tasks across OS threads, which is exactly what the
//! "a client may be migrated between workers between ticks" clause is
//! describing. A literal worker-pool port would just be reimplementing
//! what the runtime's scheduler does for free.

use crate::collaborators::{AuthCollaborator, MoveCollaborator, Ownership};
use crate::finfo::FInfo;
use crate::handle::Fh;
use crate::sender::{tick, GlobalMeter, Listener, ListenerSink, Tick};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// What happens after a listener's task exits — the caller needs this to
/// detach from the FH's listener set and, for a migration, reopen under
/// the new mount.
pub enum WorkerOutcome {
    Departed,
    Migrated(FInfo),
}

/// Drives one listener to completion. Returns once the listener
/// terminates or is told to migrate; never panics on a sender error —
/// those are steady-state faults (spec.md §7) that end the loop, not the
/// task.
pub async fn run_listener(
    listener: &mut Listener,
    sink: &mut dyn ListenerSink,
    global_meter: &GlobalMeter,
    global_slowdown: &std::sync::atomic::AtomicBool,
    cancel: &mut mpsc::Receiver<()>,
) -> WorkerOutcome {
    loop {
        if cancel.try_recv().is_ok() {
            listener.error = true;
        }

        let slowdown = global_slowdown.load(std::sync::atomic::Ordering::Relaxed);
        let outcome = tick(listener, sink, global_meter, slowdown).await;

        match outcome {
            Tick::Progressed { reschedule, .. } => {
                if !reschedule.is_zero() {
                    sleep(reschedule).await;
                }
            }
            Tick::Migrate(finfo) => {
                debug!(listener = listener.id, target = %finfo.mount, "listener migrating");
                return WorkerOutcome::Migrated(finfo);
            }
            Tick::Terminated => {
                info!(listener = listener.id, "listener terminated");
                return WorkerOutcome::Departed;
            }
        }
    }
}

/// `release` (spec.md §4.5): detaches a departing listener from its FH,
/// applying the fallback/non-fallback/DELETE branching and re-arming a
/// fresh bitrate window on normal departure (spec.md §9 "Global bitrate
/// sampling reduction").
pub async fn release(fh: &Arc<Fh>, listener_id: u64, now: std::time::Instant) {
    let mut inner = fh.inner.lock().await;
    let remaining = inner.detach(listener_id);

    if remaining == 0 {
        if fh.is_fallback() {
            inner.stats.disable();
        }
        if fh.finfo.flags.contains(crate::key::MountFlags::DELETE) {
            // Caller (the cache) is responsible for the actual removal —
            // this FH is unreachable from the cache already if it got
            // here via the tombstoned-override path.
            return;
        }
        inner.expire = crate::handle::Expiry::At(now + std::time::Duration::from_secs(120));
        inner.meter.shrink(8);
    }
}

/// Runs the auth collaborator's release hook for an authenticated,
/// non-admin GET departure (spec.md §4.5, final paragraph). Returns
/// `true` if the caller should still destroy the client locally.
pub async fn notify_auth_release(auth: &dyn AuthCollaborator, listener_id: u64, mount: &str) -> bool {
    match auth.release_listener(listener_id, mount).await {
        Ownership::Release => true,
        Ownership::Retained => {
            warn!(listener = listener_id, mount, "auth collaborator retained departing listener");
            false
        }
    }
}

/// `move_listener` plumbing (spec.md §4.6 "migrate"): if the collaborator
/// refuses, the listener must terminate rather than retry.
pub async fn attempt_migration(mover: &dyn MoveCollaborator, listener_id: u64, finfo: &FInfo) -> bool {
    mover.move_listener(listener_id, &finfo.mount).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NullStatsHandle;
    use crate::fd::PositionalFile;
    use crate::finfo::FInfo;
    use crate::format::RawFormat;
    use crate::key::MountFlags;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::sync::atomic::AtomicBool;

    struct NullSink;
    impl ListenerSink for NullSink {
        fn write(&mut self, data: &[u8]) -> usize {
            data.len()
        }
    }

    fn write_file(bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::File::create(&path).unwrap().write_all(bytes).unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn run_listener_reports_departure_on_eof() {
        let (_dir, path) = write_file(&[1u8; 8]);
        let fd = PositionalFile::open(&path).unwrap();
        let fh = Arc::new(Fh::new(
            FInfo::new("/a", MountFlags::empty()),
            Box::new(RawFormat::new(8)),
            Some(fd),
            0,
            Arc::new(NullStatsHandle),
        ));
        let mut listener = Listener::new(1, fh, VecDeque::<Bytes>::new());
        listener.arm_file_stream(0);

        let meter = parking_lot::Mutex::new(crate::bitrate::BitrateMeter::new());
        let slowdown = AtomicBool::new(false);
        let (_tx, mut rx) = mpsc::channel(1);
        let mut sink = NullSink;

        let outcome = run_listener(&mut listener, &mut sink, &meter, &slowdown, &mut rx).await;
        assert!(matches!(outcome, WorkerOutcome::Departed));
    }

    #[tokio::test]
    async fn release_arms_expiry_when_refcount_reaches_zero() {
        let fh = Arc::new(Fh::new(
            FInfo::new("/a", MountFlags::empty()),
            Box::new(RawFormat::default()),
            None,
            0,
            Arc::new(NullStatsHandle),
        ));
        fh.inner.lock().await.attach(42);
        release(&fh, 42, std::time::Instant::now()).await;
        let inner = fh.inner.lock().await;
        assert_eq!(inner.refcount, 0);
        assert!(matches!(inner.expire, crate::handle::Expiry::At(_)));
    }
}
