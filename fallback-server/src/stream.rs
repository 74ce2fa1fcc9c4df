//! The admission/streaming surface (spec.md §4.4 `setup_client`, §4.6
//! sender loop). One axum handler bridges an inbound GET into
//! `fallback-core`'s cache and sender machinery: admit under the cache
//! write lock, pick the sender's starting position from any `Range`
//! header, then hand the rest of the connection's lifetime to a spawned
//! task driving `run_listener` until departure or migration.

use axum::{
    extract::{OriginalUri, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use fallback_core::collaborators::MountConfig;
use fallback_core::{
    attempt_migration, key::MountFlags, notify_auth_release, release, run_listener, AuthCollaborator, FInfo, Fh,
    FhCache, GlobalMeter, Listener, ListenerSink, MoveCollaborator, PinnedFh, WorkerOutcome,
};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::registry::Registry;
use crate::state::AppState;

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Deserialize, Default)]
pub struct StreamQuery {
    #[serde(default)]
    pub fallback: bool,
    #[serde(default)]
    pub admin: bool,
    pub limit: Option<u64>,
    /// Caller-supplied identity for the duplicate-login check (spec.md
    /// §4.4 step 3, §8 scenario 5). Absent for anonymous clients.
    pub user: Option<String>,
}

/// Writes into a bounded channel backing the response body. `try_send`
/// returning `Err` (channel full — the client isn't draining fast enough)
/// becomes a short write (0 bytes accepted), which the sender's existing
/// backoff (spec.md §7 "transient-io") already knows how to handle.
struct ChannelSink(mpsc::Sender<std::io::Result<Bytes>>);

impl ListenerSink for ChannelSink {
    fn write(&mut self, data: &[u8]) -> usize {
        match self.0.try_send(Ok(Bytes::copy_from_slice(data))) {
            Ok(()) => data.len(),
            Err(_) => 0,
        }
    }
}

#[derive(Debug)]
struct ByteRange {
    start: u64,
    end: u64,
}

/// Grounded on the teacher's range parser: `bytes=start-end`, open-ended
/// forms on either side, clamped to `file_size`.
fn parse_range_header(range_str: &str, file_size: u64) -> Option<ByteRange> {
    let range_part = range_str.strip_prefix("bytes=")?;
    let parts: Vec<&str> = range_part.split('-').collect();
    if parts.len() != 2 {
        return None;
    }

    let start = if parts[0].is_empty() {
        let suffix_len: u64 = parts[1].parse().ok()?;
        file_size.saturating_sub(suffix_len)
    } else {
        parts[0].parse().ok()?
    };

    let end = if parts[1].is_empty() {
        file_size.saturating_sub(1)
    } else {
        std::cmp::min(parts[1].parse().ok()?, file_size.saturating_sub(1))
    };

    (start <= end && start < file_size).then_some(ByteRange { start, end })
}

pub async fn admission_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let mut flags = MountFlags::empty();
    if query.fallback {
        flags |= MountFlags::FALLBACK;
    }
    if query.admin {
        flags |= MountFlags::USE_ADMIN;
    }

    let mut finfo = FInfo::new(uri.path().to_string(), flags);
    finfo.limit = query.limit.unwrap_or(0);

    // spec.md §4.4 step 1.
    if !finfo.is_admissible() {
        return Err(AppError::bad_request(
            "fallback mounts require a non-zero bitrate limit",
        ));
    }

    let mount_cfg = state
        .mount_config
        .find_mount(&finfo.mount)
        .unwrap_or_default();

    // spec.md §4.4 step 4: a mount policy of zero listeners refuses
    // fallback admission without ever touching the cache.
    if finfo.is_fallback() && mount_cfg.max_listeners == Some(0) {
        return Err(AppError::forbidden("fallback admission disabled for this mount", true));
    }

    // spec.md §4.4 step 3, §8 scenario 5: reject a second connection from
    // the same principal when the mount's policy disallows it. Checked
    // ahead of `cache.open` so a rejected duplicate never touches refcount.
    if !mount_cfg.allow_duplicate_login {
        if let Some(principal) = &query.user {
            if state.registry.has_duplicate(&finfo.mount, principal) {
                return Err(AppError::forbidden("Account already in use", false));
            }
        }
    }

    let pinned: PinnedFh = state.cache.open(&finfo, &mount_cfg).await?;
    let PinnedFh { fh, mut guard } = pinned;

    // spec.md §4.4 step 3: "max_listeners >= 0 && refcount > max_listeners".
    // A negative `max_listeners` (icecast's own "-1 means unlimited"
    // convention) must never cap admission, so only enforce the check when
    // `max` is actually non-negative.
    if let Some(max) = mount_cfg.max_listeners {
        if max >= 0 && guard.refcount as i64 >= max {
            drop(guard);
            drop(fh);
            return Err(AppError::forbidden("mount at capacity", true));
        }
    }

    let id = state.registry.allocate_id();
    let fsize = fh.finfo.file_size;
    let frame_start = fh.frame_start_pos;
    let f_range = fsize.saturating_sub(frame_start);
    let content_type = fh
        .finfo
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let is_throttled = fh.finfo.limit > 0;

    let range = match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(range_str) => match parse_range_header(range_str, f_range) {
            Some(r) => Some(r),
            None => {
                // Not attached yet (attach happens below, once the range is
                // known to be satisfiable) — nothing to detach here.
                drop(guard);
                drop(fh);
                return Err(AppError::range_not_satisfiable(format!(
                    "range {range_str} not satisfiable against {f_range} bytes"
                )));
            }
        },
        None => None,
    };

    guard.attach(id);
    drop(guard);

    let (status, start, content_length) = match &range {
        Some(r) => (StatusCode::PARTIAL_CONTENT, r.start, r.end - r.start + 1),
        None => (StatusCode::OK, 0, f_range),
    };

    let mut listener = Listener::new(id, fh.clone(), VecDeque::new());
    let read_pos = frame_start + start;
    if is_throttled {
        listener.arm_throttle(read_pos, false);
    } else {
        listener.arm_file_stream(read_pos);
    }

    let (body_tx, body_rx) = mpsc::channel::<std::io::Result<Bytes>>(CHANNEL_CAPACITY);
    let (cancel_tx, cancel_rx) = mpsc::channel(1);
    state.registry.insert(id, finfo.mount.clone(), query.user.clone(), cancel_tx);

    info!(mount = %finfo.mount, listener = id, throttled = is_throttled, "listener admitted");

    tokio::spawn(drive_listener(
        listener,
        fh,
        state.cache.clone(),
        mount_cfg,
        state.mover.clone(),
        state.auth.clone(),
        state.global_meter.clone(),
        state.global_slowdown.clone(),
        state.registry.clone(),
        id,
        ChannelSink(body_tx),
        cancel_rx,
    ));

    let body = axum::body::Body::from_stream(ReceiverStream::new(body_rx));
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes");

    if is_throttled {
        // spec.md §4.4 step 6: throttled fallback content loops
        // indefinitely, so no Content-Length/keep-alive is advertised.
        builder = builder.header(header::CONNECTION, "close");
    } else {
        builder = builder.header(header::CONTENT_LENGTH, content_length.to_string());
        if let Some(r) = &range {
            builder = builder.header(header::CONTENT_RANGE, format!("bytes {}-{}/{}", r.start, r.end, f_range));
        }
    }

    Ok(builder
        .body(body)
        .map_err(|e| AppError::internal(e.to_string()))?
        .into_response())
}

/// Drives one connection across its whole lifetime, including any number
/// of migrations (spec.md §4.6 "migrate"): each migration re-opens the
/// cache under the new mount and keeps the same outgoing channel alive,
/// so the HTTP response never has to restart.
#[allow(clippy::too_many_arguments)]
async fn drive_listener(
    mut listener: Listener,
    mut fh: Arc<Fh>,
    cache: Arc<FhCache>,
    mount_cfg: MountConfig,
    mover: Arc<dyn MoveCollaborator>,
    auth: Arc<dyn AuthCollaborator>,
    global_meter: Arc<GlobalMeter>,
    global_slowdown: Arc<AtomicBool>,
    registry: Arc<Registry>,
    id: u64,
    mut sink: ChannelSink,
    mut cancel_rx: mpsc::Receiver<()>,
) {
    loop {
        let outcome = run_listener(&mut listener, &mut sink, &global_meter, &global_slowdown, &mut cancel_rx).await;

        match outcome {
            WorkerOutcome::Departed => {
                release(&fh, id, std::time::Instant::now()).await;
                notify_auth_release(auth.as_ref(), id, &fh.finfo.mount).await;
                registry.remove(id);
                return;
            }
            WorkerOutcome::Migrated(finfo) => {
                let approved = attempt_migration(mover.as_ref(), id, &finfo).await;
                release(&fh, id, std::time::Instant::now()).await;

                if !approved {
                    warn!(listener = id, target = %finfo.mount, "migration refused, terminating listener");
                    registry.remove(id);
                    return;
                }

                match cache.open(&finfo, &mount_cfg).await {
                    Ok(pinned) => {
                        let PinnedFh { fh: new_fh, mut guard } = pinned;
                        guard.attach(id);
                        drop(guard);
                        listener = Listener::new(id, new_fh.clone(), VecDeque::new());
                        let read_pos = new_fh.frame_start_pos;
                        if new_fh.finfo.limit > 0 {
                            listener.arm_throttle(read_pos, true);
                        } else {
                            listener.arm_file_stream(read_pos);
                        }
                        fh = new_fh;
                        debug!(listener = id, target = %finfo.mount, "migration complete");
                    }
                    Err(err) => {
                        warn!(listener = id, target = %finfo.mount, error = %err, "migration target unavailable");
                        registry.remove(id);
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_range() {
        let r = parse_range_header("bytes=100-199", 1000).unwrap();
        assert_eq!((r.start, r.end), (100, 199));
    }

    #[test]
    fn parses_suffix_range() {
        let r = parse_range_header("bytes=-500", 1000).unwrap();
        assert_eq!((r.start, r.end), (500, 999));
    }

    #[test]
    fn parses_open_ended_range() {
        let r = parse_range_header("bytes=900-", 1000).unwrap();
        assert_eq!((r.start, r.end), (900, 999));
    }

    #[test]
    fn rejects_range_starting_past_eof() {
        assert!(parse_range_header("bytes=1000-1001", 1000).is_none());
    }

    #[test]
    fn rejects_malformed_range() {
        assert!(parse_range_header("garbage", 1000).is_none());
    }
}
