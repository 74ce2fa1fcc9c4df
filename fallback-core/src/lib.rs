//! Deduplicated file-handle cache and bitrate-throttled fallback sender.
//!
//! This crate has no knowledge of HTTP, sockets, or process configuration
//! — those are the embedder's job (see `fallback-server`). It owns exactly
//! the four mechanisms a streaming-media server's fallback path needs:
//! a deduplicated, reference-counted handle cache; a two-level locking
//! discipline over the per-handle listener set; a bitrate-throttled
//! sender state machine; and an atomic override/migration mechanism.

pub mod bitrate;
pub mod cache;
pub mod collaborators;
pub mod errors;
pub mod fd;
pub mod finfo;
pub mod format;
pub mod handle;
pub mod key;
pub mod mime;
pub mod scanner;
pub mod sender;
pub mod worker;

pub use cache::{FhBuilder, FhCache, PinnedFh};
pub use collaborators::{AuthCollaborator, MountConfig, MountConfigProvider, MoveCollaborator, Ownership, StatsHandle, StatsSink};
pub use errors::FallbackError;
pub use fd::PositionalFile;
pub use finfo::{DeclaredFormat, FInfo};
pub use format::{FormatPlugin, FrameProbe, Mp3Format, RawFormat, ReadOutcome};
pub use handle::{Expiry, Fh, FhInner, ListenerId};
pub use key::{CacheKey, MountFlags};
pub use mime::MimeRegistry;
pub use sender::{tick, GlobalMeter, Listener, ListenerSink, SenderState, Tick};
pub use worker::{attempt_migration, notify_auth_release, release, run_listener, WorkerOutcome};
