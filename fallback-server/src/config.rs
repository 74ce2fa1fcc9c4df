//! Process bootstrap configuration — environment/CLI only, loaded once at
//! startup. Not to be confused with the per-mount policy document
//! `fallback-core` consults via `MountConfigProvider` (spec.md §6
//! "Config" collaborator): that's mount capacity/duplicate-login policy,
//! parsed from whatever format an operator's deployment uses, and is out
//! of scope here. This is the ordinary "where are my files, what port do
//! I bind" bootstrap config, grounded on the same `from_env` shape the
//! teacher's server uses.

use anyhow::Context;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,

    /// Root directory for ordinary (non-admin) mounts.
    pub media_root: PathBuf,
    /// Root directory for `USE_ADMIN`-flagged mounts (spec.md §3).
    pub admin_root: PathBuf,

    /// Optional MIME type-mapping file (spec.md §4.1, §6 file format).
    pub mime_file: Option<PathBuf>,

    /// Scanner cadence override; defaults to `scanner::SCAN_INTERVAL`.
    pub scan_interval_secs: u64,

    /// Default mount policy (spec.md §6 `Config::find_mount`) for mounts
    /// not otherwise configured. `None` means unlimited listeners.
    pub default_max_listeners: Option<i64>,
    pub allow_duplicate_login: bool,

    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .context("SERVER_PORT must be a valid port number")?,

            media_root: env::var("MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./media")),
            admin_root: env::var("ADMIN_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./admin")),

            mime_file: env::var("MIME_FILE").ok().map(PathBuf::from),

            scan_interval_secs: env::var("SCAN_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),

            // Negative values (icecast's own "-1 means unlimited" convention)
            // are passed through as-is; the capacity check in
            // `stream.rs::admission_handler` honors spec.md §4.4 step 3's
            // `max_listeners >= 0` guard rather than normalizing here.
            default_max_listeners: env::var("MAX_LISTENERS").ok().and_then(|v| v.parse().ok()),
            allow_duplicate_login: env::var("ALLOW_DUPLICATE_LOGIN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),

            dev_mode: env::var("DEV_MODE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
        })
    }

    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.media_root)
            .with_context(|| format!("failed to create media root {}", self.media_root.display()))?;
        std::fs::create_dir_all(&self.admin_root)
            .with_context(|| format!("failed to create admin root {}", self.admin_root.display()))?;
        Ok(())
    }
}
