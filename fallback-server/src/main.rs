//! # Fallback Server
//!
//! Process entry point: loads bootstrap configuration, wires the concrete
//! collaborator implementations into `fallback-core`'s cache, spawns the
//! periodic scanner, and serves the HTTP surface assembled by
//! `fallback_server::create_app`.

use clap::Parser;
use fallback_core::bitrate::BitrateMeter;
use fallback_core::collaborators::MountConfig;
use fallback_core::{FhCache, MimeRegistry};
use fallback_server::builder::FileBuilder;
use fallback_server::collaborators::{InMemoryMountConfigProvider, LocalMover, NoopAuth, TracingStatsSink};
use fallback_server::config::Config as ExtConfig;
use fallback_server::registry::Registry;
use fallback_server::{create_app, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments for the fallback server
#[derive(Parser, Debug)]
#[command(name = "fallback-server")]
#[command(about = "Bitrate-throttled fallback-stream file server")]
struct Args {
    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Media root (overrides config)
    #[arg(long, env = "MEDIA_ROOT")]
    media_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ExtConfig::from_env()?;
    if let Some(port) = args.port {
        config.server_port = port;
    }
    if let Some(host) = args.host {
        config.server_host = host;
    }
    if let Some(media_root) = args.media_root {
        config.media_root = media_root;
    }

    let config = Arc::new(config);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fallback_server=info,fallback_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("server configuration loaded");
    info!(media_root = %config.media_root.display(), admin_root = %config.admin_root.display(), "roots resolved");

    config.ensure_directories()?;
    info!("media/admin directories ready");

    let mime = Arc::new(MimeRegistry::new());
    if config.mime_file.is_some() {
        mime.reload(config.mime_file.as_deref())?;
        info!(file = ?config.mime_file, "mime table loaded from file");
    }

    let builder = Arc::new(FileBuilder::new(
        config.media_root.clone(),
        config.admin_root.clone(),
        mime.clone(),
    ));
    let cache = Arc::new(FhCache::new(Arc::new(TracingStatsSink), builder));

    let default_mount_cfg = MountConfig {
        max_listeners: config.default_max_listeners,
        allow_duplicate_login: config.allow_duplicate_login,
    };
    let mount_config = Arc::new(InMemoryMountConfigProvider::new(default_mount_cfg));

    let state = AppState {
        config: config.clone(),
        cache: cache.clone(),
        registry: Arc::new(Registry::new()),
        mount_config,
        mime,
        global_meter: Arc::new(parking_lot::Mutex::new(BitrateMeter::new())),
        global_slowdown: Arc::new(AtomicBool::new(false)),
        mover: Arc::new(LocalMover),
        auth: Arc::new(NoopAuth),
    };

    // spec.md §4.7: the scanner owns the cache's only periodic reap pass;
    // a oneshot lets shutdown force one final forced sweep before exit.
    let (scan_cancel_tx, scan_cancel_rx) = tokio::sync::oneshot::channel();
    let scanner = tokio::spawn(fallback_core::scanner::run_scan_loop(cache.clone(), scan_cancel_rx));

    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("starting fallback server on {}:{}", config.server_host, config.server_port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down, waiting for final scan pass");
    let _ = scan_cancel_tx.send(());
    let _ = scanner.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    warn!("shutdown signal received");
}
