//! Shared test-app assembly, in the shape of `ferrex-server/tests/common.rs`:
//! a `TestApp` wrapper that builds a real `Router` over a temp media root,
//! without a database behind it (this server has none).

use fallback_core::{FhCache, MimeRegistry};
use fallback_server::builder::FileBuilder;
use fallback_server::collaborators::{InMemoryMountConfigProvider, LocalMover, NoopAuth, TracingStatsSink};
use fallback_server::config::Config;
use fallback_server::registry::Registry;
use fallback_server::{create_app, AppState};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[allow(unused)]
pub struct TestApp {
    pub router: axum::Router,
    pub media_root: tempfile::TempDir,
}

#[allow(unused)]
pub fn build_test_app() -> TestApp {
    build_test_app_with_mount_config(fallback_core::collaborators::MountConfig::default())
}

#[allow(unused)]
pub fn build_test_app_with_mount_config(default_mount_cfg: fallback_core::collaborators::MountConfig) -> TestApp {
    let media_root = tempfile::tempdir().unwrap();
    let admin_root = media_root.path().join("admin");
    std::fs::create_dir_all(&admin_root).unwrap();

    let mime = Arc::new(MimeRegistry::new());
    let builder = Arc::new(FileBuilder::new(
        media_root.path().to_path_buf(),
        admin_root.clone(),
        mime.clone(),
    ));
    let cache = Arc::new(FhCache::new(Arc::new(TracingStatsSink), builder));
    let mount_config = Arc::new(InMemoryMountConfigProvider::new(default_mount_cfg));

    let config = Arc::new(Config {
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        media_root: media_root.path().to_path_buf(),
        admin_root,
        mime_file: None,
        scan_interval_secs: 5,
        default_max_listeners: None,
        allow_duplicate_login: true,
        dev_mode: true,
    });

    let state = AppState {
        config,
        cache,
        registry: Arc::new(Registry::new()),
        mount_config,
        mime,
        global_meter: Arc::new(parking_lot::Mutex::new(fallback_core::bitrate::BitrateMeter::new())),
        global_slowdown: Arc::new(AtomicBool::new(false)),
        mover: Arc::new(LocalMover),
        auth: Arc::new(NoopAuth),
    };

    TestApp {
        router: create_app(state),
        media_root,
    }
}

#[allow(unused)]
pub fn write_fixture(app: &TestApp, name: &str, contents: &[u8]) -> PathBuf {
    let path = app.media_root.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
