//! HTTP embedding of the fallback-stream core: a deduplicated file-handle
//! cache, bitrate-throttled sender, and atomic override/migration
//! mechanism for a streaming-media server's static and fallback content
//! path.
//!
//! The server is built on Axum and delegates all cache/sender/scheduling
//! logic to `fallback-core`; this crate supplies only the HTTP surface,
//! process bootstrap, and the concrete collaborator implementations
//! (`FhBuilder`, `MountConfigProvider`, `AuthCollaborator`,
//! `MoveCollaborator`, `StatsSink`).

/// Versioned route organization
pub mod routes;

/// Concrete collaborator implementations (Format/Config/Auth/Move/Stats)
pub mod collaborators;

/// `FhBuilder`: path resolution + format selection
pub mod builder;

/// Server config
pub mod config;

/// Error types and handling
pub mod errors;

/// Per-connection registry (cancellation, enumeration)
pub mod registry;

/// Admission handler and connection driver loop
pub mod stream;

/// Shared application state
pub mod state;

pub use state::AppState;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

/// Assembles the full router: `/health`, the versioned admin API, and the
/// fallback admission handler for everything else.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .merge(routes::create_api_router(state.clone()))
        .fallback(stream::admission_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(axum::extract::State(state): axum::extract::State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "cache_entries": state.cache.len().await,
    }))
}
