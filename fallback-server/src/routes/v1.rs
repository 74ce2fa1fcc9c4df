//! Admin endpoints (spec.md §6 "outward" collaborator contracts):
//! override/migration trigger, kill-by-id, client enumeration, listener
//! counts, and MIME-table reload.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use fallback_core::key::MountFlags;
use fallback_core::FInfo;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// Wires the admin endpoints (spec.md §6) onto `/api/v1`.
pub fn create_v1_router(_state: AppState) -> Router<AppState> {
    Router::new()
        .route("/override", post(set_override))
        .route("/killclient", post(kill_client))
        .route("/listclients", get(list_clients))
        .route("/querycount", get(query_count))
        .route("/contains", get(contains))
        .route("/mime/reload", post(reload_mime))
        .route("/scan", post(trigger_scan))
}

#[derive(Debug, Deserialize)]
pub struct OverrideQuery {
    pub mount: String,
    pub dest: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// `set_override(mount, dest, type)` (spec.md §4.2, §6).
pub async fn set_override(State(state): State<AppState>, Query(q): Query<OverrideQuery>) -> AppResult<impl IntoResponse> {
    let ok = state.cache.set_override(&q.mount, &q.dest, q.content_type).await;
    if !ok {
        return Err(AppError::not_found(format!("no fallback handle for mount {}", q.mount)));
    }
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct KillQuery {
    pub mount: String,
    pub id: Option<u64>,
}

/// `kill_client(client, mount, id, response)` (spec.md §6): a bad-request
/// surface (spec.md §7 "an admin-kill without a valid `id`") rendered as a
/// small XML document, matching the admin-response format the original
/// exposes (XML/XSLT rendering itself stays out of scope — §1 Non-goals).
pub async fn kill_client(State(state): State<AppState>, Query(q): Query<KillQuery>) -> AppResult<impl IntoResponse> {
    let Some(id) = q.id else {
        return Err(AppError::bad_request("missing id parameter"));
    };

    let found = state.registry.kill(&q.mount, id);
    let body = format!(
        "<?xml version=\"1.0\"?>\n<iceresponse><message>Client {} removed</message><return>{}</return></iceresponse>\n",
        id,
        if found { 1 } else { 0 }
    );

    Ok(([(axum::http::header::CONTENT_TYPE, "text/xml")], body))
}

#[derive(Debug, Deserialize)]
pub struct MountQuery {
    pub mount: String,
}

/// `list_clients(mount, response, show)` (spec.md §6).
pub async fn list_clients(State(state): State<AppState>, Query(q): Query<MountQuery>) -> impl IntoResponse {
    let ids = state.registry.list_for_mount(&q.mount);
    Json(json!({ "mount": q.mount, "clients": ids }))
}

#[derive(Debug, Serialize)]
struct QueryCountResponse {
    mount: String,
    count: i64,
}

/// `query_count(finfo, mountcfg)` (spec.md §6): opens the FH on demand for
/// fallback mounts, per the contract's explicit "opening the FH on demand"
/// clause, then reports its current listener count.
pub async fn query_count(State(state): State<AppState>, Query(q): Query<MountQuery>) -> AppResult<impl IntoResponse> {
    let finfo = FInfo::new(q.mount.clone(), MountFlags::FALLBACK).with_limit(1);
    let mount_cfg = state.mount_config.find_mount(&finfo.mount).unwrap_or_default();
    let pinned = state.cache.open(&finfo, &mount_cfg).await?;
    let count = pinned.guard.refcount as i64;

    Ok(Json(QueryCountResponse { mount: q.mount, count }))
}

/// `contains(name)` (spec.md §6, §7 "would-block"): `0`/`1`/`-1` in the
/// original become `Some(bool)`/`None` here — `None` means "cache is
/// write-locked, try again."
pub async fn contains(State(state): State<AppState>, Query(q): Query<MountQuery>) -> impl IntoResponse {
    match state.cache.contains_mount(&q.mount, MountFlags::empty()).await {
        Some(found) => Json(json!({ "mount": q.mount, "contains": found })).into_response(),
        None => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "would block" })),
        )
            .into_response(),
    }
}

/// `recheck_mime_types(config)` (spec.md §6): reload the MIME table from
/// the configured file without restarting the process.
pub async fn reload_mime(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state
        .mime
        .reload(state.config.mime_file.as_deref())
        .map_err(|e| AppError::internal(e.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

/// `scan(now)` (spec.md §4.7): forces an out-of-band sweep instead of
/// waiting for the scanner's next tick.
pub async fn trigger_scan(State(state): State<AppState>) -> impl IntoResponse {
    state.cache.scan(Some(std::time::Instant::now())).await;
    Json(json!({ "ok": true }))
}
