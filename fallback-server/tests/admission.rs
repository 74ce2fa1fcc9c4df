//! End-to-end admission behaviour against a real `Router`, in the shape of
//! `ferrex-server/tests/startup.rs`: build an app over a temp media root and
//! drive it with `tower::ServiceExt::oneshot`.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{build_test_app, write_fixture};
use tower::ServiceExt;

#[tokio::test]
async fn health_reports_ok() {
    let app = build_test_app();
    let response = app
        .router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn serves_an_existing_file_untouched() {
    let app = build_test_app();
    write_fixture(&app, "track.mp3", &[0u8; 32]);

    let response = app
        .router
        .oneshot(Request::builder().uri("/track.mp3").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.len(), 32);
}

#[tokio::test]
async fn missing_mount_is_not_found() {
    let app = build_test_app();
    let response = app
        .router
        .oneshot(Request::builder().uri("/nope.mp3").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn fallback_request_with_zero_limit_is_rejected() {
    let app = build_test_app();
    write_fixture(&app, "live.mp3", &[0u8; 8]);

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/live.mp3?fallback=true")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn range_request_returns_partial_content() {
    let app = build_test_app();
    write_fixture(&app, "track.mp3", &[1u8; 64]);

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/track.mp3")
                .header("Range", "bytes=10-19")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.len(), 10);
}
