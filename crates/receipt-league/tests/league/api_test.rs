use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{header::CONTENT_TYPE, Request, StatusCode},
    Router,
};
use receipt_league::{api::extractors::USER_HEADER, app, upload_limit, AppState};
use receipt_league_core::MAX_RECEIPT_IMAGE_BYTES;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tokio::task::JoinHandle;
use tower::ServiceExt;
use uuid::Uuid;

use crate::helpers::{accepting_images, reader_with, reading, MockImages, MockReader, TestContext};

const BOUNDARY: &str = "receipt-league-boundary";

fn router(context: &TestContext, threads: HashMap<String, JoinHandle<()>>) -> Router {
    let state = AppState {
        league: context.league.clone(),
        max_upload_bytes: upload_limit(MAX_RECEIPT_IMAGE_BYTES),
        max_image_bytes: MAX_RECEIPT_IMAGE_BYTES,
        background_threads: Arc::new(threads),
    };
    app(state, vec![])
}

fn receipt_form(photo: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"receipt.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(photo);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(team_id: Uuid, email: &str, photo: &[u8]) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri(format!("/api/v1/teams/{}/receipts", team_id))
        .header(USER_HEADER, email)
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(receipt_form(photo)))?)
}

async fn json_body(body: Body) -> Result<Value> {
    let bytes = to_bytes(body, usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn test_receipt_upload_through_router() -> Result<()> {
    let context = TestContext::new(
        reader_with(vec![Ok(reading(1234, "Trader Joe's"))]),
        accepting_images(),
    )
    .await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let competition = context.goal_competition(&alice, 50_000).await?;
    let team = context.team(&alice, competition.id, "Green Giants").await?;

    let response = router(&context, HashMap::new())
        .oneshot(upload_request(team.id, "alice@example.com", b"photo-1")?)
        .await?;

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response.into_body()).await?;
    assert_eq!(body["receipt"]["points"], 12_340);
    Ok(())
}

#[tokio::test]
async fn test_oversized_upload_names_the_size_limit() -> Result<()> {
    let mut reader = MockReader::new();
    reader.expect_extract().never();
    let mut images = MockImages::new();
    images.expect_put().never();
    let context = TestContext::new(reader, images).await?;
    let alice = context.member("alice@example.com", "Alice").await?;
    let competition = context.goal_competition(&alice, 50_000).await?;
    let team = context.team(&alice, competition.id, "Green Giants").await?;

    let photo = vec![0xFF; 11 * 1024 * 1024];
    let response = router(&context, HashMap::new())
        .oneshot(upload_request(team.id, "alice@example.com", &photo)?)
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response.into_body()).await?;
    assert_eq!(body["error"], "Image file too large. Maximum size is 10MB");

    let team = context.league.get_team(team.id).await?;
    assert_eq!(team.receipts_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_upload_requires_a_user() -> Result<()> {
    let context = TestContext::new(MockReader::new(), MockImages::new()).await?;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/teams/{}/receipts", Uuid::now_v7()))
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(receipt_form(b"photo-1")))?;
    let response = router(&context, HashMap::new()).oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn test_health_check_reports_stopped_background_task() -> Result<()> {
    let context = TestContext::new(MockReader::new(), MockImages::new()).await?;

    let (_keep_running, wait) = tokio::sync::oneshot::channel::<()>();
    let running = tokio::spawn(async move {
        let _ = wait.await;
    });
    let healthy = router(
        &context,
        HashMap::from([(String::from("expiry_sweeper"), running)]),
    )
    .oneshot(Request::get("/api/v1/health_check").body(Body::empty())?)
    .await?;
    assert_eq!(healthy.status(), StatusCode::OK);

    let stopped = tokio::spawn(async {});
    while !stopped.is_finished() {
        tokio::task::yield_now().await;
    }
    let response = router(
        &context,
        HashMap::from([(String::from("expiry_sweeper"), stopped)]),
    )
    .oneshot(Request::get("/api/v1/health_check").body(Body::empty())?)
    .await?;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(&bytes[..], b"expiry_sweeper stopped");
    Ok(())
}
