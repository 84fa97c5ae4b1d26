//! E2E Error Scenario Tests
//!
//! - Missing file field
//! - Invalid file type
//! - Media store failures, single and multi-file
//! - Routing (404 / 405)
//! - Request timeout
//! - Oversized request body

use super::common::RelayTestEnv;
use bytes::Bytes;
use photo_relay::config::RelayConfig;
use photo_relay::upload::batch::{BatchOptions, TransferMode};
use photo_relay::upload::client::{TransferClient, TransferClientConfig};
use photo_relay::upload::session::{AlwaysProceed, Outcome, SessionController, SessionOptions, Strategy};
use photo_relay::upload::{UploadCandidate, UploadError};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_missing_file_field() {
    let env = RelayTestEnv::new().await;

    let form = reqwest::multipart::Form::new().text("caption", "no photo here");
    let response = env
        .client
        .post(env.upload_url())
        .multipart(form)
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), 400);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["error"], "No file uploaded");
    assert!(json["processingTimeMs"].is_u64());
    assert_eq!(env.store_calls().await, 0);
}

#[tokio::test]
async fn test_missing_files_in_multi_mode() {
    let env = RelayTestEnv::multi_file().await;

    let form = reqwest::multipart::Form::new().text("caption", "none");
    let response = env
        .client
        .post(env.upload_url())
        .multipart(form)
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), 400);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["error"], "No files uploaded");
}

#[tokio::test]
async fn test_non_multipart_body() {
    let env = RelayTestEnv::new().await;

    let response = env
        .client
        .post(env.upload_url())
        .header("content-type", "application/octet-stream")
        .body("raw bytes")
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_invalid_type_never_reaches_store() {
    let env = RelayTestEnv::new().await;

    let response = env.post_files(&[("notes.txt", "text/plain", b"hello")]).await;

    assert_eq!(response.status(), 400);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["error"], "Invalid file");
    assert!(json["details"]
        .as_str()
        .unwrap()
        .contains("Invalid file type: text/plain"));
    assert_eq!(env.store_calls().await, 0);
}

#[tokio::test]
async fn test_multi_file_store_failure_fails_request() {
    let env = RelayTestEnv::multi_file().await;

    let response = env
        .post_files(&[("good.jpg", "image/jpeg", b"1"), ("bad.jpg", "image/jpeg", b"2")])
        .await;

    assert_eq!(response.status(), 500);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["error"], "Upload failed");
    assert!(json["details"].as_str().unwrap().contains("bad.jpg"));
}

#[tokio::test]
async fn test_per_file_client_isolates_store_failure() {
    let env = RelayTestEnv::new().await;
    let transfer = Arc::new(TransferClient::new(TransferClientConfig::new(env.upload_url())).unwrap());
    let mut controller = SessionController::new(
        transfer,
        AlwaysProceed,
        SessionOptions {
            strategy: Strategy::Batched(BatchOptions {
                batch_size: 5,
                inter_batch_delay: Duration::ZERO,
                mode: TransferMode::PerFile,
            }),
            normalize: None,
            ..SessionOptions::default()
        },
    );

    let report = controller
        .run_session(vec![
            UploadCandidate::new("good.jpg", "image/jpeg", Bytes::from_static(b"1")),
            UploadCandidate::new("bad.jpg", "image/jpeg", Bytes::from_static(b"2")),
        ])
        .await;

    assert_eq!(
        report.outcome,
        Outcome::PartialSuccess {
            succeeded: 1,
            failed: 1
        }
    );
    assert!(matches!(report.results[1].error(), Some(UploadError::Store(_))));
}

#[tokio::test]
async fn test_get_upload_is_method_not_allowed() {
    let env = RelayTestEnv::new().await;

    let response = env
        .client
        .get(env.upload_url())
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), 405);
    assert_eq!(response.headers().get("allow").unwrap(), "POST");
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let env = RelayTestEnv::new().await;

    let response = env
        .client
        .post(format!("{}/files", env.base_url()))
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_slow_store_hits_request_timeout() {
    let env = RelayTestEnv::start(RelayConfig::default(), Duration::from_secs(3), 1).await;

    let response = env.post_files(&[("slow.jpg", "image/jpeg", b"s")]).await;

    assert_eq!(response.status(), 500);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["error"], "Upload timed out");
}

#[tokio::test]
async fn test_oversized_body_is_refused() {
    let relay = RelayConfig {
        max_request_size: Some(4096),
        ..RelayConfig::default()
    };
    let env = RelayTestEnv::start(relay, Duration::ZERO, 30).await;

    let photo = vec![0xAB_u8; 16 * 1024];
    let response = env.post_files(&[("big.jpg", "image/jpeg", &photo)]).await;

    assert_eq!(response.status(), 413);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["error"], "Upload too large");
    assert_eq!(env.store_calls().await, 0);
}
