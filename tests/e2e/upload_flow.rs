//! E2E Upload Flow Tests
//!
//! Happy path: relay over raw HTTP, then the full client pipeline
//! (session, batching, transfer client) against the same relay.

use super::common::RelayTestEnv;
use bytes::Bytes;
use photo_relay::upload::batch::{BatchOptions, TransferMode};
use photo_relay::upload::client::{TransferClient, TransferClientConfig};
use photo_relay::upload::session::{AlwaysProceed, Outcome, SessionController, SessionOptions, Strategy};
use photo_relay::upload::UploadCandidate;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn candidate(name: &str) -> UploadCandidate {
    UploadCandidate::new(name, "image/jpeg", Bytes::from(format!("jpeg bytes of {}", name)))
}

fn controller(env: &RelayTestEnv, mode: TransferMode) -> SessionController<AlwaysProceed> {
    let transfer = Arc::new(TransferClient::new(TransferClientConfig::new(env.upload_url())).unwrap());
    SessionController::new(
        transfer,
        AlwaysProceed,
        SessionOptions {
            strategy: Strategy::Batched(BatchOptions {
                batch_size: 2,
                inter_batch_delay: Duration::from_millis(10),
                mode,
            }),
            normalize: None,
            ..SessionOptions::default()
        },
    )
}

#[tokio::test]
async fn test_health_check() {
    let env = RelayTestEnv::new().await;

    let response = env
        .client
        .get(format!("{}/health", env.base_url()))
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_single_file_upload() {
    let env = RelayTestEnv::new().await;

    let response = env.post_files(&[("beach.jpg", "image/jpeg", b"fake jpeg")]).await;

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["success"], true);
    let url = json["url"].as_str().unwrap();
    assert!(url.starts_with("https://res.example.com/e2e/wedding-photos/beach_"), "{}", url);
    assert_eq!(json["metadata"]["fileName"], "beach.jpg");
    assert_eq!(json["metadata"]["fileSizeMB"], 0.0);
    assert!(json["metadata"]["processingTimeMs"].is_u64());
    assert!(json["metadata"]["cloudinaryTimeMs"].is_u64());
    assert_eq!(env.store_calls().await, 1);
}

#[tokio::test]
async fn test_multi_file_upload() {
    let env = RelayTestEnv::multi_file().await;

    let response = env
        .post_files(&[
            ("one.jpg", "image/jpeg", b"1"),
            ("two.png", "image/png", b"22"),
            ("three.webp", "image/webp", b"333"),
        ])
        .await;

    assert_eq!(response.status(), 200);
    let json: serde_json::Value = response.json().await.unwrap();
    let urls: Vec<&str> = json["urls"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u.as_str().unwrap())
        .collect();
    assert_eq!(urls.len(), 3);
    assert!(urls[0].contains("/one_"));
    assert!(urls[1].contains("/two_"));
    assert!(urls[2].contains("/three_"));
    assert_eq!(json["metadata"]["totalFiles"], 3);
    assert_eq!(env.store_calls().await, 3);
}

#[tokio::test]
async fn test_duplicate_file_names_are_stored_separately() {
    let env = RelayTestEnv::multi_file().await;

    let response = env
        .post_files(&[
            ("image.jpg", "image/jpeg", b"first photo"),
            ("image.jpg", "image/jpeg", b"second photo"),
        ])
        .await;

    assert_eq!(response.status(), 200);
    let json: serde_json::Value = response.json().await.unwrap();
    let urls: BTreeSet<&str> = json["urls"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u.as_str().unwrap())
        .collect();
    assert_eq!(urls.len(), 2);
    assert!(urls.iter().all(|u| u.contains("/image_")));
}

#[tokio::test]
async fn test_session_with_repeated_names_gets_distinct_urls() {
    let env = RelayTestEnv::new().await;
    let mut controller = controller(&env, TransferMode::PerFile);

    let report = controller
        .run_session(vec![candidate("image.jpg"), candidate("image.jpg"), candidate("image.jpg")])
        .await;

    assert_eq!(report.outcome, Outcome::FullSuccess { uploaded: 3 });
    let urls: BTreeSet<&str> = report.urls().into_iter().collect();
    assert_eq!(urls.len(), 3);
}

#[tokio::test]
async fn test_metrics_endpoint_reports_uploads() {
    let env = RelayTestEnv::new().await;
    env.post_files(&[("m.jpg", "image/jpeg", b"m")]).await;

    let response = env
        .client
        .get(format!("{}/metrics", env.base_url()))
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("photo_relay_requests_total"));
    assert!(body.contains("photo_relay_files_stored_total"));
}

#[tokio::test]
async fn test_session_per_file_through_relay() {
    let env = RelayTestEnv::new().await;
    let mut controller = controller(&env, TransferMode::PerFile);

    let report = controller
        .run_session(vec![candidate("a.jpg"), candidate("b.jpg"), candidate("c.jpg")])
        .await;

    assert_eq!(report.outcome, Outcome::FullSuccess { uploaded: 3 });
    let urls = report.urls();
    assert!(urls[0].contains("/a_"));
    assert!(urls[1].contains("/b_"));
    assert!(urls[2].contains("/c_"));
    assert_eq!(env.store_calls().await, 3);
}

#[tokio::test]
async fn test_session_per_batch_through_multi_file_relay() {
    let env = RelayTestEnv::multi_file().await;
    let mut controller = controller(&env, TransferMode::PerBatch);

    let report = controller
        .run_session(vec![candidate("a.jpg"), candidate("b.jpg"), candidate("c.jpg")])
        .await;

    assert_eq!(report.outcome, Outcome::FullSuccess { uploaded: 3 });
    assert_eq!(report.results.len(), 3);
    assert!(report.urls()[2].contains("/c_"));
}
