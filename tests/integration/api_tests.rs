//! API tests against a running server (`database.url = "memory://"` is enough)

use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};

use elidune_circulation::models::user::{AccountTypeSlug, UserClaims};

const BASE_URL: &str = "http://localhost:8081/api/v1";
const JWT_SECRET: &str = "change-this-secret-in-production";

/// Bearer token signed with the default development secret
fn token_for(user_id: i32, account_type: AccountTypeSlug) -> String {
    let now = Utc::now().timestamp();
    UserClaims {
        sub: format!("user-{}", user_id),
        user_id,
        account_type,
        exp: now + 3600,
        iat: now,
    }
    .create_token(JWT_SECRET)
    .expect("Failed to sign token")
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_ready_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/ready", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
}

#[tokio::test]
#[ignore]
async fn test_unauthenticated_request_rejected() {
    let client = Client::new();

    let response = client
        .post(format!("{}/loans", BASE_URL))
        .json(&json!({ "book_id": 1 }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 401);
}

#[tokio::test]
#[ignore]
async fn test_reader_cannot_approve() {
    let client = Client::new();
    let token = token_for(42, AccountTypeSlug::Reader);

    let response = client
        .post(format!("{}/loans/1/approve", BASE_URL))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 403);
}

#[tokio::test]
#[ignore]
async fn test_unknown_loan_is_not_found() {
    let client = Client::new();
    let token = token_for(1, AccountTypeSlug::Librarian);

    let response = client
        .get(format!("{}/loans/999999", BASE_URL))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test]
#[ignore]
async fn test_sweep_returns_summary() {
    let client = Client::new();
    let token = token_for(1, AccountTypeSlug::Admin);

    let response = client
        .post(format!("{}/maintenance/sweep", BASE_URL))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["failures"].is_number());
    assert!(body["marked_overdue"].is_number());
}
