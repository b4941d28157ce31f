//! Per-address Rate Limit Tests

use axum::http::{header, StatusCode};

use crate::common::{body_json, test_settings, TestApp};

#[tokio::test]
async fn test_account_routes_are_limited_per_address() {
    let mut settings = test_settings();
    settings.rate_limit.ip_requests = 3;
    let app = TestApp::with_settings(settings).await;

    for _ in 0..3 {
        let response = app
            .post_form("/account/login", "email=nobody@example.com&password=whatever1")
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = app
        .post_form("/account/login", "email=nobody@example.com&password=whatever1")
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(body_json(response).await["code"], 10006);

    // A different address has its own bucket
    let response = app
        .post_form_with(
            "/account/login",
            "email=nobody@example.com&password=whatever1",
            &[("X-Forwarded-For", "198.51.100.1")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
