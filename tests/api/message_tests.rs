//! Message History API Tests

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

use chatter::domain::{MessageRepository, UserRepository};

use crate::common::{body_json, TestApp};

async fn seed(app: &TestApp, username: &str, contents: &[&str]) {
    let user = app
        .users
        .find_by_email(&format!("{username}@example.com"))
        .await
        .unwrap()
        .unwrap();
    let start = Utc::now() - Duration::minutes(10);
    for (i, content) in contents.iter().enumerate() {
        app.messages
            .create(user.id, content, start + Duration::seconds(i as i64))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_history_returns_oldest_first() {
    let app = TestApp::new().await;
    let cookies = app.logged_in("alice").await;
    seed(&app, "alice", &["one", "two", "three"]).await;

    let response = app.get_with_cookies("/messages", &cookies).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let contents: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(contents, vec!["one", "two", "three"]);
    assert_eq!(body[0]["username"], "alice");
    assert_eq!(body[0]["id"], 1);
}

#[tokio::test]
async fn test_history_limit_keeps_most_recent() {
    let app = TestApp::new().await;
    let cookies = app.logged_in("alice").await;
    seed(&app, "alice", &["one", "two", "three"]).await;

    let response = app.get_with_cookies("/messages?limit=2", &cookies).await;

    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["content"], "two");
    assert_eq!(body[1]["content"], "three");
}

#[tokio::test]
async fn test_history_since_filters_older_messages() {
    let app = TestApp::new().await;
    let cookies = app.logged_in("alice").await;
    seed(&app, "alice", &["old"]).await;

    let since = Utc::now().format("%Y-%m-%dT%H:%M:%S%.fZ").to_string();
    let response = app
        .get_with_cookies(&format!("/messages?since={since}"), &cookies)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!([]));
}

#[tokio::test]
async fn test_history_rejects_malformed_since() {
    let app = TestApp::new().await;
    let cookies = app.logged_in("alice").await;

    let response = app
        .get_with_cookies("/messages?since=yesterday", &cookies)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
