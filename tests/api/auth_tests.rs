//! Account and Session API Tests

use axum::http::{header, StatusCode};
use pretty_assertions::assert_eq;

use crate::common::{body_json, cookie_value, set_cookies, TestApp, TEST_PASSWORD};

fn signup_form(username: &str, password: &str, confirm: &str) -> String {
    format!(
        "username={username}&email={username}@example.com&password={password}&confirm_password={confirm}"
    )
}

#[tokio::test]
async fn test_signup_redirects_to_login() {
    let app = TestApp::new().await;

    let response = app
        .post_form("/account/signup", &signup_form("alice", TEST_PASSWORD, TEST_PASSWORD))
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/account/login");
    assert_eq!(app.users.0.lock().len(), 1);
}

#[tokio::test]
async fn test_signup_htmx_gets_hx_redirect() {
    let app = TestApp::new().await;

    let response = app
        .post_form_with(
            "/account/signup",
            &signup_form("alice", TEST_PASSWORD, TEST_PASSWORD),
            &[("HX-Request", "true")],
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["HX-Redirect"], "/account/login");
}

#[tokio::test]
async fn test_signup_password_mismatch_is_rejected() {
    let app = TestApp::new().await;

    let response = app
        .post_form("/account/signup", &signup_form("alice", TEST_PASSWORD, "Different123"))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.users.0.lock().is_empty());

    let body = body_json(response).await;
    assert_eq!(body["code"], 10007);
    assert_eq!(body["errors"][0]["field"], "confirm_password");
    assert_eq!(body["errors"][0]["message"], "Passwords do not match");
}

#[tokio::test]
async fn test_duplicate_signup_conflicts() {
    let app = TestApp::new().await;
    let form = signup_form("alice", TEST_PASSWORD, TEST_PASSWORD);

    app.post_form("/account/signup", &form).await;
    let response = app.post_form("/account/signup", &form).await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_login_sets_session_cookies() {
    let app = TestApp::new().await;
    app.post_form("/account/signup", &signup_form("alice", TEST_PASSWORD, TEST_PASSWORD))
        .await;

    let response = app
        .post_form_with(
            "/account/login",
            &format!("email=alice@example.com&password={TEST_PASSWORD}"),
            &[("HX-Request", "true")],
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["HX-Redirect"], "/chat");

    let cookies = set_cookies(&response);
    assert!(cookies.iter().any(|c| c.starts_with("jwt=") && c.contains("SameSite=Lax")));
    assert!(cookies
        .iter()
        .any(|c| c.starts_with("refresh_token=") && c.contains("SameSite=Strict")));
    assert!(cookies.iter().all(|c| c.contains("HttpOnly")));
}

#[tokio::test]
async fn test_login_with_wrong_password_is_unauthorized() {
    let app = TestApp::new().await;
    app.post_form("/account/signup", &signup_form("alice", TEST_PASSWORD, TEST_PASSWORD))
        .await;

    let response = app
        .post_form("/account/login", "email=alice@example.com&password=WrongPassword1")
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(set_cookies(&response).is_empty());
}

#[tokio::test]
async fn test_protected_route_without_session_redirects() {
    let app = TestApp::new().await;

    let response = app.get("/messages").await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/account/login");
}

#[tokio::test]
async fn test_expired_access_token_is_silently_refreshed() {
    let app = TestApp::new().await;
    let cookies = app.logged_in("alice").await;

    // Drop the access token; only the refresh token remains
    let refresh_only = cookies
        .split("; ")
        .find(|c| c.starts_with("refresh_token="))
        .unwrap()
        .to_string();

    let response = app.get_with_cookies("/messages", &refresh_only).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(cookie_value(&response, "jwt").is_some());
    let rotated = cookie_value(&response, "refresh_token").unwrap();
    assert_ne!(format!("refresh_token={rotated}"), refresh_only);

    // The old refresh token was consumed by the rotation
    let replay = app.get_with_cookies("/messages", &refresh_only).await;
    assert_eq!(replay.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn test_refresh_endpoint_rotates_credentials() {
    let app = TestApp::new().await;
    let cookies = app.logged_in("alice").await;

    let response = app
        .post_form_with("/account/refresh", "", &[("Cookie", cookies.as_str())])
        .await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(set_cookies(&response).len(), 2);
}

#[tokio::test]
async fn test_refresh_without_cookie_htmx_gets_401() {
    let app = TestApp::new().await;

    let response = app
        .post_form_with("/account/refresh", "", &[("HX-Request", "true")])
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["HX-Redirect"], "/account/login");
}

#[tokio::test]
async fn test_logout_revokes_and_clears() {
    let app = TestApp::new().await;
    let cookies = app.logged_in("alice").await;

    let response = app
        .post_form_with("/account/logout", "", &[("Cookie", cookies.as_str())])
        .await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(set_cookies(&response).iter().all(|c| c.contains("Max-Age=0")));

    // Refresh token no longer works, even without the access token
    let refresh_only = cookies
        .split("; ")
        .find(|c| c.starts_with("refresh_token="))
        .unwrap()
        .to_string();
    let response = app.get_with_cookies("/messages", &refresh_only).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}
