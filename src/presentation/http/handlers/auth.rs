//! Account Handlers
//!
//! Form-driven signup, login, logout and silent refresh. Successful calls
//! navigate the browser: HTMX callers receive `HX-Redirect`, plain form
//! posts a 303.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Form,
};
use axum_extra::extract::CookieJar;
use validator::Validate;

use crate::application::dto::{LoginRequest, SignupRequest};
use crate::presentation::middleware::auth::{
    append_cleared_cookies, append_session_cookies, is_htmx, unauthenticated, HX_REDIRECT,
    LOGIN_PATH, REFRESH_COOKIE,
};
use crate::shared::error::AppError;
use crate::shared::validation::validation_error;
use crate::startup::AppState;

/// Landing page after login
pub const CHAT_PATH: &str = "/chat";

/// Create an account
pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(body): Form<SignupRequest>,
) -> Result<Response, AppError> {
    body.validate().map_err(validation_error)?;

    state
        .auth
        .signup(&body.username, &body.email, &body.password)
        .await?;

    Ok(navigate(&headers, LOGIN_PATH))
}

/// Login with credentials
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(body): Form<LoginRequest>,
) -> Result<Response, AppError> {
    body.validate().map_err(validation_error)?;

    let (_, tokens) = state.auth.login(&body.email, &body.password).await?;

    let mut response = navigate(&headers, CHAT_PATH);
    append_session_cookies(response.headers_mut(), &tokens, &state.settings.jwt);
    Ok(response)
}

/// Rotate the session from the refresh cookie alone
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let Some(refresh_token) = jar.get(REFRESH_COOKIE).map(|c| c.value().to_owned()) else {
        return Ok(unauthenticated(&headers));
    };

    match state.auth.refresh(&refresh_token).await {
        Ok(tokens) => {
            let mut response = StatusCode::NO_CONTENT.into_response();
            append_session_cookies(response.headers_mut(), &tokens, &state.settings.jwt);
            Ok(response)
        }
        Err(e) if e.is_unauthenticated() => {
            tracing::debug!(error = %e, "Refresh rejected");
            Ok(unauthenticated(&headers))
        }
        Err(e) => Err(e.into()),
    }
}

/// Logout (revoke refresh token and clear cookies)
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    if let Some(cookie) = jar.get(REFRESH_COOKIE) {
        // Logout always succeeds for the client
        if let Err(e) = state.auth.logout(cookie.value()).await {
            tracing::warn!(error = %e, "Failed to revoke refresh token");
        }
    }

    let mut response = navigate(&headers, LOGIN_PATH);
    append_cleared_cookies(response.headers_mut(), &state.settings.jwt);
    response
}

fn navigate(headers: &HeaderMap, to: &'static str) -> Response {
    if is_htmx(headers) {
        (StatusCode::OK, [(HX_REDIRECT, to)]).into_response()
    } else {
        Redirect::to(to).into_response()
    }
}
