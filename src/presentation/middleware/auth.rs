//! Authentication Middleware
//!
//! Cookie session validation for protected routes. A valid `jwt` cookie
//! authenticates the request directly; otherwise the `refresh_token`
//! cookie is rotated and the new pair is written back on the response.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use uuid::Uuid;

use crate::application::services::AuthTokens;
use crate::config::JwtSettings;
use crate::shared::error::AppError;
use crate::startup::AppState;

pub const ACCESS_COOKIE: &str = "jwt";
pub const REFRESH_COOKIE: &str = "refresh_token";
pub const LOGIN_PATH: &str = "/account/login";

/// Request header HTMX sets on every request it issues
pub const HX_REQUEST: &str = "HX-Request";
/// Response header HTMX follows as a client-side redirect
pub const HX_REDIRECT: &str = "HX-Redirect";

/// Authenticated user extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
}

/// Authentication middleware for cookie sessions
pub async fn auth_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let access = jar.get(ACCESS_COOKIE).map(|c| c.value().to_owned());
    let refresh = jar.get(REFRESH_COOKIE).map(|c| c.value().to_owned());

    let authenticated = match state
        .auth
        .authenticate(access.as_deref(), refresh.as_deref())
        .await
    {
        Ok(authenticated) => authenticated,
        Err(e) if e.is_unauthenticated() => {
            tracing::debug!(error = %e, path = %request.uri().path(), "Unauthenticated request");
            return unauthenticated(request.headers());
        }
        Err(e) => return AppError::from(e).into_response(),
    };

    request.extensions_mut().insert(AuthUser {
        user_id: authenticated.user_id,
    });

    let mut response = next.run(request).await;
    if let Some(tokens) = authenticated.refreshed {
        append_session_cookies(response.headers_mut(), &tokens, &state.settings.jwt);
    }
    response
}

/// Whether the request was issued by HTMX.
pub fn is_htmx(headers: &HeaderMap) -> bool {
    headers
        .get(HX_REQUEST)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Send the caller to the login page. HTMX requests get a 401 carrying
/// `HX-Redirect`; everything else a 303.
pub fn unauthenticated(headers: &HeaderMap) -> Response {
    if is_htmx(headers) {
        (
            StatusCode::UNAUTHORIZED,
            [(HX_REDIRECT, LOGIN_PATH)],
            "Unauthorized",
        )
            .into_response()
    } else {
        Redirect::to(LOGIN_PATH).into_response()
    }
}

/// Append `Set-Cookie` headers for a freshly issued credential pair.
pub fn append_session_cookies(headers: &mut HeaderMap, tokens: &AuthTokens, jwt: &JwtSettings) {
    let access = session_cookie(
        ACCESS_COOKIE,
        &tokens.access_token,
        jwt.access_token_expiry_minutes * 60,
        "Lax",
        jwt.secure_cookies,
    );
    let refresh = session_cookie(
        REFRESH_COOKIE,
        &tokens.refresh_token,
        jwt.refresh_token_expiry_days * 24 * 60 * 60,
        "Strict",
        jwt.secure_cookies,
    );
    for cookie in [access, refresh].into_iter().flatten() {
        headers.append(header::SET_COOKIE, cookie);
    }
}

/// Append `Set-Cookie` headers that delete both session cookies.
pub fn append_cleared_cookies(headers: &mut HeaderMap, jwt: &JwtSettings) {
    for (name, same_site) in [(ACCESS_COOKIE, "Lax"), (REFRESH_COOKIE, "Strict")] {
        if let Some(cookie) = session_cookie(name, "", 0, same_site, jwt.secure_cookies) {
            headers.append(header::SET_COOKIE, cookie);
        }
    }
}

fn session_cookie(
    name: &str,
    value: &str,
    max_age_secs: i64,
    same_site: &str,
    secure: bool,
) -> Option<HeaderValue> {
    let mut cookie =
        format!("{name}={value}; Path=/; Max-Age={max_age_secs}; HttpOnly; SameSite={same_site}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).ok()
}
