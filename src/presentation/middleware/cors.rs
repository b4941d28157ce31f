//! CORS Middleware Configuration

use std::time::Duration;

use axum::http::{header, HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};

use crate::config::CorsSettings;

/// Headers HTMX attaches to its requests
const HTMX_HEADERS: [&str; 4] = ["hx-request", "hx-trigger", "hx-target", "hx-current-url"];

/// Create CORS layer from settings.
///
/// With no configured origins any origin may call, but without credentials.
/// Listed origins may send the session cookies.
pub fn create_cors_layer(settings: &CorsSettings) -> CorsLayer {
    let origins: Vec<_> = settings
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any);
    }

    let mut headers = vec![header::CONTENT_TYPE, header::ACCEPT];
    headers.extend(HTMX_HEADERS.iter().map(|h| HeaderName::from_static(h)));

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(headers)
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
