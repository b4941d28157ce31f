//! Presentation Layer
//!
//! HTTP routes, middleware and the websocket hub.

pub mod http;
pub mod middleware;
pub mod websocket;
