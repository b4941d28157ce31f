//! HTTP Layer
//!
//! Account, history, health and metrics endpoints.

pub mod handlers;
pub mod routes;
