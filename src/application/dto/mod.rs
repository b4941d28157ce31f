//! Data Transfer Objects
//!
//! Form and query payloads accepted by the HTTP layer.

pub mod request;

pub use request::{HistoryQuery, LoginRequest, SignupRequest};
