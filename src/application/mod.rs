//! Application Layer
//!
//! Session management and the request payloads the presentation layer
//! validates before calling into it.

pub mod dto;
pub mod services;
