//! Shared Utilities
//!
//! Common utilities used across all layers.

pub mod error;
pub mod quota;
pub mod sanitize;
pub mod validation;
