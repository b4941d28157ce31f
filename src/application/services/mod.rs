//! Application Services
//!
//! - **AuthService**: signup, login, token validation and rotation

pub mod auth_service;

pub use auth_service::{AuthError, AuthService, AuthServiceImpl, AuthTokens, Authenticated, Claims};
