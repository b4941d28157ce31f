//! # Domain Entities
//!
//! Core domain entities of the chat server. All entities map directly to
//! their corresponding database tables.
//!
//! - **User**: account with credentials and display name
//! - **StoredMessage**: a persisted chat message
//! - **RefreshToken**: a revocable long-lived session credential
//!
//! ## Repository Traits
//!
//! Each entity has an associated repository trait defining data access operations.
//! These traits are implemented in the infrastructure layer, following the
//! dependency inversion principle.

mod message;
mod refresh_token;
mod user;

pub use message::{MessageReceipt, MessageRepository, StoredMessage};
pub use refresh_token::{RefreshToken, RefreshTokenRepository};
pub use user::{User, UserRepository};

#[cfg(test)]
pub use message::MockMessageRepository;
