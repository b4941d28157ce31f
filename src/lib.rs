//! # Chatter
//!
//! A real-time chat server:
//! - Cookie sessions with short-lived JWT access tokens and rotating
//!   refresh tokens
//! - A single-owner hub that persists, publishes and fans out messages
//! - Per-connection message and typing rate limits, per-address HTTP limits
//! - PostgreSQL storage and an optional Redis Streams bus between instances
//!
//! ## Module Structure
//!
//! ```text
//! chatter/
//! +-- config/         Configuration management
//! +-- domain/         Entities and repository traits
//! +-- application/    Session manager and request DTOs
//! +-- infrastructure/ Database, repositories, message bus, metrics
//! +-- presentation/   HTTP routes, middleware, websocket hub
//! +-- shared/         Errors, sanitizer, token bucket, validation
//! ```

// Configuration module
pub mod config;

// Domain layer - entities and repository traits
pub mod domain;

// Application layer - Business services
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
