//! Infrastructure Layer
//!
//! Implementations of the external collaborators:
//! - PostgreSQL repositories and migrations
//! - Redis Streams message bus
//! - Prometheus metrics

pub mod bus;
pub mod database;
pub mod metrics;
pub mod repositories;
