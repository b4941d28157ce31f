//! HTTP API tests

mod auth_tests;
mod health_tests;
mod message_tests;
mod rate_limit_tests;
