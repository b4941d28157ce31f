//! # Domain Layer
//!
//! Core entities of the chat server and the repository traits that make up
//! its persistence contract. Independent of any framework or storage engine.

pub mod entities;

pub use entities::*;
