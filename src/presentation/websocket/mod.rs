//! WebSocket Chat
//!
//! The hub that owns connection state, the per-connection read/write
//! loops, and the wire types exchanged with clients.

pub mod client;
pub mod handler;
pub mod hub;
pub mod messages;

pub use handler::ws_handler;
pub use hub::{Hub, HubConfig, HubHandle};
pub use messages::{ChatMessage, ClientFrame, ServerEvent};
