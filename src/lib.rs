//! Rusty Chat - realtime messaging core over WebSockets
//!
//! Session-consistent delivery for direct and group chats: a single active
//! session per user, per-room fan-out in persistence order, and best-effort
//! offline notifications.

pub mod auth;
pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod storage;

// Re-export main components
pub use config::ServerConfig;
pub use crate::core::server::{ChatServer, SharedChatServer};
pub use error::{Result, RustyChatError};
