//! Offline notification dispatch
//!
//! Best-effort path that runs after a command was durably recorded. Nothing in
//! here can block or fail the realtime path.

pub mod dispatcher;
pub mod provider;
pub mod summary;

pub use dispatcher::{DispatchStats, NotificationDispatcher, NotificationJob};
pub use provider::{LogPushProvider, PushProvider};
pub use summary::{message_notification, reaction_notification};
