//! Realtime core: sessions, rooms, live connections and event fan-out

pub mod connection;
pub mod fanout;
pub mod hub;
pub mod message_types;
pub mod room;
pub mod server;
pub mod session;

/// Identity of a user as stored by the durability collaborator
pub type UserId = uuid::Uuid;

// Re-export main components for convenience
pub use connection::{ConnectionHandle, ConnectionId, Outbound};
pub use fanout::FanoutEngine;
pub use hub::{ConnectionHub, DeliveryReport};
pub use message_types::{ClientCommand, CommandEnvelope, ServerEvent};
pub use room::{DirectPair, MembershipResolver, RoomId};
pub use server::ChatServer;
pub use session::{Session, SessionListener, SessionRegistry};
