//! Durability gateway and membership source contracts, plus the in-memory backend

pub mod memory;
pub mod traits;

// Re-export the storage contracts
pub use memory::MemoryStore;
pub use traits::{
    DeleteMode, MembershipSource, MessageId, MessageStore, MessageType, ReactionOp, StoredMessage,
};
