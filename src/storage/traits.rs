//! Collaborator interfaces for durable storage
//!
//! The realtime core never owns relational data. It writes through
//! [`MessageStore`] (the durability gateway) and reads room membership through
//! [`MembershipSource`]. Backends map their own failures to
//! `PersistenceFailed` or `NotFound`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::core::room::RoomId;
use crate::core::UserId;
use crate::error::Result;

pub type MessageId = Uuid;

/// Kind of content a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Video,
    File,
    Audio,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Text => "TEXT",
            MessageType::Image => "IMAGE",
            MessageType::Video => "VIDEO",
            MessageType::File => "FILE",
            MessageType::Audio => "AUDIO",
        };
        f.write_str(name)
    }
}

/// Who a delete applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    #[default]
    SelfOnly,
    Everyone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionOp {
    Add,
    Remove,
}

/// Durable message record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    /// Chat XOR group, never both
    pub room: RoomId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    pub is_deleted: bool,
    pub deleted_by_sender_only: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

/// Result of an idempotent receipt write
#[derive(Debug, Clone)]
pub struct ReceiptOutcome {
    pub receipt: ReadReceipt,
    /// False when the receipt already existed
    pub created: bool,
}

/// Result of an idempotent reaction write
#[derive(Debug, Clone)]
pub struct ReactionOutcome {
    /// False when the reaction was already in the requested state
    pub changed: bool,
    /// When the reaction was (or originally had been) recorded
    pub at: DateTime<Utc>,
}

/// Synchronous write path every event must pass before broadcast
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message. The store assigns id and a strictly increasing `created_at`.
    async fn persist_message(
        &self,
        room: RoomId,
        sender: UserId,
        content: String,
        message_type: MessageType,
    ) -> Result<StoredMessage>;

    async fn get_message(&self, message_id: &MessageId) -> Result<Option<StoredMessage>>;

    /// Replace the content and stamp `edited_at`
    async fn edit_message(&self, message_id: &MessageId, content: String) -> Result<StoredMessage>;

    /// Set the soft-delete flags for the given mode
    async fn delete_message(&self, message_id: &MessageId, mode: DeleteMode) -> Result<StoredMessage>;

    /// Record that `user` read a message. Idempotent per (message, user).
    async fn persist_read_receipt(&self, message_id: &MessageId, user: UserId) -> Result<ReceiptOutcome>;

    /// Add or remove a reaction. Idempotent per (message, user, emoji).
    async fn persist_reaction(
        &self,
        message_id: &MessageId,
        user: UserId,
        emoji: &str,
        op: ReactionOp,
    ) -> Result<ReactionOutcome>;

    /// Most recent `limit` messages of a room, oldest first
    async fn room_history(&self, room: &RoomId, limit: usize) -> Result<Vec<StoredMessage>>;
}

/// Read-only view of room membership
#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// The two participants of a direct chat, `None` if it does not exist
    async fn direct_room_members(&self, chat_id: &Uuid) -> Result<Option<(UserId, UserId)>>;

    /// Members of a group without a `left_at`, `None` if the group does not exist
    async fn group_members(&self, group_id: &Uuid) -> Result<Option<HashSet<UserId>>>;
}
