//! Wire protocol of the realtime endpoint

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::room::RoomId;
use crate::core::UserId;
use crate::error::{Result, RustyChatError};
use crate::storage::traits::{DeleteMode, MessageId, MessageType, StoredMessage};

/// Client-to-server commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    #[serde(rename = "text_message")]
    TextMessage {
        content: String,
        #[serde(default)]
        message_type: MessageType,
    },

    /// Ephemeral, never persisted
    #[serde(rename = "typing")]
    Typing { is_typing: bool },

    #[serde(rename = "read_receipt")]
    ReadReceipt { message_id: MessageId },

    #[serde(rename = "message_edit")]
    MessageEdit { message_id: MessageId, content: String },

    #[serde(rename = "message_delete")]
    MessageDelete {
        message_id: MessageId,
        #[serde(default)]
        mode: DeleteMode,
    },

    #[serde(rename = "reaction_add")]
    ReactionAdd { message_id: MessageId, emoji: String },

    #[serde(rename = "reaction_remove")]
    ReactionRemove { message_id: MessageId, emoji: String },
}

impl ClientCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientCommand::TextMessage { .. } => "text_message",
            ClientCommand::Typing { .. } => "typing",
            ClientCommand::ReadReceipt { .. } => "read_receipt",
            ClientCommand::MessageEdit { .. } => "message_edit",
            ClientCommand::MessageDelete { .. } => "message_delete",
            ClientCommand::ReactionAdd { .. } => "reaction_add",
            ClientCommand::ReactionRemove { .. } => "reaction_remove",
        }
    }
}

/// A parsed command plus the room it explicitly names, if any
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub command: ClientCommand,
    pub target: Option<RoomId>,
}

impl CommandEnvelope {
    /// Parse one text frame. `chat_id` and `group_id` are mutually exclusive.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RustyChatError::BadRequest(format!("invalid JSON: {}", e)))?;

        let chat_id = target_id(&value, "chat_id")?;
        let group_id = target_id(&value, "group_id")?;
        let target = match (chat_id, group_id) {
            (Some(_), Some(_)) => {
                return Err(RustyChatError::BadRequest(
                    "a command targets either chat_id or group_id, not both".to_string(),
                ))
            }
            (Some(id), None) => Some(RoomId::Direct(id)),
            (None, Some(id)) => Some(RoomId::Group(id)),
            (None, None) => None,
        };

        let command = serde_json::from_value(value)
            .map_err(|e| RustyChatError::BadRequest(format!("invalid command: {}", e)))?;
        Ok(Self { command, target })
    }

    /// Resolve the room this command applies to on a connection bound to `bound`
    pub fn room_for(&self, bound: RoomId) -> Result<RoomId> {
        match self.target {
            Some(target) if target != bound => Err(RustyChatError::BadRequest(format!(
                "command targets {} but the connection is bound to {}",
                target, bound
            ))),
            _ => Ok(bound),
        }
    }
}

fn target_id(value: &Value, field: &str) -> Result<Option<Uuid>> {
    match value.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Uuid::parse_str(s)
            .map(Some)
            .map_err(|_| RustyChatError::BadRequest(format!("{} is not a valid id", field))),
        Some(_) => Err(RustyChatError::BadRequest(format!("{} must be a string", field))),
    }
}

/// Server-to-client events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "text_message_received")]
    TextMessageReceived {
        room: RoomId,
        message_id: MessageId,
        sender_id: UserId,
        content: String,
        message_type: MessageType,
        created_at: DateTime<Utc>,
    },

    #[serde(rename = "typing")]
    Typing {
        room: RoomId,
        user_id: UserId,
        is_typing: bool,
    },

    #[serde(rename = "read_receipt")]
    ReadReceipt {
        room: RoomId,
        message_id: MessageId,
        reader_id: UserId,
        read_at: DateTime<Utc>,
    },

    #[serde(rename = "message_edited")]
    MessageEdited {
        room: RoomId,
        message_id: MessageId,
        new_content: String,
        edited_at: DateTime<Utc>,
    },

    #[serde(rename = "message_deleted")]
    MessageDeleted {
        room: RoomId,
        message_id: MessageId,
        mode: DeleteMode,
    },

    #[serde(rename = "reaction_added")]
    ReactionAdded {
        room: RoomId,
        message_id: MessageId,
        user_id: UserId,
        emoji: String,
        created_at: DateTime<Utc>,
    },

    #[serde(rename = "reaction_removed")]
    ReactionRemoved {
        room: RoomId,
        message_id: MessageId,
        user_id: UserId,
        emoji: String,
    },

    /// Protocol-level failure, sent only to the originating connection
    #[serde(rename = "error")]
    Error { error: String, code: String },
}

impl ServerEvent {
    pub fn message_received(message: &StoredMessage) -> Self {
        ServerEvent::TextMessageReceived {
            room: message.room,
            message_id: message.id,
            sender_id: message.sender_id,
            content: message.content.clone(),
            message_type: message.message_type,
            created_at: message.created_at,
        }
    }

    pub fn error(err: &RustyChatError) -> Self {
        ServerEvent::Error {
            error: err.client_message(),
            code: err.code().to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
