//! Notification text for offline recipients

use std::collections::BTreeMap;

use crate::constants::NOTIFY_PREVIEW_CHARS;
use crate::core::UserId;
use crate::notify::dispatcher::NotificationJob;
use crate::storage::traits::{MessageType, StoredMessage};

/// Notification for a new message. Text shows a short preview, other types a `[TYPE]` tag.
pub fn message_notification(target_user: UserId, message: &StoredMessage) -> NotificationJob {
    let body = match message.message_type {
        MessageType::Text => preview(&message.content),
        other => format!("[{}]", other),
    };

    let mut metadata = BTreeMap::new();
    metadata.insert("message_id".to_string(), message.id.to_string());
    metadata.insert("type".to_string(), "message".to_string());
    metadata.insert("room".to_string(), message.room.to_string());

    NotificationJob {
        target_user,
        title: message.sender_id.to_string(),
        body,
        metadata,
    }
}

/// Notification telling a message author someone reacted to it
pub fn reaction_notification(author: UserId, reactor: UserId, emoji: &str, message: &StoredMessage) -> NotificationJob {
    let mut metadata = BTreeMap::new();
    metadata.insert("message_id".to_string(), message.id.to_string());
    metadata.insert("type".to_string(), "reaction".to_string());

    NotificationJob {
        target_user: author,
        title: reactor.to_string(),
        body: format!("{} reacted {}", reactor, emoji),
        metadata,
    }
}

fn preview(content: &str) -> String {
    content.chars().take(NOTIFY_PREVIEW_CHARS).collect()
}
