//! In-memory storage implementation for development and testing
//!
//! Implements both the durability gateway and the membership source, plus the
//! fixture operations (rooms, groups, imports) that the HTTP CRUD layer would
//! normally drive against a relational database.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::traits::*;
use crate::core::room::{DirectPair, RoomId};
use crate::core::UserId;
use crate::error::{Result, RustyChatError};

#[derive(Debug, Clone)]
struct GroupMembership {
    left_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct GroupRecord {
    members: HashMap<UserId, GroupMembership>,
}

#[derive(Default)]
struct RoomTables {
    chats: HashMap<Uuid, DirectPair>,
    chat_by_pair: HashMap<DirectPair, Uuid>,
    groups: HashMap<Uuid, GroupRecord>,
}

#[derive(Default)]
struct MessageTables {
    messages: HashMap<MessageId, StoredMessage>,
    room_index: HashMap<RoomId, Vec<MessageId>>,
    receipts: HashMap<(MessageId, UserId), ReadReceipt>,
    reactions: HashMap<(MessageId, UserId, String), DateTime<Utc>>,
}

/// In-memory backend
pub struct MemoryStore {
    rooms: RwLock<RoomTables>,
    messages: RwLock<MessageTables>,
    last_timestamp: Mutex<DateTime<Utc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(RoomTables::default()),
            messages: RwLock::new(MessageTables::default()),
            last_timestamp: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Strictly increasing wall-clock timestamps
    async fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self.last_timestamp.lock().await;
        let now = Utc::now();
        let next = if now > *last {
            now
        } else {
            *last + Duration::microseconds(1)
        };
        *last = next;
        next
    }

    /// Returns the direct chat for the pair, creating it on first use
    pub async fn create_direct_room(&self, a: UserId, b: UserId) -> Result<RoomId> {
        let pair = DirectPair::new(a, b)?;
        let mut rooms = self.rooms.write().await;
        if let Some(id) = rooms.chat_by_pair.get(&pair) {
            return Ok(RoomId::Direct(*id));
        }
        let id = Uuid::new_v4();
        rooms.chats.insert(id, pair);
        rooms.chat_by_pair.insert(pair, id);
        log::debug!("Created direct chat {}", id);
        Ok(RoomId::Direct(id))
    }

    /// Creates a group with its creator as the first member
    pub async fn create_group(&self, creator: UserId) -> Result<RoomId> {
        let id = Uuid::new_v4();
        let mut members = HashMap::new();
        members.insert(creator, GroupMembership { left_at: None });
        self.rooms.write().await.groups.insert(id, GroupRecord { members });
        log::debug!("Created group {}", id);
        Ok(RoomId::Group(id))
    }

    /// Adds a member, or re-activates one who had left
    pub async fn add_group_member(&self, group: &RoomId, user: UserId) -> Result<()> {
        let group_id = group_uuid(group)?;
        let mut rooms = self.rooms.write().await;
        let record = rooms
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| RustyChatError::NotFound(format!("room {}", group)))?;
        record
            .members
            .entry(user)
            .and_modify(|m| m.left_at = None)
            .or_insert(GroupMembership { left_at: None });
        Ok(())
    }

    /// Soft-removes a member. The membership row stays for attribution.
    pub async fn leave_group(&self, group: &RoomId, user: &UserId) -> Result<()> {
        let group_id = group_uuid(group)?;
        let mut rooms = self.rooms.write().await;
        let record = rooms
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| RustyChatError::NotFound(format!("room {}", group)))?;
        match record.members.get_mut(user) {
            Some(membership) if membership.left_at.is_none() => {
                membership.left_at = Some(Utc::now());
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(RustyChatError::NotFound(format!("member {} of {}", user, group))),
        }
    }

    /// Inserts a message as-is, keeping its id and timestamps (history import)
    pub async fn import_message(&self, message: StoredMessage) {
        let mut guard = self.messages.write().await;
        let tables = &mut *guard;
        let room_ids = tables.room_index.entry(message.room).or_default();
        let position = {
            let messages = &tables.messages;
            room_ids
                .iter()
                .position(|id| messages.get(id).map_or(false, |m| m.created_at > message.created_at))
        };
        match position {
            Some(idx) => room_ids.insert(idx, message.id),
            None => room_ids.push(message.id),
        }
        tables.messages.insert(message.id, message);
    }

    /// Distinct (user, emoji) reactions stored for a message
    pub async fn reactions(&self, message_id: &MessageId) -> BTreeSet<(UserId, String)> {
        self.messages
            .read()
            .await
            .reactions
            .keys()
            .filter(|(m, _, _)| m == message_id)
            .map(|(_, user, emoji)| (*user, emoji.clone()))
            .collect()
    }

    pub async fn receipt_count(&self, message_id: &MessageId) -> usize {
        self.messages
            .read()
            .await
            .receipts
            .keys()
            .filter(|(m, _)| m == message_id)
            .count()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn group_uuid(room: &RoomId) -> Result<Uuid> {
    match room {
        RoomId::Group(id) => Ok(*id),
        RoomId::Direct(_) => Err(RustyChatError::BadRequest(format!("{} is not a group", room))),
    }
}

fn message_not_found(id: &MessageId) -> RustyChatError {
    RustyChatError::NotFound(format!("message {}", id))
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn persist_message(
        &self,
        room: RoomId,
        sender: UserId,
        content: String,
        message_type: MessageType,
    ) -> Result<StoredMessage> {
        let created_at = self.next_timestamp().await;
        let message = StoredMessage {
            id: Uuid::new_v4(),
            room,
            sender_id: sender,
            content,
            message_type,
            is_deleted: false,
            deleted_by_sender_only: false,
            edited_at: None,
            created_at,
        };

        let mut tables = self.messages.write().await;
        tables.messages.insert(message.id, message.clone());
        tables.room_index.entry(room).or_default().push(message.id);
        Ok(message)
    }

    async fn get_message(&self, message_id: &MessageId) -> Result<Option<StoredMessage>> {
        Ok(self.messages.read().await.messages.get(message_id).cloned())
    }

    async fn edit_message(&self, message_id: &MessageId, content: String) -> Result<StoredMessage> {
        let edited_at = self.next_timestamp().await;
        let mut tables = self.messages.write().await;
        let message = tables
            .messages
            .get_mut(message_id)
            .ok_or_else(|| message_not_found(message_id))?;
        message.content = content;
        message.edited_at = Some(edited_at);
        Ok(message.clone())
    }

    async fn delete_message(&self, message_id: &MessageId, mode: DeleteMode) -> Result<StoredMessage> {
        let mut tables = self.messages.write().await;
        let message = tables
            .messages
            .get_mut(message_id)
            .ok_or_else(|| message_not_found(message_id))?;
        match mode {
            DeleteMode::Everyone => message.is_deleted = true,
            DeleteMode::SelfOnly => message.deleted_by_sender_only = true,
        }
        Ok(message.clone())
    }

    async fn persist_read_receipt(&self, message_id: &MessageId, user: UserId) -> Result<ReceiptOutcome> {
        let read_at = self.next_timestamp().await;
        let mut tables = self.messages.write().await;
        if !tables.messages.contains_key(message_id) {
            return Err(message_not_found(message_id));
        }
        let key = (*message_id, user);
        if let Some(existing) = tables.receipts.get(&key) {
            return Ok(ReceiptOutcome {
                receipt: existing.clone(),
                created: false,
            });
        }
        let receipt = ReadReceipt {
            message_id: *message_id,
            user_id: user,
            read_at,
        };
        tables.receipts.insert(key, receipt.clone());
        Ok(ReceiptOutcome {
            receipt,
            created: true,
        })
    }

    async fn persist_reaction(
        &self,
        message_id: &MessageId,
        user: UserId,
        emoji: &str,
        op: ReactionOp,
    ) -> Result<ReactionOutcome> {
        let now = self.next_timestamp().await;
        let mut tables = self.messages.write().await;
        if !tables.messages.contains_key(message_id) {
            return Err(message_not_found(message_id));
        }
        let key = (*message_id, user, emoji.to_string());
        let outcome = match op {
            ReactionOp::Add => match tables.reactions.get(&key).copied() {
                Some(at) => ReactionOutcome { changed: false, at },
                None => {
                    tables.reactions.insert(key, now);
                    ReactionOutcome { changed: true, at: now }
                }
            },
            ReactionOp::Remove => ReactionOutcome {
                changed: tables.reactions.remove(&key).is_some(),
                at: now,
            },
        };
        Ok(outcome)
    }

    async fn room_history(&self, room: &RoomId, limit: usize) -> Result<Vec<StoredMessage>> {
        let tables = self.messages.read().await;
        let ids = match tables.room_index.get(room) {
            Some(ids) => ids,
            None => return Ok(Vec::new()),
        };
        let skip = ids.len().saturating_sub(limit);
        Ok(ids
            .iter()
            .skip(skip)
            .filter_map(|id| tables.messages.get(id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MembershipSource for MemoryStore {
    async fn direct_room_members(&self, chat_id: &Uuid) -> Result<Option<(UserId, UserId)>> {
        Ok(self.rooms.read().await.chats.get(chat_id).map(DirectPair::members))
    }

    async fn group_members(&self, group_id: &Uuid) -> Result<Option<HashSet<UserId>>> {
        Ok(self.rooms.read().await.groups.get(group_id).map(|group| {
            group
                .members
                .iter()
                .filter(|(_, m)| m.left_at.is_none())
                .map(|(user, _)| *user)
                .collect()
        }))
    }
}
