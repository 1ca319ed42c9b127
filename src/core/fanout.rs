//! Event fan-out engine
//!
//! Every command goes through Validate → Persist → Broadcast → Notify-Offline.
//! Validation failures and persistence failures return to the sender and
//! nothing is broadcast. Delivery failures only tear down the affected
//! connection. Notification failures are logged by the dispatcher.
//!
//! Same-room ordering: per-command checks, Persist and Broadcast run under one
//! per-room sequencer lock, so connections observe a room's events in
//! persistence order. Rooms never share a sequencer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, trace, warn};
use tokio::sync::{Mutex, RwLock};

use crate::constants::{MAX_CONTENT_LENGTH, MAX_EMOJI_LENGTH, SEQUENCER_SWEEP_THRESHOLD};
use crate::core::connection::ConnectionHandle;
use crate::core::hub::{ConnectionHub, DeliveryReport};
use crate::core::message_types::{ClientCommand, CommandEnvelope, ServerEvent};
use crate::core::room::{MembershipResolver, RoomId};
use crate::core::session::SessionRegistry;
use crate::core::UserId;
use crate::error::{Result, RustyChatError};
use crate::notify::{message_notification, reaction_notification, NotificationDispatcher};
use crate::storage::traits::{MessageId, MessageStore, ReactionOp, StoredMessage};

/// Where an accepted command's event went
#[derive(Debug, Clone)]
pub enum Delivery {
    /// Broadcast to the room
    Room(DeliveryReport),
    /// Idempotent repeat, echoed to the sender only
    SenderOnly,
}

/// Result of one accepted command
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub event: ServerEvent,
    pub delivery: Delivery,
    /// Users an offline notification was queued for
    pub notified: Vec<UserId>,
}

impl CommandOutcome {
    fn room(event: ServerEvent, report: DeliveryReport) -> Self {
        Self {
            event,
            delivery: Delivery::Room(report),
            notified: Vec::new(),
        }
    }
}

/// True if an edit at `at` of a message created at `created_at` is allowed
pub fn within_edit_window(created_at: DateTime<Utc>, at: DateTime<Utc>, window: Duration) -> bool {
    at - created_at <= window
}

pub struct FanoutEngine {
    store: Arc<dyn MessageStore>,
    resolver: MembershipResolver,
    registry: Arc<SessionRegistry>,
    hub: Arc<ConnectionHub>,
    dispatcher: Arc<NotificationDispatcher>,
    edit_window: Duration,
    sequencers: RwLock<HashMap<RoomId, Arc<Mutex<()>>>>,
}

impl FanoutEngine {
    pub fn new(
        store: Arc<dyn MessageStore>,
        resolver: MembershipResolver,
        registry: Arc<SessionRegistry>,
        hub: Arc<ConnectionHub>,
        dispatcher: Arc<NotificationDispatcher>,
        edit_window: Duration,
    ) -> Self {
        Self {
            store,
            resolver,
            registry,
            hub,
            dispatcher,
            edit_window,
            sequencers: RwLock::new(HashMap::new()),
        }
    }

    /// Run one command received on `conn`
    pub async fn handle(&self, conn: &ConnectionHandle, envelope: CommandEnvelope) -> Result<CommandOutcome> {
        // A closed or superseded connection never reaches Persist
        if conn.is_closed() {
            return Err(RustyChatError::Unauthenticated);
        }
        self.registry.verify(&conn.session).await?;

        let room = envelope.room_for(conn.room)?;
        let sender = conn.session.user_id;

        // Snapshot taken at acceptance; later joins or leaves don't change this event's audience
        let members = self.resolver.resolve_members(&room).await?;
        if !members.contains(&sender) {
            return Err(RustyChatError::Unauthorized);
        }
        trace!("{} from {} in {}", envelope.command.kind(), sender, room);

        // Message state is read and checked under the room lock, so a
        // concurrent delete or an expiring window is seen before Persist
        let sequencer = self.sequencer(&room).await;
        let result = {
            let _order = sequencer.lock().await;
            self.apply(conn, room, sender, &members, envelope.command).await
        };
        drop(sequencer);
        self.sweep_sequencers().await;
        result
    }

    async fn apply(
        &self,
        conn: &ConnectionHandle,
        room: RoomId,
        sender: UserId,
        members: &HashSet<UserId>,
        command: ClientCommand,
    ) -> Result<CommandOutcome> {
        match command {
            ClientCommand::TextMessage { content, message_type } => {
                let content = validate_content(content)?;
                let message = self
                    .persist(self.store.persist_message(room, sender, content, message_type))
                    .await?;
                let event = ServerEvent::message_received(&message);
                let report = self.broadcast(&room, members, &event).await?;

                let offline: Vec<UserId> = members
                    .iter()
                    .filter(|user| **user != sender && !report.delivered.contains(user))
                    .copied()
                    .collect();
                for user in &offline {
                    self.dispatcher.enqueue(message_notification(*user, &message));
                }

                let mut outcome = CommandOutcome::room(event, report);
                outcome.notified = offline;
                Ok(outcome)
            }

            ClientCommand::Typing { is_typing } => {
                let event = ServerEvent::Typing {
                    room,
                    user_id: sender,
                    is_typing,
                };
                let report = self.broadcast(&room, members, &event).await?;
                Ok(CommandOutcome::room(event, report))
            }

            ClientCommand::ReadReceipt { message_id } => {
                self.message_in_room(&message_id, &room).await?;
                let outcome = self.persist(self.store.persist_read_receipt(&message_id, sender)).await?;
                let event = ServerEvent::ReadReceipt {
                    room,
                    message_id,
                    reader_id: sender,
                    read_at: outcome.receipt.read_at,
                };
                if outcome.created {
                    let report = self.broadcast(&room, members, &event).await?;
                    Ok(CommandOutcome::room(event, report))
                } else {
                    self.acknowledge(conn, event).await
                }
            }

            ClientCommand::MessageEdit { message_id, content } => {
                let content = validate_content(content)?;
                let message = self.owned_message(&message_id, &room, sender).await?;
                if message.is_deleted {
                    return Err(RustyChatError::BadRequest("cannot edit a deleted message".to_string()));
                }
                if !within_edit_window(message.created_at, Utc::now(), self.edit_window) {
                    return Err(RustyChatError::EditWindowExpired);
                }

                let edited = self.persist(self.store.edit_message(&message_id, content)).await?;
                let edited_at = edited.edited_at.ok_or_else(|| {
                    RustyChatError::PersistenceFailed("store did not stamp edited_at".to_string())
                })?;
                let event = ServerEvent::MessageEdited {
                    room,
                    message_id,
                    new_content: edited.content,
                    edited_at,
                };
                let report = self.broadcast(&room, members, &event).await?;
                Ok(CommandOutcome::room(event, report))
            }

            ClientCommand::MessageDelete { message_id, mode } => {
                self.owned_message(&message_id, &room, sender).await?;
                self.persist(self.store.delete_message(&message_id, mode)).await?;
                let event = ServerEvent::MessageDeleted { room, message_id, mode };
                let report = self.broadcast(&room, members, &event).await?;
                Ok(CommandOutcome::room(event, report))
            }

            ClientCommand::ReactionAdd { message_id, emoji } => {
                let emoji = validate_emoji(emoji)?;
                let message = self.message_in_room(&message_id, &room).await?;
                if message.is_deleted {
                    return Err(RustyChatError::BadRequest("cannot react to a deleted message".to_string()));
                }

                let outcome = self
                    .persist(self.store.persist_reaction(&message_id, sender, &emoji, ReactionOp::Add))
                    .await?;
                let event = ServerEvent::ReactionAdded {
                    room,
                    message_id,
                    user_id: sender,
                    emoji: emoji.clone(),
                    created_at: outcome.at,
                };
                if !outcome.changed {
                    return self.acknowledge(conn, event).await;
                }

                let report = self.broadcast(&room, members, &event).await?;
                let author = message.sender_id;
                let mut notified = Vec::new();
                if author != sender && members.contains(&author) && !report.delivered.contains(&author) {
                    self.dispatcher
                        .enqueue(reaction_notification(author, sender, &emoji, &message));
                    notified.push(author);
                }
                let mut result = CommandOutcome::room(event, report);
                result.notified = notified;
                Ok(result)
            }

            ClientCommand::ReactionRemove { message_id, emoji } => {
                let emoji = validate_emoji(emoji)?;
                self.message_in_room(&message_id, &room).await?;
                let outcome = self
                    .persist(self.store.persist_reaction(&message_id, sender, &emoji, ReactionOp::Remove))
                    .await?;
                let event = ServerEvent::ReactionRemoved {
                    room,
                    message_id,
                    user_id: sender,
                    emoji,
                };
                if !outcome.changed {
                    return self.acknowledge(conn, event).await;
                }
                let report = self.broadcast(&room, members, &event).await?;
                Ok(CommandOutcome::room(event, report))
            }
        }
    }

    async fn sequencer(&self, room: &RoomId) -> Arc<Mutex<()>> {
        if let Some(lock) = self.sequencers.read().await.get(room) {
            return lock.clone();
        }
        self.sequencers.write().await.entry(*room).or_default().clone()
    }

    /// Drop idle sequencers once the map passes the sweep threshold
    async fn sweep_sequencers(&self) {
        if self.sequencers.read().await.len() < SEQUENCER_SWEEP_THRESHOLD {
            return;
        }
        let mut sequencers = self.sequencers.write().await;
        let before = sequencers.len();
        retain_busy(&mut sequencers);
        debug!("Swept {} idle room sequencer(s)", before - sequencers.len());
    }

    /// Await a store call. Missing or invalid references pass through; any
    /// other store error becomes `PersistenceFailed`.
    async fn persist<T>(&self, write: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        write.await.map_err(|e| match e {
            RustyChatError::NotFound(_) | RustyChatError::BadRequest(_) => e,
            RustyChatError::PersistenceFailed(reason) => {
                error!("Persistence failed, nothing broadcast: {}", reason);
                RustyChatError::PersistenceFailed(reason)
            }
            other => {
                error!("Store error, nothing broadcast: {}", other);
                RustyChatError::PersistenceFailed(other.to_string())
            }
        })
    }

    async fn broadcast(&self, room: &RoomId, members: &HashSet<UserId>, event: &ServerEvent) -> Result<DeliveryReport> {
        let payload = event.to_json()?;
        let report = self.hub.deliver_to(room, members, &payload).await;
        if !report.failed.is_empty() {
            warn!("{} connection(s) in {} dropped during broadcast", report.failed.len(), room);
        }
        debug!("Delivered to {} user(s) in {}", report.delivered.len(), room);
        Ok(report)
    }

    async fn acknowledge(&self, conn: &ConnectionHandle, event: ServerEvent) -> Result<CommandOutcome> {
        let payload = event.to_json()?;
        if let Err(e) = self.hub.send_to(conn, &payload).await {
            debug!("Acknowledgement to {} not delivered: {}", conn.id, e);
        }
        Ok(CommandOutcome {
            event,
            delivery: Delivery::SenderOnly,
            notified: Vec::new(),
        })
    }

    async fn message_in_room(&self, message_id: &MessageId, room: &RoomId) -> Result<StoredMessage> {
        let message = self
            .persist(self.store.get_message(message_id))
            .await?
            .ok_or_else(|| RustyChatError::NotFound(format!("message {}", message_id)))?;
        if message.room != *room {
            return Err(RustyChatError::BadRequest(format!(
                "message {} does not belong to {}",
                message_id, room
            )));
        }
        Ok(message)
    }

    async fn owned_message(&self, message_id: &MessageId, room: &RoomId, sender: UserId) -> Result<StoredMessage> {
        let message = self.message_in_room(message_id, room).await?;
        if message.sender_id != sender {
            return Err(RustyChatError::BadRequest(
                "only the sender can change a message".to_string(),
            ));
        }
        Ok(message)
    }
}

// An entry is idle when the map holds its only reference
fn retain_busy(sequencers: &mut HashMap<RoomId, Arc<Mutex<()>>>) {
    sequencers.retain(|_, lock| Arc::strong_count(lock) > 1);
}

fn validate_content(content: String) -> Result<String> {
    if content.trim().is_empty() {
        return Err(RustyChatError::BadRequest("content must not be empty".to_string()));
    }
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(RustyChatError::BadRequest(format!(
            "content exceeds {} characters",
            MAX_CONTENT_LENGTH
        )));
    }
    Ok(content)
}

fn validate_emoji(emoji: String) -> Result<String> {
    let emoji = emoji.trim().to_string();
    let len = emoji.chars().count();
    if len == 0 || len > MAX_EMOJI_LENGTH {
        return Err(RustyChatError::BadRequest(format!(
            "emoji must be 1-{} characters",
            MAX_EMOJI_LENGTH
        )));
    }
    Ok(emoji)
}
