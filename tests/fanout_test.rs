// Integration tests for the Validate → Persist → Broadcast → Notify-Offline pipeline

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use rusty_chat::config::ServerConfig;
use rusty_chat::core::connection::{ConnectionHandle, Outbound};
use rusty_chat::core::fanout::{CommandOutcome, Delivery};
use rusty_chat::core::message_types::{CommandEnvelope, ServerEvent};
use rusty_chat::core::room::RoomId;
use rusty_chat::core::server::{ChatServer, SharedChatServer};
use rusty_chat::core::UserId;
use rusty_chat::error::{Result, RustyChatError};
use rusty_chat::notify::{NotificationJob, PushProvider};
use rusty_chat::storage::traits::{
    DeleteMode, MessageId, MessageStore, MessageType, ReactionOp, ReactionOutcome, ReceiptOutcome, StoredMessage,
};
use rusty_chat::storage::MemoryStore;

#[derive(Default)]
struct RecordingPush {
    jobs: Mutex<Vec<NotificationJob>>,
}

#[async_trait]
impl PushProvider for RecordingPush {
    async fn send(&self, job: &NotificationJob) -> Result<()> {
        self.jobs.lock().await.push(job.clone());
        Ok(())
    }
}

struct Harness {
    server: SharedChatServer,
    store: Arc<MemoryStore>,
    push: Arc<RecordingPush>,
}

impl Harness {
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let push = Arc::new(RecordingPush::default());
        let server = ChatServer::new(ServerConfig::for_testing(), store.clone(), store.clone(), push.clone()).await;
        Self { server, store, push }
    }

    async fn connect(&self, room: RoomId, user: UserId, device: &str) -> Peer {
        let session = self.server.registry.activate(user, device).await.unwrap();
        let (handle, outbound) = self.server.hub.open(room, &session).await.unwrap();
        Peer { handle, outbound }
    }

    async fn send(&self, peer: &Peer, command: Value) -> Result<CommandOutcome> {
        self.send_on(&peer.handle, command).await
    }

    async fn send_on(&self, handle: &ConnectionHandle, command: Value) -> Result<CommandOutcome> {
        let envelope = CommandEnvelope::parse(&command.to_string())?;
        self.server.engine.handle(handle, envelope).await
    }

    async fn pushed_to(&self, user: UserId) -> Vec<NotificationJob> {
        for _ in 0..100 {
            let jobs: Vec<_> = self.push.jobs.lock().await.iter().filter(|j| j.target_user == user).cloned().collect();
            if !jobs.is_empty() {
                return jobs;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Vec::new()
    }
}

struct Peer {
    handle: ConnectionHandle,
    outbound: Outbound,
}

impl Peer {
    async fn recv(&mut self) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(1), self.outbound.next())
            .await
            .expect("timed out waiting for an event")
            .expect("connection closed");
        serde_json::from_str(frame.to_str().unwrap()).unwrap()
    }

    async fn assert_silent(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(50), self.outbound.next()).await;
        assert!(next.is_err(), "unexpected event: {:?}", next);
    }
}

#[tokio::test]
async fn test_direct_message_reaches_both_peers_with_store_timestamp() {
    let h = Harness::new().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let room = h.store.create_direct_room(a, b).await.unwrap();
    let mut pa = h.connect(room, a, "a-phone").await;
    let mut pb = h.connect(room, b, "b-phone").await;

    let outcome = h
        .send(&pa, json!({"type": "text_message", "content": "hi", "message_type": "TEXT"}))
        .await
        .unwrap();
    assert!(outcome.notified.is_empty());

    let history = h.store.room_history(&room, 10).await.unwrap();
    let stored = &history[0];
    for peer in [&mut pa, &mut pb] {
        let event = peer.recv().await;
        assert_eq!(event["type"], "text_message_received");
        assert_eq!(event["content"], "hi");
        assert_eq!(event["room"], room.to_string());
        assert_eq!(event["created_at"], json!(stored.created_at));
    }
}

#[tokio::test]
async fn test_offline_peer_gets_notification_and_sender_does_not() {
    let h = Harness::new().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let room = h.store.create_direct_room(a, b).await.unwrap();
    let mut pa = h.connect(room, a, "a-phone").await;

    let outcome = h.send(&pa, json!({"type": "text_message", "content": "hi"})).await.unwrap();
    assert_eq!(outcome.notified, vec![b]);
    pa.recv().await;

    let jobs = h.pushed_to(b).await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].body, "hi");
    assert_eq!(jobs[0].title, a.to_string());
    assert_eq!(jobs[0].metadata["type"], "message");
    assert!(h.push.jobs.lock().await.iter().all(|j| j.target_user != a));
}

#[tokio::test]
async fn test_superseded_device_is_closed_and_its_commands_never_persist() {
    let h = Harness::new().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let room = h.store.create_direct_room(a, b).await.unwrap();
    let mut on_x = h.connect(room, a, "x").await;

    h.server.registry.activate(a, "y").await.unwrap();
    assert!(on_x.outbound.next().await.is_none());

    let result = h.send(&on_x, json!({"type": "text_message", "content": "ghost"})).await;
    assert_eq!(result.err(), Some(RustyChatError::Unauthenticated));
    assert!(h.store.room_history(&room, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_left_group_member_gets_nothing() {
    let h = Harness::new().await;
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let group = h.store.create_group(a).await.unwrap();
    h.store.add_group_member(&group, b).await.unwrap();
    h.store.add_group_member(&group, c).await.unwrap();

    let mut pa = h.connect(group, a, "a").await;
    let mut pc = h.connect(group, c, "c").await;
    h.store.leave_group(&group, &c).await.unwrap();

    let outcome = h.send(&pa, json!({"type": "text_message", "content": "after"})).await.unwrap();
    assert_eq!(outcome.notified, vec![b]);
    pa.recv().await;
    pc.assert_silent().await;

    // the left member can no longer post either
    let result = h.send(&pc, json!({"type": "typing", "is_typing": true})).await;
    assert_eq!(result.err(), Some(RustyChatError::Unauthorized));
    assert!(h.pushed_to(c).await.is_empty());
}

#[tokio::test]
async fn test_edit_inside_window_is_broadcast() {
    let h = Harness::new().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let room = h.store.create_direct_room(a, b).await.unwrap();
    let mut pa = h.connect(room, a, "a").await;
    let mut pb = h.connect(room, b, "b").await;

    h.send(&pa, json!({"type": "text_message", "content": "helo"})).await.unwrap();
    let id = pa.recv().await["message_id"].clone();
    pb.recv().await;

    h.send(&pa, json!({"type": "message_edit", "message_id": id, "content": "hello"}))
        .await
        .unwrap();
    let edited = pb.recv().await;
    assert_eq!(edited["type"], "message_edited");
    assert_eq!(edited["new_content"], "hello");
}

#[tokio::test]
async fn test_edit_outside_window_is_rejected_and_leaves_message_unchanged() {
    let h = Harness::new().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let room = h.store.create_direct_room(a, b).await.unwrap();
    let pa = h.connect(room, a, "a").await;

    let old = StoredMessage {
        id: Uuid::new_v4(),
        room,
        sender_id: a,
        content: "original".to_string(),
        message_type: MessageType::Text,
        is_deleted: false,
        deleted_by_sender_only: false,
        edited_at: None,
        created_at: Utc::now() - chrono::Duration::minutes(16),
    };
    h.store.import_message(old.clone()).await;

    let result = h
        .send(&pa, json!({"type": "message_edit", "message_id": old.id, "content": "changed"}))
        .await;
    assert_eq!(result.err(), Some(RustyChatError::EditWindowExpired));
    assert_eq!(h.store.get_message(&old.id).await.unwrap().unwrap(), old);
}

#[tokio::test]
async fn test_only_sender_may_edit_or_delete() {
    let h = Harness::new().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let room = h.store.create_direct_room(a, b).await.unwrap();
    let mut pa = h.connect(room, a, "a").await;
    let pb = h.connect(room, b, "b").await;

    h.send(&pa, json!({"type": "text_message", "content": "mine"})).await.unwrap();
    let id = pa.recv().await["message_id"].clone();

    let edit = h.send(&pb, json!({"type": "message_edit", "message_id": id, "content": "x"})).await;
    assert!(matches!(edit, Err(RustyChatError::BadRequest(_))));
    let delete = h.send(&pb, json!({"type": "message_delete", "message_id": id})).await;
    assert!(matches!(delete, Err(RustyChatError::BadRequest(_))));
}

#[tokio::test]
async fn test_delete_for_everyone_is_persisted_then_broadcast() {
    let h = Harness::new().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let room = h.store.create_direct_room(a, b).await.unwrap();
    let mut pa = h.connect(room, a, "a").await;
    let mut pb = h.connect(room, b, "b").await;

    h.send(&pa, json!({"type": "text_message", "content": "oops"})).await.unwrap();
    let id = pa.recv().await["message_id"].clone();
    pb.recv().await;

    h.send(&pa, json!({"type": "message_delete", "message_id": id, "mode": "everyone"}))
        .await
        .unwrap();
    let event = pb.recv().await;
    assert_eq!(event["type"], "message_deleted");
    assert_eq!(event["mode"], "everyone");

    let id: Uuid = serde_json::from_value(id).unwrap();
    assert!(h.store.get_message(&id).await.unwrap().unwrap().is_deleted);
}

#[tokio::test]
async fn test_repeated_reaction_is_stored_once_and_broadcast_once() {
    let h = Harness::new().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let room = h.store.create_direct_room(a, b).await.unwrap();
    let mut pa = h.connect(room, a, "a").await;
    let mut pb = h.connect(room, b, "b").await;

    h.send(&pa, json!({"type": "text_message", "content": "react to me"})).await.unwrap();
    let id = pa.recv().await["message_id"].clone();
    pb.recv().await;

    let reaction = json!({"type": "reaction_add", "message_id": id, "emoji": "👍"});
    let first = h.send(&pb, reaction.clone()).await.unwrap();
    let second = h.send(&pb, reaction).await.unwrap();
    assert!(matches!(first.delivery, Delivery::Room(_)));
    assert!(matches!(second.delivery, Delivery::SenderOnly));

    assert_eq!(pa.recv().await["type"], "reaction_added");
    pa.assert_silent().await;
    // broadcast copy plus the acknowledgement of the repeat
    assert_eq!(pb.recv().await["type"], "reaction_added");
    assert_eq!(pb.recv().await["type"], "reaction_added");

    let id: MessageId = serde_json::from_value(id).unwrap();
    assert_eq!(h.store.reactions(&id).await.len(), 1);
}

#[tokio::test]
async fn test_reaction_notifies_offline_author() {
    let h = Harness::new().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let room = h.store.create_direct_room(a, b).await.unwrap();
    let message = h.store.persist_message(room, a, "hello".to_string(), MessageType::Text).await.unwrap();
    let pb = h.connect(room, b, "b").await;

    let outcome = h
        .send(&pb, json!({"type": "reaction_add", "message_id": message.id, "emoji": "🔥"}))
        .await
        .unwrap();
    assert_eq!(outcome.notified, vec![a]);

    let jobs = h.pushed_to(a).await;
    assert_eq!(jobs[0].body, format!("{} reacted 🔥", b));
    assert_eq!(jobs[0].metadata["type"], "reaction");
}

#[tokio::test]
async fn test_read_receipt_is_idempotent() {
    let h = Harness::new().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let room = h.store.create_direct_room(a, b).await.unwrap();
    let message = h.store.persist_message(room, a, "read me".to_string(), MessageType::Text).await.unwrap();
    let mut pa = h.connect(room, a, "a").await;
    let pb = h.connect(room, b, "b").await;

    let receipt = json!({"type": "read_receipt", "message_id": message.id});
    let first = h.send(&pb, receipt.clone()).await.unwrap();
    let second = h.send(&pb, receipt).await.unwrap();
    assert!(matches!(first.delivery, Delivery::Room(_)));
    assert!(matches!(second.delivery, Delivery::SenderOnly));
    assert_eq!(first.event, second.event);

    let event = pa.recv().await;
    assert_eq!(event["type"], "read_receipt");
    assert_eq!(event["reader_id"], json!(b));
    pa.assert_silent().await;
    assert_eq!(h.store.receipt_count(&message.id).await, 1);
}

#[tokio::test]
async fn test_typing_is_not_persisted() {
    let h = Harness::new().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let room = h.store.create_direct_room(a, b).await.unwrap();
    let pa = h.connect(room, a, "a").await;
    let mut pb = h.connect(room, b, "b").await;

    let outcome = h.send(&pa, json!({"type": "typing", "is_typing": true})).await.unwrap();
    assert!(outcome.notified.is_empty());
    let event = pb.recv().await;
    assert_eq!(event["type"], "typing");
    assert_eq!(event["is_typing"], true);
    assert!(h.store.room_history(&room, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_history_matches_what_was_broadcast() {
    let h = Harness::new().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let room = h.store.create_direct_room(a, b).await.unwrap();
    let mut pa = h.connect(room, a, "a").await;

    let outcome = h
        .send(&pa, json!({"type": "text_message", "content": "https://cdn/cat.png", "message_type": "IMAGE"}))
        .await
        .unwrap();
    pa.recv().await;

    let history = h.store.room_history(&room, 50).await.unwrap();
    assert_eq!(outcome.event, ServerEvent::message_received(&history[0]));
}

#[tokio::test]
async fn test_command_for_another_room_is_bad_request() {
    let h = Harness::new().await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let room = h.store.create_direct_room(a, b).await.unwrap();
    let pa = h.connect(room, a, "a").await;

    let result = h
        .send(&pa, json!({"type": "text_message", "content": "hi", "chat_id": Uuid::new_v4()}))
        .await;
    assert!(matches!(result, Err(RustyChatError::BadRequest(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_room_events_arrive_in_persistence_order() {
    let h = Arc::new(Harness::new().await);
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let group = h.store.create_group(a).await.unwrap();
    h.store.add_group_member(&group, b).await.unwrap();
    h.store.add_group_member(&group, c).await.unwrap();

    let pa = h.connect(group, a, "a").await;
    let pb = h.connect(group, b, "b").await;
    let mut pc = h.connect(group, c, "c").await;

    let mut tasks = Vec::new();
    for (handle, prefix) in [(pa.handle.clone(), "a"), (pb.handle.clone(), "b")] {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..10 {
                h.send_on(&handle, json!({"type": "text_message", "content": format!("{}{}", prefix, i)}))
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut previous: Option<chrono::DateTime<Utc>> = None;
    for _ in 0..20 {
        let event = pc.recv().await;
        let at: chrono::DateTime<Utc> = serde_json::from_value(event["created_at"].clone()).unwrap();
        if let Some(prev) = previous {
            assert!(at > prev);
        }
        previous = Some(at);
    }
}

/// Reads from memory, refuses every write with `error`
struct FailingStore {
    inner: Arc<MemoryStore>,
    error: RustyChatError,
}

impl FailingStore {
    fn refuse<T>(&self) -> Result<T> {
        Err(self.error.clone())
    }
}

#[async_trait]
impl MessageStore for FailingStore {
    async fn persist_message(&self, _: RoomId, _: UserId, _: String, _: MessageType) -> Result<StoredMessage> {
        self.refuse()
    }

    async fn get_message(&self, message_id: &MessageId) -> Result<Option<StoredMessage>> {
        self.inner.get_message(message_id).await
    }

    async fn edit_message(&self, _: &MessageId, _: String) -> Result<StoredMessage> {
        self.refuse()
    }

    async fn delete_message(&self, _: &MessageId, _: DeleteMode) -> Result<StoredMessage> {
        self.refuse()
    }

    async fn persist_read_receipt(&self, _: &MessageId, _: UserId) -> Result<ReceiptOutcome> {
        self.refuse()
    }

    async fn persist_reaction(&self, _: &MessageId, _: UserId, _: &str, _: ReactionOp) -> Result<ReactionOutcome> {
        self.refuse()
    }

    async fn room_history(&self, room: &RoomId, limit: usize) -> Result<Vec<StoredMessage>> {
        self.inner.room_history(room, limit).await
    }
}

#[tokio::test]
async fn test_persistence_failure_broadcasts_nothing() {
    // a backend-specific error must surface the same way as an outage
    for error in [
        RustyChatError::PersistenceFailed("database unavailable".to_string()),
        RustyChatError::SerializationError("corrupt row".to_string()),
    ] {
        let memory = Arc::new(MemoryStore::new());
        let push = Arc::new(RecordingPush::default());
        let failing = Arc::new(FailingStore {
            inner: memory.clone(),
            error,
        });
        let server = ChatServer::new(ServerConfig::for_testing(), failing, memory.clone(), push.clone()).await;

        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let room = memory.create_direct_room(a, b).await.unwrap();
        let theirs = memory.persist_message(room, b, "earlier".to_string(), MessageType::Text).await.unwrap();
        let mine = memory.persist_message(room, a, "mine".to_string(), MessageType::Text).await.unwrap();

        let sa = server.registry.activate(a, "a").await.unwrap();
        let sb = server.registry.activate(b, "b").await.unwrap();
        let (ha, _oa) = server.hub.open(room, &sa).await.unwrap();
        let (_hb, mut ob) = server.hub.open(room, &sb).await.unwrap();

        for command in [
            json!({"type": "text_message", "content": "lost"}),
            json!({"type": "reaction_add", "message_id": theirs.id, "emoji": "👍"}),
            json!({"type": "read_receipt", "message_id": theirs.id}),
            json!({"type": "message_edit", "message_id": mine.id, "content": "changed"}),
            json!({"type": "message_delete", "message_id": mine.id, "mode": "everyone"}),
        ] {
            let envelope = CommandEnvelope::parse(&command.to_string()).unwrap();
            let result = server.engine.handle(&ha, envelope).await;
            assert!(
                matches!(result, Err(RustyChatError::PersistenceFailed(_))),
                "{} gave {:?}",
                command["type"],
                result
            );
        }

        assert!(tokio::time::timeout(Duration::from_millis(50), ob.next()).await.is_err());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(push.jobs.lock().await.is_empty());
        assert_eq!(memory.get_message(&mine.id).await.unwrap().unwrap(), mine);
    }
}

/// Memory store whose deletes take a while to commit
struct SlowDeleteStore {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl MessageStore for SlowDeleteStore {
    async fn persist_message(&self, room: RoomId, sender: UserId, content: String, kind: MessageType) -> Result<StoredMessage> {
        self.inner.persist_message(room, sender, content, kind).await
    }

    async fn get_message(&self, message_id: &MessageId) -> Result<Option<StoredMessage>> {
        self.inner.get_message(message_id).await
    }

    async fn edit_message(&self, message_id: &MessageId, content: String) -> Result<StoredMessage> {
        self.inner.edit_message(message_id, content).await
    }

    async fn delete_message(&self, message_id: &MessageId, mode: DeleteMode) -> Result<StoredMessage> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.inner.delete_message(message_id, mode).await
    }

    async fn persist_read_receipt(&self, message_id: &MessageId, user: UserId) -> Result<ReceiptOutcome> {
        self.inner.persist_read_receipt(message_id, user).await
    }

    async fn persist_reaction(&self, message_id: &MessageId, user: UserId, emoji: &str, op: ReactionOp) -> Result<ReactionOutcome> {
        self.inner.persist_reaction(message_id, user, emoji, op).await
    }

    async fn room_history(&self, room: &RoomId, limit: usize) -> Result<Vec<StoredMessage>> {
        self.inner.room_history(room, limit).await
    }
}

#[tokio::test]
async fn test_edit_waiting_on_a_delete_sees_the_deletion() {
    let memory = Arc::new(MemoryStore::new());
    let slow = Arc::new(SlowDeleteStore { inner: memory.clone() });
    let push = Arc::new(RecordingPush::default());
    let server = ChatServer::new(ServerConfig::for_testing(), slow, memory.clone(), push).await;

    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let room = memory.create_direct_room(a, b).await.unwrap();
    let message = memory.persist_message(room, a, "original".to_string(), MessageType::Text).await.unwrap();
    let sa = server.registry.activate(a, "a").await.unwrap();
    let sb = server.registry.activate(b, "b").await.unwrap();
    let (ha, _oa) = server.hub.open(room, &sa).await.unwrap();
    let (_hb, mut ob) = server.hub.open(room, &sb).await.unwrap();

    let delete = {
        let server = server.clone();
        let handle = ha.clone();
        let command = json!({"type": "message_delete", "message_id": message.id, "mode": "everyone"});
        tokio::spawn(async move {
            let envelope = CommandEnvelope::parse(&command.to_string()).unwrap();
            server.engine.handle(&handle, envelope).await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let edit = json!({"type": "message_edit", "message_id": message.id, "content": "resurrected"});
    let edited = server.engine.handle(&ha, CommandEnvelope::parse(&edit.to_string()).unwrap()).await;
    assert!(matches!(edited, Err(RustyChatError::BadRequest(_))));
    assert!(delete.await.unwrap().is_ok());

    let stored = memory.get_message(&message.id).await.unwrap().unwrap();
    assert!(stored.is_deleted);
    assert_eq!(stored.content, "original");
    let frame = ob.next().await.unwrap();
    let event: Value = serde_json::from_str(frame.to_str().unwrap()).unwrap();
    assert_eq!(event["type"], "message_deleted");
    assert!(tokio::time::timeout(Duration::from_millis(50), ob.next()).await.is_err());
}
