//! Connection hub: the room → live connections mapping
//!
//! Every room has its own slot behind its own mutex, so opening, closing or
//! delivering in one room never waits on another room. The per-user index used
//! for forced closes is sharded the same way. An outer map lock is only held to
//! look up, create or retire a slot.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::{Mutex, RwLock};

use crate::core::connection::{Connection, ConnectionHandle, ConnectionId, Outbound};
use crate::core::room::{MembershipResolver, RoomId};
use crate::core::session::{Session, SessionListener, SessionRegistry};
use crate::core::UserId;
use crate::error::{Result, RustyChatError};

#[derive(Default)]
struct Slot {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    /// Set once the slot was removed from the map; writers must fetch a fresh one
    retired: bool,
}

type SlotMap<K> = RwLock<HashMap<K, Arc<Mutex<Slot>>>>;

async fn lookup<K: Hash + Eq>(map: &SlotMap<K>, key: &K) -> Option<Arc<Mutex<Slot>>> {
    map.read().await.get(key).cloned()
}

/// Add `connection` under `key`, evicting the entries `evict` matches
async fn register<K, F>(map: &SlotMap<K>, key: K, connection: &Arc<Connection>, evict: F) -> Vec<Arc<Connection>>
where
    K: Hash + Eq + Copy,
    F: Fn(&Connection) -> bool,
{
    loop {
        let slot = match lookup(map, &key).await {
            Some(slot) => slot,
            None => map.write().await.entry(key).or_default().clone(),
        };
        let mut guard = slot.lock().await;
        if guard.retired {
            continue;
        }
        let evicted: Vec<Arc<Connection>> = guard.connections.values().filter(|c| evict(c)).cloned().collect();
        for old in &evicted {
            guard.connections.remove(&old.id);
        }
        guard.connections.insert(connection.id, connection.clone());
        return evicted;
    }
}

async fn unregister<K: Hash + Eq>(map: &SlotMap<K>, key: &K, id: &ConnectionId) -> Option<Arc<Connection>> {
    let slot = lookup(map, key).await?;
    let mut guard = slot.lock().await;
    let removed = guard.connections.remove(id);
    let empty = guard.connections.is_empty();
    drop(guard);
    if empty {
        retire_if_empty(map, key, &slot).await;
    }
    removed
}

async fn retire_if_empty<K: Hash + Eq>(map: &SlotMap<K>, key: &K, slot: &Arc<Mutex<Slot>>) {
    let mut slots = map.write().await;
    let mut guard = slot.lock().await;
    if guard.connections.is_empty() && !guard.retired {
        guard.retired = true;
        if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(key);
        }
    }
}

/// Outcome of one room-wide delivery
#[derive(Debug, Default, Clone)]
pub struct DeliveryReport {
    /// Users with at least one connection that accepted the payload
    pub delivered: HashSet<UserId>,
    /// Connections torn down because they could not accept the payload
    pub failed: Vec<ConnectionId>,
}

/// Owns every live connection
pub struct ConnectionHub {
    rooms: SlotMap<RoomId>,
    /// Per-user index used for forced closes
    users: SlotMap<UserId>,
    registry: Arc<SessionRegistry>,
    resolver: MembershipResolver,
    queue_capacity: usize,
}

impl ConnectionHub {
    pub fn new(registry: Arc<SessionRegistry>, resolver: MembershipResolver, queue_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            registry,
            resolver,
            queue_capacity,
        }
    }

    /// Admission check: the session is still the active one and its user
    /// belongs to the room.
    pub async fn admit(&self, room: &RoomId, session: &Session) -> Result<()> {
        self.registry.verify(session).await?;
        if !self.resolver.is_member(room, &session.user_id).await? {
            return Err(RustyChatError::Unauthorized);
        }
        Ok(())
    }

    /// Register a new connection for `session` in `room`.
    ///
    /// An existing connection of the same user and device in the same room is
    /// replaced and closed.
    pub async fn open(&self, room: RoomId, session: &Session) -> Result<(ConnectionHandle, Outbound)> {
        self.admit(&room, session).await?;

        let (connection, handle, outbound) = Connection::new(room, session, self.queue_capacity);
        let connection = Arc::new(connection);

        let replaced = register(&self.rooms, room, &connection, |c| c.same_device(session)).await;
        for old in &replaced {
            unregister(&self.users, &old.user_id, &old.id).await;
        }
        register(&self.users, session.user_id, &connection, |_| false).await;
        for old in replaced {
            debug!("Connection {} replaced by {} in {}", old.id, connection.id, room);
            old.close();
        }

        // A forced close may have run between admission and registration
        if let Err(e) = self.registry.verify(session).await {
            self.remove(&room, &connection.id, &session.user_id).await;
            connection.close();
            return Err(e);
        }

        info!(
            "Connection {} opened for user {} in {}",
            connection.id, session.user_id, room
        );
        Ok((handle, outbound))
    }

    /// Remove a connection. Closing an already removed connection is a no-op.
    pub async fn close(&self, handle: &ConnectionHandle) {
        if let Some(connection) = self.remove(&handle.room, &handle.id, &handle.session.user_id).await {
            connection.close();
            info!(
                "Connection {} closed after {:?}",
                connection.id,
                connection.connection_duration()
            );
        }
    }

    /// Send `payload` to every connection in `room` whose user is in `members`.
    ///
    /// Sends never wait: a connection whose queue is full or gone is torn down
    /// and reported as failed.
    pub async fn deliver_to(&self, room: &RoomId, members: &HashSet<UserId>, payload: &str) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let slot = match lookup(&self.rooms, room).await {
            Some(slot) => slot,
            None => return report,
        };

        let mut broken = Vec::new();
        {
            let slot = slot.lock().await;
            for connection in slot.connections.values() {
                if !members.contains(&connection.user_id) {
                    continue;
                }
                match connection.try_send_text(payload) {
                    Ok(()) => {
                        report.delivered.insert(connection.user_id);
                    }
                    Err(_) => broken.push(connection.clone()),
                }
            }
        }

        for connection in broken {
            warn!("Tearing down connection {} in {} after delivery failure", connection.id, room);
            self.remove(room, &connection.id, &connection.user_id).await;
            connection.close();
            report.failed.push(connection.id);
        }
        // A user whose only connections failed was not reached
        if !report.failed.is_empty() {
            let reached = self.connected_users(room).await;
            report.delivered.retain(|user| reached.contains(user));
        }
        report
    }

    /// Send a payload to one connection only (errors and acknowledgements)
    pub async fn send_to(&self, handle: &ConnectionHandle, payload: &str) -> Result<()> {
        let connection = match lookup(&self.rooms, &handle.room).await {
            Some(slot) => slot.lock().await.connections.get(&handle.id).cloned(),
            None => None,
        };
        let connection = connection
            .ok_or_else(|| RustyChatError::DeliveryFailed(format!("connection {} is closed", handle.id)))?;

        if let Err(e) = connection.try_send_text(payload) {
            self.remove(&handle.room, &connection.id, &connection.user_id).await;
            connection.close();
            return Err(e);
        }
        Ok(())
    }

    /// Close every connection opened with `session`
    pub async fn force_close(&self, session: &Session) -> usize {
        let targets: Vec<Arc<Connection>> = match lookup(&self.users, &session.user_id).await {
            Some(slot) => slot
                .lock()
                .await
                .connections
                .values()
                .filter(|c| c.belongs_to(session))
                .cloned()
                .collect(),
            None => return 0,
        };

        for connection in &targets {
            self.remove(&connection.room, &connection.id, &connection.user_id).await;
            connection.close();
        }
        if !targets.is_empty() {
            info!(
                "Force-closed {} connection(s) of user {} on device {}",
                targets.len(),
                session.user_id,
                session.device_id
            );
        }
        targets.len()
    }

    /// Users with at least one live connection in `room`
    pub async fn connected_users(&self, room: &RoomId) -> HashSet<UserId> {
        match lookup(&self.rooms, room).await {
            Some(slot) => slot.lock().await.connections.values().map(|c| c.user_id).collect(),
            None => HashSet::new(),
        }
    }

    pub async fn connection_count(&self, room: &RoomId) -> usize {
        match lookup(&self.rooms, room).await {
            Some(slot) => slot.lock().await.connections.len(),
            None => 0,
        }
    }

    async fn remove(&self, room: &RoomId, id: &ConnectionId, user: &UserId) -> Option<Arc<Connection>> {
        let removed = unregister(&self.rooms, room, id).await;
        unregister(&self.users, user, id).await;
        removed
    }
}

#[async_trait]
impl SessionListener for ConnectionHub {
    async fn session_ended(&self, session: &Session) {
        self.force_close(session).await;
    }
}
