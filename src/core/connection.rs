//! WebSocket connection state
//! Handles the lifecycle of a single client connection bound to one room

use std::time::{Duration, Instant};

use log::warn;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;
use warp::ws::Message;

use crate::core::room::RoomId;
use crate::core::session::Session;
use crate::core::UserId;
use crate::error::{Result, RustyChatError};

pub type ConnectionId = Uuid;

/// Hub-side state of a live connection
pub struct Connection {
    pub id: ConnectionId,
    pub room: RoomId,
    pub user_id: UserId,
    pub device_id: String,
    session_token: String,
    sender: mpsc::Sender<Message>,
    close_tx: watch::Sender<bool>,
    pub connected_at: Instant,
}

impl Connection {
    /// Create a connection with a bounded outbound queue of `capacity` frames
    pub fn new(room: RoomId, session: &Session, capacity: usize) -> (Self, ConnectionHandle, Outbound) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (close_tx, close_rx) = watch::channel(false);
        let id = Uuid::new_v4();

        let connection = Self {
            id,
            room,
            user_id: session.user_id,
            device_id: session.device_id.clone(),
            session_token: session.token.clone(),
            sender,
            close_tx,
            connected_at: Instant::now(),
        };
        let handle = ConnectionHandle {
            id,
            room,
            session: session.clone(),
            closed: close_rx.clone(),
        };
        let outbound = Outbound {
            receiver,
            closed: close_rx,
        };
        (connection, handle, outbound)
    }

    /// Queue a text frame without waiting. A full or closed queue is a delivery failure.
    pub fn try_send_text(&self, payload: &str) -> Result<()> {
        self.sender.try_send(Message::text(payload)).map_err(|e| {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "outbound queue full",
                mpsc::error::TrySendError::Closed(_) => "outbound queue closed",
            };
            warn!("Failed to deliver to connection {}: {}", self.id, reason);
            RustyChatError::DeliveryFailed(format!("connection {}: {}", self.id, reason))
        })
    }

    /// Signal the connection's tasks to stop
    pub fn close(&self) {
        self.close_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.close_tx.borrow()
    }

    /// True if this connection was opened with exactly this session (same token)
    pub fn belongs_to(&self, session: &Session) -> bool {
        self.user_id == session.user_id
            && self.device_id == session.device_id
            && self.session_token == session.token
    }

    pub fn same_device(&self, session: &Session) -> bool {
        self.user_id == session.user_id && self.device_id == session.device_id
    }

    pub fn connection_duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

/// What the owning handler keeps to address its connection
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub room: RoomId,
    pub session: Session,
    closed: watch::Receiver<bool>,
}

impl ConnectionHandle {
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the hub closed this connection (or dropped it)
    pub async fn wait_closed(&mut self) {
        while !*self.closed.borrow_and_update() {
            if self.closed.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Receiving half of a connection's outbound queue, drained by the writer task
pub struct Outbound {
    receiver: mpsc::Receiver<Message>,
    closed: watch::Receiver<bool>,
}

impl Outbound {
    /// Next frame to write, or `None` once the connection is closed
    pub async fn next(&mut self) -> Option<Message> {
        loop {
            if *self.closed.borrow_and_update() {
                return None;
            }
            tokio::select! {
                biased;
                changed = self.closed.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                message = self.receiver.recv() => return message,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(Uuid::new_v4(), "dev".to_string(), "tok".to_string())
    }

    #[tokio::test]
    async fn test_queue_full_is_delivery_failure() {
        let (conn, _handle, mut outbound) = Connection::new(RoomId::Direct(Uuid::new_v4()), &session(), 1);
        assert!(conn.try_send_text("one").is_ok());
        assert!(matches!(conn.try_send_text("two"), Err(RustyChatError::DeliveryFailed(_))));

        let frame = outbound.next().await.unwrap();
        assert_eq!(frame.to_str().unwrap(), "one");
    }

    #[tokio::test]
    async fn test_close_ends_outbound_and_wakes_handle() {
        let (conn, mut handle, mut outbound) = Connection::new(RoomId::Group(Uuid::new_v4()), &session(), 4);
        conn.try_send_text("pending").unwrap();
        conn.close();

        assert!(conn.is_closed());
        assert!(outbound.next().await.is_none());
        handle.wait_closed().await;
        assert!(handle.is_closed());
    }

    #[test]
    fn test_belongs_to_checks_token() {
        let s = session();
        let (conn, _, _) = Connection::new(RoomId::Direct(Uuid::new_v4()), &s, 1);
        assert!(conn.belongs_to(&s));

        let mut rotated = s.clone();
        rotated.token = "other".to_string();
        assert!(!conn.belongs_to(&rotated));
        assert!(conn.same_device(&rotated));
    }
}
