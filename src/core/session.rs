//! Session registry: single active session per user
//!
//! Each user owns one slot guarded by its own mutex, so activation for one
//! user never waits on another user. Session rows are never removed; a
//! deactivated session stays in the slot for audit.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::{Mutex, RwLock};

use crate::auth::guard::constant_time_eq;
use crate::constants::SESSION_TOKEN_BYTES;
use crate::core::UserId;
use crate::error::{Result, RustyChatError};

/// One authenticated user+device pairing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub device_id: String,
    /// Opaque session token, rotated on every activation
    pub token: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(user_id: UserId, device_id: String, token: String) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            device_id,
            token,
            active: true,
            created_at: now,
            last_activity: now,
            deactivated_at: None,
        }
    }

    fn deactivate(&mut self) {
        self.active = false;
        self.deactivated_at = Some(Utc::now());
    }
}

/// Receives sessions that stopped being active (superseded, logged out or expired)
#[async_trait]
pub trait SessionListener: Send + Sync {
    async fn session_ended(&self, session: &Session);
}

#[derive(Default)]
struct UserSessions {
    devices: HashMap<String, Session>,
}

/// Owns every session record
pub struct SessionRegistry {
    users: RwLock<HashMap<UserId, Arc<Mutex<UserSessions>>>>,
    listener: RwLock<Option<Weak<dyn SessionListener>>>,
    idle_timeout: Duration,
}

fn generate_session_token() -> String {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl SessionRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            listener: RwLock::new(None),
            idle_timeout,
        }
    }

    /// Register who gets told about ended sessions (the connection hub)
    pub async fn set_listener(&self, listener: Weak<dyn SessionListener>) {
        *self.listener.write().await = Some(listener);
    }

    async fn slot(&self, user_id: &UserId) -> Option<Arc<Mutex<UserSessions>>> {
        self.users.read().await.get(user_id).cloned()
    }

    async fn slot_or_create(&self, user_id: UserId) -> Arc<Mutex<UserSessions>> {
        if let Some(slot) = self.slot(&user_id).await {
            return slot;
        }
        self.users.write().await.entry(user_id).or_default().clone()
    }

    async fn notify_ended(&self, ended: &[Session]) {
        if ended.is_empty() {
            return;
        }
        let listener = self.listener.read().await.as_ref().and_then(Weak::upgrade);
        if let Some(listener) = listener {
            for session in ended {
                listener.session_ended(session).await;
            }
        }
    }

    fn is_idle(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now - session.last_activity > self.idle_timeout
    }

    /// Make `device_id` the only active session of `user_id`.
    ///
    /// Every other active session of the user (including a previous token on
    /// the same device) is deactivated under the same per-user lock, so two
    /// concurrent logins can never both end up active.
    pub async fn activate(&self, user_id: UserId, device_id: &str) -> Result<Session> {
        let device_id = device_id.trim();
        if device_id.is_empty() || device_id.len() > 255 {
            return Err(RustyChatError::BadRequest("device_id must be 1-255 characters".to_string()));
        }

        let slot = self.slot_or_create(user_id).await;
        let (session, superseded) = {
            let mut sessions = slot.lock().await;
            let mut superseded = Vec::new();
            for existing in sessions.devices.values_mut().filter(|s| s.active) {
                existing.deactivate();
                superseded.push(existing.clone());
            }

            let token = generate_session_token();
            let now = Utc::now();
            let session = sessions
                .devices
                .entry(device_id.to_string())
                .and_modify(|s| {
                    s.token = token.clone();
                    s.active = true;
                    s.last_activity = now;
                    s.deactivated_at = None;
                })
                .or_insert_with(|| Session::new(user_id, device_id.to_string(), token.clone()))
                .clone();
            (session, superseded)
        };

        info!(
            "Session activated for user {} on device {} ({} superseded)",
            user_id,
            session.device_id,
            superseded.len()
        );
        self.notify_ended(&superseded).await;
        Ok(session)
    }

    /// Check a presented (user, device, token) triple against the active session
    pub async fn authenticate(&self, user_id: UserId, device_id: &str, token: &str) -> Result<Session> {
        if token.is_empty() {
            return Err(RustyChatError::Unauthenticated);
        }
        let slot = self.slot(&user_id).await.ok_or(RustyChatError::Unauthenticated)?;

        let now = Utc::now();
        let mut expired = None;
        let result = {
            let mut sessions = slot.lock().await;
            match sessions.devices.get_mut(device_id) {
                Some(session) if session.active && constant_time_eq(&session.token, token) => {
                    if self.is_idle(session, now) {
                        session.deactivate();
                        expired = Some(session.clone());
                        Err(RustyChatError::Unauthenticated)
                    } else {
                        session.last_activity = now;
                        Ok(session.clone())
                    }
                }
                _ => Err(RustyChatError::Unauthenticated),
            }
        };

        if let Some(session) = expired {
            debug!("Session for user {} on {} expired from inactivity", user_id, device_id);
            self.notify_ended(&[session]).await;
        }
        result
    }

    /// Re-check a session that was authenticated earlier; refreshes activity
    pub async fn verify(&self, session: &Session) -> Result<()> {
        self.authenticate(session.user_id, &session.device_id, &session.token)
            .await
            .map(|_| ())
    }

    /// End a session. Deactivating an inactive or unknown session is a no-op.
    pub async fn deactivate(&self, user_id: UserId, device_id: &str) -> bool {
        let slot = match self.slot(&user_id).await {
            Some(slot) => slot,
            None => return false,
        };
        let ended = {
            let mut sessions = slot.lock().await;
            match sessions.devices.get_mut(device_id) {
                Some(session) if session.active => {
                    session.deactivate();
                    Some(session.clone())
                }
                _ => None,
            }
        };

        match ended {
            Some(session) => {
                info!("Session deactivated for user {} on device {}", user_id, device_id);
                self.notify_ended(&[session]).await;
                true
            }
            None => false,
        }
    }

    /// The active session of a user, if any
    pub async fn active_session(&self, user_id: &UserId) -> Option<Session> {
        let slot = self.slot(user_id).await?;
        let sessions = slot.lock().await;
        sessions.devices.values().find(|s| s.active).cloned()
    }

    /// All session records of a user, active or not
    pub async fn sessions_for(&self, user_id: &UserId) -> Vec<Session> {
        match self.slot(user_id).await {
            Some(slot) => slot.lock().await.devices.values().cloned().collect(),
            None => Vec::new(),
        }
    }
}
