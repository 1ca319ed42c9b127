//! Integrated server service that wires the realtime core together

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use log::info;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::TokenManager;
use crate::config::ServerConfig;
use crate::constants::NOTIFY_RETRY_BACKOFF_MS;
use crate::core::fanout::FanoutEngine;
use crate::core::hub::ConnectionHub;
use crate::core::room::MembershipResolver;
use crate::core::session::{Session, SessionListener, SessionRegistry};
use crate::core::UserId;
use crate::error::{Result, RustyChatError};
use crate::notify::{LogPushProvider, NotificationDispatcher, PushProvider};
use crate::storage::memory::MemoryStore;
use crate::storage::traits::{MembershipSource, MessageStore};

/// Credentials handed out when a session is activated
#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub access_token: String,
    pub session_token: String,
    pub device_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Composition root shared by all handlers
pub struct ChatServer {
    pub config: ServerConfig,
    pub store: Arc<dyn MessageStore>,
    pub resolver: MembershipResolver,
    pub registry: Arc<SessionRegistry>,
    pub hub: Arc<ConnectionHub>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub engine: FanoutEngine,
    tokens: TokenManager,
}

pub type SharedChatServer = Arc<ChatServer>;

impl ChatServer {
    /// Build the core on top of the given collaborators. Must run inside a tokio runtime.
    pub async fn new(
        config: ServerConfig,
        store: Arc<dyn MessageStore>,
        membership: Arc<dyn MembershipSource>,
        push: Arc<dyn PushProvider>,
    ) -> SharedChatServer {
        let resolver = MembershipResolver::new(membership);
        let registry = Arc::new(SessionRegistry::new(Duration::hours(config.session_idle_hours)));
        let hub = Arc::new(ConnectionHub::new(
            registry.clone(),
            resolver.clone(),
            config.connection_queue,
        ));
        let listener: Arc<dyn SessionListener> = hub.clone();
        registry.set_listener(Arc::downgrade(&listener)).await;

        let dispatcher = Arc::new(NotificationDispatcher::new(
            push,
            config.notify_queue,
            config.notify_workers,
            config.notify_attempts,
            StdDuration::from_millis(NOTIFY_RETRY_BACKOFF_MS),
        ));
        let engine = FanoutEngine::new(
            store.clone(),
            resolver.clone(),
            registry.clone(),
            hub.clone(),
            dispatcher.clone(),
            Duration::seconds(config.edit_window_secs),
        );
        let tokens = TokenManager::new(&config.jwt_secret, config.token_ttl_hours);

        info!(
            "Chat core ready (edit window {}s, {} notification workers)",
            config.edit_window_secs, config.notify_workers
        );
        Arc::new(Self {
            config,
            store,
            resolver,
            registry,
            hub,
            dispatcher,
            engine,
            tokens,
        })
    }

    /// Server backed by the in-memory store and the logging push provider
    pub async fn in_memory(config: ServerConfig) -> (SharedChatServer, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let server = Self::new(config, store.clone(), store.clone(), Arc::new(LogPushProvider)).await;
        (server, store)
    }

    /// Activate a session (superseding every other one of the user) and issue its access token
    pub async fn login(&self, user_id: UserId, device_id: &str) -> Result<IssuedSession> {
        let session = self.registry.activate(user_id, device_id).await?;
        let (access_token, claims) = self.tokens.issue(&session)?;
        let expires_at = Utc
            .timestamp_opt(claims.exp as i64, 0)
            .single()
            .ok_or_else(|| RustyChatError::AuthError("token expiry out of range".to_string()))?;
        Ok(IssuedSession {
            access_token,
            session_token: session.token,
            device_id: session.device_id,
            expires_at,
        })
    }

    pub async fn logout(&self, user_id: UserId, device_id: &str) {
        self.registry.deactivate(user_id, device_id).await;
    }

    /// Turn a presented access token into the active session it names
    pub async fn authenticate_token(&self, token: &str) -> Result<Session> {
        let claims = self.tokens.decode(token).map_err(|e| {
            log::debug!("Rejected access token: {}", e);
            RustyChatError::Unauthenticated
        })?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| RustyChatError::Unauthenticated)?;
        self.registry.authenticate(user_id, &claims.device_id, &claims.sid).await
    }
}
