use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RustyChatError {
    // Session errors
    Unauthenticated,
    AuthError(String),

    // Room errors
    Unauthorized,
    NotFound(String),

    // Command errors
    BadRequest(String),
    EditWindowExpired,

    // Durability errors
    PersistenceFailed(String),

    // Delivery errors
    DeliveryFailed(String),

    // System errors
    SerializationError(String),
    ConfigError(String),
}

impl RustyChatError {
    /// Stable code carried in error envelopes
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated | Self::AuthError(_) => "UNAUTHENTICATED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::EditWindowExpired => "EDIT_WINDOW_EXPIRED",
            Self::PersistenceFailed(_) => "PERSISTENCE_FAILED",
            Self::DeliveryFailed(_) => "DELIVERY_FAILED",
            Self::SerializationError(_) => "INTERNAL_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// HTTP status used when a request is refused before the WebSocket upgrade
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthenticated | Self::AuthError(_) => 401,
            Self::Unauthorized => 403,
            Self::NotFound(_) => 404,
            Self::BadRequest(_) => 400,
            Self::EditWindowExpired => 422,
            Self::PersistenceFailed(_) => 503,
            Self::DeliveryFailed(_) | Self::SerializationError(_) | Self::ConfigError(_) => 500,
        }
    }

    /// Message safe to show to clients. Storage details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::PersistenceFailed(_) => "Message could not be saved, please retry".to_string(),
            Self::SerializationError(_) | Self::ConfigError(_) => "Internal server error".to_string(),
            Self::AuthError(_) => "Authentication failed".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for RustyChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "Session is missing, invalid or superseded"),
            Self::AuthError(msg) => write!(f, "Authentication error: {}", msg),
            Self::Unauthorized => write!(f, "Not a member of this room"),
            Self::NotFound(what) => write!(f, "Not found: {}", what),
            Self::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            Self::EditWindowExpired => write!(f, "Message can no longer be edited"),
            Self::PersistenceFailed(msg) => write!(f, "Persistence failed: {}", msg),
            Self::DeliveryFailed(msg) => write!(f, "Delivery failed: {}", msg),
            Self::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for RustyChatError {}

impl From<serde_json::Error> for RustyChatError {
    fn from(err: serde_json::Error) -> Self {
        RustyChatError::SerializationError(err.to_string())
    }
}

impl warp::reject::Reject for RustyChatError {}

// Generic result type for RustyChat
pub type Result<T> = std::result::Result<T, RustyChatError>;
