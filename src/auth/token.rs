use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::core::session::Session;
use crate::error::{Result, RustyChatError};

/// JWT claims binding an access token to one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Device the session was activated on
    pub device_id: String,
    /// Opaque session token, checked against the session registry on every connect
    pub sid: String,
    /// Issued at (as UTC timestamp)
    pub iat: usize,
    /// Expiration time (as UTC timestamp)
    pub exp: usize,
}

impl Claims {
    /// Creates claims for an activated session
    pub fn for_session(session: &Session, ttl_hours: i64) -> Self {
        let now = Utc::now();
        Self {
            sub: session.user_id.to_string(),
            device_id: session.device_id.clone(),
            sid: session.token.clone(),
            iat: now.timestamp().max(0) as usize,
            exp: (now + Duration::hours(ttl_hours)).timestamp().max(0) as usize,
        }
    }
}

/// Manages JWT token operations
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_hours: i64,
}

impl TokenManager {
    /// Creates a new token manager with a secret
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl_hours,
        }
    }

    /// Issues an access token for a freshly activated session
    pub fn issue(&self, session: &Session) -> Result<(String, Claims)> {
        let claims = Claims::for_session(session, self.ttl_hours);
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| RustyChatError::AuthError(format!("Failed to generate token: {}", e)))?;
        Ok((token, claims))
    }

    /// Validates signature and expiry, returning the claims
    pub fn decode(&self, token: &str) -> Result<Claims> {
        if token.len() > 2048 || token.chars().any(|c| c.is_control()) {
            return Err(RustyChatError::AuthError("Malformed token".to_string()));
        }
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| RustyChatError::AuthError(format!("Invalid token: {}", e)))?;
        if data.claims.device_id.is_empty() || data.claims.sid.is_empty() {
            return Err(RustyChatError::AuthError("Incomplete token claims".to_string()));
        }
        Ok(data.claims)
    }
}

/// Extracts bearer token from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<String> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
