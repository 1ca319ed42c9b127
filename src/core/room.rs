//! Room identity and membership resolution
//!
//! A room is either a two-party direct chat or a group. Membership lives in
//! the durability collaborator; this module only reads it.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::UserId;
use crate::error::{Result, RustyChatError};
use crate::storage::traits::MembershipSource;

/// Delivery scope of an event: `chat:{uuid}` or `group:{uuid}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RoomId {
    Direct(Uuid),
    Group(Uuid),
}

impl RoomId {
    pub fn uuid(&self) -> Uuid {
        match self {
            RoomId::Direct(id) | RoomId::Group(id) => *id,
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomId::Direct(id) => write!(f, "chat:{}", id),
            RoomId::Group(id) => write!(f, "group:{}", id),
        }
    }
}

impl FromStr for RoomId {
    type Err = RustyChatError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| RustyChatError::BadRequest(format!("invalid room target '{}'", s)))?;
        let id = Uuid::parse_str(id)
            .map_err(|_| RustyChatError::BadRequest(format!("invalid room id '{}'", id)))?;
        match kind {
            "chat" => Ok(RoomId::Direct(id)),
            "group" => Ok(RoomId::Group(id)),
            other => Err(RustyChatError::BadRequest(format!("unknown room kind '{}'", other))),
        }
    }
}

impl TryFrom<String> for RoomId {
    type Error = RustyChatError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.to_string()
    }
}

/// Order-independent participant pair of a direct chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirectPair {
    low: UserId,
    high: UserId,
}

impl DirectPair {
    /// Canonicalise by sorting so (a, b) and (b, a) are the same pair
    pub fn new(a: UserId, b: UserId) -> Result<Self> {
        if a == b {
            return Err(RustyChatError::BadRequest(
                "a direct chat needs two distinct users".to_string(),
            ));
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(Self { low, high })
    }

    pub fn members(&self) -> (UserId, UserId) {
        (self.low, self.high)
    }
}

/// Computes who may receive events for a room
///
/// Every call reads one snapshot from the membership source; a later join or
/// leave never changes a set that was already returned.
#[derive(Clone)]
pub struct MembershipResolver {
    source: Arc<dyn MembershipSource>,
}

impl MembershipResolver {
    pub fn new(source: Arc<dyn MembershipSource>) -> Self {
        Self { source }
    }

    /// Current members of a room. Unknown rooms are `NotFound`.
    pub async fn resolve_members(&self, room: &RoomId) -> Result<HashSet<UserId>> {
        match room {
            RoomId::Direct(chat_id) => {
                let pair = self
                    .source
                    .direct_room_members(chat_id)
                    .await?
                    .ok_or_else(|| RustyChatError::NotFound(format!("room {}", room)))?;
                Ok([pair.0, pair.1].into_iter().collect())
            }
            RoomId::Group(group_id) => self
                .source
                .group_members(group_id)
                .await?
                .ok_or_else(|| RustyChatError::NotFound(format!("room {}", room))),
        }
    }

    pub async fn is_member(&self, room: &RoomId, user: &UserId) -> Result<bool> {
        Ok(self.resolve_members(room).await?.contains(user))
    }
}
