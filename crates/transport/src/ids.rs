use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Server-assigned conversation identifier.
///
/// The backend treats it as an opaque string, so no shape is assumed here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Durable message identifier assigned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ServerMessageId(pub u64);

impl ServerMessageId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ServerMessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl FromStr for ServerMessageId {
    type Err = std::num::ParseIntError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        raw.trim().parse::<u64>().map(Self)
    }
}

// The chat endpoint emits integer ids, but string-encoded ids show up in older payloads.
impl<'de> Deserialize<'de> for ServerMessageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(u64),
            Text(String),
        }

        match RawId::deserialize(deserializer)? {
            RawId::Number(raw) => Ok(Self(raw)),
            RawId::Text(raw) => raw.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Client-side message key used for rendering identity. Never reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageUid(pub Uuid);

impl MessageUid {
    pub fn new_v7() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for MessageUid {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Identifier for one chat request.
///
/// This must change on every send so stale events can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl RequestId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Routing key attached to every transport event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub conversation_id: ConversationId,
    pub request_id: RequestId,
}

impl StreamTarget {
    pub fn new(conversation_id: ConversationId, request_id: RequestId) -> Self {
        Self {
            conversation_id,
            request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_id_accepts_numbers_and_numeric_strings() {
        let from_number: ServerMessageId = serde_json::from_str("42").unwrap();
        let from_text: ServerMessageId = serde_json::from_str("\"42\"").unwrap();

        assert_eq!(from_number, ServerMessageId::new(42));
        assert_eq!(from_text, ServerMessageId::new(42));
        assert!(serde_json::from_str::<ServerMessageId>("\"abc\"").is_err());
    }

    #[test]
    fn message_uids_are_unique() {
        assert_ne!(MessageUid::new_v7(), MessageUid::new_v7());
    }
}
