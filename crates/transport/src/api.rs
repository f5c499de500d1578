use serde::{Deserialize, Serialize};

use crate::error::TransportResult;
use crate::ids::{ConversationId, ServerMessageId};
use crate::sources::{Source, parse_encoded_sources};
use crate::transport::BoxFuture;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub summary: ConversationSummary,
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
}

/// Wire-level role, kept separate from the chat domain role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryMessage {
    pub id: ServerMessageId,
    pub role: HistoryRole,
    #[serde(default)]
    pub content: String,
    /// JSON-encoded source list as persisted by the backend.
    #[serde(default)]
    pub sources: Option<String>,
}

impl HistoryMessage {
    /// Decodes and normalizes the persisted source list.
    ///
    /// A malformed payload is logged and treated as absent.
    pub fn parsed_sources(&self) -> Option<Vec<Source>> {
        let encoded = self.sources.as_deref()?;
        if encoded.trim().is_empty() {
            return None;
        }

        match parse_encoded_sources(encoded) {
            Ok(sources) => Some(sources),
            Err(error) => {
                tracing::warn!(
                    message_id = %self.id,
                    error = %error,
                    "ignoring unparsable persisted sources"
                );
                None
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct CreateConversationBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ChatBody<'a> {
    pub query: &'a str,
}

/// Conversation and message management endpoints.
pub trait ConversationApi: Send + Sync {
    fn create_conversation<'a>(
        &'a self,
        title: Option<&'a str>,
    ) -> BoxFuture<'a, TransportResult<ConversationSummary>>;

    fn get_conversation<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, TransportResult<ConversationDetail>>;

    fn list_conversations(&self) -> BoxFuture<'_, TransportResult<Vec<ConversationSummary>>>;

    fn delete_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        message_id: ServerMessageId,
    ) -> BoxFuture<'a, TransportResult<()>>;

    fn delete_conversation<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, TransportResult<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceKind;

    #[test]
    fn detail_flattens_summary_and_keeps_encoded_sources() {
        let payload = r#"{
            "id": "c-1",
            "title": "New Chat",
            "created_at": "2024-05-01T10:00:00",
            "updated_at": "2024-05-01T10:05:00",
            "messages": [
                {"id": 1, "role": "user", "content": "Q1", "sources": null, "conversation_id": "c-1"},
                {"id": 2, "role": "assistant", "content": "A1", "sources": "[\"s1\"]"}
            ]
        }"#;

        let detail: ConversationDetail = serde_json::from_str(payload).unwrap();

        assert_eq!(detail.summary.id, ConversationId::new("c-1"));
        assert_eq!(detail.messages.len(), 2);
        assert_eq!(detail.messages[0].parsed_sources(), None);

        let sources = detail.messages[1].parsed_sources().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].kind, SourceKind::File);
        assert_eq!(sources[0].content, "s1");
    }

    #[test]
    fn malformed_persisted_sources_are_dropped() {
        let message = HistoryMessage {
            id: ServerMessageId::new(3),
            role: HistoryRole::Assistant,
            content: "A".to_string(),
            sources: Some("[oops".to_string()),
        };

        assert_eq!(message.parsed_sources(), None);
    }

    #[test]
    fn create_body_omits_missing_title() {
        let body = serde_json::to_string(&CreateConversationBody::default()).unwrap();
        assert_eq!(body, "{}");
    }
}
