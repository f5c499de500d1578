use std::time::Duration;

use futures::StreamExt;
use serde::de::DeserializeOwned;
use snafu::{ResultExt, ensure};
use tokio_util::sync::CancellationToken;

use crate::api::{
    ChatBody, ConversationApi, ConversationDetail, ConversationSummary, CreateConversationBody,
};
use crate::decoder::decode_stream;
use crate::error::{
    BuildClientSnafu, DecodeResponseSnafu, EmptyQuerySnafu, ReadBodySnafu, SendRequestSnafu,
    StatusSnafu, TransportError, TransportResult,
};
use crate::event::StreamEventPayload;
use crate::ids::{ConversationId, ServerMessageId};
use crate::transport::{
    BoxFuture, ChatRequest, ChatStreamHandle, ChatTransport, EventSink, TransportWorker,
    make_event_stream,
};

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000/api/v1";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    /// Whole-call limit for the REST endpoints. Chat streams are exempt.
    pub request_timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE_URL)
    }
}

enum StreamOutcome {
    Finished,
    Cancelled,
    Failed(TransportError),
}

/// reqwest client for the chat backend's `/api/v1` surface.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> TransportResult<Self> {
        // No client-wide timeout: answers stream for as long as the model keeps
        // talking. REST calls set their own per-request limit.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .context(BuildClientSnafu {
                stage: "http-backend-new",
            })?;

        Ok(Self {
            client,
            base_url: config.base_url,
            request_timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn ensure_success(
        response: reqwest::Response,
        stage: &'static str,
        url: &str,
    ) -> TransportResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|error| format!("<unreadable body: {error}>"));
        StatusSnafu {
            stage,
            url: url.to_string(),
            status: status.as_u16(),
            body,
        }
        .fail()
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
        stage: &'static str,
    ) -> TransportResult<T> {
        let payload = response.text().await.context(ReadBodySnafu { stage })?;
        serde_json::from_str(&payload).context(DecodeResponseSnafu { stage })
    }

    async fn send_delete(&self, url: String, stage: &'static str) -> TransportResult<()> {
        let response = self
            .client
            .delete(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .context(SendRequestSnafu {
                stage,
                url: url.clone(),
            })?;
        Self::ensure_success(response, stage, &url).await?;
        Ok(())
    }

    async fn pump_stream(
        client: &reqwest::Client,
        url: &str,
        query: &str,
        sink: &EventSink,
    ) -> TransportResult<()> {
        let response = client
            .post(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&ChatBody { query })
            .send()
            .await
            .context(SendRequestSnafu {
                stage: "chat-stream-send",
                url: url.to_string(),
            })?;
        let response = Self::ensure_success(response, "chat-stream-status", url).await?;

        let mut events = Box::pin(decode_stream(response.bytes_stream()));
        while let Some(item) = events.next().await {
            let event = item.context(ReadBodySnafu {
                stage: "chat-stream-read-chunk",
            })?;
            if !sink.send(StreamEventPayload::Event(event)) {
                tracing::debug!(target = ?sink.target(), "chat stream receiver dropped");
                return Ok(());
            }
        }

        Ok(())
    }

    async fn run_stream_worker(
        client: reqwest::Client,
        url: String,
        request: ChatRequest,
        sink: EventSink,
        cancel: CancellationToken,
    ) {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => StreamOutcome::Cancelled,
            result = Self::pump_stream(&client, &url, &request.query, &sink) => match result {
                Ok(()) => StreamOutcome::Finished,
                Err(error) => StreamOutcome::Failed(error),
            },
        };

        match outcome {
            StreamOutcome::Finished => {}
            StreamOutcome::Failed(error) if !cancel.is_cancelled() => {
                tracing::error!(
                    target = ?request.target,
                    stage = error.stage(),
                    error = %error,
                    "chat stream failed"
                );
                let _ = sink.send(StreamEventPayload::Error(error.to_string()));
            }
            StreamOutcome::Failed(_) | StreamOutcome::Cancelled => {
                // Cancellation is a user stop, never reported as an error.
                tracing::debug!(target = ?request.target, "chat stream cancelled");
            }
        }

        sink.complete();
    }
}

impl ChatTransport for HttpBackend {
    fn stream_chat(&self, request: ChatRequest) -> TransportResult<ChatStreamHandle> {
        ensure!(
            !request.query.trim().is_empty(),
            EmptyQuerySnafu {
                stage: "stream-chat",
                conversation_id: request.conversation_id().clone(),
            }
        );

        let url = self.endpoint(&format!("conversations/{}/chat", request.conversation_id()));
        let (sink, stream, cancel) = make_event_stream(request.target.clone());
        let worker: TransportWorker = Box::pin(Self::run_stream_worker(
            self.client.clone(),
            url,
            request,
            sink,
            cancel,
        ));

        Ok(ChatStreamHandle { stream, worker })
    }
}

impl ConversationApi for HttpBackend {
    fn create_conversation<'a>(
        &'a self,
        title: Option<&'a str>,
    ) -> BoxFuture<'a, TransportResult<ConversationSummary>> {
        Box::pin(async move {
            let url = self.endpoint("conversations/");
            let response = self
                .client
                .post(&url)
                .timeout(self.request_timeout)
                .json(&CreateConversationBody { title })
                .send()
                .await
                .context(SendRequestSnafu {
                    stage: "create-conversation-send",
                    url: url.clone(),
                })?;
            let response =
                Self::ensure_success(response, "create-conversation-status", &url).await?;
            Self::read_json(response, "create-conversation-decode").await
        })
    }

    fn get_conversation<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, TransportResult<ConversationDetail>> {
        Box::pin(async move {
            let url = self.endpoint(&format!("conversations/{conversation_id}"));
            let response = self
                .client
                .get(&url)
                .timeout(self.request_timeout)
                .send()
                .await
                .context(SendRequestSnafu {
                    stage: "get-conversation-send",
                    url: url.clone(),
                })?;
            let response = Self::ensure_success(response, "get-conversation-status", &url).await?;
            Self::read_json(response, "get-conversation-decode").await
        })
    }

    fn list_conversations(&self) -> BoxFuture<'_, TransportResult<Vec<ConversationSummary>>> {
        Box::pin(async move {
            let url = self.endpoint("conversations/");
            let response = self
                .client
                .get(&url)
                .timeout(self.request_timeout)
                .send()
                .await
                .context(SendRequestSnafu {
                    stage: "list-conversations-send",
                    url: url.clone(),
                })?;
            let response =
                Self::ensure_success(response, "list-conversations-status", &url).await?;
            Self::read_json(response, "list-conversations-decode").await
        })
    }

    fn delete_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        message_id: ServerMessageId,
    ) -> BoxFuture<'a, TransportResult<()>> {
        Box::pin(async move {
            let url = self.endpoint(&format!(
                "conversations/{conversation_id}/messages/{message_id}"
            ));
            self.send_delete(url, "delete-message").await
        })
    }

    fn delete_conversation<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, TransportResult<()>> {
        Box::pin(async move {
            let url = self.endpoint(&format!("conversations/{conversation_id}"));
            self.send_delete(url, "delete-conversation").await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{RequestId, StreamTarget};

    #[test]
    fn config_normalizes_base_url() {
        let config = BackendConfig::new(" http://localhost:8000/api/v1/ ");
        assert_eq!(config.base_url, "http://localhost:8000/api/v1");
    }

    #[test]
    fn endpoints_join_without_double_slashes() {
        let backend = HttpBackend::new(BackendConfig::new("http://h/api/v1/")).unwrap();

        assert_eq!(backend.endpoint("conversations/"), "http://h/api/v1/conversations/");
        assert_eq!(backend.endpoint("/conversations/c1"), "http://h/api/v1/conversations/c1");
    }

    #[test]
    fn blank_queries_are_rejected_before_any_io() {
        let backend = HttpBackend::new(BackendConfig::default()).unwrap();
        let target = StreamTarget::new(ConversationId::new("c1"), RequestId::new(1));

        let error = backend
            .stream_chat(ChatRequest::new(target, "   "))
            .err()
            .unwrap();
        assert!(matches!(error, TransportError::EmptyQuery { .. }));
    }
}
