use std::time::Duration;

use ragdesk_transport::{
    BackendConfig, ChatRequest, ChatStreamHandle, ChatTransport, ConversationApi, ConversationId,
    HistoryRole, HttpBackend, RequestId, ServerMessageId, Source, StreamEvent, StreamEventPayload,
    StreamTarget, TransportError,
};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> HttpBackend {
    HttpBackend::new(BackendConfig::new(format!("{}/api/v1", server.uri()))).unwrap()
}

fn target(conversation_id: &str) -> StreamTarget {
    StreamTarget::new(ConversationId::new(conversation_id), RequestId::new(1))
}

async fn collect_payloads(handle: ChatStreamHandle) -> Vec<StreamEventPayload> {
    let ChatStreamHandle { mut stream, worker } = handle;
    let worker = tokio::spawn(worker);

    let mut payloads = Vec::new();
    let collect = async {
        while let Some(event) = stream.recv().await {
            let terminal = event.is_terminal();
            payloads.push(event.payload);
            if terminal {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), collect)
        .await
        .expect("stream finished in time");
    worker.await.unwrap();
    payloads
}

#[tokio::test]
async fn streams_events_in_wire_order_then_completes() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"sources\": [{\"type\": \"web\", \"title\": \"T\", \"url\": \"http://x\", \"content\": \"c\"}]}\n\n",
        "data: {\"answer\": \"Hel\"}\n\n",
        "data: {broken\n\n",
        "data: {\"answer\": \"lo\"}\n\n",
        "data: {\"message_id\": 8, \"user_message_id\": 7}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/v1/conversations/c1/chat"))
        .and(body_json(json!({ "query": "hello" })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let handle = backend(&server)
        .stream_chat(ChatRequest::new(target("c1"), "hello"))
        .unwrap();
    let payloads = collect_payloads(handle).await;

    assert_eq!(
        payloads,
        vec![
            StreamEventPayload::Event(StreamEvent::sources(vec![Source::web(
                "T", "http://x", "c"
            )])),
            StreamEventPayload::Event(StreamEvent::answer("Hel")),
            StreamEventPayload::Event(StreamEvent::answer("lo")),
            StreamEventPayload::Event(StreamEvent::message_ids(
                Some(ServerMessageId::new(8)),
                Some(ServerMessageId::new(7)),
            )),
            StreamEventPayload::Complete,
        ]
    );
}

#[tokio::test]
async fn non_success_status_reports_one_error_before_complete() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/conversations/missing/chat"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Conversation not found"))
        .mount(&server)
        .await;

    let handle = backend(&server)
        .stream_chat(ChatRequest::new(target("missing"), "hello"))
        .unwrap();
    let payloads = collect_payloads(handle).await;

    assert_eq!(payloads.len(), 2);
    match &payloads[0] {
        StreamEventPayload::Error(message) => {
            assert!(message.contains("404"), "unexpected error: {message}");
            assert!(message.contains("Conversation not found"));
        }
        other => panic!("expected error payload, got {other:?}"),
    }
    assert_eq!(payloads[1], StreamEventPayload::Complete);
}

#[tokio::test]
async fn cancellation_completes_without_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/conversations/c1/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("data: {\"answer\": \"late\"}\n\n", "text/event-stream")
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let handle = backend(&server)
        .stream_chat(ChatRequest::new(target("c1"), "hello"))
        .unwrap();
    handle.stream.cancel();
    let payloads = collect_payloads(handle).await;

    assert_eq!(payloads, vec![StreamEventPayload::Complete]);
}

#[tokio::test]
async fn unreachable_backend_reports_error() {
    let backend = HttpBackend::new(
        BackendConfig::new("http://127.0.0.1:9/api/v1")
            .with_connect_timeout(Duration::from_secs(1)),
    )
    .unwrap();

    let handle = backend
        .stream_chat(ChatRequest::new(target("c1"), "hello"))
        .unwrap();
    let payloads = collect_payloads(handle).await;

    assert!(matches!(payloads[0], StreamEventPayload::Error(_)));
    assert_eq!(payloads.last(), Some(&StreamEventPayload::Complete));
    assert_eq!(payloads.len(), 2);
}

#[tokio::test]
async fn creates_and_loads_conversations() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/conversations/"))
        .and(body_json(json!({})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "c9",
            "title": "New Chat",
            "created_at": "2024-05-01T10:00:00",
            "updated_at": "2024-05-01T10:00:00",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/conversations/c9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "c9",
            "title": "New Chat",
            "created_at": "2024-05-01T10:00:00",
            "updated_at": "2024-05-01T10:01:00",
            "messages": [
                { "id": 1, "role": "user", "content": "Q1", "sources": null },
                { "id": 2, "role": "assistant", "content": "A1", "sources": "[\"s1\"]" },
            ],
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/conversations/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "c9", "title": "New Chat", "created_at": "t", "updated_at": "t" },
        ])))
        .mount(&server)
        .await;

    let backend = backend(&server);
    let created = backend.create_conversation(None).await.unwrap();
    assert_eq!(created.id, ConversationId::new("c9"));
    assert_eq!(created.title.as_deref(), Some("New Chat"));

    let detail = backend.get_conversation(&created.id).await.unwrap();
    assert_eq!(detail.messages.len(), 2);
    assert_eq!(detail.messages[1].role, HistoryRole::Assistant);
    assert_eq!(detail.messages[1].id, ServerMessageId::new(2));
    assert_eq!(detail.messages[1].parsed_sources().map(|sources| sources.len()), Some(1));

    let listed = backend.list_conversations().await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
async fn delete_endpoints_surface_status_errors() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/conversations/c1/messages/5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/conversations/c1/messages/6"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "detail": "Message not found" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/conversations/c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend(&server);
    let conversation_id = ConversationId::new("c1");

    backend
        .delete_message(&conversation_id, ServerMessageId::new(5))
        .await
        .unwrap();

    let error = backend
        .delete_message(&conversation_id, ServerMessageId::new(6))
        .await
        .unwrap_err();
    assert!(matches!(error, TransportError::Status { status: 404, .. }));
    assert_eq!(error.status(), Some(404));

    backend.delete_conversation(&conversation_id).await.unwrap();
}

#[tokio::test]
async fn slow_rest_calls_time_out() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/conversations/c1/messages/5"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "ok": true }))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let backend = HttpBackend::new(
        BackendConfig::new(format!("{}/api/v1", server.uri()))
            .with_request_timeout(Duration::from_millis(200)),
    )
    .unwrap();

    let error = tokio::time::timeout(
        Duration::from_secs(5),
        backend.delete_message(&ConversationId::new("c1"), ServerMessageId::new(5)),
    )
    .await
    .expect("request timeout applied")
    .unwrap_err();
    assert!(matches!(error, TransportError::SendRequest { .. }));
}
