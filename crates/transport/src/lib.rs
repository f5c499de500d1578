//! Wire-level plumbing for the ragdesk chat backend.
//!
//! Decodes `data: <json>` framed chat streams, issues cancellable chat requests,
//! and wraps the conversation REST endpoints.

pub mod api;
pub mod decoder;
pub mod error;
pub mod event;
pub mod http;
pub mod ids;
pub mod sources;
pub mod transport;

pub use api::{
    ConversationApi, ConversationDetail, ConversationSummary, HistoryMessage, HistoryRole,
};
pub use decoder::{EventStreamDecoder, decode_stream};
pub use error::{TransportError, TransportResult};
pub use event::{StreamEvent, StreamEventMapped, StreamEventPayload};
pub use http::{
    BackendConfig, DEFAULT_API_BASE_URL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
    HttpBackend,
};
pub use ids::{ConversationId, MessageUid, RequestId, ServerMessageId, StreamTarget};
pub use sources::{FileMetadata, Source, SourceKind};
pub use transport::{
    BoxFuture, ChatEventStream, ChatRequest, ChatStreamHandle, ChatTransport, EventSink,
    TransportWorker, make_event_stream,
};
