use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportResult;
use crate::event::{StreamEventMapped, StreamEventPayload};
use crate::ids::{ConversationId, StreamTarget};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type TransportWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub target: StreamTarget,
    pub query: String,
}

impl ChatRequest {
    pub fn new(target: StreamTarget, query: impl Into<String>) -> Self {
        Self {
            target,
            query: query.into(),
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.target.conversation_id
    }
}

/// Receiving half of one chat request.
///
/// Dropping it cancels the request.
pub struct ChatEventStream {
    target: StreamTarget,
    events: mpsc::UnboundedReceiver<StreamEventMapped>,
    cancel: CancellationToken,
}

pub struct ChatStreamHandle {
    pub stream: ChatEventStream,
    /// Drives the request; the caller decides where it runs.
    pub worker: TransportWorker,
}

impl ChatEventStream {
    pub(crate) fn new(
        target: StreamTarget,
        events: mpsc::UnboundedReceiver<StreamEventMapped>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target,
            events,
            cancel,
        }
    }

    pub fn target(&self) -> &StreamTarget {
        &self.target
    }

    /// Token shared with the worker; cancelling it is a user-initiated stop.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn recv(&mut self) -> Option<StreamEventMapped> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamEventMapped> {
        self.events.try_recv().ok()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ChatEventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Issues streaming chat requests.
pub trait ChatTransport: Send + Sync {
    fn stream_chat(&self, request: ChatRequest) -> TransportResult<ChatStreamHandle>;
}

/// Builds the channel pair a transport worker reports through.
pub fn make_event_stream(
    target: StreamTarget,
) -> (EventSink, ChatEventStream, CancellationToken) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    (
        EventSink {
            target: target.clone(),
            events: event_tx,
        },
        ChatEventStream::new(target, event_rx, cancel.clone()),
        cancel,
    )
}

/// Sending half used by transport workers. Tags every payload with its target.
#[derive(Debug, Clone)]
pub struct EventSink {
    target: StreamTarget,
    events: mpsc::UnboundedSender<StreamEventMapped>,
}

impl EventSink {
    pub fn target(&self) -> &StreamTarget {
        &self.target
    }

    /// Returns false once the receiving side is gone.
    pub fn send(&self, payload: StreamEventPayload) -> bool {
        self.events
            .send(StreamEventMapped::new(self.target.clone(), payload))
            .is_ok()
    }

    pub fn complete(&self) {
        let _ = self.send(StreamEventPayload::Complete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StreamEvent;
    use crate::ids::RequestId;

    fn target() -> StreamTarget {
        StreamTarget::new(ConversationId::new("c1"), RequestId::new(1))
    }

    #[tokio::test]
    async fn sink_tags_payloads_with_target() {
        let (sink, mut stream, _cancel) = make_event_stream(target());

        assert!(sink.send(StreamEventPayload::Event(StreamEvent::answer("hi"))));
        sink.complete();

        let first = stream.recv().await.unwrap();
        assert_eq!(first.target, target());
        assert_eq!(first.payload, StreamEventPayload::Event(StreamEvent::answer("hi")));
        assert!(stream.recv().await.unwrap().is_terminal());
    }

    #[test]
    fn dropping_the_stream_cancels_the_worker_token() {
        let (sink, stream, cancel) = make_event_stream(target());

        assert!(!cancel.is_cancelled());
        drop(stream);

        assert!(cancel.is_cancelled());
        assert!(!sink.send(StreamEventPayload::Complete));
    }
}
