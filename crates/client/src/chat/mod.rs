/// Orchestration of send, stop, regenerate and delete against the store.
pub mod controller;
/// Event contracts for controller wiring.
pub mod events;
/// Domain entities and the per-conversation request state machine.
pub mod message;
pub mod references;
pub mod store;

pub use controller::{
    DEFAULT_SERVER_CALL_TIMEOUT, GENERIC_FAILURE_NOTICE, STANDALONE_FAILURE_NOTICE,
    SessionController, inline_error_marker,
};
pub use events::{ControllerEvent, Notification, SendOutcome, SendRejection};
pub use message::{
    Conversation, Message, MessageId, MessageIdParseError, RequestState, RequestTransition,
    RequestTransitionRejection, RequestTransitionResult, Role,
};
pub use references::{RankedSource, RankedSources, query_keywords, rank_sources};
pub use store::{ConversationStore, PendingRequest};
