#![deny(unsafe_code)]

/// Terminal client for the ragdesk chat backend.
///
/// Holds the conversation state machine, the session controller that drives
/// the transport, and layered settings.
pub mod chat;
/// Settings loading and persistence.
pub mod settings;
