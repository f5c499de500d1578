use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use ragdesk::chat::{
    Message, MessageId, Notification, RankedSources, Role, SendOutcome, SendRejection,
    SessionController,
};
use ragdesk::settings::SettingsStore;
use ragdesk_transport::{ConversationId, HttpBackend, MessageUid};
use tokio::io::{AsyncBufReadExt, BufReader};

/// One parsed line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    New,
    Open(ConversationId),
    List,
    Stop,
    Regenerate,
    Delete(MessageId),
    DropConversation,
    References,
    Quit,
    Send(String),
    Invalid(String),
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(Self::Send(line.to_string()));
        }

        let (name, argument) = match line.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (line, ""),
        };
        let command = match (name, argument) {
            ("/new", "") => Self::New,
            ("/open", id) if !id.is_empty() => Self::Open(ConversationId::new(id)),
            ("/list", "") => Self::List,
            ("/stop", "") => Self::Stop,
            ("/regen", "") => Self::Regenerate,
            ("/delete", id) => match id.parse() {
                Ok(message_id) => Self::Delete(message_id),
                Err(error) => Self::Invalid(error.to_string()),
            },
            ("/drop", "") => Self::DropConversation,
            ("/refs", "") => Self::References,
            ("/quit", "") => Self::Quit,
            _ => Self::Invalid(format!("unknown command `{line}`")),
        };
        Some(command)
    }
}

struct Terminal {
    controller: SessionController,
    active: Option<ConversationId>,
    /// Bytes of each message already written to stdout.
    printed: HashMap<MessageUid, usize>,
    streaming: bool,
}

impl Terminal {
    fn new(controller: SessionController) -> Self {
        Self {
            controller,
            active: None,
            printed: HashMap::new(),
            streaming: false,
        }
    }

    /// Returns false when the user asked to quit.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::New => {
                self.active = None;
                println!("(a new conversation starts with your next message)");
            }
            Command::Open(conversation_id) => self.open(conversation_id).await,
            Command::List => match self.controller.list_conversations().await {
                Ok(conversations) => {
                    for conversation in conversations {
                        println!(
                            "{}  {}  {}",
                            conversation.id,
                            conversation.title.as_deref().unwrap_or("(untitled)"),
                            conversation.updated_at.as_deref().unwrap_or("")
                        );
                    }
                }
                Err(error) => eprintln!("failed to list conversations: {error}"),
            },
            Command::Stop => {
                let stopped = self
                    .active
                    .clone()
                    .is_some_and(|conversation_id| self.controller.stop(&conversation_id));
                if stopped {
                    self.streaming = false;
                    println!();
                    println!("(stopped)");
                }
            }
            Command::Regenerate => self.regenerate().await,
            Command::Delete(message_id) => match self.active.clone() {
                Some(conversation_id) => {
                    if !self.controller.delete_message(&conversation_id, &message_id) {
                        eprintln!("no message {message_id} in this conversation");
                    }
                }
                None => eprintln!("no conversation is open"),
            },
            Command::DropConversation => {
                if let Some(conversation_id) = self.active.take() {
                    self.controller.delete_conversation(&conversation_id);
                    self.streaming = false;
                    println!("(deleted conversation {conversation_id})");
                }
            }
            Command::References => self.print_references(),
            Command::Quit => return false,
            Command::Send(query) => {
                let outcome = self.controller.send(self.active.clone(), &query).await;
                self.report_send(outcome);
            }
            Command::Invalid(reason) => eprintln!("{reason}"),
        }

        self.print_notifications();
        true
    }

    async fn open(&mut self, conversation_id: ConversationId) {
        if let Err(error) = self.controller.load_conversation(&conversation_id).await {
            eprintln!("failed to open {conversation_id}: {error}");
            return;
        }

        for message in self.controller.messages(&conversation_id) {
            print_message(message);
            self.printed.insert(message.uid(), message.content.len());
        }
        self.active = Some(conversation_id);
    }

    async fn regenerate(&mut self) {
        let Some(conversation_id) = self.active.clone() else {
            eprintln!("no conversation is open");
            return;
        };
        let Some(message_id) = self
            .controller
            .messages(&conversation_id)
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant)
            .map(|message| message.id)
        else {
            eprintln!("nothing to regenerate");
            return;
        };

        let outcome = self
            .controller
            .regenerate(&conversation_id, &message_id)
            .await;
        self.report_send(outcome);
    }

    fn report_send(&mut self, outcome: SendOutcome) {
        match outcome {
            SendOutcome::Started(target) => {
                self.active = Some(target.conversation_id);
                self.streaming = true;
                print!("assistant: ");
                flush();
            }
            SendOutcome::Rejected(SendRejection::BlankQuery) => {}
            SendOutcome::Rejected(SendRejection::AlreadySending) => {
                eprintln!("still answering, use /stop first");
            }
            SendOutcome::Rejected(SendRejection::NothingToRegenerate) => {
                eprintln!("nothing to regenerate");
            }
            SendOutcome::Failed {
                conversation_id,
                error_message,
            } => {
                if conversation_id.is_some() {
                    self.active = conversation_id;
                }
                self.printed
                    .insert(error_message.uid(), error_message.content.len());
                print_message(&error_message);
            }
        }
    }

    /// Writes whatever the streaming answer gained since the last call.
    fn render(&mut self, conversation_id: &ConversationId) {
        if self.active.as_ref() != Some(conversation_id) {
            return;
        }

        for message in self.controller.messages(conversation_id) {
            if message.role != Role::Assistant {
                continue;
            }
            let printed = self.printed.entry(message.uid()).or_insert(0);
            let delta = message.content.get(*printed..).unwrap_or_default();
            if !delta.is_empty() {
                print!("{delta}");
                *printed = message.content.len();
            }
        }

        if self.streaming && !self.controller.is_loading(conversation_id) {
            self.streaming = false;
            println!();
            if let Some(count) = self
                .controller
                .messages(conversation_id)
                .last()
                .and_then(|message| message.sources.as_ref())
                .map(Vec::len)
            {
                println!("({count} sources, /refs to list)");
            }
        }
        flush();
        self.print_notifications();
    }

    fn print_references(&self) {
        let Some(conversation_id) = self.active.as_ref() else {
            eprintln!("no conversation is open");
            return;
        };
        let ranked = self
            .controller
            .messages(conversation_id)
            .iter()
            .rev()
            .find(|message| message.role == Role::Assistant && message.sources.is_some())
            .and_then(|message| self.controller.references(conversation_id, &message.id));

        match ranked {
            Some(ranked) => print_ranked(&ranked),
            None => println!("(no sources)"),
        }
    }

    fn print_notifications(&mut self) {
        for notification in self.controller.drain_notifications() {
            match notification {
                Notification::MessageDeleted { message_id, .. } => {
                    println!("(deleted message {message_id})");
                }
                Notification::MessageDeleteFailed {
                    message_id, reason, ..
                } => eprintln!("server could not delete message {message_id}: {reason}"),
                Notification::ConversationDeleteFailed {
                    conversation_id,
                    reason,
                } => eprintln!("server could not delete conversation {conversation_id}: {reason}"),
                Notification::RegenerateUnavailable { message_id, .. } => {
                    eprintln!("message {message_id} has no question to regenerate from");
                }
            }
        }
    }
}

fn print_message(message: &Message) {
    let role = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    println!("[{}] {role}: {}", message.id, message.content);
}

fn print_ranked(ranked: &RankedSources) {
    for (index, ranked_source) in ranked.high.iter().enumerate() {
        let source = &ranked_source.source;
        let location = source
            .site_name()
            .or_else(|| source.file.as_ref()?.page.map(|page| format!("p. {page}")))
            .unwrap_or_default();
        println!("{:>2}. {} {location}", index + 1, source.title);
    }
    if !ranked.low.is_empty() {
        println!("    + {} less relevant", ranked.low.len());
        for ranked_source in &ranked.low {
            println!("     ? {}", ranked_source.source.title);
        }
    }
}

fn flush() {
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() {
    // stdout carries the conversation, diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let settings_store = SettingsStore::load();
    if let Err(error) = settings_store.ensure_persisted() {
        tracing::warn!(error = %error, "could not write default settings");
    }

    let settings = settings_store.settings();
    let backend = match HttpBackend::new(settings.backend_config()) {
        Ok(backend) => Arc::new(backend),
        Err(error) => {
            tracing::error!(
                stage = error.stage(),
                error = %error,
                "failed to build backend client"
            );
            std::process::exit(1);
        }
    };
    tracing::info!(base_url = backend.base_url(), "connected to chat backend");

    let controller = SessionController::new(backend.clone(), backend)
        .with_server_timeout(Duration::from_secs(settings.request_timeout_secs));
    let mut terminal = Terminal::new(controller);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let Some(command) = Command::parse(&line) else {
                        continue;
                    };
                    if !terminal.handle(command).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    tracing::error!(error = %error, "failed to read stdin");
                    break;
                }
            },
            Some(conversation_id) = terminal.controller.next_update() => {
                terminal.render(&conversation_id);
                // Coalesce whatever else arrived meanwhile into one redraw.
                for conversation_id in terminal.controller.drain_ready() {
                    terminal.render(&conversation_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ragdesk_transport::ServerMessageId;

    use super::*;

    #[test]
    fn plain_lines_are_queries() {
        assert_eq!(
            Command::parse("  what is rag? "),
            Some(Command::Send("what is rag?".to_string()))
        );
        assert_eq!(Command::parse("   "), None);
    }

    #[test]
    fn commands_take_their_arguments() {
        assert_eq!(
            Command::parse("/open c-42"),
            Some(Command::Open(ConversationId::new("c-42")))
        );
        assert_eq!(
            Command::parse("/delete 7"),
            Some(Command::Delete(MessageId::Server(ServerMessageId::new(7))))
        );
        assert_eq!(Command::parse("/quit"), Some(Command::Quit));
        assert!(matches!(Command::parse("/delete x"), Some(Command::Invalid(_))));
        assert!(matches!(Command::parse("/open"), Some(Command::Invalid(_))));
        assert!(matches!(Command::parse("/bogus"), Some(Command::Invalid(_))));
    }
}
