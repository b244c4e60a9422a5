use crate::mumble::registry::Message;
use crate::mumble::state::StateChange;
use crate::transport::types::{Channel, ConnState, User};

/// Where an inbound text message was addressed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageTarget {
    Channel(Channel),
    /// Private message; the target is the sender, as with IRC queries.
    User(User),
}

impl std::fmt::Display for MessageTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageTarget::Channel(channel) => write!(f, "{}", channel.name),
            MessageTarget::User(user) => write!(f, "{}", user.name),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendKind {
    Message,
    Action,
}

/// Published before a command runs. Subscribers may rewrite any field,
/// clear `printable` to silence the log line, or cancel the invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandEvent {
    pub command: String,
    pub args: String,
    pub source: User,
    pub target: MessageTarget,
    pub message: String,
    pub printable: Option<String>,
    pub cancelled: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextMessage {
    pub source: User,
    pub target: MessageTarget,
    pub message: String,
    pub printable: bool,
}

/// Published before a text message is written. Subscribers may rewrite
/// `message` or veto the send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub kind: SendKind,
    pub target: MessageTarget,
    pub message: String,
    pub cancelled: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    ConnectionState(ConnState),
    ServerVersion {
        release: String,
        os: String,
        os_version: String,
    },
    Rejected {
        code: Option<i32>,
        reason: String,
    },
    ServerSync {
        session: Option<u32>,
        max_bandwidth: Option<u32>,
        welcome_text: String,
        permissions: Option<u64>,
    },
    ServerConfig {
        max_bandwidth: Option<u32>,
        welcome_text: Option<String>,
        allow_html: bool,
        message_length: Option<u32>,
        image_message_length: Option<u32>,
    },
    CodecVersion {
        alpha: i32,
        beta: i32,
        prefer_alpha: bool,
        opus: bool,
    },
    CryptSetup {
        key: Vec<u8>,
        client_nonce: Vec<u8>,
        server_nonce: Vec<u8>,
    },
    PermissionQuery {
        channel_id: Option<u32>,
        permissions: Option<u32>,
        flush: bool,
    },
    Ping {
        timestamp: Option<u64>,
        good: u32,
        late: u32,
        lost: u32,
        resync: u32,
    },
    Presence(StateChange),
    UserRemoved {
        session: u32,
        user: Option<User>,
        actor: User,
        reason: String,
        ban: bool,
    },
    /// Always published on removal, even for sessions that were never seen.
    UserDisconnected(Option<User>),
    PreCommand(CommandEvent),
    PreMessageReceived(TextMessage),
    MessageReceived(TextMessage),
    MessageSent(OutgoingMessage),
    /// Any decoded message without dedicated handling.
    Unhandled(Message),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ConnectionState(_) => "connection_state",
            Event::ServerVersion { .. } => "server_version",
            Event::Rejected { .. } => "rejected",
            Event::ServerSync { .. } => "server_sync",
            Event::ServerConfig { .. } => "server_config",
            Event::CodecVersion { .. } => "codec_version",
            Event::CryptSetup { .. } => "crypt_setup",
            Event::PermissionQuery { .. } => "permission_query",
            Event::Ping { .. } => "ping",
            Event::Presence(change) => change.name(),
            Event::UserRemoved { .. } => "user_removed",
            Event::UserDisconnected(_) => "user_disconnected",
            Event::PreCommand(_) => "pre_command",
            Event::PreMessageReceived(_) => "pre_message_received",
            Event::MessageReceived(_) => "message_received",
            Event::MessageSent(_) => "message_sent",
            Event::Unhandled(_) => "unhandled",
        }
    }
}

/// Receives every notification the engine produces. The returned event
/// replaces the published one, which lets subscribers rewrite payloads.
pub trait EventBus {
    fn publish(&mut self, event: Event) -> Event;
}

#[derive(Debug, Default)]
pub struct NoopEventBus;

impl EventBus for NoopEventBus {
    fn publish(&mut self, event: Event) -> Event {
        event
    }
}
