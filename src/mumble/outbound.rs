//! Target resolution and construction of client-originated messages.

use mumble_protocol_2x::control::msgs;

use crate::mumble::config::Identity;
use crate::mumble::events::{MessageTarget, SendKind};
use crate::mumble::state::PresenceGraph;
use crate::transport::types::{Channel, User};

pub const VERSION_MAJOR: u32 = 1;
pub const VERSION_MINOR: u32 = 2;
pub const VERSION_PATCH: u32 = 4;

/// Protocol version packed as `major << 16 | minor << 8 | patch`.
pub const VERSION_DATA: u32 = (VERSION_MAJOR << 16) | (VERSION_MINOR << 8) | VERSION_PATCH;

/// Wide packing used by newer servers: 16 bits per component, low 16 unused.
pub const VERSION_DATA_V2: u64 = ((VERSION_MAJOR as u64) << 48)
    | ((VERSION_MINOR as u64) << 32)
    | ((VERSION_PATCH as u64) << 16);

/// Line width handed to the markup renderer; wide enough to avoid wrapping.
const MARKUP_WIDTH: usize = 10_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelRef {
    Id(u32),
    /// Case-insensitive.
    Name(String),
}

impl From<&Channel> for ChannelRef {
    fn from(channel: &Channel) -> Self {
        ChannelRef::Id(channel.id)
    }
}

impl From<u32> for ChannelRef {
    fn from(id: u32) -> Self {
        ChannelRef::Id(id)
    }
}

impl From<&str> for ChannelRef {
    fn from(name: &str) -> Self {
        ChannelRef::Name(name.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserRef {
    Session(u32),
    /// Case-insensitive.
    Name(String),
}

impl From<&User> for UserRef {
    fn from(user: &User) -> Self {
        UserRef::Session(user.session)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetRef {
    Channel(ChannelRef),
    User(UserRef),
    /// The channel our own user is in.
    CurrentChannel,
}

impl From<&Channel> for TargetRef {
    fn from(channel: &Channel) -> Self {
        TargetRef::Channel(channel.into())
    }
}

impl From<&User> for TargetRef {
    fn from(user: &User) -> Self {
        TargetRef::User(user.into())
    }
}

/// Replying to a message: back to its channel, or to the sender when private.
impl From<&MessageTarget> for TargetRef {
    fn from(target: &MessageTarget) -> Self {
        match target {
            MessageTarget::Channel(channel) => channel.into(),
            MessageTarget::User(user) => user.into(),
        }
    }
}

/// A facade call recorded for later execution against the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundRequest {
    Send {
        target: TargetRef,
        text: String,
        kind: SendKind,
    },
    Join(ChannelRef),
    Disconnect(String),
}

/// Requests queued by collaborators that cannot borrow the engine, such as
/// command runners invoked from inside dispatch. The engine executes them
/// in order once the current message has been handled.
#[derive(Debug, Default)]
pub struct Outbox {
    requests: Vec<OutboundRequest>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, target: impl Into<TargetRef>, text: impl Into<String>) {
        self.push(OutboundRequest::Send {
            target: target.into(),
            text: text.into(),
            kind: SendKind::Message,
        });
    }

    pub fn action(&mut self, target: impl Into<TargetRef>, text: impl Into<String>) {
        self.push(OutboundRequest::Send {
            target: target.into(),
            text: text.into(),
            kind: SendKind::Action,
        });
    }

    pub fn join(&mut self, channel: impl Into<ChannelRef>) {
        self.push(OutboundRequest::Join(channel.into()));
    }

    pub fn disconnect(&mut self, reason: impl Into<String>) {
        self.push(OutboundRequest::Disconnect(reason.into()));
    }

    pub fn push(&mut self, request: OutboundRequest) {
        self.requests.push(request);
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn take(&mut self) -> Vec<OutboundRequest> {
        std::mem::take(&mut self.requests)
    }
}

pub fn resolve_channel<'a>(graph: &'a PresenceGraph, reference: &ChannelRef) -> Option<&'a Channel> {
    match reference {
        ChannelRef::Id(id) => graph.channel(*id),
        ChannelRef::Name(name) => graph.channel_by_name(name),
    }
}

pub fn resolve_user<'a>(graph: &'a PresenceGraph, reference: &UserRef) -> Option<&'a User> {
    match reference {
        UserRef::Session(session) => graph.user(*session),
        UserRef::Name(name) => graph.user_by_name(name),
    }
}

pub fn resolve_target(graph: &PresenceGraph, reference: &TargetRef) -> Option<MessageTarget> {
    match reference {
        TargetRef::Channel(channel) => {
            resolve_channel(graph, channel).cloned().map(MessageTarget::Channel)
        }
        TargetRef::User(user) => resolve_user(graph, user).cloned().map(MessageTarget::User),
        TargetRef::CurrentChannel => graph
            .ourselves()
            .and_then(|user| graph.channel(user.channel_id))
            .cloned()
            .map(MessageTarget::Channel),
    }
}

/// Escapes text so receiving clients do not interpret it as markup.
pub fn escape_markup(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Renders inbound markup as plain text.
pub fn markup_to_text(markup: &str) -> String {
    let rendered = html2text::from_read(markup.as_bytes(), MARKUP_WIDTH).unwrap_or_default();
    rendered.trim_end_matches('\n').to_string()
}

pub fn decorate(kind: SendKind, text: &str) -> String {
    match kind {
        SendKind::Message => text.to_string(),
        SendKind::Action => format!("*{text}*"),
    }
}

pub fn text_message(target: &MessageTarget, text: &str) -> msgs::TextMessage {
    let mut message = msgs::TextMessage::new();
    message.message = Some(escape_markup(text));
    match target {
        MessageTarget::Channel(channel) => message.channel_id.push(channel.id),
        MessageTarget::User(user) => message.session.push(user.session),
    }
    message
}

pub fn join_request(session: Option<u32>, channel_id: u32) -> msgs::UserState {
    let mut message = msgs::UserState::new();
    message.session = session;
    message.channel_id = Some(channel_id);
    message
}

/// Self-mute and self-deafen; this client never carries audio.
pub fn silence_request() -> msgs::UserState {
    let mut message = msgs::UserState::new();
    message.self_mute = Some(true);
    message.self_deaf = Some(true);
    message
}

pub fn version_message() -> msgs::Version {
    let mut version = msgs::Version::new();
    version.version_v1 = Some(VERSION_DATA);
    version.version_v2 = Some(VERSION_DATA_V2);
    let release = format!("{VERSION_MAJOR}.{VERSION_MINOR}.{VERSION_PATCH}");
    version.os = Some(std::env::consts::OS.to_string());
    version.os_version = Some(format!(
        "Mumble {release} {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    ));
    version.release = Some(release);
    version
}

pub fn authenticate_message(identity: &Identity) -> msgs::Authenticate {
    let mut auth = msgs::Authenticate::new();
    auth.username = Some(identity.username.clone());
    auth.password = identity.password.clone();
    auth.tokens = identity.tokens.clone();
    auth
}
