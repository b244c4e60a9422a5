//! The per-connection protocol engine.
//!
//! `MumbleProtocol` does no I/O itself. The session loop feeds it received
//! bytes and clock ticks, then writes whatever frames it queued, in order.

use std::time::Instant;

use bytes::{Bytes, BytesMut};
use log::{debug, error, info, warn};
use mumble_protocol_2x::control::msgs;
use tokio_util::codec::Decoder;

use crate::mumble::commands::{CommandInterceptor, CommandRunner, Disposition, NoopCommandRunner};
use crate::mumble::config::MumbleConfig;
use crate::mumble::events::{
    Event, EventBus, MessageTarget, NoopEventBus, OutgoingMessage, SendKind, TextMessage,
};
use crate::mumble::keepalive::Keepalive;
use crate::mumble::outbound::{
    authenticate_message, decorate, join_request, markup_to_text, resolve_channel,
    resolve_target, resolve_user, silence_request, text_message, version_message, ChannelRef,
    OutboundRequest, Outbox, TargetRef, UserRef,
};
use crate::mumble::registry::Message;
use crate::mumble::state::{ChannelStateUpdate, PresenceGraph, StateChange, UserStateUpdate};
use crate::transport::errors::TransportError;
use crate::transport::frame::{encode_frame, FrameCodec, RawFrame};
use crate::transport::types::{Channel, ConnState, User};

pub struct MumbleProtocol {
    config: MumbleConfig,
    conn_state: ConnState,
    codec: FrameCodec,
    read_buf: BytesMut,
    graph: PresenceGraph,
    keepalive: Keepalive,
    interceptor: CommandInterceptor,
    events: Box<dyn EventBus>,
    commands: Box<dyn CommandRunner>,
    session_id: Option<u32>,
    allow_html: bool,
    outgoing: Vec<Bytes>,
    close_requested: bool,
}

impl MumbleProtocol {
    pub fn new(
        config: MumbleConfig,
        events: Box<dyn EventBus>,
        commands: Box<dyn CommandRunner>,
    ) -> Self {
        Self {
            keepalive: Keepalive::new(config.ping_interval()),
            interceptor: CommandInterceptor::from_config(&config),
            config,
            conn_state: ConnState::Connecting,
            codec: FrameCodec::new(),
            read_buf: BytesMut::with_capacity(4096),
            graph: PresenceGraph::new(),
            events,
            commands,
            session_id: None,
            allow_html: false,
            outgoing: Vec::new(),
            close_requested: false,
        }
    }

    pub fn with_defaults(config: MumbleConfig) -> Self {
        Self::new(config, Box::new(NoopEventBus), Box::new(NoopCommandRunner))
    }

    pub fn conn_state(&self) -> ConnState {
        self.conn_state
    }

    pub fn session_id(&self) -> Option<u32> {
        self.session_id
    }

    pub fn allow_html(&self) -> bool {
        self.allow_html
    }

    pub fn graph(&self) -> &PresenceGraph {
        &self.graph
    }

    pub fn ourselves(&self) -> Option<&User> {
        self.graph.ourselves()
    }

    pub fn lookup_channel(&self, reference: &ChannelRef) -> Option<&Channel> {
        resolve_channel(&self.graph, reference)
    }

    pub fn lookup_user(&self, reference: &UserRef) -> Option<&User> {
        resolve_user(&self.graph, reference)
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.graph.channels()
    }

    pub fn users(&self) -> Vec<User> {
        self.graph.users()
    }

    pub fn channel_count(&self) -> usize {
        self.graph.channel_count()
    }

    pub fn user_count(&self) -> usize {
        self.graph.user_count()
    }

    /// Frames queued since the last call, in submission order.
    pub fn take_outgoing(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    pub fn next_keepalive(&self) -> Option<Instant> {
        self.keepalive.next_due()
    }

    /// Queues version and credentials back-to-back and starts pinging.
    /// Call once the transport is up. Repeat calls on a live connection are
    /// no-ops; an engine that has been closed cannot be reconnected.
    pub fn connect(&mut self, now: Instant) -> Result<(), TransportError> {
        match self.conn_state {
            ConnState::Connecting => {}
            ConnState::Disconnecting | ConnState::Closed => {
                return Err(TransportError::Disconnected)
            }
            ConnState::Authenticating | ConnState::Synchronizing | ConnState::Active => {
                return Ok(())
            }
        }
        if self.config.network.address.trim().is_empty() {
            return Err(TransportError::InvalidConfig(
                "server is required".to_string(),
            ));
        }
        if self.config.identity.username.trim().is_empty() {
            return Err(TransportError::InvalidConfig(
                "username is required".to_string(),
            ));
        }

        self.queue(version_message().into())?;
        self.queue(authenticate_message(&self.config.identity).into())?;
        self.queue(silence_request().into())?;
        self.keepalive.start(now);
        info!(
            "connected to {}:{}, authenticating as {}",
            self.config.network.address, self.config.network.port, self.config.identity.username
        );
        self.set_conn_state(ConnState::Authenticating);
        Ok(())
    }

    /// Feeds bytes from the transport. A framing violation closes the
    /// connection and is returned; malformed payloads are only logged.
    pub fn receive(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.conn_state == ConnState::Closed {
            return Err(TransportError::Disconnected);
        }
        self.read_buf.extend_from_slice(data);

        loop {
            if self.close_requested {
                self.read_buf.clear();
                return Ok(());
            }
            match self.codec.decode(&mut self.read_buf) {
                Ok(Some(frame)) => self.handle_frame(frame),
                Ok(None) => return Ok(()),
                Err(err) => {
                    error!("framing violation, closing connection: {err}");
                    self.begin_close();
                    return Err(err.into());
                }
            }
        }
    }

    /// Sends a keepalive ping when one is due.
    pub fn tick(&mut self, now: Instant) {
        if !self.conn_state.accepts_writes() || !self.keepalive.poll(now) {
            return;
        }
        if let Err(err) = self.queue(msgs::Ping::new().into()) {
            warn!("failed to queue ping: {err}");
        }
    }

    pub fn send(
        &mut self,
        target: TargetRef,
        text: &str,
        kind: SendKind,
    ) -> Result<(), TransportError> {
        self.ensure_writable()?;
        let resolved = resolve_target(&self.graph, &target)
            .ok_or_else(|| TransportError::UnknownTarget(format!("{target:?}")))?;

        let outgoing = OutgoingMessage {
            kind,
            target: resolved,
            message: decorate(kind, text),
            cancelled: false,
        };
        let outgoing = match self.events.publish(Event::MessageSent(outgoing.clone())) {
            Event::MessageSent(published) => published,
            _ => outgoing,
        };
        if outgoing.cancelled {
            debug!("message to {} vetoed", outgoing.target);
            return Ok(());
        }

        info!("-> {} {}", outgoing.target, outgoing.message);
        self.write_text(&outgoing.target, &outgoing.message)
    }

    pub fn join(&mut self, channel: ChannelRef) -> Result<(), TransportError> {
        self.ensure_writable()?;
        let channel_id = resolve_channel(&self.graph, &channel)
            .map(|channel| channel.id)
            .ok_or_else(|| TransportError::UnknownTarget(format!("{channel:?}")))?;
        let session = self
            .graph
            .ourselves()
            .map(|user| user.session)
            .or(self.session_id);
        self.queue(join_request(session, channel_id).into())
    }

    /// Announces the reason in our channel, stops pinging and asks the
    /// session loop to close the transport.
    pub fn disconnect(&mut self, reason: &str) {
        if matches!(
            self.conn_state,
            ConnState::Disconnecting | ConnState::Closed
        ) {
            return;
        }
        if self.conn_state.accepts_writes() {
            if let Some(target) = resolve_target(&self.graph, &TargetRef::CurrentChannel) {
                if let Err(err) = self.write_text(&target, &format!("Disconnecting: {reason}")) {
                    warn!("failed to announce disconnect: {err}");
                }
            }
        }
        info!("disconnecting: {reason}");
        self.begin_close();
    }

    pub fn shutdown(&mut self) {
        self.disconnect("Protocol shutdown");
    }

    /// Executes a recorded facade call.
    pub fn apply(&mut self, request: OutboundRequest) -> Result<(), TransportError> {
        match request {
            OutboundRequest::Send { target, text, kind } => self.send(target, &text, kind),
            OutboundRequest::Join(channel) => self.join(channel),
            OutboundRequest::Disconnect(reason) => {
                self.disconnect(&reason);
                Ok(())
            }
        }
    }

    /// The transport is gone; nothing more will be sent or received.
    pub fn transport_closed(&mut self) {
        self.keepalive.disable();
        self.read_buf.clear();
        self.set_conn_state(ConnState::Closed);
    }

    pub fn transport_error(&mut self, err: &TransportError) {
        error!("transport error: {err}");
        self.transport_closed();
    }

    fn ensure_writable(&self) -> Result<(), TransportError> {
        if self.conn_state.accepts_writes() {
            Ok(())
        } else {
            Err(TransportError::Disconnected)
        }
    }

    fn begin_close(&mut self) {
        self.keepalive.disable();
        self.read_buf.clear();
        self.close_requested = true;
        self.set_conn_state(ConnState::Disconnecting);
    }

    fn queue(&mut self, message: Message) -> Result<(), TransportError> {
        let frame = encode_frame(&message)?;
        self.outgoing.push(frame);
        Ok(())
    }

    fn write_text(&mut self, target: &MessageTarget, text: &str) -> Result<(), TransportError> {
        debug!("sending text message: {text}");
        self.queue(text_message(target, text).into())
    }

    fn set_conn_state(&mut self, next: ConnState) {
        if self.conn_state == next {
            return;
        }
        self.conn_state = next;
        self.events.publish(Event::ConnectionState(next));
    }

    fn publish(&mut self, event: Event) {
        self.events.publish(event);
    }

    fn handle_frame(&mut self, frame: RawFrame) {
        match Message::decode(frame.kind, &frame.payload) {
            Ok(message) => self.dispatch(message),
            Err(err) => warn!("discarding malformed {} message: {err}", frame.kind.name()),
        }
    }

    fn dispatch(&mut self, message: Message) {
        match message {
            Message::Version(version) => self.handle_version(*version),
            Message::Reject(reject) => self.handle_reject(*reject),
            Message::ServerSync(sync) => self.handle_server_sync(*sync),
            Message::ServerConfig(config) => self.handle_server_config(*config),
            Message::ChannelState(state) => self.handle_channel_state(*state),
            Message::ChannelRemove(remove) => self.handle_channel_remove(*remove),
            Message::UserState(state) => self.handle_user_state(*state),
            Message::UserRemove(remove) => self.handle_user_remove(*remove),
            Message::TextMessage(text) => self.handle_text_message(*text),
            Message::CodecVersion(codec) => self.publish(Event::CodecVersion {
                alpha: codec.alpha.unwrap_or_default(),
                beta: codec.beta.unwrap_or_default(),
                prefer_alpha: codec.prefer_alpha.unwrap_or_default(),
                opus: codec.opus.unwrap_or_default(),
            }),
            Message::CryptSetup(crypt) => {
                let crypt = *crypt;
                self.publish(Event::CryptSetup {
                    key: crypt.key.unwrap_or_default(),
                    client_nonce: crypt.client_nonce.unwrap_or_default(),
                    server_nonce: crypt.server_nonce.unwrap_or_default(),
                });
            }
            Message::PermissionQuery(query) => self.publish(Event::PermissionQuery {
                channel_id: query.channel_id,
                permissions: query.permissions,
                flush: query.flush.unwrap_or_default(),
            }),
            Message::Ping(ping) => self.publish(Event::Ping {
                timestamp: ping.timestamp,
                good: ping.good.unwrap_or_default(),
                late: ping.late.unwrap_or_default(),
                lost: ping.lost.unwrap_or_default(),
                resync: ping.resync.unwrap_or_default(),
            }),
            other @ (Message::UdpTunnel(_)
            | Message::Authenticate(_)
            | Message::BanList(_)
            | Message::PermissionDenied(_)
            | Message::Acl(_)
            | Message::QueryUsers(_)
            | Message::ContextActionModify(_)
            | Message::ContextAction(_)
            | Message::UserList(_)
            | Message::VoiceTarget(_)
            | Message::UserStats(_)
            | Message::RequestBlob(_)) => {
                debug!("received unhandled {} message", other.kind().name());
                self.publish(Event::Unhandled(other));
            }
        }
    }

    fn handle_version(&mut self, version: msgs::Version) {
        let release = version.release.unwrap_or_default();
        info!("connected to server version {release}");
        self.publish(Event::ServerVersion {
            release,
            os: version.os.unwrap_or_default(),
            os_version: version.os_version.unwrap_or_default(),
        });
        if self.conn_state == ConnState::Authenticating {
            self.set_conn_state(ConnState::Synchronizing);
        }
    }

    fn handle_reject(&mut self, reject: msgs::Reject) {
        let code = reject.type_.map(|kind| kind.value());
        let reason = reject.reason.unwrap_or_default();
        error!("could not connect to server: {code:?} - {reason}");
        self.begin_close();
        self.publish(Event::Rejected { code, reason });
    }

    fn handle_server_sync(&mut self, sync: msgs::ServerSync) {
        self.session_id = sync.session;
        let welcome_text = markup_to_text(sync.welcome_text.as_deref().unwrap_or_default());
        info!("===   Welcome message   ===");
        for line in welcome_text.lines() {
            info!("{line}");
        }
        info!("=== End welcome message ===");
        self.publish(Event::ServerSync {
            session: sync.session,
            max_bandwidth: sync.max_bandwidth,
            welcome_text,
            permissions: sync.permissions,
        });
        if matches!(
            self.conn_state,
            ConnState::Authenticating | ConnState::Synchronizing
        ) {
            self.set_conn_state(ConnState::Active);
        }
    }

    fn handle_server_config(&mut self, config: msgs::ServerConfig) {
        self.allow_html = config.allow_html.unwrap_or_default();
        self.publish(Event::ServerConfig {
            max_bandwidth: config.max_bandwidth,
            welcome_text: config.welcome_text,
            allow_html: self.allow_html,
            message_length: config.message_length,
            image_message_length: config.image_message_length,
        });
    }

    fn handle_channel_state(&mut self, state: msgs::ChannelState) {
        let Some(id) = state.channel_id else {
            warn!("channel state without a channel id");
            return;
        };
        let changes = self.graph.apply_channel_state(ChannelStateUpdate {
            id,
            name: state.name,
            parent_id: state.parent,
            position: state.position,
            links: state.links,
            links_add: state.links_add,
            links_remove: state.links_remove,
        });
        self.publish_changes(changes);
    }

    fn handle_channel_remove(&mut self, remove: msgs::ChannelRemove) {
        let Some(id) = remove.channel_id else {
            warn!("channel removal without a channel id");
            return;
        };
        let changes = self.graph.remove_channel(id);
        self.publish_changes(changes);
    }

    fn handle_user_state(&mut self, state: msgs::UserState) {
        let Some(session) = state.session else {
            warn!("user state without a session");
            return;
        };
        let actor = state.actor.filter(|actor| {
            let known = self.graph.user(*actor).is_some();
            if !known {
                warn!("user state for {session} names unknown actor {actor}");
            }
            known
        });
        let changes = self.graph.apply_user_state(UserStateUpdate {
            id: session,
            actor,
            name: state.name,
            channel_id: state.channel_id,
            muted: state.mute,
            deafened: state.deaf,
            suppressed: state.suppress,
            self_muted: state.self_mute,
            self_deafened: state.self_deaf,
            priority_speaker: state.priority_speaker,
            recording: state.recording,
        });
        self.publish_changes(changes);
    }

    fn handle_user_remove(&mut self, remove: msgs::UserRemove) {
        let Some(session) = remove.session else {
            warn!("user removal without a session");
            return;
        };
        let user = self.graph.remove_user(session);
        if let Some(user) = &user {
            info!("user left: {}", user.name);
        }

        if let Some(actor) = remove.actor.and_then(|actor| self.graph.user(actor)).cloned() {
            self.publish(Event::UserRemoved {
                session,
                user: user.clone(),
                actor,
                reason: remove.reason.unwrap_or_default(),
                ban: remove.ban.unwrap_or_default(),
            });
        }
        self.publish(Event::UserDisconnected(user));
    }

    fn handle_text_message(&mut self, text: msgs::TextMessage) {
        let Some(actor) = text.actor else {
            debug!("ignoring text message without a sender");
            return;
        };
        let Some(source) = self.graph.user(actor).cloned() else {
            warn!("text message from unknown session {actor}");
            return;
        };
        let target = match text.channel_id.first().or(text.tree_id.first()) {
            Some(channel_id) => match self.graph.channel(*channel_id) {
                Some(channel) => MessageTarget::Channel(channel.clone()),
                None => {
                    warn!("text message to unknown channel {channel_id}");
                    return;
                }
            },
            None => MessageTarget::User(source.clone()),
        };
        let message = markup_to_text(text.message.as_deref().unwrap_or_default());

        let mut outbox = Outbox::new();
        let disposition = self.interceptor.intercept(
            &source,
            &target,
            &message,
            self.events.as_mut(),
            self.commands.as_mut(),
            &mut outbox,
        );
        for request in outbox.take() {
            if let Err(err) = self.apply(request) {
                warn!("command reply to {} failed: {err}", source.name);
            }
        }
        if disposition == Disposition::Handled {
            return;
        }

        let received = TextMessage {
            source,
            target,
            message,
            printable: true,
        };
        let received = match self
            .events
            .publish(Event::PreMessageReceived(received.clone()))
        {
            Event::PreMessageReceived(published) => published,
            _ => received,
        };
        if received.printable {
            for line in received.message.lines() {
                info!("<{}> {line}", received.source.name);
            }
        }
        self.publish(Event::MessageReceived(received));
    }

    fn publish_changes(&mut self, changes: Vec<StateChange>) {
        for change in changes {
            if let StateChange::UserJoined { session } = change {
                if self.identify_ourselves(session) {
                    continue;
                }
            }
            self.log_change(&change);
            self.publish(Event::Presence(change));
        }
    }

    /// Marks `session` as our own user the first time our name shows up,
    /// then joins the configured channel.
    fn identify_ourselves(&mut self, session: u32) -> bool {
        let is_us = self
            .graph
            .user(session)
            .is_some_and(|user| user.name == self.config.identity.username);
        if !is_us || !self.graph.mark_ourselves(session) {
            return false;
        }
        info!("identified ourselves as session {session}");
        self.join_configured_channel();
        true
    }

    fn join_configured_channel(&mut self) {
        let selector = &self.config.channel;
        let channel_id = if let Some(id) = selector.id {
            let found = self.graph.channel(id).map(|channel| channel.id);
            if found.is_none() {
                warn!("no channel with id {id}");
            }
            found
        } else if let Some(name) = &selector.name {
            let found = self.graph.channel_by_name(name).map(|channel| channel.id);
            if found.is_none() {
                warn!("no channel with name {name}");
            }
            found
        } else {
            warn!("no initial channel configured");
            None
        };

        if let Some(id) = channel_id {
            if let Err(err) = self.join(ChannelRef::Id(id)) {
                warn!("failed to join channel {id}: {err}");
            }
        }
    }

    fn log_change(&self, change: &StateChange) {
        let user_name = |session: u32| {
            self.graph
                .user(session)
                .map(|user| user.name.clone())
                .unwrap_or_else(|| session.to_string())
        };
        let channel_name = |id: u32| {
            self.graph
                .channel(id)
                .map(|channel| channel.name.clone())
                .unwrap_or_else(|| id.to_string())
        };
        let actor_name = |actor: Option<u32>| actor.map(user_name).unwrap_or_else(|| "server".to_string());

        match change {
            StateChange::ChannelCreated { channel_id } => {
                info!("new channel: {}", channel_name(*channel_id));
            }
            StateChange::ChannelLinked {
                channel_id,
                linked_id,
            } => info!(
                "channel link added: {} to {}",
                channel_name(*linked_id),
                channel_name(*channel_id)
            ),
            StateChange::ChannelUnlinked {
                channel_id,
                linked_id,
            } => info!(
                "channel link removed: {} from {}",
                channel_name(*linked_id),
                channel_name(*channel_id)
            ),
            StateChange::ChannelRemoved { channel_id } => info!("channel removed: {channel_id}"),
            StateChange::UserJoined { session } => info!("user joined: {}", user_name(*session)),
            StateChange::UserMoved {
                session,
                from,
                to,
                actor,
            } => info!(
                "user moved channel: {} from {} to {} by {}",
                user_name(*session),
                channel_name(*from),
                channel_name(*to),
                actor_name(*actor)
            ),
            StateChange::UserMuteToggled {
                session,
                muted,
                actor,
            } => info!(
                "user was {}: {} by {}",
                if *muted { "muted" } else { "unmuted" },
                user_name(*session),
                actor_name(*actor)
            ),
            StateChange::UserDeafToggled {
                session,
                deafened,
                actor,
            } => info!(
                "user was {}: {} by {}",
                if *deafened { "deafened" } else { "undeafened" },
                user_name(*session),
                actor_name(*actor)
            ),
            StateChange::UserPrioritySpeakerToggled {
                session,
                enabled,
                actor,
            } => info!(
                "user was {} priority speaker: {} by {}",
                if *enabled { "given" } else { "revoked" },
                user_name(*session),
                actor_name(*actor)
            ),
            other => debug!("{}: {other:?}", other.name()),
        }
    }
}

impl std::fmt::Debug for MumbleProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MumbleProtocol")
            .field("conn_state", &self.conn_state)
            .field("session_id", &self.session_id)
            .field("channels", &self.graph.channel_count())
            .field("users", &self.graph.user_count())
            .field("pending_frames", &self.outgoing.len())
            .field("close_requested", &self.close_requested)
            .finish()
    }
}
