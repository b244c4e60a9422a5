pub mod commands;
pub mod config;
pub mod control;
pub mod events;
pub mod keepalive;
pub mod outbound;
pub mod protocol;
pub mod registry;
pub mod state;

pub use commands::{CommandInterceptor, CommandOutcome, CommandRunner, NoopCommandRunner};
pub use config::MumbleConfig;
#[cfg(not(feature = "coverage"))]
pub use control::tls_connect;
pub use control::{apply_requests, BlockingSession, ControlStream};
pub use events::{Event, EventBus, MessageTarget, NoopEventBus, SendKind, TextMessage};
pub use outbound::{ChannelRef, OutboundRequest, Outbox, TargetRef, UserRef};
pub use protocol::MumbleProtocol;
pub use registry::{Message, MessageKind, MESSAGE_KINDS};
pub use state::{PresenceGraph, StateChange};
