//! Fixed message-kind table and the tagged union of decoded payloads.
//!
//! The position of every kind in the table is its wire tag. The order is
//! shared with the server and must never be changed or re-sorted.

use mumble_protocol_2x::control::msgs;
use protobuf::Message as _;

macro_rules! message_table {
    ($($tag:literal => $kind:ident($proto:ident) $name:literal,)*) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum MessageKind {
            $($kind,)*
        }

        /// Every kind, indexed by wire tag.
        pub const MESSAGE_KINDS: &[MessageKind] = &[$(MessageKind::$kind,)*];

        impl MessageKind {
            pub fn tag(self) -> u16 {
                match self {
                    $(MessageKind::$kind => $tag,)*
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(MessageKind::$kind => $name,)*
                }
            }
        }

        #[derive(Clone, Debug, PartialEq)]
        pub enum Message {
            $($kind(Box<msgs::$proto>),)*
        }

        impl Message {
            pub fn kind(&self) -> MessageKind {
                match self {
                    $(Message::$kind(_) => MessageKind::$kind,)*
                }
            }

            /// Parses `payload` with the schema registered for `kind`.
            pub fn decode(kind: MessageKind, payload: &[u8]) -> Result<Self, protobuf::Error> {
                Ok(match kind {
                    $(MessageKind::$kind => {
                        Message::$kind(Box::new(msgs::$proto::parse_from_bytes(payload)?))
                    })*
                })
            }

            pub fn encode_payload(&self) -> Result<Vec<u8>, protobuf::Error> {
                match self {
                    $(Message::$kind(message) => message.write_to_bytes(),)*
                }
            }
        }

        $(
            impl From<msgs::$proto> for Message {
                fn from(message: msgs::$proto) -> Self {
                    Message::$kind(Box::new(message))
                }
            }
        )*
    };
}

message_table! {
    0 => Version(Version) "version",
    1 => UdpTunnel(UDPTunnel) "udp_tunnel",
    2 => Authenticate(Authenticate) "authenticate",
    3 => Ping(Ping) "ping",
    4 => Reject(Reject) "reject",
    5 => ServerSync(ServerSync) "server_sync",
    6 => ChannelRemove(ChannelRemove) "channel_remove",
    7 => ChannelState(ChannelState) "channel_state",
    8 => UserRemove(UserRemove) "user_remove",
    9 => UserState(UserState) "user_state",
    10 => BanList(BanList) "ban_list",
    11 => TextMessage(TextMessage) "text_message",
    12 => PermissionDenied(PermissionDenied) "permission_denied",
    13 => Acl(ACL) "acl",
    14 => QueryUsers(QueryUsers) "query_users",
    15 => CryptSetup(CryptSetup) "crypt_setup",
    16 => ContextActionModify(ContextActionModify) "context_action_modify",
    17 => ContextAction(ContextAction) "context_action",
    18 => UserList(UserList) "user_list",
    19 => VoiceTarget(VoiceTarget) "voice_target",
    20 => PermissionQuery(PermissionQuery) "permission_query",
    21 => CodecVersion(CodecVersion) "codec_version",
    22 => UserStats(UserStats) "user_stats",
    23 => RequestBlob(RequestBlob) "request_blob",
    24 => ServerConfig(ServerConfig) "server_config",
}

impl MessageKind {
    /// Resolves a wire tag; `None` for anything outside the table.
    pub fn from_tag(tag: u16) -> Option<Self> {
        MESSAGE_KINDS.get(usize::from(tag)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, MessageKind, MESSAGE_KINDS};
    use mumble_protocol_2x::control::msgs;

    fn representative_messages() -> Vec<Message> {
        let mut version = msgs::Version::new();
        version.release = Some("1.4.0".to_string());
        version.os = Some("Linux".to_string());

        let mut tunnel = msgs::UDPTunnel::new();
        tunnel.packet = Some(vec![0x20, 0x01, 0x02]);

        let mut auth = msgs::Authenticate::new();
        auth.username = Some("alice".to_string());
        auth.password = Some("pw".to_string());
        auth.tokens = vec!["red".to_string(), "blue".to_string()];

        let mut ping = msgs::Ping::new();
        ping.timestamp = Some(123_456);
        ping.good = Some(4);

        let mut reject = msgs::Reject::new();
        reject.reason = Some("Wrong password".to_string());

        let mut sync = msgs::ServerSync::new();
        sync.session = Some(7);
        sync.max_bandwidth = Some(72_000);
        sync.welcome_text = Some("<b>hi</b>".to_string());

        let mut channel_remove = msgs::ChannelRemove::new();
        channel_remove.channel_id = Some(3);

        let mut channel_state = msgs::ChannelState::new();
        channel_state.channel_id = Some(2);
        channel_state.parent = Some(0);
        channel_state.name = Some("Ops".to_string());
        channel_state.links_add = vec![0];
        channel_state.position = Some(-1);

        let mut user_remove = msgs::UserRemove::new();
        user_remove.session = Some(9);
        user_remove.actor = Some(1);
        user_remove.reason = Some("bye".to_string());
        user_remove.ban = Some(true);

        let mut user_state = msgs::UserState::new();
        user_state.session = Some(7);
        user_state.name = Some("Alice".to_string());
        user_state.channel_id = Some(2);
        user_state.self_mute = Some(true);
        user_state.recording = Some(false);

        let mut text = msgs::TextMessage::new();
        text.actor = Some(7);
        text.channel_id = vec![2];
        text.message = Some("hello &amp; welcome".to_string());

        let mut denied = msgs::PermissionDenied::new();
        denied.reason = Some("nope".to_string());

        let mut acl = msgs::ACL::new();
        acl.channel_id = Some(2);

        let mut query = msgs::QueryUsers::new();
        query.ids = vec![1, 2];

        let mut crypt = msgs::CryptSetup::new();
        crypt.key = Some(vec![1; 16]);
        crypt.client_nonce = Some(vec![2; 16]);
        crypt.server_nonce = Some(vec![3; 16]);

        let mut action_modify = msgs::ContextActionModify::new();
        action_modify.action = Some("kick".to_string());

        let mut action = msgs::ContextAction::new();
        action.action = Some("kick".to_string());
        action.session = Some(7);

        let mut permission_query = msgs::PermissionQuery::new();
        permission_query.channel_id = Some(2);
        permission_query.permissions = Some(0x0f);

        let mut codec = msgs::CodecVersion::new();
        codec.alpha = Some(-2_147_483_637);
        codec.beta = Some(0);
        codec.prefer_alpha = Some(true);
        codec.opus = Some(true);

        let mut stats = msgs::UserStats::new();
        stats.session = Some(7);

        let mut blob = msgs::RequestBlob::new();
        blob.session_texture = vec![7];

        let mut config = msgs::ServerConfig::new();
        config.allow_html = Some(true);
        config.message_length = Some(5000);

        vec![
            version.into(),
            tunnel.into(),
            auth.into(),
            ping.into(),
            reject.into(),
            sync.into(),
            channel_remove.into(),
            channel_state.into(),
            user_remove.into(),
            user_state.into(),
            msgs::BanList::new().into(),
            text.into(),
            denied.into(),
            acl.into(),
            query.into(),
            crypt.into(),
            action_modify.into(),
            action.into(),
            msgs::UserList::new().into(),
            msgs::VoiceTarget::new().into(),
            permission_query.into(),
            codec.into(),
            stats.into(),
            blob.into(),
            config.into(),
        ]
    }

    /// The table order is the server's wire order.
    #[test]
    fn table_order_matches_wire_tags() {
        // Arrange
        let expected = [
            "version",
            "udp_tunnel",
            "authenticate",
            "ping",
            "reject",
            "server_sync",
            "channel_remove",
            "channel_state",
            "user_remove",
            "user_state",
            "ban_list",
            "text_message",
            "permission_denied",
            "acl",
            "query_users",
            "crypt_setup",
            "context_action_modify",
            "context_action",
            "user_list",
            "voice_target",
            "permission_query",
            "codec_version",
            "user_stats",
            "request_blob",
            "server_config",
        ];

        // Act
        let names = MESSAGE_KINDS.iter().map(|kind| kind.name()).collect::<Vec<_>>();

        // Assert
        assert_eq!(names, expected);
        for (index, kind) in MESSAGE_KINDS.iter().enumerate() {
            assert_eq!(usize::from(kind.tag()), index);
            assert_eq!(MessageKind::from_tag(kind.tag()), Some(*kind));
        }
    }

    /// Tags past the end of the table do not resolve.
    #[test]
    fn from_tag_rejects_out_of_range() {
        assert_eq!(MessageKind::from_tag(24), Some(MessageKind::ServerConfig));
        assert_eq!(MessageKind::from_tag(25), None);
        assert_eq!(MessageKind::from_tag(u16::MAX), None);
    }

    /// Every registered kind survives an encode/decode pass.
    #[test]
    fn every_kind_round_trips() {
        // Arrange
        let messages = representative_messages();
        assert_eq!(messages.len(), MESSAGE_KINDS.len());

        for (message, kind) in messages.iter().zip(MESSAGE_KINDS) {
            // Act
            let payload = message.encode_payload().expect("encode failed");
            let decoded = Message::decode(*kind, &payload).expect("decode failed");

            // Assert
            assert_eq!(message.kind(), *kind);
            assert_eq!(&decoded, message);
        }
    }

    /// Garbage payloads surface as codec errors rather than panics.
    #[test]
    fn decode_reports_malformed_payload() {
        // Arrange
        let payload = [0x0a, 0xff];

        // Act
        let result = Message::decode(MessageKind::Reject, &payload);

        // Assert
        assert!(result.is_err());
    }
}
