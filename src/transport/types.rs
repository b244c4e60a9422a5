use std::collections::BTreeSet;

/// Identifier of the root channel; it always exists once channels are described.
pub const ROOT_CHANNEL_ID: u32 = 0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    pub id: u32,
    pub name: String,
    pub parent_id: Option<u32>,
    pub position: i32,
    /// Undirected link overlay, independent of the parent tree.
    pub links: BTreeSet<u32>,
    /// Sessions currently in this channel.
    pub users: BTreeSet<u32>,
}

impl Channel {
    pub fn new(id: u32, name: String, parent_id: Option<u32>) -> Self {
        Self {
            id,
            name,
            parent_id,
            position: 0,
            links: BTreeSet::new(),
            users: BTreeSet::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_CHANNEL_ID
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub session: u32,
    pub name: String,
    pub channel_id: u32,
    pub muted: bool,
    pub deafened: bool,
    pub suppressed: bool,
    pub self_muted: bool,
    pub self_deafened: bool,
    pub priority_speaker: bool,
    pub recording: bool,
    /// Cleared once the server announces the user's removal.
    pub active: bool,
}

impl User {
    pub fn new(session: u32, name: String, channel_id: u32) -> Self {
        Self {
            session,
            name,
            channel_id,
            muted: false,
            deafened: false,
            suppressed: false,
            self_muted: false,
            self_deafened: false,
            priority_speaker: false,
            recording: false,
            active: true,
        }
    }
}

/// Lifecycle of one control connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    /// Version and credentials sent, waiting for the server.
    Authenticating,
    /// Server version seen, channel and user bursts arriving.
    Synchronizing,
    Active,
    Disconnecting,
    Closed,
}

impl ConnState {
    /// Whether outbound frames may still be queued.
    pub fn accepts_writes(self) -> bool {
        matches!(
            self,
            ConnState::Authenticating | ConnState::Synchronizing | ConnState::Active
        )
    }
}
