use std::collections::HashMap;

use log::{debug, warn};

use crate::transport::types::{Channel, User, ROOT_CHANNEL_ID};

/// In-memory model of the server's channels and users.
///
/// Channels and users are stored by id; every relation between them
/// (parent, links, membership, current channel) is an id as well.
#[derive(Debug, Default)]
pub struct PresenceGraph {
    channels: HashMap<u32, Channel>,
    users: HashMap<u32, User>,
    ourselves: Option<u32>,
}

#[derive(Debug, Default)]
pub struct ChannelStateUpdate {
    pub id: u32,
    pub name: Option<String>,
    pub parent_id: Option<u32>,
    pub position: Option<i32>,
    pub links: Vec<u32>,
    pub links_add: Vec<u32>,
    pub links_remove: Vec<u32>,
}

#[derive(Debug, Default)]
pub struct UserStateUpdate {
    pub id: u32,
    pub actor: Option<u32>,
    pub name: Option<String>,
    pub channel_id: Option<u32>,
    pub muted: Option<bool>,
    pub deafened: Option<bool>,
    pub suppressed: Option<bool>,
    pub self_muted: Option<bool>,
    pub self_deafened: Option<bool>,
    pub priority_speaker: Option<bool>,
    pub recording: Option<bool>,
}

/// One observable mutation of the graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateChange {
    ChannelCreated {
        channel_id: u32,
    },
    ChannelUpdated {
        channel_id: u32,
    },
    ChannelLinked {
        channel_id: u32,
        linked_id: u32,
    },
    ChannelUnlinked {
        channel_id: u32,
        linked_id: u32,
    },
    ChannelRemoved {
        channel_id: u32,
    },
    UserJoined {
        session: u32,
    },
    UserMoved {
        session: u32,
        from: u32,
        to: u32,
        actor: Option<u32>,
    },
    UserMuteToggled {
        session: u32,
        muted: bool,
        actor: Option<u32>,
    },
    UserDeafToggled {
        session: u32,
        deafened: bool,
        actor: Option<u32>,
    },
    UserSuppressionToggled {
        session: u32,
        suppressed: bool,
    },
    UserSelfMuteToggled {
        session: u32,
        muted: bool,
    },
    UserSelfDeafToggled {
        session: u32,
        deafened: bool,
    },
    UserPrioritySpeakerToggled {
        session: u32,
        enabled: bool,
        actor: Option<u32>,
    },
    UserRecordingToggled {
        session: u32,
        recording: bool,
    },
}

impl StateChange {
    pub fn name(&self) -> &'static str {
        match self {
            StateChange::ChannelCreated { .. } => "channel_created",
            StateChange::ChannelUpdated { .. } => "channel_updated",
            StateChange::ChannelLinked { .. } => "channel_linked",
            StateChange::ChannelUnlinked { .. } => "channel_unlinked",
            StateChange::ChannelRemoved { .. } => "channel_removed",
            StateChange::UserJoined { .. } => "user_joined",
            StateChange::UserMoved { .. } => "user_moved",
            StateChange::UserMuteToggled { .. } => "user_mute_toggle",
            StateChange::UserDeafToggled { .. } => "user_deaf_toggle",
            StateChange::UserSuppressionToggled { .. } => "user_suppression_toggle",
            StateChange::UserSelfMuteToggled { .. } => "user_self_mute_toggle",
            StateChange::UserSelfDeafToggled { .. } => "user_self_deaf_toggle",
            StateChange::UserPrioritySpeakerToggled { .. } => "user_priority_speaker_toggle",
            StateChange::UserRecordingToggled { .. } => "user_recording_toggle",
        }
    }
}

impl PresenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
        self.users.clear();
        self.ourselves = None;
    }

    pub fn channel(&self, id: u32) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn user(&self, id: u32) -> Option<&User> {
        self.users.get(&id)
    }

    /// Case-insensitive name lookup; the lowest id wins on duplicates.
    pub fn channel_by_name(&self, name: &str) -> Option<&Channel> {
        let wanted = name.to_lowercase();
        self.channels
            .values()
            .filter(|channel| channel.name.to_lowercase() == wanted)
            .min_by_key(|channel| channel.id)
    }

    pub fn user_by_name(&self, name: &str) -> Option<&User> {
        let wanted = name.to_lowercase();
        self.users
            .values()
            .filter(|user| user.name.to_lowercase() == wanted)
            .min_by_key(|user| user.session)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn children(&self, id: u32) -> Vec<u32> {
        let mut children = self
            .channels
            .values()
            .filter(|channel| channel.id != id && channel.parent_id == Some(id))
            .map(|channel| channel.id)
            .collect::<Vec<_>>();
        children.sort_unstable();
        children
    }

    pub fn ourselves(&self) -> Option<&User> {
        self.ourselves.and_then(|session| self.users.get(&session))
    }

    /// Designates `session` as this client's own user. Only the first call
    /// has any effect; returns whether it did.
    pub fn mark_ourselves(&mut self, session: u32) -> bool {
        if self.ourselves.is_some() || !self.users.contains_key(&session) {
            return false;
        }
        self.ourselves = Some(session);
        true
    }

    pub fn apply_channel_state(&mut self, update: ChannelStateUpdate) -> Vec<StateChange> {
        let mut changes = Vec::new();
        let id = update.id;
        if id != ROOT_CHANNEL_ID {
            self.ensure_root();
        }

        match self.channels.get_mut(&id) {
            None => {
                if update.parent_id.is_none() && id != ROOT_CHANNEL_ID {
                    warn!("channel {id} described without a parent");
                }
                let mut channel =
                    Channel::new(id, update.name.unwrap_or_default(), update.parent_id);
                channel.position = update.position.unwrap_or(0);
                debug!("new channel: {} ({id})", channel.name);
                self.channels.insert(id, channel);
                changes.push(StateChange::ChannelCreated { channel_id: id });

                if !update.links.is_empty() {
                    self.replace_links(id, &update.links, &mut changes);
                }
            }
            Some(channel) => {
                let mut updated = false;
                if let Some(name) = update.name {
                    if channel.name != name {
                        channel.name = name;
                        updated = true;
                    }
                }
                if let Some(parent_id) = update.parent_id {
                    if id != ROOT_CHANNEL_ID && channel.parent_id != Some(parent_id) {
                        channel.parent_id = Some(parent_id);
                        updated = true;
                    }
                }
                if let Some(position) = update.position {
                    if channel.position != position {
                        channel.position = position;
                        updated = true;
                    }
                }
                if updated {
                    changes.push(StateChange::ChannelUpdated { channel_id: id });
                }

                if !update.links.is_empty() {
                    self.replace_links(id, &update.links, &mut changes);
                }
            }
        }

        for linked_id in update.links_add {
            if self.link(id, linked_id) {
                changes.push(StateChange::ChannelLinked {
                    channel_id: id,
                    linked_id,
                });
            }
        }
        for linked_id in update.links_remove {
            if self.unlink(id, linked_id) {
                changes.push(StateChange::ChannelUnlinked {
                    channel_id: id,
                    linked_id,
                });
            }
        }

        changes
    }

    /// Removes a channel. Child channels are re-parented and members moved
    /// to the removed channel's parent, or to the root when that is gone.
    pub fn remove_channel(&mut self, id: u32) -> Vec<StateChange> {
        let mut changes = Vec::new();
        if id == ROOT_CHANNEL_ID {
            warn!("ignoring removal of the root channel");
            return changes;
        }
        let Some(channel) = self.channels.remove(&id) else {
            warn!("removal of unknown channel {id}");
            return changes;
        };
        self.ensure_root();

        let home = channel
            .parent_id
            .filter(|parent| self.channels.contains_key(parent))
            .unwrap_or(ROOT_CHANNEL_ID);

        for linked_id in &channel.links {
            if let Some(other) = self.channels.get_mut(linked_id) {
                other.links.remove(&id);
                changes.push(StateChange::ChannelUnlinked {
                    channel_id: *linked_id,
                    linked_id: id,
                });
            }
        }

        for child in self.channels.values_mut() {
            if child.parent_id == Some(id) {
                child.parent_id = Some(home);
                changes.push(StateChange::ChannelUpdated {
                    channel_id: child.id,
                });
            }
        }

        for session in &channel.users {
            if let Some(user) = self.users.get_mut(session) {
                user.channel_id = home;
            }
            if let Some(target) = self.channels.get_mut(&home) {
                target.users.insert(*session);
            }
            changes.push(StateChange::UserMoved {
                session: *session,
                from: id,
                to: home,
                actor: None,
            });
        }

        debug!("channel removed: {} ({id})", channel.name);
        changes.push(StateChange::ChannelRemoved { channel_id: id });
        changes
    }

    pub fn apply_user_state(&mut self, update: UserStateUpdate) -> Vec<StateChange> {
        let session = update.id;
        if !self.users.contains_key(&session) {
            return self.add_user(update).into_iter().collect();
        }

        let mut changes = Vec::new();
        let actor = update.actor;

        if let Some(to) = update.channel_id {
            if let Some(from) = self.move_user(session, to) {
                changes.push(StateChange::UserMoved {
                    session,
                    from,
                    to,
                    actor,
                });
            }
        }

        let Some(user) = self.users.get_mut(&session) else {
            return changes;
        };

        if let Some(name) = update.name {
            if user.name != name {
                debug!("user {session} renamed from {} to {name}", user.name);
                user.name = name;
            }
        }
        if let Some(muted) = update.muted {
            user.muted = muted;
            changes.push(StateChange::UserMuteToggled {
                session,
                muted,
                actor,
            });
        }
        if let Some(deafened) = update.deafened {
            user.deafened = deafened;
            changes.push(StateChange::UserDeafToggled {
                session,
                deafened,
                actor,
            });
        }
        if let Some(suppressed) = update.suppressed {
            user.suppressed = suppressed;
            changes.push(StateChange::UserSuppressionToggled {
                session,
                suppressed,
            });
        }
        if let Some(muted) = update.self_muted {
            user.self_muted = muted;
            changes.push(StateChange::UserSelfMuteToggled { session, muted });
        }
        if let Some(deafened) = update.self_deafened {
            user.self_deafened = deafened;
            changes.push(StateChange::UserSelfDeafToggled { session, deafened });
        }
        if let Some(enabled) = update.priority_speaker {
            user.priority_speaker = enabled;
            changes.push(StateChange::UserPrioritySpeakerToggled {
                session,
                enabled,
                actor,
            });
        }
        if let Some(recording) = update.recording {
            user.recording = recording;
            changes.push(StateChange::UserRecordingToggled { session, recording });
        }

        changes
    }

    /// Drops a user from the index and its channel, returning the now
    /// inactive record.
    pub fn remove_user(&mut self, session: u32) -> Option<User> {
        let mut user = self.users.remove(&session)?;
        user.active = false;
        if let Some(channel) = self.channels.get_mut(&user.channel_id) {
            channel.users.remove(&session);
        }
        Some(user)
    }

    /// Whether every membership is mirrored by the user's current channel
    /// and vice versa.
    pub fn is_consistent(&self) -> bool {
        let users_ok = self.users.values().all(|user| {
            self.channels
                .get(&user.channel_id)
                .is_some_and(|channel| channel.users.contains(&user.session))
        });
        let channels_ok = self.channels.values().all(|channel| {
            channel.users.iter().all(|session| {
                self.users
                    .get(session)
                    .is_some_and(|user| user.channel_id == channel.id)
            })
        });
        users_ok && channels_ok
    }

    pub fn channels(&self) -> Vec<Channel> {
        let mut channels = self.channels.values().cloned().collect::<Vec<_>>();
        channels.sort_by_key(|channel| channel.id);
        channels
    }

    pub fn users(&self) -> Vec<User> {
        let mut users = self.users.values().cloned().collect::<Vec<_>>();
        users.sort_by_key(|user| user.session);
        users
    }

    fn ensure_root(&mut self) {
        self.channels
            .entry(ROOT_CHANNEL_ID)
            .or_insert_with(|| Channel::new(ROOT_CHANNEL_ID, String::new(), None));
    }

    fn add_user(&mut self, update: UserStateUpdate) -> Option<StateChange> {
        let session = update.id;
        let Some(name) = update.name else {
            warn!("state for unknown session {session} carries no name");
            return None;
        };
        let channel_id = update.channel_id.unwrap_or(ROOT_CHANNEL_ID);
        if channel_id == ROOT_CHANNEL_ID {
            self.ensure_root();
        }
        let Some(channel) = self.channels.get_mut(&channel_id) else {
            warn!("user {name} ({session}) announced in unknown channel {channel_id}");
            return None;
        };
        channel.users.insert(session);

        let mut user = User::new(session, name, channel_id);
        user.muted = update.muted.unwrap_or(false);
        user.deafened = update.deafened.unwrap_or(false);
        user.suppressed = update.suppressed.unwrap_or(false);
        user.self_muted = update.self_muted.unwrap_or(false);
        user.self_deafened = update.self_deafened.unwrap_or(false);
        user.priority_speaker = update.priority_speaker.unwrap_or(false);
        user.recording = update.recording.unwrap_or(false);
        debug!("user joined: {} ({session})", user.name);
        self.users.insert(session, user);
        Some(StateChange::UserJoined { session })
    }

    fn move_user(&mut self, session: u32, to: u32) -> Option<u32> {
        if !self.channels.contains_key(&to) {
            warn!("user {session} moved to unknown channel {to}");
            return None;
        }
        let user = self.users.get_mut(&session)?;
        let from = user.channel_id;
        user.channel_id = to;
        if let Some(old) = self.channels.get_mut(&from) {
            old.users.remove(&session);
        }
        if let Some(new) = self.channels.get_mut(&to) {
            new.users.insert(session);
        }
        Some(from)
    }

    fn link(&mut self, id: u32, linked_id: u32) -> bool {
        if id == linked_id {
            return false;
        }
        if !self.channels.contains_key(&linked_id) {
            warn!("channel {id} linked to unknown channel {linked_id}");
            return false;
        }
        let added = self
            .channels
            .get_mut(&id)
            .is_some_and(|channel| channel.links.insert(linked_id));
        if let Some(other) = self.channels.get_mut(&linked_id) {
            other.links.insert(id);
        }
        added
    }

    fn unlink(&mut self, id: u32, linked_id: u32) -> bool {
        let removed = self
            .channels
            .get_mut(&id)
            .is_some_and(|channel| channel.links.remove(&linked_id));
        if let Some(other) = self.channels.get_mut(&linked_id) {
            other.links.remove(&id);
        }
        removed
    }

    fn replace_links(&mut self, id: u32, links: &[u32], changes: &mut Vec<StateChange>) {
        let current = self
            .channels
            .get(&id)
            .map(|channel| channel.links.clone())
            .unwrap_or_default();
        for linked_id in current.iter().filter(|linked| !links.contains(linked)) {
            if self.unlink(id, *linked_id) {
                changes.push(StateChange::ChannelUnlinked {
                    channel_id: id,
                    linked_id: *linked_id,
                });
            }
        }
        for linked_id in links {
            if self.link(id, *linked_id) {
                changes.push(StateChange::ChannelLinked {
                    channel_id: id,
                    linked_id: *linked_id,
                });
            }
        }
    }
}
