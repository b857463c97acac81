use std::fmt;

use chrono::{DateTime, Utc};

/// Gateway user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i64);

/// Guild (community / group chat) id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuildId(pub i64);

/// Channel id. Direct conversations have a channel too.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub i64);

/// Message id, unique within a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i64);

/// A stable reference to a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a message author.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Author {
    pub id: UserId,
    pub name: String,
    pub handle: Option<String>,
    pub is_bot: bool,
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.handle {
            Some(h) => write!(f, "{} (@{h}, {})", self.name, self.id),
            None => write!(f, "{} ({})", self.name, self.id),
        }
    }
}

/// Where an event came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    Guild {
        guild_id: GuildId,
        guild_name: Option<String>,
        channel_id: ChannelId,
    },
    Direct {
        channel_id: ChannelId,
    },
}

impl Origin {
    pub fn channel_id(&self) -> ChannelId {
        match self {
            Origin::Guild { channel_id, .. } | Origin::Direct { channel_id } => *channel_id,
        }
    }

    pub fn guild_id(&self) -> Option<GuildId> {
        match self {
            Origin::Guild { guild_id, .. } => Some(*guild_id),
            Origin::Direct { .. } => None,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Origin::Direct { .. })
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Guild {
                guild_id,
                guild_name: Some(name),
                channel_id,
            } => write!(f, "'{name}' ({guild_id}) #{channel_id}"),
            Origin::Guild {
                guild_id,
                guild_name: None,
                channel_id,
            } => write!(f, "guild {guild_id} #{channel_id}"),
            Origin::Direct { channel_id } => write!(f, "DM #{channel_id}"),
        }
    }
}

/// Immutable snapshot of a received message.
#[derive(Clone, Debug)]
pub struct InboundEvent {
    pub message: MessageRef,
    pub author: Author,
    pub origin: Origin,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Reaction traffic for messages the bot may be watching.
#[derive(Clone, Debug)]
pub enum ReactionEvent {
    Added {
        message: MessageRef,
        user: Author,
        emoji: String,
    },
    Removed {
        message: MessageRef,
        user: Author,
        emoji: String,
    },
    MessageDeleted {
        message: MessageRef,
    },
}

impl ReactionEvent {
    pub fn message(&self) -> MessageRef {
        match self {
            ReactionEvent::Added { message, .. }
            | ReactionEvent::Removed { message, .. }
            | ReactionEvent::MessageDeleted { message } => *message,
        }
    }
}
