// src/types/mod.rs - Platform projections and moderation value types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type UserId = u64;
pub type GuildId = u64;
pub type ChannelId = u64;
pub type MessageId = u64;
pub type RoleId = u64;

/// A message as delivered by the gateway, reduced to what moderation needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub message_id: MessageId,
    pub author_id: UserId,
    /// Position of the author's highest role in the guild
    pub author_top_role_rank: i64,
    /// `None` for direct messages
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub content: String,
    pub bot_self_id: UserId,
    /// Position of the bot's own highest role in the guild
    pub bot_top_role_rank: i64,
    /// Whether the author may manage the guild (gates backup/restore)
    #[serde(default)]
    pub author_can_manage_guild: bool,
}

impl MessageEvent {
    pub fn is_self_authored(&self) -> bool {
        self.author_id == self.bot_self_id
    }

    pub fn message_ref(&self) -> Option<MessageRef> {
        self.guild_id.map(|guild_id| MessageRef {
            guild_id,
            channel_id: self.channel_id,
            message_id: self.message_id,
            author_id: self.author_id,
        })
    }
}

/// Addresses a single guild message and its author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub author_id: UserId,
}

/// What the engine asks the executor to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcementAction {
    Delete,
    Warn { notice: String },
    Suspend { until: DateTime<Utc> },
}

impl EnforcementAction {
    pub fn kind(&self) -> &'static str {
        match self {
            EnforcementAction::Delete => "delete",
            EnforcementAction::Warn { .. } => "warn",
            EnforcementAction::Suspend { .. } => "suspend",
        }
    }
}

/// A single best-effort enforcement request; never retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementIntent {
    pub message: MessageRef,
    pub action: EnforcementAction,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
    Announcement,
    Forum,
    Stage,
}

impl Default for ChannelKind {
    fn default() -> Self {
        ChannelKind::Text
    }
}

/// Live role as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub permissions: u64,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub position: i64,
}

/// Live channel as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    #[serde(default)]
    pub kind: ChannelKind,
}

/// Current, mutable state of a guild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildState {
    pub id: GuildId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub member_count: u64,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub channels: Vec<Channel>,
}

impl GuildState {
    pub fn role_by_id(&self, id: RoleId) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == id)
    }

    pub fn role_by_name(&self, name: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.name == name)
    }

    pub fn has_channel_named(&self, name: &str) -> bool {
        self.channels.iter().any(|c| c.name == name)
    }
}

/// Identity of the bot account itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotProfile {
    pub id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// A platform-native command invocation (slash command or equivalent)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandInvocation {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub invoker_id: UserId,
    /// Whether the invoker may manage the guild (required for backup/restore)
    #[serde(default)]
    pub invoker_can_manage_guild: bool,
}

/// Events produced by a gateway connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    Ready { bot: BotProfile },
    GuildAvailable { guild: GuildState },
    MessageCreate { message: MessageEvent },
    CommandInvocation { command: CommandInvocation },
    MemberJoin { guild_id: GuildId, user_id: UserId },
    Disconnected { reason: String },
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelKind::Text => "text",
            ChannelKind::Voice => "voice",
            ChannelKind::Category => "category",
            ChannelKind::Announcement => "announcement",
            ChannelKind::Forum => "forum",
            ChannelKind::Stage => "stage",
        };
        f.write_str(name)
    }
}
