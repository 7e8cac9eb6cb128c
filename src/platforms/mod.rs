// src/platforms/mod.rs - Collaborator traits between the bot core and a chat platform

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::bot::backup::{ChannelRecord, RoleRecord};
use crate::types::{BotProfile, ChannelId, GatewayEvent, GuildId, GuildState, MessageRef, RoleId};

pub mod memory;
pub mod replay;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("missing permission: {0}")]
    Permission(String),

    #[error("target not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Source of gateway events.
///
/// The stream is lazy and cannot be restarted: only the first call to
/// `take_events` returns it.
pub trait GatewayEventSource: Send {
    fn take_events(&mut self) -> Option<BoxStream<'static, GatewayEvent>>;
}

/// Control-plane calls that mutate remote state. Each call is attempted once; callers
/// report failures and move on.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn delete_message(&self, message: &MessageRef) -> Result<(), ActionError>;

    async fn suspend_author(
        &self,
        message: &MessageRef,
        until: DateTime<Utc>,
    ) -> Result<(), ActionError>;

    async fn send_notice(&self, channel_id: ChannelId, text: &str) -> Result<(), ActionError>;

    async fn create_role(&self, guild_id: GuildId, role: &RoleRecord) -> Result<(), ActionError>;

    async fn update_role(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
        role: &RoleRecord,
    ) -> Result<(), ActionError>;

    async fn create_channel(
        &self,
        guild_id: GuildId,
        channel: &ChannelRecord,
    ) -> Result<(), ActionError>;

    async fn rename_guild(&self, guild_id: GuildId, name: &str) -> Result<(), ActionError>;
}

/// Read access to live platform state
#[async_trait]
pub trait GuildDirectory: Send + Sync {
    async fn guild_state(&self, guild_id: GuildId) -> Option<GuildState>;

    async fn bot_profile(&self) -> Option<BotProfile>;

    async fn guild_names(&self) -> Vec<String>;

    /// Called with every gateway event before it is dispatched
    async fn observe(&self, _event: &GatewayEvent) {}
}

/// Describes one command for platform registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub requires_manage_guild: bool,
}

#[async_trait]
pub trait CommandRegistry: Send + Sync {
    async fn register(&self, commands: &[CommandDescriptor]) -> anyhow::Result<()>;
}
