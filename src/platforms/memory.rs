// src/platforms/memory.rs - In-memory platform used for dry runs and tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::bot::backup::{ChannelRecord, RoleRecord};
use crate::platforms::{
    ActionError, ActionExecutor, CommandDescriptor, CommandRegistry, GuildDirectory,
};
use crate::types::{
    BotProfile, Channel, ChannelId, GatewayEvent, GuildId, GuildState, MessageRef, Role, RoleId,
};

/// Ids handed out to roles and channels created here
const FIRST_GENERATED_ID: u64 = 9_000_000_000_000_000_000;

/// Keeps a model of each guild and applies every requested action to it, logging what a
/// real platform would be asked to do. Individual action kinds can be made to fail.
pub struct InMemoryPlatform {
    guilds: RwLock<HashMap<GuildId, GuildState>>,
    bot: RwLock<Option<BotProfile>>,
    deleted: RwLock<Vec<MessageRef>>,
    suspensions: RwLock<Vec<(MessageRef, DateTime<Utc>)>>,
    notices: RwLock<Vec<(ChannelId, String)>>,
    registered: RwLock<Vec<CommandDescriptor>>,
    failing: RwLock<HashSet<&'static str>>,
    next_id: AtomicU64,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self {
            guilds: RwLock::new(HashMap::new()),
            bot: RwLock::new(None),
            deleted: RwLock::new(Vec::new()),
            suspensions: RwLock::new(Vec::new()),
            notices: RwLock::new(Vec::new()),
            registered: RwLock::new(Vec::new()),
            failing: RwLock::new(HashSet::new()),
            next_id: AtomicU64::new(FIRST_GENERATED_ID),
        }
    }

    pub async fn insert_guild(&self, guild: GuildState) {
        self.guilds.write().await.insert(guild.id, guild);
    }

    pub async fn set_bot_profile(&self, bot: BotProfile) {
        *self.bot.write().await = Some(bot);
    }

    /// Make every call of `action` ("delete", "suspend", "notice", "create_role",
    /// "update_role", "create_channel", "rename_guild") fail until cleared
    pub async fn set_failing(&self, action: &'static str, failing: bool) {
        let mut set = self.failing.write().await;
        if failing {
            set.insert(action);
        } else {
            set.remove(action);
        }
    }

    pub async fn deleted_messages(&self) -> Vec<MessageRef> {
        self.deleted.read().await.clone()
    }

    pub async fn suspensions(&self) -> Vec<(MessageRef, DateTime<Utc>)> {
        self.suspensions.read().await.clone()
    }

    pub async fn notices(&self) -> Vec<(ChannelId, String)> {
        self.notices.read().await.clone()
    }

    pub async fn registered_commands(&self) -> Vec<CommandDescriptor> {
        self.registered.read().await.clone()
    }

    async fn check(&self, action: &'static str) -> Result<(), ActionError> {
        if self.failing.read().await.contains(action) {
            Err(ActionError::Transport(format!("{} rejected by simulated platform", action)))
        } else {
            Ok(())
        }
    }

    fn generate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for InMemoryPlatform {
    async fn delete_message(&self, message: &MessageRef) -> Result<(), ActionError> {
        self.check("delete").await?;
        let mut deleted = self.deleted.write().await;
        if deleted.iter().any(|m| m.message_id == message.message_id) {
            return Err(ActionError::NotFound(format!("message {}", message.message_id)));
        }
        info!("Would delete message {} in channel {}", message.message_id, message.channel_id);
        deleted.push(*message);
        Ok(())
    }

    async fn suspend_author(
        &self,
        message: &MessageRef,
        until: DateTime<Utc>,
    ) -> Result<(), ActionError> {
        self.check("suspend").await?;
        info!(
            "Would time out user {} in guild {} until {}",
            message.author_id, message.guild_id, until
        );
        self.suspensions.write().await.push((*message, until));
        Ok(())
    }

    async fn send_notice(&self, channel_id: ChannelId, text: &str) -> Result<(), ActionError> {
        self.check("notice").await?;
        info!("Would send to channel {}: {}", channel_id, text);
        self.notices.write().await.push((channel_id, text.to_string()));
        Ok(())
    }

    async fn create_role(&self, guild_id: GuildId, role: &RoleRecord) -> Result<(), ActionError> {
        self.check("create_role").await?;
        let mut guilds = self.guilds.write().await;
        let guild = guilds
            .get_mut(&guild_id)
            .ok_or_else(|| ActionError::NotFound(format!("guild {}", guild_id)))?;

        let position = guild.roles.iter().map(|r| r.position).max().unwrap_or(0) + 1;
        guild.roles.push(Role {
            id: self.generate_id(),
            name: role.name.clone(),
            permissions: role.permissions,
            managed: false,
            position,
        });
        info!("Would create role '{}' in guild {}", role.name, guild_id);
        Ok(())
    }

    async fn update_role(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
        role: &RoleRecord,
    ) -> Result<(), ActionError> {
        self.check("update_role").await?;
        let mut guilds = self.guilds.write().await;
        let live = guilds
            .get_mut(&guild_id)
            .and_then(|g| g.roles.iter_mut().find(|r| r.id == role_id))
            .ok_or_else(|| ActionError::NotFound(format!("role {}", role_id)))?;

        if live.managed {
            return Err(ActionError::Permission(format!(
                "role '{}' is managed by an integration",
                live.name
            )));
        }
        live.name = role.name.clone();
        live.permissions = role.permissions;
        info!("Would update role {} in guild {} to '{}'", role_id, guild_id, role.name);
        Ok(())
    }

    async fn create_channel(
        &self,
        guild_id: GuildId,
        channel: &ChannelRecord,
    ) -> Result<(), ActionError> {
        self.check("create_channel").await?;
        let mut guilds = self.guilds.write().await;
        let guild = guilds
            .get_mut(&guild_id)
            .ok_or_else(|| ActionError::NotFound(format!("guild {}", guild_id)))?;

        guild.channels.push(Channel {
            id: self.generate_id(),
            name: channel.name.clone(),
            kind: channel.kind,
        });
        info!("Would create {} channel '{}' in guild {}", channel.kind, channel.name, guild_id);
        Ok(())
    }

    async fn rename_guild(&self, guild_id: GuildId, name: &str) -> Result<(), ActionError> {
        self.check("rename_guild").await?;
        let mut guilds = self.guilds.write().await;
        let guild = guilds
            .get_mut(&guild_id)
            .ok_or_else(|| ActionError::NotFound(format!("guild {}", guild_id)))?;

        guild.name = name.to_string();
        info!("Would rename guild {} to '{}'", guild_id, name);
        Ok(())
    }
}

#[async_trait]
impl GuildDirectory for InMemoryPlatform {
    async fn guild_state(&self, guild_id: GuildId) -> Option<GuildState> {
        self.guilds.read().await.get(&guild_id).cloned()
    }

    async fn bot_profile(&self) -> Option<BotProfile> {
        self.bot.read().await.clone()
    }

    async fn guild_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.guilds.read().await.values().map(|g| g.name.clone()).collect();
        names.sort();
        names
    }

    /// Keep the model in step with lifecycle events
    async fn observe(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::Ready { bot } => self.set_bot_profile(bot.clone()).await,
            GatewayEvent::GuildAvailable { guild } => self.insert_guild(guild.clone()).await,
            GatewayEvent::MemberJoin { guild_id, .. } => {
                if let Some(guild) = self.guilds.write().await.get_mut(guild_id) {
                    guild.member_count += 1;
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl CommandRegistry for InMemoryPlatform {
    async fn register(&self, commands: &[CommandDescriptor]) -> anyhow::Result<()> {
        let mut registered = self.registered.write().await;
        registered.clear();
        registered.extend_from_slice(commands);
        info!("Registered {} commands", commands.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChannelKind;

    fn guild() -> GuildState {
        GuildState {
            id: 1,
            name: "Home".to_string(),
            created_at: Utc::now(),
            member_count: 2,
            roles: vec![Role {
                id: 10,
                name: "Bot".to_string(),
                permissions: 0,
                managed: true,
                position: 1,
            }],
            channels: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_actions_mutate_model() {
        let platform = InMemoryPlatform::new();
        platform.insert_guild(guild()).await;

        let role = RoleRecord { id: 5, name: "Mods".to_string(), permissions: 4, managed: false };
        platform.create_role(1, &role).await.unwrap();
        platform
            .create_channel(1, &ChannelRecord {
                name: "general".to_string(),
                kind: ChannelKind::Text,
            })
            .await
            .unwrap();
        platform.rename_guild(1, "Renamed").await.unwrap();

        let state = platform.guild_state(1).await.unwrap();
        assert_eq!(state.name, "Renamed");
        assert_eq!(state.role_by_name("Mods").unwrap().position, 2);
        assert!(state.role_by_name("Mods").unwrap().id >= FIRST_GENERATED_ID);
        assert!(state.has_channel_named("general"));
    }

    #[tokio::test]
    async fn test_managed_role_cannot_be_updated() {
        let platform = InMemoryPlatform::new();
        platform.insert_guild(guild()).await;

        let role = RoleRecord { id: 10, name: "Other".to_string(), permissions: 0, managed: false };
        assert!(matches!(
            platform.update_role(1, 10, &role).await,
            Err(ActionError::Permission(_))
        ));
        assert!(matches!(platform.update_role(1, 11, &role).await, Err(ActionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failure_injection_and_double_delete() {
        let platform = InMemoryPlatform::new();
        let message = MessageRef { guild_id: 1, channel_id: 2, message_id: 3, author_id: 4 };

        platform.set_failing("delete", true).await;
        assert!(matches!(platform.delete_message(&message).await, Err(ActionError::Transport(_))));

        platform.set_failing("delete", false).await;
        platform.delete_message(&message).await.unwrap();
        assert!(matches!(platform.delete_message(&message).await, Err(ActionError::NotFound(_))));
        assert_eq!(platform.deleted_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_observe_lifecycle_events() {
        let platform = InMemoryPlatform::new();
        platform.observe(&GatewayEvent::GuildAvailable { guild: guild() }).await;
        platform.observe(&GatewayEvent::MemberJoin { guild_id: 1, user_id: 99 }).await;

        assert_eq!(platform.guild_state(1).await.unwrap().member_count, 3);
        assert_eq!(platform.guild_names().await, vec!["Home".to_string()]);
    }
}
