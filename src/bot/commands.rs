use log::{debug, error, info, warn};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::bot::backup::{GuildSnapshot, SnapshotError, SnapshotStore};
use crate::bot::restore::Restorer;
use crate::platforms::{ActionExecutor, CommandDescriptor, GuildDirectory};
use crate::types::{CommandInvocation, GuildId, MessageEvent};

/// Commands announced to the platform on `Ready`
pub const COMMANDS: &[CommandDescriptor] = &[
    CommandDescriptor {
        name: "ping",
        description: "Check that the bot is responsive",
        requires_manage_guild: false,
    },
    CommandDescriptor {
        name: "botinfo",
        description: "Show the bot account and the servers it is in",
        requires_manage_guild: false,
    },
    CommandDescriptor {
        name: "serversettings",
        description: "Show this server's name, roles and channels",
        requires_manage_guild: false,
    },
    CommandDescriptor {
        name: "backup",
        description: "Save this server's roles and channels",
        requires_manage_guild: true,
    },
    CommandDescriptor {
        name: "restore",
        description: "Recreate roles and channels from the last backup",
        requires_manage_guild: true,
    },
];

pub const GUILD_ONLY_REPLY: &str = "This command only works inside a server.";
pub const MISSING_PERMISSION_REPLY: &str =
    "You need the Manage Server permission to use this command.";
pub const NO_BACKUP_REPLY: &str = "No backup found for this server.";

pub struct CommandSystem {
    command_prefix: String,
    directory: Arc<dyn GuildDirectory>,
    store: Arc<dyn SnapshotStore>,
    executor: Arc<dyn ActionExecutor>,
    restores_in_progress: Mutex<HashSet<GuildId>>,
}

impl CommandSystem {
    pub fn new(
        directory: Arc<dyn GuildDirectory>,
        store: Arc<dyn SnapshotStore>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            command_prefix: "!".to_string(),
            directory,
            store,
            executor,
            restores_in_progress: Mutex::new(HashSet::new()),
        }
    }

    /// Set the command prefix (default is "!")
    pub fn set_command_prefix(&mut self, prefix: String) {
        self.command_prefix = prefix;
        info!("Command prefix set to: {}", self.command_prefix);
    }

    pub fn command_prefix(&self) -> &str {
        &self.command_prefix
    }

    /// Turn a prefixed chat message into an invocation of a known command
    pub fn parse(&self, message: &MessageEvent) -> Option<CommandInvocation> {
        let content = message.content.strip_prefix(self.command_prefix.as_str())?;
        let mut parts = content.split_whitespace();
        let name = parts.next()?.to_lowercase();

        if !COMMANDS.iter().any(|c| c.name == name) {
            debug!("Unknown command: {}", name);
            return None;
        }

        Some(CommandInvocation {
            name,
            args: parts.map(str::to_string).collect(),
            guild_id: message.guild_id,
            channel_id: message.channel_id,
            invoker_id: message.author_id,
            invoker_can_manage_guild: message.author_can_manage_guild,
        })
    }

    /// Run a command and return the reply to post in the invoking channel.
    /// Unknown commands produce no reply.
    pub async fn execute(&self, invocation: &CommandInvocation) -> Option<String> {
        let descriptor = match COMMANDS.iter().find(|c| c.name == invocation.name) {
            Some(descriptor) => descriptor,
            None => {
                debug!("Ignoring unknown command '{}'", invocation.name);
                return None;
            }
        };

        info!(
            "Executing command '{}' for user {} in channel {}",
            invocation.name, invocation.invoker_id, invocation.channel_id
        );

        if descriptor.requires_manage_guild && invocation.guild_id.is_none() {
            return Some(GUILD_ONLY_REPLY.to_string());
        }
        if descriptor.requires_manage_guild && !invocation.invoker_can_manage_guild {
            warn!(
                "User {} attempted '{}' without manage permission",
                invocation.invoker_id, invocation.name
            );
            return Some(MISSING_PERMISSION_REPLY.to_string());
        }

        let reply = match (descriptor.name, invocation.guild_id) {
            ("ping", _) => "Pong!".to_string(),
            ("botinfo", _) => self.bot_info().await,
            ("serversettings", Some(guild_id)) => self.server_settings(guild_id).await,
            ("serversettings", None) => GUILD_ONLY_REPLY.to_string(),
            ("backup", Some(guild_id)) => self.backup(guild_id).await,
            ("restore", Some(guild_id)) => self.restore(guild_id).await,
            _ => GUILD_ONLY_REPLY.to_string(),
        };
        Some(reply)
    }

    async fn bot_info(&self) -> String {
        let bot = match self.directory.bot_profile().await {
            Some(bot) => bot,
            None => return "Bot profile is not available yet.".to_string(),
        };

        json_block(&json!({
            "username": bot.username,
            "id": bot.id,
            "created_at": bot.created_at.to_rfc3339(),
            "guilds": self.directory.guild_names().await,
        }))
    }

    async fn server_settings(&self, guild_id: GuildId) -> String {
        let guild = match self.directory.guild_state(guild_id).await {
            Some(guild) => guild,
            None => return "Server details are not available yet.".to_string(),
        };

        json_block(&json!({
            "name": guild.name,
            "id": guild.id,
            "member_count": guild.member_count,
            "roles": guild.roles.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            "channels": guild.channels.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        }))
    }

    async fn backup(&self, guild_id: GuildId) -> String {
        let guild = match self.directory.guild_state(guild_id).await {
            Some(guild) => guild,
            None => return "Server details are not available yet.".to_string(),
        };

        let snapshot = GuildSnapshot::capture(&guild);
        match self.store.save(&snapshot).await {
            Ok(()) => format!(
                "Backup saved: {} roles and {} channels.",
                snapshot.roles.len(),
                snapshot.channels.len()
            ),
            Err(e) => {
                error!("Failed to save backup of guild {}: {}", guild_id, e);
                "Backup failed, see the bot logs for details.".to_string()
            }
        }
    }

    async fn restore(&self, guild_id: GuildId) -> String {
        if !self.restores_in_progress.lock().await.insert(guild_id) {
            return "A restore is already running for this server.".to_string();
        }

        let reply = self.run_restore(guild_id).await;
        self.restores_in_progress.lock().await.remove(&guild_id);
        reply
    }

    async fn run_restore(&self, guild_id: GuildId) -> String {
        let current = match self.directory.guild_state(guild_id).await {
            Some(guild) => guild,
            None => return "Server details are not available yet.".to_string(),
        };

        let loaded = Restorer::restore_from_store(self.store.as_ref(), guild_id, &current).await;
        let plan = match loaded {
            Ok(plan) => plan,
            Err(SnapshotError::NotFound(_)) => return NO_BACKUP_REPLY.to_string(),
            Err(SnapshotError::Corrupt { reason, .. }) => {
                error!("Backup of guild {} is corrupt: {}", guild_id, reason);
                return format!("The backup for this server is unreadable: {}", reason);
            }
            Err(e) => {
                error!("Failed to load backup of guild {}: {}", guild_id, e);
                return "Restore failed, see the bot logs for details.".to_string();
            }
        };

        if plan.is_empty() {
            return "Server already matches the backup.".to_string();
        }

        let report = Restorer::execute(&plan, self.executor.as_ref()).await;
        let mut reply = format!(
            "Restore complete: {} created, {} updated, {} skipped.",
            plan.outcome.created.len(),
            plan.outcome.updated.len(),
            plan.outcome.skipped.len()
        );
        if !report.failures.is_empty() {
            reply.push_str(&format!(
                " {} of {} changes failed, see the bot logs.",
                report.failures.len(),
                plan.actions.len()
            ));
        }
        reply
    }
}

fn json_block(value: &serde_json::Value) -> String {
    let body = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    format!("```json\n{}\n```", body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::backup::FileSnapshotStore;
    use crate::platforms::memory::InMemoryPlatform;
    use crate::types::{BotProfile, Channel, ChannelKind, GuildState, Role};
    use chrono::Utc;
    use tempfile::tempdir;

    fn guild() -> GuildState {
        GuildState {
            id: 7,
            name: "Test Guild".to_string(),
            created_at: Utc::now(),
            member_count: 12,
            roles: vec![
                Role {
                    id: 7,
                    name: "@everyone".to_string(),
                    permissions: 0,
                    managed: false,
                    position: 0,
                },
                Role {
                    id: 70,
                    name: "Admin".to_string(),
                    permissions: 8,
                    managed: false,
                    position: 1,
                },
            ],
            channels: vec![Channel {
                id: 700,
                name: "general".to_string(),
                kind: ChannelKind::Text,
            }],
        }
    }

    async fn system(dir: &std::path::Path) -> (CommandSystem, Arc<InMemoryPlatform>) {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.insert_guild(guild()).await;
        platform
            .set_bot_profile(BotProfile {
                id: 1,
                username: "warden".to_string(),
                created_at: Utc::now(),
            })
            .await;
        let system = CommandSystem::new(
            platform.clone(),
            Arc::new(FileSnapshotStore::new(dir)),
            platform.clone(),
        );
        (system, platform)
    }

    fn invocation(name: &str, manage: bool) -> CommandInvocation {
        CommandInvocation {
            name: name.to_string(),
            args: Vec::new(),
            guild_id: Some(7),
            channel_id: 700,
            invoker_id: 42,
            invoker_can_manage_guild: manage,
        }
    }

    fn json_body(reply: &str) -> serde_json::Value {
        let body = reply.trim_start_matches("```json\n").trim_end_matches("\n```");
        serde_json::from_str(body).unwrap()
    }

    fn message(content: &str) -> MessageEvent {
        MessageEvent {
            message_id: 1,
            author_id: 42,
            author_top_role_rank: 0,
            guild_id: Some(7),
            channel_id: 700,
            content: content.to_string(),
            bot_self_id: 1,
            bot_top_role_rank: 5,
            author_can_manage_guild: true,
        }
    }

    #[tokio::test]
    async fn test_parse_prefixed_commands() {
        let temp_dir = tempdir().unwrap();
        let (mut system, _platform) = system(temp_dir.path()).await;

        let parsed = system.parse(&message("!PING now")).unwrap();
        assert_eq!(parsed.name, "ping");
        assert_eq!(parsed.args, vec!["now".to_string()]);
        assert!(parsed.invoker_can_manage_guild);

        assert!(system.parse(&message("ping")).is_none());
        assert!(system.parse(&message("!")).is_none());
        assert!(system.parse(&message("!unknown")).is_none());

        system.set_command_prefix("?".to_string());
        assert!(system.parse(&message("!ping")).is_none());
        assert!(system.parse(&message("?ping")).is_some());
    }

    #[tokio::test]
    async fn test_ping_and_info_commands() {
        let temp_dir = tempdir().unwrap();
        let (system, _platform) = system(temp_dir.path()).await;

        assert_eq!(system.execute(&invocation("ping", false)).await.unwrap(), "Pong!");
        assert!(system.execute(&invocation("nope", false)).await.is_none());

        let info = system.execute(&invocation("botinfo", false)).await.unwrap();
        assert!(info.starts_with("```json\n"));
        let body = json_body(&info);
        assert_eq!(body["username"], "warden");
        assert_eq!(body["guilds"], json!(["Test Guild"]));

        let settings = system.execute(&invocation("serversettings", false)).await.unwrap();
        let body = json_body(&settings);
        assert_eq!(body["member_count"], 12);
        assert_eq!(body["roles"], json!(["@everyone", "Admin"]));
        assert_eq!(body["channels"], json!(["general"]));

        let mut direct = invocation("serversettings", false);
        direct.guild_id = None;
        assert_eq!(system.execute(&direct).await.unwrap(), GUILD_ONLY_REPLY);
    }

    #[tokio::test]
    async fn test_backup_requires_manage_permission() {
        let temp_dir = tempdir().unwrap();
        let (system, _platform) = system(temp_dir.path()).await;

        for name in ["backup", "restore"] {
            let reply = system.execute(&invocation(name, false)).await.unwrap();
            assert_eq!(reply, MISSING_PERMISSION_REPLY);
        }
        assert!(!temp_dir.path().join("7.json").exists());
    }

    #[tokio::test]
    async fn test_restore_without_backup() {
        let temp_dir = tempdir().unwrap();
        let (system, _platform) = system(temp_dir.path()).await;

        assert_eq!(system.execute(&invocation("restore", true)).await.unwrap(), NO_BACKUP_REPLY);
    }

    #[tokio::test]
    async fn test_backup_then_restore_after_damage() {
        let temp_dir = tempdir().unwrap();
        let (system, platform) = system(temp_dir.path()).await;

        let reply = system.execute(&invocation("backup", true)).await.unwrap();
        assert_eq!(reply, "Backup saved: 2 roles and 1 channels.");

        let mut damaged = guild();
        damaged.roles[1].name = "Owned".to_string();
        damaged.channels.clear();
        platform.insert_guild(damaged).await;

        let reply = system.execute(&invocation("restore", true)).await.unwrap();
        assert_eq!(reply, "Restore complete: 1 created, 1 updated, 2 skipped.");

        let live = platform.guild_state(7).await.unwrap();
        assert_eq!(live.role_by_id(70).unwrap().name, "Admin");
        assert!(live.has_channel_named("general"));

        let reply = system.execute(&invocation("restore", true)).await.unwrap();
        assert_eq!(reply, "Server already matches the backup.");
    }

    #[tokio::test]
    async fn test_restore_reports_failed_changes() {
        let temp_dir = tempdir().unwrap();
        let (system, platform) = system(temp_dir.path()).await;
        system.execute(&invocation("backup", true)).await.unwrap();

        let mut damaged = guild();
        damaged.name = "Raided".to_string();
        damaged.channels.clear();
        platform.insert_guild(damaged).await;
        platform.set_failing("create_channel", true).await;

        let reply = system.execute(&invocation("restore", true)).await.unwrap();
        assert!(reply.ends_with("1 of 2 changes failed, see the bot logs."), "{}", reply);
        assert_eq!(platform.guild_state(7).await.unwrap().name, "Test Guild");
    }

    #[tokio::test]
    async fn test_corrupt_backup_is_reported() {
        let temp_dir = tempdir().unwrap();
        let (system, _platform) = system(temp_dir.path()).await;
        tokio::fs::write(temp_dir.path().join("7.json"), "not json").await.unwrap();

        let reply = system.execute(&invocation("restore", true)).await.unwrap();
        assert!(reply.starts_with("The backup for this server is unreadable"));
    }
}
