// src/bot/backup.rs - Guild configuration snapshots and their durable storage

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

use crate::types::{ChannelKind, GuildId, GuildState, RoleId};

/// Snapshot record format written by this version
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no backup exists for guild {0}")]
    NotFound(GuildId),

    #[error("backup for guild {guild_id} is unreadable: {reason}")]
    Corrupt { guild_id: GuildId, reason: String },

    #[error("backup storage error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub id: RoleId,
    pub name: String,
    pub permissions: u64,
    /// Integration-owned; kept for comparison, never recreated
    pub managed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub name: String,
    #[serde(default)]
    pub kind: ChannelKind,
}

/// Point-in-time copy of a guild's configurable state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSnapshot {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    pub guild_id: GuildId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub captured_at: DateTime<Utc>,
    pub roles: Vec<RoleRecord>,
    pub channels: Vec<ChannelRecord>,
}

fn default_format_version() -> u32 {
    SNAPSHOT_FORMAT_VERSION
}

impl GuildSnapshot {
    /// Project the configurable parts of `guild`. Member counts and other volatile data
    /// are left out.
    pub fn capture(guild: &GuildState) -> Self {
        Self::capture_at(guild, Utc::now())
    }

    pub fn capture_at(guild: &GuildState, captured_at: DateTime<Utc>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            guild_id: guild.id,
            name: guild.name.clone(),
            created_at: guild.created_at,
            captured_at,
            roles: guild
                .roles
                .iter()
                .map(|role| RoleRecord {
                    id: role.id,
                    name: role.name.clone(),
                    permissions: role.permissions,
                    managed: role.managed,
                })
                .collect(),
            channels: guild
                .channels
                .iter()
                .map(|channel| ChannelRecord {
                    name: channel.name.clone(),
                    kind: channel.kind,
                })
                .collect(),
        }
    }
}

/// Durable snapshot storage keyed by guild
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &GuildSnapshot) -> Result<(), SnapshotError>;

    async fn load(&self, guild_id: GuildId) -> Result<GuildSnapshot, SnapshotError>;
}

/// One pretty-printed JSON file per guild
pub struct FileSnapshotStore {
    directory: PathBuf,
}

impl FileSnapshotStore {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, guild_id: GuildId) -> PathBuf {
        self.directory.join(format!("{}.json", guild_id))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &GuildSnapshot) -> Result<(), SnapshotError> {
        fs::create_dir_all(&self.directory).await?;

        let content = serde_json::to_string_pretty(snapshot).map_err(|e| SnapshotError::Corrupt {
            guild_id: snapshot.guild_id,
            reason: e.to_string(),
        })?;

        // Write-then-rename so readers never see a half-written record
        let path = self.path_for(snapshot.guild_id);
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, &path).await?;

        info!(
            "Saved backup of guild {} ({} roles, {} channels) to {}",
            snapshot.guild_id,
            snapshot.roles.len(),
            snapshot.channels.len(),
            path.display()
        );
        Ok(())
    }

    async fn load(&self, guild_id: GuildId) -> Result<GuildSnapshot, SnapshotError> {
        let path = self.path_for(guild_id);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SnapshotError::NotFound(guild_id));
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(SnapshotError::Corrupt { guild_id, reason: e.to_string() });
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: GuildSnapshot = serde_json::from_str(&content)
            .map_err(|e| SnapshotError::Corrupt { guild_id, reason: e.to_string() })?;

        if snapshot.guild_id != guild_id {
            return Err(SnapshotError::Corrupt {
                guild_id,
                reason: format!("record belongs to guild {}", snapshot.guild_id),
            });
        }
        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::Corrupt {
                guild_id,
                reason: format!("unsupported format version {}", snapshot.format_version),
            });
        }

        debug!("Loaded backup of guild {} from {}", guild_id, path.display());
        Ok(snapshot)
    }
}
