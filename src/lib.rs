//! # Warden
//!
//! A moderation bot for guild-based chat platforms.
//!
//! ## Features
//!
//! - **Rule-based moderation**: ordered, bounded content rules (links, invites, bare
//!   mentions, alphabet spam, repeated characters, invisible characters, banned phrases)
//! - **Timeouts with cooldown**: offending messages are always removed, author timeouts are
//!   rate limited and only issued when the bot outranks the author
//! - **Backup and restore**: snapshot a guild's name, roles and channels to disk and
//!   reconcile live state against it later
//! - **Commands**: `ping`, `botinfo`, `serversettings`, `backup`, `restore`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warden::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let platform = Arc::new(InMemoryPlatform::new());
//!     let engine = ModerationSettings::default().build_engine()?;
//!     let commands = CommandSystem::new(
//!         platform.clone(),
//!         Arc::new(FileSnapshotStore::new("backups")),
//!         platform.clone(),
//!     );
//!     let bot =
//!         ModerationBot::new(engine, commands, platform.clone(), platform.clone(), platform);
//!
//!     let mut source = ReplaySource::open("events.jsonl").await?;
//!     bot.run(&mut source, std::future::pending()).await
//! }
//! ```

pub mod types;
pub mod platforms;
pub mod bot;
pub mod config;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::ModerationBot;
    pub use crate::bot::backup::{FileSnapshotStore, GuildSnapshot, SnapshotError, SnapshotStore};
    pub use crate::bot::commands::CommandSystem;
    pub use crate::bot::moderation::{Decision, IgnoreReason, ModerationEngine, SuspensionOutcome};
    pub use crate::bot::pattern_matching::{PatternSet, Rule, RuleCategory, RuleDefinition};
    pub use crate::bot::rate_limiter::{LimiterScope, RateLimiter};
    pub use crate::bot::restore::{RestorePlan, Restorer};
    pub use crate::bot::suspension::{Authorization, SuspensionPolicy};
    pub use crate::config::{BotConfiguration, ConfigurationManager, ModerationSettings};
    pub use crate::platforms::{
        ActionError, ActionExecutor, CommandRegistry, GatewayEventSource, GuildDirectory,
        memory::InMemoryPlatform,
        replay::ReplaySource,
    };
    pub use crate::types::{
        EnforcementAction, EnforcementIntent, GatewayEvent, GuildState, MessageEvent,
    };
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
