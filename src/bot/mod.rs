use anyhow::{Context, Result};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::platforms::{ActionExecutor, CommandRegistry, GatewayEventSource, GuildDirectory};
use crate::types::{
    CommandInvocation, EnforcementAction, EnforcementIntent, GatewayEvent, MessageEvent,
};

pub mod backup;
pub mod commands;
pub mod moderation;
pub mod pattern_matching;
pub mod rate_limiter;
pub mod restore;
pub mod suspension;

use commands::{CommandSystem, COMMANDS};
use moderation::{Decision, IgnoreReason, ModerationEngine, SuspensionOutcome};

#[derive(Debug, Default)]
struct BotStats {
    messages_seen: AtomicU64,
    messages_enforced: AtomicU64,
    suspensions_requested: AtomicU64,
    suspensions_rate_limited: AtomicU64,
    insufficient_authority: AtomicU64,
    actions_failed: AtomicU64,
    commands_executed: AtomicU64,
}

/// Core bot engine: reads gateway events and drives moderation and commands.
///
/// Cloning is cheap and every clone shares the same engine, limiter and counters, which is
/// how per-message tasks get their own handle.
#[derive(Clone)]
pub struct ModerationBot {
    engine: Arc<ModerationEngine>,
    commands: Arc<CommandSystem>,
    executor: Arc<dyn ActionExecutor>,
    registry: Arc<dyn CommandRegistry>,
    directory: Arc<dyn GuildDirectory>,
    stats: Arc<BotStats>,
}

impl ModerationBot {
    pub fn new(
        engine: ModerationEngine,
        commands: CommandSystem,
        executor: Arc<dyn ActionExecutor>,
        directory: Arc<dyn GuildDirectory>,
        registry: Arc<dyn CommandRegistry>,
    ) -> Self {
        Self {
            engine: Arc::new(engine),
            commands: Arc::new(commands),
            executor,
            registry,
            directory,
            stats: Arc::new(BotStats::default()),
        }
    }

    pub fn engine(&self) -> &ModerationEngine {
        &self.engine
    }

    /// Consume `source` until it ends or `shutdown` resolves, then wait for in-flight
    /// message and command tasks.
    pub async fn run<F>(&self, source: &mut dyn GatewayEventSource, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let mut events = source
            .take_events()
            .context("Gateway event stream has already been consumed")?;
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        info!("Moderation bot started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer reading gateway events");
                    break;
                }
                Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = finished {
                        error!("Event handler task failed: {}", e);
                    }
                }
                event = events.next() => match event {
                    Some(event) => self.dispatch(event, &mut tasks).await,
                    None => {
                        info!("Gateway event stream ended");
                        break;
                    }
                }
            }
        }

        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                error!("Event handler task failed: {}", e);
            }
        }

        info!("Moderation bot stopped");
        Ok(())
    }

    async fn dispatch(&self, event: GatewayEvent, tasks: &mut JoinSet<()>) {
        self.directory.observe(&event).await;

        match event {
            GatewayEvent::Ready { bot } => {
                info!("Connected as {} ({})", bot.username, bot.id);
                if let Err(e) = self.registry.register(COMMANDS).await {
                    error!("Failed to register commands: {:#}", e);
                }
            }
            GatewayEvent::GuildAvailable { guild } => {
                info!(
                    "Guild available: {} ({}), {} members",
                    guild.name, guild.id, guild.member_count
                );
            }
            GatewayEvent::MemberJoin { guild_id, user_id } => {
                debug!("User {} joined guild {}", user_id, guild_id);
            }
            GatewayEvent::MessageCreate { message } => {
                let bot = self.clone();
                tasks.spawn(async move {
                    bot.handle_message(&message).await;
                });
            }
            GatewayEvent::CommandInvocation { command } => {
                let bot = self.clone();
                tasks.spawn(async move {
                    bot.handle_command(&command).await;
                });
            }
            GatewayEvent::Disconnected { reason } => {
                warn!("Gateway disconnected: {}", reason);
            }
        }
    }

    /// Moderate one message and carry out the resulting intents. Messages that are not
    /// enforced are checked for prefix commands.
    pub async fn handle_message(&self, message: &MessageEvent) -> Decision {
        self.stats.messages_seen.fetch_add(1, Ordering::Relaxed);
        let decision = self.engine.handle(message);

        match &decision {
            Decision::Enforced { suspension, intents, .. } => {
                self.stats.messages_enforced.fetch_add(1, Ordering::Relaxed);
                let counter = match suspension {
                    SuspensionOutcome::Requested(_) => &self.stats.suspensions_requested,
                    SuspensionOutcome::RateLimited => &self.stats.suspensions_rate_limited,
                    SuspensionOutcome::InsufficientAuthority => &self.stats.insufficient_authority,
                };
                counter.fetch_add(1, Ordering::Relaxed);

                for intent in intents {
                    self.execute_intent(intent).await;
                }
            }
            Decision::Ignored(IgnoreReason::SelfAuthored) => {}
            Decision::Ignored(_) => {
                if let Some(invocation) = self.commands.parse(message) {
                    self.handle_command(&invocation).await;
                }
            }
        }

        decision
    }

    /// Run a command and post its reply in the invoking channel
    pub async fn handle_command(&self, invocation: &CommandInvocation) -> Option<String> {
        let reply = self.commands.execute(invocation).await?;
        self.stats.commands_executed.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.executor.send_notice(invocation.channel_id, &reply).await {
            self.stats.actions_failed.fetch_add(1, Ordering::Relaxed);
            error!(
                "Failed to send reply to '{}' in channel {}: {}",
                invocation.name, invocation.channel_id, e
            );
        }
        Some(reply)
    }

    async fn execute_intent(&self, intent: &EnforcementIntent) {
        let target = &intent.message;
        let result = match &intent.action {
            EnforcementAction::Delete => self.executor.delete_message(target).await,
            EnforcementAction::Warn { notice } => {
                self.executor.send_notice(target.channel_id, notice).await
            }
            EnforcementAction::Suspend { until } => {
                match self.executor.suspend_author(target, *until).await {
                    Ok(()) => {
                        let notice = self.engine.policy().confirmation_notice(target.author_id);
                        self.executor.send_notice(target.channel_id, &notice).await
                    }
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = result {
            self.stats.actions_failed.fetch_add(1, Ordering::Relaxed);
            error!(
                "Failed to {} for message {} from {} ({}): {}",
                intent.action.kind(),
                target.message_id,
                target.author_id,
                intent.reason,
                e
            );
        }
    }

    /// Counters since startup
    pub fn stats_snapshot(&self) -> HashMap<String, serde_json::Value> {
        let counters = [
            ("messages_seen", &self.stats.messages_seen),
            ("messages_enforced", &self.stats.messages_enforced),
            ("suspensions_requested", &self.stats.suspensions_requested),
            ("suspensions_rate_limited", &self.stats.suspensions_rate_limited),
            ("insufficient_authority", &self.stats.insufficient_authority),
            ("actions_failed", &self.stats.actions_failed),
            ("commands_executed", &self.stats.commands_executed),
        ];

        let mut stats: HashMap<String, serde_json::Value> = counters
            .iter()
            .map(|(name, counter)| (name.to_string(), counter.load(Ordering::Relaxed).into()))
            .collect();
        stats.insert("moderation_enabled".to_string(), self.engine.is_enabled().into());
        stats.insert("rules".to_string(), self.engine.patterns().len().into());
        stats
    }
}
