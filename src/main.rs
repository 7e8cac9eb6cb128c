use anyhow::{Context, Result};
use log::{error, info, warn};
use std::env;
use std::sync::Arc;

use warden::prelude::*;
use warden::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Info until the configured level is read; RUST_LOG overrides both
    let env_filter = env::var_os("RUST_LOG").is_some();
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Trace)
        .parse_default_env()
        .init();
    if !env_filter {
        log::set_max_level(log::LevelFilter::Info);
    }

    let config_dir = env::var("WARDEN_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let config_manager = ConfigurationManager::new(&config_dir);
    config_manager
        .initialize()
        .await
        .context("Failed to initialize configuration system")?;
    let config = config_manager.get_bot_config().await;
    if !env_filter {
        log::set_max_level(config.core.log_level_filter()?);
    }

    info!("Starting {} (warden v{})", config.core.bot_name, VERSION);
    info!("Configuration loaded from {}", config_manager.config_path().display());

    let engine = config.moderation.build_engine()?;
    info!(
        "Moderation {} with {} rules, {:?} cooldown ({:?} scope), {} minute timeouts",
        if engine.is_enabled() { "enabled" } else { "disabled" },
        engine.patterns().len(),
        config.moderation.rate_limit_window(),
        config.moderation.rate_limit_scope,
        config.moderation.suspension_minutes
    );

    // No live gateway: actions are applied to an in-memory model and logged
    let platform = Arc::new(InMemoryPlatform::new());
    warn!("Running in dry-run mode, platform actions are simulated");

    let backup_dir = config_manager.backup_directory().await;
    info!("Backups are stored in {}", backup_dir.display());

    let mut commands = CommandSystem::new(
        platform.clone(),
        Arc::new(FileSnapshotStore::new(&backup_dir)),
        platform.clone(),
    );
    commands.set_command_prefix(config.core.command_prefix.clone());

    let bot =
        ModerationBot::new(engine, commands, platform.clone(), platform.clone(), platform);

    let mut source = match env::var("WARDEN_REPLAY_FILE") {
        Ok(path) => {
            info!("Replaying gateway events from {}", path);
            ReplaySource::open(&path).await?
        }
        Err(_) => {
            info!("Reading gateway events from stdin");
            ReplaySource::stdin()
        }
    };

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => {
                error!("Unable to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    bot.run(&mut source, shutdown).await?;

    let mut stats: Vec<_> = bot.stats_snapshot().into_iter().collect();
    stats.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, value) in stats {
        info!("{}: {}", name, value);
    }

    info!("{} shut down", config.core.bot_name);
    Ok(())
}
