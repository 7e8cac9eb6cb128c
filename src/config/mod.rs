// src/config/mod.rs - YAML configuration loading and validation

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;

use crate::bot::moderation::ModerationEngine;
use crate::bot::pattern_matching::{
    default_rules, InvalidRuleError, PatternSet, RuleDefinition, DEFAULT_MAX_CONTENT_LENGTH,
};
use crate::bot::rate_limiter::{LimiterScope, RateLimiter};
use crate::bot::suspension::{SuspensionPolicy, MAX_SUSPENSION};

pub const BOT_CONFIG_FILE: &str = "bot.yaml";

/// Loads `bot.yaml` from a configuration directory, writing a default one when missing
#[derive(Clone)]
pub struct ConfigurationManager {
    /// Base directory for configuration files
    config_dir: PathBuf,

    bot_config: Arc<RwLock<BotConfiguration>>,

    validator: Arc<ConfigValidator>,
}

/// Bot configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfiguration {
    pub version: String,
    pub description: String,
    pub last_updated: DateTime<Utc>,

    /// Core bot settings
    pub core: CoreBotSettings,

    #[serde(default)]
    pub moderation: ModerationSettings,

    #[serde(default)]
    pub backups: BackupSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreBotSettings {
    pub bot_name: String,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl CoreBotSettings {
    pub fn log_level_filter(&self) -> Result<log::LevelFilter> {
        self.log_level
            .parse()
            .map_err(|_| anyhow::anyhow!("Unknown log level '{}'", self.log_level))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum time between two suspensions under the same limiter key
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,

    #[serde(default)]
    pub rate_limit_scope: LimiterScope,

    #[serde(default = "default_suspension_minutes")]
    pub suspension_minutes: u64,

    /// Characters of a message that rules look at
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,

    #[serde(default)]
    pub banned_phrases: Vec<String>,

    /// Replaces the built-in rule list when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<RuleDefinition>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Relative paths are resolved against the configuration directory
    #[serde(default = "default_backup_directory")]
    pub directory: PathBuf,
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_rate_limit_window_ms() -> u64 {
    1000
}

fn default_suspension_minutes() -> u64 {
    3
}

fn default_max_content_length() -> usize {
    DEFAULT_MAX_CONTENT_LENGTH
}

fn default_backup_directory() -> PathBuf {
    PathBuf::from("backups")
}

impl ModerationSettings {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn suspension_duration(&self) -> Duration {
        Duration::from_secs(self.suspension_minutes.saturating_mul(60))
    }

    /// Rule definitions in effect: the custom list if given, otherwise the built-ins
    pub fn rule_definitions(&self) -> Vec<RuleDefinition> {
        match &self.rules {
            Some(rules) => rules.clone(),
            None => default_rules(&self.banned_phrases),
        }
    }

    pub fn pattern_set(&self) -> Result<PatternSet, InvalidRuleError> {
        PatternSet::compile(&self.rule_definitions(), self.max_content_length)
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.rate_limit_window(), self.rate_limit_scope)
    }

    pub fn suspension_policy(&self) -> SuspensionPolicy {
        SuspensionPolicy::new(self.suspension_duration())
    }

    /// Build a ready moderation engine from these settings
    pub fn build_engine(&self) -> Result<ModerationEngine> {
        let patterns = self.pattern_set().context("Failed to compile moderation rules")?;
        let engine = ModerationEngine::new(
            patterns,
            Arc::new(self.rate_limiter()),
            self.suspension_policy(),
        );
        engine.set_enabled(self.enabled);
        Ok(engine)
    }
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_limit_window_ms: default_rate_limit_window_ms(),
            rate_limit_scope: LimiterScope::default(),
            suspension_minutes: default_suspension_minutes(),
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            banned_phrases: Vec::new(),
            rules: None,
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            directory: default_backup_directory(),
        }
    }
}

impl Default for BotConfiguration {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            description: "Warden moderation bot configuration".to_string(),
            last_updated: Utc::now(),
            core: CoreBotSettings {
                bot_name: "Warden".to_string(),
                command_prefix: default_command_prefix(),
                log_level: default_log_level(),
            },
            moderation: ModerationSettings::default(),
            backups: BackupSettings::default(),
        }
    }
}

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate bot configuration
    pub fn validate_bot_config(&self, config: &BotConfiguration) -> Result<()> {
        if config.core.command_prefix.trim().is_empty() {
            return Err(anyhow::anyhow!("Command prefix cannot be empty"));
        }
        if config.core.command_prefix.chars().any(char::is_whitespace) {
            return Err(anyhow::anyhow!("Command prefix cannot contain whitespace"));
        }
        config.core.log_level_filter()?;

        self.validate_moderation(&config.moderation)
    }

    fn validate_moderation(&self, moderation: &ModerationSettings) -> Result<()> {
        if moderation.rate_limit_window_ms == 0 {
            return Err(anyhow::anyhow!("Rate limit window must be greater than zero"));
        }

        if moderation.suspension_minutes == 0 {
            return Err(anyhow::anyhow!("Suspension duration must be greater than zero"));
        }
        if moderation.suspension_duration() > MAX_SUSPENSION {
            return Err(anyhow::anyhow!(
                "Suspension duration of {} minutes exceeds the platform maximum of {} minutes",
                moderation.suspension_minutes,
                MAX_SUSPENSION.as_secs() / 60
            ));
        }

        if moderation.max_content_length == 0 {
            return Err(anyhow::anyhow!("Max content length must be greater than zero"));
        }

        if let Some(rules) = &moderation.rules {
            if rules.is_empty() {
                return Err(anyhow::anyhow!(
                    "Custom rule list cannot be empty; remove it to use the built-in rules"
                ));
            }
        }
        moderation.pattern_set().context("Invalid moderation rules")?;

        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationManager {
    /// Create a new configuration manager
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            bot_config: Arc::new(RwLock::new(BotConfiguration::default())),
            validator: Arc::new(ConfigValidator::new()),
        }
    }

    /// Create the directory if needed, then load (or create) and validate `bot.yaml`
    pub async fn initialize(&self) -> Result<()> {
        if !self.config_dir.exists() {
            fs::create_dir_all(&self.config_dir)
                .await
                .with_context(|| format!("Failed to create {}", self.config_dir.display()))?;
            info!("Created configuration directory: {}", self.config_dir.display());
        }

        if self.config_path().exists() {
            self.load_bot_config().await?;
        } else {
            self.create_default_bot_config().await?;
        }

        info!("Configuration manager initialized successfully");
        Ok(())
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(BOT_CONFIG_FILE)
    }

    /// Load bot configuration from file
    async fn load_bot_config(&self) -> Result<()> {
        let config_path = self.config_path();
        let content = fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: BotConfiguration = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        self.validator
            .validate_bot_config(&config)
            .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;

        *self.bot_config.write().await = config;

        info!("Loaded bot configuration from {}", config_path.display());
        Ok(())
    }

    /// Create default bot configuration file
    async fn create_default_bot_config(&self) -> Result<()> {
        let config = BotConfiguration::default();
        let config_path = self.config_path();

        let content = serde_yaml::to_string(&config)?;
        fs::write(&config_path, content)
            .await
            .with_context(|| format!("Failed to write {}", config_path.display()))?;

        *self.bot_config.write().await = config;
        info!("Created default bot configuration: {}", config_path.display());
        Ok(())
    }

    /// Get current bot configuration
    pub async fn get_bot_config(&self) -> BotConfiguration {
        self.bot_config.read().await.clone()
    }

    /// Directory snapshots are written to
    pub async fn backup_directory(&self) -> PathBuf {
        let directory = self.bot_config.read().await.backups.directory.clone();
        if directory.is_absolute() {
            directory
        } else {
            self.config_dir.join(directory)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::pattern_matching::RuleCategory;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_config_manager_initialization() {
        let temp_dir = tempdir().unwrap();
        let config_dir = temp_dir.path().join("config");
        let config_manager = ConfigurationManager::new(&config_dir);

        config_manager.initialize().await.unwrap();
        assert!(config_dir.join("bot.yaml").exists());

        let config = config_manager.get_bot_config().await;
        assert_eq!(config.core.command_prefix, "!");
        assert_eq!(config.moderation.rate_limit_window_ms, 1000);
        assert_eq!(config.moderation.suspension_duration(), Duration::from_secs(180));
        assert_eq!(config_manager.backup_directory().await, config_dir.join("backups"));

        // The written default loads back cleanly
        let reloaded = ConfigurationManager::new(&config_dir);
        reloaded.initialize().await.unwrap();
        assert_eq!(reloaded.get_bot_config().await.core.bot_name, "Warden");
    }

    #[tokio::test]
    async fn test_custom_rules_and_scope() {
        let temp_dir = tempdir().unwrap();
        let yaml = r#"
version: "1.0"
description: test
last_updated: 2024-01-01T00:00:00Z
core:
  bot_name: Test
  command_prefix: "?"
moderation:
  rate_limit_window_ms: 5000
  rate_limit_scope: per_author
  suspension_minutes: 10
  rules:
    - id: shouting
      category: spam
      matcher:
        kind: regex
        pattern: "^[A-Z ]{20,}$"
    - id: words
      category: policy
      matcher:
        kind: phrases
        phrases: ["forbidden"]
backups:
  directory: /var/lib/warden
"#;
        fs::write(temp_dir.path().join("bot.yaml"), yaml).await.unwrap();

        let config_manager = ConfigurationManager::new(temp_dir.path());
        config_manager.initialize().await.unwrap();
        let config = config_manager.get_bot_config().await;

        assert_eq!(config.core.command_prefix, "?");
        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.moderation.rate_limit_scope, LimiterScope::PerAuthor);
        assert_eq!(config_manager.backup_directory().await, PathBuf::from("/var/lib/warden"));

        let engine = config.moderation.build_engine().unwrap();
        assert_eq!(engine.patterns().len(), 2);
        assert_eq!(engine.policy().duration(), Duration::from_secs(600));
        assert!(engine.patterns().find_match("http://example.com").is_none());
        let rule = engine.patterns().find_match("this is forbidden").unwrap();
        assert_eq!(rule.category, RuleCategory::Policy);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let validator = ConfigValidator::new();
        assert!(validator.validate_bot_config(&BotConfiguration::default()).is_ok());

        let mut config = BotConfiguration::default();
        config.core.command_prefix = " ".to_string();
        assert!(validator.validate_bot_config(&config).is_err());

        let mut config = BotConfiguration::default();
        config.core.log_level = "loud".to_string();
        assert!(config.core.log_level_filter().is_err());
        assert!(validator.validate_bot_config(&config).is_err());

        config.core.log_level = "DEBUG".to_string();
        assert_eq!(config.core.log_level_filter().unwrap(), log::LevelFilter::Debug);

        let mut config = BotConfiguration::default();
        config.moderation.rate_limit_window_ms = 0;
        assert!(validator.validate_bot_config(&config).is_err());

        let mut config = BotConfiguration::default();
        config.moderation.suspension_minutes = 0;
        assert!(validator.validate_bot_config(&config).is_err());

        let mut config = BotConfiguration::default();
        config.moderation.suspension_minutes = 28 * 24 * 60;
        assert!(validator.validate_bot_config(&config).is_ok());
        config.moderation.suspension_minutes += 1;
        assert!(validator.validate_bot_config(&config).is_err());

        let mut config = BotConfiguration::default();
        config.moderation.max_content_length = 0;
        assert!(validator.validate_bot_config(&config).is_err());

        let mut config = BotConfiguration::default();
        config.moderation.rules = Some(Vec::new());
        assert!(validator.validate_bot_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_invalid_rule_fails_startup() {
        let temp_dir = tempdir().unwrap();
        let mut config = BotConfiguration::default();
        config.moderation.rules = Some(vec![RuleDefinition {
            id: "broken".to_string(),
            category: RuleCategory::Spam,
            matcher: crate::bot::pattern_matching::MatcherDefinition::Regex {
                pattern: "(unclosed".to_string(),
                case_insensitive: false,
            },
        }]);
        fs::write(temp_dir.path().join("bot.yaml"), serde_yaml::to_string(&config).unwrap())
            .await
            .unwrap();

        let config_manager = ConfigurationManager::new(temp_dir.path());
        let err = config_manager.initialize().await.unwrap_err();
        assert!(format!("{:#}", err).contains("broken"));
    }

    #[test]
    fn test_banned_phrases_extend_defaults() {
        let mut moderation = ModerationSettings::default();
        let builtin = moderation.rule_definitions().len();

        moderation.banned_phrases = vec!["free nitro".to_string()];
        assert_eq!(moderation.rule_definitions().len(), builtin + 1);
        assert!(moderation.pattern_set().unwrap().find_match("get FREE NITRO today").is_some());
    }
}
