use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::types::{ChannelId, GuildId, MessageEvent, UserId};

/// Table size above which stale keys are swept on the next insert
const PRUNE_THRESHOLD: usize = 1024;

/// Time source for the limiter
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock; clones share the same time
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<Instant>>,
}

impl MockClock {
    pub fn new(start: Instant) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current += by;
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// How enforcement cooldowns are partitioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterScope {
    Global,
    PerGuild,
    PerChannel,
    PerAuthor,
}

impl Default for LimiterScope {
    fn default() -> Self {
        LimiterScope::Global
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterKey {
    Global,
    Guild(GuildId),
    Channel(ChannelId),
    Author(GuildId, UserId),
}

impl LimiterScope {
    pub fn key_for(&self, message: &MessageEvent) -> LimiterKey {
        match self {
            LimiterScope::Global => LimiterKey::Global,
            LimiterScope::PerGuild => LimiterKey::Guild(message.guild_id.unwrap_or_default()),
            LimiterScope::PerChannel => LimiterKey::Channel(message.channel_id),
            LimiterScope::PerAuthor => {
                LimiterKey::Author(message.guild_id.unwrap_or_default(), message.author_id)
            }
        }
    }
}

/// Single-slot cooldown per key: at most one allowed action per `window`.
///
/// Suppressed attempts are dropped, not queued. The check and the update happen under
/// one lock so concurrent handlers cannot both slip through.
pub struct RateLimiter {
    window: Duration,
    scope: LimiterScope,
    last_action: Mutex<HashMap<LimiterKey, Instant>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(window: Duration, scope: LimiterScope) -> Self {
        Self::with_clock(window, scope, Arc::new(SystemClock))
    }

    pub fn with_clock(window: Duration, scope: LimiterScope, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            scope,
            last_action: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn scope(&self) -> LimiterScope {
        self.scope
    }

    /// Key for `message` under the configured scope
    pub fn key_for(&self, message: &MessageEvent) -> LimiterKey {
        self.scope.key_for(message)
    }

    /// Record an action for `key` and return true, unless one happened within the window
    pub fn allow(&self, key: LimiterKey) -> bool {
        let now = self.clock.now();
        let mut last_action = self.lock();

        if let Some(last) = last_action.get(&key) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.window {
                debug!("Cooldown active for {:?}: {:?} of {:?} elapsed", key, elapsed, self.window);
                return false;
            }
        }

        if last_action.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            last_action.retain(|_, last| now.saturating_duration_since(*last) < window);
        }

        last_action.insert(key, now);
        true
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<LimiterKey, Instant>> {
        // The map stays consistent even if a holder panicked mid-insert
        self.last_action.lock().unwrap_or_else(|e| e.into_inner())
    }
}
