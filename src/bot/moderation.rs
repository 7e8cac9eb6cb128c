// src/bot/moderation.rs - Per-message moderation decisions

use chrono::{DateTime, Utc};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::bot::pattern_matching::{PatternSet, RuleCategory};
use crate::bot::rate_limiter::RateLimiter;
use crate::bot::suspension::{Authorization, SuspensionPolicy, INSUFFICIENT_AUTHORITY_NOTICE};
use crate::types::{EnforcementAction, EnforcementIntent, MessageEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    SelfAuthored,
    DirectMessage,
    Disabled,
    Clean,
}

/// What happened to the suspension half of an enforcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspensionOutcome {
    Requested(Duration),
    RateLimited,
    InsufficientAuthority,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Ignored(IgnoreReason),
    Enforced {
        rule_id: String,
        category: RuleCategory,
        suspension: SuspensionOutcome,
        intents: Vec<EnforcementIntent>,
    },
}

impl Decision {
    pub fn intents(&self) -> &[EnforcementIntent] {
        match self {
            Decision::Ignored(_) => &[],
            Decision::Enforced { intents, .. } => intents,
        }
    }

    pub fn is_enforced(&self) -> bool {
        matches!(self, Decision::Enforced { .. })
    }
}

/// Classifies messages and turns matches into enforcement intents.
///
/// Content removal always follows a match. Suspension goes through the shared rate
/// limiter first, so a raid produces at most one timeout per cooldown window while every
/// offending message is still removed. The engine itself keeps no per-call state, so
/// `handle` may run concurrently for different messages.
pub struct ModerationEngine {
    patterns: PatternSet,
    limiter: Arc<RateLimiter>,
    policy: SuspensionPolicy,
    enabled: AtomicBool,
}

impl ModerationEngine {
    pub fn new(patterns: PatternSet, limiter: Arc<RateLimiter>, policy: SuspensionPolicy) -> Self {
        Self {
            patterns,
            limiter,
            policy,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        info!("Moderation {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    pub fn policy(&self) -> &SuspensionPolicy {
        &self.policy
    }

    pub fn handle(&self, message: &MessageEvent) -> Decision {
        self.handle_at(message, Utc::now())
    }

    /// Same as [`handle`](Self::handle) with an explicit wall-clock time for `suspend until`
    pub fn handle_at(&self, message: &MessageEvent, now: DateTime<Utc>) -> Decision {
        if message.is_self_authored() {
            return Decision::Ignored(IgnoreReason::SelfAuthored);
        }

        let message_ref = match message.message_ref() {
            Some(r) => r,
            None => return Decision::Ignored(IgnoreReason::DirectMessage),
        };

        if !self.is_enabled() {
            return Decision::Ignored(IgnoreReason::Disabled);
        }

        let rule = match self.patterns.find_match(&message.content) {
            Some(rule) => rule,
            None => return Decision::Ignored(IgnoreReason::Clean),
        };

        info!(
            "Message {} from {} in channel {} flagged by rule '{}' ({})",
            message.message_id, message.author_id, message.channel_id, rule.id, rule.category
        );

        let reason = format!("Matched {} rule '{}'", rule.category, rule.id);
        let mut intents = vec![EnforcementIntent {
            message: message_ref,
            action: EnforcementAction::Delete,
            reason: reason.clone(),
        }];

        let suspension = if !self.limiter.allow(self.limiter.key_for(message)) {
            debug!("Suspension of {} suppressed by cooldown", message.author_id);
            SuspensionOutcome::RateLimited
        } else {
            match self.policy.authorize(message.author_top_role_rank, message.bot_top_role_rank) {
                Authorization::Authorized(duration) => {
                    let until = now + chrono::Duration::seconds(duration.as_secs() as i64);
                    intents.push(EnforcementIntent {
                        message: message_ref,
                        action: EnforcementAction::Suspend { until },
                        reason: reason.clone(),
                    });
                    SuspensionOutcome::Requested(duration)
                }
                Authorization::InsufficientAuthority => {
                    info!(
                        "Cannot suspend {}: rank {} is not below enforcer rank {}",
                        message.author_id, message.author_top_role_rank, message.bot_top_role_rank
                    );
                    intents.push(EnforcementIntent {
                        message: message_ref,
                        action: EnforcementAction::Warn {
                            notice: INSUFFICIENT_AUTHORITY_NOTICE.to_string(),
                        },
                        reason,
                    });
                    SuspensionOutcome::InsufficientAuthority
                }
            }
        };

        Decision::Enforced {
            rule_id: rule.id.clone(),
            category: rule.category,
            suspension,
            intents,
        }
    }
}
