use std::time::Duration;

/// Default suspension length
pub const DEFAULT_SUSPENSION: Duration = Duration::from_secs(3 * 60);

/// Longest timeout the platform accepts
pub const MAX_SUSPENSION: Duration = Duration::from_secs(28 * 24 * 60 * 60);

pub const INSUFFICIENT_AUTHORITY_NOTICE: &str =
    "I cannot timeout this user because my role is lower.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Authorized(Duration),
    InsufficientAuthority,
}

/// Decides whether the bot may suspend an author, and for how long.
///
/// A timeout is only authorized against members whose top role is strictly below the
/// enforcer's.
#[derive(Debug, Clone, Copy)]
pub struct SuspensionPolicy {
    duration: Duration,
}

impl SuspensionPolicy {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration: duration.min(MAX_SUSPENSION),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn authorize(&self, author_rank: i64, enforcer_rank: i64) -> Authorization {
        if enforcer_rank > author_rank {
            Authorization::Authorized(self.duration)
        } else {
            Authorization::InsufficientAuthority
        }
    }

    /// Confirmation posted once a suspension went through
    pub fn confirmation_notice(&self, author_id: u64) -> String {
        format!("<@{}> has been timed out for {}.", author_id, describe_duration(self.duration))
    }
}

impl Default for SuspensionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SUSPENSION)
    }
}

fn describe_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (value, unit) = if secs % 86_400 == 0 && secs >= 86_400 {
        (secs / 86_400, "day")
    } else if secs % 3600 == 0 && secs >= 3600 {
        (secs / 3600, "hour")
    } else if secs % 60 == 0 && secs >= 60 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };

    if value == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", value, unit)
    }
}
