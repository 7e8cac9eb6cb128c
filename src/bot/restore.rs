// src/bot/restore.rs - Reconcile a saved snapshot against live guild state

use log::{error, info, warn};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::bot::backup::{
    ChannelRecord, GuildSnapshot, RoleRecord, SnapshotError, SnapshotStore,
};
use crate::platforms::{ActionError, ActionExecutor};
use crate::types::{GuildId, GuildState, Role, RoleId};

/// A change the executor must make for live state to match a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationAction {
    RenameGuild { guild_id: GuildId, name: String },
    CreateRole { guild_id: GuildId, role: RoleRecord },
    UpdateRole { guild_id: GuildId, role_id: RoleId, role: RoleRecord },
    CreateChannel { guild_id: GuildId, channel: ChannelRecord },
}

impl ReconciliationAction {
    pub fn entity(&self) -> EntityRef {
        match self {
            ReconciliationAction::RenameGuild { name, .. } => EntityRef::Guild(name.clone()),
            ReconciliationAction::CreateRole { role, .. }
            | ReconciliationAction::UpdateRole { role, .. } => {
                EntityRef::Role(role.id, role.name.clone())
            }
            ReconciliationAction::CreateChannel { channel, .. } => {
                EntityRef::Channel(channel.name.clone())
            }
        }
    }
}

impl fmt::Display for ReconciliationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationAction::RenameGuild { name, .. } => {
                write!(f, "rename guild to '{}'", name)
            }
            ReconciliationAction::CreateRole { role, .. } => {
                write!(f, "create role '{}'", role.name)
            }
            ReconciliationAction::UpdateRole { role, role_id, .. } => {
                write!(f, "update role {} to '{}'", role_id, role.name)
            }
            ReconciliationAction::CreateChannel { channel, .. } => {
                write!(f, "create {} channel '{}'", channel.kind, channel.name)
            }
        }
    }
}

/// Entity touched (or deliberately left alone) by a restore. Roles carry their
/// snapshot id since role names need not be unique.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityRef {
    Guild(String),
    Role(RoleId, String),
    Channel(String),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Guild(name) => write!(f, "guild '{}'", name),
            EntityRef::Role(_, name) => write!(f, "role '{}'", name),
            EntityRef::Channel(name) => write!(f, "channel '{}'", name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub created: BTreeSet<EntityRef>,
    pub updated: BTreeSet<EntityRef>,
    /// Managed roles and entities that already match
    pub skipped: BTreeSet<EntityRef>,
}

impl RestoreOutcome {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty()
    }
}

/// Ordered actions plus the outcome they imply, computed in full before anything
/// runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestorePlan {
    pub guild_id: GuildId,
    pub actions: Vec<ReconciliationAction>,
    pub outcome: RestoreOutcome,
}

impl RestorePlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Result of running a plan; failed actions do not stop the remaining ones
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub applied: usize,
    pub failures: Vec<(ReconciliationAction, ActionError)>,
}

pub struct Restorer;

impl Restorer {
    /// Compute the plan that brings `current` in line with `snapshot`.
    ///
    /// Guild name is renamed when it differs. Roles are matched by id first, then
    /// remaining ones by name against live roles no other record has claimed;
    /// missing ones are created and differing ones updated, except managed roles
    /// which are always skipped. Channels are matched by name and only ever
    /// created, so channels added after the backup survive a restore.
    pub fn apply(snapshot: &GuildSnapshot, current: &GuildState) -> RestorePlan {
        let guild_id = current.id;
        let mut plan = RestorePlan {
            guild_id,
            ..RestorePlan::default()
        };

        if snapshot.name != current.name {
            plan.push(
                ReconciliationAction::RenameGuild { guild_id, name: snapshot.name.clone() },
                Change::Updated,
            );
        } else {
            plan.outcome.skipped.insert(EntityRef::Guild(snapshot.name.clone()));
        }

        let matches = Self::match_roles(&snapshot.roles, current);
        for (record, matched) in snapshot.roles.iter().zip(matches) {
            let entity = EntityRef::Role(record.id, record.name.clone());
            if record.managed {
                plan.outcome.skipped.insert(entity);
                continue;
            }

            match matched {
                Some(live) if live.managed => {
                    warn!("Role '{}' is now integration-managed, leaving it alone", live.name);
                    plan.outcome.skipped.insert(entity);
                }
                Some(live)
                    if live.name == record.name && live.permissions == record.permissions =>
                {
                    plan.outcome.skipped.insert(entity);
                }
                Some(live) => {
                    plan.push(
                        ReconciliationAction::UpdateRole {
                            guild_id,
                            role_id: live.id,
                            role: record.clone(),
                        },
                        Change::Updated,
                    );
                }
                // The default role shares the guild id and cannot be created
                None if record.id == snapshot.guild_id => {
                    plan.outcome.skipped.insert(entity);
                }
                None => {
                    plan.push(
                        ReconciliationAction::CreateRole { guild_id, role: record.clone() },
                        Change::Created,
                    );
                }
            }
        }

        for record in &snapshot.channels {
            if current.has_channel_named(&record.name) {
                plan.outcome.skipped.insert(EntityRef::Channel(record.name.clone()));
            } else {
                plan.push(
                    ReconciliationAction::CreateChannel { guild_id, channel: record.clone() },
                    Change::Created,
                );
            }
        }

        plan
    }

    /// Load the snapshot for `guild_id` from `store` and plan against `current`. A
    /// missing or unreadable record aborts the whole restore.
    pub async fn restore_from_store(
        store: &dyn SnapshotStore,
        guild_id: GuildId,
        current: &GuildState,
    ) -> Result<RestorePlan, SnapshotError> {
        let snapshot = store.load(guild_id).await?;
        let plan = Self::apply(&snapshot, current);

        info!(
            "Planned restore of guild {}: {} actions ({} created, {} updated, {} skipped)",
            guild_id,
            plan.actions.len(),
            plan.outcome.created.len(),
            plan.outcome.updated.len(),
            plan.outcome.skipped.len()
        );
        Ok(plan)
    }

    /// Run every action of `plan` in order, once each
    pub async fn execute(plan: &RestorePlan, executor: &dyn ActionExecutor) -> RestoreReport {
        let mut report = RestoreReport::default();

        for action in &plan.actions {
            let result = match action {
                ReconciliationAction::RenameGuild { guild_id, name } => {
                    executor.rename_guild(*guild_id, name).await
                }
                ReconciliationAction::CreateRole { guild_id, role } => {
                    executor.create_role(*guild_id, role).await
                }
                ReconciliationAction::UpdateRole { guild_id, role_id, role } => {
                    executor.update_role(*guild_id, *role_id, role).await
                }
                ReconciliationAction::CreateChannel { guild_id, channel } => {
                    executor.create_channel(*guild_id, channel).await
                }
            };

            match result {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    error!("Restore of guild {} could not {}: {}", plan.guild_id, action, e);
                    report.failures.push((action.clone(), e));
                }
            }
        }

        info!(
            "Restore of guild {} finished: {} applied, {} failed",
            plan.guild_id,
            report.applied,
            report.failures.len()
        );
        report
    }

    /// Pair each snapshot role with at most one live role, and each live role with
    /// at most one record. Id matches are claimed first so a renamed role cannot be
    /// taken by a name match meant for another record.
    fn match_roles<'a>(records: &[RoleRecord], current: &'a GuildState) -> Vec<Option<&'a Role>> {
        let mut claimed: HashSet<RoleId> = HashSet::new();
        let mut matches: Vec<Option<&'a Role>> = records
            .iter()
            .map(|record| {
                let live = current.role_by_id(record.id)?;
                claimed.insert(live.id).then_some(live)
            })
            .collect();

        for (record, slot) in records.iter().zip(matches.iter_mut()) {
            if slot.is_some() || record.managed {
                continue;
            }
            *slot = current
                .roles
                .iter()
                .find(|live| live.name == record.name && !claimed.contains(&live.id));
            if let Some(live) = slot {
                claimed.insert(live.id);
            }
        }

        matches
    }
}

enum Change {
    Created,
    Updated,
}

impl RestorePlan {
    fn push(&mut self, action: ReconciliationAction, change: Change) {
        let entity = action.entity();
        match change {
            Change::Created => self.outcome.created.insert(entity),
            Change::Updated => self.outcome.updated.insert(entity),
        };
        self.actions.push(action);
    }
}
