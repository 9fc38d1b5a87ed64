// Test doubles shared by the moderation tests: an in-memory store, a platform that
// records what it was asked to do, and an audit trail with scripted entries.

use super::authorization::{AuthorizationGroup, NewAuthorizationGroup};
use super::moderation_models::{
    CategoryFilter, CategoryId, GroupId, ModerationCategory, ModerationRules, NewReprimand,
    NewTemporaryRole, Reprimand, ReprimandId, ReprimandKind, ReprimandStatus, TemporaryRole,
    TemporaryRoleId, TriggerId,
};
use super::moderation_store::{ModerationError, ModerationStore};
use super::platform::{AuditAction, AuditEntry, AuditTrail, ModerationPlatform, PlatformError};
use super::triggers::{NewTrigger, Trigger};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// STORE
// ============================================================================

pub struct MockModerationStore {
    next_id: AtomicI64,
    rules: DashMap<u64, ModerationRules>,
    categories: DashMap<i64, ModerationCategory>,
    groups: DashMap<i64, AuthorizationGroup>,
    triggers: DashMap<i64, Trigger>,
    reprimands: DashMap<i64, Reprimand>,
    temporary_roles: DashMap<i64, TemporaryRole>,
}

impl MockModerationStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            rules: DashMap::new(),
            categories: DashMap::new(),
            groups: DashMap::new(),
            triggers: DashMap::new(),
            reprimands: DashMap::new(),
            temporary_roles: DashMap::new(),
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl ModerationStore for MockModerationStore {
    async fn get_rules(&self, guild_id: u64) -> Result<ModerationRules, ModerationError> {
        Ok(self
            .rules
            .get(&guild_id)
            .map(|r| r.clone())
            .unwrap_or_else(|| ModerationRules::new(guild_id)))
    }

    async fn save_rules(&self, rules: &ModerationRules) -> Result<(), ModerationError> {
        self.rules.insert(rules.guild_id, rules.clone());
        Ok(())
    }

    async fn get_category(
        &self,
        guild_id: u64,
        id: CategoryId,
    ) -> Result<Option<ModerationCategory>, ModerationError> {
        Ok(self
            .categories
            .get(&id.0)
            .filter(|c| c.guild_id == guild_id)
            .map(|c| c.clone()))
    }

    async fn find_category(
        &self,
        guild_id: u64,
        name: &str,
    ) -> Result<Option<ModerationCategory>, ModerationError> {
        Ok(self
            .categories
            .iter()
            .find(|c| c.guild_id == guild_id && c.name.eq_ignore_ascii_case(name))
            .map(|c| c.clone()))
    }

    async fn list_categories(
        &self,
        guild_id: u64,
    ) -> Result<Vec<ModerationCategory>, ModerationError> {
        Ok(self
            .categories
            .iter()
            .filter(|c| c.guild_id == guild_id)
            .map(|c| c.clone())
            .collect())
    }

    async fn insert_category(
        &self,
        guild_id: u64,
        name: &str,
        moderator_id: u64,
    ) -> Result<ModerationCategory, ModerationError> {
        let category = ModerationCategory {
            id: CategoryId(self.next_id()),
            guild_id,
            name: name.to_string(),
            mute_role_id: None,
            replace_mutes: None,
            notice_expiry: None,
            warning_expiry: None,
            censored_expiry: None,
            moderator_id,
            created_at: Utc::now(),
        };
        self.categories.insert(category.id.0, category.clone());
        Ok(category)
    }

    async fn update_category(&self, category: &ModerationCategory) -> Result<(), ModerationError> {
        self.categories.insert(category.id.0, category.clone());
        Ok(())
    }

    async fn delete_category(
        &self,
        guild_id: u64,
        id: CategoryId,
    ) -> Result<bool, ModerationError> {
        let removed = self
            .categories
            .remove_if(&id.0, |_, c| c.guild_id == guild_id)
            .is_some();
        if removed {
            self.groups.retain(|_, g| g.category_id != Some(id));
            for mut trigger in self.triggers.iter_mut() {
                if trigger.category_id == Some(id) {
                    trigger.category_id = None;
                }
            }
            for mut reprimand in self.reprimands.iter_mut() {
                if reprimand.category_id == Some(id) {
                    reprimand.category_id = None;
                }
            }
        }
        Ok(removed)
    }

    async fn list_groups(&self, guild_id: u64) -> Result<Vec<AuthorizationGroup>, ModerationError> {
        let mut groups: Vec<AuthorizationGroup> = self
            .groups
            .iter()
            .filter(|g| g.guild_id == guild_id)
            .map(|g| g.clone())
            .collect();
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }

    async fn insert_group(
        &self,
        group: NewAuthorizationGroup,
    ) -> Result<AuthorizationGroup, ModerationError> {
        let group = group.into_group(GroupId(self.next_id()));
        self.groups.insert(group.id.0, group.clone());
        Ok(group)
    }

    async fn delete_group(&self, guild_id: u64, id: GroupId) -> Result<bool, ModerationError> {
        Ok(self
            .groups
            .remove_if(&id.0, |_, g| g.guild_id == guild_id)
            .is_some())
    }

    async fn list_triggers(&self, guild_id: u64) -> Result<Vec<Trigger>, ModerationError> {
        let mut triggers: Vec<Trigger> = self
            .triggers
            .iter()
            .filter(|t| t.guild_id == guild_id)
            .map(|t| t.clone())
            .collect();
        triggers.sort_by_key(|t| t.id);
        Ok(triggers)
    }

    async fn get_trigger(
        &self,
        guild_id: u64,
        id: TriggerId,
    ) -> Result<Option<Trigger>, ModerationError> {
        Ok(self
            .triggers
            .get(&id.0)
            .filter(|t| t.guild_id == guild_id)
            .map(|t| t.clone()))
    }

    async fn insert_trigger(&self, trigger: NewTrigger) -> Result<Trigger, ModerationError> {
        let trigger = trigger.into_trigger(TriggerId(self.next_id()));
        self.triggers.insert(trigger.id.0, trigger.clone());
        Ok(trigger)
    }

    async fn set_trigger_active(
        &self,
        guild_id: u64,
        id: TriggerId,
        active: bool,
        moderator_id: u64,
    ) -> Result<bool, ModerationError> {
        match self.triggers.get_mut(&id.0) {
            Some(mut trigger) if trigger.guild_id == guild_id => {
                trigger.is_active = active;
                trigger.moderator_id = moderator_id;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_trigger(&self, guild_id: u64, id: TriggerId) -> Result<bool, ModerationError> {
        Ok(self
            .triggers
            .remove_if(&id.0, |_, t| t.guild_id == guild_id)
            .is_some())
    }

    async fn trigger_usage(&self, guild_id: u64, id: TriggerId) -> Result<u64, ModerationError> {
        Ok(self
            .reprimands
            .iter()
            .filter(|r| r.guild_id == guild_id && r.trigger_id == Some(id))
            .count() as u64)
    }

    async fn last_triggered_at(
        &self,
        guild_id: u64,
        user_id: u64,
        id: TriggerId,
    ) -> Result<Option<DateTime<Utc>>, ModerationError> {
        Ok(self
            .reprimands
            .iter()
            .filter(|r| r.guild_id == guild_id && r.user_id == user_id && r.trigger_id == Some(id))
            .map(|r| r.created_at)
            .max())
    }

    async fn insert_reprimand(
        &self,
        reprimand: NewReprimand,
    ) -> Result<Reprimand, ModerationError> {
        let reprimand = reprimand.into_reprimand(ReprimandId(self.next_id()));
        self.reprimands.insert(reprimand.id.0, reprimand.clone());
        Ok(reprimand)
    }

    async fn get_reprimand(
        &self,
        guild_id: u64,
        id: ReprimandId,
    ) -> Result<Option<Reprimand>, ModerationError> {
        Ok(self
            .reprimands
            .get(&id.0)
            .filter(|r| r.guild_id == guild_id)
            .map(|r| r.clone()))
    }

    async fn update_reprimand(&self, reprimand: &Reprimand) -> Result<(), ModerationError> {
        self.reprimands.insert(reprimand.id.0, reprimand.clone());
        Ok(())
    }

    async fn delete_reprimand(
        &self,
        guild_id: u64,
        id: ReprimandId,
    ) -> Result<bool, ModerationError> {
        Ok(self
            .reprimands
            .remove_if(&id.0, |_, r| r.guild_id == guild_id)
            .is_some())
    }

    async fn list_reprimands(
        &self,
        guild_id: u64,
        user_id: u64,
        category: CategoryFilter,
    ) -> Result<Vec<Reprimand>, ModerationError> {
        let mut reprimands: Vec<Reprimand> = self
            .reprimands
            .iter()
            .filter(|r| {
                r.guild_id == guild_id && r.user_id == user_id && category.matches(r.category_id)
            })
            .map(|r| r.clone())
            .collect();
        reprimands.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(reprimands)
    }

    async fn count_reprimands(
        &self,
        guild_id: u64,
        user_id: u64,
        kinds: &[ReprimandKind],
        category: CategoryFilter,
    ) -> Result<u64, ModerationError> {
        Ok(self
            .reprimands
            .iter()
            .filter(|r| {
                r.guild_id == guild_id
                    && r.user_id == user_id
                    && r.status != ReprimandStatus::Pardoned
                    && kinds.contains(&r.kind())
                    && category.matches(r.category_id)
            })
            .map(|r| r.action.weight())
            .sum())
    }

    async fn find_active(
        &self,
        guild_id: u64,
        user_id: u64,
        kind: ReprimandKind,
        category: CategoryFilter,
    ) -> Result<Option<Reprimand>, ModerationError> {
        Ok(self
            .reprimands
            .iter()
            .filter(|r| {
                r.guild_id == guild_id
                    && r.user_id == user_id
                    && r.kind() == kind
                    && r.is_active()
                    && category.matches(r.category_id)
            })
            .max_by_key(|r| r.id)
            .map(|r| r.clone()))
    }

    async fn list_expiring_reprimands(
        &self,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Reprimand>, ModerationError> {
        Ok(self
            .reprimands
            .iter()
            .filter(|r| match (r.expire_at, until) {
                (Some(expire_at), Some(until)) => r.is_active() && expire_at <= until,
                (Some(_), None) => r.is_active(),
                (None, _) => false,
            })
            .map(|r| r.clone())
            .collect())
    }

    async fn insert_temporary_role(
        &self,
        role: NewTemporaryRole,
    ) -> Result<TemporaryRole, ModerationError> {
        let role = role.into_temporary_role(TemporaryRoleId(self.next_id()));
        self.temporary_roles.insert(role.id.0, role.clone());
        Ok(role)
    }

    async fn get_temporary_role(
        &self,
        id: TemporaryRoleId,
    ) -> Result<Option<TemporaryRole>, ModerationError> {
        Ok(self.temporary_roles.get(&id.0).map(|r| r.clone()))
    }

    async fn list_expiring_temporary_roles(
        &self,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<TemporaryRole>, ModerationError> {
        Ok(self
            .temporary_roles
            .iter()
            .filter(|r| match (r.expire_at, until) {
                (Some(expire_at), Some(until)) => r.is_active() && expire_at <= until,
                (Some(_), None) => r.is_active(),
                (None, _) => false,
            })
            .map(|r| r.clone())
            .collect())
    }

    async fn end_temporary_role(
        &self,
        id: TemporaryRoleId,
        ended_at: DateTime<Utc>,
    ) -> Result<bool, ModerationError> {
        match self.temporary_roles.get_mut(&id.0) {
            Some(mut role) if role.is_active() => {
                role.ended_at = Some(ended_at);
                role.expire_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ============================================================================
// PLATFORM
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    Ban { user_id: u64, delete_days: u32 },
    Unban { user_id: u64 },
    Kick { user_id: u64 },
    AddRole { user_id: u64, role_id: u64 },
    RemoveRole { user_id: u64, role_id: u64 },
    SetTimeout { user_id: u64 },
    ClearTimeout { user_id: u64 },
    DeleteRole { role_id: u64 },
}

/// Records every call. Set `failing` to make every call fail.
pub struct RecordingPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    member_roles: DashMap<u64, Vec<u64>>,
    failing: AtomicBool,
    /// Role removals wait on this while a test holds it.
    removal_gate: Arc<tokio::sync::Mutex<()>>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            member_roles: DashMap::new(),
            failing: AtomicBool::new(false),
            removal_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Suspends every role removal until the returned guard is dropped.
    pub fn hold_role_removals(&self) -> tokio::sync::OwnedMutexGuard<()> {
        Arc::clone(&self.removal_gate)
            .try_lock_owned()
            .expect("role removals are already held")
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn give_roles(&self, user_id: u64, roles: Vec<u64>) {
        self.member_roles.insert(user_id, roles);
    }

    fn record(&self, call: PlatformCall) -> Result<(), PlatformError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PlatformError::MissingPermissions(format!("{:?}", call)));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl ModerationPlatform for RecordingPlatform {
    async fn ban(
        &self,
        _guild_id: u64,
        user_id: u64,
        delete_days: u32,
        _reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::Ban {
            user_id,
            delete_days,
        })
    }

    async fn unban(&self, _guild_id: u64, user_id: u64) -> Result<(), PlatformError> {
        self.record(PlatformCall::Unban { user_id })
    }

    async fn kick(
        &self,
        _guild_id: u64,
        user_id: u64,
        _reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::Kick { user_id })
    }

    async fn add_role(
        &self,
        _guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::AddRole { user_id, role_id })
    }

    async fn remove_role(
        &self,
        _guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> Result<(), PlatformError> {
        let _open = self.removal_gate.lock().await;
        self.record(PlatformCall::RemoveRole { user_id, role_id })
    }

    async fn member_roles(&self, _guild_id: u64, user_id: u64) -> Result<Vec<u64>, PlatformError> {
        Ok(self
            .member_roles
            .get(&user_id)
            .map(|r| r.clone())
            .unwrap_or_default())
    }

    async fn set_timeout(
        &self,
        _guild_id: u64,
        user_id: u64,
        _until: DateTime<Utc>,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::SetTimeout { user_id })
    }

    async fn clear_timeout(&self, _guild_id: u64, user_id: u64) -> Result<(), PlatformError> {
        self.record(PlatformCall::ClearTimeout { user_id })
    }

    async fn delete_role(&self, _guild_id: u64, role_id: u64) -> Result<(), PlatformError> {
        self.record(PlatformCall::DeleteRole { role_id })
    }
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

pub struct ScriptedAuditTrail {
    entries: Mutex<Vec<AuditEntry>>,
    forbidden: AtomicBool,
    lookups: AtomicUsize,
}

impl ScriptedAuditTrail {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            forbidden: AtomicBool::new(false),
            lookups: AtomicUsize::new(0),
        }
    }

    /// How many times the trail was read.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn push(&self, entry: AuditEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn set_forbidden(&self, forbidden: bool) {
        self.forbidden.store(forbidden, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditTrail for ScriptedAuditTrail {
    async fn recent_entries(
        &self,
        _guild_id: u64,
        action: AuditAction,
        limit: u8,
    ) -> Result<Vec<AuditEntry>, PlatformError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.forbidden.load(Ordering::SeqCst) {
            return Err(PlatformError::MissingPermissions("view audit log".to_string()));
        }
        let mut entries: Vec<AuditEntry> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit as usize);
        Ok(entries)
    }
}
