// Storage port and error taxonomy for the moderation engine.
//
// Only the ledger, the orchestrator and the configuration service write through
// this trait. Everything else reads.

use super::authorization::{AuthorizationGroup, NewAuthorizationGroup};
use super::moderation_models::{
    CategoryFilter, CategoryId, GroupId, ModerationCategory, ModerationRules, NewReprimand,
    NewTemporaryRole, Reprimand, ReprimandId, ReprimandKind, ReprimandStatus, TemporaryRole,
    TemporaryRoleId, TriggerId,
};
use super::triggers::{NewTrigger, Trigger};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Input the engine refuses before touching storage or the platform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("an authorization group needs at least one criterion")]
    EmptyCriteria,

    #[error("an authorization group needs a scope")]
    EmptyScope,

    #[error("ban delete days must be between 0 and 7, got {0}")]
    DeleteDaysOutOfRange(u32),

    #[error("lengths must be positive")]
    NonPositiveLength,

    #[error("lengths cannot exceed {0} days")]
    LengthTooLong(i64),

    #[error("a warning must count at least once")]
    ZeroWarningCount,

    #[error("a role reprimand needs at least one role")]
    NoRoleTemplates,

    #[error("no mute role is configured for this guild or category")]
    MuteRoleNotConfigured,

    #[error("trigger amount must be greater than zero")]
    ZeroTriggerAmount,

    #[error("triggers cannot issue {0} reprimands")]
    UnsupportedTriggerAction(ReprimandKind),

    #[error("category name `{0}` is reserved")]
    ReservedCategoryName(String),

    #[error("a category named `{0}` already exists")]
    DuplicateCategoryName(String),

    #[error("category names cannot be empty")]
    EmptyCategoryName,
}

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Cannot move a reprimand from {from} to {to}")]
    InvalidTransition {
        from: ReprimandStatus,
        to: ReprimandStatus,
    },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Platform error: {0}")]
    PlatformError(#[from] super::platform::PlatformError),
}

impl ModerationError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        ModerationError::NotFound { entity, id }
    }
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Persistence for guild rules, categories, authorization groups, triggers,
/// reprimands and temporary roles.
///
/// Lookups by id are always scoped to a guild so ids from another guild read as missing.
#[async_trait]
pub trait ModerationStore: Send + Sync {
    // ---- guild rules ----

    /// Guild rules, or defaults when the guild has never been configured.
    async fn get_rules(&self, guild_id: u64) -> Result<ModerationRules, ModerationError>;

    async fn save_rules(&self, rules: &ModerationRules) -> Result<(), ModerationError>;

    // ---- categories ----

    async fn get_category(
        &self,
        guild_id: u64,
        id: CategoryId,
    ) -> Result<Option<ModerationCategory>, ModerationError>;

    /// Case-insensitive lookup.
    async fn find_category(
        &self,
        guild_id: u64,
        name: &str,
    ) -> Result<Option<ModerationCategory>, ModerationError>;

    async fn list_categories(&self, guild_id: u64)
        -> Result<Vec<ModerationCategory>, ModerationError>;

    async fn insert_category(
        &self,
        guild_id: u64,
        name: &str,
        moderator_id: u64,
    ) -> Result<ModerationCategory, ModerationError>;

    async fn update_category(&self, category: &ModerationCategory) -> Result<(), ModerationError>;

    /// Deletes the category and its groups. Reprimands and triggers fall back to global.
    async fn delete_category(&self, guild_id: u64, id: CategoryId)
        -> Result<bool, ModerationError>;

    // ---- authorization groups ----

    async fn list_groups(&self, guild_id: u64) -> Result<Vec<AuthorizationGroup>, ModerationError>;

    async fn insert_group(
        &self,
        group: NewAuthorizationGroup,
    ) -> Result<AuthorizationGroup, ModerationError>;

    async fn delete_group(&self, guild_id: u64, id: GroupId) -> Result<bool, ModerationError>;

    // ---- triggers ----

    async fn list_triggers(&self, guild_id: u64) -> Result<Vec<Trigger>, ModerationError>;

    async fn get_trigger(
        &self,
        guild_id: u64,
        id: TriggerId,
    ) -> Result<Option<Trigger>, ModerationError>;

    async fn insert_trigger(&self, trigger: NewTrigger) -> Result<Trigger, ModerationError>;

    async fn set_trigger_active(
        &self,
        guild_id: u64,
        id: TriggerId,
        active: bool,
        moderator_id: u64,
    ) -> Result<bool, ModerationError>;

    async fn delete_trigger(&self, guild_id: u64, id: TriggerId) -> Result<bool, ModerationError>;

    /// Number of reprimands that reference the trigger.
    async fn trigger_usage(&self, guild_id: u64, id: TriggerId) -> Result<u64, ModerationError>;

    /// When the trigger last issued a reprimand against this user.
    async fn last_triggered_at(
        &self,
        guild_id: u64,
        user_id: u64,
        id: TriggerId,
    ) -> Result<Option<DateTime<Utc>>, ModerationError>;

    // ---- reprimands ----

    async fn insert_reprimand(&self, reprimand: NewReprimand)
        -> Result<Reprimand, ModerationError>;

    async fn get_reprimand(
        &self,
        guild_id: u64,
        id: ReprimandId,
    ) -> Result<Option<Reprimand>, ModerationError>;

    /// Writes back status, reason, expiry and modification fields.
    async fn update_reprimand(&self, reprimand: &Reprimand) -> Result<(), ModerationError>;

    async fn delete_reprimand(&self, guild_id: u64, id: ReprimandId)
        -> Result<bool, ModerationError>;

    /// Every reprimand of a user, newest first.
    async fn list_reprimands(
        &self,
        guild_id: u64,
        user_id: u64,
        category: CategoryFilter,
    ) -> Result<Vec<Reprimand>, ModerationError>;

    /// Weighted count of non-pardoned reprimands of the given kinds.
    async fn count_reprimands(
        &self,
        guild_id: u64,
        user_id: u64,
        kinds: &[ReprimandKind],
        category: CategoryFilter,
    ) -> Result<u64, ModerationError>;

    /// The newest `Added` reprimand of a kind.
    async fn find_active(
        &self,
        guild_id: u64,
        user_id: u64,
        kind: ReprimandKind,
        category: CategoryFilter,
    ) -> Result<Option<Reprimand>, ModerationError>;

    /// `Added` reprimands with an expiry, optionally only those due by `until`.
    async fn list_expiring_reprimands(
        &self,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Reprimand>, ModerationError>;

    // ---- temporary roles ----

    async fn insert_temporary_role(
        &self,
        role: NewTemporaryRole,
    ) -> Result<TemporaryRole, ModerationError>;

    async fn get_temporary_role(
        &self,
        id: TemporaryRoleId,
    ) -> Result<Option<TemporaryRole>, ModerationError>;

    async fn list_expiring_temporary_roles(
        &self,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<TemporaryRole>, ModerationError>;

    /// Marks the temporary role as ended. Returns false when it had already ended.
    async fn end_temporary_role(
        &self,
        id: TemporaryRoleId,
        ended_at: DateTime<Utc>,
    ) -> Result<bool, ModerationError>;
}
