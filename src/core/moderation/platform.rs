// Ports to the chat platform: applying moderation effects and reading the audit trail.
//
// The Discord layer implements these on top of serenity's HTTP client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("missing permissions to {0}")]
    MissingPermissions(String),

    #[error("target not found: {0}")]
    NotFound(String),

    #[error("platform request failed: {0}")]
    Request(String),
}

/// Moderation effects on the platform. Every call is idempotent from the engine's
/// point of view: removing a role the member does not have is not an error.
#[async_trait]
pub trait ModerationPlatform: Send + Sync {
    async fn ban(
        &self,
        guild_id: u64,
        user_id: u64,
        delete_days: u32,
        reason: Option<&str>,
    ) -> Result<(), PlatformError>;

    async fn unban(&self, guild_id: u64, user_id: u64) -> Result<(), PlatformError>;

    async fn kick(&self, guild_id: u64, user_id: u64, reason: Option<&str>)
        -> Result<(), PlatformError>;

    async fn add_role(&self, guild_id: u64, user_id: u64, role_id: u64)
        -> Result<(), PlatformError>;

    async fn remove_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> Result<(), PlatformError>;

    async fn member_roles(&self, guild_id: u64, user_id: u64) -> Result<Vec<u64>, PlatformError>;

    async fn set_timeout(
        &self,
        guild_id: u64,
        user_id: u64,
        until: DateTime<Utc>,
    ) -> Result<(), PlatformError>;

    async fn clear_timeout(&self, guild_id: u64, user_id: u64) -> Result<(), PlatformError>;

    async fn delete_role(&self, guild_id: u64, role_id: u64) -> Result<(), PlatformError>;
}

/// Audit log action types the reconciliation listener cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    BanAdd,
    BanRemove,
    Kick,
    MemberUpdate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub target_id: Option<u64>,
    pub responsible_id: u64,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuditTrail: Send + Sync {
    /// Most recent entries of one action type, newest first.
    async fn recent_entries(
        &self,
        guild_id: u64,
        action: AuditAction,
        limit: u8,
    ) -> Result<Vec<AuditEntry>, PlatformError>;
}
