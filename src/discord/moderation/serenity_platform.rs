// Serenity implementation of the moderation platform and audit trail ports.

use crate::core::moderation::{
    AuditAction, AuditEntry, AuditTrail, ModerationPlatform, PlatformError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use ::serenity::model::guild::audit_log::{Action, MemberAction};
use std::sync::Arc;

pub struct SerenityPlatform {
    http: Arc<serenity::Http>,
}

impl SerenityPlatform {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }

    fn http(&self) -> &serenity::Http {
        &self.http
    }
}

/// Maps HTTP failures onto the port's error kinds.
fn platform_error(action: &str, e: serenity::Error) -> PlatformError {
    if let serenity::Error::Http(http_error) = &e {
        match http_error.status_code().map(|status| status.as_u16()) {
            Some(403) => return PlatformError::MissingPermissions(action.to_string()),
            Some(404) => return PlatformError::NotFound(action.to_string()),
            _ => {}
        }
    }
    PlatformError::Request(format!("{}: {}", action, e))
}

pub fn to_utc(timestamp: serenity::Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp.unix_timestamp(), 0).unwrap_or_else(Utc::now)
}

fn audit_action(action: AuditAction) -> Action {
    match action {
        AuditAction::BanAdd => Action::Member(MemberAction::BanAdd),
        AuditAction::BanRemove => Action::Member(MemberAction::BanRemove),
        AuditAction::Kick => Action::Member(MemberAction::Kick),
        AuditAction::MemberUpdate => Action::Member(MemberAction::Update),
    }
}

#[async_trait]
impl ModerationPlatform for SerenityPlatform {
    async fn ban(
        &self,
        guild_id: u64,
        user_id: u64,
        delete_days: u32,
        reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        let guild = serenity::GuildId::new(guild_id);
        let user = serenity::UserId::new(user_id);
        let delete_days = delete_days.min(7) as u8;

        match reason {
            Some(reason) => guild.ban_with_reason(self.http(), user, delete_days, reason).await,
            None => guild.ban(self.http(), user, delete_days).await,
        }
        .map_err(|e| platform_error("ban members", e))
    }

    async fn unban(&self, guild_id: u64, user_id: u64) -> Result<(), PlatformError> {
        serenity::GuildId::new(guild_id)
            .unban(self.http(), serenity::UserId::new(user_id))
            .await
            .map_err(|e| platform_error("unban members", e))
    }

    async fn kick(
        &self,
        guild_id: u64,
        user_id: u64,
        reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        let guild = serenity::GuildId::new(guild_id);
        let user = serenity::UserId::new(user_id);

        match reason {
            Some(reason) => guild.kick_with_reason(self.http(), user, reason).await,
            None => guild.kick(self.http(), user).await,
        }
        .map_err(|e| platform_error("kick members", e))
    }

    async fn add_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> Result<(), PlatformError> {
        self.http()
            .add_member_role(
                serenity::GuildId::new(guild_id),
                serenity::UserId::new(user_id),
                serenity::RoleId::new(role_id),
                None,
            )
            .await
            .map_err(|e| platform_error("add roles", e))
    }

    async fn remove_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> Result<(), PlatformError> {
        self.http()
            .remove_member_role(
                serenity::GuildId::new(guild_id),
                serenity::UserId::new(user_id),
                serenity::RoleId::new(role_id),
                None,
            )
            .await
            .map_err(|e| platform_error("remove roles", e))
    }

    async fn member_roles(&self, guild_id: u64, user_id: u64) -> Result<Vec<u64>, PlatformError> {
        let member = self
            .http()
            .get_member(serenity::GuildId::new(guild_id), serenity::UserId::new(user_id))
            .await
            .map_err(|e| platform_error("read members", e))?;
        Ok(member.roles.iter().map(|role| role.get()).collect())
    }

    async fn set_timeout(
        &self,
        guild_id: u64,
        user_id: u64,
        until: DateTime<Utc>,
    ) -> Result<(), PlatformError> {
        let until = serenity::Timestamp::from_unix_timestamp(until.timestamp())
            .map_err(|e| PlatformError::Request(format!("invalid timeout timestamp: {}", e)))?;

        serenity::GuildId::new(guild_id)
            .edit_member(
                self.http(),
                serenity::UserId::new(user_id),
                serenity::EditMember::new().disable_communication_until_datetime(until),
            )
            .await
            .map(|_| ())
            .map_err(|e| platform_error("time out members", e))
    }

    async fn clear_timeout(&self, guild_id: u64, user_id: u64) -> Result<(), PlatformError> {
        serenity::GuildId::new(guild_id)
            .edit_member(
                self.http(),
                serenity::UserId::new(user_id),
                serenity::EditMember::new().enable_communication(),
            )
            .await
            .map(|_| ())
            .map_err(|e| platform_error("time out members", e))
    }

    async fn delete_role(&self, guild_id: u64, role_id: u64) -> Result<(), PlatformError> {
        serenity::GuildId::new(guild_id)
            .delete_role(self.http(), serenity::RoleId::new(role_id))
            .await
            .map_err(|e| platform_error("delete roles", e))
    }
}

#[async_trait]
impl AuditTrail for SerenityPlatform {
    async fn recent_entries(
        &self,
        guild_id: u64,
        action: AuditAction,
        limit: u8,
    ) -> Result<Vec<AuditEntry>, PlatformError> {
        let logs = serenity::GuildId::new(guild_id)
            .audit_logs(
                self.http(),
                Some(audit_action(action)),
                None,
                None,
                Some(limit),
            )
            .await
            .map_err(|e| platform_error("view audit log", e))?;

        let mut entries: Vec<AuditEntry> = logs
            .entries
            .into_iter()
            .map(|entry| AuditEntry {
                action,
                target_id: entry.target_id.map(|id| id.get()),
                responsible_id: entry.user_id.get(),
                reason: entry.reason,
                created_at: to_utc(entry.id.created_at()),
            })
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }
}
