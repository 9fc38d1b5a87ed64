// Moderation configuration - guild rules, categories, authorization groups and triggers.
//
// Authorization for configuration changes is checked by the caller against
// `AuthorizationScope::CONFIGURATION`; this service only validates and persists.

use super::authorization::{
    AccessType, AuthorizationGroup, AuthorizationScope, Criterion, JudgeType,
    NewAuthorizationGroup, ADMINISTRATOR_PERMISSION,
};
use super::moderation_models::{
    check_length, CategoryFilter, CategoryId, GroupId, ModerationCategory, ModerationRules,
    TriggerId, RESERVED_CATEGORY_NAMES,
};
use super::moderation_store::{ModerationError, ModerationStore, ValidationError};
use super::triggers::{NewTrigger, Trigger};
use chrono::Duration;
use std::sync::Arc;

/// Reprimand kinds whose rows expire after a configured length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiringKind {
    Notice,
    Warning,
    Censored,
}

/// What happened to a trigger on removal.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerRemoval {
    Deleted(Trigger),
    /// Reprimands still reference it, so it was only switched off.
    Disabled(Trigger),
}

pub struct ModerationConfigService<S: ModerationStore> {
    store: Arc<S>,
}

impl<S: ModerationStore> ModerationConfigService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    // ------------------------------------------------------------------------
    // Guild rules
    // ------------------------------------------------------------------------

    pub async fn rules(&self, guild_id: u64) -> Result<ModerationRules, ModerationError> {
        self.store.get_rules(guild_id).await
    }

    async fn edit_rules<F>(&self, guild_id: u64, edit: F) -> Result<ModerationRules, ModerationError>
    where
        F: FnOnce(&mut ModerationRules),
    {
        let mut rules = self.store.get_rules(guild_id).await?;
        edit(&mut rules);
        self.store.save_rules(&rules).await?;
        tracing::info!(guild_id, "Moderation rules updated");
        Ok(rules)
    }

    pub async fn set_mute_role(
        &self,
        guild_id: u64,
        role_id: Option<u64>,
    ) -> Result<ModerationRules, ModerationError> {
        self.edit_rules(guild_id, |rules| rules.mute_role_id = role_id)
            .await
    }

    pub async fn set_replace_mutes(
        &self,
        guild_id: u64,
        replace: bool,
    ) -> Result<ModerationRules, ModerationError> {
        self.edit_rules(guild_id, |rules| rules.replace_mutes = replace)
            .await
    }

    pub async fn set_log_channel(
        &self,
        guild_id: u64,
        channel_id: Option<u64>,
    ) -> Result<ModerationRules, ModerationError> {
        self.edit_rules(guild_id, |rules| rules.log_channel_id = channel_id)
            .await
    }

    /// Sets how long notices, warnings or censor records stay active. `None` keeps them forever.
    pub async fn set_expiry(
        &self,
        guild_id: u64,
        kind: ExpiringKind,
        length: Option<Duration>,
    ) -> Result<ModerationRules, ModerationError> {
        check_optional_length(length)?;
        self.edit_rules(guild_id, |rules| {
            let slot = match kind {
                ExpiringKind::Notice => &mut rules.notice_expiry,
                ExpiringKind::Warning => &mut rules.warning_expiry,
                ExpiringKind::Censored => &mut rules.censored_expiry,
            };
            *slot = length;
        })
        .await
    }

    // ------------------------------------------------------------------------
    // Categories
    // ------------------------------------------------------------------------

    pub async fn categories(&self, guild_id: u64) -> Result<Vec<ModerationCategory>, ModerationError> {
        self.store.list_categories(guild_id).await
    }

    pub async fn create_category(
        &self,
        guild_id: u64,
        name: &str,
        moderator_id: u64,
    ) -> Result<ModerationCategory, ModerationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyCategoryName.into());
        }
        if RESERVED_CATEGORY_NAMES
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(name))
        {
            return Err(ValidationError::ReservedCategoryName(name.to_string()).into());
        }
        if self.store.find_category(guild_id, name).await?.is_some() {
            return Err(ValidationError::DuplicateCategoryName(name.to_string()).into());
        }

        let category = self
            .store
            .insert_category(guild_id, name, moderator_id)
            .await?;
        tracing::info!(
            guild_id,
            category_id = category.id.0,
            name = %category.name,
            "Moderation category created"
        );
        Ok(category)
    }

    /// Maps a user-supplied category name to a filter. `all` and `none` are reserved
    /// for "every category" and "uncategorised"; anything else must exist.
    pub async fn resolve_filter(
        &self,
        guild_id: u64,
        name: Option<&str>,
    ) -> Result<Option<CategoryFilter>, ModerationError> {
        let Some(name) = name.map(str::trim) else {
            return Ok(Some(CategoryFilter::All));
        };
        if name.eq_ignore_ascii_case("all") {
            return Ok(Some(CategoryFilter::All));
        }
        if name.eq_ignore_ascii_case("none") || name.eq_ignore_ascii_case("default") {
            return Ok(Some(CategoryFilter::None));
        }
        Ok(self
            .store
            .find_category(guild_id, name)
            .await?
            .map(|category| CategoryFilter::Only(category.id)))
    }

    pub async fn category(
        &self,
        guild_id: u64,
        id: CategoryId,
    ) -> Result<ModerationCategory, ModerationError> {
        self.store
            .get_category(guild_id, id)
            .await?
            .ok_or_else(|| ModerationError::not_found("Category", id.0))
    }

    /// Applies `edit` to a category's overrides and saves it.
    pub async fn edit_category<F>(
        &self,
        guild_id: u64,
        id: CategoryId,
        edit: F,
    ) -> Result<ModerationCategory, ModerationError>
    where
        F: FnOnce(&mut ModerationCategory),
    {
        let mut category = self.category(guild_id, id).await?;
        edit(&mut category);
        check_optional_length(category.notice_expiry)?;
        check_optional_length(category.warning_expiry)?;
        check_optional_length(category.censored_expiry)?;
        self.store.update_category(&category).await?;
        Ok(category)
    }

    /// Deletes a category with its groups. Its reprimands and triggers become global.
    pub async fn delete_category(
        &self,
        guild_id: u64,
        id: CategoryId,
    ) -> Result<ModerationCategory, ModerationError> {
        let category = self.category(guild_id, id).await?;
        self.store.delete_category(guild_id, id).await?;
        tracing::info!(guild_id, category_id = id.0, "Moderation category deleted");
        Ok(category)
    }

    async fn ensure_category(
        &self,
        guild_id: u64,
        id: Option<CategoryId>,
    ) -> Result<(), ModerationError> {
        match id {
            Some(id) => self.category(guild_id, id).await.map(|_| ()),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Authorization groups
    // ------------------------------------------------------------------------

    pub async fn groups(&self, guild_id: u64) -> Result<Vec<AuthorizationGroup>, ModerationError> {
        self.store.list_groups(guild_id).await
    }

    pub async fn add_group(
        &self,
        group: NewAuthorizationGroup,
    ) -> Result<AuthorizationGroup, ModerationError> {
        self.ensure_category(group.guild_id, group.category_id)
            .await?;
        let group = self.store.insert_group(group).await?;
        tracing::info!(
            guild_id = group.guild_id,
            group_id = group.id.0,
            scope = %group.scope,
            "Authorization group added"
        );
        Ok(group)
    }

    pub async fn remove_group(&self, guild_id: u64, id: GroupId) -> Result<(), ModerationError> {
        if !self.store.delete_group(guild_id, id).await? {
            return Err(ModerationError::not_found("Authorization group", id.0));
        }
        tracing::info!(guild_id, group_id = id.0, "Authorization group removed");
        Ok(())
    }

    /// A guild without any group gets one that lets administrators do everything.
    /// Returns the seeded group, if one was needed.
    pub async fn ensure_default_authorization(
        &self,
        guild_id: u64,
        moderator_id: u64,
    ) -> Result<Option<AuthorizationGroup>, ModerationError> {
        if !self.store.list_groups(guild_id).await?.is_empty() {
            return Ok(None);
        }

        let group = NewAuthorizationGroup::new(
            guild_id,
            AuthorizationScope::ALL,
            AccessType::Allow,
            JudgeType::Any,
            vec![Criterion::Permission(ADMINISTRATOR_PERMISSION)],
            moderator_id,
        )?;
        self.store.insert_group(group).await.map(Some)
    }

    // ------------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------------

    pub async fn triggers(&self, guild_id: u64) -> Result<Vec<Trigger>, ModerationError> {
        self.store.list_triggers(guild_id).await
    }

    pub async fn add_trigger(&self, trigger: NewTrigger) -> Result<Trigger, ModerationError> {
        let trigger = trigger.validated()?;
        self.ensure_category(trigger.guild_id, trigger.category_id)
            .await?;

        let trigger = self.store.insert_trigger(trigger).await?;
        tracing::info!(
            guild_id = trigger.guild_id,
            trigger_id = trigger.id.0,
            source = trigger.source.as_str(),
            amount = trigger.amount,
            mode = trigger.mode.as_str(),
            "Trigger added"
        );
        Ok(trigger)
    }

    pub async fn trigger(&self, guild_id: u64, id: TriggerId) -> Result<Trigger, ModerationError> {
        self.store
            .get_trigger(guild_id, id)
            .await?
            .ok_or_else(|| ModerationError::not_found("Trigger", id.0))
    }

    pub async fn set_trigger_active(
        &self,
        guild_id: u64,
        id: TriggerId,
        active: bool,
        moderator_id: u64,
    ) -> Result<Trigger, ModerationError> {
        if !self
            .store
            .set_trigger_active(guild_id, id, active, moderator_id)
            .await?
        {
            return Err(ModerationError::not_found("Trigger", id.0));
        }
        self.trigger(guild_id, id).await
    }

    /// Deletes an unused trigger. One that already issued reprimands is disabled instead
    /// so the history keeps pointing at it.
    pub async fn remove_trigger(
        &self,
        guild_id: u64,
        id: TriggerId,
        moderator_id: u64,
    ) -> Result<TriggerRemoval, ModerationError> {
        let trigger = self.trigger(guild_id, id).await?;

        if self.store.trigger_usage(guild_id, id).await? > 0 {
            let trigger = self
                .set_trigger_active(guild_id, id, false, moderator_id)
                .await?;
            return Ok(TriggerRemoval::Disabled(trigger));
        }

        self.store.delete_trigger(guild_id, id).await?;
        tracing::info!(guild_id, trigger_id = id.0, "Trigger deleted");
        Ok(TriggerRemoval::Deleted(trigger))
    }
}

fn check_optional_length(length: Option<Duration>) -> Result<(), ValidationError> {
    length.map(check_length).transpose().map(|_| ())
}
