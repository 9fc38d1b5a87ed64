// Moderation service - the entry point for issuing and managing reprimands.
//
// This service handles:
// - Authorizing the actor for the reprimand's scope
// - Applying the platform effect and recording the reprimand
// - Counting infractions and escalating through triggers (one hop at most)
// - Pardons, deletions, reason edits and the unban/unmute shortcuts
// - Temporary role grants
//
// NO Discord dependencies here - just pure domain logic over the store and platform ports.

use super::authorization::{ActorContext, AuthorizationScope, AuthorizationService};
use super::expiry::ExpiryScheduler;
use super::ledger::ReprimandLedger;
use super::moderation_models::{
    check_length, CategoryFilter, CategoryId, EffectiveRules, ModerationCategory, NewReprimand,
    NewTemporaryRole, Reprimand, ReprimandAction, ReprimandId, ReprimandKind, ReprimandSource,
    ReprimandStatus, TemporaryRole, TriggerId,
};
use super::moderation_store::{ModerationError, ModerationStore, ValidationError};
use super::platform::ModerationPlatform;
use super::platform_effects::{apply_effect, revert_effect};
use super::triggers::{candidate_triggers, select_firing_trigger, Trigger, TriggerSource};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// REQUESTS & OUTCOMES
// ============================================================================

/// Who is asking.
#[derive(Debug, Clone, PartialEq)]
pub enum Actor {
    /// A guild member, subject to the authorization rules.
    Member(ActorContext),
    /// The bot itself or a subsystem acting for it (censor, audit log). Always authorized.
    System { user_id: u64 },
}

impl Actor {
    pub fn user_id(&self) -> u64 {
        match self {
            Actor::Member(context) => context.user_id,
            Actor::System { user_id } => *user_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IssueRequest {
    pub guild_id: u64,
    pub user_id: u64,
    pub actor: Actor,
    pub action: ReprimandAction,
    pub category_id: Option<CategoryId>,
    pub reason: Option<String>,
    pub source: ReprimandSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// A mute or timeout is already running and the rules do not allow replacing it.
    AlreadyActive(Reprimand),
    /// A role reprimand whose templates would not change the member.
    NothingToChange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IssueOutcome {
    Issued(ReprimandResult),
    Denied,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReprimandResult {
    pub primary: Reprimand,
    pub escalation: Option<Escalation>,
}

impl ReprimandResult {
    pub fn secondary(&self) -> Option<&Reprimand> {
        match &self.escalation {
            Some(Escalation {
                outcome: EscalationOutcome::Issued(reprimand),
                ..
            }) => Some(reprimand),
            _ => None,
        }
    }
}

/// A trigger fired because of the primary reprimand.
#[derive(Debug, Clone, PartialEq)]
pub struct Escalation {
    pub trigger: Trigger,
    pub count: u64,
    pub outcome: EscalationOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EscalationOutcome {
    Issued(Reprimand),
    Denied,
    Skipped(SkipReason),
    /// The primary stands; the secondary could not be applied.
    Failed(String),
}

/// Result of an operation that needs authorization but is not an issue.
#[derive(Debug, Clone, PartialEq)]
pub enum Authorized<T> {
    Granted(T),
    Denied,
}

/// Reason recorded when a new mute or ban supersedes the running one.
const REPLACED_REASON: &str = "[Reprimand Replaced]";

/// Authorization scope needed to issue a reprimand kind.
pub fn scope_for(kind: ReprimandKind) -> AuthorizationScope {
    match kind {
        ReprimandKind::Note => AuthorizationScope::NOTE,
        ReprimandKind::Notice | ReprimandKind::Warning | ReprimandKind::Censored => {
            AuthorizationScope::WARNING
        }
        ReprimandKind::Kick => AuthorizationScope::KICK,
        ReprimandKind::Ban => AuthorizationScope::BAN,
        ReprimandKind::Mute => AuthorizationScope::MUTE,
        ReprimandKind::Timeout => AuthorizationScope::TIMEOUT,
        ReprimandKind::Role => AuthorizationScope::MANAGE_ROLES,
    }
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct ModerationService<S: ModerationStore + 'static, P: ModerationPlatform + 'static> {
    ledger: Arc<ReprimandLedger<S>>,
    authorization: AuthorizationService<S>,
    platform: Arc<P>,
    scheduler: Arc<ExpiryScheduler<S, P>>,
}

impl<S: ModerationStore + 'static, P: ModerationPlatform + 'static> ModerationService<S, P> {
    pub fn new(
        ledger: Arc<ReprimandLedger<S>>,
        platform: Arc<P>,
        scheduler: Arc<ExpiryScheduler<S, P>>,
    ) -> Self {
        let authorization = AuthorizationService::new(Arc::clone(ledger.store()));
        Self {
            ledger,
            authorization,
            platform,
            scheduler,
        }
    }

    pub fn ledger(&self) -> &Arc<ReprimandLedger<S>> {
        &self.ledger
    }

    fn store(&self) -> &Arc<S> {
        self.ledger.store()
    }

    /// Authorization check for front ends that gate reads or configuration.
    pub async fn authorize(
        &self,
        guild_id: u64,
        actor: &Actor,
        scope: AuthorizationScope,
        category: Option<CategoryId>,
    ) -> Result<bool, ModerationError> {
        match actor {
            Actor::System { .. } => Ok(true),
            Actor::Member(context) => {
                self.authorization
                    .is_authorized(guild_id, context, scope, category)
                    .await
            }
        }
    }

    /// Issues a reprimand and escalates through the guild's triggers.
    pub async fn issue(&self, request: IssueRequest) -> Result<IssueOutcome, ModerationError> {
        let _guard = self.ledger.lock_user(request.guild_id, request.user_id).await;
        self.issue_locked(request, true).await
    }

    /// Records a reprimand for an action that already happened on the platform, such as
    /// a native ban found in the audit log. No authorization and no platform effect, but
    /// it counts and escalates like any other reprimand.
    pub async fn record_external(
        &self,
        guild_id: u64,
        user_id: u64,
        moderator_id: u64,
        action: ReprimandAction,
        reason: Option<String>,
    ) -> Result<IssueOutcome, ModerationError> {
        let _guard = self.ledger.lock_user(guild_id, user_id).await;
        let request = IssueRequest {
            guild_id,
            user_id,
            actor: Actor::System {
                user_id: moderator_id,
            },
            action,
            category_id: None,
            reason,
            source: ReprimandSource::AuditLog,
        };
        self.issue_locked(request, false).await
    }

    async fn issue_locked(
        &self,
        request: IssueRequest,
        apply_platform_effect: bool,
    ) -> Result<IssueOutcome, ModerationError> {
        let actor = request.actor.clone();
        let primary = match self
            .apply(request, apply_platform_effect, None, None)
            .await?
        {
            IssueOutcome::Issued(result) => result.primary,
            other => return Ok(other),
        };

        let escalation = self.escalate(&primary, &actor).await?;
        Ok(IssueOutcome::Issued(ReprimandResult {
            primary,
            escalation,
        }))
    }

    /// Authorize, apply and record one reprimand. Never escalates.
    async fn apply(
        &self,
        request: IssueRequest,
        apply_platform_effect: bool,
        trigger_id: Option<TriggerId>,
        escalated_from: Option<&Reprimand>,
    ) -> Result<IssueOutcome, ModerationError> {
        let action = request.action.validated()?;
        let kind = action.kind();
        let guild_id = request.guild_id;

        if !self
            .authorize(guild_id, &request.actor, scope_for(kind), request.category_id)
            .await?
        {
            tracing::info!(
                guild_id,
                actor_id = request.actor.user_id(),
                target_id = request.user_id,
                kind = %kind,
                "Reprimand denied"
            );
            return Ok(IssueOutcome::Denied);
        }

        let category = self.category(guild_id, request.category_id).await?;
        let rules = self.store().get_rules(guild_id).await?;
        let effective = EffectiveRules::resolve(&rules, category.as_ref());

        if kind == ReprimandKind::Mute && effective.mute_role_id.is_none() {
            return Err(ValidationError::MuteRoleNotConfigured.into());
        }

        // Mutes and timeouts do not stack; bans replace the running one.
        let superseded = match kind {
            ReprimandKind::Mute | ReprimandKind::Timeout | ReprimandKind::Ban => {
                self.ledger
                    .get_active(guild_id, request.user_id, kind, CategoryFilter::All)
                    .await?
            }
            _ => None,
        };
        if let Some(active) = &superseded {
            if kind != ReprimandKind::Ban && !effective.replace_mutes {
                return Ok(IssueOutcome::Skipped(SkipReason::AlreadyActive(
                    active.clone(),
                )));
            }
        }

        let now = Utc::now();
        let length = effective.length_for(&action).map(check_length).transpose()?;
        let action = if apply_platform_effect {
            match apply_effect(
                self.platform.as_ref(),
                guild_id,
                request.user_id,
                action,
                effective.mute_role_id,
                request.reason.as_deref(),
                now,
            )
            .await?
            {
                Some(applied) => applied,
                None => return Ok(IssueOutcome::Skipped(SkipReason::NothingToChange)),
            }
        } else {
            action
        };

        if let Some(active) = superseded {
            self.ledger
                .transition(
                    active,
                    ReprimandStatus::Pardoned,
                    request.actor.user_id(),
                    Some(REPLACED_REASON.to_string()),
                )
                .await?;
        }

        let reprimand = self
            .ledger
            .record(
                NewReprimand {
                    guild_id,
                    user_id: request.user_id,
                    moderator_id: request.actor.user_id(),
                    reason: request.reason,
                    source: request.source,
                    category_id: request.category_id,
                    trigger_id,
                    action,
                    started_at: now,
                    length,
                },
                escalated_from,
            )
            .await?;

        self.scheduler.register_reprimand(&reprimand);

        Ok(IssueOutcome::Issued(ReprimandResult {
            primary: reprimand,
            escalation: None,
        }))
    }

    /// Counts the primary's infractions and issues the firing trigger's reprimand.
    async fn escalate(
        &self,
        primary: &Reprimand,
        actor: &Actor,
    ) -> Result<Option<Escalation>, ModerationError> {
        let Some(source) = TriggerSource::for_kind(primary.kind()) else {
            return Ok(None);
        };
        let (guild_id, user_id) = (primary.guild_id, primary.user_id);

        let count = self
            .ledger
            .count(guild_id, user_id, source, primary.category_id)
            .await?;
        let triggers = self.store().list_triggers(guild_id).await?;

        let mut last_fired = HashMap::new();
        for trigger in candidate_triggers(&triggers, source, primary.category_id) {
            if trigger.cooldown.is_none() {
                continue;
            }
            if let Some(at) = self
                .store()
                .last_triggered_at(guild_id, user_id, trigger.id)
                .await?
            {
                last_fired.insert(trigger.id, at);
            }
        }

        let Some(trigger) = select_firing_trigger(
            &triggers,
            count,
            source,
            primary.category_id,
            &last_fired,
            Utc::now(),
        )
        .cloned() else {
            return Ok(None);
        };

        tracing::info!(
            guild_id,
            user_id,
            trigger_id = trigger.id.0,
            count,
            "Reprimand count triggered"
        );

        let secondary = IssueRequest {
            guild_id,
            user_id,
            actor: actor.clone(),
            action: trigger.action.clone(),
            category_id: primary.category_id,
            reason: Some(format!("[Reprimand Count Triggered] at {}", count)),
            source: trigger.source.reprimand_source(),
        };

        let outcome = match self
            .apply(secondary, true, Some(trigger.id), Some(primary))
            .await
        {
            Ok(IssueOutcome::Issued(result)) => EscalationOutcome::Issued(result.primary),
            Ok(IssueOutcome::Denied) => EscalationOutcome::Denied,
            Ok(IssueOutcome::Skipped(reason)) => EscalationOutcome::Skipped(reason),
            Err(e) => {
                tracing::warn!(
                    guild_id,
                    user_id,
                    trigger_id = trigger.id.0,
                    "Escalation failed: {}",
                    e
                );
                EscalationOutcome::Failed(e.to_string())
            }
        };

        Ok(Some(Escalation {
            trigger,
            count,
            outcome,
        }))
    }

    async fn category(
        &self,
        guild_id: u64,
        id: Option<CategoryId>,
    ) -> Result<Option<ModerationCategory>, ModerationError> {
        match id {
            Some(id) => self
                .store()
                .get_category(guild_id, id)
                .await?
                .map(Some)
                .ok_or_else(|| ModerationError::not_found("Category", id.0)),
            None => Ok(None),
        }
    }

    async fn mute_role_for(&self, reprimand: &Reprimand) -> Result<Option<u64>, ModerationError> {
        let rules = self.store().get_rules(reprimand.guild_id).await?;
        let category = match reprimand.category_id {
            Some(id) => self.store().get_category(reprimand.guild_id, id).await?,
            None => None,
        };
        Ok(EffectiveRules::resolve(&rules, category.as_ref()).mute_role_id)
    }

    // ------------------------------------------------------------------------
    // Modifying reprimands
    // ------------------------------------------------------------------------

    /// Pardons an active reprimand and lifts its platform effect.
    pub async fn pardon(
        &self,
        guild_id: u64,
        id: ReprimandId,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<Authorized<Reprimand>, ModerationError> {
        let reprimand = self.ledger.get(guild_id, id).await?;
        if !self
            .authorize(guild_id, actor, AuthorizationScope::MODIFY, reprimand.category_id)
            .await?
        {
            return Ok(Authorized::Denied);
        }

        let _guard = self.ledger.lock_user(guild_id, reprimand.user_id).await;
        // Re-read under the lock; expiry or another pardon may have ended it.
        let reprimand = self.ledger.get(guild_id, id).await?;
        self.pardon_locked(reprimand, actor.user_id(), reason)
            .await
            .map(Authorized::Granted)
    }

    async fn pardon_locked(
        &self,
        reprimand: Reprimand,
        moderator_id: u64,
        reason: Option<String>,
    ) -> Result<Reprimand, ModerationError> {
        if !reprimand.is_active() {
            return Err(ModerationError::InvalidTransition {
                from: reprimand.status,
                to: ReprimandStatus::Pardoned,
            });
        }
        let mute_role_id = self.mute_role_for(&reprimand).await?;
        revert_effect(self.platform.as_ref(), &reprimand, mute_role_id).await?;
        self.ledger
            .transition(reprimand, ReprimandStatus::Pardoned, moderator_id, reason)
            .await
    }

    /// Deletes a reprimand for good. An active one has its platform effect lifted first.
    pub async fn delete(
        &self,
        guild_id: u64,
        id: ReprimandId,
        actor: &Actor,
    ) -> Result<Authorized<Reprimand>, ModerationError> {
        let reprimand = self.ledger.get(guild_id, id).await?;
        if !self
            .authorize(guild_id, actor, AuthorizationScope::MODIFY, reprimand.category_id)
            .await?
        {
            return Ok(Authorized::Denied);
        }

        let _guard = self.ledger.lock_user(guild_id, reprimand.user_id).await;
        let reprimand = self.ledger.get(guild_id, id).await?;
        if reprimand.is_active() {
            let mute_role_id = self.mute_role_for(&reprimand).await?;
            revert_effect(self.platform.as_ref(), &reprimand, mute_role_id).await?;
        }
        self.ledger
            .delete(reprimand, actor.user_id())
            .await
            .map(Authorized::Granted)
    }

    pub async fn update_reason(
        &self,
        guild_id: u64,
        id: ReprimandId,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<Authorized<Reprimand>, ModerationError> {
        let reprimand = self.ledger.get(guild_id, id).await?;
        if !self
            .authorize(guild_id, actor, AuthorizationScope::MODIFY, reprimand.category_id)
            .await?
        {
            return Ok(Authorized::Denied);
        }
        let _guard = self.ledger.lock_user(guild_id, reprimand.user_id).await;
        self.ledger
            .update_reason(guild_id, id, reason, actor.user_id())
            .await
            .map(Authorized::Granted)
    }

    /// Hides the active reprimand of `kind` after its effect was lifted outside the bot.
    pub async fn hide_active(
        &self,
        guild_id: u64,
        user_id: u64,
        kind: ReprimandKind,
        moderator_id: u64,
        reason: Option<String>,
    ) -> Result<Option<Reprimand>, ModerationError> {
        let _guard = self.ledger.lock_user(guild_id, user_id).await;

        match self
            .ledger
            .get_active(guild_id, user_id, kind, CategoryFilter::All)
            .await?
        {
            Some(active) => self
                .ledger
                .transition(active, ReprimandStatus::Hidden, moderator_id, reason)
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// Pardons the active reprimand of `kind`, or lifts the platform state directly when
    /// nothing was recorded. Returns the pardoned reprimand, if there was one.
    async fn lift(
        &self,
        guild_id: u64,
        user_id: u64,
        kind: ReprimandKind,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<Authorized<Option<Reprimand>>, ModerationError> {
        if !self.authorize(guild_id, actor, scope_for(kind), None).await? {
            return Ok(Authorized::Denied);
        }

        let _guard = self.ledger.lock_user(guild_id, user_id).await;

        if let Some(active) = self
            .ledger
            .get_active(guild_id, user_id, kind, CategoryFilter::All)
            .await?
        {
            let pardoned = self.pardon_locked(active, actor.user_id(), reason).await?;
            return Ok(Authorized::Granted(Some(pardoned)));
        }

        match kind {
            ReprimandKind::Ban => self.platform.unban(guild_id, user_id).await?,
            ReprimandKind::Timeout => self.platform.clear_timeout(guild_id, user_id).await?,
            ReprimandKind::Mute => {
                let rules = self.store().get_rules(guild_id).await?;
                if let Some(role_id) = rules.mute_role_id {
                    self.platform.remove_role(guild_id, user_id, role_id).await?;
                }
            }
            _ => {}
        }
        Ok(Authorized::Granted(None))
    }

    pub async fn unban(
        &self,
        guild_id: u64,
        user_id: u64,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<Authorized<Option<Reprimand>>, ModerationError> {
        self.lift(guild_id, user_id, ReprimandKind::Ban, actor, reason)
            .await
    }

    pub async fn unmute(
        &self,
        guild_id: u64,
        user_id: u64,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<Authorized<Option<Reprimand>>, ModerationError> {
        self.lift(guild_id, user_id, ReprimandKind::Mute, actor, reason)
            .await
    }

    pub async fn untimeout(
        &self,
        guild_id: u64,
        user_id: u64,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<Authorized<Option<Reprimand>>, ModerationError> {
        self.lift(guild_id, user_id, ReprimandKind::Timeout, actor, reason)
            .await
    }

    // ------------------------------------------------------------------------
    // Temporary roles
    // ------------------------------------------------------------------------

    /// Gives a member a role that is taken away again after `length`.
    pub async fn grant_temporary_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        length: Duration,
        actor: &Actor,
    ) -> Result<Authorized<TemporaryRole>, ModerationError> {
        check_length(length)?;
        if !self
            .authorize(guild_id, actor, AuthorizationScope::MANAGE_ROLES, None)
            .await?
        {
            return Ok(Authorized::Denied);
        }

        self.platform.add_role(guild_id, user_id, role_id).await?;
        self.store_temporary_role(guild_id, role_id, Some(user_id), length, actor)
            .await
            .map(Authorized::Granted)
    }

    /// Schedules an existing role for deletion after `length`.
    pub async fn expire_role_after(
        &self,
        guild_id: u64,
        role_id: u64,
        length: Duration,
        actor: &Actor,
    ) -> Result<Authorized<TemporaryRole>, ModerationError> {
        check_length(length)?;
        if !self
            .authorize(guild_id, actor, AuthorizationScope::MANAGE_ROLES, None)
            .await?
        {
            return Ok(Authorized::Denied);
        }

        self.store_temporary_role(guild_id, role_id, None, length, actor)
            .await
            .map(Authorized::Granted)
    }

    async fn store_temporary_role(
        &self,
        guild_id: u64,
        role_id: u64,
        user_id: Option<u64>,
        length: Duration,
        actor: &Actor,
    ) -> Result<TemporaryRole, ModerationError> {
        let role = self
            .store()
            .insert_temporary_role(NewTemporaryRole {
                guild_id,
                role_id,
                user_id,
                moderator_id: actor.user_id(),
                started_at: Utc::now(),
                length,
            })
            .await?;
        self.scheduler.register_temporary_role(&role);

        tracing::info!(
            guild_id,
            role_id,
            user_id,
            expire_at = ?role.expire_at,
            "Temporary role stored"
        );
        Ok(role)
    }
}

// ============================================================================
// TESTS
// ============================================================================
