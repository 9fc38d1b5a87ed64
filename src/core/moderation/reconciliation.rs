// Reconciliation - records moderation done with the platform's native tools.
//
// When the gateway reports a ban, unban, departure or timeout change, the audit trail
// is searched for a matching entry. Punitive actions by someone other than the bot
// are recorded; lifted ones hide the reprimand that was running.

use super::moderation_models::{CategoryFilter, Reprimand, ReprimandAction, ReprimandKind};
use super::moderation_service::{IssueOutcome, ModerationService};
use super::moderation_store::{ModerationError, ModerationStore};
use super::platform::{AuditAction, AuditEntry, AuditTrail, ModerationPlatform, PlatformError};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// How many audit entries are read per lookup.
const AUDIT_ENTRY_LIMIT: u8 = 10;

/// Something the gateway observed about a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationSignal {
    MemberBanned {
        guild_id: u64,
        user_id: u64,
    },
    MemberUnbanned {
        guild_id: u64,
        user_id: u64,
    },
    /// Left or was kicked; only the audit trail can tell.
    MemberLeft {
        guild_id: u64,
        user_id: u64,
    },
    /// `until` is `None` (or in the past) when the timeout was lifted.
    TimeoutChanged {
        guild_id: u64,
        user_id: u64,
        until: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// A new reprimand attributed to the audit entry's author.
    Recorded(Reprimand),
    /// The running reprimand was lifted outside the bot and is now hidden.
    Hidden(Reprimand),
    /// Already known, done by the bot itself, or nothing to change.
    Ignored,
    /// No matching audit entry in the window.
    Indeterminate,
}

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// How old an audit entry may be and still match a signal.
    pub window: Duration,
    /// Entries authored by this account are the bot's own and already recorded.
    pub bot_user_id: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            window: Duration::seconds(60),
            bot_user_id: 0,
        }
    }
}

enum Reconcile {
    Record(ReprimandAction),
    Hide(ReprimandKind),
}

pub struct ReconciliationListener<S, P, A>
where
    S: ModerationStore + 'static,
    P: ModerationPlatform + 'static,
    A: AuditTrail,
{
    service: Arc<ModerationService<S, P>>,
    audit: Arc<A>,
    config: ReconciliationConfig,
}

impl<S, P, A> ReconciliationListener<S, P, A>
where
    S: ModerationStore + 'static,
    P: ModerationPlatform + 'static,
    A: AuditTrail,
{
    pub fn new(
        service: Arc<ModerationService<S, P>>,
        audit: Arc<A>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            service,
            audit,
            config,
        }
    }

    pub async fn handle(&self, signal: ModerationSignal) -> Result<ReconcileOutcome, ModerationError> {
        let now = Utc::now();
        let (guild_id, user_id, audit_action, reconcile) = match signal {
            ModerationSignal::MemberBanned { guild_id, user_id } => (
                guild_id,
                user_id,
                AuditAction::BanAdd,
                Reconcile::Record(ReprimandAction::Ban {
                    delete_days: 0,
                    length: None,
                }),
            ),
            ModerationSignal::MemberUnbanned { guild_id, user_id } => (
                guild_id,
                user_id,
                AuditAction::BanRemove,
                Reconcile::Hide(ReprimandKind::Ban),
            ),
            ModerationSignal::MemberLeft { guild_id, user_id } => (
                guild_id,
                user_id,
                AuditAction::Kick,
                Reconcile::Record(ReprimandAction::Kick),
            ),
            ModerationSignal::TimeoutChanged {
                guild_id,
                user_id,
                until,
            } => {
                let reconcile = match until {
                    Some(until) if until > now => Reconcile::Record(ReprimandAction::Timeout {
                        length: until - now,
                    }),
                    _ => Reconcile::Hide(ReprimandKind::Timeout),
                };
                (guild_id, user_id, AuditAction::MemberUpdate, reconcile)
            }
        };

        // Skip the audit lookup when the ledger already agrees with the signal. Kicks never
        // stay active, so every departure is looked up.
        let already_reflected = match &reconcile {
            Reconcile::Hide(kind) => !self.has_active(guild_id, user_id, *kind).await?,
            Reconcile::Record(action) => {
                action.kind() != ReprimandKind::Kick
                    && self.has_active(guild_id, user_id, action.kind()).await?
            }
        };
        if already_reflected {
            return Ok(ReconcileOutcome::Ignored);
        }

        let Some(entry) = self
            .find_entry(guild_id, user_id, audit_action, now)
            .await?
        else {
            tracing::debug!(guild_id, user_id, ?audit_action, "No audit entry for signal");
            return Ok(ReconcileOutcome::Indeterminate);
        };

        if entry.responsible_id == self.config.bot_user_id {
            return Ok(ReconcileOutcome::Ignored);
        }

        match reconcile {
            Reconcile::Record(action) => self.record(guild_id, user_id, action, entry).await,
            Reconcile::Hide(kind) => Ok(self
                .service
                .hide_active(guild_id, user_id, kind, entry.responsible_id, entry.reason)
                .await?
                .map(ReconcileOutcome::Hidden)
                .unwrap_or(ReconcileOutcome::Ignored)),
        }
    }

    async fn record(
        &self,
        guild_id: u64,
        user_id: u64,
        action: ReprimandAction,
        entry: AuditEntry,
    ) -> Result<ReconcileOutcome, ModerationError> {
        let kind = action.kind();
        let outcome = self
            .service
            .record_external(guild_id, user_id, entry.responsible_id, action, entry.reason)
            .await?;

        match outcome {
            IssueOutcome::Issued(result) => {
                tracing::info!(
                    guild_id,
                    user_id,
                    moderator_id = entry.responsible_id,
                    reprimand_id = result.primary.id.0,
                    kind = %kind,
                    "Recorded moderation from audit log"
                );
                Ok(ReconcileOutcome::Recorded(result.primary))
            }
            IssueOutcome::Denied | IssueOutcome::Skipped(_) => Ok(ReconcileOutcome::Ignored),
        }
    }

    async fn has_active(
        &self,
        guild_id: u64,
        user_id: u64,
        kind: ReprimandKind,
    ) -> Result<bool, ModerationError> {
        Ok(self
            .service
            .ledger()
            .get_active(guild_id, user_id, kind, CategoryFilter::All)
            .await?
            .is_some())
    }

    /// Newest entry of `action` against `user_id` inside the window. A trail we are not
    /// allowed to read counts as empty.
    async fn find_entry(
        &self,
        guild_id: u64,
        user_id: u64,
        action: AuditAction,
        now: DateTime<Utc>,
    ) -> Result<Option<AuditEntry>, ModerationError> {
        let entries = match self
            .audit
            .recent_entries(guild_id, action, AUDIT_ENTRY_LIMIT)
            .await
        {
            Ok(entries) => entries,
            Err(PlatformError::MissingPermissions(what)) => {
                tracing::warn!(guild_id, "Cannot read the audit log: missing permissions to {}", what);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let oldest = now - self.config.window;
        Ok(entries
            .into_iter()
            .filter(|e| e.target_id == Some(user_id) && e.created_at >= oldest)
            .max_by_key(|e| e.created_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::expiry::{ExpiryConfig, ExpiryScheduler};
    use crate::core::moderation::ledger::ReprimandLedger;
    use crate::core::moderation::moderation_events::ModerationEvents;
    use crate::core::moderation::moderation_models::{ReprimandSource, ReprimandStatus};
    use crate::core::moderation::testing::{
        MockModerationStore, RecordingPlatform, ScriptedAuditTrail,
    };

    const GUILD: u64 = 1;
    const TARGET: u64 = 2;
    const HUMAN_MOD: u64 = 3;
    const BOT: u64 = 99;

    struct Harness {
        store: Arc<MockModerationStore>,
        platform: Arc<RecordingPlatform>,
        audit: Arc<ScriptedAuditTrail>,
        listener: ReconciliationListener<MockModerationStore, RecordingPlatform, ScriptedAuditTrail>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MockModerationStore::new());
        let platform = Arc::new(RecordingPlatform::new());
        let audit = Arc::new(ScriptedAuditTrail::new());
        let ledger = Arc::new(ReprimandLedger::new(
            Arc::clone(&store),
            ModerationEvents::new(16),
        ));
        let scheduler = ExpiryScheduler::new(
            Arc::clone(&ledger),
            Arc::clone(&platform),
            ExpiryConfig::default(),
        );
        let service = Arc::new(ModerationService::new(
            ledger,
            Arc::clone(&platform),
            scheduler,
        ));
        let listener = ReconciliationListener::new(
            service,
            Arc::clone(&audit),
            ReconciliationConfig {
                window: Duration::seconds(60),
                bot_user_id: BOT,
            },
        );
        Harness {
            store,
            platform,
            audit,
            listener,
        }
    }

    fn entry(action: AuditAction, author: u64, age: Duration) -> AuditEntry {
        AuditEntry {
            action,
            target_id: Some(TARGET),
            responsible_id: author,
            reason: Some("raiding".to_string()),
            created_at: Utc::now() - age,
        }
    }

    fn banned() -> ModerationSignal {
        ModerationSignal::MemberBanned {
            guild_id: GUILD,
            user_id: TARGET,
        }
    }

    async fn history(harness: &Harness) -> Vec<Reprimand> {
        harness
            .store
            .list_reprimands(GUILD, TARGET, CategoryFilter::All)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_native_ban_is_recorded_and_attributed() {
        let harness = harness();
        harness
            .audit
            .push(entry(AuditAction::BanAdd, HUMAN_MOD, Duration::seconds(5)));

        let outcome = harness.listener.handle(banned()).await.unwrap();

        let ReconcileOutcome::Recorded(reprimand) = outcome else {
            panic!("expected the ban to be recorded, got {:?}", outcome);
        };
        assert_eq!(reprimand.kind(), ReprimandKind::Ban);
        assert_eq!(reprimand.moderator_id, HUMAN_MOD);
        assert_eq!(reprimand.source, ReprimandSource::AuditLog);
        assert_eq!(reprimand.reason.as_deref(), Some("raiding"));
        assert!(harness.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_entry_outside_window_is_indeterminate() {
        let harness = harness();
        harness
            .audit
            .push(entry(AuditAction::BanAdd, HUMAN_MOD, Duration::minutes(5)));

        let outcome = harness.listener.handle(banned()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Indeterminate);
        assert!(history(&harness).await.is_empty());
    }

    #[tokio::test]
    async fn test_own_actions_are_ignored() {
        let harness = harness();
        harness
            .audit
            .push(entry(AuditAction::BanAdd, BOT, Duration::seconds(1)));

        let outcome = harness.listener.handle(banned()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ignored);
        assert!(history(&harness).await.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_audit_log_is_indeterminate() {
        let harness = harness();
        harness
            .audit
            .push(entry(AuditAction::BanAdd, HUMAN_MOD, Duration::seconds(1)));
        harness.audit.set_forbidden(true);

        let outcome = harness.listener.handle(banned()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Indeterminate);
    }

    #[tokio::test]
    async fn test_native_unban_hides_running_ban() {
        let harness = harness();
        harness
            .audit
            .push(entry(AuditAction::BanAdd, HUMAN_MOD, Duration::seconds(10)));
        harness.listener.handle(banned()).await.unwrap();

        harness
            .audit
            .push(entry(AuditAction::BanRemove, HUMAN_MOD, Duration::seconds(1)));
        let outcome = harness
            .listener
            .handle(ModerationSignal::MemberUnbanned {
                guild_id: GUILD,
                user_id: TARGET,
            })
            .await
            .unwrap();

        let ReconcileOutcome::Hidden(reprimand) = outcome else {
            panic!("expected the ban to be hidden, got {:?}", outcome);
        };
        assert_eq!(reprimand.status, ReprimandStatus::Hidden);
    }

    #[tokio::test]
    async fn test_voluntary_leave_records_nothing() {
        let harness = harness();
        let outcome = harness
            .listener
            .handle(ModerationSignal::MemberLeft {
                guild_id: GUILD,
                user_id: TARGET,
            })
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Indeterminate);
        assert!(history(&harness).await.is_empty());
    }

    #[tokio::test]
    async fn test_native_timeout_is_recorded() {
        let harness = harness();
        harness.audit.push(entry(
            AuditAction::MemberUpdate,
            HUMAN_MOD,
            Duration::seconds(2),
        ));

        let outcome = harness
            .listener
            .handle(ModerationSignal::TimeoutChanged {
                guild_id: GUILD,
                user_id: TARGET,
                until: Some(Utc::now() + Duration::minutes(10)),
            })
            .await
            .unwrap();

        let ReconcileOutcome::Recorded(reprimand) = outcome else {
            panic!("expected the timeout to be recorded, got {:?}", outcome);
        };
        assert_eq!(reprimand.kind(), ReprimandKind::Timeout);
        assert!(reprimand.expire_at.is_some());
    }

    fn timeout_changed(until: Option<DateTime<Utc>>) -> ModerationSignal {
        ModerationSignal::TimeoutChanged {
            guild_id: GUILD,
            user_id: TARGET,
            until,
        }
    }

    #[tokio::test]
    async fn test_native_timeout_removal_hides_running_timeout() {
        let harness = harness();
        harness.audit.push(entry(
            AuditAction::MemberUpdate,
            HUMAN_MOD,
            Duration::seconds(30),
        ));
        harness
            .listener
            .handle(timeout_changed(Some(Utc::now() + Duration::minutes(10))))
            .await
            .unwrap();

        harness.audit.push(entry(
            AuditAction::MemberUpdate,
            HUMAN_MOD,
            Duration::seconds(1),
        ));
        let outcome = harness.listener.handle(timeout_changed(None)).await.unwrap();

        let ReconcileOutcome::Hidden(reprimand) = outcome else {
            panic!("expected the timeout to be hidden, got {:?}", outcome);
        };
        assert_eq!(reprimand.kind(), ReprimandKind::Timeout);
        assert_eq!(reprimand.status, ReprimandStatus::Hidden);
    }

    #[tokio::test]
    async fn test_member_updates_the_ledger_already_reflects_skip_the_audit_log() {
        let harness = harness();
        harness.audit.push(entry(
            AuditAction::MemberUpdate,
            HUMAN_MOD,
            Duration::seconds(2),
        ));
        let until = Utc::now() + Duration::minutes(10);
        harness
            .listener
            .handle(timeout_changed(Some(until)))
            .await
            .unwrap();
        let lookups = harness.audit.lookups();

        // A nickname change while still timed out, then an update for a member who never was.
        let outcome = harness.listener.handle(timeout_changed(Some(until))).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ignored);
        let other = harness
            .listener
            .handle(ModerationSignal::TimeoutChanged {
                guild_id: GUILD,
                user_id: TARGET + 1,
                until: None,
            })
            .await
            .unwrap();
        assert_eq!(other, ReconcileOutcome::Ignored);

        assert_eq!(harness.audit.lookups(), lookups);
        assert_eq!(history(&harness).await.len(), 1);
    }
}
