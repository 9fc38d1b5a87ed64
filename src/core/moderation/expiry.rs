// Expiry scheduler - ends mutes, timeouts, timed bans, expiring warnings and
// temporary roles when their time is up.
//
// A periodic sweep arms one-shot timers for everything due within the lookahead
// window. The startup sweep arms everything still active, so expiries survive a
// restart. Timers are keyed by entity id and arming twice is a no-op.

use super::ledger::ReprimandLedger;
use super::moderation_events::ModerationEvent;
use super::moderation_models::{
    EffectiveRules, Reprimand, ReprimandId, ReprimandStatus, TemporaryRole, TemporaryRoleId,
};
use super::moderation_store::{ModerationError, ModerationStore};
use super::platform::ModerationPlatform;
use super::platform_effects::revert_effect;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Reason recorded on reprimands the scheduler ends.
pub const EXPIRED_REASON: &str = "[Reprimand Expired]";

#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// How often the periodic sweep runs.
    pub sweep_interval: Duration,
    /// How far ahead a sweep arms timers.
    pub lookahead: chrono::Duration,
    /// Account recorded as the moderator of expiries.
    pub system_user_id: u64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5 * 60),
            lookahead: chrono::Duration::minutes(10),
            system_user_id: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpiryKey {
    Reprimand { guild_id: u64, id: ReprimandId },
    TemporaryRole(TemporaryRoleId),
}

pub struct ExpiryScheduler<S: ModerationStore + 'static, P: ModerationPlatform + 'static> {
    ledger: Arc<ReprimandLedger<S>>,
    platform: Arc<P>,
    config: ExpiryConfig,
    armed: DashMap<ExpiryKey, DateTime<Utc>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S: ModerationStore + 'static, P: ModerationPlatform + 'static> ExpiryScheduler<S, P> {
    pub fn new(ledger: Arc<ReprimandLedger<S>>, platform: Arc<P>, config: ExpiryConfig) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(Self {
            ledger,
            platform,
            config,
            armed: DashMap::new(),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Stops the sweep loop and drops timers that have not fired yet.
    /// An expiry that is already running finishes.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    pub fn is_armed(&self, key: &ExpiryKey) -> bool {
        self.armed.contains_key(key)
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    /// Arms a one-shot timer. Returns false when the key is already armed or the
    /// scheduler is shutting down.
    pub fn arm(self: &Arc<Self>, key: ExpiryKey, expire_at: DateTime<Utc>) -> bool {
        if self.is_shut_down() {
            return false;
        }

        match self.armed.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(expire_at);

                let delay = (expire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                let scheduler = Arc::clone(self);
                let mut shutdown = self.shutdown_rx.clone();

                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            scheduler.fire(key).await;
                        }
                        _ = shutdown.changed() => {
                            tracing::debug!(?key, "Expiry timer dropped on shutdown");
                        }
                    }
                    scheduler.armed.remove(&key);
                });

                tracing::debug!(?key, %expire_at, "Expiry timer armed");
                true
            }
        }
    }

    /// Arms the reprimand if it expires within the lookahead window. Later ones are
    /// picked up by a periodic sweep.
    pub fn register_reprimand(self: &Arc<Self>, reprimand: &Reprimand) {
        if let Some(expire_at) = reprimand.expire_at {
            if reprimand.is_active() && expire_at <= Utc::now() + self.config.lookahead {
                self.arm(
                    ExpiryKey::Reprimand {
                        guild_id: reprimand.guild_id,
                        id: reprimand.id,
                    },
                    expire_at,
                );
            }
        }
    }

    pub fn register_temporary_role(self: &Arc<Self>, role: &TemporaryRole) {
        if let Some(expire_at) = role.expire_at {
            if role.is_active() && expire_at <= Utc::now() + self.config.lookahead {
                self.arm(ExpiryKey::TemporaryRole(role.id), expire_at);
            }
        }
    }

    /// Arms every active expirable due by `until`, or all of them when `until` is None.
    /// Returns how many timers were newly armed.
    pub async fn sweep(
        self: &Arc<Self>,
        until: Option<DateTime<Utc>>,
    ) -> Result<usize, ModerationError> {
        let store = self.ledger.store();
        let mut armed = 0;

        for reprimand in store.list_expiring_reprimands(until).await? {
            if let Some(expire_at) = reprimand.expire_at {
                let key = ExpiryKey::Reprimand {
                    guild_id: reprimand.guild_id,
                    id: reprimand.id,
                };
                if self.arm(key, expire_at) {
                    armed += 1;
                }
            }
        }

        for role in store.list_expiring_temporary_roles(until).await? {
            if let Some(expire_at) = role.expire_at {
                if self.arm(ExpiryKey::TemporaryRole(role.id), expire_at) {
                    armed += 1;
                }
            }
        }

        Ok(armed)
    }

    /// Re-arms everything that was active when the process last stopped.
    pub async fn startup_sweep(self: &Arc<Self>) -> Result<usize, ModerationError> {
        let armed = self.sweep(None).await?;
        tracing::info!(armed, "Expiry startup sweep completed");
        Ok(armed)
    }

    /// Startup sweep followed by periodic sweeps until shutdown.
    pub async fn run(self: Arc<Self>) {
        if let Err(e) = self.startup_sweep().await {
            tracing::error!("Expiry startup sweep failed: {}", e);
        }

        let mut shutdown = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.sweep_interval) => {}
                _ = shutdown.changed() => break,
            }
            if self.is_shut_down() {
                break;
            }

            let until = Utc::now() + self.config.lookahead;
            match self.sweep(Some(until)).await {
                Ok(0) => tracing::debug!("Expiry sweep found nothing new"),
                Ok(armed) => tracing::info!(armed, "Expiry sweep armed timers"),
                Err(e) => tracing::error!("Expiry sweep failed: {}", e),
            }
        }

        tracing::info!("Expiry scheduler stopped");
    }

    async fn fire(&self, key: ExpiryKey) {
        let result = match key {
            ExpiryKey::Reprimand { guild_id, id } => self.expire_reprimand(guild_id, id).await,
            ExpiryKey::TemporaryRole(id) => self.expire_temporary_role(id).await,
        };
        if let Err(e) = result {
            tracing::error!(?key, "Expiry failed: {}", e);
        }
    }

    async fn expire_reprimand(&self, guild_id: u64, id: ReprimandId) -> Result<(), ModerationError> {
        let store = self.ledger.store();
        let Some(user_id) = store.get_reprimand(guild_id, id).await?.map(|r| r.user_id) else {
            return Ok(());
        };
        let _guard = self.ledger.lock_user(guild_id, user_id).await;
        let reprimand = match store.get_reprimand(guild_id, id).await? {
            Some(reprimand) if reprimand.is_active() => reprimand,
            // Pardoned, hidden or deleted in the meantime.
            _ => return Ok(()),
        };

        let mute_role_id = self.mute_role_for(&reprimand).await?;
        if let Err(e) = revert_effect(self.platform.as_ref(), &reprimand, mute_role_id).await {
            tracing::warn!(
                guild_id,
                user_id = reprimand.user_id,
                reprimand_id = id.0,
                "Failed to revert expired reprimand on the platform: {}",
                e
            );
        }

        self.ledger
            .transition(
                reprimand,
                ReprimandStatus::Expired,
                self.config.system_user_id,
                Some(EXPIRED_REASON.to_string()),
            )
            .await?;
        Ok(())
    }

    async fn mute_role_for(
        &self,
        reprimand: &Reprimand,
    ) -> Result<Option<u64>, ModerationError> {
        let store = self.ledger.store();
        let rules = store.get_rules(reprimand.guild_id).await?;
        let category = match reprimand.category_id {
            Some(id) => store.get_category(reprimand.guild_id, id).await?,
            None => None,
        };
        Ok(EffectiveRules::resolve(&rules, category.as_ref()).mute_role_id)
    }

    async fn expire_temporary_role(&self, id: TemporaryRoleId) -> Result<(), ModerationError> {
        let store = self.ledger.store();
        let role = match store.get_temporary_role(id).await? {
            Some(role) if role.is_active() => role,
            _ => return Ok(()),
        };

        let reverted = match role.user_id {
            Some(user_id) => {
                self.platform
                    .remove_role(role.guild_id, user_id, role.role_id)
                    .await
            }
            None => self.platform.delete_role(role.guild_id, role.role_id).await,
        };
        if let Err(e) = reverted {
            tracing::warn!(
                guild_id = role.guild_id,
                role_id = role.role_id,
                "Failed to remove temporary role on the platform: {}",
                e
            );
        }

        let now = Utc::now();
        if store.end_temporary_role(id, now).await? {
            let mut ended = role;
            ended.ended_at = Some(now);
            ended.expire_at = None;
            self.ledger
                .events()
                .publish(ModerationEvent::TemporaryRoleExpired { role: ended });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_events::ModerationEvents;
    use crate::core::moderation::moderation_models::{
        ModerationRules, NewReprimand, NewTemporaryRole, ReprimandAction, ReprimandSource,
    };
    use crate::core::moderation::moderation_service::{Actor, ModerationService};
    use crate::core::moderation::testing::{MockModerationStore, PlatformCall, RecordingPlatform};

    const GUILD: u64 = 1;
    const USER: u64 = 2;
    const MUTE_ROLE: u64 = 55;

    struct Harness {
        store: Arc<MockModerationStore>,
        platform: Arc<RecordingPlatform>,
        ledger: Arc<ReprimandLedger<MockModerationStore>>,
    }

    impl Harness {
        async fn new() -> Self {
            let store = Arc::new(MockModerationStore::new());
            let mut rules = ModerationRules::new(GUILD);
            rules.mute_role_id = Some(MUTE_ROLE);
            store.save_rules(&rules).await.unwrap();

            let ledger = Arc::new(ReprimandLedger::new(
                Arc::clone(&store),
                ModerationEvents::new(16),
            ));
            Self {
                store,
                platform: Arc::new(RecordingPlatform::new()),
                ledger,
            }
        }

        fn scheduler(&self) -> Arc<ExpiryScheduler<MockModerationStore, RecordingPlatform>> {
            ExpiryScheduler::new(
                Arc::clone(&self.ledger),
                Arc::clone(&self.platform),
                ExpiryConfig {
                    sweep_interval: Duration::from_secs(60),
                    lookahead: chrono::Duration::hours(1),
                    system_user_id: 99,
                },
            )
        }

        async fn mute(&self, started_ago: chrono::Duration, length: chrono::Duration) -> ReprimandId {
            self.store
                .insert_reprimand(NewReprimand {
                    guild_id: GUILD,
                    user_id: USER,
                    moderator_id: 3,
                    reason: None,
                    source: ReprimandSource::Command,
                    category_id: None,
                    trigger_id: None,
                    action: ReprimandAction::Mute {
                        length: Some(length),
                    },
                    started_at: Utc::now() - started_ago,
                    length: Some(length),
                })
                .await
                .unwrap()
                .id
        }

        async fn status(&self, id: ReprimandId) -> ReprimandStatus {
            self.store
                .get_reprimand(GUILD, id)
                .await
                .unwrap()
                .unwrap()
                .status
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reprimand_expires_after_its_length() {
        let harness = Harness::new().await;
        let scheduler = harness.scheduler();
        let id = harness
            .mute(chrono::Duration::zero(), chrono::Duration::minutes(10))
            .await;
        let reprimand = harness.store.get_reprimand(GUILD, id).await.unwrap().unwrap();
        scheduler.register_reprimand(&reprimand);

        tokio::time::sleep(Duration::from_secs(9 * 60)).await;
        settle().await;
        assert_eq!(harness.status(id).await, ReprimandStatus::Added);

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        settle().await;
        assert_eq!(harness.status(id).await, ReprimandStatus::Expired);
        assert_eq!(
            harness.platform.calls(),
            vec![PlatformCall::RemoveRole {
                user_id: USER,
                role_id: MUTE_ROLE
            }]
        );
        assert!(!scheduler.is_armed(&ExpiryKey::Reprimand { guild_id: GUILD, id }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_sweep_rearms_after_restart() {
        let harness = Harness::new().await;
        // Issued nine minutes before the "restart", no timer exists for it.
        let id = harness
            .mute(chrono::Duration::minutes(9), chrono::Duration::minutes(10))
            .await;

        let scheduler = harness.scheduler();
        assert_eq!(scheduler.startup_sweep().await.unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(harness.status(id).await, ReprimandStatus::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_reprimand_expires_immediately() {
        let harness = Harness::new().await;
        let id = harness
            .mute(chrono::Duration::hours(2), chrono::Duration::hours(1))
            .await;

        let scheduler = harness.scheduler();
        scheduler.startup_sweep().await.unwrap();
        settle().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        settle().await;

        assert_eq!(harness.status(id).await, ReprimandStatus::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arming_twice_fires_once() {
        let harness = Harness::new().await;
        let scheduler = harness.scheduler();
        let id = harness
            .mute(chrono::Duration::zero(), chrono::Duration::minutes(1))
            .await;
        let key = ExpiryKey::Reprimand { guild_id: GUILD, id };
        let expire_at = Utc::now() + chrono::Duration::minutes(1);

        assert!(scheduler.arm(key, expire_at));
        assert!(!scheduler.arm(key, expire_at));
        assert_eq!(scheduler.sweep(None).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(harness.platform.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_platform_failure_still_expires() {
        let harness = Harness::new().await;
        harness.platform.set_failing(true);
        let scheduler = harness.scheduler();
        let id = harness
            .mute(chrono::Duration::zero(), chrono::Duration::minutes(1))
            .await;
        scheduler.sweep(None).await.unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(harness.status(id).await, ReprimandStatus::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pardoned_reprimand_is_left_alone() {
        let harness = Harness::new().await;
        let scheduler = harness.scheduler();
        let id = harness
            .mute(chrono::Duration::zero(), chrono::Duration::minutes(1))
            .await;
        scheduler.sweep(None).await.unwrap();

        let reprimand = harness.store.get_reprimand(GUILD, id).await.unwrap().unwrap();
        harness
            .ledger
            .transition(reprimand, ReprimandStatus::Pardoned, 3, None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(harness.status(id).await, ReprimandStatus::Pardoned);
        assert!(harness.platform.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending_timers() {
        let harness = Harness::new().await;
        let scheduler = harness.scheduler();
        let id = harness
            .mute(chrono::Duration::zero(), chrono::Duration::minutes(5))
            .await;
        scheduler.sweep(None).await.unwrap();

        scheduler.shutdown();
        settle().await;
        tokio::time::sleep(Duration::from_secs(10 * 60)).await;
        settle().await;

        assert_eq!(harness.status(id).await, ReprimandStatus::Added);
        assert_eq!(scheduler.armed_count(), 0);
        assert_eq!(scheduler.sweep(None).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_temporary_role_is_removed_at_expiry() {
        let harness = Harness::new().await;
        let mut events = harness.ledger.events().subscribe();
        let scheduler = harness.scheduler();
        let role = harness
            .store
            .insert_temporary_role(NewTemporaryRole {
                guild_id: GUILD,
                role_id: 77,
                user_id: Some(USER),
                moderator_id: 3,
                started_at: Utc::now(),
                length: chrono::Duration::minutes(30),
            })
            .await
            .unwrap();
        scheduler.register_temporary_role(&role);

        tokio::time::sleep(Duration::from_secs(31 * 60)).await;
        settle().await;

        assert_eq!(
            harness.platform.calls(),
            vec![PlatformCall::RemoveRole {
                user_id: USER,
                role_id: 77
            }]
        );
        let stored = harness.store.get_temporary_role(role.id).await.unwrap().unwrap();
        assert!(!stored.is_active());
        assert!(matches!(
            events.recv().await.unwrap(),
            ModerationEvent::TemporaryRoleExpired { .. }
        ));
    }

    #[tokio::test]
    async fn test_pardon_during_suspended_expiry_does_not_overwrite_it() {
        let harness = Harness::new().await;
        let scheduler = harness.scheduler();
        let service = ModerationService::new(
            Arc::clone(&harness.ledger),
            Arc::clone(&harness.platform),
            Arc::clone(&scheduler),
        );
        let id = harness
            .mute(chrono::Duration::zero(), chrono::Duration::minutes(10))
            .await;

        let gate = harness.platform.hold_role_removals();
        let expiring = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move {
                scheduler
                    .fire(ExpiryKey::Reprimand { guild_id: GUILD, id })
                    .await
            }
        });
        settle().await;

        let pardoning = tokio::spawn(async move {
            service
                .pardon(GUILD, id, &Actor::System { user_id: 3 }, Some("appeal".to_string()))
                .await
        });
        settle().await;
        drop(gate);

        expiring.await.unwrap();
        let pardon = pardoning.await.unwrap();
        assert!(matches!(
            pardon,
            Err(ModerationError::InvalidTransition {
                from: ReprimandStatus::Expired,
                to: ReprimandStatus::Pardoned
            })
        ));

        let stored = harness.store.get_reprimand(GUILD, id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReprimandStatus::Expired);
        assert_eq!(
            stored.modified.and_then(|m| m.reason).as_deref(),
            Some(EXPIRED_REASON)
        );
        assert_eq!(
            harness.platform.calls(),
            vec![PlatformCall::RemoveRole {
                user_id: USER,
                role_id: MUTE_ROLE
            }]
        );
    }
}
