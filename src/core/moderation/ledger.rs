// Reprimand ledger - the record of every reprimand and its lifecycle.
//
// Counts are always derived from the stored rows, never kept as running totals.
// Every change is published on the moderation event channel.

use super::moderation_events::{ModerationEvent, ModerationEvents};
use super::moderation_models::{
    CategoryFilter, CategoryId, Modification, NewReprimand, Reprimand, ReprimandId,
    ReprimandKind, ReprimandStatus,
};
use super::moderation_store::{ModerationError, ModerationStore};
use super::triggers::TriggerSource;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct ReprimandLedger<S: ModerationStore> {
    store: Arc<S>,
    events: ModerationEvents,
    /// One lock per (guild, user). Every read-modify-write of a member's reprimands holds it.
    user_locks: DashMap<(u64, u64), Arc<Mutex<()>>>,
}

impl<S: ModerationStore> ReprimandLedger<S> {
    pub fn new(store: Arc<S>, events: ModerationEvents) -> Self {
        Self {
            store,
            events,
            user_locks: DashMap::new(),
        }
    }

    /// Serializes changes to one member's reprimands across the service and the scheduler.
    pub async fn lock_user(&self, guild_id: u64, user_id: u64) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(
            &self
                .user_locks
                .entry((guild_id, user_id))
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        lock.lock_owned().await
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn events(&self) -> &ModerationEvents {
        &self.events
    }

    /// Infractions counted towards a trigger source in a category scope.
    /// Pardoned reprimands do not count, deleted ones are gone.
    pub async fn count(
        &self,
        guild_id: u64,
        user_id: u64,
        source: TriggerSource,
        category: Option<CategoryId>,
    ) -> Result<u64, ModerationError> {
        self.store
            .count_reprimands(
                guild_id,
                user_id,
                source.counted_kinds(),
                CategoryFilter::scope(category),
            )
            .await
    }

    pub async fn get_active(
        &self,
        guild_id: u64,
        user_id: u64,
        kind: ReprimandKind,
        category: CategoryFilter,
    ) -> Result<Option<Reprimand>, ModerationError> {
        self.store
            .find_active(guild_id, user_id, kind, category)
            .await
    }

    pub async fn history(
        &self,
        guild_id: u64,
        user_id: u64,
        category: CategoryFilter,
    ) -> Result<Vec<Reprimand>, ModerationError> {
        self.store.list_reprimands(guild_id, user_id, category).await
    }

    pub async fn get(&self, guild_id: u64, id: ReprimandId) -> Result<Reprimand, ModerationError> {
        self.store
            .get_reprimand(guild_id, id)
            .await?
            .ok_or_else(|| ModerationError::not_found("Reprimand", id.0))
    }

    /// Persists a new reprimand and announces it.
    pub async fn record(
        &self,
        reprimand: NewReprimand,
        escalated_from: Option<&Reprimand>,
    ) -> Result<Reprimand, ModerationError> {
        let reprimand = self.store.insert_reprimand(reprimand).await?;

        tracing::info!(
            guild_id = reprimand.guild_id,
            user_id = reprimand.user_id,
            moderator_id = reprimand.moderator_id,
            reprimand_id = reprimand.id.0,
            kind = %reprimand.kind(),
            source = reprimand.source.as_str(),
            "Reprimand recorded"
        );

        self.events.publish(ModerationEvent::ReprimandIssued {
            reprimand: reprimand.clone(),
            escalated_from: escalated_from.cloned(),
        });
        Ok(reprimand)
    }

    /// Moves an `Added` reprimand to a terminal status.
    pub async fn transition(
        &self,
        mut reprimand: Reprimand,
        status: ReprimandStatus,
        moderator_id: u64,
        reason: Option<String>,
    ) -> Result<Reprimand, ModerationError> {
        reprimand.transition(
            status,
            Modification {
                moderator_id,
                at: Utc::now(),
                reason,
            },
        )?;
        self.store.update_reprimand(&reprimand).await?;

        tracing::info!(
            guild_id = reprimand.guild_id,
            user_id = reprimand.user_id,
            reprimand_id = reprimand.id.0,
            status = %reprimand.status,
            "Reprimand status changed"
        );

        self.events.publish(ModerationEvent::ReprimandModified {
            reprimand: reprimand.clone(),
        });
        Ok(reprimand)
    }

    pub async fn update_reason(
        &self,
        guild_id: u64,
        id: ReprimandId,
        reason: Option<String>,
        moderator_id: u64,
    ) -> Result<Reprimand, ModerationError> {
        let mut reprimand = self.get(guild_id, id).await?;
        reprimand.update_reason(reason, moderator_id, Utc::now());
        self.store.update_reprimand(&reprimand).await?;

        self.events.publish(ModerationEvent::ReprimandModified {
            reprimand: reprimand.clone(),
        });
        Ok(reprimand)
    }

    /// Removes the row entirely. It no longer counts and leaves no history.
    pub async fn delete(
        &self,
        reprimand: Reprimand,
        moderator_id: u64,
    ) -> Result<Reprimand, ModerationError> {
        if !self
            .store
            .delete_reprimand(reprimand.guild_id, reprimand.id)
            .await?
        {
            return Err(ModerationError::not_found("Reprimand", reprimand.id.0));
        }

        tracing::info!(
            guild_id = reprimand.guild_id,
            reprimand_id = reprimand.id.0,
            moderator_id,
            "Reprimand deleted"
        );

        self.events.publish(ModerationEvent::ReprimandDeleted {
            reprimand: reprimand.clone(),
            moderator_id,
        });
        Ok(reprimand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_models::{ReprimandAction, ReprimandSource};
    use crate::core::moderation::testing::MockModerationStore;

    const GUILD: u64 = 1;
    const USER: u64 = 2;

    fn ledger() -> ReprimandLedger<MockModerationStore> {
        ReprimandLedger::new(Arc::new(MockModerationStore::new()), ModerationEvents::new(16))
    }

    fn warning(category: Option<CategoryId>) -> NewReprimand {
        NewReprimand {
            guild_id: GUILD,
            user_id: USER,
            moderator_id: 3,
            reason: Some("spam".to_string()),
            source: ReprimandSource::Command,
            category_id: category,
            trigger_id: None,
            action: ReprimandAction::Warning { count: 1 },
            started_at: Utc::now(),
            length: None,
        }
    }

    #[tokio::test]
    async fn test_pardon_removes_from_count_but_keeps_history() {
        let ledger = ledger();
        let first = ledger.record(warning(None), None).await.unwrap();
        ledger.record(warning(None), None).await.unwrap();
        assert_eq!(
            ledger.count(GUILD, USER, TriggerSource::Warning, None).await.unwrap(),
            2
        );

        ledger
            .transition(first, ReprimandStatus::Pardoned, 3, None)
            .await
            .unwrap();

        assert_eq!(
            ledger.count(GUILD, USER, TriggerSource::Warning, None).await.unwrap(),
            1
        );
        let history = ledger
            .history(GUILD, USER, CategoryFilter::All)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_removes_from_count_and_history() {
        let ledger = ledger();
        let first = ledger.record(warning(None), None).await.unwrap();
        ledger.delete(first, 3).await.unwrap();

        assert_eq!(
            ledger.count(GUILD, USER, TriggerSource::Warning, None).await.unwrap(),
            0
        );
        assert!(ledger
            .history(GUILD, USER, CategoryFilter::All)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_count_is_scoped_to_category() {
        let ledger = ledger();
        let category = Some(CategoryId(7));
        ledger.record(warning(category), None).await.unwrap();
        ledger.record(warning(None), None).await.unwrap();
        ledger.record(warning(None), None).await.unwrap();

        assert_eq!(
            ledger
                .count(GUILD, USER, TriggerSource::Warning, category)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            ledger.count(GUILD, USER, TriggerSource::Warning, None).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_warning_weight_counts() {
        let ledger = ledger();
        let mut heavy = warning(None);
        heavy.action = ReprimandAction::Warning { count: 3 };
        ledger.record(heavy, None).await.unwrap();

        assert_eq!(
            ledger.count(GUILD, USER, TriggerSource::Warning, None).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_reason_update_on_terminal_reprimand_publishes_event() {
        let ledger = ledger();
        let mut events = ledger.events().subscribe();
        let reprimand = ledger.record(warning(None), None).await.unwrap();
        let reprimand = ledger
            .transition(reprimand, ReprimandStatus::Pardoned, 3, None)
            .await
            .unwrap();

        let updated = ledger
            .update_reason(GUILD, reprimand.id, Some("appeal accepted".to_string()), 4)
            .await
            .unwrap();
        assert_eq!(updated.status, ReprimandStatus::Pardoned);

        assert!(matches!(
            events.recv().await.unwrap(),
            ModerationEvent::ReprimandIssued { .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            ModerationEvent::ReprimandModified { .. }
        ));
        match events.recv().await.unwrap() {
            ModerationEvent::ReprimandModified { reprimand } => {
                assert_eq!(reprimand.reason.as_deref(), Some("appeal accepted"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reprimand_from_other_guild_is_not_found() {
        let ledger = ledger();
        let reprimand = ledger.record(warning(None), None).await.unwrap();

        let err = ledger.get(GUILD + 1, reprimand.id).await.unwrap_err();
        assert!(matches!(err, ModerationError::NotFound { .. }));
    }
}
