// Moderation events - broadcast to anything that wants to react to ledger changes
// (the mod-log notifier in the Discord layer, tests).

use super::moderation_models::{Reprimand, TemporaryRole};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub enum ModerationEvent {
    ReprimandIssued {
        reprimand: Reprimand,
        /// Set when a trigger issued this reprimand in response to another one.
        escalated_from: Option<Reprimand>,
    },
    /// Status or reason changed.
    ReprimandModified { reprimand: Reprimand },
    ReprimandDeleted { reprimand: Reprimand, moderator_id: u64 },
    TemporaryRoleExpired { role: TemporaryRole },
}

#[derive(Clone)]
pub struct ModerationEvents {
    sender: broadcast::Sender<ModerationEvent>,
}

impl ModerationEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModerationEvent> {
        self.sender.subscribe()
    }

    /// Sends to current subscribers. Having none is fine.
    pub fn publish(&self, event: ModerationEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No subscribers for moderation event");
        }
    }
}
