// Core moderation module - reprimands, authorization, triggers and their lifecycle.
// Nothing in here knows about Discord; the platform is reached through ports.

pub mod authorization;
pub mod configuration;
pub mod expiry;
pub mod ledger;
pub mod moderation_events;
pub mod moderation_models;
pub mod moderation_service;
pub mod moderation_store;
pub mod platform;
pub mod platform_effects;
pub mod reconciliation;
pub mod triggers;

#[cfg(test)]
pub mod testing;

pub use authorization::{
    AccessType, ActorContext, AuthorizationGroup, AuthorizationScope, Criterion, JudgeType,
    NewAuthorizationGroup,
};
pub use configuration::{ExpiringKind, ModerationConfigService, TriggerRemoval};
pub use expiry::{ExpiryConfig, ExpiryScheduler};
pub use ledger::ReprimandLedger;
pub use moderation_events::{ModerationEvent, ModerationEvents};
pub use moderation_models::*;
pub use moderation_service::{
    Actor, Authorized, Escalation, EscalationOutcome, IssueOutcome, IssueRequest,
    ModerationService, ReprimandResult, SkipReason,
};
pub use moderation_store::{ModerationError, ModerationStore, ValidationError};
pub use platform::{AuditAction, AuditEntry, AuditTrail, ModerationPlatform, PlatformError};
pub use reconciliation::{
    ModerationSignal, ReconcileOutcome, ReconciliationConfig, ReconciliationListener,
};
pub use triggers::{NewTrigger, Trigger, TriggerMode, TriggerSource};
