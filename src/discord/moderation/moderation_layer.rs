// Discord side of moderation: the serenity platform adapter, the gateway bridge
// into reconciliation, and the mod-log notifier.

pub mod actor;
pub mod gateway_events;
pub mod moderation_formatter;
pub mod notifier;
pub mod serenity_platform;
