// Implementations for the moderation system.

pub mod sqlite_moderation_store;

// Re-export for convenience
pub use sqlite_moderation_store::SqliteModerationStore;
