// Runtime configuration, read from the environment (and `.env` via dotenv).

use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub discord_token: String,
    pub database_path: String,
    /// Register commands in this guild only, for instant updates while developing.
    pub dev_guild_id: Option<u64>,
    pub expiry_sweep_interval: Duration,
    pub expiry_lookahead: Duration,
    pub audit_log_window: Duration,
    pub event_channel_capacity: usize,
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("{} must be a whole number, got `{}`", key, value)),
                None => Ok(default),
            }
        };

        let discord_token = lookup("DISCORD_TOKEN").context(
            "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
        )?;
        let dev_guild_id = match lookup("DEV_GUILD_ID") {
            Some(value) => Some(
                value
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("DEV_GUILD_ID must be a guild id, got `{}`", value))?,
            ),
            None => None,
        };

        Ok(Self {
            discord_token,
            database_path: lookup("MODERATION_DB_PATH")
                .unwrap_or_else(|| "data/moderation.db".to_string()),
            dev_guild_id,
            expiry_sweep_interval: Duration::from_secs(number("EXPIRY_SWEEP_INTERVAL_SECS", 300)?),
            expiry_lookahead: Duration::from_secs(number("EXPIRY_LOOKAHEAD_SECS", 600)?),
            audit_log_window: Duration::from_secs(number("AUDIT_LOG_WINDOW_SECS", 60)?),
            event_channel_capacity: number("EVENT_CHANNEL_CAPACITY", 256)? as usize,
        })
    }
}
