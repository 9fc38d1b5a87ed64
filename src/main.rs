// This is the entry point of the moderation bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (databases)
// - `discord/` = Discord-specific adapters (commands, events)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands and event handlers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

mod config;

use crate::config::BotConfig;
use crate::core::moderation::{
    ExpiryConfig, ExpiryScheduler, ModerationConfigService, ModerationEvents, ModerationService,
    ReconciliationConfig, ReconciliationListener, ReprimandLedger,
};
use crate::discord::moderation::gateway_events::handle_moderation_event;
use crate::discord::moderation::notifier::run_notifier;
use crate::discord::moderation::serenity_platform::SerenityPlatform;
use crate::discord::{Data, Error};
use crate::infra::moderation::SqliteModerationStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Event handler for non-command Discord events.
/// Native bans, kicks and timeouts are reconciled into the reprimand ledger here.
async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let Err(e) = handle_moderation_event(data, event).await {
        tracing::error!("Error handling moderation event: {:?}", e);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let config = BotConfig::from_env()?;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // The store and event bus exist before we connect. Everything that talks to
    // Discord is wired in `setup`, once the HTTP client and our own user id exist.

    let store = Arc::new(SqliteModerationStore::connect(&config.database_path).await?);
    let events = ModerationEvents::new(config.event_channel_capacity);

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::GUILD_MODERATION;

    let setup_config = config.clone();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: discord::commands::all_commands(),
            // Event handler for gateway events
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            on_error: |error| {
                Box::pin(async move {
                    if let poise::FrameworkError::Command { error, ctx, .. } = error {
                        tracing::warn!(
                            command = %ctx.command().qualified_name,
                            "Command failed: {}",
                            error
                        );
                        let _ = ctx.say(format!("❌ {}", error)).await;
                    } else if let Err(e) = poise::builtins::on_error(error).await {
                        tracing::error!("Error while handling error: {}", e);
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                let config = setup_config;
                tracing::info!("🤖 Bot is starting up as {}", ready.user.name);

                // Guild registration updates instantly; global registration can take an hour.
                match config.dev_guild_id {
                    Some(guild_id) => {
                        poise::builtins::register_in_guild(
                            ctx,
                            &framework.options().commands,
                            serenity::GuildId::new(guild_id),
                        )
                        .await?
                    }
                    None => {
                        poise::builtins::register_globally(ctx, &framework.options().commands)
                            .await?
                    }
                }
                tracing::info!("✅ Commands registered!");

                let bot_user_id = ready.user.id.get();
                let platform = Arc::new(SerenityPlatform::new(ctx.http.clone()));
                let ledger = Arc::new(ReprimandLedger::new(Arc::clone(&store), events.clone()));

                let scheduler = ExpiryScheduler::new(
                    Arc::clone(&ledger),
                    Arc::clone(&platform),
                    ExpiryConfig {
                        sweep_interval: config.expiry_sweep_interval,
                        lookahead: chrono::Duration::from_std(config.expiry_lookahead)?,
                        system_user_id: bot_user_id,
                    },
                );
                let moderation = Arc::new(ModerationService::new(
                    ledger,
                    Arc::clone(&platform),
                    Arc::clone(&scheduler),
                ));
                let reconciliation = Arc::new(ReconciliationListener::new(
                    Arc::clone(&moderation),
                    platform,
                    ReconciliationConfig {
                        window: chrono::Duration::from_std(config.audit_log_window)?,
                        bot_user_id,
                    },
                ));
                let moderation_config = Arc::new(ModerationConfigService::new(store));

                // Mod-log notifier: posts every ledger change to the guild's log channel.
                tokio::spawn(run_notifier(
                    ctx.http.clone(),
                    Arc::clone(&moderation_config),
                    events.subscribe(),
                ));

                // Expiry scheduler: re-arms everything still running, then sweeps periodically.
                tokio::spawn(scheduler.run());

                tracing::info!("🚀 Bot is ready!");
                Ok(Data {
                    moderation,
                    config: moderation_config,
                    reconciliation,
                    bot_user_id,
                })
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .await?;

    client.start().await?;
    Ok(())
}
