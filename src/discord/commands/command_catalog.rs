// Discord commands module.
// Each feature gets its own command file.

pub mod authorization;
pub mod moderation_config;
pub mod reprimand;
pub mod temporary_roles;
pub mod triggers;

use crate::core::moderation::{
    AuthorizationScope, CategoryFilter, CategoryId, ModerationConfigService, ModerationService,
    ReconciliationListener,
};
use crate::discord::moderation::actor::actor_for;
use crate::discord::moderation::serenity_platform::SerenityPlatform;
use crate::infra::moderation::SqliteModerationStore;
use std::sync::Arc;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

pub type Moderation = ModerationService<SqliteModerationStore, SerenityPlatform>;
pub type Reconciliation =
    ReconciliationListener<SqliteModerationStore, SerenityPlatform, SerenityPlatform>;

/// Shared state available to every command and event handler.
pub struct Data {
    pub moderation: Arc<Moderation>,
    pub config: Arc<ModerationConfigService<SqliteModerationStore>>,
    pub reconciliation: Arc<Reconciliation>,
    /// Recorded as the author of seeded configuration.
    pub bot_user_id: u64,
}

/// Every command this bot registers.
pub fn all_commands() -> Vec<poise::Command<Data, Error>> {
    vec![
        reprimand::reprimand(),
        reprimand::unban(),
        reprimand::unmute(),
        reprimand::untimeout(),
        triggers::trigger(),
        authorization::authorization(),
        moderation_config::category(),
        moderation_config::modconfig(),
        temporary_roles::temprole(),
    ]
}

pub fn guild_id(ctx: Context<'_>) -> Result<u64, Error> {
    Ok(ctx.guild_id().ok_or("Must be used in a server")?.get())
}

/// Turns an optional category name into the category it names.
/// `None`, `all`, `none` and `default` all mean uncategorised.
pub async fn category_id(
    ctx: Context<'_>,
    guild_id: u64,
    name: Option<&str>,
) -> Result<Option<CategoryId>, Error> {
    match ctx
        .data()
        .config
        .resolve_filter(guild_id, name)
        .await
        .map_err(|e| Error::from(e.to_string()))?
    {
        Some(CategoryFilter::Only(id)) => Ok(Some(id)),
        Some(_) => Ok(None),
        None => Err(format!("Unknown category `{}`", name.unwrap_or_default()).into()),
    }
}

pub async fn reply_denied(ctx: Context<'_>) -> Result<(), Error> {
    ctx.send(
        poise::CreateReply::default()
            .content("❌ You are not authorized to do that here.")
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Checks the invoker against the guild's authorization groups and replies when denied.
pub async fn authorize(
    ctx: Context<'_>,
    scope: AuthorizationScope,
    category: Option<CategoryId>,
) -> Result<bool, Error> {
    let guild_id = guild_id(ctx)?;
    let actor = actor_for(ctx).await?;
    let allowed = ctx
        .data()
        .moderation
        .authorize(guild_id, &actor, scope, category)
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    if !allowed {
        reply_denied(ctx).await?;
    }
    Ok(allowed)
}
