// Temporary role commands.

use super::{guild_id, reply_denied};
use crate::core::moderation::{Authorized, TemporaryRole};
use crate::discord::moderation::actor::actor_for;
use crate::discord::moderation::moderation_formatter::format_length;
use crate::discord::{Context, Error};
use chrono::Duration;
use poise::serenity_prelude as serenity;

/// Roles that go away on their own.
#[poise::command(slash_command, subcommands("grant", "expire"), guild_only)]
pub async fn temprole(_ctx: Context<'_>) -> Result<(), Error> {
    // Parent command - shows help
    Ok(())
}

async fn reply_scheduled(
    ctx: Context<'_>,
    result: Authorized<TemporaryRole>,
    message: impl FnOnce(&TemporaryRole) -> String,
) -> Result<(), Error> {
    match result {
        Authorized::Granted(role) => {
            let ends = role
                .expire_at
                .map(|at| format!(" <t:{}:R>", at.timestamp()))
                .unwrap_or_default();
            ctx.say(format!("⏳ {}{}", message(&role), ends)).await?;
            Ok(())
        }
        Authorized::Denied => reply_denied(ctx).await,
    }
}

/// Give a member a role for a while.
#[poise::command(slash_command, guild_only)]
pub async fn grant(
    ctx: Context<'_>,
    #[description = "Member"] user: serenity::User,
    #[description = "Role to give"] role: serenity::Role,
    #[description = "Minutes until it is removed"]
    #[min = 1]
    minutes: u32,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let actor = actor_for(ctx).await?;
    let result = ctx
        .data()
        .moderation
        .grant_temporary_role(
            guild_id,
            user.id.get(),
            role.id.get(),
            Duration::minutes(i64::from(minutes)),
            &actor,
        )
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    reply_scheduled(ctx, result, |granted| {
        format!(
            "<@{}> has <@&{}> for {}, ending",
            user.id,
            granted.role_id,
            format_length(granted.length)
        )
    })
    .await
}

/// Delete a role after a while.
#[poise::command(slash_command, guild_only)]
pub async fn expire(
    ctx: Context<'_>,
    #[description = "Role to delete"] role: serenity::Role,
    #[description = "Minutes until it is deleted"]
    #[min = 1]
    minutes: u32,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let actor = actor_for(ctx).await?;
    let result = ctx
        .data()
        .moderation
        .expire_role_after(
            guild_id,
            role.id.get(),
            Duration::minutes(i64::from(minutes)),
            &actor,
        )
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    reply_scheduled(ctx, result, |scheduled| {
        format!("<@&{}> will be deleted", scheduled.role_id)
    })
    .await
}
