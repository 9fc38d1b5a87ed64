// Reprimand slash commands - issuing, lifting and reviewing moderation actions.

use super::{authorize, category_id, guild_id, reply_denied};
use crate::core::moderation::{
    Authorized, AuthorizationScope, Escalation, EscalationOutcome, IssueOutcome, IssueRequest,
    Reprimand, ReprimandAction, ReprimandId, ReprimandSource, SkipReason,
};
use crate::discord::moderation::actor::actor_for;
use crate::discord::moderation::moderation_formatter::{reprimand_embed, summarize};
use crate::discord::{Context, Error};
use chrono::Duration;
use poise::serenity_prelude::{self as serenity, Mentionable};

/// Most reprimands shown by `/reprimand history`.
const HISTORY_LIMIT: usize = 15;

/// Moderation reprimands.
///
/// Warn, mute, kick or ban members and manage their records.
#[poise::command(
    slash_command,
    subcommands(
        "warn",
        "notice",
        "note",
        "mute",
        "timeout",
        "kick",
        "ban",
        "pardon",
        "delete_reprimand",
        "edit_reason",
        "history"
    ),
    guild_only
)]
pub async fn reprimand(_ctx: Context<'_>) -> Result<(), Error> {
    // Parent command - shows help
    Ok(())
}

fn escalation_line(escalation: &Escalation) -> String {
    let header = format!(
        "Trigger `#{}` ({} {} at {})",
        escalation.trigger.id,
        escalation.trigger.source.as_str(),
        escalation.trigger.mode.as_str(),
        escalation.count
    );
    match &escalation.outcome {
        EscalationOutcome::Issued(reprimand) => format!("{}\n{}", header, summarize(reprimand)),
        EscalationOutcome::Denied => format!(
            "{}\nYou are not authorized to issue the {} it calls for.",
            header,
            escalation.trigger.action.kind()
        ),
        EscalationOutcome::Skipped(SkipReason::AlreadyActive(active)) => format!(
            "{}\nSkipped, reprimand `#{}` is still running.",
            header, active.id
        ),
        EscalationOutcome::Skipped(SkipReason::NothingToChange) => {
            format!("{}\nSkipped, nothing to change.", header)
        }
        EscalationOutcome::Failed(error) => format!("{}\n⚠️ Failed: {}", header, error),
    }
}

async fn issue(
    ctx: Context<'_>,
    user: &serenity::User,
    action: ReprimandAction,
    reason: Option<String>,
    category: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let category_id = category_id(ctx, guild_id, category.as_deref()).await?;
    let actor = actor_for(ctx).await?;

    let outcome = ctx
        .data()
        .moderation
        .issue(IssueRequest {
            guild_id,
            user_id: user.id.get(),
            actor,
            action,
            category_id,
            reason,
            source: ReprimandSource::Command,
        })
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    match outcome {
        IssueOutcome::Issued(result) => {
            let mut embed = reprimand_embed(
                &format!("{} issued", result.primary.kind()),
                &result.primary,
            );
            if let Some(escalation) = &result.escalation {
                embed = embed.field("Escalation", escalation_line(escalation), false);
            }
            ctx.send(poise::CreateReply::default().embed(embed)).await?;
        }
        IssueOutcome::Denied => reply_denied(ctx).await?,
        IssueOutcome::Skipped(SkipReason::AlreadyActive(active)) => {
            ctx.say(format!(
                "⚠️ {} already has an active {} (`#{}`). Turn on replace mutes to override it.",
                user.mention(),
                active.kind(),
                active.id
            ))
            .await?;
        }
        IssueOutcome::Skipped(SkipReason::NothingToChange) => {
            ctx.say("Nothing to change, the member's roles already match.")
                .await?;
        }
    }
    Ok(())
}

/// Warn a member.
#[poise::command(slash_command, guild_only)]
pub async fn warn(
    ctx: Context<'_>,
    #[description = "Member to warn"] user: serenity::User,
    #[description = "Why"] reason: Option<String>,
    #[description = "How many warnings this counts as (default: 1)"]
    #[min = 1]
    count: Option<u32>,
    #[description = "Moderation category"] category: Option<String>,
) -> Result<(), Error> {
    let action = ReprimandAction::Warning {
        count: count.unwrap_or(1),
    };
    issue(ctx, &user, action, reason, category).await
}

/// Give a member a notice.
#[poise::command(slash_command, guild_only)]
pub async fn notice(
    ctx: Context<'_>,
    #[description = "Member to notify"] user: serenity::User,
    #[description = "Why"] reason: Option<String>,
    #[description = "Moderation category"] category: Option<String>,
) -> Result<(), Error> {
    issue(ctx, &user, ReprimandAction::Notice, reason, category).await
}

/// Add a note to a member's record.
#[poise::command(slash_command, guild_only)]
pub async fn note(
    ctx: Context<'_>,
    #[description = "Member"] user: serenity::User,
    #[description = "Note"] reason: String,
    #[description = "Moderation category"] category: Option<String>,
) -> Result<(), Error> {
    issue(ctx, &user, ReprimandAction::Note, Some(reason), category).await
}

/// Mute a member with the mute role.
#[poise::command(slash_command, guild_only)]
pub async fn mute(
    ctx: Context<'_>,
    #[description = "Member to mute"] user: serenity::User,
    #[description = "Length in minutes (default: permanent)"] minutes: Option<u32>,
    #[description = "Why"] reason: Option<String>,
    #[description = "Moderation category"] category: Option<String>,
) -> Result<(), Error> {
    let action = ReprimandAction::Mute {
        length: minutes.map(|m| Duration::minutes(i64::from(m))),
    };
    issue(ctx, &user, action, reason, category).await
}

/// Time out a member.
#[poise::command(slash_command, guild_only)]
pub async fn timeout(
    ctx: Context<'_>,
    #[description = "Member to time out"] user: serenity::User,
    #[description = "Length in minutes (max: 28 days)"] minutes: u32,
    #[description = "Why"] reason: Option<String>,
    #[description = "Moderation category"] category: Option<String>,
) -> Result<(), Error> {
    let action = ReprimandAction::Timeout {
        length: Duration::minutes(i64::from(minutes)),
    };
    issue(ctx, &user, action, reason, category).await
}

/// Kick a member.
#[poise::command(slash_command, guild_only)]
pub async fn kick(
    ctx: Context<'_>,
    #[description = "Member to kick"] user: serenity::User,
    #[description = "Why"] reason: Option<String>,
    #[description = "Moderation category"] category: Option<String>,
) -> Result<(), Error> {
    issue(ctx, &user, ReprimandAction::Kick, reason, category).await
}

/// Ban a user, optionally for a limited time.
#[poise::command(slash_command, guild_only)]
pub async fn ban(
    ctx: Context<'_>,
    #[description = "User to ban"] user: serenity::User,
    #[description = "Length in days (default: permanent)"] days: Option<u32>,
    #[description = "Delete their messages from the last N days (0-7)"]
    #[max = 7]
    delete_days: Option<u32>,
    #[description = "Why"] reason: Option<String>,
    #[description = "Moderation category"] category: Option<String>,
) -> Result<(), Error> {
    let action = ReprimandAction::Ban {
        delete_days: delete_days.unwrap_or(0),
        length: days.map(|d| Duration::days(i64::from(d))),
    };
    issue(ctx, &user, action, reason, category).await
}

async fn reply_modified(
    ctx: Context<'_>,
    title: &str,
    result: Authorized<Reprimand>,
) -> Result<(), Error> {
    match result {
        Authorized::Granted(reprimand) => {
            ctx.send(poise::CreateReply::default().embed(reprimand_embed(title, &reprimand)))
                .await?;
            Ok(())
        }
        Authorized::Denied => reply_denied(ctx).await,
    }
}

/// Pardon an active reprimand and lift its effect.
#[poise::command(slash_command, guild_only)]
pub async fn pardon(
    ctx: Context<'_>,
    #[description = "Reprimand ID"] id: i64,
    #[description = "Why"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let actor = actor_for(ctx).await?;
    let result = ctx
        .data()
        .moderation
        .pardon(guild_id, ReprimandId(id), &actor, reason)
        .await
        .map_err(|e| Error::from(e.to_string()))?;
    reply_modified(ctx, "Reprimand pardoned", result).await
}

/// Delete a reprimand from the record.
#[poise::command(slash_command, guild_only, rename = "delete")]
pub async fn delete_reprimand(
    ctx: Context<'_>,
    #[description = "Reprimand ID"] id: i64,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let actor = actor_for(ctx).await?;
    let result = ctx
        .data()
        .moderation
        .delete(guild_id, ReprimandId(id), &actor)
        .await
        .map_err(|e| Error::from(e.to_string()))?;
    reply_modified(ctx, "Reprimand deleted", result).await
}

/// Change the reason of a reprimand.
#[poise::command(slash_command, guild_only, rename = "reason")]
pub async fn edit_reason(
    ctx: Context<'_>,
    #[description = "Reprimand ID"] id: i64,
    #[description = "New reason (leave empty to clear)"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let actor = actor_for(ctx).await?;
    let result = ctx
        .data()
        .moderation
        .update_reason(guild_id, ReprimandId(id), &actor, reason)
        .await
        .map_err(|e| Error::from(e.to_string()))?;
    reply_modified(ctx, "Reason updated", result).await
}

/// Show a member's reprimands.
#[poise::command(slash_command, guild_only)]
pub async fn history(
    ctx: Context<'_>,
    #[description = "Member"] user: serenity::User,
    #[description = "Category, `all` or `none` (default: all)"] category: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let filter = ctx
        .data()
        .config
        .resolve_filter(guild_id, category.as_deref())
        .await
        .map_err(|e| Error::from(e.to_string()))?
        .ok_or_else(|| format!("Unknown category `{}`", category.unwrap_or_default()))?;

    if !authorize(ctx, AuthorizationScope::HISTORY, None).await? {
        return Ok(());
    }

    let reprimands = ctx
        .data()
        .moderation
        .ledger()
        .history(guild_id, user.id.get(), filter)
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    let active = reprimands.iter().filter(|r| r.is_active()).count();
    let description = if reprimands.is_empty() {
        "No reprimands on record.".to_string()
    } else {
        let mut lines: Vec<String> = reprimands
            .iter()
            .take(HISTORY_LIMIT)
            .map(summarize)
            .collect();
        if reprimands.len() > HISTORY_LIMIT {
            lines.push(format!("…and {} more", reprimands.len() - HISTORY_LIMIT));
        }
        let mut text = lines.join("\n");
        if text.len() > 4000 {
            let mut cut = 4000;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("...");
        }
        text
    };

    let embed = serenity::CreateEmbed::new()
        .title(format!("📋 History for {}", user.name))
        .color(0x3498DB)
        .description(description)
        .field("Total", reprimands.len().to_string(), true)
        .field("Active", active.to_string(), true);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

async fn reply_lifted(
    ctx: Context<'_>,
    user: &serenity::User,
    verb: &str,
    result: Authorized<Option<Reprimand>>,
) -> Result<(), Error> {
    match result {
        Authorized::Granted(Some(reprimand)) => {
            let title = format!("{} {}", user.name, verb);
            ctx.send(poise::CreateReply::default().embed(reprimand_embed(&title, &reprimand)))
                .await?;
        }
        Authorized::Granted(None) => {
            ctx.say(format!("✅ {} {} (no reprimand was on record).", user.mention(), verb))
                .await?;
        }
        Authorized::Denied => reply_denied(ctx).await?,
    }
    Ok(())
}

/// Unban a user.
#[poise::command(slash_command, guild_only)]
pub async fn unban(
    ctx: Context<'_>,
    #[description = "User to unban"] user: serenity::User,
    #[description = "Why"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let actor = actor_for(ctx).await?;
    let result = ctx
        .data()
        .moderation
        .unban(guild_id, user.id.get(), &actor, reason)
        .await
        .map_err(|e| Error::from(e.to_string()))?;
    reply_lifted(ctx, &user, "unbanned", result).await
}

/// Remove a member's mute.
#[poise::command(slash_command, guild_only)]
pub async fn unmute(
    ctx: Context<'_>,
    #[description = "Member to unmute"] user: serenity::User,
    #[description = "Why"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let actor = actor_for(ctx).await?;
    let result = ctx
        .data()
        .moderation
        .unmute(guild_id, user.id.get(), &actor, reason)
        .await
        .map_err(|e| Error::from(e.to_string()))?;
    reply_lifted(ctx, &user, "unmuted", result).await
}

/// Remove a member's timeout.
#[poise::command(slash_command, guild_only)]
pub async fn untimeout(
    ctx: Context<'_>,
    #[description = "Member"] user: serenity::User,
    #[description = "Why"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let actor = actor_for(ctx).await?;
    let result = ctx
        .data()
        .moderation
        .untimeout(guild_id, user.id.get(), &actor, reason)
        .await
        .map_err(|e| Error::from(e.to_string()))?;
    reply_lifted(ctx, &user, "is no longer timed out", result).await
}
