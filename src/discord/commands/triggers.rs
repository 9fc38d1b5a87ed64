// Trigger slash commands - escalation thresholds per guild.

use super::{authorize, category_id, guild_id};
use crate::core::moderation::{
    AuthorizationScope, NewTrigger, ReprimandAction, RoleBehavior, RoleTemplate, Trigger,
    TriggerId, TriggerMode, TriggerRemoval, TriggerSource,
};
use crate::discord::moderation::moderation_formatter::format_length;
use crate::discord::{Context, Error};
use chrono::{Duration, Utc};
use poise::serenity_prelude as serenity;

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum TriggerSourceChoice {
    Warning,
    Notice,
    Ban,
    Kick,
    Mute,
    Censor,
}

impl From<TriggerSourceChoice> for TriggerSource {
    fn from(value: TriggerSourceChoice) -> Self {
        match value {
            TriggerSourceChoice::Warning => TriggerSource::Warning,
            TriggerSourceChoice::Notice => TriggerSource::Notice,
            TriggerSourceChoice::Ban => TriggerSource::Ban,
            TriggerSourceChoice::Kick => TriggerSource::Kick,
            TriggerSourceChoice::Mute => TriggerSource::Mute,
            TriggerSourceChoice::Censor => TriggerSource::Censor,
        }
    }
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum TriggerModeChoice {
    #[name = "Exactly at the amount"]
    Exact,
    #[name = "At or above the amount"]
    Retroactive,
    #[name = "Every multiple of the amount"]
    Multiple,
}

impl From<TriggerModeChoice> for TriggerMode {
    fn from(value: TriggerModeChoice) -> Self {
        match value {
            TriggerModeChoice::Exact => TriggerMode::Exact,
            TriggerModeChoice::Retroactive => TriggerMode::Retroactive,
            TriggerModeChoice::Multiple => TriggerMode::Multiple,
        }
    }
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum TriggerActionChoice {
    Notice,
    Warning,
    Mute,
    Timeout,
    Kick,
    Ban,
    #[name = "Add Role"]
    AddRole,
    #[name = "Remove Role"]
    RemoveRole,
}

/// Builds the reprimand a trigger issues from the command options.
fn trigger_action(
    choice: TriggerActionChoice,
    minutes: Option<u32>,
    role: Option<&serenity::Role>,
) -> Result<ReprimandAction, Error> {
    let length = minutes.map(|m| Duration::minutes(i64::from(m)));
    let role_template = |behavior| -> Result<ReprimandAction, Error> {
        let role = role.ok_or("This action needs a role")?;
        Ok(ReprimandAction::Roles {
            templates: vec![RoleTemplate {
                role_id: role.id.get(),
                behavior,
            }],
            length,
        })
    };

    Ok(match choice {
        TriggerActionChoice::Notice => ReprimandAction::Notice,
        TriggerActionChoice::Warning => ReprimandAction::Warning { count: 1 },
        TriggerActionChoice::Mute => ReprimandAction::Mute { length },
        TriggerActionChoice::Timeout => ReprimandAction::Timeout {
            length: length.ok_or("A timeout needs a length")?,
        },
        TriggerActionChoice::Kick => ReprimandAction::Kick,
        TriggerActionChoice::Ban => ReprimandAction::Ban {
            delete_days: 0,
            length,
        },
        TriggerActionChoice::AddRole => role_template(RoleBehavior::Add)?,
        TriggerActionChoice::RemoveRole => role_template(RoleBehavior::Remove)?,
    })
}

fn describe(trigger: &Trigger) -> String {
    let mut line = format!(
        "`#{}` {} **{}** {} → **{}**",
        trigger.id,
        trigger.mode.as_str(),
        trigger.amount,
        trigger.source.as_str(),
        trigger.action.kind()
    );
    if let Some(length) = trigger.action.requested_length() {
        line.push_str(&format!(" ({})", format_length(length)));
    }
    if let Some(cooldown) = trigger.cooldown {
        line.push_str(&format!(", cooldown {}", format_length(cooldown)));
    }
    if trigger.category_id.is_some() {
        line.push_str(" [category]");
    }
    if !trigger.is_active {
        line.push_str(" *(disabled)*");
    }
    line
}

/// Escalation triggers.
///
/// Issue an extra reprimand once a member collects enough of another kind.
#[poise::command(
    slash_command,
    subcommands("add", "list", "toggle", "remove"),
    guild_only
)]
pub async fn trigger(_ctx: Context<'_>) -> Result<(), Error> {
    // Parent command - shows help
    Ok(())
}

/// Add a trigger.
#[poise::command(slash_command, guild_only)]
pub async fn add(
    ctx: Context<'_>,
    #[description = "What to count"] source: TriggerSourceChoice,
    #[description = "How many"]
    #[min = 1]
    amount: u32,
    #[description = "What to do"] action: TriggerActionChoice,
    #[description = "When to fire (default: exactly at the amount)"] mode: Option<
        TriggerModeChoice,
    >,
    #[description = "Length of the mute, timeout, ban or role in minutes"] minutes: Option<u32>,
    #[description = "Role for role actions"] role: Option<serenity::Role>,
    #[description = "Minutes before the trigger may fire again for the same member"]
    cooldown_minutes: Option<u32>,
    #[description = "Moderation category"] category: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let category_id = category_id(ctx, guild_id, category.as_deref()).await?;
    if !authorize(ctx, AuthorizationScope::CONFIGURATION, category_id).await? {
        return Ok(());
    }

    let trigger = ctx
        .data()
        .config
        .add_trigger(NewTrigger {
            guild_id,
            category_id,
            source: source.into(),
            amount: u64::from(amount),
            mode: mode.unwrap_or(TriggerModeChoice::Exact).into(),
            cooldown: cooldown_minutes.map(|m| Duration::minutes(i64::from(m))),
            action: trigger_action(action, minutes, role.as_ref())?,
            moderator_id: ctx.author().id.get(),
            created_at: Utc::now(),
        })
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.say(format!("✅ Trigger added: {}", describe(&trigger)))
        .await?;
    Ok(())
}

/// List this server's triggers.
#[poise::command(slash_command, guild_only)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    if !authorize(ctx, AuthorizationScope::CONFIGURATION, None).await? {
        return Ok(());
    }

    let triggers = ctx
        .data()
        .config
        .triggers(guild_id)
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    let description = if triggers.is_empty() {
        "No triggers configured.".to_string()
    } else {
        triggers.iter().map(describe).collect::<Vec<_>>().join("\n")
    };

    let embed = serenity::CreateEmbed::new()
        .title("⚡ Triggers")
        .color(0xF1C40F)
        .description(description);
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Enable or disable a trigger.
#[poise::command(slash_command, guild_only)]
pub async fn toggle(
    ctx: Context<'_>,
    #[description = "Trigger ID"] id: i64,
    #[description = "Whether the trigger fires"] enabled: bool,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    if !authorize(ctx, AuthorizationScope::CONFIGURATION, None).await? {
        return Ok(());
    }

    let trigger = ctx
        .data()
        .config
        .set_trigger_active(guild_id, TriggerId(id), enabled, ctx.author().id.get())
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.say(format!("✅ {}", describe(&trigger))).await?;
    Ok(())
}

/// Remove a trigger. Triggers that already fired are disabled instead.
#[poise::command(slash_command, guild_only)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Trigger ID"] id: i64,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    if !authorize(ctx, AuthorizationScope::CONFIGURATION, None).await? {
        return Ok(());
    }

    let removal = ctx
        .data()
        .config
        .remove_trigger(guild_id, TriggerId(id), ctx.author().id.get())
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    let message = match removal {
        TriggerRemoval::Deleted(trigger) => format!("🗑️ Trigger `#{}` deleted.", trigger.id),
        TriggerRemoval::Disabled(trigger) => format!(
            "Trigger `#{}` has issued reprimands, so it was disabled instead of deleted.",
            trigger.id
        ),
    };
    ctx.say(message).await?;
    Ok(())
}
