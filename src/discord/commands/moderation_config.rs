// Moderation configuration commands - categories and guild-wide rules.

use super::{authorize, guild_id};
use crate::core::moderation::{
    AuthorizationScope, CategoryFilter, ExpiringKind, ModerationCategory, ModerationRules,
};
use crate::discord::moderation::moderation_formatter::format_length;
use crate::discord::{Context, Error};
use chrono::Duration;
use poise::serenity_prelude as serenity;

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum ExpiringKindChoice {
    Notice,
    Warning,
    Censor,
}

impl From<ExpiringKindChoice> for ExpiringKind {
    fn from(value: ExpiringKindChoice) -> Self {
        match value {
            ExpiringKindChoice::Notice => ExpiringKind::Notice,
            ExpiringKindChoice::Warning => ExpiringKind::Warning,
            ExpiringKindChoice::Censor => ExpiringKind::Censored,
        }
    }
}

fn show_length(length: Option<Duration>) -> String {
    length.map(format_length).unwrap_or_else(|| "never".to_string())
}

fn show_role(role_id: Option<u64>) -> String {
    role_id
        .map(|id| format!("<@&{}>", id))
        .unwrap_or_else(|| "not set".to_string())
}

fn rules_embed(rules: &ModerationRules) -> serenity::CreateEmbed {
    serenity::CreateEmbed::new()
        .title("🛠️ Moderation Settings")
        .color(0x1ABC9C)
        .field("Mute Role", show_role(rules.mute_role_id), true)
        .field(
            "Replace Mutes",
            if rules.replace_mutes { "Yes" } else { "No" },
            true,
        )
        .field(
            "Log Channel",
            rules
                .log_channel_id
                .map(|id| format!("<#{}>", id))
                .unwrap_or_else(|| "not set".to_string()),
            true,
        )
        .field("Notice Expiry", show_length(rules.notice_expiry), true)
        .field("Warning Expiry", show_length(rules.warning_expiry), true)
        .field("Censor Expiry", show_length(rules.censored_expiry), true)
}

fn describe_category(category: &ModerationCategory) -> String {
    let mut overrides = Vec::new();
    if category.mute_role_id.is_some() {
        overrides.push(format!("mute role {}", show_role(category.mute_role_id)));
    }
    if let Some(replace) = category.replace_mutes {
        overrides.push(format!("replace mutes {}", if replace { "on" } else { "off" }));
    }
    if let Some(length) = category.notice_expiry {
        overrides.push(format!("notices expire after {}", format_length(length)));
    }
    if let Some(length) = category.warning_expiry {
        overrides.push(format!("warnings expire after {}", format_length(length)));
    }
    if let Some(length) = category.censored_expiry {
        overrides.push(format!("censors expire after {}", format_length(length)));
    }

    if overrides.is_empty() {
        format!("`#{}` **{}**", category.id, category.name)
    } else {
        format!("`#{}` **{}**: {}", category.id, category.name, overrides.join(", "))
    }
}

async fn find_category(
    ctx: Context<'_>,
    guild_id: u64,
    name: &str,
) -> Result<ModerationCategory, Error> {
    match ctx
        .data()
        .config
        .resolve_filter(guild_id, Some(name))
        .await
        .map_err(|e| Error::from(e.to_string()))?
    {
        Some(CategoryFilter::Only(id)) => ctx
            .data()
            .config
            .category(guild_id, id)
            .await
            .map_err(|e| Error::from(e.to_string())),
        _ => Err(format!("Unknown category `{}`", name).into()),
    }
}

/// Moderation categories.
///
/// Categories keep separate counts, triggers and overrides for different kinds of rules.
#[poise::command(
    slash_command,
    subcommands("create", "list", "delete_category", "set"),
    guild_only
)]
pub async fn category(_ctx: Context<'_>) -> Result<(), Error> {
    // Parent command - shows help
    Ok(())
}

/// Create a category.
#[poise::command(slash_command, guild_only)]
pub async fn create(
    ctx: Context<'_>,
    #[description = "Category name"] name: String,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    if !authorize(ctx, AuthorizationScope::CONFIGURATION, None).await? {
        return Ok(());
    }

    let category = ctx
        .data()
        .config
        .create_category(guild_id, &name, ctx.author().id.get())
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.say(format!("✅ Category created: {}", describe_category(&category)))
        .await?;
    Ok(())
}

/// List categories.
#[poise::command(slash_command, guild_only)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    if !authorize(ctx, AuthorizationScope::CONFIGURATION, None).await? {
        return Ok(());
    }

    let categories = ctx
        .data()
        .config
        .categories(guild_id)
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    let description = if categories.is_empty() {
        "No categories yet.".to_string()
    } else {
        categories
            .iter()
            .map(describe_category)
            .collect::<Vec<_>>()
            .join("\n")
    };

    let embed = serenity::CreateEmbed::new()
        .title("🗂️ Moderation Categories")
        .color(0x1ABC9C)
        .description(description);
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Delete a category. Its reprimands and triggers become uncategorised.
#[poise::command(slash_command, guild_only, rename = "delete")]
pub async fn delete_category(
    ctx: Context<'_>,
    #[description = "Category name"] name: String,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let category = find_category(ctx, guild_id, &name).await?;
    if !authorize(ctx, AuthorizationScope::CONFIGURATION, Some(category.id)).await? {
        return Ok(());
    }

    ctx.data()
        .config
        .delete_category(guild_id, category.id)
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.say(format!("🗑️ Category **{}** deleted.", category.name))
        .await?;
    Ok(())
}

/// Override guild settings for a category.
#[poise::command(slash_command, guild_only)]
pub async fn set(
    ctx: Context<'_>,
    #[description = "Category name"] name: String,
    #[description = "Mute role for this category"] mute_role: Option<serenity::Role>,
    #[description = "Whether new mutes replace running ones"] replace_mutes: Option<bool>,
    #[description = "Which reprimands expire"] expiring: Option<ExpiringKindChoice>,
    #[description = "Days until they expire (0 to follow the guild)"] expiry_days: Option<u32>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let category = find_category(ctx, guild_id, &name).await?;
    if !authorize(ctx, AuthorizationScope::CONFIGURATION, Some(category.id)).await? {
        return Ok(());
    }

    let expiry = match (expiring, expiry_days) {
        (Some(kind), Some(days)) => Some((
            ExpiringKind::from(kind),
            (days > 0).then(|| Duration::days(i64::from(days))),
        )),
        (None, None) => None,
        _ => return Err("Set both `expiring` and `expiry_days` together".into()),
    };

    let category = ctx
        .data()
        .config
        .edit_category(guild_id, category.id, |category| {
            if let Some(role) = mute_role {
                category.mute_role_id = Some(role.id.get());
            }
            if let Some(replace) = replace_mutes {
                category.replace_mutes = Some(replace);
            }
            if let Some((kind, length)) = expiry {
                let slot = match kind {
                    ExpiringKind::Notice => &mut category.notice_expiry,
                    ExpiringKind::Warning => &mut category.warning_expiry,
                    ExpiringKind::Censored => &mut category.censored_expiry,
                };
                *slot = length;
            }
        })
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.say(format!("✅ {}", describe_category(&category)))
        .await?;
    Ok(())
}

/// Guild-wide moderation settings.
#[poise::command(
    slash_command,
    subcommands("show", "mute_role", "replace_mutes", "log_channel", "expiry"),
    guild_only
)]
pub async fn modconfig(_ctx: Context<'_>) -> Result<(), Error> {
    // Parent command - shows help
    Ok(())
}

/// Show the current settings.
#[poise::command(slash_command, guild_only)]
pub async fn show(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    if !authorize(ctx, AuthorizationScope::CONFIGURATION, None).await? {
        return Ok(());
    }

    let rules = ctx
        .data()
        .config
        .rules(guild_id)
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.send(poise::CreateReply::default().embed(rules_embed(&rules)))
        .await?;
    Ok(())
}

/// Set or clear the role used for mutes.
#[poise::command(slash_command, guild_only)]
pub async fn mute_role(
    ctx: Context<'_>,
    #[description = "Mute role (leave empty to clear)"] role: Option<serenity::Role>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    if !authorize(ctx, AuthorizationScope::CONFIGURATION, None).await? {
        return Ok(());
    }

    let rules = ctx
        .data()
        .config
        .set_mute_role(guild_id, role.map(|r| r.id.get()))
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.send(poise::CreateReply::default().embed(rules_embed(&rules)))
        .await?;
    Ok(())
}

/// Whether a new mute replaces a running one.
#[poise::command(slash_command, guild_only)]
pub async fn replace_mutes(
    ctx: Context<'_>,
    #[description = "Replace running mutes"] enabled: bool,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    if !authorize(ctx, AuthorizationScope::CONFIGURATION, None).await? {
        return Ok(());
    }

    let rules = ctx
        .data()
        .config
        .set_replace_mutes(guild_id, enabled)
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.send(poise::CreateReply::default().embed(rules_embed(&rules)))
        .await?;
    Ok(())
}

/// Set or clear the moderation log channel.
#[poise::command(slash_command, guild_only)]
pub async fn log_channel(
    ctx: Context<'_>,
    #[description = "Channel for moderation logs (leave empty to disable)"] channel: Option<
        serenity::Channel,
    >,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    if !authorize(ctx, AuthorizationScope::CONFIGURATION, None).await? {
        return Ok(());
    }

    let rules = ctx
        .data()
        .config
        .set_log_channel(guild_id, channel.map(|c| c.id().get()))
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.send(poise::CreateReply::default().embed(rules_embed(&rules)))
        .await?;
    Ok(())
}

/// How long notices, warnings or censors stay active.
#[poise::command(slash_command, guild_only)]
pub async fn expiry(
    ctx: Context<'_>,
    #[description = "Which reprimands"] kind: ExpiringKindChoice,
    #[description = "Days until they expire (0 to never expire)"] days: u32,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    if !authorize(ctx, AuthorizationScope::CONFIGURATION, None).await? {
        return Ok(());
    }

    let length = (days > 0).then(|| Duration::days(i64::from(days)));
    let rules = ctx
        .data()
        .config
        .set_expiry(guild_id, kind.into(), length)
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.send(poise::CreateReply::default().embed(rules_embed(&rules)))
        .await?;
    Ok(())
}
