// Authorization slash commands - who may run which moderation actions.

use super::{authorize, category_id, guild_id};
use crate::core::moderation::{
    AccessType, AuthorizationGroup, AuthorizationScope, Criterion, GroupId, JudgeType,
    NewAuthorizationGroup,
};
use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum AccessChoice {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum JudgeChoice {
    #[name = "Every criterion matches"]
    All,
    #[name = "Any criterion matches"]
    Any,
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum PermissionChoice {
    Administrator,
    #[name = "Manage Server"]
    ManageGuild,
    #[name = "Manage Roles"]
    ManageRoles,
    #[name = "Manage Messages"]
    ManageMessages,
    #[name = "Ban Members"]
    BanMembers,
    #[name = "Kick Members"]
    KickMembers,
    #[name = "Timeout Members"]
    ModerateMembers,
}

impl PermissionChoice {
    fn bits(self) -> u64 {
        let permission = match self {
            PermissionChoice::Administrator => serenity::Permissions::ADMINISTRATOR,
            PermissionChoice::ManageGuild => serenity::Permissions::MANAGE_GUILD,
            PermissionChoice::ManageRoles => serenity::Permissions::MANAGE_ROLES,
            PermissionChoice::ManageMessages => serenity::Permissions::MANAGE_MESSAGES,
            PermissionChoice::BanMembers => serenity::Permissions::BAN_MEMBERS,
            PermissionChoice::KickMembers => serenity::Permissions::KICK_MEMBERS,
            PermissionChoice::ModerateMembers => serenity::Permissions::MODERATE_MEMBERS,
        };
        permission.bits()
    }
}

fn describe_criterion(criterion: &Criterion) -> String {
    match criterion {
        Criterion::Permission(bits) => format!(
            "permission `{}`",
            serenity::Permissions::from_bits_truncate(*bits)
                .get_permission_names()
                .join(", ")
        ),
        Criterion::Role(id) => format!("<@&{}>", id),
        Criterion::Channel(id) => format!("<#{}>", id),
        Criterion::User(id) => format!("<@{}>", id),
    }
}

fn describe(group: &AuthorizationGroup) -> String {
    let criteria = group
        .criteria
        .iter()
        .map(describe_criterion)
        .collect::<Vec<_>>()
        .join(", ");
    let mut line = format!(
        "`#{}` **{}** {} when {} of: {}",
        group.id,
        group.access.as_str(),
        group.scope,
        group.judge.as_str(),
        criteria
    );
    if let Some(command) = &group.linked_command {
        line.push_str(&format!(" (only `/{}`)", command));
    }
    if group.category_id.is_some() {
        line.push_str(" [category]");
    }
    line
}

/// Moderation authorization groups.
///
/// Deny groups win over allow groups. Without a matching allow, actions are refused.
#[poise::command(slash_command, subcommands("add", "list", "remove"), guild_only)]
pub async fn authorization(_ctx: Context<'_>) -> Result<(), Error> {
    // Parent command - shows help
    Ok(())
}

/// Add an authorization group.
#[poise::command(slash_command, guild_only)]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Scopes, comma separated (e.g. `warning,mute` or `all`)"] scope: String,
    #[description = "Allow or deny"] access: AccessChoice,
    #[description = "How criteria combine (default: any)"] judge: Option<JudgeChoice>,
    #[description = "Members with this role"] role: Option<serenity::Role>,
    #[description = "This user"] user: Option<serenity::User>,
    #[description = "In this channel or category"] channel: Option<serenity::Channel>,
    #[description = "Members with this permission"] permission: Option<PermissionChoice>,
    #[description = "Only for this command, e.g. `reprimand ban`"] command: Option<String>,
    #[description = "Moderation category"] category: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let category_id = category_id(ctx, guild_id, category.as_deref()).await?;
    if !authorize(ctx, AuthorizationScope::CONFIGURATION, category_id).await? {
        return Ok(());
    }

    let scope = AuthorizationScope::parse(&scope)
        .ok_or_else(|| format!("Unknown scope in `{}`", scope))?;

    let mut criteria = Vec::new();
    if let Some(role) = role {
        criteria.push(Criterion::Role(role.id.get()));
    }
    if let Some(user) = user {
        criteria.push(Criterion::User(user.id.get()));
    }
    if let Some(channel) = channel {
        criteria.push(Criterion::Channel(channel.id().get()));
    }
    if let Some(permission) = permission {
        criteria.push(Criterion::Permission(permission.bits()));
    }

    let access = match access {
        AccessChoice::Allow => AccessType::Allow,
        AccessChoice::Deny => AccessType::Deny,
    };
    let judge = match judge.unwrap_or(JudgeChoice::Any) {
        JudgeChoice::All => JudgeType::All,
        JudgeChoice::Any => JudgeType::Any,
    };

    let group = NewAuthorizationGroup::new(
        guild_id,
        scope,
        access,
        judge,
        criteria,
        ctx.author().id.get(),
    )
    .map_err(|e| Error::from(e.to_string()))?
    .in_category(category_id)
    .linked_to(command.map(|c| c.trim().trim_start_matches('/').to_string()));

    let group = ctx
        .data()
        .config
        .add_group(group)
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.say(format!("✅ Authorization group added: {}", describe(&group)))
        .await?;
    Ok(())
}

/// List this server's authorization groups.
#[poise::command(slash_command, guild_only)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    if !authorize(ctx, AuthorizationScope::CONFIGURATION, None).await? {
        return Ok(());
    }

    let groups = ctx
        .data()
        .config
        .groups(guild_id)
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    let description = if groups.is_empty() {
        "No authorization groups. Nobody can moderate until one is added.".to_string()
    } else {
        groups.iter().map(describe).collect::<Vec<_>>().join("\n")
    };

    let embed = serenity::CreateEmbed::new()
        .title("🔐 Authorization Groups")
        .color(0x9B59B6)
        .description(description);
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Remove an authorization group.
#[poise::command(slash_command, guild_only)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Group ID"] id: i64,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    if !authorize(ctx, AuthorizationScope::CONFIGURATION, None).await? {
        return Ok(());
    }

    ctx.data()
        .config
        .remove_group(guild_id, GroupId(id))
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.say(format!("🗑️ Authorization group `#{}` removed.", id))
        .await?;
    Ok(())
}
