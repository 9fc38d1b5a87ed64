// Embeds and one-line summaries for reprimands, shared by commands and the mod log.

use crate::core::moderation::{
    ModerationEvent, Reprimand, ReprimandAction, ReprimandStatus, RoleBehavior,
};
use chrono::Duration;
use poise::serenity_prelude::{self as serenity, CreateEmbed, CreateEmbedFooter};

/// Compact length such as `1d 2h 30m`.
pub fn format_length(length: Duration) -> String {
    let total = length.num_seconds().max(0);
    let (days, hours, minutes, seconds) = (
        total / 86_400,
        (total % 86_400) / 3_600,
        (total % 3_600) / 60,
        total % 60,
    );

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{}s", seconds));
    }
    parts.join(" ")
}

fn action_details(action: &ReprimandAction) -> Option<String> {
    match action {
        ReprimandAction::Warning { count } if *count > 1 => Some(format!("x{}", count)),
        ReprimandAction::Ban { delete_days, .. } if *delete_days > 0 => {
            Some(format!("messages from the last {} day(s) deleted", delete_days))
        }
        ReprimandAction::Roles { templates, .. } => Some(
            templates
                .iter()
                .map(|template| {
                    let sign = match template.behavior {
                        RoleBehavior::Add => "+",
                        RoleBehavior::Remove => "-",
                        RoleBehavior::Toggle => "~",
                    };
                    format!("{}<@&{}>", sign, template.role_id)
                })
                .collect::<Vec<_>>()
                .join(" "),
        ),
        _ => None,
    }
}

/// `#12 Warning x2 for <@1> (1h)` style summary used in lists.
pub fn summarize(reprimand: &Reprimand) -> String {
    let mut line = format!("`#{}` **{}**", reprimand.id, reprimand.kind());
    if let Some(details) = action_details(&reprimand.action) {
        line.push_str(&format!(" {}", details));
    }
    if let Some(length) = reprimand.length {
        line.push_str(&format!(" ({})", format_length(length)));
    }
    if reprimand.status != ReprimandStatus::Added {
        line.push_str(&format!(" [{}]", reprimand.status));
    }
    line.push_str(&format!(
        " by <@{}> <t:{}:R>",
        reprimand.moderator_id,
        reprimand.created_at.timestamp()
    ));
    if let Some(reason) = &reprimand.reason {
        line.push_str(&format!("\n> {}", reason));
    }
    line
}

fn status_color(reprimand: &Reprimand) -> serenity::Color {
    match reprimand.status {
        ReprimandStatus::Added => serenity::Color::from_rgb(231, 76, 60), // Red
        ReprimandStatus::Expired => serenity::Color::from_rgb(149, 165, 166), // Grey
        ReprimandStatus::Pardoned => serenity::Color::from_rgb(46, 204, 113), // Green
        ReprimandStatus::Hidden => serenity::Color::DARK_GREY,
    }
}

pub fn reprimand_embed(title: &str, reprimand: &Reprimand) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title(title)
        .color(status_color(reprimand))
        .field("User", format!("<@{}>", reprimand.user_id), true)
        .field("Moderator", format!("<@{}>", reprimand.moderator_id), true)
        .field("Type", reprimand.kind().to_string(), true)
        .footer(CreateEmbedFooter::new(format!(
            "Reprimand #{} · {}",
            reprimand.id,
            reprimand.source.as_str()
        )))
        .timestamp(serenity::Timestamp::now());

    if let Some(details) = action_details(&reprimand.action) {
        embed = embed.field("Details", details, false);
    }
    if let Some(length) = reprimand.length {
        embed = embed.field("Length", format_length(length), true);
    }
    if let Some(expire_at) = reprimand.expire_at {
        embed = embed.field("Ends", format!("<t:{}:R>", expire_at.timestamp()), true);
    }
    embed = embed.field(
        "Reason",
        reprimand.reason.as_deref().unwrap_or("No reason provided"),
        false,
    );
    if let Some(modified) = &reprimand.modified {
        embed = embed.field(
            format!("{} by", reprimand.status),
            format!(
                "<@{}> <t:{}:R>{}",
                modified.moderator_id,
                modified.at.timestamp(),
                modified
                    .reason
                    .as_ref()
                    .map(|reason| format!("\n> {}", reason))
                    .unwrap_or_default()
            ),
            false,
        );
    }
    embed
}

/// Mod-log embed for an event, with the guild it belongs to.
pub fn format_moderation_event(event: &ModerationEvent) -> (u64, CreateEmbed) {
    match event {
        ModerationEvent::ReprimandIssued {
            reprimand,
            escalated_from,
        } => {
            let mut embed = reprimand_embed(&format!("{} issued", reprimand.kind()), reprimand);
            if let Some(primary) = escalated_from {
                embed = embed.field(
                    "Triggered by",
                    format!("Reprimand #{} ({})", primary.id, primary.kind()),
                    false,
                );
            }
            (reprimand.guild_id, embed)
        }
        ModerationEvent::ReprimandModified { reprimand } => (
            reprimand.guild_id,
            reprimand_embed(
                &format!("{} {}", reprimand.kind(), reprimand.status.to_string().to_lowercase()),
                reprimand,
            ),
        ),
        ModerationEvent::ReprimandDeleted {
            reprimand,
            moderator_id,
        } => (
            reprimand.guild_id,
            reprimand_embed(&format!("{} deleted", reprimand.kind()), reprimand)
                .color(serenity::Color::DARK_GREY)
                .field("Deleted by", format!("<@{}>", moderator_id), false),
        ),
        ModerationEvent::TemporaryRoleExpired { role } => {
            let description = match role.user_id {
                Some(user_id) => format!("<@&{}> was removed from <@{}>.", role.role_id, user_id),
                None => format!("Role `{}` was deleted.", role.role_id),
            };
            (
                role.guild_id,
                CreateEmbed::default()
                    .title("Temporary role expired")
                    .description(description)
                    .color(serenity::Color::from_rgb(149, 165, 166))
                    .field("Granted by", format!("<@{}>", role.moderator_id), true)
                    .field("Length", format_length(role.length), true)
                    .footer(CreateEmbedFooter::new(format!("Guild ID: {}", role.guild_id)))
                    .timestamp(serenity::Timestamp::now()),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_lengths_compactly() {
        assert_eq!(format_length(Duration::seconds(0)), "0s");
        assert_eq!(format_length(Duration::minutes(90)), "1h 30m");
        assert_eq!(
            format_length(Duration::days(2) + Duration::seconds(5)),
            "2d 5s"
        );
    }
}
