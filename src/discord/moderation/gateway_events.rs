// Gateway bridge - turns ban, unban, departure and timeout events into
// reconciliation signals, and seeds default authorization for new guilds.

use crate::core::moderation::{ModerationSignal, ReconcileOutcome};
use crate::discord::moderation::serenity_platform::to_utc;
use crate::discord::Data;
use anyhow::Result;
use poise::serenity_prelude as serenity;

pub fn moderation_signal(event: &serenity::FullEvent) -> Option<ModerationSignal> {
    match event {
        serenity::FullEvent::GuildBanAddition {
            guild_id,
            banned_user,
        } => Some(ModerationSignal::MemberBanned {
            guild_id: guild_id.get(),
            user_id: banned_user.id.get(),
        }),
        serenity::FullEvent::GuildBanRemoval {
            guild_id,
            unbanned_user,
        } => Some(ModerationSignal::MemberUnbanned {
            guild_id: guild_id.get(),
            user_id: unbanned_user.id.get(),
        }),
        serenity::FullEvent::GuildMemberRemoval { guild_id, user, .. } => {
            Some(ModerationSignal::MemberLeft {
                guild_id: guild_id.get(),
                user_id: user.id.get(),
            })
        }
        serenity::FullEvent::GuildMemberUpdate {
            old_if_available,
            event,
            ..
        } => timeout_signal(
            event.guild_id.get(),
            event.user.id.get(),
            old_if_available
                .as_ref()
                .map(|old| old.communication_disabled_until),
            event.communication_disabled_until,
        ),
        _ => None,
    }
}

/// Timeout signal for a member update. `previous` is `None` when the old member is not
/// cached; every such update is forwarded and reconciliation drops the ones that change
/// nothing in the ledger.
fn timeout_signal(
    guild_id: u64,
    user_id: u64,
    previous: Option<Option<serenity::Timestamp>>,
    until: Option<serenity::Timestamp>,
) -> Option<ModerationSignal> {
    if previous.is_some_and(|previous| previous == until) {
        return None;
    }
    Some(ModerationSignal::TimeoutChanged {
        guild_id,
        user_id,
        until: until.map(to_utc),
    })
}

pub async fn handle_moderation_event(data: &Data, event: &serenity::FullEvent) -> Result<()> {
    if let serenity::FullEvent::GuildCreate { guild, .. } = event {
        if let Some(group) = data
            .config
            .ensure_default_authorization(guild.id.get(), data.bot_user_id)
            .await?
        {
            tracing::info!(
                guild_id = guild.id.get(),
                group_id = group.id.0,
                "Seeded default moderation authorization"
            );
        }
        return Ok(());
    }

    let Some(signal) = moderation_signal(event) else {
        return Ok(());
    };

    match data.reconciliation.handle(signal).await? {
        ReconcileOutcome::Recorded(reprimand) => tracing::info!(
            guild_id = reprimand.guild_id,
            user_id = reprimand.user_id,
            reprimand_id = reprimand.id.0,
            "Recorded native moderation action"
        ),
        ReconcileOutcome::Hidden(reprimand) => tracing::info!(
            guild_id = reprimand.guild_id,
            user_id = reprimand.user_id,
            reprimand_id = reprimand.id.0,
            "Hid reprimand lifted outside the bot"
        ),
        ReconcileOutcome::Ignored => {}
        ReconcileOutcome::Indeterminate => {
            tracing::debug!(?signal, "No audit log entry matched moderation signal")
        }
    }
    Ok(())
}
