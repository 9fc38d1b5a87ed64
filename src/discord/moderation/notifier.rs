// Mod-log notifier - posts moderation events to the guild's log channel.

use crate::core::moderation::{ModerationConfigService, ModerationEvent, ModerationStore};
use crate::discord::moderation::moderation_formatter::format_moderation_event;
use anyhow::Result;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

/// Forwards events until the channel closes.
pub async fn run_notifier<S: ModerationStore>(
    http: Arc<serenity::Http>,
    config: Arc<ModerationConfigService<S>>,
    mut events: broadcast::Receiver<ModerationEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Err(e) = send_log(&http, &config, &event).await {
                    tracing::error!("Failed to post moderation log: {:?}", e);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Moderation log fell behind, events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
    tracing::info!("Moderation log notifier stopped");
}

async fn send_log<S: ModerationStore>(
    http: &serenity::Http,
    config: &ModerationConfigService<S>,
    event: &ModerationEvent,
) -> Result<()> {
    let (guild_id, embed) = format_moderation_event(event);
    let rules = config.rules(guild_id).await?;

    if let Some(channel_id) = rules.log_channel_id {
        let channel = serenity::ChannelId::new(channel_id);
        if let Err(e) = channel
            .send_message(http, serenity::CreateMessage::new().embed(embed))
            .await
        {
            tracing::warn!("Failed to send log to channel {}: {}", channel_id, e);
        }
    }
    Ok(())
}
