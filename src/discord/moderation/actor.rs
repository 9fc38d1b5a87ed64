// Builds the authorization view of whoever invoked a command.

use crate::core::moderation::{Actor, ActorContext};
use crate::discord::{Context, Error};

pub async fn actor_for(ctx: Context<'_>) -> Result<Actor, Error> {
    let member = ctx.author_member().await.ok_or("Must be used in a server")?;

    // Interaction payloads carry the member's resolved channel permissions.
    let permissions = member.permissions.map(|p| p.bits()).unwrap_or_default();
    let parent_channel_id = ctx
        .guild_channel()
        .await
        .and_then(|channel| channel.parent_id)
        .map(|id| id.get());

    Ok(Actor::Member(ActorContext {
        user_id: member.user.id.get(),
        role_ids: member.roles.iter().map(|role| role.get()).collect(),
        permissions,
        channel_id: Some(ctx.channel_id().get()),
        parent_channel_id,
        command: Some(ctx.command().qualified_name.clone()),
    }))
}
