// Applying and reverting the platform side of a reprimand.

use super::moderation_models::{Reprimand, ReprimandAction, RoleBehavior, RoleTemplate};
use super::platform::{ModerationPlatform, PlatformError};
use chrono::{DateTime, Utc};

/// Applies the platform effect of a new reprimand.
///
/// Returns the action as it was actually applied: toggles are resolved against the
/// member's roles and templates that would change nothing are dropped. `None` means
/// the action had nothing left to do.
pub async fn apply_effect<P: ModerationPlatform + ?Sized>(
    platform: &P,
    guild_id: u64,
    user_id: u64,
    action: ReprimandAction,
    mute_role_id: Option<u64>,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Option<ReprimandAction>, PlatformError> {
    match &action {
        ReprimandAction::Ban { delete_days, .. } => {
            platform.ban(guild_id, user_id, *delete_days, reason).await?;
        }
        ReprimandAction::Kick => {
            platform.kick(guild_id, user_id, reason).await?;
        }
        ReprimandAction::Mute { .. } => {
            if let Some(role_id) = mute_role_id {
                platform.add_role(guild_id, user_id, role_id).await?;
            }
        }
        ReprimandAction::Timeout { length } => {
            platform.set_timeout(guild_id, user_id, now + *length).await?;
        }
        ReprimandAction::Roles { templates, length } => {
            let current = platform.member_roles(guild_id, user_id).await?;
            let resolved = resolve_templates(templates, &current);
            if resolved.is_empty() {
                return Ok(None);
            }
            apply_templates(platform, guild_id, user_id, &resolved).await?;
            return Ok(Some(ReprimandAction::Roles {
                templates: resolved,
                length: *length,
            }));
        }
        ReprimandAction::Note
        | ReprimandAction::Notice
        | ReprimandAction::Warning { .. }
        | ReprimandAction::Censored { .. } => {}
    }
    Ok(Some(action))
}

/// Undoes the platform effect of an active reprimand.
pub async fn revert_effect<P: ModerationPlatform + ?Sized>(
    platform: &P,
    reprimand: &Reprimand,
    mute_role_id: Option<u64>,
) -> Result<(), PlatformError> {
    let (guild_id, user_id) = (reprimand.guild_id, reprimand.user_id);
    match &reprimand.action {
        ReprimandAction::Ban { .. } => platform.unban(guild_id, user_id).await,
        ReprimandAction::Mute { .. } => match mute_role_id {
            Some(role_id) => platform.remove_role(guild_id, user_id, role_id).await,
            None => Ok(()),
        },
        ReprimandAction::Timeout { .. } => platform.clear_timeout(guild_id, user_id).await,
        ReprimandAction::Roles { templates, .. } => {
            let reverted: Vec<RoleTemplate> = templates.iter().map(RoleTemplate::reverted).collect();
            apply_templates(platform, guild_id, user_id, &reverted).await
        }
        ReprimandAction::Note
        | ReprimandAction::Notice
        | ReprimandAction::Warning { .. }
        | ReprimandAction::Kick
        | ReprimandAction::Censored { .. } => Ok(()),
    }
}

/// Turns toggles into adds or removes and drops templates that change nothing.
pub fn resolve_templates(templates: &[RoleTemplate], current_roles: &[u64]) -> Vec<RoleTemplate> {
    templates
        .iter()
        .filter_map(|template| {
            let has_role = current_roles.contains(&template.role_id);
            let behavior = match template.behavior {
                RoleBehavior::Add if !has_role => RoleBehavior::Add,
                RoleBehavior::Remove if has_role => RoleBehavior::Remove,
                RoleBehavior::Toggle if has_role => RoleBehavior::Remove,
                RoleBehavior::Toggle => RoleBehavior::Add,
                _ => return None,
            };
            Some(RoleTemplate {
                role_id: template.role_id,
                behavior,
            })
        })
        .collect()
}

async fn apply_templates<P: ModerationPlatform + ?Sized>(
    platform: &P,
    guild_id: u64,
    user_id: u64,
    templates: &[RoleTemplate],
) -> Result<(), PlatformError> {
    for template in templates {
        match template.behavior {
            RoleBehavior::Add => platform.add_role(guild_id, user_id, template.role_id).await?,
            RoleBehavior::Remove => {
                platform
                    .remove_role(guild_id, user_id, template.role_id)
                    .await?
            }
            RoleBehavior::Toggle => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_templates() {
        let templates = vec![
            RoleTemplate {
                role_id: 1,
                behavior: RoleBehavior::Add,
            },
            RoleTemplate {
                role_id: 2,
                behavior: RoleBehavior::Remove,
            },
            RoleTemplate {
                role_id: 3,
                behavior: RoleBehavior::Toggle,
            },
            RoleTemplate {
                role_id: 4,
                behavior: RoleBehavior::Toggle,
            },
        ];
        // Member already has 1 and 3, lacks 2 and 4.
        let resolved = resolve_templates(&templates, &[1, 3]);

        assert_eq!(
            resolved,
            vec![
                RoleTemplate {
                    role_id: 3,
                    behavior: RoleBehavior::Remove
                },
                RoleTemplate {
                    role_id: 4,
                    behavior: RoleBehavior::Add
                },
            ]
        );
    }
}
