// Authorization rules - who may issue which moderation actions.
//
// A guild defines authorization groups. Each group has a scope of moderation actions,
// a list of criteria (permission, role, channel, user) combined with All or Any, and
// an access type. Deny wins over Allow, and without a matching Allow the answer is no.

use super::moderation_models::{CategoryId, GroupId};
use super::moderation_store::{ModerationError, ModerationStore, ValidationError};
use chrono::{DateTime, Utc};
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::sync::Arc;

// ============================================================================
// SCOPE
// ============================================================================

/// Bit set of moderation actions a group governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AuthorizationScope(u64);

impl AuthorizationScope {
    pub const NONE: Self = Self(0);
    /// Matches every scope.
    pub const ALL: Self = Self(1 << 0);
    pub const WARNING: Self = Self(1 << 1);
    pub const MUTE: Self = Self(1 << 2);
    pub const KICK: Self = Self(1 << 3);
    pub const BAN: Self = Self(1 << 4);
    pub const CONFIGURATION: Self = Self(1 << 5);
    pub const NOTE: Self = Self(1 << 7);
    pub const MANAGE_ROLES: Self = Self(1 << 8);
    pub const HISTORY: Self = Self(1 << 13);
    pub const MODIFY: Self = Self(1 << 14);
    pub const TIMEOUT: Self = Self(1 << 19);

    const NAMED: &'static [(&'static str, AuthorizationScope)] = &[
        ("all", Self::ALL),
        ("warning", Self::WARNING),
        ("mute", Self::MUTE),
        ("kick", Self::KICK),
        ("ban", Self::BAN),
        ("configuration", Self::CONFIGURATION),
        ("note", Self::NOTE),
        ("manage_roles", Self::MANAGE_ROLES),
        ("history", Self::HISTORY),
        ("modify", Self::MODIFY),
        ("timeout", Self::TIMEOUT),
    ];

    pub fn bits(&self) -> u64 {
        self.0
    }

    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether a group with this scope governs the requested one.
    pub fn covers(&self, requested: Self) -> bool {
        self.contains(Self::ALL) || self.intersects(requested)
    }

    /// Parses a comma separated list such as `ban,kick`.
    pub fn parse(value: &str) -> Option<Self> {
        let mut scope = Self::NONE;
        for part in value.split(',').map(|p| p.trim().to_lowercase()) {
            if part.is_empty() {
                continue;
            }
            let (_, flag) = Self::NAMED.iter().find(|(name, _)| *name == part)?;
            scope |= *flag;
        }
        Some(scope)
    }

    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect()
    }
}

impl BitOr for AuthorizationScope {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AuthorizationScope {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for AuthorizationScope {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl std::fmt::Display for AuthorizationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        write!(f, "{}", self.names().join(", "))
    }
}

// ============================================================================
// CRITERIA
// ============================================================================

/// Administrator bit of the platform permission set.
pub const ADMINISTRATOR_PERMISSION: u64 = 1 << 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Criterion {
    /// Matches when the actor holds any of these permission bits.
    Permission(u64),
    Role(u64),
    /// Matches the channel itself or any channel under it.
    Channel(u64),
    User(u64),
}

/// Everything the evaluator knows about the actor and where they act from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActorContext {
    pub user_id: u64,
    pub role_ids: Vec<u64>,
    pub permissions: u64,
    pub channel_id: Option<u64>,
    pub parent_channel_id: Option<u64>,
    /// Qualified name of the command being run, if any.
    pub command: Option<String>,
}

impl Criterion {
    pub fn judge(&self, actor: &ActorContext) -> bool {
        match self {
            Criterion::Permission(bits) => actor.permissions & bits != 0,
            Criterion::Role(role_id) => actor.role_ids.contains(role_id),
            Criterion::Channel(channel_id) => {
                actor.channel_id == Some(*channel_id)
                    || actor.parent_channel_id == Some(*channel_id)
            }
            Criterion::User(user_id) => actor.user_id == *user_id,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Criterion::Permission(_) => "permission",
            Criterion::Role(_) => "role",
            Criterion::Channel(_) => "channel",
            Criterion::User(_) => "user",
        }
    }

    pub fn value(&self) -> u64 {
        match self {
            Criterion::Permission(v)
            | Criterion::Role(v)
            | Criterion::Channel(v)
            | Criterion::User(v) => *v,
        }
    }

    pub fn from_parts(kind: &str, value: u64) -> Option<Self> {
        Some(match kind {
            "permission" => Criterion::Permission(value),
            "role" => Criterion::Role(value),
            "channel" => Criterion::Channel(value),
            "user" => Criterion::User(value),
            _ => return None,
        })
    }
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Criterion::Permission(bits) => write!(f, "permission {:#x}", bits),
            Criterion::Role(id) => write!(f, "<@&{}>", id),
            Criterion::Channel(id) => write!(f, "<#{}>", id),
            Criterion::User(id) => write!(f, "<@{}>", id),
        }
    }
}

// ============================================================================
// GROUPS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessType {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JudgeType {
    /// Every criterion must match.
    All,
    /// At least one criterion must match.
    Any,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Allow => "allow",
            AccessType::Deny => "deny",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "allow" => Some(AccessType::Allow),
            "deny" => Some(AccessType::Deny),
            _ => None,
        }
    }
}

impl JudgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JudgeType::All => "all",
            JudgeType::Any => "any",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "all" => Some(JudgeType::All),
            "any" => Some(JudgeType::Any),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationGroup {
    pub id: GroupId,
    pub guild_id: u64,
    pub category_id: Option<CategoryId>,
    pub scope: AuthorizationScope,
    pub access: AccessType,
    pub judge: JudgeType,
    pub criteria: Vec<Criterion>,
    pub linked_command: Option<String>,
    pub moderator_id: u64,
    pub created_at: DateTime<Utc>,
}

impl AuthorizationGroup {
    /// Whether the group's criteria hold for the actor.
    pub fn judge(&self, actor: &ActorContext) -> bool {
        match self.judge {
            JudgeType::All => self.criteria.iter().all(|c| c.judge(actor)),
            JudgeType::Any => self.criteria.iter().any(|c| c.judge(actor)),
        }
    }

    fn governs(&self, actor: &ActorContext, scope: AuthorizationScope) -> bool {
        if !self.scope.covers(scope) {
            return false;
        }
        match (&self.linked_command, &actor.command) {
            (None, _) => true,
            (Some(linked), Some(command)) => linked.eq_ignore_ascii_case(command),
            (Some(_), None) => false,
        }
    }
}

/// A group that has not been persisted yet. Build it with [`NewAuthorizationGroup::new`]
/// so empty criteria never reach storage.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuthorizationGroup {
    pub guild_id: u64,
    pub category_id: Option<CategoryId>,
    pub scope: AuthorizationScope,
    pub access: AccessType,
    pub judge: JudgeType,
    pub criteria: Vec<Criterion>,
    pub linked_command: Option<String>,
    pub moderator_id: u64,
    pub created_at: DateTime<Utc>,
}

impl NewAuthorizationGroup {
    pub fn new(
        guild_id: u64,
        scope: AuthorizationScope,
        access: AccessType,
        judge: JudgeType,
        criteria: Vec<Criterion>,
        moderator_id: u64,
    ) -> Result<Self, ValidationError> {
        if criteria.is_empty() {
            return Err(ValidationError::EmptyCriteria);
        }
        if scope.is_empty() {
            return Err(ValidationError::EmptyScope);
        }
        Ok(Self {
            guild_id,
            category_id: None,
            scope,
            access,
            judge,
            criteria,
            linked_command: None,
            moderator_id,
            created_at: Utc::now(),
        })
    }

    pub fn in_category(mut self, category_id: Option<CategoryId>) -> Self {
        self.category_id = category_id;
        self
    }

    pub fn linked_to(mut self, command: Option<String>) -> Self {
        self.linked_command = command;
        self
    }

    pub fn into_group(self, id: GroupId) -> AuthorizationGroup {
        AuthorizationGroup {
            id,
            guild_id: self.guild_id,
            category_id: self.category_id,
            scope: self.scope,
            access: self.access,
            judge: self.judge,
            criteria: self.criteria,
            linked_command: self.linked_command,
            moderator_id: self.moderator_id,
            created_at: self.created_at,
        }
    }
}

/// Pure decision over an already loaded set of groups.
///
/// Category groups take precedence over global ones when any of them governs the scope.
/// An applying Deny wins. Otherwise an applying Allow authorizes. Otherwise no.
pub fn evaluate(
    groups: &[AuthorizationGroup],
    actor: &ActorContext,
    scope: AuthorizationScope,
    category: Option<CategoryId>,
) -> bool {
    let governing = |wanted: Option<CategoryId>| {
        groups
            .iter()
            .filter(move |g| g.category_id == wanted && g.governs(actor, scope))
    };

    let mut candidates: Vec<&AuthorizationGroup> = match category {
        Some(id) => governing(Some(id)).collect(),
        None => Vec::new(),
    };
    if candidates.is_empty() {
        candidates = governing(None).collect();
    }

    let mut allowed = false;
    for group in candidates.into_iter().filter(|g| g.judge(actor)) {
        match group.access {
            AccessType::Deny => return false,
            AccessType::Allow => allowed = true,
        }
    }
    allowed
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct AuthorizationService<S: ModerationStore> {
    store: Arc<S>,
}

impl<S: ModerationStore> AuthorizationService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Loads the guild's groups and decides. Storage failures propagate instead of
    /// turning into a denial.
    pub async fn is_authorized(
        &self,
        guild_id: u64,
        actor: &ActorContext,
        scope: AuthorizationScope,
        category: Option<CategoryId>,
    ) -> Result<bool, ModerationError> {
        let groups = self.store.list_groups(guild_id).await?;
        let authorized = evaluate(&groups, actor, scope, category);

        tracing::debug!(
            guild_id,
            user_id = actor.user_id,
            scope = %scope,
            authorized,
            "Authorization evaluated"
        );

        Ok(authorized)
    }
}
