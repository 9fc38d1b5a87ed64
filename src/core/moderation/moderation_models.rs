// Moderation domain models - reprimands, categories, guild rules and temporary roles.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts them to Discord-specific actions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::moderation_store::{ModerationError, ValidationError};

/// Longest timeout the platform accepts.
pub const MAX_TIMEOUT_SECS: i64 = 28 * 24 * 60 * 60;
/// Shortest timeout worth issuing.
pub const MIN_TIMEOUT_SECS: i64 = 1;
/// Ban message-deletion window is capped at one week.
pub const MAX_BAN_DELETE_DAYS: u32 = 7;
/// Longest length any reprimand, rule expiry or temporary role may run.
pub const MAX_LENGTH_DAYS: i64 = 10 * 365;

/// Rejects lengths that are not positive or run past [`MAX_LENGTH_DAYS`].
pub fn check_length(length: Duration) -> Result<Duration, ValidationError> {
    if length <= Duration::zero() {
        return Err(ValidationError::NonPositiveLength);
    }
    if length > Duration::days(MAX_LENGTH_DAYS) {
        return Err(ValidationError::LengthTooLong(MAX_LENGTH_DAYS));
    }
    Ok(length)
}

// ============================================================================
// IDS
// ============================================================================

macro_rules! row_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(ReprimandId);
row_id!(CategoryId);
row_id!(TriggerId);
row_id!(GroupId);
row_id!(TemporaryRoleId);

// ============================================================================
// REPRIMANDS
// ============================================================================

/// The flat tag of a reprimand, used for counting and lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReprimandKind {
    Note,
    Notice,
    Warning,
    Kick,
    Ban,
    Mute,
    Timeout,
    Role,
    Censored,
}

impl ReprimandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReprimandKind::Note => "note",
            ReprimandKind::Notice => "notice",
            ReprimandKind::Warning => "warning",
            ReprimandKind::Kick => "kick",
            ReprimandKind::Ban => "ban",
            ReprimandKind::Mute => "mute",
            ReprimandKind::Timeout => "timeout",
            ReprimandKind::Role => "role",
            ReprimandKind::Censored => "censored",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "note" => ReprimandKind::Note,
            "notice" => ReprimandKind::Notice,
            "warning" => ReprimandKind::Warning,
            "kick" => ReprimandKind::Kick,
            "ban" => ReprimandKind::Ban,
            "mute" => ReprimandKind::Mute,
            "timeout" => ReprimandKind::Timeout,
            "role" => ReprimandKind::Role,
            "censored" => ReprimandKind::Censored,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ReprimandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ReprimandKind::Note => "Note",
            ReprimandKind::Notice => "Notice",
            ReprimandKind::Warning => "Warning",
            ReprimandKind::Kick => "Kick",
            ReprimandKind::Ban => "Ban",
            ReprimandKind::Mute => "Mute",
            ReprimandKind::Timeout => "Timeout",
            ReprimandKind::Role => "Role",
            ReprimandKind::Censored => "Censored",
        };
        write!(f, "{}", label)
    }
}

/// What a role template does to the member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleBehavior {
    Add,
    Remove,
    /// Resolved to Add or Remove against the member's current roles when issued.
    Toggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTemplate {
    pub role_id: u64,
    pub behavior: RoleBehavior,
}

impl RoleTemplate {
    /// The template that undoes this one. Toggles are resolved before they are stored.
    pub fn reverted(&self) -> Self {
        let behavior = match self.behavior {
            RoleBehavior::Add => RoleBehavior::Remove,
            RoleBehavior::Remove => RoleBehavior::Add,
            RoleBehavior::Toggle => RoleBehavior::Toggle,
        };
        Self {
            role_id: self.role_id,
            behavior,
        }
    }
}

/// Kind-specific payload of a reprimand. Also used as the template a trigger produces.
#[derive(Debug, Clone, PartialEq)]
pub enum ReprimandAction {
    Note,
    Notice,
    Warning {
        count: u32,
    },
    Kick,
    Ban {
        delete_days: u32,
        length: Option<Duration>,
    },
    Mute {
        length: Option<Duration>,
    },
    Timeout {
        length: Duration,
    },
    Roles {
        templates: Vec<RoleTemplate>,
        length: Option<Duration>,
    },
    Censored {
        content: String,
    },
}

impl ReprimandAction {
    pub fn kind(&self) -> ReprimandKind {
        match self {
            ReprimandAction::Note => ReprimandKind::Note,
            ReprimandAction::Notice => ReprimandKind::Notice,
            ReprimandAction::Warning { .. } => ReprimandKind::Warning,
            ReprimandAction::Kick => ReprimandKind::Kick,
            ReprimandAction::Ban { .. } => ReprimandKind::Ban,
            ReprimandAction::Mute { .. } => ReprimandKind::Mute,
            ReprimandAction::Timeout { .. } => ReprimandKind::Timeout,
            ReprimandAction::Roles { .. } => ReprimandKind::Role,
            ReprimandAction::Censored { .. } => ReprimandKind::Censored,
        }
    }

    /// Length requested by the action itself. Notices, warnings and censors take
    /// theirs from the category or guild rules instead.
    pub fn requested_length(&self) -> Option<Duration> {
        match self {
            ReprimandAction::Ban { length, .. }
            | ReprimandAction::Mute { length }
            | ReprimandAction::Roles { length, .. } => *length,
            ReprimandAction::Timeout { length } => Some(*length),
            _ => None,
        }
    }

    /// Number of infractions this reprimand contributes to its count.
    pub fn weight(&self) -> u64 {
        match self {
            ReprimandAction::Warning { count } => u64::from(*count),
            _ => 1,
        }
    }

    /// Checks parameters and normalises the ones the platform would reject.
    pub fn validated(self) -> Result<Self, ModerationError> {
        // Timeouts are clamped below instead.
        if !matches!(self, ReprimandAction::Timeout { .. }) {
            if let Some(length) = self.requested_length() {
                check_length(length)?;
            }
        }
        match self {
            ReprimandAction::Warning { count } if count == 0 => {
                Err(ValidationError::ZeroWarningCount.into())
            }
            ReprimandAction::Ban { delete_days, .. } if delete_days > MAX_BAN_DELETE_DAYS => {
                Err(ValidationError::DeleteDaysOutOfRange(delete_days).into())
            }
            ReprimandAction::Timeout { length } => {
                if length <= Duration::zero() {
                    return Err(ValidationError::NonPositiveLength.into());
                }
                let secs = length.num_seconds().clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS);
                Ok(ReprimandAction::Timeout {
                    length: Duration::seconds(secs),
                })
            }
            ReprimandAction::Roles { ref templates, .. } if templates.is_empty() => {
                Err(ValidationError::NoRoleTemplates.into())
            }
            other => Ok(other),
        }
    }
}

/// Lifecycle status. Transitions are one-way out of `Added`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReprimandStatus {
    Added,
    Expired,
    Pardoned,
    /// Superseded by an out-of-band change, such as a native unban.
    Hidden,
}

impl ReprimandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReprimandStatus::Added => "added",
            ReprimandStatus::Expired => "expired",
            ReprimandStatus::Pardoned => "pardoned",
            ReprimandStatus::Hidden => "hidden",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "added" => ReprimandStatus::Added,
            "expired" => ReprimandStatus::Expired,
            "pardoned" => ReprimandStatus::Pardoned,
            "hidden" => ReprimandStatus::Hidden,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ReprimandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ReprimandStatus::Added => "Added",
            ReprimandStatus::Expired => "Expired",
            ReprimandStatus::Pardoned => "Pardoned",
            ReprimandStatus::Hidden => "Hidden",
        };
        write!(f, "{}", label)
    }
}

/// Where a reprimand came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReprimandSource {
    Command,
    /// Issued by a trigger.
    Auto,
    Censor,
    /// Recorded from the platform audit log after a native moderation action.
    AuditLog,
}

impl ReprimandSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReprimandSource::Command => "command",
            ReprimandSource::Auto => "auto",
            ReprimandSource::Censor => "censor",
            ReprimandSource::AuditLog => "audit_log",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "command" => ReprimandSource::Command,
            "auto" => ReprimandSource::Auto,
            "censor" => ReprimandSource::Censor,
            "audit_log" => ReprimandSource::AuditLog,
            _ => return None,
        })
    }
}

/// Who last changed a reprimand, when, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub moderator_id: u64,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reprimand {
    pub id: ReprimandId,
    pub guild_id: u64,
    pub user_id: u64,
    pub moderator_id: u64,
    pub reason: Option<String>,
    pub source: ReprimandSource,
    pub status: ReprimandStatus,
    pub category_id: Option<CategoryId>,
    pub trigger_id: Option<TriggerId>,
    pub action: ReprimandAction,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub length: Option<Duration>,
    pub expire_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub modified: Option<Modification>,
}

impl Reprimand {
    pub fn kind(&self) -> ReprimandKind {
        self.action.kind()
    }

    pub fn is_expirable(&self) -> bool {
        self.length.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.status == ReprimandStatus::Added
    }

    /// Moves the reprimand out of `Added`. Ends it and drops the expiry timestamp.
    pub fn transition(
        &mut self,
        status: ReprimandStatus,
        modification: Modification,
    ) -> Result<(), ModerationError> {
        if status == ReprimandStatus::Added || self.status != ReprimandStatus::Added {
            return Err(ModerationError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.ended_at = Some(modification.at);
        self.expire_at = None;
        self.modified = Some(modification);
        Ok(())
    }

    /// Changes the reason without touching the status. Allowed on terminal rows too.
    pub fn update_reason(&mut self, reason: Option<String>, moderator_id: u64, at: DateTime<Utc>) {
        self.reason = reason.clone();
        self.modified = Some(Modification {
            moderator_id,
            at,
            reason,
        });
    }
}

/// A reprimand that has not been persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReprimand {
    pub guild_id: u64,
    pub user_id: u64,
    pub moderator_id: u64,
    pub reason: Option<String>,
    pub source: ReprimandSource,
    pub category_id: Option<CategoryId>,
    pub trigger_id: Option<TriggerId>,
    pub action: ReprimandAction,
    pub started_at: DateTime<Utc>,
    pub length: Option<Duration>,
}

impl NewReprimand {
    pub fn expire_at(&self) -> Option<DateTime<Utc>> {
        self.length.map(|length| self.started_at + length)
    }

    pub fn into_reprimand(self, id: ReprimandId) -> Reprimand {
        let expire_at = self.expire_at();
        Reprimand {
            id,
            guild_id: self.guild_id,
            user_id: self.user_id,
            moderator_id: self.moderator_id,
            reason: self.reason,
            source: self.source,
            status: ReprimandStatus::Added,
            category_id: self.category_id,
            trigger_id: self.trigger_id,
            action: self.action,
            created_at: self.started_at,
            started_at: self.started_at,
            length: self.length,
            expire_at,
            ended_at: None,
            modified: None,
        }
    }
}

/// Which categories a history or count query looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryFilter {
    /// Every reprimand regardless of category.
    All,
    /// Only reprimands without a category.
    None,
    Only(CategoryId),
}

impl CategoryFilter {
    pub fn scope(category: Option<CategoryId>) -> Self {
        match category {
            Some(id) => CategoryFilter::Only(id),
            None => CategoryFilter::None,
        }
    }

    pub fn matches(&self, category: Option<CategoryId>) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::None => category.is_none(),
            CategoryFilter::Only(id) => category == Some(*id),
        }
    }
}

// ============================================================================
// RULES & CATEGORIES
// ============================================================================

/// Guild-wide moderation settings. Categories override the optional fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ModerationRules {
    pub guild_id: u64,
    pub mute_role_id: Option<u64>,
    pub replace_mutes: bool,
    pub notice_expiry: Option<Duration>,
    pub warning_expiry: Option<Duration>,
    pub censored_expiry: Option<Duration>,
    pub log_channel_id: Option<u64>,
}

impl ModerationRules {
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            mute_role_id: None,
            replace_mutes: false,
            notice_expiry: None,
            warning_expiry: None,
            censored_expiry: None,
            log_channel_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModerationCategory {
    pub id: CategoryId,
    pub guild_id: u64,
    pub name: String,
    pub mute_role_id: Option<u64>,
    pub replace_mutes: Option<bool>,
    pub notice_expiry: Option<Duration>,
    pub warning_expiry: Option<Duration>,
    pub censored_expiry: Option<Duration>,
    pub moderator_id: u64,
    pub created_at: DateTime<Utc>,
}

/// Category names that collide with filter keywords.
pub const RESERVED_CATEGORY_NAMES: &[&str] = &["all", "none", "default"];

/// Guild rules with the category's overrides applied on top.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveRules {
    pub mute_role_id: Option<u64>,
    pub replace_mutes: bool,
    pub notice_expiry: Option<Duration>,
    pub warning_expiry: Option<Duration>,
    pub censored_expiry: Option<Duration>,
}

impl EffectiveRules {
    pub fn resolve(rules: &ModerationRules, category: Option<&ModerationCategory>) -> Self {
        match category {
            Some(category) => Self {
                mute_role_id: category.mute_role_id.or(rules.mute_role_id),
                replace_mutes: category.replace_mutes.unwrap_or(rules.replace_mutes),
                notice_expiry: category.notice_expiry.or(rules.notice_expiry),
                warning_expiry: category.warning_expiry.or(rules.warning_expiry),
                censored_expiry: category.censored_expiry.or(rules.censored_expiry),
            },
            None => Self {
                mute_role_id: rules.mute_role_id,
                replace_mutes: rules.replace_mutes,
                notice_expiry: rules.notice_expiry,
                warning_expiry: rules.warning_expiry,
                censored_expiry: rules.censored_expiry,
            },
        }
    }

    /// Effective length for a new reprimand of this action.
    pub fn length_for(&self, action: &ReprimandAction) -> Option<Duration> {
        match action {
            ReprimandAction::Notice => self.notice_expiry,
            ReprimandAction::Warning { .. } => self.warning_expiry,
            ReprimandAction::Censored { .. } => self.censored_expiry,
            other => other.requested_length(),
        }
    }
}

// ============================================================================
// TEMPORARY ROLES
// ============================================================================

/// A role grant that ends on its own. Without a member the role itself is deleted at expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporaryRole {
    pub id: TemporaryRoleId,
    pub guild_id: u64,
    pub role_id: u64,
    pub user_id: Option<u64>,
    pub moderator_id: u64,
    pub started_at: DateTime<Utc>,
    pub length: Duration,
    pub expire_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TemporaryRole {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTemporaryRole {
    pub guild_id: u64,
    pub role_id: u64,
    pub user_id: Option<u64>,
    pub moderator_id: u64,
    pub started_at: DateTime<Utc>,
    pub length: Duration,
}

impl NewTemporaryRole {
    pub fn into_temporary_role(self, id: TemporaryRoleId) -> TemporaryRole {
        TemporaryRole {
            id,
            guild_id: self.guild_id,
            role_id: self.role_id,
            user_id: self.user_id,
            moderator_id: self.moderator_id,
            started_at: self.started_at,
            length: self.length,
            expire_at: Some(self.started_at + self.length),
            ended_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(length: Option<Duration>) -> Reprimand {
        NewReprimand {
            guild_id: 1,
            user_id: 2,
            moderator_id: 3,
            reason: None,
            source: ReprimandSource::Command,
            category_id: None,
            trigger_id: None,
            action: ReprimandAction::Mute { length },
            started_at: Utc::now(),
            length,
        }
        .into_reprimand(ReprimandId(1))
    }

    fn modification() -> Modification {
        Modification {
            moderator_id: 9,
            at: Utc::now(),
            reason: Some("done".to_string()),
        }
    }

    #[test]
    fn test_expirable_reprimand_has_expire_at_while_added() {
        let mut reprimand = sample(Some(Duration::minutes(10)));
        assert_eq!(
            reprimand.expire_at,
            Some(reprimand.started_at + Duration::minutes(10))
        );

        reprimand
            .transition(ReprimandStatus::Expired, modification())
            .unwrap();
        assert_eq!(reprimand.expire_at, None);
        assert!(reprimand.ended_at.is_some());
    }

    #[test]
    fn test_permanent_reprimand_never_has_expire_at() {
        let reprimand = sample(None);
        assert!(!reprimand.is_expirable());
        assert_eq!(reprimand.expire_at, None);
    }

    #[test]
    fn test_transitions_are_one_way() {
        let mut reprimand = sample(None);
        reprimand
            .transition(ReprimandStatus::Pardoned, modification())
            .unwrap();
        let ended = reprimand.ended_at;

        let err = reprimand
            .transition(ReprimandStatus::Hidden, modification())
            .unwrap_err();
        assert!(matches!(err, ModerationError::InvalidTransition { .. }));
        assert_eq!(reprimand.status, ReprimandStatus::Pardoned);
        assert_eq!(reprimand.ended_at, ended);
    }

    #[test]
    fn test_reason_can_change_on_terminal_reprimand() {
        let mut reprimand = sample(None);
        reprimand
            .transition(ReprimandStatus::Pardoned, modification())
            .unwrap();
        reprimand.update_reason(Some("typo fixed".to_string()), 4, Utc::now());

        assert_eq!(reprimand.status, ReprimandStatus::Pardoned);
        assert_eq!(reprimand.reason.as_deref(), Some("typo fixed"));
    }

    #[test]
    fn test_timeout_length_is_clamped() {
        let action = ReprimandAction::Timeout {
            length: Duration::days(60),
        }
        .validated()
        .unwrap();
        assert_eq!(
            action,
            ReprimandAction::Timeout {
                length: Duration::seconds(MAX_TIMEOUT_SECS)
            }
        );
    }

    #[test]
    fn test_ban_delete_days_out_of_range() {
        let err = ReprimandAction::Ban {
            delete_days: 8,
            length: None,
        }
        .validated()
        .unwrap_err();
        assert!(matches!(
            err,
            ModerationError::Validation(ValidationError::DeleteDaysOutOfRange(8))
        ));
    }

    #[test]
    fn test_ban_length_past_maximum_is_rejected() {
        let err = ReprimandAction::Ban {
            delete_days: 0,
            length: Some(Duration::days(i64::from(u32::MAX))),
        }
        .validated()
        .unwrap_err();
        assert!(matches!(
            err,
            ModerationError::Validation(ValidationError::LengthTooLong(MAX_LENGTH_DAYS))
        ));

        let ok = ReprimandAction::Mute {
            length: Some(Duration::days(MAX_LENGTH_DAYS)),
        }
        .validated();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_category_overrides_guild_rules() {
        let mut rules = ModerationRules::new(1);
        rules.mute_role_id = Some(10);
        rules.warning_expiry = Some(Duration::days(30));

        let category = ModerationCategory {
            id: CategoryId(1),
            guild_id: 1,
            name: "voice".to_string(),
            mute_role_id: Some(20),
            replace_mutes: Some(true),
            notice_expiry: None,
            warning_expiry: None,
            censored_expiry: None,
            moderator_id: 3,
            created_at: Utc::now(),
        };

        let effective = EffectiveRules::resolve(&rules, Some(&category));
        assert_eq!(effective.mute_role_id, Some(20));
        assert!(effective.replace_mutes);
        assert_eq!(
            effective.length_for(&ReprimandAction::Warning { count: 1 }),
            Some(Duration::days(30))
        );
    }

    #[test]
    fn test_category_filter() {
        assert!(CategoryFilter::All.matches(Some(CategoryId(3))));
        assert!(CategoryFilter::None.matches(None));
        assert!(!CategoryFilter::None.matches(Some(CategoryId(3))));
        assert!(CategoryFilter::Only(CategoryId(3)).matches(Some(CategoryId(3))));
        assert!(!CategoryFilter::Only(CategoryId(3)).matches(None));
    }
}
