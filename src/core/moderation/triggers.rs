// Escalation triggers - thresholds that turn repeated infractions into a new reprimand.

use super::moderation_models::{CategoryId, ReprimandAction, ReprimandKind, ReprimandSource, TriggerId};
use super::moderation_store::{ModerationError, ValidationError};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// The kind of infraction a trigger counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerSource {
    Warning,
    Notice,
    Ban,
    Kick,
    Mute,
    Censor,
}

impl TriggerSource {
    /// Source counted for a newly issued reprimand, if any.
    pub fn for_kind(kind: ReprimandKind) -> Option<Self> {
        match kind {
            ReprimandKind::Warning => Some(TriggerSource::Warning),
            ReprimandKind::Notice => Some(TriggerSource::Notice),
            ReprimandKind::Ban => Some(TriggerSource::Ban),
            ReprimandKind::Kick => Some(TriggerSource::Kick),
            ReprimandKind::Mute | ReprimandKind::Timeout => Some(TriggerSource::Mute),
            ReprimandKind::Censored => Some(TriggerSource::Censor),
            ReprimandKind::Note | ReprimandKind::Role => None,
        }
    }

    /// Reprimand kinds that add up to this source's count.
    pub fn counted_kinds(&self) -> &'static [ReprimandKind] {
        match self {
            TriggerSource::Warning => &[ReprimandKind::Warning],
            TriggerSource::Notice => &[ReprimandKind::Notice],
            TriggerSource::Ban => &[ReprimandKind::Ban],
            TriggerSource::Kick => &[ReprimandKind::Kick],
            TriggerSource::Mute => &[ReprimandKind::Mute, ReprimandKind::Timeout],
            TriggerSource::Censor => &[ReprimandKind::Censored],
        }
    }

    /// Source recorded on the reprimand a trigger issues.
    pub fn reprimand_source(&self) -> ReprimandSource {
        match self {
            TriggerSource::Censor => ReprimandSource::Censor,
            _ => ReprimandSource::Auto,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Warning => "warning",
            TriggerSource::Notice => "notice",
            TriggerSource::Ban => "ban",
            TriggerSource::Kick => "kick",
            TriggerSource::Mute => "mute",
            TriggerSource::Censor => "censor",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "warning" => TriggerSource::Warning,
            "notice" => TriggerSource::Notice,
            "ban" => TriggerSource::Ban,
            "kick" => TriggerSource::Kick,
            "mute" => TriggerSource::Mute,
            "censor" => TriggerSource::Censor,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerMode {
    /// Fires only when the count equals the amount.
    Exact,
    /// Fires whenever the count is at or above the amount.
    Retroactive,
    /// Fires at every multiple of the amount.
    Multiple,
}

impl TriggerMode {
    pub fn is_met(&self, count: u64, amount: u64) -> bool {
        match self {
            TriggerMode::Exact => count == amount,
            TriggerMode::Retroactive => count >= amount,
            TriggerMode::Multiple => count != 0 && count % amount == 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Exact => "exact",
            TriggerMode::Retroactive => "retroactive",
            TriggerMode::Multiple => "multiple",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "exact" => TriggerMode::Exact,
            "retroactive" => TriggerMode::Retroactive,
            "multiple" => TriggerMode::Multiple,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub id: TriggerId,
    pub guild_id: u64,
    pub category_id: Option<CategoryId>,
    pub source: TriggerSource,
    pub amount: u64,
    pub mode: TriggerMode,
    pub cooldown: Option<Duration>,
    pub is_active: bool,
    pub action: ReprimandAction,
    pub moderator_id: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTrigger {
    pub guild_id: u64,
    pub category_id: Option<CategoryId>,
    pub source: TriggerSource,
    pub amount: u64,
    pub mode: TriggerMode,
    pub cooldown: Option<Duration>,
    pub action: ReprimandAction,
    pub moderator_id: u64,
    pub created_at: DateTime<Utc>,
}

impl NewTrigger {
    /// Rejects triggers that could never fire or that would produce a censor record.
    pub fn validated(mut self) -> Result<Self, ModerationError> {
        if self.amount == 0 {
            return Err(ValidationError::ZeroTriggerAmount.into());
        }
        if matches!(self.cooldown, Some(c) if c < Duration::zero()) {
            return Err(ValidationError::NonPositiveLength.into());
        }
        if matches!(self.action, ReprimandAction::Censored { .. }) {
            return Err(ValidationError::UnsupportedTriggerAction(ReprimandKind::Censored).into());
        }
        self.action = self.action.validated()?;
        Ok(self)
    }

    pub fn into_trigger(self, id: TriggerId) -> Trigger {
        Trigger {
            id,
            guild_id: self.guild_id,
            category_id: self.category_id,
            source: self.source,
            amount: self.amount,
            mode: self.mode,
            cooldown: self.cooldown,
            is_active: true,
            action: self.action,
            moderator_id: self.moderator_id,
            created_at: self.created_at,
        }
    }
}

/// Active triggers of a source that apply in a category. Category triggers shadow
/// global ones; without any, the global triggers apply.
pub fn candidate_triggers<'a>(
    triggers: &'a [Trigger],
    source: TriggerSource,
    category: Option<CategoryId>,
) -> Vec<&'a Trigger> {
    let of_source = || {
        triggers
            .iter()
            .filter(move |t| t.is_active && t.source == source)
    };

    if let Some(category) = category {
        let scoped: Vec<&Trigger> = of_source()
            .filter(|t| t.category_id == Some(category))
            .collect();
        if !scoped.is_empty() {
            return scoped;
        }
    }

    of_source().filter(|t| t.category_id.is_none()).collect()
}

/// Picks the trigger that fires for `count`, if any.
///
/// `last_fired` holds, per trigger, when it last issued a reprimand against the user.
/// Triggers still inside their cooldown are skipped. Among the rest the highest
/// amount wins, and the oldest trigger breaks a tie.
pub fn select_firing_trigger<'a>(
    triggers: &'a [Trigger],
    count: u64,
    source: TriggerSource,
    category: Option<CategoryId>,
    last_fired: &HashMap<TriggerId, DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<&'a Trigger> {
    candidate_triggers(triggers, source, category)
        .into_iter()
        .filter(|t| t.mode.is_met(count, t.amount))
        .filter(|t| match (t.cooldown, last_fired.get(&t.id)) {
            (Some(cooldown), Some(fired_at)) => now - *fired_at >= cooldown,
            _ => true,
        })
        .max_by(|a, b| a.amount.cmp(&b.amount).then(b.id.cmp(&a.id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(id: i64, amount: u64, mode: TriggerMode) -> Trigger {
        NewTrigger {
            guild_id: 1,
            category_id: None,
            source: TriggerSource::Warning,
            amount,
            mode,
            cooldown: None,
            action: ReprimandAction::Mute {
                length: Some(Duration::hours(1)),
            },
            moderator_id: 0,
            created_at: Utc::now(),
        }
        .into_trigger(TriggerId(id))
    }

    fn select(triggers: &[Trigger], count: u64) -> Option<TriggerId> {
        select_firing_trigger(
            triggers,
            count,
            TriggerSource::Warning,
            None,
            &HashMap::new(),
            Utc::now(),
        )
        .map(|t| t.id)
    }

    #[test]
    fn test_mode_conditions() {
        assert!(TriggerMode::Exact.is_met(3, 3));
        assert!(!TriggerMode::Exact.is_met(4, 3));
        assert!(TriggerMode::Retroactive.is_met(4, 3));
        assert!(!TriggerMode::Retroactive.is_met(2, 3));
        assert!(TriggerMode::Multiple.is_met(6, 3));
        assert!(!TriggerMode::Multiple.is_met(7, 3));
        assert!(!TriggerMode::Multiple.is_met(0, 3));
    }

    #[test]
    fn test_exact_trigger_fires_once() {
        let triggers = vec![trigger(1, 3, TriggerMode::Exact)];
        assert_eq!(select(&triggers, 2), None);
        assert_eq!(select(&triggers, 3), Some(TriggerId(1)));
        assert_eq!(select(&triggers, 4), None);
    }

    #[test]
    fn test_highest_amount_wins() {
        let triggers = vec![
            trigger(1, 2, TriggerMode::Retroactive),
            trigger(2, 5, TriggerMode::Retroactive),
            trigger(3, 10, TriggerMode::Retroactive),
        ];
        assert_eq!(select(&triggers, 6), Some(TriggerId(2)));
        assert_eq!(select(&triggers, 1), None);
    }

    #[test]
    fn test_equal_amounts_pick_the_oldest_trigger() {
        let triggers = vec![
            trigger(1, 1, TriggerMode::Exact),
            trigger(2, 1, TriggerMode::Exact),
        ];
        assert_eq!(select(&triggers, 1), Some(TriggerId(1)));

        let reversed = vec![
            trigger(2, 1, TriggerMode::Exact),
            trigger(1, 1, TriggerMode::Exact),
        ];
        assert_eq!(select(&reversed, 1), Some(TriggerId(1)));
    }

    #[test]
    fn test_inactive_and_other_source_triggers_are_ignored() {
        let mut inactive = trigger(1, 3, TriggerMode::Exact);
        inactive.is_active = false;
        let mut kicks = trigger(2, 3, TriggerMode::Exact);
        kicks.source = TriggerSource::Kick;

        assert_eq!(select(&[inactive, kicks], 3), None);
    }

    #[test]
    fn test_category_trigger_shadows_global() {
        let category = CategoryId(5);
        let global = trigger(1, 3, TriggerMode::Exact);
        let mut scoped = trigger(2, 4, TriggerMode::Exact);
        scoped.category_id = Some(category);
        let triggers = vec![global, scoped];

        let pick = |count, category| {
            select_firing_trigger(
                &triggers,
                count,
                TriggerSource::Warning,
                category,
                &HashMap::new(),
                Utc::now(),
            )
            .map(|t| t.id)
        };

        assert_eq!(pick(3, Some(category)), None);
        assert_eq!(pick(4, Some(category)), Some(TriggerId(2)));
        // Other categories and uncategorised reprimands still see the global trigger.
        assert_eq!(pick(3, Some(CategoryId(6))), Some(TriggerId(1)));
        assert_eq!(pick(3, None), Some(TriggerId(1)));
    }

    #[test]
    fn test_cooldown_skips_recent_trigger() {
        let now = Utc::now();
        let mut cooled = trigger(1, 2, TriggerMode::Retroactive);
        cooled.cooldown = Some(Duration::hours(1));
        let fallback = trigger(2, 1, TriggerMode::Retroactive);
        let triggers = vec![cooled, fallback];

        let mut last_fired = HashMap::new();
        last_fired.insert(TriggerId(1), now - Duration::minutes(10));
        let picked = select_firing_trigger(
            &triggers,
            3,
            TriggerSource::Warning,
            None,
            &last_fired,
            now,
        );
        assert_eq!(picked.map(|t| t.id), Some(TriggerId(2)));

        last_fired.insert(TriggerId(1), now - Duration::hours(2));
        let picked = select_firing_trigger(
            &triggers,
            3,
            TriggerSource::Warning,
            None,
            &last_fired,
            now,
        );
        assert_eq!(picked.map(|t| t.id), Some(TriggerId(1)));
    }

    #[test]
    fn test_zero_amount_is_rejected() {
        let mut new = NewTrigger {
            guild_id: 1,
            category_id: None,
            source: TriggerSource::Warning,
            amount: 0,
            mode: TriggerMode::Exact,
            cooldown: None,
            action: ReprimandAction::Kick,
            moderator_id: 0,
            created_at: Utc::now(),
        };
        assert!(matches!(
            new.clone().validated(),
            Err(ModerationError::Validation(ValidationError::ZeroTriggerAmount))
        ));

        new.amount = 2;
        new.action = ReprimandAction::Censored {
            content: String::new(),
        };
        assert!(matches!(
            new.validated(),
            Err(ModerationError::Validation(
                ValidationError::UnsupportedTriggerAction(ReprimandKind::Censored)
            ))
        ));
    }
}
