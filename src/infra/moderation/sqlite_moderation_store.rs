// SQLite-backed moderation store.
//
// Tables:
// - moderation_rules: Per-guild rules (mute role, replace mutes, expiry lengths, log channel)
// - moderation_categories: Named rule partitions with optional overrides
// - authorization_groups / authorization_criteria: Who may do what
// - triggers: Escalation rules
// - reprimands: The reprimand ledger
// - temporary_roles: Role grants and roles that end on their own
//
// Timestamps are stored as fixed-width RFC3339 text so they compare as strings.

use crate::core::moderation::{
    AccessType, AuthorizationGroup, AuthorizationScope, CategoryFilter, CategoryId, Criterion,
    GroupId, JudgeType, Modification, ModerationCategory, ModerationError, ModerationRules,
    ModerationStore, NewAuthorizationGroup, NewReprimand, NewTemporaryRole, NewTrigger,
    Reprimand, ReprimandAction, ReprimandId, ReprimandKind, ReprimandSource, ReprimandStatus,
    RoleTemplate, TemporaryRole, TemporaryRoleId, Trigger, TriggerId, TriggerMode,
    TriggerSource,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::path::Path;

pub struct SqliteModerationStore {
    pool: Pool<Sqlite>,
}

impl SqliteModerationStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database file and runs migrations.
    pub async fn connect(path: &str) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite://{}?mode=rwc", path))
            .await?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS moderation_rules (
                guild_id INTEGER PRIMARY KEY,
                mute_role_id INTEGER,
                replace_mutes BOOLEAN NOT NULL DEFAULT 0,
                notice_expiry_secs INTEGER,
                warning_expiry_secs INTEGER,
                censored_expiry_secs INTEGER,
                log_channel_id INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS moderation_categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                mute_role_id INTEGER,
                replace_mutes BOOLEAN,
                notice_expiry_secs INTEGER,
                warning_expiry_secs INTEGER,
                censored_expiry_secs INTEGER,
                moderator_id INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_moderation_categories_name
                ON moderation_categories(guild_id, name COLLATE NOCASE);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS authorization_groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                category_id INTEGER,
                scope INTEGER NOT NULL,
                access TEXT NOT NULL,
                judge TEXT NOT NULL,
                linked_command TEXT,
                moderator_id INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS authorization_criteria (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                value INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_authorization_criteria_group
                ON authorization_criteria(group_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS triggers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                category_id INTEGER,
                source TEXT NOT NULL,
                amount INTEGER NOT NULL,
                mode TEXT NOT NULL,
                cooldown_secs INTEGER,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                action_kind TEXT NOT NULL,
                action_data TEXT NOT NULL DEFAULT '{}',
                moderator_id INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reprimands (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                moderator_id INTEGER NOT NULL,
                reason TEXT,
                source TEXT NOT NULL,
                status TEXT NOT NULL,
                category_id INTEGER,
                trigger_id INTEGER,
                kind TEXT NOT NULL,
                action_data TEXT NOT NULL DEFAULT '{}',
                weight INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                started_at TEXT NOT NULL,
                length_secs INTEGER,
                expire_at TEXT,
                ended_at TEXT,
                modified_by INTEGER,
                modified_at TEXT,
                modified_reason TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_reprimands_user_guild
                ON reprimands(guild_id, user_id, kind, status);
            CREATE INDEX IF NOT EXISTS idx_reprimands_expiry
                ON reprimands(status, expire_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS temporary_roles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                role_id INTEGER NOT NULL,
                user_id INTEGER,
                moderator_id INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                length_secs INTEGER NOT NULL,
                expire_at TEXT,
                ended_at TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    async fn load_criteria(
        &self,
        guild_id: u64,
    ) -> Result<HashMap<i64, Vec<Criterion>>, ModerationError> {
        let rows = sqlx::query(
            r#"
            SELECT c.group_id, c.kind, c.value
            FROM authorization_criteria c
            JOIN authorization_groups g ON g.id = c.group_id
            WHERE g.guild_id = ?
            ORDER BY c.id
            "#,
        )
        .bind(guild_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut criteria: HashMap<i64, Vec<Criterion>> = HashMap::new();
        for row in rows {
            let kind: String = row.get("kind");
            let value: i64 = row.get("value");
            let criterion = Criterion::from_parts(&kind, value as u64)
                .ok_or_else(|| corrupt("criterion kind", &kind))?;
            criteria
                .entry(row.get("group_id"))
                .or_default()
                .push(criterion);
        }
        Ok(criteria)
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn storage(e: sqlx::Error) -> ModerationError {
    ModerationError::StorageError(e.to_string())
}

fn corrupt(what: &str, value: &str) -> ModerationError {
    ModerationError::StorageError(format!("unknown {} '{}'", what, value))
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ModerationError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| corrupt("timestamp", value))
}

fn get_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, ModerationError> {
    parse_timestamp(&row.get::<String, _>(column))
}

fn get_optional_timestamp(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<DateTime<Utc>>, ModerationError> {
    row.get::<Option<String>, _>(column)
        .map(|value| parse_timestamp(&value))
        .transpose()
}

fn get_id(row: &SqliteRow, column: &str) -> u64 {
    row.get::<i64, _>(column) as u64
}

fn get_optional_id(row: &SqliteRow, column: &str) -> Option<u64> {
    row.get::<Option<i64>, _>(column).map(|v| v as u64)
}

fn get_duration(row: &SqliteRow, column: &str) -> Option<Duration> {
    row.get::<Option<i64>, _>(column).map(Duration::seconds)
}

fn secs(length: Option<Duration>) -> Option<i64> {
    length.map(|l| l.num_seconds())
}

/// Kind-specific fields of a reprimand action, stored as JSON next to its kind.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ActionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delete_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    templates: Option<Vec<RoleTemplate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

fn encode_action(action: &ReprimandAction) -> Result<String, ModerationError> {
    let data = match action {
        ReprimandAction::Note | ReprimandAction::Notice | ReprimandAction::Kick => {
            ActionData::default()
        }
        ReprimandAction::Warning { count } => ActionData {
            count: Some(*count),
            ..Default::default()
        },
        ReprimandAction::Ban {
            delete_days,
            length,
        } => ActionData {
            delete_days: Some(*delete_days),
            length_secs: secs(*length),
            ..Default::default()
        },
        ReprimandAction::Mute { length } => ActionData {
            length_secs: secs(*length),
            ..Default::default()
        },
        ReprimandAction::Timeout { length } => ActionData {
            length_secs: Some(length.num_seconds()),
            ..Default::default()
        },
        ReprimandAction::Roles { templates, length } => ActionData {
            templates: Some(templates.clone()),
            length_secs: secs(*length),
            ..Default::default()
        },
        ReprimandAction::Censored { content } => ActionData {
            content: Some(content.clone()),
            ..Default::default()
        },
    };
    serde_json::to_string(&data).map_err(|e| ModerationError::StorageError(e.to_string()))
}

fn decode_action(kind: &str, data: &str) -> Result<ReprimandAction, ModerationError> {
    let kind = ReprimandKind::parse(kind).ok_or_else(|| corrupt("reprimand kind", kind))?;
    let data: ActionData =
        serde_json::from_str(data).map_err(|e| ModerationError::StorageError(e.to_string()))?;
    let length = data.length_secs.map(Duration::seconds);

    Ok(match kind {
        ReprimandKind::Note => ReprimandAction::Note,
        ReprimandKind::Notice => ReprimandAction::Notice,
        ReprimandKind::Warning => ReprimandAction::Warning {
            count: data.count.unwrap_or(1),
        },
        ReprimandKind::Kick => ReprimandAction::Kick,
        ReprimandKind::Ban => ReprimandAction::Ban {
            delete_days: data.delete_days.unwrap_or(0),
            length,
        },
        ReprimandKind::Mute => ReprimandAction::Mute { length },
        ReprimandKind::Timeout => ReprimandAction::Timeout {
            length: length.ok_or_else(|| corrupt("timeout length", "null"))?,
        },
        ReprimandKind::Role => ReprimandAction::Roles {
            templates: data.templates.unwrap_or_default(),
            length,
        },
        ReprimandKind::Censored => ReprimandAction::Censored {
            content: data.content.unwrap_or_default(),
        },
    })
}

/// SQL fragment and bind value for a category filter.
fn category_clause(filter: CategoryFilter) -> (&'static str, Option<i64>) {
    match filter {
        CategoryFilter::All => ("", None),
        CategoryFilter::None => (" AND category_id IS NULL", None),
        CategoryFilter::Only(id) => (" AND category_id = ?", Some(id.0)),
    }
}

fn rules_from_row(row: &SqliteRow) -> ModerationRules {
    ModerationRules {
        guild_id: get_id(row, "guild_id"),
        mute_role_id: get_optional_id(row, "mute_role_id"),
        replace_mutes: row.get("replace_mutes"),
        notice_expiry: get_duration(row, "notice_expiry_secs"),
        warning_expiry: get_duration(row, "warning_expiry_secs"),
        censored_expiry: get_duration(row, "censored_expiry_secs"),
        log_channel_id: get_optional_id(row, "log_channel_id"),
    }
}

fn category_from_row(row: &SqliteRow) -> Result<ModerationCategory, ModerationError> {
    Ok(ModerationCategory {
        id: CategoryId(row.get("id")),
        guild_id: get_id(row, "guild_id"),
        name: row.get("name"),
        mute_role_id: get_optional_id(row, "mute_role_id"),
        replace_mutes: row.get("replace_mutes"),
        notice_expiry: get_duration(row, "notice_expiry_secs"),
        warning_expiry: get_duration(row, "warning_expiry_secs"),
        censored_expiry: get_duration(row, "censored_expiry_secs"),
        moderator_id: get_id(row, "moderator_id"),
        created_at: get_timestamp(row, "created_at")?,
    })
}

fn group_from_row(
    row: &SqliteRow,
    criteria: &mut HashMap<i64, Vec<Criterion>>,
) -> Result<AuthorizationGroup, ModerationError> {
    let id: i64 = row.get("id");
    let access: String = row.get("access");
    let judge: String = row.get("judge");
    Ok(AuthorizationGroup {
        id: GroupId(id),
        guild_id: get_id(row, "guild_id"),
        category_id: row.get::<Option<i64>, _>("category_id").map(CategoryId),
        scope: AuthorizationScope::from_bits(row.get::<i64, _>("scope") as u64),
        access: AccessType::parse(&access).ok_or_else(|| corrupt("access type", &access))?,
        judge: JudgeType::parse(&judge).ok_or_else(|| corrupt("judge type", &judge))?,
        criteria: criteria.remove(&id).unwrap_or_default(),
        linked_command: row.get("linked_command"),
        moderator_id: get_id(row, "moderator_id"),
        created_at: get_timestamp(row, "created_at")?,
    })
}

fn trigger_from_row(row: &SqliteRow) -> Result<Trigger, ModerationError> {
    let source: String = row.get("source");
    let mode: String = row.get("mode");
    let action_kind: String = row.get("action_kind");
    let action_data: String = row.get("action_data");
    Ok(Trigger {
        id: TriggerId(row.get("id")),
        guild_id: get_id(row, "guild_id"),
        category_id: row.get::<Option<i64>, _>("category_id").map(CategoryId),
        source: TriggerSource::parse(&source).ok_or_else(|| corrupt("trigger source", &source))?,
        amount: row.get::<i64, _>("amount") as u64,
        mode: TriggerMode::parse(&mode).ok_or_else(|| corrupt("trigger mode", &mode))?,
        cooldown: get_duration(row, "cooldown_secs"),
        is_active: row.get("is_active"),
        action: decode_action(&action_kind, &action_data)?,
        moderator_id: get_id(row, "moderator_id"),
        created_at: get_timestamp(row, "created_at")?,
    })
}

fn reprimand_from_row(row: &SqliteRow) -> Result<Reprimand, ModerationError> {
    let source: String = row.get("source");
    let status: String = row.get("status");
    let kind: String = row.get("kind");
    let action_data: String = row.get("action_data");

    let modified = match (
        get_optional_id(row, "modified_by"),
        get_optional_timestamp(row, "modified_at")?,
    ) {
        (Some(moderator_id), Some(at)) => Some(Modification {
            moderator_id,
            at,
            reason: row.get("modified_reason"),
        }),
        _ => None,
    };

    Ok(Reprimand {
        id: ReprimandId(row.get("id")),
        guild_id: get_id(row, "guild_id"),
        user_id: get_id(row, "user_id"),
        moderator_id: get_id(row, "moderator_id"),
        reason: row.get("reason"),
        source: ReprimandSource::parse(&source)
            .ok_or_else(|| corrupt("reprimand source", &source))?,
        status: ReprimandStatus::parse(&status)
            .ok_or_else(|| corrupt("reprimand status", &status))?,
        category_id: row.get::<Option<i64>, _>("category_id").map(CategoryId),
        trigger_id: row.get::<Option<i64>, _>("trigger_id").map(TriggerId),
        action: decode_action(&kind, &action_data)?,
        created_at: get_timestamp(row, "created_at")?,
        started_at: get_timestamp(row, "started_at")?,
        length: get_duration(row, "length_secs"),
        expire_at: get_optional_timestamp(row, "expire_at")?,
        ended_at: get_optional_timestamp(row, "ended_at")?,
        modified,
    })
}

fn temporary_role_from_row(row: &SqliteRow) -> Result<TemporaryRole, ModerationError> {
    Ok(TemporaryRole {
        id: TemporaryRoleId(row.get("id")),
        guild_id: get_id(row, "guild_id"),
        role_id: get_id(row, "role_id"),
        user_id: get_optional_id(row, "user_id"),
        moderator_id: get_id(row, "moderator_id"),
        started_at: get_timestamp(row, "started_at")?,
        length: Duration::seconds(row.get("length_secs")),
        expire_at: get_optional_timestamp(row, "expire_at")?,
        ended_at: get_optional_timestamp(row, "ended_at")?,
    })
}

// ============================================================================
// STORE IMPLEMENTATION
// ============================================================================

#[async_trait]
impl ModerationStore for SqliteModerationStore {
    async fn get_rules(&self, guild_id: u64) -> Result<ModerationRules, ModerationError> {
        let row = sqlx::query("SELECT * FROM moderation_rules WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        Ok(row
            .map(|row| rules_from_row(&row))
            .unwrap_or_else(|| ModerationRules::new(guild_id)))
    }

    async fn save_rules(&self, rules: &ModerationRules) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            INSERT INTO moderation_rules (
                guild_id, mute_role_id, replace_mutes, notice_expiry_secs,
                warning_expiry_secs, censored_expiry_secs, log_channel_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(guild_id) DO UPDATE SET
                mute_role_id = excluded.mute_role_id,
                replace_mutes = excluded.replace_mutes,
                notice_expiry_secs = excluded.notice_expiry_secs,
                warning_expiry_secs = excluded.warning_expiry_secs,
                censored_expiry_secs = excluded.censored_expiry_secs,
                log_channel_id = excluded.log_channel_id
            "#,
        )
        .bind(rules.guild_id as i64)
        .bind(rules.mute_role_id.map(|id| id as i64))
        .bind(rules.replace_mutes)
        .bind(secs(rules.notice_expiry))
        .bind(secs(rules.warning_expiry))
        .bind(secs(rules.censored_expiry))
        .bind(rules.log_channel_id.map(|id| id as i64))
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn get_category(
        &self,
        guild_id: u64,
        id: CategoryId,
    ) -> Result<Option<ModerationCategory>, ModerationError> {
        let row = sqlx::query("SELECT * FROM moderation_categories WHERE id = ? AND guild_id = ?")
            .bind(id.0)
            .bind(guild_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.map(|row| category_from_row(&row)).transpose()
    }

    async fn find_category(
        &self,
        guild_id: u64,
        name: &str,
    ) -> Result<Option<ModerationCategory>, ModerationError> {
        let row = sqlx::query(
            "SELECT * FROM moderation_categories WHERE guild_id = ? AND name = ? COLLATE NOCASE",
        )
        .bind(guild_id as i64)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.map(|row| category_from_row(&row)).transpose()
    }

    async fn list_categories(
        &self,
        guild_id: u64,
    ) -> Result<Vec<ModerationCategory>, ModerationError> {
        let rows = sqlx::query("SELECT * FROM moderation_categories WHERE guild_id = ? ORDER BY id")
            .bind(guild_id as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(category_from_row).collect()
    }

    async fn insert_category(
        &self,
        guild_id: u64,
        name: &str,
        moderator_id: u64,
    ) -> Result<ModerationCategory, ModerationError> {
        let created_at = Utc::now();
        let id = sqlx::query(
            r#"
            INSERT INTO moderation_categories (guild_id, name, moderator_id, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(guild_id as i64)
        .bind(name)
        .bind(moderator_id as i64)
        .bind(timestamp(created_at))
        .execute(&self.pool)
        .await
        .map_err(storage)?
        .last_insert_rowid();

        Ok(ModerationCategory {
            id: CategoryId(id),
            guild_id,
            name: name.to_string(),
            mute_role_id: None,
            replace_mutes: None,
            notice_expiry: None,
            warning_expiry: None,
            censored_expiry: None,
            moderator_id,
            created_at,
        })
    }

    async fn update_category(&self, category: &ModerationCategory) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            UPDATE moderation_categories SET
                name = ?, mute_role_id = ?, replace_mutes = ?, notice_expiry_secs = ?,
                warning_expiry_secs = ?, censored_expiry_secs = ?
            WHERE id = ? AND guild_id = ?
            "#,
        )
        .bind(&category.name)
        .bind(category.mute_role_id.map(|id| id as i64))
        .bind(category.replace_mutes)
        .bind(secs(category.notice_expiry))
        .bind(secs(category.warning_expiry))
        .bind(secs(category.censored_expiry))
        .bind(category.id.0)
        .bind(category.guild_id as i64)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn delete_category(
        &self,
        guild_id: u64,
        id: CategoryId,
    ) -> Result<bool, ModerationError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let removed = sqlx::query("DELETE FROM moderation_categories WHERE id = ? AND guild_id = ?")
            .bind(id.0)
            .bind(guild_id as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage)?
            .rows_affected()
            > 0;

        if removed {
            sqlx::query(
                r#"
                DELETE FROM authorization_criteria WHERE group_id IN (
                    SELECT id FROM authorization_groups WHERE guild_id = ? AND category_id = ?
                )
                "#,
            )
            .bind(guild_id as i64)
            .bind(id.0)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

            // Groups go with the category; triggers and reprimands become global.
            sqlx::query("DELETE FROM authorization_groups WHERE guild_id = ? AND category_id = ?")
                .bind(guild_id as i64)
                .bind(id.0)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;

            for table in ["triggers", "reprimands"] {
                sqlx::query(&format!(
                    "UPDATE {} SET category_id = NULL WHERE guild_id = ? AND category_id = ?",
                    table
                ))
                .bind(guild_id as i64)
                .bind(id.0)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
            }
        }

        tx.commit().await.map_err(storage)?;
        Ok(removed)
    }

    async fn list_groups(&self, guild_id: u64) -> Result<Vec<AuthorizationGroup>, ModerationError> {
        let mut criteria = self.load_criteria(guild_id).await?;
        let rows = sqlx::query("SELECT * FROM authorization_groups WHERE guild_id = ? ORDER BY id")
            .bind(guild_id as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        rows.iter()
            .map(|row| group_from_row(row, &mut criteria))
            .collect()
    }

    async fn insert_group(
        &self,
        group: NewAuthorizationGroup,
    ) -> Result<AuthorizationGroup, ModerationError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let id = sqlx::query(
            r#"
            INSERT INTO authorization_groups (
                guild_id, category_id, scope, access, judge, linked_command, moderator_id, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(group.guild_id as i64)
        .bind(group.category_id.map(|c| c.0))
        .bind(group.scope.bits() as i64)
        .bind(group.access.as_str())
        .bind(group.judge.as_str())
        .bind(&group.linked_command)
        .bind(group.moderator_id as i64)
        .bind(timestamp(group.created_at))
        .execute(&mut *tx)
        .await
        .map_err(storage)?
        .last_insert_rowid();

        for criterion in &group.criteria {
            sqlx::query("INSERT INTO authorization_criteria (group_id, kind, value) VALUES (?, ?, ?)")
                .bind(id)
                .bind(criterion.kind_str())
                .bind(criterion.value() as i64)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }

        tx.commit().await.map_err(storage)?;
        Ok(group.into_group(GroupId(id)))
    }

    async fn delete_group(&self, guild_id: u64, id: GroupId) -> Result<bool, ModerationError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let removed = sqlx::query("DELETE FROM authorization_groups WHERE id = ? AND guild_id = ?")
            .bind(id.0)
            .bind(guild_id as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage)?
            .rows_affected()
            > 0;

        if removed {
            sqlx::query("DELETE FROM authorization_criteria WHERE group_id = ?")
                .bind(id.0)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }

        tx.commit().await.map_err(storage)?;
        Ok(removed)
    }

    async fn list_triggers(&self, guild_id: u64) -> Result<Vec<Trigger>, ModerationError> {
        let rows = sqlx::query("SELECT * FROM triggers WHERE guild_id = ? ORDER BY id")
            .bind(guild_id as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(trigger_from_row).collect()
    }

    async fn get_trigger(
        &self,
        guild_id: u64,
        id: TriggerId,
    ) -> Result<Option<Trigger>, ModerationError> {
        let row = sqlx::query("SELECT * FROM triggers WHERE id = ? AND guild_id = ?")
            .bind(id.0)
            .bind(guild_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(trigger_from_row).transpose()
    }

    async fn insert_trigger(&self, trigger: NewTrigger) -> Result<Trigger, ModerationError> {
        let id = sqlx::query(
            r#"
            INSERT INTO triggers (
                guild_id, category_id, source, amount, mode, cooldown_secs, is_active,
                action_kind, action_data, moderator_id, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)
            "#,
        )
        .bind(trigger.guild_id as i64)
        .bind(trigger.category_id.map(|c| c.0))
        .bind(trigger.source.as_str())
        .bind(trigger.amount as i64)
        .bind(trigger.mode.as_str())
        .bind(secs(trigger.cooldown))
        .bind(trigger.action.kind().as_str())
        .bind(encode_action(&trigger.action)?)
        .bind(trigger.moderator_id as i64)
        .bind(timestamp(trigger.created_at))
        .execute(&self.pool)
        .await
        .map_err(storage)?
        .last_insert_rowid();

        Ok(trigger.into_trigger(TriggerId(id)))
    }

    async fn set_trigger_active(
        &self,
        guild_id: u64,
        id: TriggerId,
        active: bool,
        moderator_id: u64,
    ) -> Result<bool, ModerationError> {
        let result = sqlx::query(
            "UPDATE triggers SET is_active = ?, moderator_id = ? WHERE id = ? AND guild_id = ?",
        )
        .bind(active)
        .bind(moderator_id as i64)
        .bind(id.0)
        .bind(guild_id as i64)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_trigger(&self, guild_id: u64, id: TriggerId) -> Result<bool, ModerationError> {
        let result = sqlx::query("DELETE FROM triggers WHERE id = ? AND guild_id = ?")
            .bind(id.0)
            .bind(guild_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn trigger_usage(&self, guild_id: u64, id: TriggerId) -> Result<u64, ModerationError> {
        let row = sqlx::query("SELECT COUNT(*) FROM reprimands WHERE guild_id = ? AND trigger_id = ?")
            .bind(guild_id as i64)
            .bind(id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        Ok(row.get::<i64, _>(0) as u64)
    }

    async fn last_triggered_at(
        &self,
        guild_id: u64,
        user_id: u64,
        id: TriggerId,
    ) -> Result<Option<DateTime<Utc>>, ModerationError> {
        let row = sqlx::query(
            r#"
            SELECT created_at FROM reprimands
            WHERE guild_id = ? AND user_id = ? AND trigger_id = ?
            ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.map(|row| get_timestamp(&row, "created_at")).transpose()
    }

    async fn insert_reprimand(
        &self,
        reprimand: NewReprimand,
    ) -> Result<Reprimand, ModerationError> {
        let id = sqlx::query(
            r#"
            INSERT INTO reprimands (
                guild_id, user_id, moderator_id, reason, source, status, category_id,
                trigger_id, kind, action_data, weight, created_at, started_at, length_secs,
                expire_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(reprimand.guild_id as i64)
        .bind(reprimand.user_id as i64)
        .bind(reprimand.moderator_id as i64)
        .bind(&reprimand.reason)
        .bind(reprimand.source.as_str())
        .bind(ReprimandStatus::Added.as_str())
        .bind(reprimand.category_id.map(|c| c.0))
        .bind(reprimand.trigger_id.map(|t| t.0))
        .bind(reprimand.action.kind().as_str())
        .bind(encode_action(&reprimand.action)?)
        .bind(reprimand.action.weight() as i64)
        .bind(timestamp(reprimand.started_at))
        .bind(timestamp(reprimand.started_at))
        .bind(secs(reprimand.length))
        .bind(reprimand.expire_at().map(timestamp))
        .execute(&self.pool)
        .await
        .map_err(storage)?
        .last_insert_rowid();

        Ok(reprimand.into_reprimand(ReprimandId(id)))
    }

    async fn get_reprimand(
        &self,
        guild_id: u64,
        id: ReprimandId,
    ) -> Result<Option<Reprimand>, ModerationError> {
        let row = sqlx::query("SELECT * FROM reprimands WHERE id = ? AND guild_id = ?")
            .bind(id.0)
            .bind(guild_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(reprimand_from_row).transpose()
    }

    async fn update_reprimand(&self, reprimand: &Reprimand) -> Result<(), ModerationError> {
        let modified = reprimand.modified.as_ref();
        sqlx::query(
            r#"
            UPDATE reprimands SET
                reason = ?, status = ?, expire_at = ?, ended_at = ?,
                modified_by = ?, modified_at = ?, modified_reason = ?
            WHERE id = ? AND guild_id = ?
            "#,
        )
        .bind(&reprimand.reason)
        .bind(reprimand.status.as_str())
        .bind(reprimand.expire_at.map(timestamp))
        .bind(reprimand.ended_at.map(timestamp))
        .bind(modified.map(|m| m.moderator_id as i64))
        .bind(modified.map(|m| timestamp(m.at)))
        .bind(modified.and_then(|m| m.reason.clone()))
        .bind(reprimand.id.0)
        .bind(reprimand.guild_id as i64)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn delete_reprimand(
        &self,
        guild_id: u64,
        id: ReprimandId,
    ) -> Result<bool, ModerationError> {
        let result = sqlx::query("DELETE FROM reprimands WHERE id = ? AND guild_id = ?")
            .bind(id.0)
            .bind(guild_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_reprimands(
        &self,
        guild_id: u64,
        user_id: u64,
        category: CategoryFilter,
    ) -> Result<Vec<Reprimand>, ModerationError> {
        let (clause, category_id) = category_clause(category);
        let sql = format!(
            "SELECT * FROM reprimands WHERE guild_id = ? AND user_id = ?{} ORDER BY id DESC",
            clause
        );

        let mut query = sqlx::query(&sql)
            .bind(guild_id as i64)
            .bind(user_id as i64);
        if let Some(category_id) = category_id {
            query = query.bind(category_id);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(storage)?;
        rows.iter().map(reprimand_from_row).collect()
    }

    async fn count_reprimands(
        &self,
        guild_id: u64,
        user_id: u64,
        kinds: &[ReprimandKind],
        category: CategoryFilter,
    ) -> Result<u64, ModerationError> {
        if kinds.is_empty() {
            return Ok(0);
        }

        let (clause, category_id) = category_clause(category);
        let placeholders = vec!["?"; kinds.len()].join(", ");
        let sql = format!(
            r#"
            SELECT COALESCE(SUM(weight), 0) FROM reprimands
            WHERE guild_id = ? AND user_id = ? AND status != ? AND kind IN ({}){}
            "#,
            placeholders, clause
        );

        let mut query = sqlx::query(&sql)
            .bind(guild_id as i64)
            .bind(user_id as i64)
            .bind(ReprimandStatus::Pardoned.as_str());
        for kind in kinds {
            query = query.bind(kind.as_str());
        }
        if let Some(category_id) = category_id {
            query = query.bind(category_id);
        }

        let row = query.fetch_one(&self.pool).await.map_err(storage)?;
        Ok(row.get::<i64, _>(0) as u64)
    }

    async fn find_active(
        &self,
        guild_id: u64,
        user_id: u64,
        kind: ReprimandKind,
        category: CategoryFilter,
    ) -> Result<Option<Reprimand>, ModerationError> {
        let (clause, category_id) = category_clause(category);
        let sql = format!(
            r#"
            SELECT * FROM reprimands
            WHERE guild_id = ? AND user_id = ? AND kind = ? AND status = ?{}
            ORDER BY id DESC LIMIT 1
            "#,
            clause
        );

        let mut query = sqlx::query(&sql)
            .bind(guild_id as i64)
            .bind(user_id as i64)
            .bind(kind.as_str())
            .bind(ReprimandStatus::Added.as_str());
        if let Some(category_id) = category_id {
            query = query.bind(category_id);
        }

        let row = query.fetch_optional(&self.pool).await.map_err(storage)?;
        row.as_ref().map(reprimand_from_row).transpose()
    }

    async fn list_expiring_reprimands(
        &self,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Reprimand>, ModerationError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM reprimands
            WHERE status = ? AND expire_at IS NOT NULL AND (? IS NULL OR expire_at <= ?)
            ORDER BY expire_at
            "#,
        )
        .bind(ReprimandStatus::Added.as_str())
        .bind(until.map(timestamp))
        .bind(until.map(timestamp))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(reprimand_from_row).collect()
    }

    async fn insert_temporary_role(
        &self,
        role: NewTemporaryRole,
    ) -> Result<TemporaryRole, ModerationError> {
        let expire_at = role.started_at + role.length;
        let id = sqlx::query(
            r#"
            INSERT INTO temporary_roles (
                guild_id, role_id, user_id, moderator_id, started_at, length_secs, expire_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(role.guild_id as i64)
        .bind(role.role_id as i64)
        .bind(role.user_id.map(|id| id as i64))
        .bind(role.moderator_id as i64)
        .bind(timestamp(role.started_at))
        .bind(role.length.num_seconds())
        .bind(timestamp(expire_at))
        .execute(&self.pool)
        .await
        .map_err(storage)?
        .last_insert_rowid();

        Ok(role.into_temporary_role(TemporaryRoleId(id)))
    }

    async fn get_temporary_role(
        &self,
        id: TemporaryRoleId,
    ) -> Result<Option<TemporaryRole>, ModerationError> {
        let row = sqlx::query("SELECT * FROM temporary_roles WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.map(|row| temporary_role_from_row(&row)).transpose()
    }

    async fn list_expiring_temporary_roles(
        &self,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<TemporaryRole>, ModerationError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM temporary_roles
            WHERE ended_at IS NULL AND expire_at IS NOT NULL AND (? IS NULL OR expire_at <= ?)
            ORDER BY expire_at
            "#,
        )
        .bind(until.map(timestamp))
        .bind(until.map(timestamp))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(temporary_role_from_row).collect()
    }

    async fn end_temporary_role(
        &self,
        id: TemporaryRoleId,
        ended_at: DateTime<Utc>,
    ) -> Result<bool, ModerationError> {
        let result = sqlx::query(
            "UPDATE temporary_roles SET ended_at = ? WHERE id = ? AND ended_at IS NULL",
        )
        .bind(timestamp(ended_at))
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }
}
