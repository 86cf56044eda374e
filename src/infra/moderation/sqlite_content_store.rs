// SQLite-backed access to moderated content.
//
// Tables:
// - reviews:       user reviews
// - event_reviews: reviews attached to events
//
// Both tables carry the same moderation columns. Reasons are stored per
// language in their own columns (moderation_reason_en, moderation_reason_ru).

use super::sqlite_job_store::{format_timestamp, parse_timestamp};
use crate::core::moderation::{
    ContentStore, Language, ModeratableContent, ModerationLevel, ModerationSource,
    ModerationState, StoreError, TargetRef, TargetType,
};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use std::collections::BTreeMap;

pub struct SqliteContentStore {
    pool: Pool<Sqlite>,
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn table_for(target_type: TargetType) -> &'static str {
    match target_type {
        TargetType::Review => "reviews",
        TargetType::EventReview => "event_reviews",
    }
}

fn reason_column(language: Language) -> &'static str {
    match language {
        Language::En => "moderation_reason_en",
        Language::Ru => "moderation_reason_ru",
    }
}

impl SqliteContentStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for table in [
            table_for(TargetType::Review),
            table_for(TargetType::EventReview),
        ] {
            let ddl = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    text TEXT NOT NULL,
                    moderation_level TEXT NOT NULL DEFAULT 'Pending',
                    moderation_source TEXT NOT NULL DEFAULT 'None',
                    moderated_at TEXT,
                    moderation_reason TEXT NOT NULL DEFAULT '',
                    moderation_reason_en TEXT,
                    moderation_reason_ru TEXT
                );
                "#,
                table
            );
            sqlx::query(&ddl)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }

        Ok(())
    }

    /// Insert a fresh, unmoderated record.
    #[cfg(test)]
    pub async fn insert_content(
        &self,
        target_type: TargetType,
        text: &str,
    ) -> Result<TargetRef, StoreError> {
        let sql = format!("INSERT INTO {} (text) VALUES (?)", table_for(target_type));
        let result = sqlx::query(&sql)
            .bind(text)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(TargetRef::new(target_type, result.last_insert_rowid()))
    }

    #[cfg(test)]
    pub async fn delete_content(&self, target: TargetRef) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = ?", table_for(target.target_type));
        sqlx::query(&sql)
            .bind(target.target_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    fn map_row(target: TargetRef, row: &SqliteRow) -> Result<ModeratableContent, StoreError> {
        let level: String = row.get("moderation_level");
        let source: String = row.get("moderation_source");
        let moderated_at: Option<String> = row.get("moderated_at");

        let mut reason_localized = BTreeMap::new();
        for language in Language::ALL {
            let value: Option<String> = row.get(reason_column(language));
            if let Some(value) = value {
                reason_localized.insert(language, value);
            }
        }

        Ok(ModeratableContent {
            target,
            text: row.get("text"),
            moderation: ModerationState {
                level: level
                    .parse::<ModerationLevel>()
                    .map_err(StoreError::Corrupt)?,
                source: source
                    .parse::<ModerationSource>()
                    .map_err(StoreError::Corrupt)?,
                moderated_at: moderated_at.as_deref().map(parse_timestamp).transpose()?,
                reason: row.get("moderation_reason"),
                reason_localized,
            },
        })
    }
}

#[async_trait]
impl ContentStore for SqliteContentStore {
    async fn load_content(
        &self,
        target: TargetRef,
    ) -> Result<Option<ModeratableContent>, StoreError> {
        let sql = format!(
            "SELECT * FROM {} WHERE id = ?",
            table_for(target.target_type)
        );
        let row = sqlx::query(&sql)
            .bind(target.target_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(|r| Self::map_row(target, r)).transpose()
    }

    async fn save_moderation(
        &self,
        target: TargetRef,
        state: &ModerationState,
    ) -> Result<(), StoreError> {
        let sql = format!(
            r#"
            UPDATE {}
            SET moderation_level = ?,
                moderation_source = ?,
                moderated_at = ?,
                moderation_reason = ?,
                moderation_reason_en = ?,
                moderation_reason_ru = ?
            WHERE id = ?
            "#,
            table_for(target.target_type)
        );

        let result = sqlx::query(&sql)
            .bind(state.level.as_str())
            .bind(state.source.as_str())
            .bind(state.moderated_at.map(format_timestamp))
            .bind(&state.reason)
            .bind(state.reason_localized.get(&Language::En).cloned())
            .bind(state.reason_localized.get(&Language::Ru).cloned())
            .bind(target.target_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
