// SQLite-backed ScoreStore.
//
// The all-time increment is a single UPSERT with RETURNING, so the
// read-modify-write never happens client-side: SQLite applies
// `exp = exp + ?` under its own write lock and hands back the new total
// in the same statement.

use crate::core::leveling::{
    LeaderboardEntry, LeaderboardScope, LevelingError, RankSettings, ScoreRow, ScoreStore,
    SettingKey,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::time::Duration;

pub struct SqliteScoreStore {
    pool: Pool<Sqlite>,
}

impl SqliteScoreStore {
    pub async fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                exp INTEGER NOT NULL DEFAULT 0,
                level INTEGER NOT NULL DEFAULT 0,
                mention INTEGER NOT NULL DEFAULT 1,
                first_awarded_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS weekly_exp (
                user_id INTEGER PRIMARY KEY,
                exp INTEGER NOT NULL DEFAULT 0,
                first_awarded_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Seed the defaults; existing values win
        let defaults = RankSettings::default();
        let seed = [
            (SettingKey::TextExp, defaults.text_exp as i64),
            (SettingKey::VoiceExpPerMinute, defaults.vc_exp_per_min as i64),
            (SettingKey::CooldownSecs, defaults.cooldown_secs as i64),
            (SettingKey::WeeklyEnabled, defaults.weekly_enabled as i64),
        ];
        for (key, value) in seed {
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key.as_str())
                .bind(value)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl ScoreStore for SqliteScoreStore {
    async fn add_exp(&self, user_id: u64, amount: u64) -> Result<u64, LevelingError> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (user_id, exp, first_awarded_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET exp = exp + excluded.exp
            RETURNING exp
            "#,
        )
        .bind(user_id as i64)
        .bind(amount as i64)
        .bind(Utc::now().timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(row.get::<i64, _>(0) as u64)
    }

    async fn add_weekly_exp(&self, user_id: u64, amount: u64) -> Result<(), LevelingError> {
        sqlx::query(
            r#"
            INSERT INTO weekly_exp (user_id, exp, first_awarded_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET exp = exp + excluded.exp
            "#,
        )
        .bind(user_id as i64)
        .bind(amount as i64)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn cache_level(&self, user_id: u64, level: u32) -> Result<(), LevelingError> {
        // The guard keeps a slow writer from lowering a level a faster
        // concurrent award already recorded
        sqlx::query("UPDATE users SET level = ? WHERE user_id = ? AND level < ?")
            .bind(level as i64)
            .bind(user_id as i64)
            .bind(level as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn get_row(&self, user_id: u64) -> Result<Option<ScoreRow>, LevelingError> {
        let row = sqlx::query("SELECT exp, mention FROM users WHERE user_id = ?")
            .bind(user_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(row.map(|row| ScoreRow {
            exp: row.get::<i64, _>("exp") as u64,
            mention_on_level_up: row.get::<i64, _>("mention") != 0,
        }))
    }

    async fn get_weekly_exp(&self, user_id: u64) -> Result<u64, LevelingError> {
        let row = sqlx::query("SELECT exp FROM weekly_exp WHERE user_id = ?")
            .bind(user_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(row.map(|row| row.get::<i64, _>(0) as u64).unwrap_or(0))
    }

    async fn set_mention(&self, user_id: u64, enabled: bool) -> Result<(), LevelingError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, exp, mention, first_awarded_at)
            VALUES (?, 0, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET mention = excluded.mention
            "#,
        )
        .bind(user_id as i64)
        .bind(enabled as i64)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn reset(&self, user_id: u64) -> Result<(), LevelingError> {
        sqlx::query("DELETE FROM users WHERE user_id = ?")
            .bind(user_id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| LevelingError::Storage(e.to_string()))?;
        sqlx::query("DELETE FROM weekly_exp WHERE user_id = ?")
            .bind(user_id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn reset_weekly(&self) -> Result<(), LevelingError> {
        sqlx::query("DELETE FROM weekly_exp")
            .execute(&self.pool)
            .await
            .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn ranking(
        &self,
        scope: LeaderboardScope,
    ) -> Result<Vec<LeaderboardEntry>, LevelingError> {
        let table = match scope {
            LeaderboardScope::AllTime => "users",
            LeaderboardScope::Weekly => "weekly_exp",
        };
        let query = format!(
            "SELECT user_id, exp FROM {table} WHERE exp > 0 \
             ORDER BY exp DESC, first_awarded_at ASC, user_id ASC"
        );

        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| LeaderboardEntry {
                user_id: row.get::<i64, _>("user_id") as u64,
                exp: row.get::<i64, _>("exp") as u64,
            })
            .collect())
    }

    async fn get_settings(&self) -> Result<RankSettings, LevelingError> {
        let rows = sqlx::query("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LevelingError::Storage(e.to_string()))?;

        let mut settings = RankSettings::default();
        for row in rows {
            let key: String = row.get("key");
            let value: i64 = row.get("value");
            match key.as_str() {
                "text_exp" => settings.text_exp = value as u64,
                "vc_exp_per_min" => settings.vc_exp_per_min = value as u64,
                "cooldown_sec" => settings.cooldown_secs = value as u64,
                "weekly_enabled" => settings.weekly_enabled = value != 0,
                other => tracing::warn!(key = other, "ignoring unknown setting row"),
            }
        }
        Ok(settings)
    }

    async fn put_setting(&self, key: SettingKey, value: i64) -> Result<(), LevelingError> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key.as_str())
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| LevelingError::Storage(e.to_string()))?;

        Ok(())
    }
}
