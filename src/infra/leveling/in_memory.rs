// In-memory implementation of ScoreStore.
//
// Used by the core tests and handy for running the bot without a database.
// DashMap's entry guards hold the shard lock for the whole read-modify-write,
// which is what gives the increment its atomicity guarantee.

use crate::core::leveling::{
    LeaderboardEntry, LeaderboardScope, LevelingError, RankSettings, ScoreRow, ScoreStore,
    SettingKey,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

#[derive(Clone, Debug)]
struct StoredScore {
    exp: u64,
    level: u32,
    mention: bool,
    /// Insertion order, for the stable ranking tie-break.
    seq: u64,
}

#[derive(Clone, Debug)]
struct StoredWeekly {
    exp: u64,
    seq: u64,
}

pub struct InMemoryScoreStore {
    users: DashMap<u64, StoredScore>,
    weekly: DashMap<u64, StoredWeekly>,
    settings: RwLock<RankSettings>,
    next_seq: AtomicU64,
}

impl InMemoryScoreStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            weekly: DashMap::new(),
            settings: RwLock::new(RankSettings::default()),
            next_seq: AtomicU64::new(0),
        }
    }

    fn take_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn read_settings(&self) -> Result<RankSettings, LevelingError> {
        self.settings
            .read()
            .map(|guard| *guard)
            .map_err(|_| LevelingError::Storage("settings lock poisoned".to_string()))
    }
}

impl Default for InMemoryScoreStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScoreStore for InMemoryScoreStore {
    async fn add_exp(&self, user_id: u64, amount: u64) -> Result<u64, LevelingError> {
        let mut entry = self.users.entry(user_id).or_insert_with(|| StoredScore {
            exp: 0,
            level: 0,
            mention: true,
            seq: self.take_seq(),
        });
        entry.exp = entry.exp.saturating_add(amount);
        Ok(entry.exp)
    }

    async fn add_weekly_exp(&self, user_id: u64, amount: u64) -> Result<(), LevelingError> {
        let mut entry = self.weekly.entry(user_id).or_insert_with(|| StoredWeekly {
            exp: 0,
            seq: self.take_seq(),
        });
        entry.exp = entry.exp.saturating_add(amount);
        Ok(())
    }

    async fn cache_level(&self, user_id: u64, level: u32) -> Result<(), LevelingError> {
        if let Some(mut entry) = self.users.get_mut(&user_id) {
            if level > entry.level {
                entry.level = level;
            }
        }
        Ok(())
    }

    async fn get_row(&self, user_id: u64) -> Result<Option<ScoreRow>, LevelingError> {
        Ok(self.users.get(&user_id).map(|entry| ScoreRow {
            exp: entry.exp,
            mention_on_level_up: entry.mention,
        }))
    }

    async fn get_weekly_exp(&self, user_id: u64) -> Result<u64, LevelingError> {
        Ok(self.weekly.get(&user_id).map(|entry| entry.exp).unwrap_or(0))
    }

    async fn set_mention(&self, user_id: u64, enabled: bool) -> Result<(), LevelingError> {
        let mut entry = self.users.entry(user_id).or_insert_with(|| StoredScore {
            exp: 0,
            level: 0,
            mention: true,
            seq: self.take_seq(),
        });
        entry.mention = enabled;
        Ok(())
    }

    async fn reset(&self, user_id: u64) -> Result<(), LevelingError> {
        self.users.remove(&user_id);
        self.weekly.remove(&user_id);
        Ok(())
    }

    async fn reset_weekly(&self) -> Result<(), LevelingError> {
        self.weekly.clear();
        Ok(())
    }

    async fn ranking(
        &self,
        scope: LeaderboardScope,
    ) -> Result<Vec<LeaderboardEntry>, LevelingError> {
        let mut rows: Vec<(u64, u64, u64)> = match scope {
            LeaderboardScope::AllTime => self
                .users
                .iter()
                .filter(|entry| entry.exp > 0)
                .map(|entry| (*entry.key(), entry.exp, entry.seq))
                .collect(),
            LeaderboardScope::Weekly => self
                .weekly
                .iter()
                .filter(|entry| entry.exp > 0)
                .map(|entry| (*entry.key(), entry.exp, entry.seq))
                .collect(),
        };

        // Highest exp first; equal scores keep first-award order
        rows.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        Ok(rows
            .into_iter()
            .map(|(user_id, exp, _)| LeaderboardEntry { user_id, exp })
            .collect())
    }

    async fn get_settings(&self) -> Result<RankSettings, LevelingError> {
        self.read_settings()
    }

    async fn put_setting(&self, key: SettingKey, value: i64) -> Result<(), LevelingError> {
        let mut guard = self
            .settings
            .write()
            .map_err(|_| LevelingError::Storage("settings lock poisoned".to_string()))?;
        match key {
            SettingKey::TextExp => guard.text_exp = value as u64,
            SettingKey::VoiceExpPerMinute => guard.vc_exp_per_min = value as u64,
            SettingKey::CooldownSecs => guard.cooldown_secs = value as u64,
            SettingKey::WeeklyEnabled => guard.weekly_enabled = value != 0,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_users_have_no_row() {
        let store = InMemoryScoreStore::new();
        assert!(store.get_row(123).await.unwrap().is_none());
        assert_eq!(store.get_weekly_exp(123).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn add_exp_accumulates_and_returns_the_new_total() {
        let store = InMemoryScoreStore::new();

        assert_eq!(store.add_exp(123, 100).await.unwrap(), 100);
        assert_eq!(store.add_exp(123, 50).await.unwrap(), 150);

        let row = store.get_row(123).await.unwrap().unwrap();
        assert_eq!(row.exp, 150);
        assert!(row.mention_on_level_up);
    }

    #[tokio::test]
    async fn ranking_orders_by_exp_then_insertion() {
        let store = InMemoryScoreStore::new();

        store.add_exp(1, 500).await.unwrap();
        store.add_exp(2, 300).await.unwrap();
        store.add_exp(3, 700).await.unwrap();
        store.add_exp(4, 300).await.unwrap(); // ties with 2, inserted later

        let ranking = store.ranking(LeaderboardScope::AllTime).await.unwrap();
        let ids: Vec<u64> = ranking.iter().map(|e| e.user_id).collect();
        assert_eq!(ids, vec![3, 1, 2, 4]);
    }

    #[tokio::test]
    async fn cache_level_never_regresses() {
        let store = InMemoryScoreStore::new();

        store.add_exp(1, 10).await.unwrap();
        store.cache_level(1, 5).await.unwrap();
        store.cache_level(1, 3).await.unwrap();

        assert_eq!(store.users.get(&1).unwrap().level, 5);
    }

    #[tokio::test]
    async fn settings_start_at_the_documented_defaults() {
        let store = InMemoryScoreStore::new();

        let settings = store.get_settings().await.unwrap();
        assert_eq!(settings, RankSettings::default());
        assert_eq!(settings.text_exp, 5);
        assert_eq!(settings.vc_exp_per_min, 5);
        assert_eq!(settings.cooldown_secs, 60);
        assert!(settings.weekly_enabled);
    }

    #[tokio::test]
    async fn reset_removes_both_ledgers() {
        let store = InMemoryScoreStore::new();

        store.add_exp(1, 40).await.unwrap();
        store.add_weekly_exp(1, 40).await.unwrap();
        store.reset(1).await.unwrap();

        assert!(store.get_row(1).await.unwrap().is_none());
        assert_eq!(store.get_weekly_exp(1).await.unwrap(), 0);
    }
}
