// Business logic for the rank system. No Discord types in here - the service
// works with primitive ids so the discord layer stays a thin translation.
//
// The service owns three decisions:
//   - how much experience an inbound event is worth (settings-driven),
//   - when an award turns into a level transition (the curve),
//   - which milestones that transition crossed (the milestone table).
// Side effects of a crossing (roles, announcements, audit log) belong to the
// discord layer; the service only reports the transition.

pub mod curve;
pub mod milestones;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

pub use curve::{exp_for_level, exp_for_next_level, level_for_exp};
pub use milestones::{MilestoneTable, MilestoneTier};

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// A user's ledger entry as the rest of the bot sees it. The level is always
/// recomputed from experience; the stored level column is a denormalized
/// cache and is never read back as truth.
#[derive(Debug, Clone)]
pub struct UserScore {
    pub user_id: u64,
    pub exp: u64,
    pub level: u32,
    pub mention_on_level_up: bool,
}

impl UserScore {
    fn absent(user_id: u64) -> Self {
        Self {
            user_id,
            exp: 0,
            level: 0,
            mention_on_level_up: true,
        }
    }
}

/// Raw row handed back by a store. Experience and the mention preference are
/// persisted; the level is derived by the service.
#[derive(Debug, Clone, Copy)]
pub struct ScoreRow {
    pub exp: u64,
    pub mention_on_level_up: bool,
}

/// Returned by an award when the user's level rose, so the caller can react
/// without a second read.
#[derive(Debug, Clone, Copy)]
pub struct LevelUpEvent {
    pub user_id: u64,
    pub old_level: u32,
    pub new_level: u32,
    pub total_exp: u64,
}

/// Where an award came from, for log lines and future per-source tuning.
#[derive(Debug, Clone, Copy)]
pub enum AwardSource {
    Message,
    VoiceMinute,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderboardScope {
    AllTime,
    Weekly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub user_id: u64,
    pub exp: u64,
}

/// Everything the `/rank` command displays, gathered in one call.
#[derive(Debug, Clone)]
pub struct RankSnapshot {
    pub score: UserScore,
    pub next_level_exp: u64,
    pub server_rank: Option<u32>,
    pub weekly_rank: Option<u32>,
    pub weekly_exp: u64,
}

/// Admin-tunable knobs, persisted next to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankSettings {
    pub text_exp: u64,
    pub vc_exp_per_min: u64,
    pub cooldown_secs: u64,
    pub weekly_enabled: bool,
}

impl Default for RankSettings {
    fn default() -> Self {
        Self {
            text_exp: 5,
            vc_exp_per_min: 5,
            cooldown_secs: 60,
            weekly_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    TextExp,
    VoiceExpPerMinute,
    CooldownSecs,
    WeeklyEnabled,
}

impl SettingKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::TextExp => "text_exp",
            SettingKey::VoiceExpPerMinute => "vc_exp_per_min",
            SettingKey::CooldownSecs => "cooldown_sec",
            SettingKey::WeeklyEnabled => "weekly_enabled",
        }
    }
}

impl std::fmt::Display for SettingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum LevelingError {
    #[error("Award amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("User is on cooldown. Time remaining: {0:?}")]
    OnCooldown(Duration),

    #[error("Invalid value {value} for setting {key}")]
    InvalidSetting { key: SettingKey, value: i64 },

    #[error("Storage error: {0}")]
    Storage(String),
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Persistence contract for the ledger. Implemented by the SQLite store in
/// production and by an in-memory store for tests.
#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Add to a user's all-time experience, creating the row on first award,
    /// and return the new total. The increment must be atomic per user: two
    /// concurrent awards may not lose an update.
    async fn add_exp(&self, user_id: u64, amount: u64) -> Result<u64, LevelingError>;

    /// Same increment against the weekly ledger.
    async fn add_weekly_exp(&self, user_id: u64, amount: u64) -> Result<(), LevelingError>;

    /// Raise the cached level column to `level`. Must never lower it, so a
    /// late writer racing a faster one cannot make the cache regress.
    async fn cache_level(&self, user_id: u64, level: u32) -> Result<(), LevelingError>;

    /// The user's row, or `None` if they have never been touched.
    async fn get_row(&self, user_id: u64) -> Result<Option<ScoreRow>, LevelingError>;

    async fn get_weekly_exp(&self, user_id: u64) -> Result<u64, LevelingError>;

    /// Set the mention-on-level-up preference, creating the row if needed.
    async fn set_mention(&self, user_id: u64, enabled: bool) -> Result<(), LevelingError>;

    /// Delete the user's rows in both ledgers. A no-op for unknown users.
    async fn reset(&self, user_id: u64) -> Result<(), LevelingError>;

    /// Zero the weekly ledger for everyone.
    async fn reset_weekly(&self) -> Result<(), LevelingError>;

    /// Every user with experience > 0 in the given scope, ordered by
    /// experience descending; ties broken by earliest first award.
    async fn ranking(
        &self,
        scope: LeaderboardScope,
    ) -> Result<Vec<LeaderboardEntry>, LevelingError>;

    async fn get_settings(&self) -> Result<RankSettings, LevelingError>;

    async fn put_setting(&self, key: SettingKey, value: i64) -> Result<(), LevelingError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct LevelingService<S: ScoreStore> {
    store: S,
    milestones: MilestoneTable,
    /// Message-award cooldowns. In-process only: a restart clears them,
    /// which the original system accepted too.
    cooldowns: DashMap<u64, Instant>,
}

impl<S: ScoreStore> LevelingService<S> {
    pub fn new(store: S) -> Self {
        Self::with_milestones(store, MilestoneTable::default())
    }

    pub fn with_milestones(store: S, milestones: MilestoneTable) -> Self {
        Self {
            store,
            milestones,
            cooldowns: DashMap::new(),
        }
    }

    pub fn milestones(&self) -> &MilestoneTable {
        &self.milestones
    }

    /// Award experience for a guild message, subject to the cooldown.
    ///
    /// Returns `Ok(Some(event))` on a level-up, `Ok(None)` when experience
    /// was added without a level change, `Err(OnCooldown)` when the user
    /// earned XP too recently.
    pub async fn process_message(
        &self,
        user_id: u64,
    ) -> Result<Option<LevelUpEvent>, LevelingError> {
        let settings = self.store.get_settings().await?;
        let cooldown = Duration::from_secs(settings.cooldown_secs);

        // Check-and-set under the shard lock, so two interleaved messages
        // from the same user cannot both pass the gate
        match self.cooldowns.entry(user_id) {
            Entry::Occupied(mut entry) => {
                let elapsed = entry.get().elapsed();
                if elapsed < cooldown {
                    return Err(LevelingError::OnCooldown(cooldown - elapsed));
                }
                entry.insert(Instant::now());
            }
            Entry::Vacant(entry) => {
                entry.insert(Instant::now());
            }
        }

        self.grant(
            user_id,
            settings.text_exp,
            settings.weekly_enabled,
            AwardSource::Message,
        )
        .await
    }

    /// Award experience for one minute of voice presence. No cooldown; the
    /// tick cadence already limits the rate.
    pub async fn process_voice_tick(
        &self,
        user_id: u64,
    ) -> Result<Option<LevelUpEvent>, LevelingError> {
        let settings = self.store.get_settings().await?;
        self.grant(
            user_id,
            settings.vc_exp_per_min,
            settings.weekly_enabled,
            AwardSource::VoiceMinute,
        )
        .await
    }

    /// Admin-driven award. Rejects non-positive amounts with no state change.
    pub async fn award_exp(
        &self,
        user_id: u64,
        amount: i64,
    ) -> Result<Option<LevelUpEvent>, LevelingError> {
        if amount <= 0 {
            return Err(LevelingError::InvalidAmount(amount));
        }
        let settings = self.store.get_settings().await?;
        self.grant(
            user_id,
            amount as u64,
            settings.weekly_enabled,
            AwardSource::Admin,
        )
        .await
    }

    /// The one read-modify-write of the ledger. The store's increment is
    /// atomic and returns the new total, so the before/after levels are
    /// derived without a racy separate read.
    async fn grant(
        &self,
        user_id: u64,
        amount: u64,
        count_weekly: bool,
        source: AwardSource,
    ) -> Result<Option<LevelUpEvent>, LevelingError> {
        if amount == 0 {
            return Ok(None);
        }

        let new_total = self.store.add_exp(user_id, amount).await?;
        if count_weekly {
            // The weekly ledger is a mirror, not part of the award. The
            // all-time increment is already persisted at this point, so a
            // failed mirror write must not swallow the level transition -
            // the crossing would never refire.
            if let Err(err) = self.store.add_weekly_exp(user_id, amount).await {
                tracing::warn!(user_id, amount, "weekly exp mirror failed: {err}");
            }
        }

        let old_level = level_for_exp(new_total - amount);
        let new_level = level_for_exp(new_total);
        tracing::debug!(user_id, amount, ?source, total_exp = new_total, "awarded exp");

        if new_level > old_level {
            self.store.cache_level(user_id, new_level).await?;
            tracing::info!(
                user_id,
                old_level,
                new_level,
                total_exp = new_total,
                "user leveled up"
            );
            Ok(Some(LevelUpEvent {
                user_id,
                old_level,
                new_level,
                total_exp: new_total,
            }))
        } else {
            Ok(None)
        }
    }

    /// A user's score with the level recomputed from experience. Unknown
    /// users get zero-valued defaults rather than an error.
    pub async fn get_score(&self, user_id: u64) -> Result<UserScore, LevelingError> {
        match self.store.get_row(user_id).await? {
            Some(row) => Ok(UserScore {
                user_id,
                exp: row.exp,
                level: level_for_exp(row.exp),
                mention_on_level_up: row.mention_on_level_up,
            }),
            None => Ok(UserScore::absent(user_id)),
        }
    }

    /// Everything `/rank` needs in one call.
    pub async fn rank_snapshot(&self, user_id: u64) -> Result<RankSnapshot, LevelingError> {
        let score = self.get_score(user_id).await?;
        let next_level_exp = exp_for_next_level(score.level);
        let server_rank = self.rank_of(user_id, LeaderboardScope::AllTime).await?;
        let weekly_rank = self.rank_of(user_id, LeaderboardScope::Weekly).await?;
        let weekly_exp = self.store.get_weekly_exp(user_id).await?;

        Ok(RankSnapshot {
            score,
            next_level_exp,
            server_rank,
            weekly_rank,
            weekly_exp,
        })
    }

    /// 1-based position among users with experience > 0, or `None` for users
    /// who have none yet.
    pub async fn rank_of(
        &self,
        user_id: u64,
        scope: LeaderboardScope,
    ) -> Result<Option<u32>, LevelingError> {
        let ranking = self.store.ranking(scope).await?;
        Ok(ranking
            .iter()
            .position(|entry| entry.user_id == user_id)
            .map(|index| index as u32 + 1))
    }

    pub async fn top_n(
        &self,
        scope: LeaderboardScope,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, LevelingError> {
        let mut ranking = self.store.ranking(scope).await?;
        ranking.truncate(limit);
        Ok(ranking)
    }

    pub async fn set_mention(&self, user_id: u64, enabled: bool) -> Result<(), LevelingError> {
        self.store.set_mention(user_id, enabled).await
    }

    /// Admin reset. Idempotent: resetting an unknown user is a no-op.
    pub async fn reset(&self, user_id: u64) -> Result<(), LevelingError> {
        self.cooldowns.remove(&user_id);
        self.store.reset(user_id).await
    }

    pub async fn reset_weekly(&self) -> Result<(), LevelingError> {
        self.store.reset_weekly().await
    }

    pub async fn settings(&self) -> Result<RankSettings, LevelingError> {
        self.store.get_settings().await
    }

    pub async fn update_setting(&self, key: SettingKey, value: i64) -> Result<(), LevelingError> {
        let valid = match key {
            SettingKey::WeeklyEnabled => value == 0 || value == 1,
            _ => value >= 0,
        };
        if !valid {
            return Err(LevelingError::InvalidSetting { key, value });
        }
        self.store.put_setting(key, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::leveling::InMemoryScoreStore;
    use std::sync::Arc;

    fn service() -> LevelingService<InMemoryScoreStore> {
        LevelingService::new(InMemoryScoreStore::new())
    }

    #[tokio::test]
    async fn award_rejects_non_positive_amounts() {
        let svc = service();

        assert!(matches!(
            svc.award_exp(1, 0).await,
            Err(LevelingError::InvalidAmount(0))
        ));
        assert!(matches!(
            svc.award_exp(1, -5).await,
            Err(LevelingError::InvalidAmount(-5))
        ));

        let score = svc.get_score(1).await.unwrap();
        assert_eq!(score.exp, 0);
        assert_eq!(score.level, 0);
    }

    #[tokio::test]
    async fn forty_exp_takes_a_fresh_user_to_level_one() {
        let svc = service();

        let event = svc.award_exp(1, 40).await.unwrap().expect("should level up");
        assert_eq!(event.old_level, 0);
        assert_eq!(event.new_level, 1);
        assert_eq!(event.total_exp, 40);
    }

    #[tokio::test]
    async fn small_award_does_not_level_up() {
        let svc = service();

        assert!(svc.award_exp(1, 10).await.unwrap().is_none());
        let score = svc.get_score(1).await.unwrap();
        assert_eq!(score.exp, 10);
        assert_eq!(score.level, 0);
    }

    #[tokio::test]
    async fn one_jump_crosses_every_milestone_in_order() {
        let table = MilestoneTable::new([(1, "Recruit"), (5, "Regular")]);
        let svc = LevelingService::with_milestones(InMemoryScoreStore::new(), table);

        // exp_for_level(5) == 600, enough for level 5 in one award
        let event = svc.award_exp(1, 600).await.unwrap().expect("should level up");
        assert_eq!(event.old_level, 0);
        assert_eq!(event.new_level, 5);

        let crossed = svc.milestones().crossed(event.old_level, event.new_level);
        let levels: Vec<u32> = crossed.iter().map(|t| t.level).collect();
        assert_eq!(levels, vec![1, 5]);
    }

    #[tokio::test]
    async fn message_awards_respect_the_cooldown() {
        let svc = service();

        svc.process_message(1).await.unwrap();
        assert!(matches!(
            svc.process_message(1).await,
            Err(LevelingError::OnCooldown(_))
        ));

        // A different user is unaffected
        svc.process_message(2).await.unwrap();

        let score = svc.get_score(1).await.unwrap();
        assert_eq!(score.exp, RankSettings::default().text_exp);
    }

    #[tokio::test]
    async fn voice_ticks_have_no_cooldown() {
        let svc = service();

        svc.process_voice_tick(1).await.unwrap();
        svc.process_voice_tick(1).await.unwrap();

        let score = svc.get_score(1).await.unwrap();
        assert_eq!(score.exp, 2 * RankSettings::default().vc_exp_per_min);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_awards_lose_nothing() {
        let svc = Arc::new(service());

        let mut handles = Vec::new();
        for _ in 0..100 {
            let svc = Arc::clone(&svc);
            handles.push(tokio::spawn(async move {
                svc.award_exp(1, 10).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let score = svc.get_score(1).await.unwrap();
        assert_eq!(score.exp, 1000);
        assert_eq!(score.level, level_for_exp(1000));
    }

    #[tokio::test]
    async fn reset_is_idempotent_and_unknown_users_are_fine() {
        let svc = service();

        svc.reset(42).await.unwrap();

        svc.award_exp(42, 100).await.unwrap();
        svc.reset(42).await.unwrap();
        svc.reset(42).await.unwrap();

        let score = svc.get_score(42).await.unwrap();
        assert_eq!(score.exp, 0);
        assert_eq!(score.level, 0);
    }

    #[tokio::test]
    async fn ranking_skips_zero_exp_and_breaks_ties_by_first_award() {
        let svc = service();

        svc.award_exp(1, 50).await.unwrap();
        svc.award_exp(2, 100).await.unwrap();
        svc.award_exp(3, 50).await.unwrap(); // ties with user 1, awarded later
        svc.set_mention(4, false).await.unwrap(); // row exists, zero exp

        assert_eq!(
            svc.rank_of(2, LeaderboardScope::AllTime).await.unwrap(),
            Some(1)
        );
        assert_eq!(
            svc.rank_of(1, LeaderboardScope::AllTime).await.unwrap(),
            Some(2)
        );
        assert_eq!(
            svc.rank_of(3, LeaderboardScope::AllTime).await.unwrap(),
            Some(3)
        );
        assert_eq!(
            svc.rank_of(4, LeaderboardScope::AllTime).await.unwrap(),
            None
        );
        assert_eq!(
            svc.rank_of(99, LeaderboardScope::AllTime).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn top_n_truncates_in_order() {
        let svc = service();

        svc.award_exp(1, 300).await.unwrap();
        svc.award_exp(2, 100).await.unwrap();
        svc.award_exp(3, 200).await.unwrap();

        let top = svc.top_n(LeaderboardScope::AllTime, 2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0], LeaderboardEntry { user_id: 1, exp: 300 });
        assert_eq!(top[1], LeaderboardEntry { user_id: 3, exp: 200 });
    }

    #[tokio::test]
    async fn weekly_ledger_follows_the_toggle() {
        let svc = service();

        svc.award_exp(1, 30).await.unwrap();
        assert_eq!(svc.rank_snapshot(1).await.unwrap().weekly_exp, 30);

        svc.update_setting(SettingKey::WeeklyEnabled, 0).await.unwrap();
        svc.award_exp(1, 30).await.unwrap();

        let snapshot = svc.rank_snapshot(1).await.unwrap();
        assert_eq!(snapshot.score.exp, 60);
        assert_eq!(snapshot.weekly_exp, 30);
    }

    #[tokio::test]
    async fn weekly_reset_clears_only_the_weekly_ledger() {
        let svc = service();

        svc.award_exp(1, 80).await.unwrap();
        svc.reset_weekly().await.unwrap();

        let snapshot = svc.rank_snapshot(1).await.unwrap();
        assert_eq!(snapshot.score.exp, 80);
        assert_eq!(snapshot.weekly_exp, 0);
        assert_eq!(snapshot.weekly_rank, None);
    }

    #[tokio::test]
    async fn mention_preference_round_trips() {
        let svc = service();

        assert!(svc.get_score(1).await.unwrap().mention_on_level_up);
        svc.set_mention(1, false).await.unwrap();
        assert!(!svc.get_score(1).await.unwrap().mention_on_level_up);
    }

    #[tokio::test]
    async fn setting_updates_are_validated() {
        let svc = service();

        assert!(matches!(
            svc.update_setting(SettingKey::TextExp, -1).await,
            Err(LevelingError::InvalidSetting { .. })
        ));
        assert!(matches!(
            svc.update_setting(SettingKey::WeeklyEnabled, 2).await,
            Err(LevelingError::InvalidSetting { .. })
        ));

        svc.update_setting(SettingKey::TextExp, 12).await.unwrap();
        assert_eq!(svc.settings().await.unwrap().text_exp, 12);
    }

    /// Store whose weekly ledger is permanently broken; everything else
    /// delegates to the in-memory store.
    struct BrokenWeeklyStore {
        inner: InMemoryScoreStore,
    }

    #[async_trait]
    impl ScoreStore for BrokenWeeklyStore {
        async fn add_exp(&self, user_id: u64, amount: u64) -> Result<u64, LevelingError> {
            self.inner.add_exp(user_id, amount).await
        }

        async fn add_weekly_exp(&self, _user_id: u64, _amount: u64) -> Result<(), LevelingError> {
            Err(LevelingError::Storage("weekly ledger offline".to_string()))
        }

        async fn cache_level(&self, user_id: u64, level: u32) -> Result<(), LevelingError> {
            self.inner.cache_level(user_id, level).await
        }

        async fn get_row(&self, user_id: u64) -> Result<Option<ScoreRow>, LevelingError> {
            self.inner.get_row(user_id).await
        }

        async fn get_weekly_exp(&self, user_id: u64) -> Result<u64, LevelingError> {
            self.inner.get_weekly_exp(user_id).await
        }

        async fn set_mention(&self, user_id: u64, enabled: bool) -> Result<(), LevelingError> {
            self.inner.set_mention(user_id, enabled).await
        }

        async fn reset(&self, user_id: u64) -> Result<(), LevelingError> {
            self.inner.reset(user_id).await
        }

        async fn reset_weekly(&self) -> Result<(), LevelingError> {
            self.inner.reset_weekly().await
        }

        async fn ranking(
            &self,
            scope: LeaderboardScope,
        ) -> Result<Vec<LeaderboardEntry>, LevelingError> {
            self.inner.ranking(scope).await
        }

        async fn get_settings(&self) -> Result<RankSettings, LevelingError> {
            self.inner.get_settings().await
        }

        async fn put_setting(&self, key: SettingKey, value: i64) -> Result<(), LevelingError> {
            self.inner.put_setting(key, value).await
        }
    }

    #[tokio::test]
    async fn weekly_mirror_failure_does_not_swallow_the_level_up() {
        let svc = LevelingService::new(BrokenWeeklyStore {
            inner: InMemoryScoreStore::new(),
        });

        // The all-time increment persists, so the crossing must still be
        // reported - it can never refire on a later award.
        let event = svc
            .award_exp(1, 40)
            .await
            .unwrap()
            .expect("level-up must be reported despite the weekly failure");
        assert_eq!(event.old_level, 0);
        assert_eq!(event.new_level, 1);

        let score = svc.get_score(1).await.unwrap();
        assert_eq!(score.exp, 40);
        assert_eq!(score.level, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_messages_award_only_once() {
        let svc = Arc::new(service());

        let mut handles = Vec::new();
        for _ in 0..50 {
            let svc = Arc::clone(&svc);
            handles.push(tokio::spawn(async move {
                let _ = svc.process_message(1).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Exactly one message may pass the cooldown gate
        let score = svc.get_score(1).await.unwrap();
        assert_eq!(score.exp, RankSettings::default().text_exp);
    }
}
