// Tracks who is currently connected to a voice channel, driven by the
// gateway's VoiceStateUpdate events. The minute tick in main walks the
// snapshot and awards voice experience through the leveling service.

use dashmap::DashMap;
use poise::serenity_prelude as serenity;

pub struct VoiceActivity {
    /// user_id -> guild_id of the voice channel they are sitting in.
    connected: DashMap<u64, u64>,
}

impl VoiceActivity {
    pub fn new() -> Self {
        Self {
            connected: DashMap::new(),
        }
    }

    /// Apply a voice state change. Joining or moving keeps the member in the
    /// set; disconnecting removes them. Bots never earn voice experience.
    pub fn update(&self, state: &serenity::VoiceState) {
        let Some(guild_id) = state.guild_id else {
            return;
        };
        if state.member.as_ref().is_some_and(|m| m.user.bot) {
            return;
        }
        self.apply(state.user_id.get(), guild_id.get(), state.channel_id.is_some());
    }

    /// Seed presence from a guild's current voice states, for members who
    /// were already in voice when the gateway session started. Guild-create
    /// payloads omit the guild id on each state, so it is passed explicitly.
    pub fn seed_guild<'a>(
        &self,
        guild_id: u64,
        states: impl IntoIterator<Item = &'a serenity::VoiceState>,
    ) {
        for state in states {
            if state.member.as_ref().is_some_and(|m| m.user.bot) {
                continue;
            }
            self.apply(state.user_id.get(), guild_id, state.channel_id.is_some());
        }
    }

    fn apply(&self, user_id: u64, guild_id: u64, in_channel: bool) {
        if in_channel {
            self.connected.insert(user_id, guild_id);
        } else {
            self.connected.remove(&user_id);
        }
    }

    /// Snapshot of (user_id, guild_id) pairs currently in voice.
    pub fn connected_members(&self) -> Vec<(u64, u64)> {
        self.connected
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }
}

impl Default for VoiceActivity {
    fn default() -> Self {
        Self::new()
    }
}
