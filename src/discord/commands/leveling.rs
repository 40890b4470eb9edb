// Member-facing rank commands.
//
// This layer stays thin: extract primitive ids from Discord types, call the
// leveling service, format the response.

use crate::core::leveling::{LeaderboardScope, LevelingService};
use crate::discord::voice_activity::VoiceActivity;
use crate::infra::leveling::SqliteScoreStore;
use poise::serenity_prelude as serenity;

/// Show your rank card: level, XP, progress, server and weekly standing.
#[poise::command(slash_command, guild_only)]
pub async fn rank(
    ctx: Context<'_>,
    #[description = "User to check (defaults to you)"] user: Option<serenity::User>,
) -> Result<(), Error> {
    let target = user.as_ref().unwrap_or_else(|| ctx.author());
    if target.bot {
        ctx.say("Bots are not on the ladder.").await?;
        return Ok(());
    }

    let snapshot = ctx.data().leveling.rank_snapshot(target.id.get()).await?;
    let score = &snapshot.score;

    let previous_threshold = crate::core::leveling::exp_for_level(score.level);
    let level_span = snapshot.next_level_exp.saturating_sub(previous_threshold);
    let exp_into_level = score.exp.saturating_sub(previous_threshold);
    let progress = if level_span > 0 {
        exp_into_level as f64 / level_span as f64
    } else {
        0.0
    };

    let rank_line = |rank: Option<u32>| match rank {
        Some(position) => format!("#{position}"),
        None => "unranked".to_string(),
    };

    let embed = serenity::CreateEmbed::new()
        .title(format!("Rank of {}", target.name))
        .color(0x1de9b6)
        .thumbnail(target.face())
        .field("Level", format!("**{}**", score.level), true)
        .field("Total EXP", format!("**{}**", score.exp), true)
        .field("Server rank", rank_line(snapshot.server_rank), true)
        .field(
            "Progress",
            format!(
                "{}/{} EXP\n{}",
                exp_into_level,
                level_span,
                build_progress_bar(progress, 15)
            ),
            false,
        )
        .field("Weekly rank", rank_line(snapshot.weekly_rank), true)
        .field("Weekly EXP", snapshot.weekly_exp.to_string(), true);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum ScopeChoice {
    #[name = "All-time"]
    AllTime,
    #[name = "Weekly"]
    Weekly,
}

impl From<ScopeChoice> for LeaderboardScope {
    fn from(value: ScopeChoice) -> Self {
        match value {
            ScopeChoice::AllTime => LeaderboardScope::AllTime,
            ScopeChoice::Weekly => LeaderboardScope::Weekly,
        }
    }
}

/// Show the top ten of the server, all-time or weekly.
#[poise::command(slash_command, guild_only)]
pub async fn leaderboard(
    ctx: Context<'_>,
    #[description = "Which ladder to show (default: all-time)"] scope: Option<ScopeChoice>,
) -> Result<(), Error> {
    let scope = scope.unwrap_or(ScopeChoice::AllTime);
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    let top = ctx.data().leveling.top_n(scope.into(), 10).await?;
    if top.is_empty() {
        ctx.say("Nobody has earned any EXP yet.").await?;
        return Ok(());
    }

    let mut description = String::new();
    for (index, entry) in top.iter().enumerate() {
        let position = index + 1;
        let medal = match position {
            1 => "🥇",
            2 => "🥈",
            3 => "🥉",
            _ => "  ",
        };
        let name = resolve_display_name_cached(&ctx, guild_id, entry.user_id);
        let level = crate::core::leveling::level_for_exp(entry.exp);
        description.push_str(&format!(
            "{} **#{}** {} — Level {} | {} EXP\n",
            medal, position, name, level, entry.exp
        ));
    }

    let title = match scope {
        ScopeChoice::AllTime => "📊 Leaderboard",
        ScopeChoice::Weekly => "📊 Weekly Leaderboard",
    };
    let embed = serenity::CreateEmbed::new()
        .title(title)
        .description(description)
        .color(0xffd700);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Choose whether level-up announcements ping you or just name you.
#[poise::command(slash_command, guild_only)]
pub async fn rank_mention(
    ctx: Context<'_>,
    #[description = "Mention you on level-up?"] enable: bool,
) -> Result<(), Error> {
    ctx.data()
        .leveling
        .set_mention(ctx.author().id.get(), enable)
        .await?;

    let state = if enable { "ON" } else { "OFF" };
    ctx.send(
        poise::CreateReply::default()
            .content(format!("Level-up mentions are now **{state}** for you."))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Render `progress` (0.0..=1.0) as a text bar of `length` segments.
pub(crate) fn build_progress_bar(progress: f64, length: usize) -> String {
    let clamped = progress.clamp(0.0, 1.0);
    let mut filled = (clamped * length as f64).round() as usize;
    if clamped > 0.0 && filled == 0 {
        filled = 1;
    }
    filled = filled.min(length);
    let bar = "▰".repeat(filled) + &"▱".repeat(length - filled);
    format!("{} ({}%)", bar, (clamped * 100.0).round() as u32)
}

/// Resolve a display name from cache only; leaderboards must not block on
/// HTTP lookups. Falls back to a mention so the entry stays identifiable.
fn resolve_display_name_cached(ctx: &Context<'_>, guild_id: u64, user_id: u64) -> String {
    let guild_id = serenity::GuildId::new(guild_id);
    let user_id = serenity::UserId::new(user_id);

    if let Some(guild) = ctx.serenity_context().cache.guild(guild_id) {
        if let Some(member) = guild.members.get(&user_id) {
            return member.display_name().to_string();
        }
    }
    if let Some(user) = ctx.serenity_context().cache.user(user_id) {
        return user.name.clone();
    }
    format!("<@{}>", user_id)
}

/// Type aliases for the poise framework.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

use std::sync::Arc;

/// Channels the rank system posts to, from environment configuration.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Public level-up and milestone announcements.
    pub announcements: serenity::ChannelId,
    /// Operator-visible audit log and failure reports.
    pub audit_log: serenity::ChannelId,
}

/// Data shared across all commands and event handlers.
pub struct Data {
    pub leveling: Arc<LevelingService<SqliteScoreStore>>,
    pub voice: Arc<VoiceActivity>,
    pub channels: ChannelConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_clamps_and_rounds() {
        assert_eq!(build_progress_bar(0.0, 4), "▱▱▱▱ (0%)");
        assert_eq!(build_progress_bar(1.0, 4), "▰▰▰▰ (100%)");
        assert_eq!(build_progress_bar(2.5, 4), "▰▰▰▰ (100%)");
        assert_eq!(build_progress_bar(0.5, 4), "▰▰▱▱ (50%)");
    }

    #[test]
    fn progress_bar_shows_at_least_one_segment_when_started() {
        assert_eq!(build_progress_bar(0.01, 10), "▰▱▱▱▱▱▱▱▱▱ (1%)");
    }
}
