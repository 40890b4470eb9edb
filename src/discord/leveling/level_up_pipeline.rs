// Side effects of a level transition: role sync, announcement, audit log.
//
// The decision of WHICH milestones were crossed is pure and lives in core;
// this module only drives the Discord calls for each one. Every step is
// failure-isolated: a forbidden role edit or a failed send is reported to
// the operator channel and the remaining steps and milestones still run.
// Nothing here retries and nothing rolls back the persisted award.

use crate::core::leveling::{exp_for_level, exp_for_next_level, LevelUpEvent, MilestoneTier};
use crate::core::leveling::LevelingService;
use crate::discord::commands::leveling::build_progress_bar;
use crate::discord::ChannelConfig;
use crate::infra::leveling::SqliteScoreStore;
use poise::serenity_prelude::{self as serenity, builder::CreateMessage};
use rand::seq::SliceRandom;

/// Drive all side effects for one level transition.
pub async fn handle_level_up(
    http: &serenity::Http,
    leveling: &LevelingService<SqliteScoreStore>,
    channels: ChannelConfig,
    guild_id: serenity::GuildId,
    event: &LevelUpEvent,
) {
    // Mention preference defaults to on if the read fails; a broken read
    // should not silence the announcement.
    let mention = match leveling.get_score(event.user_id).await {
        Ok(score) => score.mention_on_level_up,
        Err(err) => {
            tracing::warn!(user_id = event.user_id, "could not read mention preference: {err}");
            true
        }
    };
    let name = display_name(http, guild_id, event.user_id).await;

    let crossed: Vec<MilestoneTier> = leveling
        .milestones()
        .crossed(event.old_level, event.new_level)
        .into_iter()
        .cloned()
        .collect();

    if crossed.is_empty() {
        announce(http, channels, event, &name, mention, None).await;
        return;
    }

    for tier in &crossed {
        if let Err(err) = sync_milestone_role(http, leveling, guild_id, event.user_id, tier).await {
            tracing::warn!(
                user_id = event.user_id,
                guild_id = guild_id.get(),
                role = %tier.role,
                "role sync failed: {err}"
            );
            report_to_operators(
                http,
                channels,
                format!(
                    "Could not sync milestone role `{}` for <@{}> in guild {}: {}",
                    tier.role,
                    event.user_id,
                    guild_id.get(),
                    err
                ),
            )
            .await;
        }

        announce(http, channels, event, &name, mention, Some(tier)).await;
        audit(http, channels, event, tier).await;
    }
}

/// Ensure the member holds exactly the role of the milestone just reached:
/// create it if the guild lacks it, strip outgrown lower tiers, add the new
/// one. Idempotent, so replays are harmless.
async fn sync_milestone_role(
    http: &serenity::Http,
    leveling: &LevelingService<SqliteScoreStore>,
    guild_id: serenity::GuildId,
    user_id: u64,
    tier: &MilestoneTier,
) -> serenity::Result<()> {
    let roles = http.get_guild_roles(guild_id).await?;
    let role_id = match roles.iter().find(|role| role.name == tier.role) {
        Some(role) => role.id,
        None => {
            guild_id
                .create_role(
                    http,
                    serenity::EditRole::new().name(tier.role.clone()).mentionable(false),
                )
                .await?
                .id
        }
    };

    let member = http.get_member(guild_id, serenity::UserId::new(user_id)).await?;

    for outgrown in leveling.milestones().roles_below(tier.level) {
        if let Some(role) = roles.iter().find(|role| role.name == outgrown) {
            if member.roles.contains(&role.id) {
                member.remove_role(http, role.id).await?;
            }
        }
    }

    if !member.roles.contains(&role_id) {
        member.add_role(http, role_id).await?;
    }
    Ok(())
}

/// Post the public level-up notice, pinging only when the user allows it.
async fn announce(
    http: &serenity::Http,
    channels: ChannelConfig,
    event: &LevelUpEvent,
    name: &str,
    mention: bool,
    tier: Option<&MilestoneTier>,
) {
    let description = match tier {
        Some(tier) => format!(
            "**{}** reached level {} and is now **{}**!",
            name, tier.level, tier.role
        ),
        None => format!("**{}** reached level {}!", name, event.new_level),
    };

    let previous_threshold = exp_for_level(event.new_level);
    let next_threshold = exp_for_next_level(event.new_level);
    let level_span = next_threshold.saturating_sub(previous_threshold).max(1);
    let exp_into_level = event
        .total_exp
        .saturating_sub(previous_threshold)
        .min(level_span);
    let progress = exp_into_level as f64 / level_span as f64;

    let embed = serenity::CreateEmbed::new()
        .title("Level Up!")
        .description(description)
        .color(level_color(event.new_level))
        .field("Total EXP", event.total_exp.to_string(), true)
        .field(
            "Progress",
            format!(
                "{}/{} EXP\n{}",
                exp_into_level,
                level_span,
                build_progress_bar(progress, 18)
            ),
            false,
        )
        .footer(serenity::CreateEmbedFooter::new(random_flavor_line()));

    // Pings only fire from message content, never from inside an embed
    let mut message = CreateMessage::new().embed(embed);
    if mention {
        message = message.content(format!("<@{}>", event.user_id));
    }

    if let Err(err) = channels.announcements.send_message(http, message).await {
        tracing::warn!(user_id = event.user_id, "failed to send level-up announcement: {err}");
        report_to_operators(
            http,
            channels,
            format!(
                "Could not announce level {} for <@{}>: {}",
                event.new_level, event.user_id, err
            ),
        )
        .await;
    }
}

/// Record the promotion in the operator log channel.
async fn audit(
    http: &serenity::Http,
    channels: ChannelConfig,
    event: &LevelUpEvent,
    tier: &MilestoneTier,
) {
    let embed = serenity::CreateEmbed::new()
        .title("Milestone reached")
        .field("User", format!("<@{}>", event.user_id), true)
        .field("Level", tier.level.to_string(), true)
        .field("Role", tier.role.clone(), true)
        .color(serenity::Colour::DARK_TEAL)
        .timestamp(serenity::Timestamp::now());

    if let Err(err) = channels
        .audit_log
        .send_message(http, CreateMessage::new().embed(embed))
        .await
    {
        // The audit channel is the operator channel; nowhere further to report
        tracing::error!(user_id = event.user_id, "failed to write audit entry: {err}");
    }
}

async fn report_to_operators(http: &serenity::Http, channels: ChannelConfig, text: String) {
    if let Err(err) = channels
        .audit_log
        .send_message(http, CreateMessage::new().content(text))
        .await
    {
        tracing::error!("failed to report side-effect failure to operators: {err}");
    }
}

async fn display_name(http: &serenity::Http, guild_id: serenity::GuildId, user_id: u64) -> String {
    let user_id = serenity::UserId::new(user_id);
    if let Ok(member) = http.get_member(guild_id, user_id).await {
        return member.display_name().to_string();
    }
    if let Ok(user) = http.get_user(user_id).await {
        return user.name;
    }
    format!("user {user_id}")
}

fn level_color(level: u32) -> serenity::Colour {
    if level >= 50 {
        serenity::Colour::DARK_PURPLE
    } else if level >= 25 {
        serenity::Colour::ORANGE
    } else if level >= 10 {
        serenity::Colour::GOLD
    } else if level >= 5 {
        serenity::Colour::BLURPLE
    } else {
        serenity::Colour::LIGHT_GREY
    }
}

fn random_flavor_line() -> &'static str {
    const FLAVOR_LINES: [&str; 4] = [
        "Keep the streak going!",
        "The garrison salutes you.",
        "Another level, another stripe.",
        "That EXP bar never stood a chance.",
    ];

    FLAVOR_LINES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FLAVOR_LINES[0])
}
