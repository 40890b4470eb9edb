// Admin commands for the rank system.

use super::leveling::{Context, Error};
use crate::core::leveling::{LevelingError, SettingKey};
use crate::discord::level_up_pipeline;
use poise::serenity_prelude as serenity;

/// Grant experience to a member.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn rank_add_exp(
    ctx: Context<'_>,
    #[description = "Member to award"] user: serenity::User,
    #[description = "Amount of EXP to add"] amount: i64,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?;
    if user.bot {
        ctx.say("Bots cannot earn EXP.").await?;
        return Ok(());
    }

    match ctx.data().leveling.award_exp(user.id.get(), amount).await {
        Ok(level_up) => {
            ctx.say(format!("Added **{} EXP** to {}.", amount, user.name))
                .await?;
            if let Some(event) = level_up {
                level_up_pipeline::handle_level_up(
                    &ctx.serenity_context().http,
                    &ctx.data().leveling,
                    ctx.data().channels,
                    guild_id,
                    &event,
                )
                .await;
            }
        }
        Err(LevelingError::InvalidAmount(_)) => {
            ctx.send(
                poise::CreateReply::default()
                    .content("The amount must be a positive number.")
                    .ephemeral(true),
            )
            .await?;
        }
        Err(other) => return Err(other.into()),
    }
    Ok(())
}

/// Wipe a member's experience and level. Idempotent.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn rank_reset(
    ctx: Context<'_>,
    #[description = "Member to reset"] user: serenity::User,
) -> Result<(), Error> {
    ctx.data().leveling.reset(user.id.get()).await?;
    ctx.say(format!("Reset all rank data for {}.", user.name))
        .await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum SettingChoice {
    #[name = "Message EXP"]
    TextExp,
    #[name = "Voice EXP per minute"]
    VoiceExpPerMinute,
    #[name = "Cooldown seconds"]
    CooldownSecs,
    #[name = "Weekly ladder enabled (0/1)"]
    WeeklyEnabled,
}

impl From<SettingChoice> for SettingKey {
    fn from(value: SettingChoice) -> Self {
        match value {
            SettingChoice::TextExp => SettingKey::TextExp,
            SettingChoice::VoiceExpPerMinute => SettingKey::VoiceExpPerMinute,
            SettingChoice::CooldownSecs => SettingKey::CooldownSecs,
            SettingChoice::WeeklyEnabled => SettingKey::WeeklyEnabled,
        }
    }
}

/// Tune a rank-system setting.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn rank_config(
    ctx: Context<'_>,
    #[description = "Setting to change"] setting: SettingChoice,
    #[description = "New value"] value: i64,
) -> Result<(), Error> {
    match ctx.data().leveling.update_setting(setting.into(), value).await {
        Ok(()) => {
            let settings = ctx.data().leveling.settings().await?;
            ctx.send(
                poise::CreateReply::default()
                    .content(format!(
                        "Updated. Current settings: message EXP **{}**, voice EXP/min **{}**, \
                         cooldown **{}s**, weekly ladder **{}**.",
                        settings.text_exp,
                        settings.vc_exp_per_min,
                        settings.cooldown_secs,
                        if settings.weekly_enabled { "ON" } else { "OFF" }
                    ))
                    .ephemeral(true),
            )
            .await?;
        }
        Err(LevelingError::InvalidSetting { key, value }) => {
            ctx.send(
                poise::CreateReply::default()
                    .content(format!("{value} is not a valid value for {key}."))
                    .ephemeral(true),
            )
            .await?;
        }
        Err(other) => return Err(other.into()),
    }
    Ok(())
}

/// Zero the weekly ladder. Normally driven by an external scheduler; this is
/// the manual fallback.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn rank_weekly_reset(ctx: Context<'_>) -> Result<(), Error> {
    ctx.data().leveling.reset_weekly().await?;
    ctx.say("Weekly ladder has been reset.").await?;
    Ok(())
}
