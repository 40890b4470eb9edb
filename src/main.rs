// Entry point of the rank bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (SQLite, in-memory)
// - `discord/` = Discord-specific adapters (commands, events, side effects)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands and event handlers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::leveling::{LevelingError, LevelingService, MilestoneTable, MilestoneTier};
use crate::discord::level_up_pipeline;
use crate::discord::voice_activity::VoiceActivity;
use crate::discord::{ChannelConfig, Data, Error};
use crate::infra::leveling::SqliteScoreStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

/// Event handler for non-command Discord events: message experience and
/// voice presence tracking.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            // Ignore bot messages (including our own) and DMs
            if new_message.author.bot {
                return Ok(());
            }
            let Some(guild_id) = new_message.guild_id else {
                return Ok(());
            };

            match data
                .leveling
                .process_message(new_message.author.id.get())
                .await
            {
                Ok(Some(level_up)) => {
                    level_up_pipeline::handle_level_up(
                        &ctx.http,
                        &data.leveling,
                        data.channels,
                        guild_id,
                        &level_up,
                    )
                    .await;
                }
                Ok(None) => {
                    // Experience was added without a level change
                }
                Err(LevelingError::OnCooldown(_)) => {
                    // User earned exp too recently - silently ignore
                }
                Err(err) => {
                    tracing::error!(
                        user_id = new_message.author.id.get(),
                        "failed to process message exp: {err}"
                    );
                }
            }
        }
        serenity::FullEvent::VoiceStateUpdate { old: _, new } => {
            data.voice.update(new);
        }
        serenity::FullEvent::GuildCreate { guild, .. } => {
            // Members already sitting in voice when the session starts would
            // otherwise earn nothing until their next state change
            data.voice.seed_guild(guild.id.get(), guild.voice_states.values());
        }
        _ => {}
    }

    Ok(())
}

/// Read a channel id from the environment; the bot cannot run without its
/// announcement and audit channels.
fn channel_from_env(var: &str) -> serenity::ChannelId {
    let raw = std::env::var(var)
        .unwrap_or_else(|_| panic!("Missing {var} environment variable!"));
    let id: u64 = raw
        .parse()
        .unwrap_or_else(|_| panic!("{var} must be a numeric channel id"));
    serenity::ChannelId::new(id)
}

/// The milestone table is configuration, not code: an optional
/// `milestones.json` in the data directory overrides the built-in tiers.
fn load_milestones(data_dir: &str) -> MilestoneTable {
    let path = std::path::Path::new(data_dir).join("milestones.json");
    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<Vec<MilestoneTier>>(&contents) {
            Ok(tiers) => {
                tracing::info!(path = %path.display(), tiers = tiers.len(), "loaded milestone table");
                MilestoneTable::from_tiers(tiers)
            }
            Err(err) => {
                tracing::warn!("invalid milestones.json, falling back to defaults: {err}");
                MilestoneTable::default()
            }
        },
        Err(_) => MilestoneTable::default(),
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let token = std::env::var("DISCORD_TOKEN").expect(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    );
    let channels = ChannelConfig {
        announcements: channel_from_env("RANK_NOTIFICATION_CHANNEL_ID"),
        audit_log: channel_from_env("RANK_LOG_CHANNEL_ID"),
    };

    // Keep the runtime database in a dedicated folder so the repo root stays tidy.
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string());
    std::fs::create_dir_all(&data_dir).expect("Failed to create data directory");

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    let store = SqliteScoreStore::new(format!("{data_dir}/rank.db"))
        .await
        .expect("Failed to initialize SQLite store");
    let milestones = load_milestones(&data_dir);
    let leveling = Arc::new(LevelingService::with_milestones(store, milestones));
    let voice = Arc::new(VoiceActivity::new());

    let data = Data {
        leveling: Arc::clone(&leveling),
        voice: Arc::clone(&voice),
        channels,
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::GUILD_VOICE_STATES;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                discord::commands::leveling::rank(),
                discord::commands::leveling::leaderboard(),
                discord::commands::leveling::rank_mention(),
                discord::commands::admin::rank_add_exp(),
                discord::commands::admin::rank_reset(),
                discord::commands::admin::rank_config(),
                discord::commands::admin::rank_weekly_reset(),
            ],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("registering slash commands");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                // Voice experience tick: once a minute, everyone sitting in a
                // voice channel earns the configured amount.
                let leveling = Arc::clone(&data.leveling);
                let voice = Arc::clone(&data.voice);
                let channels = data.channels;
                let http = ctx.http.clone();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(Duration::from_secs(60));
                    // The first tick completes immediately; skip it so members
                    // don't earn exp the moment the bot starts.
                    interval.tick().await;

                    loop {
                        interval.tick().await;
                        for (user_id, guild_id) in voice.connected_members() {
                            match leveling.process_voice_tick(user_id).await {
                                Ok(Some(level_up)) => {
                                    level_up_pipeline::handle_level_up(
                                        &http,
                                        &leveling,
                                        channels,
                                        serenity::GuildId::new(guild_id),
                                        &level_up,
                                    )
                                    .await;
                                }
                                Ok(None) => {}
                                Err(err) => {
                                    tracing::error!(user_id, "failed to award voice exp: {err}");
                                }
                            }
                        }
                    }
                });

                tracing::info!("bot is ready");
                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .expect("Error creating client");

    client.start().await.expect("Error running bot");
}
