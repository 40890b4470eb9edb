// Discord layer - commands and event handlers.

#[path = "commands/command_catalog.rs"]
pub mod commands;

#[path = "leveling/level_up_pipeline.rs"]
pub mod level_up_pipeline;

pub mod voice_activity;

// Re-export command types for convenience
pub use commands::leveling::{ChannelConfig, Context, Data, Error};
