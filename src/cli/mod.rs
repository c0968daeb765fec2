pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{
    CacheCommands, CliArgs, Commands, DetectArgs, EstimateArgs, ManifestArgs, PullArgs,
};
pub use output::{OutputFormat, OutputFormatter};
