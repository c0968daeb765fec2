use modelyard::cli::commands::{CliArgs, Commands};
use modelyard::cli::handlers::{
    handle_cache, handle_detect, handle_estimate, handle_manifest, handle_pull,
};
use modelyard::util::logging::{self, LoggingConfig};
use modelyard::VERSION;

use clap::Parser;
use std::env;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("modelyard v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Detect(detect_args) => handle_detect(detect_args).await,
        Commands::Manifest(manifest_args) => handle_manifest(manifest_args).await,
        Commands::Pull(pull_args) => handle_pull(pull_args, args.quiet).await,
        Commands::Cache(cache_command) => handle_cache(cache_command).await,
        Commands::Estimate(estimate_args) => handle_estimate(estimate_args).await,
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        logging::parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        let level_str = env::var("MODELYARD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        logging::parse_level(&level_str)
    };

    logging::init_logging(LoggingConfig::with_level(level));
}
