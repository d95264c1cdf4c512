#![forbid(unsafe_code)]

mod cli;
mod commands;

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use cli::Command;
use infrastructure::config::PolicyConfig;
use infrastructure::logging;

fn main() -> Result<()> {
    let cli = cli::parse();

    let config = PolicyConfig::load(Path::new(&cli.config))
        .with_context(|| format!("failed to load config from {}", cli.config))?;

    let level = cli.log_level.unwrap_or(config.log_level);
    let format = cli.log_format.unwrap_or(config.log_format);
    logging::init_logging(level, format)?;
    debug!(config = %cli.config, "loaded policy configuration");

    match cli.command {
        Command::Check => commands::cmd_check(&config),
        Command::Compile { table } => commands::cmd_compile(&config, table.map(Into::into)),
    }
}
