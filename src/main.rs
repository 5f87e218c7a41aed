use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use bl600_mobile_lib::commands::{Cli, EXIT_FAILURE, EXIT_SUCCESS};
use bl600_mobile_lib::config::BridgeConfig;

fn load_config(path: Option<&Path>) -> anyhow::Result<BridgeConfig> {
    match path {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display())),
        None => Ok(BridgeConfig::default()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Usage errors exit with 1 like every other rejection; help and version with 0
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(if e.use_stderr() { EXIT_FAILURE } else { EXIT_SUCCESS });
        }
    };

    env_logger::Builder::new()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .parse_default_env()
        .init();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    ExitCode::from(bl600_mobile_lib::run(cli, config).await)
}
