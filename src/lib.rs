pub mod serial;
pub mod modem;
pub mod daemon;
pub mod commands;
pub mod config;
pub mod console;

use std::sync::Arc;

use commands::{Cli, Command, Dispatcher, EXIT_SUCCESS};
use config::BridgeConfig;

/// Execute the command line; `start` keeps the process alive as a console.
pub async fn run(cli: Cli, config: BridgeConfig) -> u8 {
    let dispatcher = Arc::new(Dispatcher::new(config));
    let starts_daemon = matches!(cli.command, Command::Start { .. });

    let code = console::run_command(dispatcher.clone(), cli.command).await;
    if code != EXIT_SUCCESS || !starts_daemon {
        return code;
    }

    log::info!("{} control console started", dispatcher.daemon().name());
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    console::run_console(dispatcher, input, console::termination_signal()).await
}
