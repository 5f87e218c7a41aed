use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::commands::{Command, ConsoleLine, Dispatcher, EXIT_FAILURE, EXIT_SUCCESS};
use crate::daemon::{DaemonController, DaemonPhase};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Run one command on the blocking pool and turn the outcome into an exit code.
pub async fn run_command(dispatcher: Arc<Dispatcher>, command: Command) -> u8 {
    let name = dispatcher.daemon().name().to_string();
    let result = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        dispatcher.dispatch(&command, &mut out)
    })
    .await;

    match result {
        Ok(Ok(())) => EXIT_SUCCESS,
        Ok(Err(e)) => {
            eprintln!("{}: {}", name, e);
            e.exit_code()
        }
        Err(e) => {
            log::error!("Command task failed: {}", e);
            EXIT_FAILURE
        }
    }
}

/// Read further commands from `input` while the daemon lives in this process.
///
/// `quit`/`exit` or `shutdown_signal` end the console; end of input only stops
/// reading, so a daemon started without a terminal keeps running until
/// signalled. On the way out the daemon is stopped and the device released.
pub async fn run_console<R, F>(dispatcher: Arc<Dispatcher>, input: R, shutdown_signal: F) -> u8
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    let mut lines = input.lines();
    let mut input_open = true;
    tokio::pin!(shutdown_signal);
    log::info!("Console ready; type 'stop', 'status' or 'quit'");

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_line(&dispatcher, &line).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        log::info!("Console input closed; {} runs until signalled", dispatcher.daemon().name());
                        input_open = false;
                    }
                    Err(e) => {
                        log::error!("Console input failed: {}", e);
                        input_open = false;
                    }
                }
            }
            _ = &mut shutdown_signal => break,
        }
    }

    shutdown(&dispatcher).await
}

/// Resolves on Ctrl-C, or on SIGTERM where available.
pub async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => log::info!("Interrupted"),
                    _ = term.recv() => log::info!("Terminated"),
                }
                return;
            }
            Err(e) => log::warn!("Cannot listen for SIGTERM: {}", e),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Interrupted"),
        Err(e) => {
            log::error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await
        }
    }
}

/// Returns false when the console should exit.
async fn handle_line(dispatcher: &Arc<Dispatcher>, line: &str) -> bool {
    let words = match split_words(line) {
        Ok(words) => words,
        Err(e) => {
            eprintln!("{}", e);
            return true;
        }
    };

    match words.first().map(String::as_str) {
        None => return true,
        Some("quit") | Some("exit") => return false,
        Some(_) => {}
    }

    match ConsoleLine::try_parse_from(words) {
        Ok(parsed) => {
            run_command(dispatcher.clone(), parsed.command).await;
        }
        Err(e) => eprintln!("{}", e),
    }
    true
}

async fn shutdown(dispatcher: &Dispatcher) -> u8 {
    let daemon = dispatcher.daemon();
    // Stop latency is bounded by one I/O timeout; allow a few before giving up
    let deadline = tokio::time::Instant::now() + dispatcher.config().io_timeout() * 3;

    // A unit still opening the device cannot take a stop request yet
    if !wait_for(daemon, deadline, |phase| phase != DaemonPhase::Starting).await {
        log::warn!("{} never came up; nothing to stop", daemon.name());
        return EXIT_SUCCESS;
    }

    if daemon.request_stop().is_err() {
        return EXIT_SUCCESS;
    }

    if !wait_for(daemon, deadline, |_| daemon.maintenance_allowed()).await {
        log::warn!("{} did not acknowledge the stop request", daemon.name());
        return EXIT_FAILURE;
    }
    EXIT_SUCCESS
}

async fn wait_for(
    daemon: &DaemonController,
    deadline: tokio::time::Instant,
    settled: impl Fn(DaemonPhase) -> bool,
) -> bool {
    loop {
        if settled(daemon.status().phase()) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
}

/// Split a console line into words with POSIX shell quoting rules.
pub fn split_words(line: &str) -> Result<Vec<String>, String> {
    shell_words::split(line).map_err(|e| format!("Cannot parse line: {}", e))
}
