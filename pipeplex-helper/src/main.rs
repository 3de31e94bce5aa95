mod application;
mod presentation;

use std::process::ExitCode;
use std::thread;

use clap::Parser;
use pipeplex_core::agent::{CancelFlag, Session};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use crate::presentation::cli::Cli;

const EXIT_ERROR: u8 = 1;
const EXIT_CANCELLED: u8 = 2;

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// First SIGINT/SIGTERM asks the agent to stop after the current table; a
/// second one exits at once.
fn install_signal_handler(cancel: CancelFlag) -> std::io::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::spawn(move || {
        for sig in signals.forever() {
            if cancel.is_cancelled() {
                error!(signal = sig, "second termination signal, exiting");
                std::process::exit(i32::from(EXIT_CANCELLED));
            }
            warn!(signal = sig, "termination requested, stopping after current table");
            cancel.cancel();
        }
    });
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cancel = CancelFlag::new();
    if let Err(e) = install_signal_handler(cancel.clone()) {
        error!(error = %e, "cannot install signal handlers");
        return ExitCode::from(EXIT_ERROR);
    }
    let session = Session::with_cancel(cli.content, cancel);

    match application::run(cli, &session) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(code = e.code(), "{e}");
            if e.is_cancelled() {
                ExitCode::from(EXIT_CANCELLED)
            } else {
                ExitCode::from(EXIT_ERROR)
            }
        }
    }
}
