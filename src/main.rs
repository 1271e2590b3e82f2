//! Application entry point.
//!
//! Parses command-line arguments and delegates execution to
//! [`runner::run`].

use std::process::ExitCode;

use cabin::{cli::Cli, runner};

fn main() -> ExitCode {
    let cli = Cli::parse_with_default();
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match runner::run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
