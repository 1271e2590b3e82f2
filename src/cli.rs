//! Command line interface definition using clap.
//!
//! This module defines the [`Cli`] structure and its subcommands. The core
//! never reads global state; everything it needs (jobs, verbosity, color)
//! flows in from here.

use std::env;
use std::io::IsTerminal;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use tracing::warn;

/// Maximum number of jobs accepted by the CLI.
const MAX_JOBS: usize = 64;

fn parse_jobs(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("{s} is not a valid number"))?;
    if (1..=MAX_JOBS).contains(&value) {
        Ok(value)
    } else {
        Err(format!("jobs must be between 1 and {MAX_JOBS}"))
    }
}

/// A package manager and build system for C++.
#[derive(Debug, Parser)]
#[command(name = "cabin", version, about, long_about = None)]
pub struct Cli {
    /// Change to this directory before doing anything.
    #[arg(short = 'C', long, value_name = "DIR")]
    pub directory: Option<Utf8PathBuf>,

    /// Set the number of parallel jobs.
    #[arg(short, long, value_name = "N", value_parser = parse_jobs)]
    pub jobs: Option<usize>,

    /// Echo build commands and enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// When to color output: always, auto, or never.
    #[arg(long, value_name = "WHEN")]
    pub color: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Parse command-line arguments, providing `build` as the default
    /// command.
    #[must_use]
    pub fn parse_with_default() -> Self {
        Self::parse().with_default_command()
    }

    #[must_use]
    fn with_default_command(mut self) -> Self {
        if self.command.is_none() {
            self.command = Some(Commands::Build(BuildArgs::default()));
        }
        self
    }

    /// The effective color mode: the `--color` flag wins over the
    /// `CABIN_TERM_COLOR` environment variable.
    #[must_use]
    pub fn color_mode(&self) -> ColorMode {
        if let Some(value) = &self.color {
            return ColorMode::from_str_or_warn(value);
        }
        if let Ok(value) = env::var("CABIN_TERM_COLOR") {
            return ColorMode::from_str_or_warn(&value);
        }
        ColorMode::default()
    }
}

/// Available top-level commands.
#[derive(Debug, Subcommand, PartialEq, Eq, Clone)]
pub enum Commands {
    /// Compile the current package [default].
    Build(BuildArgs),

    /// Build the current package and execute its binary.
    Run(BuildArgs),

    /// Build and run the unit tests.
    Test,

    /// Remove the build output directory.
    Clean,

    /// Print version information.
    Version,
}

/// Options shared by the building subcommands.
#[derive(Debug, Args, PartialEq, Eq, Clone, Default)]
pub struct BuildArgs {
    /// Build with optimizations enabled (the release profile).
    #[arg(short, long)]
    pub release: bool,
}

/// Terminal coloring policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    Always,
    #[default]
    Auto,
    Never,
}

impl ColorMode {
    /// Parse a mode string; an unknown value warns and falls back to auto.
    #[must_use]
    pub fn from_str_or_warn(value: &str) -> Self {
        match value {
            "always" => Self::Always,
            "auto" => Self::Auto,
            "never" => Self::Never,
            _ => {
                warn!("unknown color mode `{value}`; falling back to auto");
                Self::Auto
            }
        }
    }

    /// Whether output (and compiler diagnostics) should be colored.
    #[must_use]
    pub fn should_color(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => std::io::stdout().is_terminal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn build_is_the_default_command() {
        let cli = Cli::try_parse_from(["cabin"])
            .expect("parse")
            .with_default_command();
        assert_eq!(cli.command, Some(Commands::Build(BuildArgs::default())));
    }

    #[rstest]
    #[case(&["cabin", "build", "--release"], true)]
    #[case(&["cabin", "build"], false)]
    fn parses_release_flag(#[case] argv: &[&str], #[case] release: bool) {
        let cli = Cli::try_parse_from(argv).expect("parse");
        assert_eq!(cli.command, Some(Commands::Build(BuildArgs { release })));
    }

    #[rstest]
    #[case("0")]
    #[case("65")]
    #[case("many")]
    fn rejects_invalid_job_counts(#[case] jobs: &str) {
        assert!(Cli::try_parse_from(["cabin", "--jobs", jobs]).is_err());
    }

    #[test]
    fn accepts_job_count_in_range() {
        let cli = Cli::try_parse_from(["cabin", "-j", "8"]).expect("parse");
        assert_eq!(cli.jobs, Some(8));
    }

    #[rstest]
    #[case("always", ColorMode::Always)]
    #[case("never", ColorMode::Never)]
    #[case("auto", ColorMode::Auto)]
    #[case("sometimes", ColorMode::Auto)]
    fn parses_color_modes(#[case] value: &str, #[case] expected: ColorMode) {
        assert_eq!(ColorMode::from_str_or_warn(value), expected);
    }
}
