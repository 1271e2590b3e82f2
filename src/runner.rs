//! Command dispatch: from a parsed [`Cli`] to manifest loading, dependency
//! installation, Makefile emission, and the `make` invocation.
//!
//! This module keeps `main` minimal by providing a single entry point that
//! handles command execution.

use std::env;
use std::fs;

use anyhow::{bail, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use miette::Diagnostic;
use thiserror::Error;
use tracing::info;

use crate::builder::{self, BuildSettings};
use crate::cli::{BuildArgs, Cli, Commands};
use crate::command::{Command, StdioConfig};
use crate::deps;
use crate::manifest::{BuildProfile, Manifest, ManifestError};
use crate::parallelism::Parallelism;

/// Errors raised during command execution.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    /// No manifest between the start directory and the filesystem root.
    #[error("could not find `cabin.toml` in `{start}` or its parents")]
    #[diagnostic(
        code(cabin::runner::manifest_not_found),
        help("create a `cabin.toml` with a `[package]` table at the project root")
    )]
    ManifestNotFound { start: Utf8PathBuf },
}

/// Execute the parsed [`Cli`] commands.
///
/// # Errors
///
/// Returns an error if manifest loading, dependency installation, build
/// configuration, or the external `make` process fails.
pub fn run(cli: &Cli) -> Result<()> {
    let command = cli
        .command
        .clone()
        .unwrap_or(Commands::Build(BuildArgs::default()));
    match command {
        Commands::Build(args) => handle_build(cli, &args).map(|_| ()),
        Commands::Run(args) => handle_run(cli, &args),
        Commands::Test => handle_test(cli),
        Commands::Clean => handle_clean(cli),
        Commands::Version => {
            println!("cabin {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn start_dir(cli: &Cli) -> Result<Utf8PathBuf> {
    if let Some(dir) = &cli.directory {
        return Ok(dir.clone());
    }
    let cwd = env::current_dir().context("failed to read the current directory")?;
    Utf8PathBuf::from_path_buf(cwd).map_err(|cwd| anyhow::anyhow!("non-UTF-8 working directory {cwd:?}"))
}

fn load_manifest(cli: &Cli) -> Result<Manifest> {
    let start = start_dir(cli)?;
    Manifest::load(&start).map_err(|err| match err {
        ManifestError::NotFound { start } => RunnerError::ManifestNotFound { start }.into(),
        other => anyhow::Error::new(other),
    })
}

fn build_settings(cli: &Cli, profile: BuildProfile) -> BuildSettings {
    let mut settings = BuildSettings::new(profile);
    settings.verbose = cli.verbose;
    settings.color = cli.color_mode().should_color();
    if let Some(jobs) = cli.jobs {
        settings.parallelism = Parallelism::new(jobs);
    }
    settings
}

/// Install dependencies and emit the Makefile (and compile-commands
/// database when the profile enables it). Returns the manifest and the
/// build output directory.
fn prepare(
    cli: &Cli,
    profile: BuildProfile,
    include_dev_deps: bool,
) -> Result<(Manifest, Utf8PathBuf)> {
    let manifest = load_manifest(cli)?;
    let resolved = deps::install_deps(&manifest, profile, include_dev_deps)?;
    let settings = build_settings(cli, profile);

    let build_dir = builder::emit_makefile(&manifest, &resolved, &settings)?;
    if manifest.profile(profile).compdb {
        builder::emit_compdb(&manifest, &resolved, &settings)?;
    }
    Ok((manifest, build_dir))
}

fn make(cli: &Cli, build_dir: &Utf8Path, target: &str) -> Result<()> {
    let parallelism = cli.jobs.map_or_else(Parallelism::default, Parallelism::new);

    // `make --question` probes up-to-date status without building.
    let probe = builder::make_command(build_dir, cli.verbose, parallelism)
        .args(["--question", target])
        .stdout(StdioConfig::Null)
        .stderr(StdioConfig::Null)
        .run()?;
    if probe.success() {
        info!("`{target}` is already up to date");
        return Ok(());
    }

    builder::make_command(build_dir, cli.verbose, parallelism)
        .arg(target)
        .run_checked()?;
    Ok(())
}

fn handle_build(cli: &Cli, args: &BuildArgs) -> Result<(Manifest, Utf8PathBuf)> {
    let profile = if args.release {
        BuildProfile::Release
    } else {
        BuildProfile::Dev
    };
    let (manifest, build_dir) = prepare(cli, profile, false)?;
    make(cli, &build_dir, &manifest.package.name)?;
    Ok((manifest, build_dir))
}

fn handle_run(cli: &Cli, args: &BuildArgs) -> Result<()> {
    let (manifest, build_dir) = handle_build(cli, args)?;

    let binary = build_dir.join(&manifest.package.name);
    let status = Command::new(binary.as_str()).run()?;
    if !status.success() {
        bail!("`{binary}` {status}");
    }
    Ok(())
}

fn handle_test(cli: &Cli) -> Result<()> {
    let (_, build_dir) = prepare(cli, BuildProfile::Test, true)?;
    make(cli, &build_dir, "test")
}

fn handle_clean(cli: &Cli) -> Result<()> {
    let manifest = load_manifest(cli)?;
    let out_root = manifest.root().join("cabin-out");
    if out_root.exists() {
        fs::remove_dir_all(&out_root).with_context(|| format!("failed to remove {out_root}"))?;
        info!("removed {out_root}");
    }
    Ok(())
}
