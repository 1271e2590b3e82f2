//! Dependency installation and compiler-flag aggregation.
//!
//! Git dependencies are cloned into a content-addressed cache keyed by
//! `name-target` and reused across invocations. Path dependencies are
//! sibling projects whose manifests are loaded and installed transitively.
//! System dependencies are located through `pkg-config` with the
//! canonicalized version requirement.

use std::collections::HashSet;
use std::env;
use std::fs;

use anyhow::{bail, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use tracing::{debug, info};

use crate::command::Command;
use crate::manifest::{BuildProfile, Dependency, Manifest, MANIFEST_FILE_NAME};

/// One include search path of a resolved dependency.
///
/// System includes render as `-isystem` so dependency headers do not
/// surface project warnings; project-local ones render as `-I`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    pub path: Utf8PathBuf,
    pub system: bool,
}

/// Compiler-option bundle produced by installing one dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedDep {
    pub include_dirs: Vec<Include>,
    pub macros: Vec<String>,
    pub lib_dirs: Vec<Utf8PathBuf>,
    pub libs: Vec<String>,
    pub other_cxxflags: Vec<String>,
    pub other_ldflags: Vec<String>,
}

fn cache_root() -> Utf8PathBuf {
    let base = env::var("XDG_CACHE_HOME")
        .ok()
        .filter(|value| !value.is_empty())
        .map_or_else(
            || Utf8PathBuf::from(env::var("HOME").unwrap_or_default()).join(".cache"),
            Utf8PathBuf::from,
        );
    base.join("cabin")
}

/// Where Git dependencies are cloned: `<cache-root>/git/src`.
#[must_use]
pub fn git_src_dir() -> Utf8PathBuf {
    cache_root().join("git").join("src")
}

/// Install every dependency of `manifest`, returning one flag bundle per
/// installed dependency. Duplicate libraries are removed by name across
/// bundles, preserving first-seen order.
///
/// # Errors
///
/// Returns an error naming the dependency when a clone, checkout, sibling
/// manifest load, or pkg-config query fails.
pub fn install_deps(
    manifest: &Manifest,
    profile: BuildProfile,
    include_dev: bool,
) -> Result<Vec<ResolvedDep>> {
    let mut resolved = Vec::new();
    let mut visited_roots = IndexSet::new();

    let dev_deps = manifest.dev_dependencies.iter();
    let deps = manifest
        .dependencies
        .iter()
        .chain(include_dev.then(|| dev_deps).into_iter().flatten());
    for dep in deps {
        install_one(dep, manifest.root(), profile, &mut resolved, &mut visited_roots)?;
    }

    dedup_libs(&mut resolved);
    Ok(resolved)
}

fn install_one(
    dep: &Dependency,
    project_root: &Utf8Path,
    profile: BuildProfile,
    resolved: &mut Vec<ResolvedDep>,
    visited_roots: &mut IndexSet<Utf8PathBuf>,
) -> Result<()> {
    match dep {
        Dependency::Git { name, url, target } => {
            let bundle = install_git(name, url, target.as_deref())
                .with_context(|| format!("failed to install dependency `{name}`"))?;
            resolved.push(bundle);
        }
        Dependency::Path { name, path } => {
            install_path(name, path, project_root, profile, resolved, visited_roots)
                .with_context(|| format!("failed to install dependency `{name}`"))?;
        }
        Dependency::System { name, req } => {
            let spec = req.to_pkg_config_string(name);
            let bundle = install_system(name, &spec)?;
            resolved.push(bundle);
        }
    }
    Ok(())
}

fn install_git(name: &str, url: &str, target: Option<&str>) -> Result<ResolvedDep> {
    let mut install_dir = git_src_dir().join(name);
    if let Some(target) = target {
        install_dir = Utf8PathBuf::from(format!("{install_dir}-{target}"));
    }

    if install_dir.exists() && !dir_is_empty(&install_dir)? {
        debug!("{name} is already installed");
    } else {
        if let Some(parent) = install_dir.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {parent}"))?;
        }
        Command::new("git")
            .args(["clone", url, install_dir.as_str()])
            .run_checked()
            .with_context(|| format!("failed to clone {url}"))?;

        if let Some(target) = target {
            // Resolve the revspec, then check the object out detached.
            let rev_parse = Command::new("git")
                .args(["-C", install_dir.as_str(), "rev-parse", "--verify"])
                .arg(format!("{target}^{{commit}}"));
            let output = rev_parse.output()?;
            if !output.status.success() {
                bail!("revspec `{target}` not found: {}", output.stderr.trim());
            }
            let oid = output.stdout.trim().to_owned();
            Command::new("git")
                .args(["-C", install_dir.as_str(), "checkout", "--detach", &oid])
                .run_checked()
                .with_context(|| format!("failed to check out `{target}`"))?;
        }

        info!("downloaded {name} {}", target.unwrap_or(url));
    }

    // Git dependencies contribute headers only; no libs are linked.
    let include_dir = install_dir.join("include");
    let path = if include_dir.is_dir() && !dir_is_empty(&include_dir)? {
        include_dir
    } else {
        install_dir
    };
    Ok(ResolvedDep {
        include_dirs: vec![Include { path, system: true }],
        ..ResolvedDep::default()
    })
}

fn install_path(
    name: &str,
    path: &Utf8Path,
    project_root: &Utf8Path,
    profile: BuildProfile,
    resolved: &mut Vec<ResolvedDep>,
    visited_roots: &mut IndexSet<Utf8PathBuf>,
) -> Result<()> {
    let dep_root = project_root.join(path);
    let dep_root = dep_root
        .canonicalize_utf8()
        .with_context(|| format!("path dependency `{name}` not found at {dep_root}"))?;
    if !visited_roots.insert(dep_root.clone()) {
        // Already installed through another dependency edge.
        return Ok(());
    }

    let sub_manifest = Manifest::from_path(&dep_root.join(MANIFEST_FILE_NAME))
        .with_context(|| format!("failed to load the manifest of `{name}`"))?;

    let include_dir = dep_root.join("include");
    let include = if include_dir.is_dir() && !dir_is_empty(&include_dir)? {
        include_dir
    } else {
        dep_root.clone()
    };
    let lib_dir = dep_root.join("cabin-out").join(profile.dir_name());

    resolved.push(ResolvedDep {
        include_dirs: vec![Include {
            path: include,
            system: false,
        }],
        lib_dirs: vec![lib_dir],
        libs: vec![sub_manifest.package.name.clone()],
        ..ResolvedDep::default()
    });

    // Transitive installation of the sibling's own dependencies.
    for dep in &sub_manifest.dependencies {
        install_one(dep, sub_manifest.root(), profile, resolved, visited_roots)?;
    }
    Ok(())
}

fn install_system(name: &str, spec: &str) -> Result<ResolvedDep> {
    let cflags = pkg_config(name, "--cflags", spec)?;
    let libs = pkg_config(name, "--libs", spec)?;

    let mut bundle = ResolvedDep::default();
    parse_pkg_config_cflags(&cflags, &mut bundle);
    parse_pkg_config_libs(&libs, &mut bundle);
    Ok(bundle)
}

fn pkg_config(name: &str, mode: &str, spec: &str) -> Result<String> {
    let cmd = Command::new("pkg-config").arg(mode).arg(spec);
    let output = cmd
        .output()
        .with_context(|| format!("failed to run pkg-config for dependency `{name}`"))?;
    if !output.status.success() {
        bail!(
            "failed to find system dependency `{name}`: {}",
            output.stderr.trim()
        );
    }
    Ok(output.stdout)
}

fn parse_pkg_config_cflags(output: &str, bundle: &mut ResolvedDep) {
    let mut tokens = output.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "-isystem" {
            if let Some(dir) = tokens.next() {
                bundle.include_dirs.push(Include {
                    path: Utf8PathBuf::from(dir),
                    system: true,
                });
            }
        } else if let Some(rest) = token.strip_prefix("-I") {
            let dir = if rest.is_empty() {
                tokens.next().unwrap_or_default()
            } else {
                rest
            };
            bundle.include_dirs.push(Include {
                path: Utf8PathBuf::from(dir),
                system: false,
            });
        } else if let Some(rest) = token.strip_prefix("-D") {
            if rest.is_empty() {
                if let Some(name) = tokens.next() {
                    bundle.macros.push(name.to_owned());
                }
            } else {
                bundle.macros.push(rest.to_owned());
            }
        } else {
            bundle.other_cxxflags.push(token.to_owned());
        }
    }
}

fn parse_pkg_config_libs(output: &str, bundle: &mut ResolvedDep) {
    let mut tokens = output.split_whitespace();
    while let Some(token) = tokens.next() {
        if let Some(rest) = token.strip_prefix("-L") {
            let dir = if rest.is_empty() {
                tokens.next().unwrap_or_default()
            } else {
                rest
            };
            bundle.lib_dirs.push(Utf8PathBuf::from(dir));
        } else if let Some(rest) = token.strip_prefix("-l") {
            let name = if rest.is_empty() {
                tokens.next().unwrap_or_default()
            } else {
                rest
            };
            bundle.libs.push(name.to_owned());
        } else {
            bundle.other_ldflags.push(token.to_owned());
        }
    }
}

/// Drop duplicate libraries by name across all bundles, keeping the first
/// occurrence.
fn dedup_libs(resolved: &mut [ResolvedDep]) {
    let mut seen = HashSet::new();
    for bundle in resolved {
        bundle.libs.retain(|lib| seen.insert(lib.clone()));
    }
}

fn dir_is_empty(dir: &Utf8Path) -> Result<bool> {
    let mut entries =
        fs::read_dir(dir).with_context(|| format!("failed to read directory {dir}"))?;
    Ok(entries.next().is_none())
}
