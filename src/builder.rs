//! Source discovery, header-dependency extraction, and build configuration.
//!
//! This is where a validated manifest plus the installed dependency flag
//! bundles become a [`BuildConfig`]: the `src/` tree is enumerated, each
//! translation unit is scanned with the compiler's `-MM` mode (bounded by
//! the parallelism cap), and the resulting prerequisite sets are wired into
//! compile, link, and test targets. The generated Makefile and
//! compile-commands database are only rewritten when they are older than
//! the manifest or some file under `src/`.

use std::env;
use std::fs;
use std::io::Write;
use std::sync::Mutex;
use std::time::SystemTime;

use anyhow::{anyhow, bail, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs as cap_fs};
use indexmap::IndexSet;
use tracing::debug;
use walkdir::WalkDir;

use crate::build_config::{BuildConfig, CompileEnv};
use crate::command::Command;
use crate::deps::ResolvedDep;
use crate::manifest::{BuildProfile, Manifest};
use crate::parallelism::{self, Parallelism};

/// Translation-unit extensions enumerated under `src/`.
pub const SOURCE_FILE_EXTS: &[&str] = &["c", "cc", "cpp", "cxx", "c++"];
/// Header extensions recognized among `-MM` prerequisites.
pub const HEADER_FILE_EXTS: &[&str] = &["h", "hh", "hpp", "hxx", "h++"];

// Compile commands run with the build output directory as their working
// directory, two levels below the project root.
const PATH_FROM_OUT_DIR: &str = "../..";
const TEST_OUT_DIR: &str = "tests";

/// Macro defined for test-mode translation units; sources mentioning it
/// yield a unit-test binary.
pub const TEST_SENTINEL: &str = "CABIN_TEST";

/// Everything the build configuration depends on besides the manifest.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub profile: BuildProfile,
    pub cxx: String,
    pub verbose: bool,
    pub color: bool,
    pub parallelism: Parallelism,
}

impl BuildSettings {
    #[must_use]
    pub fn new(profile: BuildProfile) -> Self {
        Self {
            profile,
            cxx: default_cxx(),
            verbose: false,
            color: false,
            parallelism: Parallelism::default(),
        }
    }
}

/// The compiler named by `$CXX`, falling back to clang++.
#[must_use]
pub fn default_cxx() -> String {
    env::var("CXX").unwrap_or_else(|_| "clang++".to_owned())
}

/// The build output directory for `profile` under the project root.
#[must_use]
pub fn out_dir(project_root: &Utf8Path, profile: BuildProfile) -> Utf8PathBuf {
    project_root.join("cabin-out").join(profile.dir_name())
}

/// Expanded compile and link flags, kept both as argv tokens (for `-MM`
/// scans) and rendered into Makefile variable values.
#[derive(Debug, Clone, Default)]
struct CompileFlags {
    cxx: String,
    cxxflags: Vec<String>,
    defines: Vec<String>,
    includes: Vec<String>,
    libs: Vec<String>,
}

impl CompileFlags {
    fn compose(manifest: &Manifest, deps: &[ResolvedDep], settings: &BuildSettings) -> Self {
        let profile = manifest.profile(settings.profile);

        let mut cxxflags = vec![manifest.package.edition.std_flag()];
        if settings.color {
            cxxflags.push("-fdiagnostics-color".to_owned());
        }
        if profile.debug {
            cxxflags.push("-g".to_owned());
        }
        cxxflags.push(format!("-O{}", profile.opt_level));
        cxxflags.push(if profile.debug { "-DDEBUG" } else { "-DNDEBUG" }.to_owned());
        if profile.lto {
            cxxflags.push("-flto".to_owned());
        }
        cxxflags.extend(profile.cxxflags.iter().cloned());

        let mut defines = vec![version_define(manifest)];
        let mut includes = vec!["-Iinclude".to_owned()];
        let mut libs = Vec::new();
        for dep in deps {
            defines.extend(dep.macros.iter().map(|m| format!("-D{m}")));
            for include in &dep.include_dirs {
                if include.system {
                    includes.push("-isystem".to_owned());
                    includes.push(include.path.to_string());
                } else {
                    includes.push(format!("-I{}", include.path));
                }
            }
            includes.extend(dep.other_cxxflags.iter().cloned());
            libs.extend(dep.lib_dirs.iter().map(|dir| format!("-L{dir}")));
            libs.extend(dep.libs.iter().map(|lib| format!("-l{lib}")));
            libs.extend(dep.other_ldflags.iter().cloned());
        }
        libs.extend(profile.ldflags.iter().cloned());

        Self {
            cxx: settings.cxx.clone(),
            cxxflags,
            defines,
            includes,
            libs,
        }
    }

    fn compile_env(&self) -> CompileEnv {
        CompileEnv {
            cxx: self.cxx.clone(),
            cxxflags: render_flags(&self.cxxflags),
            defines: render_flags(&self.defines),
            includes: render_flags(&self.includes),
        }
    }
}

fn version_define(manifest: &Manifest) -> String {
    let upper = manifest
        .package
        .name
        .to_uppercase()
        .replace(['-', '.', '/'], "_");
    format!("-D{upper}_VERSION=\"{}\"", manifest.package.version)
}

/// Join argv tokens into a Makefile-ready string, single-quoting tokens the
/// shell would otherwise re-tokenize.
fn render_flags(flags: &[String]) -> String {
    flags
        .iter()
        .map(|flag| {
            if flag.contains('"') || flag.contains(' ') {
                format!("'{flag}'")
            } else {
                flag.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn build_cmd(cmd: &str, verbose: bool) -> String {
    if verbose {
        cmd.to_owned()
    } else {
        format!("@{cmd}")
    }
}

fn echo_cmd(header: &str, body: &str) -> String {
    format!("@echo '{header:>12} {body}'")
}

fn define_dir_target(config: &mut BuildConfig, directory: &Utf8Path, verbose: bool) {
    config.define_target(
        directory.as_str(),
        vec![build_cmd("mkdir -p $@", verbose)],
        IndexSet::new(),
    );
}

fn define_compile_target(
    config: &mut BuildConfig,
    obj_target: String,
    depends_on: IndexSet<String>,
    is_test: bool,
    verbose: bool,
) {
    let source = depends_on
        .first()
        .map(|src| src.strip_prefix("../../").unwrap_or(src).to_owned())
        .unwrap_or_default();

    let compile = "$(CXX) $(CXXFLAGS) $(DEFINES) $(INCLUDES)";
    let compile = if is_test {
        format!("{compile} -D{TEST_SENTINEL} -c $< -o $@")
    } else {
        format!("{compile} -c $< -o $@")
    };
    let commands = vec![echo_cmd("Compiling", &source), build_cmd(&compile, verbose)];
    config.define_target(obj_target, commands, depends_on);
}

fn define_link_target(
    config: &mut BuildConfig,
    bin_target: String,
    depends_on: IndexSet<String>,
    verbose: bool,
) {
    let commands = vec![
        echo_cmd("Linking", &bin_target),
        build_cmd("$(CXX) $(CXXFLAGS) $^ $(LIBS) -o $@", verbose),
    ];
    config.define_target(bin_target, commands, depends_on);
}

/// Run the compiler in `-MM` mode for one translation unit and return its
/// raw dependency line.
fn run_mm(
    flags: &CompileFlags,
    source_from_out: &Utf8Path,
    build_dir: &Utf8Path,
    is_test: bool,
) -> Result<String> {
    let mut cmd = Command::new(&flags.cxx)
        .args(flags.defines.iter().cloned())
        .args(flags.includes.iter().cloned());
    if is_test {
        cmd = cmd.arg(format!("-D{TEST_SENTINEL}"));
    }
    let cmd = cmd
        .arg("-MM")
        .arg(source_from_out.as_str())
        .current_dir(build_dir);

    let output = cmd.output()?;
    if !output.status.success() {
        bail!(
            "failed to extract header dependencies of {source_from_out}: {}",
            output.stderr.trim()
        );
    }
    Ok(output.stdout)
}

/// Parse one `-MM` dependency line of the form `obj: src header…`,
/// tolerating ` \` line continuations. The first prerequisite is the
/// source file itself.
fn parse_mm_output(output: &str, source: &Utf8Path) -> Result<(String, IndexSet<String>)> {
    let Some((target, rest)) = output.split_once(':') else {
        bail!("malformed dependency line for {source}: {output:?}");
    };
    let target = target.trim().to_owned();
    if target.is_empty() {
        bail!("malformed dependency line for {source}: {output:?}");
    }

    let mut deps = IndexSet::new();
    for token in rest.split_whitespace() {
        if token != "\\" {
            deps.insert(token.to_owned());
        }
    }
    Ok((target, deps))
}

/// Whether a source file mentions the test sentinel macro.
fn contains_test_code(path: &Utf8Path) -> Result<bool> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {path}"))?;
    let contents = String::from_utf8_lossy(&bytes);
    let found = contents.lines().any(|line| line.contains(TEST_SENTINEL));
    if found {
        debug!("contains test code: {path}");
    }
    Ok(found)
}

fn list_source_files(src_dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let mut sources = Vec::new();
    for entry in WalkDir::new(src_dir) {
        let entry = entry.with_context(|| format!("failed to walk {src_dir}"))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = Utf8PathBuf::from_path_buf(entry.into_path())
            .map_err(|path| anyhow!("non-UTF-8 source path {path:?}"))?;
        if path
            .extension()
            .is_some_and(|ext| SOURCE_FILE_EXTS.contains(&ext))
        {
            sources.push(path);
        }
    }
    // Directory iteration order is platform-dependent; sort for
    // deterministic target insertion and therefore deterministic output.
    sources.sort();
    Ok(sources)
}

/// Map a header prerequisite (as printed by `-MM`, e.g.
/// `../../src/util/algos.hpp`) to its candidate object target
/// (`<out>/util/algos.o`) and collect the transitive closure of
/// header-objects reachable from `obj_target_deps`, bounded by the set of
/// known build objects.
fn collect_bin_dep_objs(
    deps: &mut IndexSet<String>,
    obj_target_deps: &IndexSet<String>,
    source_stem: &str,
    build_obj_targets: &IndexSet<String>,
    config: &BuildConfig,
) {
    for header in obj_target_deps {
        let header = Utf8Path::new(header);
        if header.file_stem() == Some(source_stem) {
            // The object with the same stem is replaced by the test-mode
            // object; depending on both would double-define symbols.
            continue;
        }
        if !header
            .extension()
            .is_some_and(|ext| HEADER_FILE_EXTS.contains(&ext))
        {
            continue;
        }

        let src_prefix = Utf8PathBuf::from(PATH_FROM_OUT_DIR).join("src");
        let Some(parent) = header.parent() else {
            continue;
        };
        let Ok(rel_dir) = parent.strip_prefix(&src_prefix) else {
            continue;
        };
        let base = if rel_dir.as_str().is_empty() {
            config.build_out_dir.clone()
        } else {
            config.build_out_dir.join(rel_dir)
        };
        let Some(stem) = header.file_stem() else {
            continue;
        };
        let header_obj = base.join(format!("{stem}.o")).to_string();

        if deps.contains(&header_obj) {
            continue;
        }
        if !build_obj_targets.contains(&header_obj) {
            // No translation unit produces this object.
            continue;
        }
        deps.insert(header_obj.clone());
        if let Some(target) = config.targets.get(&header_obj) {
            collect_bin_dep_objs(
                deps,
                &target.depends_on.clone(),
                source_stem,
                build_obj_targets,
                config,
            );
        }
    }
}

#[derive(Debug)]
struct ScanJob {
    index: usize,
    rel_src: Utf8PathBuf,
    from_out: Utf8PathBuf,
    test_mode: bool,
}

#[derive(Debug)]
struct ScanResult {
    index: usize,
    rel_src: Utf8PathBuf,
    test_mode: bool,
    obj: String,
    mm_deps: IndexSet<String>,
}

fn set_variables(config: &mut BuildConfig, flags: &CompileFlags, srcs: &str) {
    config.define_cond_variable("CXX", flags.cxx.clone());
    config.define_simple_variable("CXXFLAGS", render_flags(&flags.cxxflags), []);
    config.define_simple_variable("DEFINES", render_flags(&flags.defines), []);
    config.define_simple_variable("INCLUDES", render_flags(&flags.includes), []);
    config.define_simple_variable("LIBS", render_flags(&flags.libs), []);
    config.define_simple_variable("SRCS", srcs.to_owned(), []);
    config.set_compile_env(flags.compile_env());
}

/// Build the full target graph for `manifest`.
///
/// # Errors
///
/// Returns an error when `src/` or `src/main.cc` is missing, a `-MM` scan
/// fails or produces a malformed line, or the output directory cannot be
/// created.
pub fn configure_build(
    manifest: &Manifest,
    deps: &[ResolvedDep],
    settings: &BuildSettings,
) -> Result<BuildConfig> {
    let project_root = manifest.root();
    let src_dir = project_root.join("src");
    if !src_dir.is_dir() {
        bail!("src directory not found in {project_root}");
    }
    if !src_dir.join("main.cc").is_file() {
        // Only the .cc extension is supported for the main file.
        bail!("src/main.cc not found in {project_root}");
    }

    let build_dir = out_dir(project_root, settings.profile);
    fs::create_dir_all(&build_dir).with_context(|| format!("failed to create {build_dir}"))?;

    let flags = CompileFlags::compose(manifest, deps, settings);
    let mut config = BuildConfig::new(&manifest.package.name);

    let sources = list_source_files(&src_dir)?;
    let rel_sources: Vec<Utf8PathBuf> = sources
        .iter()
        .map(|source| {
            source
                .strip_prefix(project_root)
                .map(Utf8Path::to_path_buf)
                .with_context(|| format!("source {source} outside the project root"))
        })
        .collect::<Result<_>>()?;

    let srcs = rel_sources
        .iter()
        .map(|rel| format!("{PATH_FROM_OUT_DIR}/{rel}"))
        .collect::<Vec<_>>()
        .join(" ");
    set_variables(&mut config, &flags, &srcs);

    let build_out_dir = config.build_out_dir.clone();
    define_dir_target(&mut config, &build_out_dir, settings.verbose);
    config.set_all(IndexSet::from([manifest.package.name.clone()]));
    config.add_phony("all");

    // One scan job per translation unit, plus a test-mode job for every
    // unit that mentions the sentinel macro.
    let mut jobs = Vec::new();
    for (index, rel_src) in rel_sources.iter().enumerate() {
        let from_out = Utf8PathBuf::from(format!("{PATH_FROM_OUT_DIR}/{rel_src}"));
        jobs.push(ScanJob {
            index,
            rel_src: rel_src.clone(),
            from_out: from_out.clone(),
            test_mode: false,
        });
        if contains_test_code(&project_root.join(rel_src))? {
            jobs.push(ScanJob {
                index,
                rel_src: rel_src.clone(),
                from_out,
                test_mode: true,
            });
        }
    }

    let results: Mutex<Vec<ScanResult>> = Mutex::new(Vec::new());
    parallelism::for_each_bounded(settings.parallelism, jobs, |job| {
        let mm = run_mm(&flags, &job.from_out, &build_dir, job.test_mode)?;
        let (obj, mm_deps) = parse_mm_output(&mm, &job.rel_src)?;
        results
            .lock()
            .expect("scan results poisoned")
            .push(ScanResult {
                index: job.index,
                rel_src: job.rel_src,
                test_mode: job.test_mode,
                obj,
                mm_deps,
            });
        Ok::<(), anyhow::Error>(())
    })?;
    let mut results = results.into_inner().expect("scan results poisoned");
    results.sort_by_key(|result| (result.test_mode, result.index));

    // Source pass: one compile target per translation unit.
    let mut build_obj_targets = IndexSet::new();
    let split = results.partition_point(|result| !result.test_mode);
    let (normal_scans, test_scans) = results.split_at(split);

    for scan in normal_scans {
        let rel_dir = scan
            .rel_src
            .parent()
            .and_then(|parent| parent.strip_prefix("src").ok())
            .unwrap_or(Utf8Path::new(""))
            .to_path_buf();

        let mut obj_deps = scan.mm_deps.clone();
        obj_deps.insert("|".to_owned()); // order-only below here
        obj_deps.insert(config.build_out_dir.to_string());
        let mut target_base = config.build_out_dir.clone();
        if !rel_dir.as_str().is_empty() {
            target_base = target_base.join(&rel_dir);
            if !config.has_target(target_base.as_str()) {
                define_dir_target(&mut config, &target_base, settings.verbose);
            }
            obj_deps.insert(target_base.to_string());
        }

        let build_obj_target = target_base.join(&scan.obj).to_string();
        build_obj_targets.insert(build_obj_target.clone());
        define_compile_target(&mut config, build_obj_target, obj_deps, false, settings.verbose);
    }

    // Project binary target.
    let main_obj_target = config.build_out_dir.join("main.o").to_string();
    let mut bin_deps = IndexSet::from([main_obj_target.clone()]);
    let main_deps = config
        .targets
        .get(&main_obj_target)
        .map(|target| target.depends_on.clone())
        .unwrap_or_default();
    collect_bin_dep_objs(&mut bin_deps, &main_deps, "", &build_obj_targets, &config);
    define_link_target(
        &mut config,
        manifest.package.name.clone(),
        bin_deps,
        settings.verbose,
    );

    // Test pass: a unit-test binary per sentinel-bearing translation unit.
    let mut test_commands = Vec::new();
    let mut test_targets = IndexSet::new();
    for scan in test_scans {
        let rel_dir = scan
            .rel_src
            .parent()
            .and_then(|parent| parent.strip_prefix("src").ok())
            .unwrap_or(Utf8Path::new(""))
            .to_path_buf();

        let mut obj_deps = scan.mm_deps.clone();
        obj_deps.insert("|".to_owned());
        obj_deps.insert(TEST_OUT_DIR.to_owned());
        let mut target_base = Utf8PathBuf::from(TEST_OUT_DIR);
        if !rel_dir.as_str().is_empty() {
            target_base = target_base.join(&rel_dir);
            if !config.has_target(target_base.as_str()) {
                define_dir_target(&mut config, &target_base, settings.verbose);
            }
            obj_deps.insert(target_base.to_string());
        }

        let test_obj_target = target_base.join(format!("test_{}", scan.obj)).to_string();
        let Some(stem) = scan.rel_src.file_stem() else {
            continue;
        };
        let test_target = target_base.join(format!("test_{stem}")).to_string();

        define_compile_target(
            &mut config,
            test_obj_target.clone(),
            obj_deps.clone(),
            true,
            settings.verbose,
        );

        let mut test_deps = IndexSet::from([test_obj_target]);
        collect_bin_dep_objs(&mut test_deps, &obj_deps, stem, &build_obj_targets, &config);
        define_link_target(&mut config, test_target.clone(), test_deps, settings.verbose);

        test_commands.push(echo_cmd("Testing", stem));
        test_commands.push(build_cmd(&test_target, settings.verbose));
        test_targets.insert(test_target);
    }
    if !test_targets.is_empty() {
        define_dir_target(&mut config, Utf8Path::new(TEST_OUT_DIR), settings.verbose);
        config.define_target("test", test_commands, test_targets);
        config.add_phony("test");
    }

    Ok(config)
}

fn modified(path: &Utf8Path) -> Result<SystemTime> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("failed to stat {path}"))
}

/// Whether `generated` is newer than the manifest and everything under
/// `src/`.
fn is_up_to_date(
    manifest_path: &Utf8Path,
    src_dir: &Utf8Path,
    generated: &Utf8Path,
) -> Result<bool> {
    if !generated.exists() {
        return Ok(false);
    }
    let generated_time = modified(generated)?;

    for entry in WalkDir::new(src_dir) {
        let entry = entry.with_context(|| format!("failed to walk {src_dir}"))?;
        let newer = entry
            .metadata()
            .ok()
            .and_then(|meta| meta.modified().ok())
            .is_some_and(|time| time > generated_time);
        if newer {
            return Ok(false);
        }
    }
    Ok(modified(manifest_path)? <= generated_time)
}

/// Emit the Makefile for `manifest` unless it is already up to date.
///
/// Returns the build output directory holding the Makefile.
///
/// # Errors
///
/// Returns any error from [`configure_build`], graph emission, or the
/// file write.
pub fn emit_makefile(
    manifest: &Manifest,
    deps: &[ResolvedDep],
    settings: &BuildSettings,
) -> Result<Utf8PathBuf> {
    let build_dir = out_dir(manifest.root(), settings.profile);
    let makefile = build_dir.join("Makefile");
    if is_up_to_date(&manifest.path, &manifest.root().join("src"), &makefile)? {
        debug!("Makefile is up to date");
        return Ok(build_dir);
    }
    debug!("Makefile is NOT up to date");

    let config = configure_build(manifest, deps, settings)?;
    let contents = config.emit_makefile()?;
    write_generated_file(&makefile, &contents)?;
    Ok(build_dir)
}

/// Emit `compile_commands.json` unless it is already up to date.
///
/// Returns the build output directory holding the database.
///
/// # Errors
///
/// Returns any error from [`configure_build`], serialization, or the file
/// write.
pub fn emit_compdb(
    manifest: &Manifest,
    deps: &[ResolvedDep],
    settings: &BuildSettings,
) -> Result<Utf8PathBuf> {
    let build_dir = out_dir(manifest.root(), settings.profile);
    let compdb = build_dir.join("compile_commands.json");
    if is_up_to_date(&manifest.path, &manifest.root().join("src"), &compdb)? {
        debug!("compile_commands.json is up to date");
        return Ok(build_dir);
    }
    debug!("compile_commands.json is NOT up to date");

    let config = configure_build(manifest, deps, settings)?;
    let contents = config.emit_compdb(&build_dir)?;
    write_generated_file(&compdb, &contents)?;
    Ok(build_dir)
}

/// The `make` invocation driving the generated Makefile.
#[must_use]
pub fn make_command(build_dir: &Utf8Path, verbose: bool, parallelism: Parallelism) -> Command {
    let mut cmd = Command::new("make");
    if !verbose {
        cmd = cmd.args(["-s", "--no-print-directory"]);
    }
    if parallelism.is_parallel() {
        cmd = cmd.arg(format!("-j{}", parallelism.get()));
    }
    cmd.args(["-C", build_dir.as_str()])
}

fn open_ancestor_dir(path: &Utf8Path) -> Result<(cap_fs::Dir, Utf8PathBuf)> {
    if path.is_relative() {
        let dir = cap_fs::Dir::open_ambient_dir(".", ambient_authority())
            .context("failed to open the current directory")?;
        return Ok((dir, path.to_owned()));
    }

    let mut ancestors = path.ancestors();
    ancestors.next(); // skip the full path
    let (base, dir) = ancestors
        .find_map(|candidate| {
            cap_fs::Dir::open_ambient_dir(candidate.as_str(), ambient_authority())
                .ok()
                .map(|dir| (candidate.to_owned(), dir))
        })
        .ok_or_else(|| anyhow!("no existing ancestor for {path}"))?;
    let relative = path
        .strip_prefix(&base)
        .context("failed to derive a relative output path")?
        .to_owned();
    Ok((dir, relative))
}

fn write_generated_file(path: &Utf8Path, contents: &str) -> Result<()> {
    let (dir, relative) = open_ancestor_dir(path)?;
    if let Some(parent) = relative.parent().filter(|parent| !parent.as_str().is_empty()) {
        dir.create_dir_all(parent.as_str())
            .with_context(|| format!("failed to create parent directory {parent}"))?;
    }
    let mut file = dir
        .create(relative.as_str())
        .with_context(|| format!("failed to create {path}"))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("failed to write {path}"))?;
    file.flush()
        .with_context(|| format!("failed to flush {path}"))?;
    debug!("generated {path}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_line_mm_output() {
        let (obj, deps) = parse_mm_output(
            "main.o: ../../src/main.cc ../../src/util.hpp\n",
            Utf8Path::new("src/main.cc"),
        )
        .expect("well-formed line");
        assert_eq!(obj, "main.o");
        assert_eq!(
            deps.iter().collect::<Vec<_>>(),
            ["../../src/main.cc", "../../src/util.hpp"]
        );
    }

    #[test]
    fn parses_mm_output_with_continuations() {
        let output = "main.o: ../../src/main.cc \\\n  ../../src/a.hpp \\\n  ../../src/b.hpp\n";
        let (obj, deps) =
            parse_mm_output(output, Utf8Path::new("src/main.cc")).expect("well-formed line");
        assert_eq!(obj, "main.o");
        assert_eq!(
            deps.iter().collect::<Vec<_>>(),
            ["../../src/main.cc", "../../src/a.hpp", "../../src/b.hpp"]
        );
    }

    #[test]
    fn rejects_malformed_mm_output() {
        let err = parse_mm_output("no dependency line here", Utf8Path::new("src/main.cc"))
            .expect_err("must fail");
        assert!(err.to_string().contains("malformed dependency line"));
    }

    #[test]
    fn renders_flags_with_shell_quoting() {
        let flags = vec![
            "-std=c++20".to_owned(),
            "-DDEMO_VERSION=\"1.2.3\"".to_owned(),
            "-framework Metal".to_owned(),
        ];
        assert_eq!(
            render_flags(&flags),
            "-std=c++20 '-DDEMO_VERSION=\"1.2.3\"' '-framework Metal'"
        );
    }

    #[test]
    fn out_dir_follows_the_profile() {
        let root = Utf8Path::new("/proj");
        assert_eq!(
            out_dir(root, BuildProfile::Dev),
            Utf8PathBuf::from("/proj/cabin-out/debug")
        );
        assert_eq!(
            out_dir(root, BuildProfile::Release),
            Utf8PathBuf::from("/proj/cabin-out/release")
        );
        assert_eq!(
            out_dir(root, BuildProfile::Test),
            Utf8PathBuf::from("/proj/cabin-out/debug")
        );
    }

    #[test]
    fn collects_transitive_header_objects() {
        let mut config = BuildConfig::new("demo");
        let obj = |name: &str| format!("demo.d/{name}.o");
        let hdr = |name: &str| format!("../../src/{name}.hpp");
        let src = |name: &str| format!("../../src/{name}.cc");

        // a.cc includes b.hpp; b.cc includes c.hpp; c.cc stands alone.
        config.define_target(
            obj("a"),
            vec![],
            IndexSet::from([src("a"), hdr("b")]),
        );
        config.define_target(
            obj("b"),
            vec![],
            IndexSet::from([src("b"), hdr("c")]),
        );
        config.define_target(obj("c"), vec![], IndexSet::from([src("c")]));
        let build_obj_targets: IndexSet<String> =
            IndexSet::from([obj("a"), obj("b"), obj("c")]);

        let mut deps = IndexSet::from([obj("a")]);
        let roots = config.targets[&obj("a")].depends_on.clone();
        collect_bin_dep_objs(&mut deps, &roots, "", &build_obj_targets, &config);
        assert_eq!(
            deps.iter().collect::<Vec<_>>(),
            [&obj("a"), &obj("b"), &obj("c")]
        );
    }

    #[test]
    fn skips_headers_without_an_object() {
        let mut config = BuildConfig::new("demo");
        config.define_target(
            "demo.d/main.o",
            vec![],
            IndexSet::from([
                "../../src/main.cc".to_owned(),
                "../../src/header_only.hpp".to_owned(),
            ]),
        );
        let build_obj_targets = IndexSet::from(["demo.d/main.o".to_owned()]);

        let mut deps = IndexSet::from(["demo.d/main.o".to_owned()]);
        let roots = config.targets["demo.d/main.o"].depends_on.clone();
        collect_bin_dep_objs(&mut deps, &roots, "", &build_obj_targets, &config);
        assert_eq!(deps.iter().collect::<Vec<_>>(), ["demo.d/main.o"]);
    }

    #[test]
    fn test_binary_excludes_its_own_object() {
        let mut config = BuildConfig::new("demo");
        config.define_target(
            "demo.d/algo.o",
            vec![],
            IndexSet::from([
                "../../src/algo.cc".to_owned(),
                "../../src/algo.hpp".to_owned(),
            ]),
        );
        let build_obj_targets = IndexSet::from(["demo.d/algo.o".to_owned()]);

        // The test object for algo.cc must not also link demo.d/algo.o.
        let mut deps = IndexSet::from(["tests/test_algo.o".to_owned()]);
        let roots: IndexSet<String> = IndexSet::from([
            "../../src/algo.cc".to_owned(),
            "../../src/algo.hpp".to_owned(),
        ]);
        collect_bin_dep_objs(&mut deps, &roots, "algo", &build_obj_targets, &config);
        assert_eq!(deps.iter().collect::<Vec<_>>(), ["tests/test_algo.o"]);
    }
}
