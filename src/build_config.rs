//! The build graph and its Makefile / compile-commands emission.
//!
//! A [`BuildConfig`] holds make variables and targets together with
//! reverse-dependency maps. Emission topologically sorts both node kinds
//! with the same Kahn pass; variables come out in dependency order and
//! targets in reverse order, so the root-like rules appear first in the
//! generated Makefile.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use thiserror::Error;

/// Errors raised while emitting a build configuration.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("too complex build graph")]
    TooComplexGraph,
    #[error("failed to resolve build directory {path}")]
    BuildDir {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize compile commands")]
    CompdbSerialize(#[from] serde_json::Error),
}

/// Make variable assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// `=`
    Recursive,
    /// `:=`
    Simple,
    /// `?=`
    Cond,
    /// `+=`
    Append,
    /// `!=`
    Shell,
}

impl Display for VarKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Recursive => "=",
            Self::Simple => ":=",
            Self::Cond => "?=",
            Self::Append => "+=",
            Self::Shell => "!=",
        })
    }
}

/// A make variable definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub value: String,
    pub kind: VarKind,
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.value)
    }
}

/// A make target: its commands and ordered-unique prerequisites.
///
/// The literal prerequisite `"|"` marks the start of order-only
/// prerequisites, mirroring the emitted Makefile syntax.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    pub commands: Vec<String>,
    pub depends_on: IndexSet<String>,
}

/// Expanded compile variables recorded for compile-commands emission.
#[derive(Debug, Clone, Default)]
pub struct CompileEnv {
    pub cxx: String,
    pub cxxflags: String,
    pub defines: String,
    pub includes: String,
}

#[derive(Debug, Serialize)]
struct CompdbEntry {
    directory: String,
    file: String,
    output: String,
    command: String,
}

/// The full build graph for one package.
#[derive(Debug, Default)]
pub struct BuildConfig {
    pub package_name: String,
    pub build_out_dir: Utf8PathBuf,
    variables: IndexMap<String, Variable>,
    var_deps: HashMap<String, Vec<String>>,
    pub targets: IndexMap<String, Target>,
    target_deps: HashMap<String, Vec<String>>,
    phony: Option<Target>,
    all: Option<Target>,
    compile_env: CompileEnv,
}

impl BuildConfig {
    #[must_use]
    pub fn new(package_name: &str) -> Self {
        Self {
            package_name: package_name.to_owned(),
            build_out_dir: Utf8PathBuf::from(format!("{package_name}.d")),
            ..Self::default()
        }
    }

    pub fn define_variable(
        &mut self,
        name: impl Into<String>,
        variable: Variable,
        depends_on: impl IntoIterator<Item = String>,
    ) {
        let name = name.into();
        for dep in depends_on {
            // Reverse dependency: emitting `dep` unblocks `name`.
            self.var_deps.entry(dep).or_default().push(name.clone());
        }
        self.variables.insert(name, variable);
    }

    pub fn define_simple_variable(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        depends_on: impl IntoIterator<Item = String>,
    ) {
        self.define_variable(
            name,
            Variable {
                value: value.into(),
                kind: VarKind::Simple,
            },
            depends_on,
        );
    }

    pub fn define_cond_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.define_variable(
            name,
            Variable {
                value: value.into(),
                kind: VarKind::Cond,
            },
            [],
        );
    }

    pub fn define_target(
        &mut self,
        name: impl Into<String>,
        commands: Vec<String>,
        depends_on: IndexSet<String>,
    ) {
        let name = name.into();
        for dep in &depends_on {
            self.target_deps
                .entry(dep.clone())
                .or_default()
                .push(name.clone());
        }
        self.targets.insert(name, Target { commands, depends_on });
    }

    #[must_use]
    pub fn has_target(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    /// Add a pseudo-target to the `.PHONY` aggregation.
    pub fn add_phony(&mut self, target: impl Into<String>) {
        self.phony
            .get_or_insert_with(Target::default)
            .depends_on
            .insert(target.into());
    }

    /// Set the dependency set of the `all` target.
    pub fn set_all(&mut self, depends_on: IndexSet<String>) {
        self.all = Some(Target {
            commands: Vec::new(),
            depends_on,
        });
    }

    pub fn set_compile_env(&mut self, env: CompileEnv) {
        self.compile_env = env;
    }

    /// Render the Makefile.
    ///
    /// Variables are emitted in topological order, then `.PHONY`, `all`,
    /// and the real targets in reverse topological order.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::TooComplexGraph`] when either node kind
    /// contains a dependency cycle.
    pub fn emit_makefile(&self) -> Result<String, BuildError> {
        let mut out = String::new();

        let sorted_vars = topo_sort(&self.variables, &self.var_deps)?;
        for name in &sorted_vars {
            out.push_str(name);
            out.push(' ');
            out.push_str(&self.variables[name].to_string());
            out.push('\n');
        }
        if !sorted_vars.is_empty() && !self.targets.is_empty() {
            out.push('\n');
        }

        if let Some(phony) = &self.phony {
            emit_target(&mut out, ".PHONY", &phony.depends_on, &phony.commands);
        }
        if let Some(all) = &self.all {
            emit_target(&mut out, "all", &all.depends_on, &all.commands);
        }

        let sorted_targets = topo_sort(&self.targets, &self.target_deps)?;
        for name in sorted_targets.iter().rev() {
            let target = &self.targets[name];
            emit_target(&mut out, name, &target.depends_on, &target.commands);
        }

        Ok(out)
    }

    /// Render the compile-commands database for Clang tooling.
    ///
    /// Compile targets are those whose command line invokes `$(CXX)` with
    /// `-c`; the first prerequisite is the source file.
    ///
    /// # Errors
    ///
    /// Returns an error when the base directory cannot be canonicalized or
    /// the entries fail to serialize.
    pub fn emit_compdb(&self, base_dir: &Utf8Path) -> Result<String, BuildError> {
        let directory = base_dir
            .canonicalize_utf8()
            .map_err(|source| BuildError::BuildDir {
                path: base_dir.to_owned(),
                source,
            })?;

        let mut entries = Vec::new();
        for (target, info) in &self.targets {
            if self
                .phony
                .as_ref()
                .is_some_and(|phony| phony.depends_on.contains(target))
            {
                continue;
            }
            let is_compile_target = info.commands.iter().any(|cmd| {
                let cmd = cmd.strip_prefix('@').unwrap_or(cmd);
                // Linking commands invoke $(CXX) without -c.
                cmd.starts_with("$(CXX)") && cmd.contains("-c")
            });
            if !is_compile_target {
                continue;
            }
            let Some(file) = info.depends_on.first() else {
                continue;
            };

            let env = &self.compile_env;
            let mut parts = vec![
                env.cxx.as_str(),
                env.cxxflags.as_str(),
                env.defines.as_str(),
                env.includes.as_str(),
            ];
            parts.retain(|part| !part.is_empty());
            let command = format!("{} -c {file} -o {target}", parts.join(" "));

            entries.push(CompdbEntry {
                directory: directory.to_string(),
                file: file.clone(),
                output: target.clone(),
                command,
            });
        }

        let mut json = serde_json::to_string_pretty(&entries)?;
        json.push('\n');
        Ok(json)
    }
}

/// Kahn's algorithm over a node map and its reverse-edge map.
///
/// Ties break by insertion order, so emission is deterministic. Edges whose
/// source is not a defined node are ignored: depending on an unregistered
/// name is accepted and the sort simply does not list it.
fn topo_sort<T>(
    nodes: &IndexMap<String, T>,
    edges: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>, BuildError> {
    let mut in_degree: IndexMap<&str, u32> = nodes.keys().map(|name| (name.as_str(), 0)).collect();
    for (node, neighbors) in edges {
        if !nodes.contains_key(node) {
            continue;
        }
        for neighbor in neighbors {
            if let Some(degree) = in_degree.get_mut(neighbor.as_str()) {
                *degree += 1;
            }
        }
    }

    let mut zero_in_degree: std::collections::VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&name, _)| name)
        .collect();

    let mut result = Vec::new();
    while let Some(node) = zero_in_degree.pop_front() {
        result.push(node.to_owned());

        let Some(neighbors) = edges.get(node) else {
            continue;
        };
        for neighbor in neighbors {
            if let Some(degree) = in_degree.get_mut(neighbor.as_str()) {
                *degree -= 1;
                if *degree == 0 {
                    zero_in_degree.push_back(neighbor.as_str());
                }
            }
        }
    }

    if result.len() != nodes.len() {
        // Some node never reached zero in-degree: a cycle.
        return Err(BuildError::TooComplexGraph);
    }
    Ok(result)
}

/// Emit one target, wrapping the prerequisite list at ~80 columns with
/// ` \` continuations and tab-indenting the commands.
fn emit_target<'a>(
    out: &mut String,
    name: &str,
    depends_on: impl IntoIterator<Item = &'a String>,
    commands: &[String],
) {
    let mut offset = name.len() + 2; // ":" plus the following space
    out.push_str(name);
    out.push(':');

    for dep in depends_on {
        if offset + dep.len() + 2 > 80 {
            // Pad so the continuation backslash lands on column 80.
            let pad = 83usize.saturating_sub(offset).saturating_sub(4);
            out.push_str(&" ".repeat(pad));
            out.push_str(" \\\n ");
            offset = 2;
        }
        out.push(' ');
        out.push_str(dep);
        offset += dep.len() + 1;
    }
    out.push('\n');

    for cmd in commands {
        out.push('\t');
        out.push_str(cmd);
        out.push('\n');
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps<const N: usize>(names: [&str; N]) -> IndexSet<String> {
        names.into_iter().map(str::to_owned).collect()
    }

    #[test]
    fn emits_variables_in_topological_order() {
        let mut config = BuildConfig::default();
        config.define_simple_variable("c", "3", ["b".to_owned()]);
        config.define_simple_variable("b", "2", ["a".to_owned()]);
        config.define_simple_variable("a", "1", []);

        let makefile = config.emit_makefile().expect("acyclic graph");
        assert_eq!(makefile, "a := 1\nb := 2\nc := 3\n");
    }

    #[test]
    fn cyclic_variables_are_rejected() {
        let mut config = BuildConfig::default();
        config.define_simple_variable("a", "b", ["b".to_owned()]);
        config.define_simple_variable("b", "c", ["c".to_owned()]);
        config.define_simple_variable("c", "a", ["a".to_owned()]);

        let err = config.emit_makefile().expect_err("cycle must fail");
        assert_eq!(err.to_string(), "too complex build graph");
    }

    #[test]
    fn depending_on_an_unregistered_variable_is_accepted() {
        let mut config = BuildConfig::default();
        config.define_simple_variable("a", "1", ["b".to_owned()]);

        let makefile = config.emit_makefile().expect("acyclic graph");
        assert_eq!(makefile, "a := 1\n");
    }

    #[test]
    fn emits_targets_in_reverse_topological_order() {
        let mut config = BuildConfig::default();
        config.define_target("a", vec!["echo a".to_owned()], deps([]));
        config.define_target("b", vec!["echo b".to_owned()], deps(["a"]));
        config.define_target("c", vec!["echo c".to_owned()], deps(["b"]));

        let makefile = config.emit_makefile().expect("acyclic graph");
        assert_eq!(
            makefile,
            "c: b\n\techo c\n\n\
             b: a\n\techo b\n\n\
             a:\n\techo a\n\n"
        );
    }

    #[test]
    fn cyclic_targets_are_rejected() {
        let mut config = BuildConfig::default();
        config.define_target("a", vec!["echo a".to_owned()], deps(["b"]));
        config.define_target("b", vec!["echo b".to_owned()], deps(["c"]));
        config.define_target("c", vec!["echo c".to_owned()], deps(["a"]));

        let err = config.emit_makefile().expect_err("cycle must fail");
        assert_eq!(err.to_string(), "too complex build graph");
    }

    #[test]
    fn depending_on_an_unregistered_target_is_accepted() {
        let mut config = BuildConfig::default();
        config.define_target("a", vec!["echo a".to_owned()], deps(["b"]));

        let makefile = config.emit_makefile().expect("acyclic graph");
        assert_eq!(makefile, "a: b\n\techo a\n\n");
    }

    #[test]
    fn phony_and_all_precede_real_targets() {
        let mut config = BuildConfig::default();
        config.define_simple_variable("CXXFLAGS", "-O2", []);
        config.define_target("hello", vec!["touch $@".to_owned()], deps([]));
        config.set_all(deps(["hello"]));
        config.add_phony("all");

        let makefile = config.emit_makefile().expect("acyclic graph");
        assert_eq!(
            makefile,
            "CXXFLAGS := -O2\n\n\
             .PHONY: all\n\n\
             all: hello\n\n\
             hello:\n\ttouch $@\n\n"
        );
    }

    #[test]
    fn long_prerequisite_lists_wrap_with_continuations() {
        let mut config = BuildConfig::default();
        let prereqs: IndexSet<String> = (0..20).map(|i| format!("dir/object_{i:02}.o")).collect();
        config.define_target("binary", vec!["link $@".to_owned()], prereqs);

        let makefile = config.emit_makefile().expect("acyclic graph");
        let rule_lines: Vec<&str> = makefile
            .lines()
            .take_while(|line| !line.starts_with('\t'))
            .collect();
        assert!(rule_lines.len() > 1, "expected a wrapped rule");
        for line in &rule_lines[..rule_lines.len() - 1] {
            assert!(line.ends_with('\\'), "continuation missing in {line:?}");
            assert!(line.len() <= 80, "line exceeds 80 columns: {line:?}");
        }
        // Every prerequisite survives the wrapping.
        for i in 0..20 {
            assert!(makefile.contains(&format!("dir/object_{i:02}.o")));
        }
    }

    #[test]
    fn emission_is_deterministic() {
        let build = || {
            let mut config = BuildConfig::new("demo");
            config.define_cond_variable("CXX", "clang++");
            config.define_simple_variable("CXXFLAGS", "-std=c++20", []);
            config.define_target("demo.d", vec!["mkdir -p $@".to_owned()], deps([]));
            config.define_target(
                "demo.d/main.o",
                vec!["$(CXX) $(CXXFLAGS) -c $< -o $@".to_owned()],
                deps(["../../src/main.cc", "|", "demo.d"]),
            );
            config.define_target(
                "demo",
                vec!["$(CXX) $(CXXFLAGS) $^ -o $@".to_owned()],
                deps(["demo.d/main.o"]),
            );
            config.set_all(deps(["demo"]));
            config.add_phony("all");
            config.emit_makefile().expect("acyclic graph")
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn compdb_lists_only_compile_targets() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let base = Utf8Path::from_path(dir.path()).expect("utf-8 temp dir");

        let mut config = BuildConfig::new("demo");
        config.set_compile_env(CompileEnv {
            cxx: "clang++".into(),
            cxxflags: "-std=c++20 -O0".into(),
            defines: String::new(),
            includes: "-Iinclude".into(),
        });
        config.define_target("demo.d", vec!["mkdir -p $@".to_owned()], deps([]));
        config.define_target(
            "demo.d/main.o",
            vec!["@$(CXX) $(CXXFLAGS) $(DEFINES) $(INCLUDES) -c $< -o $@".to_owned()],
            deps(["../../src/main.cc", "|", "demo.d"]),
        );
        config.define_target(
            "demo",
            vec!["@$(CXX) $(CXXFLAGS) $^ $(LIBS) -o $@".to_owned()],
            deps(["demo.d/main.o"]),
        );
        config.set_all(deps(["demo"]));
        config.add_phony("all");

        let compdb = config.emit_compdb(base).expect("emit compdb");
        let entries: serde_json::Value = serde_json::from_str(&compdb).expect("valid JSON");
        let entries = entries.as_array().expect("array");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["file"], "../../src/main.cc");
        assert_eq!(entries[0]["output"], "demo.d/main.o");
        assert_eq!(
            entries[0]["command"],
            "clang++ -std=c++20 -O0 -Iinclude -c ../../src/main.cc -o demo.d/main.o"
        );
    }
}
