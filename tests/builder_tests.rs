//! End-to-end tests for build configuration and Makefile emission.
//!
//! The compiler is replaced by a shell stub that reproduces the `-MM`
//! contract: one `obj: src header…` line derived from the `#include`
//! directives of the scanned source. No real compiler is needed.

use std::fs;
use std::time::{Duration, SystemTime};

use cabin::builder::{self, BuildSettings};
use cabin::manifest::{BuildProfile, Manifest};
use cabin::parallelism::Parallelism;
use camino::{Utf8Path, Utf8PathBuf};

const MM_STUB: &str = r#"#!/bin/sh
# Minimal stand-in for a compiler's -MM mode: print `obj: src headers...`
# where the headers come from the source's `#include "..."` lines.
for last; do :; done
base=${last##*/}
stem=${base%.*}
deps="$last"
while IFS= read -r line; do
  case $line in
    '#include "'*'"')
      inc=${line#\#include \"}
      inc=${inc%\"}
      deps="$deps ../../src/$inc"
      ;;
  esac
done < "$last"
printf '%s.o: %s\n' "$stem" "$deps"
"#;

struct Fixture {
    _temp: tempfile::TempDir,
    root: Utf8PathBuf,
    settings: BuildSettings,
}

fn fixture() -> Fixture {
    let temp = tempfile::tempdir().expect("create temp dir");
    let root = Utf8Path::from_path(temp.path())
        .expect("utf-8 temp dir")
        .to_path_buf();

    fs::write(
        root.join("cabin.toml"),
        "[package]\nname = \"demo\"\nedition = \"20\"\nversion = \"1.2.3\"\n",
    )
    .expect("write manifest");

    let src = root.join("src");
    fs::create_dir_all(&src).expect("create src");
    fs::write(
        src.join("main.cc"),
        "#include \"algo.hpp\"\nint main() { return run(); }\n",
    )
    .expect("write main.cc");
    fs::write(
        src.join("algo.hpp"),
        "#pragma once\nint run();\n",
    )
    .expect("write algo.hpp");
    fs::write(
        src.join("algo.cc"),
        concat!(
            "#include \"algo.hpp\"\n",
            "int run() { return 0; }\n",
            "#ifdef CABIN_TEST\n",
            "int main() { return run(); }\n",
            "#endif\n",
        ),
    )
    .expect("write algo.cc");

    let stub = root.join("cxx-stub");
    fs::write(&stub, MM_STUB).expect("write compiler stub");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&stub, fs::Permissions::from_mode(0o755)).expect("chmod stub");
    }

    let settings = BuildSettings {
        profile: BuildProfile::Dev,
        cxx: stub.to_string(),
        verbose: false,
        color: false,
        parallelism: Parallelism::new(2),
    };
    Fixture {
        _temp: temp,
        root,
        settings,
    }
}

fn load(fixture: &Fixture) -> Manifest {
    Manifest::load(&fixture.root).expect("load manifest")
}

#[test]
fn configures_compile_link_and_test_targets() {
    let fixture = fixture();
    let manifest = load(&fixture);

    let config = builder::configure_build(&manifest, &[], &fixture.settings)
        .expect("configure build");
    let makefile = config.emit_makefile().expect("emit makefile");

    // Variables.
    assert!(makefile.contains(&format!("CXX ?= {}", fixture.settings.cxx)));
    assert!(makefile.contains("CXXFLAGS := -std=c++20 -g -O0 -DDEBUG"));
    assert!(makefile.contains("DEFINES := '-DDEMO_VERSION=\"1.2.3\"'"));
    assert!(makefile.contains("INCLUDES := -Iinclude"));
    assert!(makefile.contains("SRCS := ../../src/algo.cc ../../src/main.cc"));

    // Phony and all.
    assert!(makefile.contains(".PHONY: all test\n"));
    assert!(makefile.contains("all: demo\n"));

    // Compile targets keep the source as the first prerequisite.
    assert!(makefile.contains("demo.d/main.o: ../../src/main.cc ../../src/algo.hpp | demo.d\n"));
    assert!(makefile.contains("demo.d/algo.o: ../../src/algo.cc ../../src/algo.hpp | demo.d\n"));

    // The binary links every object reached through header prerequisites.
    assert!(makefile.contains("demo: demo.d/main.o demo.d/algo.o\n"));

    // algo.cc mentions the test sentinel, so it yields a unit-test binary.
    assert!(makefile.contains("tests/test_algo.o: ../../src/algo.cc ../../src/algo.hpp | tests\n"));
    assert!(makefile.contains("tests/test_algo: tests/test_algo.o\n"));
    assert!(makefile.contains("test: tests/test_algo\n"));
    assert!(makefile.contains("-DCABIN_TEST -c $< -o $@"));

    // Directory-creation rules exist for both output trees.
    assert!(makefile.contains("demo.d:\n\t@mkdir -p $@\n"));
    assert!(makefile.contains("tests:\n\t@mkdir -p $@\n"));
}

#[test]
fn emission_is_deterministic_across_runs() {
    let fixture = fixture();
    let manifest = load(&fixture);

    let emit = || {
        builder::configure_build(&manifest, &[], &fixture.settings)
            .expect("configure build")
            .emit_makefile()
            .expect("emit makefile")
    };
    assert_eq!(emit(), emit());
}

#[test]
fn makefile_is_only_regenerated_when_stale() {
    let fixture = fixture();
    let manifest = load(&fixture);

    let build_dir = builder::emit_makefile(&manifest, &[], &fixture.settings)
        .expect("emit makefile");
    let makefile = build_dir.join("Makefile");
    assert!(makefile.is_file());

    // Mark the Makefile as newer than everything: the next emission must
    // leave it untouched.
    let original = fs::read_to_string(&makefile).expect("read makefile");
    fs::write(&makefile, format!("{original}# sentinel\n")).expect("append sentinel");
    let file = fs::File::options()
        .write(true)
        .open(&makefile)
        .expect("open makefile");
    file.set_modified(SystemTime::now() + Duration::from_secs(3600))
        .expect("set mtime into the future");
    drop(file);

    builder::emit_makefile(&manifest, &[], &fixture.settings).expect("no-op emission");
    let preserved = fs::read_to_string(&makefile).expect("read makefile");
    assert!(preserved.ends_with("# sentinel\n"));

    // An old Makefile is stale and gets rewritten.
    let file = fs::File::options()
        .write(true)
        .open(&makefile)
        .expect("open makefile");
    file.set_modified(SystemTime::UNIX_EPOCH).expect("set mtime into the past");
    drop(file);

    builder::emit_makefile(&manifest, &[], &fixture.settings).expect("regeneration");
    let regenerated = fs::read_to_string(&makefile).expect("read makefile");
    assert!(!regenerated.contains("# sentinel"));
    assert_eq!(regenerated, original);
}

#[test]
fn compdb_entries_match_the_clang_schema() {
    let fixture = fixture();
    let manifest = load(&fixture);

    let build_dir = builder::emit_compdb(&manifest, &[], &fixture.settings)
        .expect("emit compile commands");
    let compdb = build_dir.join("compile_commands.json");
    let contents = fs::read_to_string(&compdb).expect("read compile commands");

    let entries: serde_json::Value = serde_json::from_str(&contents).expect("valid JSON");
    let entries = entries.as_array().expect("array of entries");
    assert_eq!(entries.len(), 3); // algo.o, main.o, test_algo.o

    for entry in entries {
        for key in ["directory", "file", "output", "command"] {
            assert!(entry.get(key).is_some(), "missing {key} in {entry}");
        }
        let command = entry["command"].as_str().expect("command string");
        assert!(command.contains(" -c "));
        assert!(command.contains("-std=c++20"));
    }

    let outputs: Vec<&str> = entries
        .iter()
        .map(|entry| entry["output"].as_str().expect("output string"))
        .collect();
    assert_eq!(outputs, ["demo.d/algo.o", "demo.d/main.o", "tests/test_algo.o"]);
}

#[test]
fn missing_src_directory_is_an_error() {
    let fixture = fixture();
    let manifest = load(&fixture);
    fs::remove_dir_all(fixture.root.join("src")).expect("remove src");

    let err = builder::configure_build(&manifest, &[], &fixture.settings)
        .expect_err("src is required");
    assert!(err.to_string().contains("src directory not found"));
}

#[test]
fn missing_main_source_is_an_error() {
    let fixture = fixture();
    let manifest = load(&fixture);
    fs::remove_file(fixture.root.join("src").join("main.cc")).expect("remove main.cc");

    let err = builder::configure_build(&manifest, &[], &fixture.settings)
        .expect_err("src/main.cc is required");
    assert!(err.to_string().contains("src/main.cc not found"));
}
