//! Integration tests for path-dependency installation.

use std::fs;

use cabin::deps::{self, Include};
use cabin::manifest::{BuildProfile, Manifest};
use camino::{Utf8Path, Utf8PathBuf};

fn write_package(root: &Utf8Path, name: &str, extra: &str) {
    fs::create_dir_all(root).expect("create package dir");
    fs::write(
        root.join("cabin.toml"),
        format!("[package]\nname = \"{name}\"\nedition = \"20\"\nversion = \"0.1.0\"\n{extra}"),
    )
    .expect("write manifest");
}

#[test]
fn path_dependency_exports_include_dir_and_library() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let root = Utf8Path::from_path(temp.path()).expect("utf-8 temp dir");

    let lib_root = root.join("mylib");
    write_package(&lib_root, "mylib", "");
    let include = lib_root.join("include");
    fs::create_dir_all(&include).expect("create include dir");
    fs::write(include.join("mylib.hpp"), "#pragma once\n").expect("write header");

    let app_root = root.join("app");
    write_package(&app_root, "app", "[dependencies]\nmylib = { path = \"../mylib\" }\n");

    let manifest = Manifest::load(&app_root).expect("load app manifest");
    let resolved =
        deps::install_deps(&manifest, BuildProfile::Dev, false).expect("install path dep");

    assert_eq!(resolved.len(), 1);
    let bundle = &resolved[0];

    let canonical_lib = lib_root.canonicalize_utf8().expect("canonical lib root");
    assert_eq!(
        bundle.include_dirs,
        vec![Include {
            path: canonical_lib.join("include"),
            system: false,
        }]
    );
    assert_eq!(
        bundle.lib_dirs,
        vec![canonical_lib.join("cabin-out").join("debug")]
    );
    assert_eq!(bundle.libs, ["mylib"]);
}

#[test]
fn path_dependency_without_include_dir_exports_its_root() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let root = Utf8Path::from_path(temp.path()).expect("utf-8 temp dir");

    let lib_root = root.join("headerless");
    write_package(&lib_root, "headerless", "");

    let app_root = root.join("app");
    write_package(
        &app_root,
        "app",
        "[dependencies]\nheaderless = { path = \"../headerless\" }\n",
    );

    let manifest = Manifest::load(&app_root).expect("load app manifest");
    let resolved =
        deps::install_deps(&manifest, BuildProfile::Dev, false).expect("install path dep");

    let canonical_lib = lib_root.canonicalize_utf8().expect("canonical lib root");
    assert_eq!(
        resolved[0].include_dirs,
        vec![Include {
            path: canonical_lib,
            system: false,
        }]
    );
}

#[test]
fn path_dependencies_install_transitively() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let root = Utf8Path::from_path(temp.path()).expect("utf-8 temp dir");

    let base_root = root.join("base");
    write_package(&base_root, "base", "");

    let mid_root = root.join("mid");
    write_package(&mid_root, "mid", "[dependencies]\nbase = { path = \"../base\" }\n");

    let app_root = root.join("app");
    write_package(&app_root, "app", "[dependencies]\nmid = { path = \"../mid\" }\n");

    let manifest = Manifest::load(&app_root).expect("load app manifest");
    let resolved =
        deps::install_deps(&manifest, BuildProfile::Release, false).expect("install chain");

    let libs: Vec<&str> = resolved
        .iter()
        .flat_map(|bundle| bundle.libs.iter().map(String::as_str))
        .collect();
    assert_eq!(libs, ["mid", "base"]);

    // The release profile selects the release output tree of each sibling.
    let expected: Vec<Utf8PathBuf> = ["mid", "base"]
        .iter()
        .map(|name| {
            root.join(name)
                .canonicalize_utf8()
                .expect("canonical dep root")
                .join("cabin-out")
                .join("release")
        })
        .collect();
    let lib_dirs: Vec<Utf8PathBuf> = resolved
        .iter()
        .flat_map(|bundle| bundle.lib_dirs.clone())
        .collect();
    assert_eq!(lib_dirs, expected);
}

#[test]
fn shared_path_dependencies_are_installed_once() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let root = Utf8Path::from_path(temp.path()).expect("utf-8 temp dir");

    let shared_root = root.join("shared");
    write_package(&shared_root, "shared", "");

    let a_root = root.join("liba");
    write_package(&a_root, "liba", "[dependencies]\nshared = { path = \"../shared\" }\n");

    let app_root = root.join("app");
    write_package(
        &app_root,
        "app",
        concat!(
            "[dependencies]\n",
            "liba = { path = \"../liba\" }\n",
            "shared = { path = \"../shared\" }\n",
        ),
    );

    let manifest = Manifest::load(&app_root).expect("load app manifest");
    let resolved =
        deps::install_deps(&manifest, BuildProfile::Dev, false).expect("install diamond");

    let libs: Vec<&str> = resolved
        .iter()
        .flat_map(|bundle| bundle.libs.iter().map(String::as_str))
        .collect();
    assert_eq!(libs, ["liba", "shared"]);
}

#[test]
fn missing_path_dependency_names_the_dependency() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let root = Utf8Path::from_path(temp.path()).expect("utf-8 temp dir");

    let app_root = root.join("app");
    write_package(&app_root, "app", "[dependencies]\ngone = { path = \"../gone\" }\n");

    let manifest = Manifest::load(&app_root).expect("load app manifest");
    let err = deps::install_deps(&manifest, BuildProfile::Dev, false)
        .expect_err("missing path dep must fail");
    assert!(format!("{err:#}").contains("failed to install dependency `gone`"));
}
