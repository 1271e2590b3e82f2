//! Manifest loading and validation.
//!
//! The manifest (`cabin.toml`) is located by walking from a start directory
//! toward the filesystem root. The raw TOML is deserialized into permissive
//! serde shapes first and then validated into the typed model, so every
//! diagnostic names the offending value rather than a serde code path.

use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::semver::{SemverError, Version};
use crate::version_req::{VersionReq, VersionReqError};

/// File name of the project manifest.
pub const MANIFEST_FILE_NAME: &str = "cabin.toml";

/// Errors raised while loading or validating a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("could not find `cabin.toml` in `{start}` or its parents")]
    NotFound { start: Utf8PathBuf },
    #[error("failed to read {path}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid package name `{name}`: {reason}")]
    PackageName { name: String, reason: &'static str },
    #[error("invalid edition: {0}")]
    Edition(String),
    #[error("invalid dependency name `{name}`: {reason}")]
    DependencyName { name: String, reason: &'static str },
    #[error("invalid dependency `{name}`: {reason}")]
    Dependency { name: String, reason: &'static str },
    #[error("invalid flag `{flag}`: {reason}")]
    Flag { flag: String, reason: &'static str },
    #[error("opt-level must be between 0 and 3: {0}")]
    OptLevel(u8),
    #[error(transparent)]
    Semver(#[from] SemverError),
    #[error(transparent)]
    VersionReq(#[from] VersionReqError),
}

/// A C++ language edition, ordered by release.
///
/// The original spelling is retained for `-std=` flags, so `"17"` and
/// `"1z"` compare equal but render differently.
#[derive(Debug, Clone)]
pub struct Edition {
    kind: EditionKind,
    raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EditionKind {
    Cpp98,
    Cpp03,
    Cpp11,
    Cpp14,
    Cpp17,
    Cpp20,
    Cpp23,
    Cpp26,
}

impl Edition {
    /// Parse an edition string, accepting the GNU-style aliases
    /// (`0x`, `1y`, `1z`, `2a`, `2b`, `2c`).
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Edition`] for unknown values.
    pub fn try_from_str(value: &str) -> Result<Self, ManifestError> {
        let kind = match value {
            "98" => EditionKind::Cpp98,
            "03" => EditionKind::Cpp03,
            "0x" | "11" => EditionKind::Cpp11,
            "1y" | "14" => EditionKind::Cpp14,
            "1z" | "17" => EditionKind::Cpp17,
            "2a" | "20" => EditionKind::Cpp20,
            "2b" | "23" => EditionKind::Cpp23,
            "2c" | "26" => EditionKind::Cpp26,
            _ => return Err(ManifestError::Edition(value.to_owned())),
        };
        Ok(Self {
            kind,
            raw: value.to_owned(),
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The compiler flag selecting this edition.
    #[must_use]
    pub fn std_flag(&self) -> String {
        format!("-std=c++{}", self.raw)
    }
}

impl Display for Edition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for Edition {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for Edition {}

impl PartialOrd for Edition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Edition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind.cmp(&other.kind)
    }
}

impl FromStr for Edition {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from_str(s)
    }
}

/// The `[package]` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub edition: Edition,
    pub version: Version,
}

/// A declared dependency, dispatched on by the installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// Cloned from a Git URL, optionally pinned to a rev, tag, or branch.
    Git {
        name: String,
        url: String,
        target: Option<String>,
    },
    /// A sibling project referenced by relative path.
    Path { name: String, path: Utf8PathBuf },
    /// Located through pkg-config against a version requirement.
    System { name: String, req: VersionReq },
}

impl Dependency {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Git { name, .. } | Self::Path { name, .. } | Self::System { name, .. } => name,
        }
    }
}

/// Named profile selecting compile and link options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuildProfile {
    Dev,
    Release,
    Test,
}

impl BuildProfile {
    /// Directory under `cabin-out` holding this profile's artifacts. Test
    /// builds share the dev output tree.
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Dev | Self::Test => "debug",
            Self::Release => "release",
        }
    }
}

impl Display for BuildProfile {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dev => "dev",
            Self::Release => "release",
            Self::Test => "test",
        })
    }
}

/// How the test profile combines flag lists with the dev profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InheritMode {
    #[default]
    Append,
    Overwrite,
}

/// A resolved bundle of compile and link options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub cxxflags: Vec<String>,
    pub ldflags: Vec<String>,
    pub lto: bool,
    pub debug: bool,
    pub compdb: bool,
    pub opt_level: u8,
}

/// The `[lint]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lint {
    pub cpplint_filters: Vec<String>,
}

/// A validated project manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub path: Utf8PathBuf,
    pub package: Package,
    pub dependencies: Vec<Dependency>,
    pub dev_dependencies: Vec<Dependency>,
    pub profiles: IndexMap<BuildProfile, Profile>,
    pub lint: Lint,
}

impl Manifest {
    /// Locate and load the manifest starting from `start`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::NotFound`] when no `cabin.toml` exists in
    /// `start` or any of its parents, or any validation error from
    /// [`Manifest::from_path`].
    pub fn load(start: &Utf8Path) -> Result<Self, ManifestError> {
        let path = find_manifest(start)?;
        Self::from_path(&path)
    }

    /// Load and validate the manifest at an exact path.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read, the TOML fails to
    /// parse, or any field fails validation.
    pub fn from_path(path: &Utf8Path) -> Result<Self, ManifestError> {
        let contents = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(path, &contents)
    }

    pub(crate) fn from_toml(path: &Utf8Path, contents: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest =
            toml::from_str(contents).map_err(|source| ManifestError::Parse {
                path: path.to_owned(),
                source,
            })?;

        validate_package_name(&raw.package.name)?;
        let package = Package {
            name: raw.package.name,
            edition: Edition::try_from_str(&raw.package.edition)?,
            version: Version::parse(&raw.package.version)?,
        };

        let dependencies = convert_dependencies(raw.dependencies)?;
        let dev_dependencies = convert_dependencies(raw.dev_dependencies)?;

        let profile = raw.profile.unwrap_or_default();
        let dev = resolve_profile(&profile.base, profile.dev.as_ref(), true, 0)?;
        let release = resolve_profile(&profile.base, profile.release.as_ref(), false, 3)?;
        let test = resolve_test_profile(&dev, profile.test.as_ref())?;
        let profiles = IndexMap::from([
            (BuildProfile::Dev, dev),
            (BuildProfile::Release, release),
            (BuildProfile::Test, test),
        ]);

        let lint = Lint {
            cpplint_filters: raw
                .lint
                .and_then(|lint| lint.cpplint)
                .and_then(|cpplint| cpplint.filters)
                .unwrap_or_default(),
        };

        Ok(Self {
            path: path.to_owned(),
            package,
            dependencies,
            dev_dependencies,
            profiles,
            lint,
        })
    }

    /// The directory containing the manifest.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        self.path.parent().unwrap_or(Utf8Path::new("."))
    }

    /// The resolved profile for `kind`. All three profiles always exist.
    #[must_use]
    pub fn profile(&self, kind: BuildProfile) -> &Profile {
        &self.profiles[&kind]
    }
}

fn find_manifest(start: &Utf8Path) -> Result<Utf8PathBuf, ManifestError> {
    let mut dir = start.to_owned();
    loop {
        let candidate = dir.join(MANIFEST_FILE_NAME);
        debug!("looking for manifest at {candidate}");
        if candidate.is_file() {
            return Ok(candidate);
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_owned(),
            None => break,
        }
    }
    Err(ManifestError::NotFound {
        start: start.to_owned(),
    })
}

// Raw serde shapes. Unknown top-level keys are deliberately ignored;
// validation happens in the conversion step above.

#[derive(Debug, Deserialize)]
struct RawManifest {
    package: RawPackage,
    #[serde(default)]
    dependencies: IndexMap<String, RawDependency>,
    #[serde(default, rename = "dev-dependencies")]
    dev_dependencies: IndexMap<String, RawDependency>,
    #[serde(default)]
    profile: Option<RawProfileTable>,
    #[serde(default)]
    lint: Option<RawLint>,
}

#[derive(Debug, Deserialize)]
struct RawPackage {
    name: String,
    edition: String,
    version: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawDependency {
    git: Option<String>,
    rev: Option<String>,
    tag: Option<String>,
    branch: Option<String>,
    path: Option<String>,
    system: Option<bool>,
    version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProfileTable {
    dev: Option<RawProfile>,
    release: Option<RawProfile>,
    test: Option<RawProfile>,
    #[serde(flatten)]
    base: RawProfile,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawProfile {
    cxxflags: Option<Vec<String>>,
    ldflags: Option<Vec<String>>,
    lto: Option<bool>,
    debug: Option<bool>,
    compdb: Option<bool>,
    opt_level: Option<u8>,
    inherit_mode: Option<InheritMode>,
}

#[derive(Debug, Deserialize)]
struct RawLint {
    cpplint: Option<RawCpplint>,
}

#[derive(Debug, Deserialize)]
struct RawCpplint {
    filters: Option<Vec<String>>,
}

fn convert_dependencies(
    raw: IndexMap<String, RawDependency>,
) -> Result<Vec<Dependency>, ManifestError> {
    raw.into_iter()
        .map(|(name, dep)| convert_dependency(name, dep))
        .collect()
}

fn convert_dependency(name: String, raw: RawDependency) -> Result<Dependency, ManifestError> {
    validate_dep_name(&name)?;
    let shape_error = |reason| ManifestError::Dependency {
        name: name.clone(),
        reason,
    };

    if let Some(url) = raw.git {
        if raw.path.is_some() || raw.system.is_some() {
            return Err(shape_error(
                "`git` cannot be combined with `path` or `system`",
            ));
        }
        let targets = [raw.rev, raw.tag, raw.branch];
        let mut targets = targets.into_iter().flatten();
        let target = targets.next();
        if targets.next().is_some() {
            return Err(shape_error(
                "expected at most one of `rev`, `tag`, and `branch`",
            ));
        }
        return Ok(Dependency::Git { name, url, target });
    }

    if let Some(path) = raw.path {
        if raw.system.is_some() {
            return Err(shape_error("`path` cannot be combined with `system`"));
        }
        return Ok(Dependency::Path {
            name,
            path: Utf8PathBuf::from(path),
        });
    }

    if raw.system == Some(true) {
        let Some(version) = raw.version else {
            return Err(shape_error(
                "system dependency requires a `version` requirement",
            ));
        };
        let req = VersionReq::parse(&version)?;
        return Ok(Dependency::System { name, req });
    }

    Err(shape_error("expected a `git`, `path`, or `system` dependency"))
}

/// Validate a package name against the naming invariants.
///
/// # Errors
///
/// Returns [`ManifestError::PackageName`] naming the violated rule.
pub fn validate_package_name(name: &str) -> Result<(), ManifestError> {
    let error = |reason| ManifestError::PackageName {
        name: name.to_owned(),
        reason,
    };

    if name.is_empty() {
        return Err(error("must not be empty"));
    }
    if name.len() == 1 {
        return Err(error("must be more than one character"));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
    {
        return Err(error(
            "must only contain lowercase letters, numbers, dashes, and underscores",
        ));
    }
    if !name.as_bytes()[0].is_ascii_alphabetic() {
        return Err(error("must start with a letter"));
    }
    if !name.as_bytes()[name.len() - 1].is_ascii_alphanumeric() {
        return Err(error("must end with a letter or digit"));
    }
    if CPP_KEYWORDS.contains(&name) {
        return Err(error("must not be a C++ keyword"));
    }
    Ok(())
}

const ALLOWED_DEP_NAME_CHARS: &[u8] = b"-_/.+";

/// Validate a dependency name. The rule is more permissive than package
/// names: `/`, `.`, and a consecutive `+` pair are allowed so that names
/// like `gtkmm-4.0` and `ncurses++` pass through to pkg-config.
///
/// # Errors
///
/// Returns [`ManifestError::DependencyName`] naming the violated rule.
pub fn validate_dep_name(name: &str) -> Result<(), ManifestError> {
    let error = |reason| ManifestError::DependencyName {
        name: name.to_owned(),
        reason,
    };
    let bytes = name.as_bytes();

    if bytes.is_empty() {
        return Err(error("dependency name is empty"));
    }
    if !bytes[0].is_ascii_alphanumeric() {
        return Err(error(
            "dependency name must start with an alphanumeric character",
        ));
    }
    let last = bytes[bytes.len() - 1];
    if !last.is_ascii_alphanumeric() && last != b'+' {
        return Err(error(
            "dependency name must end with an alphanumeric character or `+`",
        ));
    }

    if !bytes
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || ALLOWED_DEP_NAME_CHARS.contains(b))
    {
        return Err(error(
            "dependency name must be alphanumeric, `-`, `_`, `/`, `.`, or `+`",
        ));
    }

    for i in 1..bytes.len() {
        if bytes[i] == b'+' {
            // Consecutive `+` characters are allowed.
            continue;
        }
        if !bytes[i].is_ascii_alphanumeric() && bytes[i] == bytes[i - 1] {
            return Err(error(
                "dependency name must not contain consecutive non-alphanumeric characters",
            ));
        }
    }
    for i in 1..bytes.len().saturating_sub(1) {
        if bytes[i] != b'.' {
            continue;
        }
        if !bytes[i - 1].is_ascii_digit() || !bytes[i + 1].is_ascii_digit() {
            return Err(error("dependency name must contain `.` wrapped by digits"));
        }
    }

    let slashes = bytes.iter().filter(|&&b| b == b'/').count();
    if slashes > 1 {
        return Err(error("dependency name must not contain more than one `/`"));
    }
    let pluses = bytes.iter().filter(|&&b| b == b'+').count();
    if pluses != 0 && pluses != 2 {
        return Err(error("dependency name must contain zero or two `+`"));
    }
    if pluses == 2 {
        let first = name.find('+').unwrap_or_default();
        let last = name.rfind('+').unwrap_or_default();
        if first + 1 != last {
            return Err(error("`+` in the dependency name must be consecutive"));
        }
    }

    Ok(())
}

/// Validate a single `cxxflags`/`ldflags` entry.
///
/// # Errors
///
/// Returns [`ManifestError::Flag`] when the flag does not start with `-` or
/// contains a character outside the permitted set.
pub fn validate_flag(flag: &str) -> Result<(), ManifestError> {
    let error = |reason| ManifestError::Flag {
        flag: flag.to_owned(),
        reason,
    };

    if !flag.starts_with('-') {
        return Err(error("must start with `-`"));
    }
    // One space is permitted for flags like `-framework Metal`.
    let mut spaces = 0usize;
    for byte in flag.bytes() {
        if byte == b' ' {
            spaces += 1;
            if spaces > 1 {
                return Err(error("must contain at most one space"));
            }
        } else if !byte.is_ascii_alphanumeric() && !b"-_=+:.,".contains(&byte) {
            return Err(error(
                "must only contain alphanumeric characters, `-`, `_`, `=`, `+`, `:`, `.`, `,`, or a single space",
            ));
        }
    }
    Ok(())
}

fn validate_profile(profile: &Profile) -> Result<(), ManifestError> {
    for flag in profile.cxxflags.iter().chain(&profile.ldflags) {
        validate_flag(flag)?;
    }
    if profile.opt_level > 3 {
        return Err(ManifestError::OptLevel(profile.opt_level));
    }
    Ok(())
}

fn resolve_profile(
    base: &RawProfile,
    named: Option<&RawProfile>,
    default_debug: bool,
    default_opt_level: u8,
) -> Result<Profile, ManifestError> {
    let flags = |field: fn(&RawProfile) -> &Option<Vec<String>>| {
        named
            .and_then(|p| field(p).clone())
            .or_else(|| field(base).clone())
            .unwrap_or_default()
    };
    let profile = Profile {
        cxxflags: flags(|p| &p.cxxflags),
        ldflags: flags(|p| &p.ldflags),
        lto: named.and_then(|p| p.lto).or(base.lto).unwrap_or(false),
        debug: named
            .and_then(|p| p.debug)
            .or(base.debug)
            .unwrap_or(default_debug),
        compdb: named
            .and_then(|p| p.compdb)
            .or(base.compdb)
            .unwrap_or(false),
        opt_level: named
            .and_then(|p| p.opt_level)
            .or(base.opt_level)
            .unwrap_or(default_opt_level),
    };
    validate_profile(&profile)?;
    Ok(profile)
}

fn resolve_test_profile(
    dev: &Profile,
    test: Option<&RawProfile>,
) -> Result<Profile, ManifestError> {
    let inherit = test.and_then(|p| p.inherit_mode).unwrap_or_default();

    let merge_flags = |dev_flags: &[String], test_flags: Option<&Vec<String>>| match inherit {
        InheritMode::Append => {
            let mut flags = dev_flags.to_vec();
            flags.extend(test_flags.cloned().unwrap_or_default());
            flags
        }
        InheritMode::Overwrite => test_flags.cloned().unwrap_or_else(|| dev_flags.to_vec()),
    };

    let profile = Profile {
        cxxflags: merge_flags(&dev.cxxflags, test.and_then(|p| p.cxxflags.as_ref())),
        ldflags: merge_flags(&dev.ldflags, test.and_then(|p| p.ldflags.as_ref())),
        lto: test.and_then(|p| p.lto).unwrap_or(dev.lto),
        debug: test.and_then(|p| p.debug).unwrap_or(dev.debug),
        compdb: test.and_then(|p| p.compdb).unwrap_or(dev.compdb),
        opt_level: test.and_then(|p| p.opt_level).unwrap_or(dev.opt_level),
    };
    validate_profile(&profile)?;
    Ok(profile)
}

const CPP_KEYWORDS: &[&str] = &[
    "alignas",
    "alignof",
    "and",
    "and_eq",
    "asm",
    "atomic_cancel",
    "atomic_commit",
    "atomic_noexcept",
    "auto",
    "bitand",
    "bitor",
    "bool",
    "break",
    "case",
    "catch",
    "char",
    "char8_t",
    "char16_t",
    "char32_t",
    "class",
    "compl",
    "concept",
    "const",
    "consteval",
    "constexpr",
    "constinit",
    "const_cast",
    "continue",
    "co_await",
    "co_return",
    "co_yield",
    "decltype",
    "default",
    "delete",
    "do",
    "double",
    "dynamic_cast",
    "else",
    "enum",
    "explicit",
    "export",
    "extern",
    "false",
    "float",
    "for",
    "friend",
    "goto",
    "if",
    "inline",
    "int",
    "long",
    "mutable",
    "namespace",
    "new",
    "noexcept",
    "not",
    "not_eq",
    "nullptr",
    "operator",
    "or",
    "or_eq",
    "private",
    "protected",
    "public",
    "reflexpr",
    "register",
    "reinterpret_cast",
    "requires",
    "return",
    "short",
    "signed",
    "sizeof",
    "static",
    "static_assert",
    "static_cast",
    "struct",
    "switch",
    "synchronized",
    "template",
    "this",
    "thread_local",
    "throw",
    "true",
    "try",
    "typedef",
    "typeid",
    "typename",
    "union",
    "unsigned",
    "using",
    "virtual",
    "void",
    "volatile",
    "wchar_t",
    "while",
    "xor",
    "xor_eq",
];
