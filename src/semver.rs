//! Semantic version parsing and ordering.
//!
//! Versions follow the SemVer 2.0.0 grammar. Parse failures carry the
//! offending input and a caret pointing at the failure column so that
//! diagnostics read the same way in the manifest loader and on the command
//! line. Build metadata is preserved for display but never participates in
//! equality or ordering.

use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Parse failure for a semantic version string.
///
/// `Display` renders the input with a caret under the failure column:
///
/// ```text
/// invalid semver:
/// 1.2.3-01
///       ^ invalid leading zero
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemverError {
    input: String,
    pos: usize,
    reason: &'static str,
}

impl Display for SemverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid semver:\n{}\n{:pad$}^ {}",
            self.input,
            "",
            self.reason,
            pad = self.pos
        )
    }
}

impl std::error::Error for SemverError {}

impl SemverError {
    fn new(input: &str, pos: usize, reason: &'static str) -> Self {
        Self {
            input: input.to_owned(),
            pos,
            reason,
        }
    }
}

/// A single pre-release identifier, either purely numeric or alphanumeric.
///
/// Numeric identifiers order before alphanumeric ones; numerics compare by
/// value and alphanumerics lexically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u64),
    AlphaNumeric(String),
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(num) => write!(f, "{num}"),
            Self::AlphaNumeric(ident) => f.write_str(ident),
        }
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Numeric(lhs), Self::Numeric(rhs)) => lhs.cmp(rhs),
            (Self::Numeric(_), Self::AlphaNumeric(_)) => Ordering::Less,
            (Self::AlphaNumeric(_), Self::Numeric(_)) => Ordering::Greater,
            (Self::AlphaNumeric(lhs), Self::AlphaNumeric(rhs)) => lhs.cmp(rhs),
        }
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The dot-separated pre-release component of a version.
///
/// An empty pre-release compares *greater* than any non-empty one: `1.0.0`
/// is a later version than `1.0.0-alpha`. Among non-empty sequences the
/// comparison is identifier-by-identifier with the shorter sequence losing
/// when the shared prefix is equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Prerelease(Vec<Identifier>);

impl Prerelease {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn identifiers(&self) -> &[Identifier] {
        &self.0
    }
}

impl Display for Prerelease {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, ident) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{ident}")?;
        }
        Ok(())
    }
}

impl Ord for Prerelease {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.is_empty(), other.0.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Prerelease {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The `+`-introduced build metadata of a version.
///
/// Kept verbatim so formatting round-trips; ignored by comparisons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildMetadata(Vec<String>);

impl BuildMetadata {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for BuildMetadata {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// A semantic version: `major.minor.patch[-pre][+build]`.
#[derive(Debug, Clone)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Prerelease,
    pub build: BuildMetadata,
}

impl Version {
    /// Parse a full version string.
    ///
    /// # Errors
    ///
    /// Returns [`SemverError`] when the input violates the SemVer grammar,
    /// pointing at the offending column.
    pub fn parse(input: &str) -> Result<Self, SemverError> {
        let mut parser = VersionParser::new(input);
        let version = parser.parse_version()?;
        if !parser.is_eof() {
            return Err(parser.error("unexpected character"));
        }
        Ok(version)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre.is_empty() {
            write!(f, "-{}", self.pre)?;
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = SemverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Build metadata is excluded from equality, ordering, and hashing.
impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.major == other.major
            && self.minor == other.minor
            && self.patch == other.patch
            && self.pre == other.pre
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.pre.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then_with(|| self.minor.cmp(&other.minor))
            .then_with(|| self.patch.cmp(&other.patch))
            .then_with(|| self.pre.cmp(&other.pre))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Cursor-based parser over a version string.
///
/// The requirement parser reuses this to parse the version portion of a
/// comparator in place, which is why the cursor is exposed within the crate.
pub(crate) struct VersionParser<'a> {
    input: &'a str,
    pub(crate) pos: usize,
}

impl<'a> VersionParser<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    pub(crate) fn peek_byte(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    pub(crate) fn step(&mut self) {
        self.pos += 1;
    }

    pub(crate) fn error(&self, reason: &'static str) -> SemverError {
        SemverError::new(self.input, self.pos, reason)
    }

    fn error_at(&self, pos: usize, reason: &'static str) -> SemverError {
        SemverError::new(self.input, pos, reason)
    }

    /// Consume a run of `[0-9A-Za-z-]` characters, possibly empty.
    fn ident_run(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(byte) = self.peek_byte() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                self.step();
            } else {
                break;
            }
        }
        &self.input[start..self.pos]
    }

    pub(crate) fn parse_num(&mut self) -> Result<u64, SemverError> {
        let start = self.pos;
        while let Some(byte) = self.peek_byte() {
            if byte.is_ascii_digit() {
                self.step();
            } else {
                break;
            }
        }
        let digits = &self.input[start..self.pos];
        if digits.is_empty() {
            return Err(self.error_at(start, "expected number"));
        }
        if digits.len() > 1 && digits.starts_with('0') {
            return Err(self.error_at(start, "invalid leading zero"));
        }
        digits
            .parse()
            .map_err(|_| self.error_at(start, "number exceeds UINT64_MAX"))
    }

    pub(crate) fn parse_dot(&mut self) -> Result<(), SemverError> {
        if self.peek_byte() == Some(b'.') {
            self.step();
            Ok(())
        } else {
            Err(self.error("expected `.`"))
        }
    }

    /// Parse the pre-release identifiers after a consumed `-`.
    pub(crate) fn parse_pre(&mut self) -> Result<Prerelease, SemverError> {
        let mut idents = vec![self.pre_identifier()?];
        while self.peek_byte() == Some(b'.') {
            self.step();
            idents.push(self.pre_identifier()?);
        }
        Ok(Prerelease(idents))
    }

    fn pre_identifier(&mut self) -> Result<Identifier, SemverError> {
        let start = self.pos;
        let run = self.ident_run();
        if run.is_empty() {
            return Err(self.error_at(start, "expected number or identifier"));
        }
        if run.bytes().all(|b| b.is_ascii_digit()) {
            if run.len() > 1 && run.starts_with('0') {
                return Err(self.error_at(start, "invalid leading zero"));
            }
            let num = run
                .parse()
                .map_err(|_| self.error_at(start, "number exceeds UINT64_MAX"))?;
            Ok(Identifier::Numeric(num))
        } else {
            Ok(Identifier::AlphaNumeric(run.to_owned()))
        }
    }

    /// Parse the build metadata identifiers after a consumed `+`.
    ///
    /// Build identifiers permit leading zeros, so they are kept as raw
    /// strings.
    pub(crate) fn parse_build(&mut self) -> Result<BuildMetadata, SemverError> {
        let mut idents = vec![self.build_identifier()?];
        while self.peek_byte() == Some(b'.') {
            self.step();
            idents.push(self.build_identifier()?);
        }
        Ok(BuildMetadata(idents))
    }

    fn build_identifier(&mut self) -> Result<String, SemverError> {
        let start = self.pos;
        let run = self.ident_run();
        if run.is_empty() {
            return Err(self.error_at(start, "expected identifier"));
        }
        Ok(run.to_owned())
    }

    pub(crate) fn parse_version(&mut self) -> Result<Version, SemverError> {
        let major = self.parse_num()?;
        self.parse_dot()?;
        let minor = self.parse_num()?;
        self.parse_dot()?;
        let patch = self.parse_num()?;

        let pre = if self.peek_byte() == Some(b'-') {
            self.step();
            self.parse_pre()?
        } else {
            Prerelease::default()
        };
        let build = if self.peek_byte() == Some(b'+') {
            self.step();
            self.parse_build()?
        } else {
            BuildMetadata::default()
        };

        Ok(Version {
            major,
            minor,
            patch,
            pre,
            build,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn v(input: &str) -> Version {
        Version::parse(input).expect("valid version")
    }

    #[rstest]
    #[case("1.2.3")]
    #[case("0.0.0")]
    #[case("1.0.0-alpha")]
    #[case("1.0.0-alpha.1")]
    #[case("1.0.0-0.3.7")]
    #[case("1.0.0-x.7.z.92")]
    #[case("1.0.0-alpha+001")]
    #[case("1.0.0+20130313144700")]
    #[case("1.0.0-beta+exp.sha.5114f85")]
    #[case("1.2.3-1a-1a+1a-1a-1a")]
    fn parse_format_round_trips(#[case] input: &str) {
        assert_eq!(v(input).to_string(), input);
    }

    #[rstest]
    #[case(
        "1.2.3-01",
        "invalid semver:\n1.2.3-01\n      ^ invalid leading zero"
    )]
    #[case(
        "1.2.3+4.",
        "invalid semver:\n1.2.3+4.\n        ^ expected identifier"
    )]
    #[case("1.", "invalid semver:\n1.\n  ^ expected number")]
    #[case("1.2", "invalid semver:\n1.2\n   ^ expected `.`")]
    #[case(
        "1.0.0-",
        "invalid semver:\n1.0.0-\n      ^ expected number or identifier"
    )]
    #[case("01.2.3", "invalid semver:\n01.2.3\n^ invalid leading zero")]
    #[case("a.b.c", "invalid semver:\na.b.c\n^ expected number")]
    fn parse_reports_caret_diagnostics(#[case] input: &str, #[case] expected: &str) {
        let err = Version::parse(input).expect_err("must fail");
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn leading_zeros_allowed_in_build_and_alnum_pre() {
        assert_eq!(v("1.2.3+01").to_string(), "1.2.3+01");
        assert_eq!(v("1.2.3-01a").to_string(), "1.2.3-01a");
    }

    #[rstest]
    #[case("0.0.0", "0.0.1")]
    #[case("0.0.1", "0.1.0")]
    #[case("0.1.0", "1.0.0")]
    #[case("1.0.0-alpha", "1.0.0")]
    #[case("1.0.0-alpha", "1.0.0-alpha.1")]
    #[case("1.0.0-alpha.1", "1.0.0-alpha.beta")]
    #[case("1.0.0-alpha.beta", "1.0.0-beta")]
    #[case("1.0.0-beta", "1.0.0-beta.2")]
    #[case("1.0.0-beta.2", "1.0.0-beta.11")]
    #[case("1.0.0-beta.11", "1.0.0-rc.1")]
    #[case("1.0.0-rc.1", "1.0.0")]
    fn ordering_is_total(#[case] lesser: &str, #[case] greater: &str) {
        assert!(v(lesser) < v(greater));
        assert!(v(greater) > v(lesser));
        assert!(v(lesser) <= v(greater));
        assert_ne!(v(lesser), v(greater));
    }

    #[test]
    fn build_metadata_ignored_by_comparison() {
        assert_eq!(v("1.2.3+build.1"), v("1.2.3+build.2"));
        assert_eq!(v("1.2.3+build.1"), v("1.2.3"));
        assert_eq!(
            v("1.2.3+a").cmp(&v("1.2.3+b")),
            std::cmp::Ordering::Equal
        );
    }

    #[test]
    fn numeric_identifiers_compare_numerically() {
        assert!(v("1.0.0-2") < v("1.0.0-11"));
        assert!(v("1.0.0-9") < v("1.0.0-a"));
    }
}
