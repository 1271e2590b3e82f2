//! Version requirements: comparator parsing, matching, and canonicalization.
//!
//! A requirement is at most two comparators joined by `&&`. A comparator
//! without an operator follows Cargo's caret ("compatible") semantics; such
//! a comparator, like an exact (`=`) one, cannot be chained. Requirements
//! canonicalize to bounded `>=`/`<` pairs (or a single exact point) so they
//! can be rendered for `pkg-config`.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::semver::{Prerelease, SemverError, Version, VersionParser};

/// Parse failure for a comparator or a version requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionReqError {
    Comparator {
        input: String,
        pos: usize,
        reason: &'static str,
    },
    Requirement {
        input: String,
        pos: usize,
        reason: &'static str,
    },
    Semver(SemverError),
}

impl Display for VersionReqError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Comparator { input, pos, reason } => {
                write!(f, "invalid comparator:\n{input}\n{:pad$}^ {reason}", "", pad = *pos)
            }
            Self::Requirement { input, pos, reason } => {
                write!(
                    f,
                    "invalid version requirement:\n{input}\n{:pad$}^ {reason}",
                    "",
                    pad = *pos
                )
            }
            Self::Semver(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for VersionReqError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Semver(err) => Some(err),
            Self::Comparator { .. } | Self::Requirement { .. } => None,
        }
    }
}

impl From<SemverError> for VersionReqError {
    fn from(err: SemverError) -> Self {
        Self::Semver(err)
    }
}

/// A version with optional minor and patch components, as written in a
/// requirement shorthand like `1` or `1.2`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptVersion {
    pub major: u64,
    pub minor: Option<u64>,
    pub patch: Option<u64>,
    pub pre: Prerelease,
}

/// Comparison operator of a comparator. Absence means caret/compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Exact,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exact => "=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        })
    }
}

/// A single comparator: an optional operator and a partial version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Comparator {
    pub op: Option<Op>,
    pub major: u64,
    pub minor: Option<u64>,
    pub patch: Option<u64>,
    pub pre: Prerelease,
}

impl Comparator {
    /// Parse a single comparator.
    ///
    /// # Errors
    ///
    /// Returns [`VersionReqError`] with a caret diagnostic on malformed
    /// input.
    pub fn parse(input: &str) -> Result<Self, VersionReqError> {
        let mut parser = ComparatorParser::new(input);
        parser.parse()
    }

    fn from_opt(&mut self, ver: OptVersion) {
        self.major = ver.major;
        self.minor = ver.minor;
        self.patch = ver.patch;
        self.pre = ver.pre;
    }

    /// Whether `ver` satisfies this comparator.
    #[must_use]
    pub fn satisfied_by(&self, ver: &Version) -> bool {
        match self.op {
            None => matches_no_op(self, ver),
            Some(Op::Exact) => matches_exact(self, ver),
            Some(Op::Gt) => matches_greater(self, ver),
            Some(Op::Gte) => matches_exact(self, ver) || matches_greater(self, ver),
            Some(Op::Lt) => matches_less(self, ver),
            Some(Op::Lte) => matches_exact(self, ver) || matches_less(self, ver),
        }
    }

    /// Rewrite into a fully-specified `>=`/`<`/`=` comparator.
    ///
    /// NoOp and Exact comparators are returned unchanged; their
    /// canonicalization needs the surrounding [`VersionReq`].
    #[must_use]
    pub fn canonicalize(&self) -> Self {
        let Some(op) = self.op else {
            return self.clone();
        };
        let mut cmp = self.clone();
        match op {
            Op::Exact => return cmp,
            Op::Gt => cmp.op = Some(Op::Gte),
            Op::Lte => cmp.op = Some(Op::Lt),
            Op::Gte | Op::Lt => {
                cmp.minor = Some(self.minor.unwrap_or(0));
                cmp.patch = Some(self.patch.unwrap_or(0));
                return cmp;
            }
        }

        // `>` and `<=` become `>=`/`<` of the next version, carrying into
        // the minor and major components when the smaller ones are absent.
        if let Some(patch) = self.patch {
            cmp.patch = Some(patch + 1);
            return cmp;
        }
        cmp.patch = Some(0);

        if let Some(minor) = self.minor {
            cmp.minor = Some(minor + 1);
            return cmp;
        }
        cmp.minor = Some(0);

        cmp.major += 1;
        cmp
    }

    fn to_pkg_config_string(&self) -> String {
        let mut result = String::new();
        if let Some(op) = self.op {
            result.push_str(&op.to_string());
            // pkg-config requires a space between the operator and version.
            result.push(' ');
        }
        opt_version_string(self, &mut result);
        result
    }
}

fn opt_version_string(cmp: &Comparator, result: &mut String) {
    result.push_str(&cmp.major.to_string());
    if let Some(minor) = cmp.minor {
        result.push('.');
        result.push_str(&minor.to_string());

        if let Some(patch) = cmp.patch {
            result.push('.');
            result.push_str(&patch.to_string());

            if !cmp.pre.is_empty() {
                result.push('-');
                result.push_str(&cmp.pre.to_string());
            }
        }
    }
}

impl Display for Comparator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut result = String::new();
        if let Some(op) = self.op {
            result.push_str(&op.to_string());
        }
        opt_version_string(self, &mut result);
        f.write_str(&result)
    }
}

impl FromStr for Comparator {
    type Err = VersionReqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn matches_exact(cmp: &Comparator, ver: &Version) -> bool {
    if ver.major != cmp.major {
        return false;
    }
    if let Some(minor) = cmp.minor {
        if ver.minor != minor {
            return false;
        }
    }
    if let Some(patch) = cmp.patch {
        if ver.patch != patch {
            return false;
        }
    }
    ver.pre == cmp.pre
}

fn matches_greater(cmp: &Comparator, ver: &Version) -> bool {
    if ver.major != cmp.major {
        return ver.major > cmp.major;
    }

    match cmp.minor {
        None => return false,
        Some(minor) => {
            if ver.minor != minor {
                return ver.minor > minor;
            }
        }
    }

    match cmp.patch {
        None => return false,
        Some(patch) => {
            if ver.patch != patch {
                return ver.patch > patch;
            }
        }
    }

    ver.pre > cmp.pre
}

fn matches_less(cmp: &Comparator, ver: &Version) -> bool {
    if ver.major != cmp.major {
        return ver.major < cmp.major;
    }

    match cmp.minor {
        None => return false,
        Some(minor) => {
            if ver.minor != minor {
                return ver.minor < minor;
            }
        }
    }

    match cmp.patch {
        None => return false,
        Some(patch) => {
            if ver.patch != patch {
                return ver.patch < patch;
            }
        }
    }

    ver.pre < cmp.pre
}

fn matches_no_op(cmp: &Comparator, ver: &Version) -> bool {
    if ver.major != cmp.major {
        return false;
    }

    let Some(minor) = cmp.minor else {
        return true;
    };

    let Some(patch) = cmp.patch else {
        return if cmp.major > 0 {
            ver.minor >= minor
        } else {
            ver.minor == minor
        };
    };

    if cmp.major > 0 {
        if ver.minor != minor {
            return ver.minor > minor;
        } else if ver.patch != patch {
            return ver.patch > patch;
        }
    } else if minor > 0 {
        if ver.minor != minor {
            return false;
        } else if ver.patch != patch {
            return ver.patch > patch;
        }
    } else if ver.minor != minor || ver.patch != patch {
        return false;
    }

    ver.pre >= cmp.pre
}

#[derive(Debug)]
enum CompToken {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Ver(OptVersion),
    Eof,
    Unknown,
}

struct ComparatorLexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> ComparatorLexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek_byte().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn next(&mut self) -> Result<CompToken, VersionReqError> {
        let Some(byte) = self.peek_byte() else {
            return Ok(CompToken::Eof);
        };

        match byte {
            b'=' => {
                self.pos += 1;
                Ok(CompToken::Eq)
            }
            b'>' => {
                self.pos += 1;
                if self.peek_byte() == Some(b'=') {
                    self.pos += 1;
                    Ok(CompToken::Gte)
                } else {
                    Ok(CompToken::Gt)
                }
            }
            b'<' => {
                self.pos += 1;
                if self.peek_byte() == Some(b'=') {
                    self.pos += 1;
                    Ok(CompToken::Lte)
                } else {
                    Ok(CompToken::Lt)
                }
            }
            b if b.is_ascii_digit() => {
                let mut parser = VersionParser::new(self.input);
                parser.pos = self.pos;

                let mut ver = OptVersion {
                    major: parser.parse_num()?,
                    ..OptVersion::default()
                };
                if parser.peek_byte() != Some(b'.') {
                    self.pos = parser.pos;
                    return Ok(CompToken::Ver(ver));
                }

                parser.parse_dot()?;
                ver.minor = Some(parser.parse_num()?);
                if parser.peek_byte() != Some(b'.') {
                    self.pos = parser.pos;
                    return Ok(CompToken::Ver(ver));
                }

                parser.parse_dot()?;
                ver.patch = Some(parser.parse_num()?);

                if parser.peek_byte() == Some(b'-') {
                    parser.step();
                    ver.pre = parser.parse_pre()?;
                }
                if parser.peek_byte() == Some(b'+') {
                    parser.step();
                    // Build metadata never affects matching.
                    parser.parse_build()?;
                }

                self.pos = parser.pos;
                Ok(CompToken::Ver(ver))
            }
            _ => Ok(CompToken::Unknown),
        }
    }
}

struct ComparatorParser<'a> {
    lexer: ComparatorLexer<'a>,
}

impl<'a> ComparatorParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            lexer: ComparatorLexer::new(input),
        }
    }

    fn error(&self, reason: &'static str) -> VersionReqError {
        VersionReqError::Comparator {
            input: self.lexer.input.to_owned(),
            pos: self.lexer.pos,
            reason,
        }
    }

    fn parse(&mut self) -> Result<Comparator, VersionReqError> {
        let mut result = Comparator::default();

        let token = self.lexer.next()?;
        match token {
            CompToken::Eq => result.op = Some(Op::Exact),
            CompToken::Gt => result.op = Some(Op::Gt),
            CompToken::Gte => result.op = Some(Op::Gte),
            CompToken::Lt => result.op = Some(Op::Lt),
            CompToken::Lte => result.op = Some(Op::Lte),
            CompToken::Ver(ver) => {
                result.from_opt(ver);
                return Ok(result);
            }
            CompToken::Eof | CompToken::Unknown => {
                return Err(self.error("expected =, >=, <=, >, <, or version"));
            }
        }

        // The first token was an operator; a version must follow.
        self.lexer.skip_ws();
        let token = self.lexer.next()?;
        let CompToken::Ver(ver) = token else {
            return Err(self.error("expected version"));
        };
        result.from_opt(ver);
        Ok(result)
    }
}

/// A version requirement: one comparator, or two joined by `&&`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionReq {
    pub left: Comparator,
    pub right: Option<Comparator>,
}

const fn is_comp_start(byte: u8) -> bool {
    matches!(byte, b'=' | b'>' | b'<')
}

#[derive(Debug)]
enum ReqToken {
    Comp(Comparator),
    And,
    Eof,
    Unknown,
}

struct ReqLexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> ReqLexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek_byte(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek_byte().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn next(&mut self) -> Result<ReqToken, VersionReqError> {
        self.skip_ws();
        let Some(byte) = self.peek_byte() else {
            return Ok(ReqToken::Eof);
        };

        if is_comp_start(byte) || byte.is_ascii_digit() {
            let mut parser = ComparatorParser::new(self.input);
            parser.lexer.pos = self.pos;

            let comp = parser.parse()?;
            self.pos = parser.lexer.pos;

            return Ok(ReqToken::Comp(comp));
        }
        if byte == b'&' && self.input.as_bytes().get(self.pos + 1) == Some(&b'&') {
            self.pos += 2;
            return Ok(ReqToken::And);
        }

        Ok(ReqToken::Unknown)
    }
}

struct ReqParser<'a> {
    lexer: ReqLexer<'a>,
}

impl<'a> ReqParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            lexer: ReqLexer::new(input),
        }
    }

    fn error(&self, reason: &'static str) -> VersionReqError {
        VersionReqError::Requirement {
            input: self.lexer.input.to_owned(),
            pos: self.lexer.pos,
            reason,
        }
    }

    fn parse(&mut self) -> Result<VersionReq, VersionReqError> {
        let mut result = VersionReq {
            left: self.parse_comparator_or_opt_ver()?,
            right: None,
        };

        if result.left.op.is_none() || result.left.op == Some(Op::Exact) {
            // NoOp or Exact: nothing may follow.
            self.lexer.skip_ws();
            if !self.lexer.is_eof() {
                return Err(self.error("NoOp and Exact cannot chain"));
            }
            return Ok(result);
        }

        match self.lexer.next()? {
            ReqToken::Eof => return Ok(result),
            ReqToken::And => {}
            ReqToken::Comp(_) | ReqToken::Unknown => {
                return Err(self.error("expected `&&`"));
            }
        }

        result.right = Some(self.parse_comparator()?);
        self.lexer.skip_ws();
        if !self.lexer.is_eof() {
            return Err(self.error("expected end of string"));
        }

        Ok(result)
    }

    fn parse_comparator_or_opt_ver(&mut self) -> Result<Comparator, VersionReqError> {
        let token = self.lexer.next()?;
        let ReqToken::Comp(comp) = token else {
            return Err(self.error("expected =, >=, <=, >, <, or version"));
        };
        Ok(comp)
    }

    /// Parse the right-hand comparator of a conjunction. NoOp and Exact
    /// cannot chain, so the comparator must begin with `>`, `>=`, `<`, or
    /// `<=`.
    fn parse_comparator(&mut self) -> Result<Comparator, VersionReqError> {
        self.lexer.skip_ws();
        let expected = "expected >=, <=, >, or <";
        let Some(byte) = self.lexer.peek_byte() else {
            return Err(self.error(expected));
        };
        if !is_comp_start(byte) || byte == b'=' {
            return Err(self.error(expected));
        }

        match self.lexer.next()? {
            ReqToken::Comp(comp) => Ok(comp),
            _ => Err(self.error(expected)),
        }
    }
}

impl VersionReq {
    /// Parse a version requirement.
    ///
    /// # Errors
    ///
    /// Returns [`VersionReqError`] with a caret diagnostic on malformed
    /// input, including a chained NoOp or Exact comparator.
    pub fn parse(input: &str) -> Result<Self, VersionReqError> {
        let mut parser = ReqParser::new(input);
        parser.parse()
    }

    /// Whether `ver` satisfies every comparator of this requirement.
    ///
    /// A prerelease version satisfies the requirement only if some
    /// comparator names the same `(major, minor, patch)` triple with a
    /// non-empty prerelease of its own.
    #[must_use]
    pub fn satisfied_by(&self, ver: &Version) -> bool {
        if !self.left.satisfied_by(ver) {
            return false;
        }
        if let Some(right) = &self.right {
            if !right.satisfied_by(ver) {
                return false;
            }
        }

        if ver.pre.is_empty() {
            return true;
        }

        if pre_is_compatible(&self.left, ver) {
            return true;
        }
        if let Some(right) = &self.right {
            if pre_is_compatible(right, ver) {
                return true;
            }
        }

        false
    }

    /// Reduce to an equivalent requirement of `>=`/`<` comparators (or a
    /// single `=` point).
    ///
    /// The rewrite rules, with `A.B.C` the written components:
    ///
    /// 1. NoOp (caret, "compatible" updates):
    ///    1.1. `A.B.C` (A > 0) ⇒ `>=A.B.C && <(A+1).0.0`
    ///    1.2. `A.B` (A > 0) ⇒ `>=A.B.0 && <(A+1).0.0`
    ///    1.3. `A` ⇒ `>=A.0.0 && <(A+1).0.0`
    ///    1.4. `0.B.C` (B > 0) ⇒ `>=0.B.C && <0.(B+1).0`
    ///    1.5. `0.0.C` ⇒ `=0.0.C`
    ///    1.6. `0.0` ⇒ `>=0.0.0 && <0.1.0`
    /// 2. Exact:
    ///    2.1. `=A.B.C` ⇒ `=A.B.C`
    ///    2.2. `=A.B` ⇒ `>=A.B.0 && <A.(B+1).0`
    ///    2.3. `=A` ⇒ `>=A.0.0 && <(A+1).0.0`
    /// 3. Everything else canonicalizes per comparator.
    #[must_use]
    pub fn canonicalize(&self) -> Self {
        match self.left.op {
            None => canonicalize_no_op(self),
            Some(Op::Exact) => canonicalize_exact(self),
            _ => Self {
                left: self.left.canonicalize(),
                right: self.right.as_ref().map(Comparator::canonicalize),
            },
        }
    }

    /// Render for pkg-config: `"<name> <op> <X.Y.Z>"` per comparator,
    /// joined by `", "`.
    #[must_use]
    pub fn to_pkg_config_string(&self, name: &str) -> String {
        // pkg-config needs fully-specified versions.
        let req = self.canonicalize();

        let mut result = String::from(name);
        result.push(' ');
        result.push_str(&req.left.to_pkg_config_string());
        if let Some(right) = &req.right {
            result.push_str(", ");
            result.push_str(name);
            result.push(' ');
            result.push_str(&right.to_pkg_config_string());
        }
        result
    }

    /// Whether the two comparators could be merged into one (same
    /// direction, or `<`/`<=` and `>`/`>=` pairs of the same sense).
    #[must_use]
    pub fn can_simplify(&self) -> bool {
        // NoOp and Exact never have two comparators.
        let Some(left_op) = self.left.op else {
            return false;
        };
        if left_op == Op::Exact {
            return false;
        }
        let Some(right) = &self.right else {
            return false;
        };
        let Some(right_op) = right.op else {
            return false;
        };

        if left_op == right_op {
            return true;
        }
        matches!(
            (left_op, right_op),
            (Op::Lt, Op::Lte) | (Op::Lte, Op::Lt) | (Op::Gt, Op::Gte) | (Op::Gte, Op::Gt)
        )
    }
}

impl Display for VersionReq {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.left)?;
        if let Some(right) = &self.right {
            write!(f, " && {right}")?;
        }
        Ok(())
    }
}

impl FromStr for VersionReq {
    type Err = VersionReqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn pre_is_compatible(cmp: &Comparator, ver: &Version) -> bool {
    cmp.major == ver.major
        && cmp.minor == Some(ver.minor)
        && cmp.patch == Some(ver.patch)
        && !cmp.pre.is_empty()
}

fn bounded(left: Comparator, right: Comparator) -> VersionReq {
    VersionReq {
        left,
        right: Some(right),
    }
}

fn gte(major: u64, minor: u64, patch: u64, pre: Prerelease) -> Comparator {
    Comparator {
        op: Some(Op::Gte),
        major,
        minor: Some(minor),
        patch: Some(patch),
        pre,
    }
}

fn lt(major: u64, minor: u64, patch: u64, pre: Prerelease) -> Comparator {
    Comparator {
        op: Some(Op::Lt),
        major,
        minor: Some(minor),
        patch: Some(patch),
        pre,
    }
}

fn canonicalize_no_op(target: &VersionReq) -> VersionReq {
    let left = &target.left;

    let Some(minor) = left.minor else {
        // 1.3. `A` ⇒ `>=A.0.0 && <(A+1).0.0`
        return bounded(
            gte(left.major, 0, 0, left.pre.clone()),
            lt(left.major + 1, 0, 0, left.pre.clone()),
        );
    };

    if left.major > 0 {
        // 1.1 / 1.2. `A.B[.C]` (A > 0) ⇒ `>=A.B.(C|0) && <(A+1).0.0`
        return bounded(
            gte(
                left.major,
                minor,
                left.patch.unwrap_or(0),
                left.pre.clone(),
            ),
            lt(left.major + 1, 0, 0, left.pre.clone()),
        );
    }

    if minor > 0 {
        // 1.4. `0.B.C` (B > 0) ⇒ `>=0.B.C && <0.(B+1).0`
        return bounded(
            gte(0, minor, left.patch.unwrap_or(0), left.pre.clone()),
            lt(0, minor + 1, 0, left.pre.clone()),
        );
    }

    if let Some(patch) = left.patch {
        // 1.5. `0.0.C` ⇒ `=0.0.C`
        return VersionReq {
            left: Comparator {
                op: Some(Op::Exact),
                major: 0,
                minor: Some(0),
                patch: Some(patch),
                pre: left.pre.clone(),
            },
            right: None,
        };
    }

    // 1.6. `0.0` ⇒ `>=0.0.0 && <0.1.0`
    bounded(
        gte(0, 0, 0, left.pre.clone()),
        lt(0, 1, 0, left.pre.clone()),
    )
}

fn canonicalize_exact(req: &VersionReq) -> VersionReq {
    let left = &req.left;

    match (left.minor, left.patch) {
        // 2.1. `=A.B.C` is exactly the version `A.B.C`.
        (Some(_), Some(_)) => req.clone(),
        // 2.2. `=A.B` ⇒ `>=A.B.0 && <A.(B+1).0`
        (Some(minor), None) => bounded(
            gte(left.major, minor, 0, left.pre.clone()),
            lt(left.major, minor + 1, 0, left.pre.clone()),
        ),
        // 2.3. `=A` ⇒ `>=A.0.0 && <(A+1).0.0`
        (None, _) => bounded(
            gte(left.major, 0, 0, left.pre.clone()),
            lt(left.major + 1, 0, 0, left.pre.clone()),
        ),
    }
}
