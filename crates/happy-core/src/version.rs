//! Version parsing and comparison.
//!
//! Two independent uses: (1) the daemon compares its own compiled-in CLI
//! version against the on-disk package version to decide whether to
//! self-upgrade (§4.7 step 8); (2) the Codex agent driver gates its
//! elicitation response shape on whether the connected agent is `<= 0.77`
//! or newer (§6.3).

use std::cmp::Ordering;
use std::fmt;

/// A parsed `major.minor.patch` semantic version. Pre-release/build
/// metadata suffixes are accepted but ignored for ordering purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    major: u64,
    minor: u64,
    patch: u64,
}

/// Error returned when a version string cannot be parsed.
#[derive(Debug, thiserror::Error)]
#[error("invalid version string: {0}")]
pub struct VersionParseError(String);

impl Version {
    /// Construct directly from components.
    #[must_use]
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a `major.minor.patch` string, ignoring any `-pre`/`+build` suffix.
    ///
    /// # Errors
    ///
    /// Returns [`VersionParseError`] if fewer than three dot-separated
    /// numeric components are present.
    pub fn parse(raw: &str) -> Result<Self, VersionParseError> {
        let core = raw
            .split(['-', '+'])
            .next()
            .ok_or_else(|| VersionParseError(raw.to_string()))?;
        let mut parts = core.split('.');
        let mut next = || -> Result<u64, VersionParseError> {
            parts
                .next()
                .ok_or_else(|| VersionParseError(raw.to_string()))?
                .parse::<u64>()
                .map_err(|_| VersionParseError(raw.to_string()))
        };
        let major = next()?;
        let minor = next()?;
        let patch = next()?;
        Ok(Self {
            major,
            minor,
            patch,
        })
    }

    /// True when `self` is strictly newer than `other`.
    #[must_use]
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Greater
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The version compiled into this binary, used to detect a stale running
/// daemon (§4.7 step 1) and stamped into the daemon state file.
#[must_use]
pub fn current_cli_version() -> Version {
    Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or(Version::new(0, 0, 0))
}

/// Elicitation response shape the Codex agent driver must emit, gated on
/// the connected agent's own version (§6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElicitationResponseStyle {
    /// Agent `<= 0.77`: bare `{ decision }`.
    Legacy,
    /// Agent `> 0.77`: `{ action, decision, content }`.
    Tagged,
}

/// Decide which elicitation response shape a given agent version expects.
#[must_use]
pub fn elicitation_response_style(agent_version: &Version) -> ElicitationResponseStyle {
    if agent_version.is_newer_than(&Version::new(0, 77, 0)) {
        ElicitationResponseStyle::Tagged
    } else {
        ElicitationResponseStyle::Legacy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_version() {
        let v = Version::parse("1.2.3").unwrap();
        assert_eq!(v, Version::new(1, 2, 3));
    }

    #[test]
    fn parses_version_with_prerelease_suffix() {
        let v = Version::parse("1.2.3-beta.1").unwrap();
        assert_eq!(v, Version::new(1, 2, 3));
    }

    #[test]
    fn rejects_malformed_version() {
        assert!(Version::parse("not-a-version").is_err());
        assert!(Version::parse("1.2").is_err());
    }

    #[test]
    fn ordering_is_numeric_not_lexicographic() {
        let v1 = Version::parse("1.9.0").unwrap();
        let v2 = Version::parse("1.10.0").unwrap();
        assert!(v2.is_newer_than(&v1));
    }

    #[test]
    fn elicitation_style_gates_at_0_77() {
        assert_eq!(
            elicitation_response_style(&Version::new(0, 77, 0)),
            ElicitationResponseStyle::Legacy
        );
        assert_eq!(
            elicitation_response_style(&Version::new(0, 77, 1)),
            ElicitationResponseStyle::Tagged
        );
        assert_eq!(
            elicitation_response_style(&Version::new(0, 76, 99)),
            ElicitationResponseStyle::Legacy
        );
        assert_eq!(
            elicitation_response_style(&Version::new(1, 0, 0)),
            ElicitationResponseStyle::Tagged
        );
    }
}
