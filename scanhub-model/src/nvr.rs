//! Name-version-release build identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Parsed name-version-release identifier of a package build,
/// e.g. `yum-3.4.3-42.el7`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nvr {
    pub name: String,
    pub version: String,
    pub release: String,
}

impl Nvr {
    /// Parse an `<name>-<version>-<release>` string. The name itself may
    /// contain hyphens, so the split happens on the last two.
    pub fn parse(raw: &str) -> Result<Self> {
        let (rest, release) = raw
            .rsplit_once('-')
            .ok_or_else(|| ModelError::MalformedNvr(raw.to_string()))?;
        let (name, version) = rest
            .rsplit_once('-')
            .ok_or_else(|| ModelError::MalformedNvr(raw.to_string()))?;
        if name.is_empty() || version.is_empty() || release.is_empty() {
            return Err(ModelError::MalformedNvr(raw.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            release: release.to_string(),
        })
    }

    /// A rebase changes the upstream version component between base and
    /// target; the release component alone may differ freely.
    pub fn is_rebase_of(&self, base: &Nvr) -> bool {
        self.version != base.version
    }

    /// Strip the trailing `-<release>` component, yielding `name-version`.
    pub fn name_version(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

impl fmt::Display for Nvr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.version, self.release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hyphenated_name() {
        let nvr = Nvr::parse("kernel-rt-5.14.0-284.11.1.el9").unwrap();
        assert_eq!(nvr.name, "kernel-rt");
        assert_eq!(nvr.version, "5.14.0");
        assert_eq!(nvr.release, "284.11.1.el9");
    }

    #[test]
    fn round_trips_display() {
        let raw = "yum-3.4.3-42.el7";
        assert_eq!(Nvr::parse(raw).unwrap().to_string(), raw);
    }

    #[test]
    fn rejects_malformed_input() {
        for raw in ["yum", "yum-3.4.3", "-1-2", "a--b", ""] {
            assert!(Nvr::parse(raw).is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn rebase_compares_versions_only() {
        let base = Nvr::parse("curl-7.76.1-19.el9").unwrap();
        let respin = Nvr::parse("curl-7.76.1-23.el9").unwrap();
        let rebase = Nvr::parse("curl-7.78.0-1.el9").unwrap();
        assert!(!respin.is_rebase_of(&base));
        assert!(rebase.is_rebase_of(&base));
    }
}
