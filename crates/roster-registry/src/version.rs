//! Version rules for discovery queries
//!
//! A provider lookup names its acceptable versions with a dotted rule:
//!
//! - `latest` (or empty) - the highest version
//! - `1.0.0` - exactly that version
//! - `1.0.0+` - that version or higher
//! - `1.0.0-2.0.0` - the half-open interval `[1.0.0, 2.0.0)`
//!
//! Versions compare segment-by-segment numerically; results are ordered
//! highest version first.

use roster_core::error::{Error, Result};
use roster_core::model::Service;
use std::cmp::Ordering;

/// A parsed dotted version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    segments: Vec<u64>,
}

impl Version {
    /// Parse `a.b.c…`; every segment must be numeric
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() {
            return None;
        }
        let segments = s
            .split('.')
            .map(|seg| seg.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        Some(Self { segments })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        // Missing segments compare as zero: 1.0 == 1.0.0 < 1.0.1
        let len = self.segments.len().max(other.segments.len());
        for i in 0..len {
            let a = self.segments.get(i).copied().unwrap_or(0);
            let b = other.segments.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A version rule from a discovery request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRule {
    Latest,
    Exact(Version),
    AtLeast(Version),
    /// Half-open interval `[from, to)`
    Range { from: Version, to: Version },
}

impl VersionRule {
    /// Parse a rule string. An empty rule behaves like `latest`.
    pub fn parse(rule: &str) -> Result<Self> {
        if rule.is_empty() || rule == "latest" {
            return Ok(Self::Latest);
        }
        if let Some(base) = rule.strip_suffix('+') {
            let version = Version::parse(base)
                .ok_or_else(|| Error::invalid_params(format!("invalid version rule '{rule}'")))?;
            return Ok(Self::AtLeast(version));
        }
        if let Some((from, to)) = rule.split_once('-') {
            let from = Version::parse(from)
                .ok_or_else(|| Error::invalid_params(format!("invalid version rule '{rule}'")))?;
            let to = Version::parse(to)
                .ok_or_else(|| Error::invalid_params(format!("invalid version rule '{rule}'")))?;
            return Ok(Self::Range { from, to });
        }
        let version = Version::parse(rule)
            .ok_or_else(|| Error::invalid_params(format!("invalid version rule '{rule}'")))?;
        Ok(Self::Exact(version))
    }

    fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Latest => true,
            Self::Exact(expected) => version == expected,
            Self::AtLeast(floor) => version >= floor,
            Self::Range { from, to } => version >= from && version < to,
        }
    }

    /// Select the services whose version satisfies the rule, ordered highest
    /// version first. Services with an unparseable version never match.
    /// `Latest` keeps only the highest version present.
    pub fn filter_services(&self, services: Vec<Service>) -> Vec<Service> {
        let mut versioned: Vec<(Version, Service)> = services
            .into_iter()
            .filter_map(|service| {
                Version::parse(&service.version).map(|version| (version, service))
            })
            .filter(|(version, _)| self.matches(version))
            .collect();

        versioned.sort_by(|a, b| b.0.cmp(&a.0));

        if matches!(self, Self::Latest) {
            let highest = versioned.first().map(|(version, _)| version.clone());
            if let Some(highest) = highest {
                versioned.retain(|(version, _)| *version == highest);
            }
        }

        versioned.into_iter().map(|(_, service)| service).collect()
    }
}
