// PAKER - Package Acquisition and Integrity Core
// Dependency Management - Versions and Constraints

//! Semantic version handling and constraint satisfaction.
//!
//! Versions follow semver ordering: a prerelease sorts before the
//! unadorned release and build metadata is ignored in comparison. The
//! sentinel `"*"` means "any version".

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Version handling errors
#[derive(Debug, Error)]
pub enum VersionError {
    /// A version string did not parse as semver.
    #[error("Invalid version '{0}': {1}")]
    InvalidVersion(String, String),

    /// A constraint string did not parse.
    #[error("Invalid constraint '{0}'")]
    InvalidConstraint(String),
}

/// Result type for version operations
pub type VersionResult<T> = Result<T, VersionError>;

/// Comparison operator of a version constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintOp {
    /// Exactly the given version
    Eq,
    /// Strictly newer
    Gt,
    /// The given version or newer
    Ge,
    /// Strictly older
    Lt,
    /// The given version or older
    Le,
    /// Any version but the given one
    Ne,
    /// Any version
    Any,
}

impl ConstraintOp {
    fn symbol(self) -> &'static str {
        match self {
            ConstraintOp::Eq => "=",
            ConstraintOp::Gt => ">",
            ConstraintOp::Ge => ">=",
            ConstraintOp::Lt => "<",
            ConstraintOp::Le => "<=",
            ConstraintOp::Ne => "!=",
            ConstraintOp::Any => "*",
        }
    }
}

/// A single `(op, version)` requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConstraint {
    /// Comparison operator
    pub op: ConstraintOp,
    /// Right-hand side; absent for `Any`
    pub version: Option<Version>,
}

impl VersionConstraint {
    /// The wildcard constraint.
    pub fn any() -> Self {
        Self {
            op: ConstraintOp::Any,
            version: None,
        }
    }

    /// An exact-version constraint.
    pub fn exact(version: Version) -> Self {
        Self {
            op: ConstraintOp::Eq,
            version: Some(version),
        }
    }

    /// Parse a constraint string such as `>=1.2.0`, `=8.1.1`, or `*`.
    ///
    /// A bare version means an exact requirement.
    pub fn parse(input: &str) -> VersionResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Ok(Self::any());
        }

        let (op, rest) = if let Some(rest) = trimmed.strip_prefix(">=") {
            (ConstraintOp::Ge, rest)
        } else if let Some(rest) = trimmed.strip_prefix("<=") {
            (ConstraintOp::Le, rest)
        } else if let Some(rest) = trimmed.strip_prefix("!=") {
            (ConstraintOp::Ne, rest)
        } else if let Some(rest) = trimmed.strip_prefix("==") {
            (ConstraintOp::Eq, rest)
        } else if let Some(rest) = trimmed.strip_prefix('>') {
            (ConstraintOp::Gt, rest)
        } else if let Some(rest) = trimmed.strip_prefix('<') {
            (ConstraintOp::Lt, rest)
        } else if let Some(rest) = trimmed.strip_prefix('=') {
            (ConstraintOp::Eq, rest)
        } else {
            (ConstraintOp::Eq, trimmed)
        };

        let rest = rest.trim();
        if rest.is_empty() {
            return Err(VersionError::InvalidConstraint(input.to_string()));
        }

        Ok(Self {
            op,
            version: Some(parse_version(rest)?),
        })
    }

    /// Whether `candidate` satisfies this constraint.
    pub fn satisfies(&self, candidate: &Version) -> bool {
        let Some(bound) = &self.version else {
            return true;
        };
        match self.op {
            ConstraintOp::Eq => candidate == bound,
            ConstraintOp::Gt => candidate > bound,
            ConstraintOp::Ge => candidate >= bound,
            ConstraintOp::Lt => candidate < bound,
            ConstraintOp::Le => candidate <= bound,
            ConstraintOp::Ne => candidate != bound,
            ConstraintOp::Any => true,
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}{}", self.op.symbol(), version),
            None => write!(f, "*"),
        }
    }
}

/// Normalise a version string: strip a leading `v`, pad missing minor
/// and patch components with zeros.
pub fn normalize_version(input: &str) -> String {
    let trimmed = input.trim();
    let stripped = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    // Separate the numeric core from a prerelease/build suffix.
    let suffix_at = stripped.find(['-', '+']);
    let (core, suffix) = match suffix_at {
        Some(i) => stripped.split_at(i),
        None => (stripped, ""),
    };

    let dots = core.matches('.').count();
    let padded = match dots {
        0 => format!("{}.0.0", core),
        1 => format!("{}.0", core),
        _ => core.to_string(),
    };

    format!("{}{}", padded, suffix)
}

/// Parse a version string after normalisation.
pub fn parse_version(input: &str) -> VersionResult<Version> {
    let normalized = normalize_version(input);
    Version::parse(&normalized)
        .map_err(|e| VersionError::InvalidVersion(input.to_string(), e.to_string()))
}

/// Whether a version carries a prerelease tag.
pub fn is_prerelease(version: &Version) -> bool {
    !version.pre.is_empty()
}

/// Whether a version is a stable (prerelease-free) release.
pub fn is_stable(version: &Version) -> bool {
    version.pre.is_empty()
}

/// Whether `version` satisfies every constraint in `constraints`.
pub fn satisfies_all(version: &Version, constraints: &[VersionConstraint]) -> bool {
    constraints.iter().all(|c| c.satisfies(version))
}

/// The highest version in `versions` satisfying all `constraints`.
pub fn latest_satisfying<'a>(
    versions: impl IntoIterator<Item = &'a Version>,
    constraints: &[VersionConstraint],
) -> Option<Version> {
    versions
        .into_iter()
        .filter(|v| satisfies_all(v, constraints))
        .max()
        .cloned()
}

/// The lowest version in `versions` satisfying all `constraints`.
pub fn min_satisfying<'a>(
    versions: impl IntoIterator<Item = &'a Version>,
    constraints: &[VersionConstraint],
) -> Option<Version> {
    versions
        .into_iter()
        .filter(|v| satisfies_all(v, constraints))
        .min()
        .cloned()
}
