// PAKER - Package Acquisition and Integrity Core
// Conflict Engine - Module Exports

//! # Conflict Engine
//!
//! Detects version conflicts, circular dependencies, and missing
//! dependencies over the dependency graph, and proposes or applies
//! resolutions. Resolution can run unattended (first viable proposal)
//! or interactively through a [`ConflictPrompt`].

pub mod detector;
pub mod resolver;

pub use detector::ConflictDetector;
pub use resolver::{ConflictResolver, Resolution, ResolutionPolicy, ResolutionReport};

use semver::Version;
use thiserror::Error;

/// Conflict engine errors
#[derive(Debug, Error)]
pub enum ConflictError {
    /// No proposal could be applied and auto-resolution is disabled.
    #[error("Conflict for {0} requires operator intervention")]
    NeedsOperator(String),

    /// Applying a resolution mutated the graph in an invalid way.
    #[error("Failed to apply resolution: {0}")]
    ApplyFailed(String),
}

/// Result type for conflict operations
pub type ConflictResult<T> = Result<T, ConflictError>;

/// The three conflict kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Multiple version requirements cannot be reconciled
    Version,
    /// The graph contains a directed cycle
    Circular,
    /// An edge target has no package and no repository URL
    Missing,
}

/// One detected conflict
#[derive(Debug, Clone)]
pub struct Conflict {
    /// What kind of conflict this is
    pub kind: ConflictKind,
    /// The primary package involved
    pub package: String,
    /// Conflicting version requirements, when applicable
    pub conflicting_versions: Vec<String>,
    /// The dependency paths producing the conflict
    pub paths: Vec<Vec<String>>,
    /// A textual suggestion for the operator
    pub suggestion: String,
}

impl Conflict {
    /// Render one conflict as a report paragraph.
    pub fn describe(&self) -> String {
        let mut text = match self.kind {
            ConflictKind::Version => format!(
                "Version conflict on {}: requirements {}",
                self.package,
                self.conflicting_versions.join(" vs ")
            ),
            ConflictKind::Circular => format!(
                "Circular dependency involving {}: {}",
                self.package,
                self.paths
                    .first()
                    .map(|p| p.join(" -> "))
                    .unwrap_or_default()
            ),
            ConflictKind::Missing => format!("Missing dependency: {}", self.package),
        };
        for path in &self.paths {
            text.push_str(&format!("\n  via {}", path.join(" -> ")));
        }
        if !self.suggestion.is_empty() {
            text.push_str(&format!("\n  suggestion: {}", self.suggestion));
        }
        text
    }
}

/// Render a set of conflicts as a report.
pub fn conflict_report(conflicts: &[Conflict]) -> String {
    if conflicts.is_empty() {
        return "No conflicts detected".to_string();
    }
    let mut report = format!("{} conflict(s) detected\n", conflicts.len());
    for conflict in conflicts {
        report.push_str(&conflict.describe());
        report.push('\n');
    }
    report
}

/// Operator-facing selection hook for interactive resolution.
///
/// The CLI collaborator implements this; the core only defines the
/// contract.
pub trait ConflictPrompt: Send + Sync {
    /// Choose one of `proposals` for `conflict`, or `None` to defer.
    fn choose(&self, conflict: &Conflict, proposals: &[Resolution]) -> Option<usize>;
}

pub(crate) fn render_version(version: &Version) -> String {
    version.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_describe_mentions_paths() {
        let conflict = Conflict {
            kind: ConflictKind::Version,
            package: "fmt".to_string(),
            conflicting_versions: vec!["=8.1.1".to_string(), ">=9.0.0".to_string()],
            paths: vec![
                vec!["app".to_string(), "fmt".to_string()],
                vec!["spdlog".to_string(), "fmt".to_string()],
            ],
            suggestion: "pin fmt to 9.1.0".to_string(),
        };

        let text = conflict.describe();
        assert!(text.contains("fmt"));
        assert!(text.contains("app -> fmt"));
        assert!(text.contains("suggestion"));
    }

    #[test]
    fn test_empty_report() {
        assert_eq!(conflict_report(&[]), "No conflicts detected");
    }
}
