// PAKER - Package Acquisition and Integrity Core
// Conflict Engine - Detection

//! Conflict detection over the dependency graph.
//!
//! Version conflicts are found by gathering, per package, the
//! constraints required along every dependency path and testing whether
//! any single candidate version satisfies all of them. Candidates are
//! the versions known to exist plus the constraint bounds themselves.
//! Cycles come from the graph's DFS; missing dependencies are placeholder
//! targets with neither an installed tree nor a repository URL.

use semver::Version;
use std::collections::{BTreeSet, HashMap};

use super::{render_version, Conflict, ConflictKind};
use crate::dependency::graph::DependencyGraph;
use crate::dependency::version::{satisfies_all, VersionConstraint};

/// Detects conflicts; holds only a borrow of the graph.
pub struct ConflictDetector<'a> {
    graph: &'a DependencyGraph,
}

impl<'a> ConflictDetector<'a> {
    /// Create a detector over `graph`.
    pub fn new(graph: &'a DependencyGraph) -> Self {
        Self { graph }
    }

    /// Run every detection pass.
    pub fn detect_all(
        &self,
        known_versions: &HashMap<String, Vec<Version>>,
        repositories: &HashMap<String, String>,
    ) -> Vec<Conflict> {
        let mut conflicts = self.detect_version_conflicts(known_versions);
        conflicts.extend(self.detect_circular_dependencies());
        conflicts.extend(self.detect_missing_dependencies(repositories));
        conflicts
    }

    /// Constraints targeting `package`, with their requirers. Inferred
    /// edges are deprioritised: their wildcard constraints are dropped
    /// whenever any declared constraint exists.
    fn gathered_constraints(&self, package: &str) -> Vec<(String, VersionConstraint)> {
        let all: Vec<(String, VersionConstraint, bool)> = self
            .graph
            .nodes()
            .filter_map(|node| {
                node.constraints.get(package).map(|c| {
                    (
                        node.name.clone(),
                        c.clone(),
                        node.inferred.contains(package),
                    )
                })
            })
            .collect();

        let has_declared = all.iter().any(|(_, _, inferred)| !inferred);
        all.into_iter()
            .filter(|(_, _, inferred)| !has_declared || !inferred)
            .map(|(requirer, constraint, _)| (requirer, constraint))
            .collect()
    }

    /// Find packages whose accumulated constraints cannot all be met.
    pub fn detect_version_conflicts(
        &self,
        known_versions: &HashMap<String, Vec<Version>>,
    ) -> Vec<Conflict> {
        let mut conflicts = Vec::new();

        let mut names: Vec<String> = self.graph.node_names();
        names.sort();

        for name in names {
            let constraints = self.gathered_constraints(&name);
            if constraints.len() < 2 {
                continue;
            }

            // Candidates: known versions plus each constraint's bound.
            let mut candidates: BTreeSet<Version> = known_versions
                .get(&name)
                .map(|v| v.iter().cloned().collect())
                .unwrap_or_default();
            for (_, constraint) in &constraints {
                if let Some(version) = &constraint.version {
                    candidates.insert(version.clone());
                }
            }
            if candidates.is_empty() {
                continue;
            }

            let bare: Vec<VersionConstraint> =
                constraints.iter().map(|(_, c)| c.clone()).collect();
            let satisfiable = candidates.iter().any(|v| satisfies_all(v, &bare));
            if satisfiable {
                continue;
            }

            let conflicting_versions: Vec<String> = constraints
                .iter()
                .filter_map(|(_, c)| c.version.as_ref().map(render_version))
                .collect();

            let paths = self.graph.paths_to_package(&name);
            let highest = candidates.iter().max();
            let suggestion = match highest {
                Some(version) => format!(
                    "no single version satisfies {}; consider pinning {} to {} and relaxing the others",
                    bare.iter()
                        .map(|c| c.to_string())
                        .collect::<Vec<_>>()
                        .join(", "),
                    name,
                    version
                ),
                None => String::new(),
            };

            log::warn!("version conflict detected on {}", name);
            conflicts.push(Conflict {
                kind: ConflictKind::Version,
                package: name,
                conflicting_versions,
                paths,
                suggestion,
            });
        }

        conflicts
    }

    /// Find directed cycles.
    pub fn detect_circular_dependencies(&self) -> Vec<Conflict> {
        self.graph
            .detect_cycles()
            .into_iter()
            .map(|cycle| {
                let package = cycle.first().cloned().unwrap_or_default();
                let last_edge = match cycle.len() {
                    0 | 1 => String::new(),
                    n => format!("{} -> {}", cycle[n - 1], cycle[0]),
                };
                Conflict {
                    kind: ConflictKind::Circular,
                    package,
                    conflicting_versions: Vec::new(),
                    suggestion: format!(
                        "break the cycle by removing the edge {} or extracting an abstraction both sides depend on",
                        last_edge
                    ),
                    paths: vec![cycle],
                }
            })
            .collect()
    }

    /// Find dependencies with neither an installed tree nor a
    /// repository URL.
    pub fn detect_missing_dependencies(
        &self,
        repositories: &HashMap<String, String>,
    ) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        let mut reported: BTreeSet<String> = BTreeSet::new();

        for node in self.graph.nodes() {
            for dep in &node.dependencies {
                if reported.contains(dep) {
                    continue;
                }
                let resolvable = self
                    .graph
                    .node(dep)
                    .map(|n| n.installed || n.repository.is_some())
                    .unwrap_or(false)
                    || repositories.contains_key(dep);
                if resolvable {
                    continue;
                }

                reported.insert(dep.clone());
                let fallback = closest_repository_name(dep, repositories);
                let suggestion = match (&fallback, node.inferred.contains(dep)) {
                    (_, true) => format!(
                        "{} was inferred from the directory layout; mark it optional if it is vendored",
                        dep
                    ),
                    (Some(candidate), false) => {
                        format!("no source for {}; did you mean {}?", dep, candidate)
                    }
                    (None, false) => format!(
                        "no repository URL for {}; add a remote to the project manifest",
                        dep
                    ),
                };

                conflicts.push(Conflict {
                    kind: ConflictKind::Missing,
                    package: dep.clone(),
                    conflicting_versions: Vec::new(),
                    paths: vec![vec![node.name.clone(), dep.clone()]],
                    suggestion,
                });
            }
        }

        conflicts
    }

    /// Conflicts touching one specific package.
    pub fn detect_package_conflicts(
        &self,
        package: &str,
        known_versions: &HashMap<String, Vec<Version>>,
        repositories: &HashMap<String, String>,
    ) -> Vec<Conflict> {
        self.detect_all(known_versions, repositories)
            .into_iter()
            .filter(|c| c.package == package || c.paths.iter().any(|p| p.iter().any(|n| n == package)))
            .collect()
    }

    /// Structural sanity of the graph itself.
    pub fn validate_graph(&self) -> bool {
        self.graph.nodes().all(|node| {
            self.graph
                .dependencies_of(&node.name)
                .iter()
                .all(|dep| self.graph.has_node(dep))
        })
    }
}

/// A crude did-you-mean: a repository name sharing a prefix with the
/// missing package.
fn closest_repository_name(
    package: &str,
    repositories: &HashMap<String, String>,
) -> Option<String> {
    let lowered = package.to_lowercase();
    repositories
        .keys()
        .filter(|k| {
            let candidate = k.to_lowercase();
            candidate.starts_with(&lowered)
                || lowered.starts_with(&candidate)
                || candidate.replace('-', "") == lowered.replace('-', "")
        })
        .min_by_key(|k| k.len())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::graph::DependencyNode;
    use crate::dependency::version::parse_version;

    fn node_with_constraint(name: &str, dep: &str, constraint: &str) -> DependencyNode {
        let mut node = DependencyNode::new(name);
        node.dependencies.insert(dep.to_string());
        node.constraints.insert(
            dep.to_string(),
            VersionConstraint::parse(constraint).unwrap(),
        );
        node
    }

    #[test]
    fn test_version_conflict_detected_with_paths() {
        let mut graph = DependencyGraph::new();
        graph.add_node(node_with_constraint("app", "fmt", "=8.1.1"));
        graph.add_node(node_with_constraint("gui", "fmt", ">=9.0.0"));
        graph.add_node(DependencyNode::new("fmt"));
        graph.add_edge("app", "fmt").unwrap();
        graph.add_edge("gui", "fmt").unwrap();

        let known = HashMap::from([(
            "fmt".to_string(),
            vec![
                parse_version("8.1.1").unwrap(),
                parse_version("9.0.0").unwrap(),
                parse_version("9.1.0").unwrap(),
            ],
        )]);

        let detector = ConflictDetector::new(&graph);
        let conflicts = detector.detect_version_conflicts(&known);
        assert_eq!(conflicts.len(), 1);

        let conflict = &conflicts[0];
        assert_eq!(conflict.kind, ConflictKind::Version);
        assert_eq!(conflict.package, "fmt");
        assert!(conflict.conflicting_versions.contains(&"8.1.1".to_string()));
        assert_eq!(conflict.paths.len(), 2);
        assert!(!conflict.suggestion.is_empty());
    }

    #[test]
    fn test_compatible_constraints_do_not_conflict() {
        let mut graph = DependencyGraph::new();
        graph.add_node(node_with_constraint("app", "fmt", ">=8.0.0"));
        graph.add_node(node_with_constraint("gui", "fmt", ">=8.1.0"));
        graph.add_node(DependencyNode::new("fmt"));
        graph.add_edge("app", "fmt").unwrap();
        graph.add_edge("gui", "fmt").unwrap();

        let known = HashMap::from([(
            "fmt".to_string(),
            vec![parse_version("9.1.0").unwrap()],
        )]);

        let detector = ConflictDetector::new(&graph);
        assert!(detector.detect_version_conflicts(&known).is_empty());
    }

    #[test]
    fn test_cycle_reported_as_conflict() {
        let mut graph = DependencyGraph::new();
        for name in ["a", "b"] {
            graph.add_node(DependencyNode::new(name));
        }
        graph.add_edge("a", "b").unwrap();
        graph.add_edge("b", "a").unwrap();

        let detector = ConflictDetector::new(&graph);
        let conflicts = detector.detect_circular_dependencies();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::Circular);
        assert!(conflicts[0].suggestion.contains("->"));
    }

    #[test]
    fn test_missing_dependency_reported() {
        let mut graph = DependencyGraph::new();
        let mut app = DependencyNode::new("app");
        app.dependencies.insert("mystery".to_string());
        graph.add_node(app);
        graph.add_node(DependencyNode::new("mystery"));

        let detector = ConflictDetector::new(&graph);
        let conflicts = detector.detect_missing_dependencies(&HashMap::new());
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::Missing);
        assert_eq!(conflicts[0].package, "mystery");
        assert_eq!(conflicts[0].paths[0], vec!["app", "mystery"]);
    }

    #[test]
    fn test_missing_dependency_with_repository_is_fine() {
        let mut graph = DependencyGraph::new();
        let mut app = DependencyNode::new("app");
        app.dependencies.insert("fmt".to_string());
        graph.add_node(app);
        graph.add_node(DependencyNode::new("fmt"));

        let repositories =
            HashMap::from([("fmt".to_string(), "https://example.com/fmt.git".to_string())]);
        let detector = ConflictDetector::new(&graph);
        assert!(detector
            .detect_missing_dependencies(&repositories)
            .is_empty());
    }

    #[test]
    fn test_fallback_name_suggestion() {
        let repositories = HashMap::from([
            ("nlohmann-json".to_string(), "u1".to_string()),
            ("fmt".to_string(), "u2".to_string()),
        ]);
        assert_eq!(
            closest_repository_name("nlohmannjson", &repositories),
            Some("nlohmann-json".to_string())
        );
        assert_eq!(closest_repository_name("qt6", &repositories), None);
    }
}
