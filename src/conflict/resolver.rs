// PAKER - Package Acquisition and Integrity Core
// Conflict Engine - Resolution

//! Resolution proposals and their application to the graph.
//!
//! For each conflict kind the proposals are ordered: version conflicts
//! try the highest version satisfying the most constraints, then the
//! most recent stable release, then operator intervention; cycles offer
//! removing the closing edge or an abstraction boundary; missing
//! dependencies offer optional treatment or a fallback name.
//! Unattended mode applies the first applicable proposal unless policy
//! disables auto-resolution.

use semver::Version;
use std::collections::HashMap;

use super::{Conflict, ConflictError, ConflictKind, ConflictPrompt, ConflictResult};
use crate::dependency::graph::{DependencyGraph, DependencyNode};
use crate::dependency::version::{is_stable, VersionConstraint};

/// One way to resolve a conflict
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Pin the package to a version and relax dissenting constraints
    UseVersion {
        /// Package to pin
        package: String,
        /// Version to pin to
        version: Version,
    },
    /// Pin to the most recent stable (prerelease-free) release
    UseLatestStable {
        /// Package to pin
        package: String,
        /// The stable version chosen
        version: Version,
    },
    /// Break a cycle by removing its closing edge
    RemoveEdge {
        /// Edge source
        from: String,
        /// Edge target
        to: String,
    },
    /// Report an abstraction boundary both cycle sides could depend on
    ProposeBoundary {
        /// The cycle members
        cycle: Vec<String>,
    },
    /// Drop an unresolvable dependency that the manifest marks inferred
    TreatOptional {
        /// The package dropping the dependency
        requirer: String,
        /// The dependency to drop
        dependency: String,
    },
    /// Substitute a fallback name from the repository map
    UseFallback {
        /// The missing name
        package: String,
        /// The replacement name
        fallback: String,
    },
    /// Leave the conflict to the operator
    Defer,
}

impl Resolution {
    /// Human-readable description of the proposal.
    pub fn describe(&self) -> String {
        match self {
            Resolution::UseVersion { package, version } => {
                format!("pin {} to {}", package, version)
            }
            Resolution::UseLatestStable { package, version } => {
                format!("use latest stable {} {}", package, version)
            }
            Resolution::RemoveEdge { from, to } => {
                format!("remove dependency edge {} -> {}", from, to)
            }
            Resolution::ProposeBoundary { cycle } => format!(
                "extract an interface package both sides of {} depend on",
                cycle.join(" -> ")
            ),
            Resolution::TreatOptional {
                requirer,
                dependency,
            } => format!("treat {} as optional for {}", dependency, requirer),
            Resolution::UseFallback { package, fallback } => {
                format!("use {} in place of {}", fallback, package)
            }
            Resolution::Defer => "defer to operator".to_string(),
        }
    }
}

/// Policy for unattended resolution
#[derive(Debug, Clone)]
pub struct ResolutionPolicy {
    /// Apply the first applicable proposal without asking
    pub auto_resolve: bool,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self { auto_resolve: true }
    }
}

/// Outcome of a resolution pass
#[derive(Debug, Default)]
pub struct ResolutionReport {
    /// Conflicts resolved, with the applied resolution
    pub resolved: Vec<(Conflict, Resolution)>,
    /// Conflicts left for the operator
    pub deferred: Vec<Conflict>,
}

impl ResolutionReport {
    /// Whether every conflict was resolved.
    pub fn fully_resolved(&self) -> bool {
        self.deferred.is_empty()
    }
}

/// Applies resolutions to the graph.
pub struct ConflictResolver<'a> {
    graph: &'a mut DependencyGraph,
    available_versions: HashMap<String, Vec<Version>>,
    policy: ResolutionPolicy,
}

impl<'a> ConflictResolver<'a> {
    /// Create a resolver mutating `graph`.
    pub fn new(graph: &'a mut DependencyGraph) -> Self {
        Self {
            graph,
            available_versions: HashMap::new(),
            policy: ResolutionPolicy::default(),
        }
    }

    /// Set the unattended-resolution policy.
    pub fn with_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Record the versions known to exist for a package.
    pub fn set_available_versions(&mut self, package: impl Into<String>, versions: Vec<Version>) {
        let mut versions = versions;
        versions.sort();
        self.available_versions.insert(package.into(), versions);
    }

    fn candidates_for(&self, conflict: &Conflict) -> Vec<Version> {
        let mut candidates = self
            .available_versions
            .get(&conflict.package)
            .cloned()
            .unwrap_or_default();
        for text in &conflict.conflicting_versions {
            if let Ok(version) = crate::dependency::version::parse_version(text) {
                if !candidates.contains(&version) {
                    candidates.push(version);
                }
            }
        }
        candidates.sort();
        candidates
    }

    fn constraints_on(&self, package: &str) -> Vec<(String, VersionConstraint)> {
        self.graph
            .nodes()
            .filter_map(|node| {
                node.constraints
                    .get(package)
                    .map(|c| (node.name.clone(), c.clone()))
            })
            .collect()
    }

    /// Ordered resolution proposals for one conflict.
    pub fn propose(&self, conflict: &Conflict) -> Vec<Resolution> {
        match conflict.kind {
            ConflictKind::Version => self.propose_version(conflict),
            ConflictKind::Circular => self.propose_circular(conflict),
            ConflictKind::Missing => self.propose_missing(conflict),
        }
    }

    fn propose_version(&self, conflict: &Conflict) -> Vec<Resolution> {
        let mut proposals = Vec::new();
        let candidates = self.candidates_for(conflict);
        let constraints: Vec<VersionConstraint> = self
            .constraints_on(&conflict.package)
            .into_iter()
            .map(|(_, c)| c)
            .collect();

        // Highest candidate satisfying the most constraints
        // (max_by_key keeps the last, i.e. highest, among ties).
        let best = candidates
            .iter()
            .max_by_key(|v| constraints.iter().filter(|c| c.satisfies(v)).count());
        if let Some(version) = best {
            proposals.push(Resolution::UseVersion {
                package: conflict.package.clone(),
                version: version.clone(),
            });
        }

        // Most recent stable release.
        if let Some(stable) = candidates.iter().rev().find(|v| is_stable(v)) {
            let already = proposals.iter().any(|p| {
                matches!(p, Resolution::UseVersion { version, .. } if version == stable)
            });
            if !already {
                proposals.push(Resolution::UseLatestStable {
                    package: conflict.package.clone(),
                    version: stable.clone(),
                });
            }
        }

        proposals.push(Resolution::Defer);
        proposals
    }

    fn propose_circular(&self, conflict: &Conflict) -> Vec<Resolution> {
        let mut proposals = Vec::new();
        if let Some(cycle) = conflict.paths.first() {
            if cycle.len() >= 2 {
                proposals.push(Resolution::RemoveEdge {
                    from: cycle[cycle.len() - 1].clone(),
                    to: cycle[0].clone(),
                });
            }
            proposals.push(Resolution::ProposeBoundary {
                cycle: cycle.clone(),
            });
        }
        proposals.push(Resolution::Defer);
        proposals
    }

    fn propose_missing(&self, conflict: &Conflict) -> Vec<Resolution> {
        let mut proposals = Vec::new();

        let requirer = conflict
            .paths
            .first()
            .and_then(|p| p.first())
            .cloned()
            .unwrap_or_default();

        let inferred = self
            .graph
            .node(&requirer)
            .map(|n| n.inferred.contains(&conflict.package))
            .unwrap_or(false);
        if inferred {
            proposals.push(Resolution::TreatOptional {
                requirer: requirer.clone(),
                dependency: conflict.package.clone(),
            });
        }

        // A fallback name parsed out of the detector's suggestion is
        // fragile; offer one only when a node of similar name exists.
        if let Some(fallback) = self
            .graph
            .node_names()
            .into_iter()
            .filter(|n| n != &conflict.package)
            .find(|n| {
                n.to_lowercase().replace('-', "")
                    == conflict.package.to_lowercase().replace('-', "")
            })
        {
            proposals.push(Resolution::UseFallback {
                package: conflict.package.clone(),
                fallback,
            });
        }

        proposals.push(Resolution::Defer);
        proposals
    }

    /// Apply one resolution. Returns whether the graph changed.
    pub fn apply(&mut self, resolution: &Resolution) -> ConflictResult<bool> {
        match resolution {
            Resolution::UseVersion { package, version }
            | Resolution::UseLatestStable { package, version } => {
                let dissenters: Vec<String> = self
                    .constraints_on(package)
                    .into_iter()
                    .filter(|(_, c)| !c.satisfies(version))
                    .map(|(requirer, _)| requirer)
                    .collect();

                if !self.graph.has_node(package) {
                    self.graph.add_node(DependencyNode::new(package.as_str()));
                }
                match self.graph.node_mut(package) {
                    Some(node) => node.version = Some(version.clone()),
                    None => {
                        return Err(ConflictError::ApplyFailed(format!(
                            "node {} vanished",
                            package
                        )))
                    }
                }

                // Downgrade the dissenting paths to the chosen version.
                for requirer in dissenters {
                    if let Some(node) = self.graph.node_mut(&requirer) {
                        log::info!(
                            "relaxing {}'s constraint on {} to ={}",
                            requirer,
                            package,
                            version
                        );
                        node.constraints.insert(
                            package.clone(),
                            VersionConstraint::exact(version.clone()),
                        );
                    }
                }
                Ok(true)
            }
            Resolution::RemoveEdge { from, to } => {
                let removed = self.graph.remove_edge(from, to);
                if removed {
                    if let Some(node) = self.graph.node_mut(from) {
                        node.dependencies.remove(to);
                        node.constraints.remove(to);
                    }
                }
                Ok(removed)
            }
            Resolution::TreatOptional {
                requirer,
                dependency,
            } => {
                self.graph.remove_edge(requirer, dependency);
                if let Some(node) = self.graph.node_mut(requirer) {
                    node.dependencies.remove(dependency);
                    node.constraints.remove(dependency);
                    node.inferred.remove(dependency);
                }
                Ok(true)
            }
            Resolution::UseFallback { package, fallback } => {
                let requirers = self.graph.dependents_of(package);
                for requirer in requirers {
                    self.graph.remove_edge(&requirer, package);
                    let constraint = self
                        .graph
                        .node(&requirer)
                        .and_then(|n| n.constraints.get(package).cloned());
                    if let Some(node) = self.graph.node_mut(&requirer) {
                        node.dependencies.remove(package);
                        node.dependencies.insert(fallback.clone());
                        if let Some(constraint) = constraint {
                            node.constraints.remove(package);
                            node.constraints.insert(fallback.clone(), constraint);
                        }
                    }
                    self.graph
                        .add_edge(&requirer, fallback)
                        .map_err(|e| ConflictError::ApplyFailed(e.to_string()))?;
                }
                Ok(true)
            }
            Resolution::ProposeBoundary { .. } | Resolution::Defer => Ok(false),
        }
    }

    /// Resolve a batch of conflicts unattended.
    ///
    /// The first applicable proposal wins per conflict; with
    /// auto-resolution disabled every conflict defers.
    pub fn resolve_conflicts(&mut self, conflicts: Vec<Conflict>) -> ResolutionReport {
        self.resolve_conflicts_with(conflicts, None)
    }

    /// Resolve a batch of conflicts, asking `prompt` when provided.
    pub fn resolve_conflicts_with(
        &mut self,
        conflicts: Vec<Conflict>,
        prompt: Option<&dyn ConflictPrompt>,
    ) -> ResolutionReport {
        let mut report = ResolutionReport::default();

        for conflict in conflicts {
            let proposals = self.propose(&conflict);

            let chosen = match prompt {
                Some(prompt) => prompt
                    .choose(&conflict, &proposals)
                    .and_then(|i| proposals.get(i).cloned()),
                None if self.policy.auto_resolve => proposals
                    .iter()
                    .find(|p| !matches!(p, Resolution::Defer))
                    .cloned(),
                None => None,
            };

            match chosen {
                Some(resolution) => match self.apply(&resolution) {
                    Ok(true) => report.resolved.push((conflict, resolution)),
                    Ok(false) => report.deferred.push(conflict),
                    Err(e) => {
                        log::error!("failed to apply resolution: {}", e);
                        report.deferred.push(conflict);
                    }
                },
                None => report.deferred.push(conflict),
            }
        }

        report
    }
}
