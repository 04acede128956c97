// PAKER - Package Acquisition and Integrity Core
// Dependency Management - Dependency Graph

//! In-memory dependency graph.
//!
//! Nodes live in a contiguous vector and edges are index lists; the
//! name-to-index map is the only hashed structure. A bounded LRU "hot
//! set" tracks recently accessed nodes; once it fills, the least
//! recently accessed nodes are demoted while remaining addressable by
//! index.

use lru::LruCache;
use parking_lot::Mutex;
use semver::Version;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use thiserror::Error;

use super::version::VersionConstraint;

/// Graph operation errors
#[derive(Debug, Error)]
pub enum GraphError {
    /// The named node does not exist.
    #[error("Node not found: {0}")]
    NodeMissing(String),

    /// An edge would point a node at itself.
    #[error("Self-dependency rejected: {0}")]
    SelfLoop(String),

    /// The graph contains at least one directed cycle.
    #[error("Cycle detected involving {0} package(s)")]
    CycleDetected(usize),
}

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// One package in the dependency graph
#[derive(Debug, Clone)]
pub struct DependencyNode {
    /// Package name
    pub name: String,
    /// Resolved version, when known
    pub version: Option<Version>,
    /// Source repository URL, when known
    pub repository: Option<String>,
    /// Names of direct dependencies
    pub dependencies: BTreeSet<String>,
    /// Version constraint per direct dependency
    pub constraints: HashMap<String, VersionConstraint>,
    /// Dependencies discovered by the structural fallback scan
    pub inferred: HashSet<String>,
    /// Whether the package is installed on disk
    pub installed: bool,
    /// Resolved filesystem location, when installed
    pub install_path: Option<PathBuf>,
    /// Content hash of the manifest that produced this node
    pub parse_hash: Option<String>,
}

impl DependencyNode {
    /// Create a bare node for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            repository: None,
            dependencies: BTreeSet::new(),
            constraints: HashMap::new(),
            inferred: HashSet::new(),
            installed: false,
            install_path: None,
            parse_hash: None,
        }
    }

    /// Create a node with a resolved version.
    pub fn with_version(name: impl Into<String>, version: Version) -> Self {
        let mut node = Self::new(name);
        node.version = Some(version);
        node
    }

    /// Whether the node has been populated by a manifest parse.
    pub fn is_parsed(&self) -> bool {
        self.parse_hash.is_some()
    }
}

/// Default capacity of the hot node set.
const DEFAULT_HOT_CAPACITY: usize = 1000;

/// Directed graph of dependency nodes.
pub struct DependencyGraph {
    nodes: Vec<Option<DependencyNode>>,
    name_to_index: HashMap<String, usize>,
    edges_out: Vec<Vec<usize>>,
    edges_in: Vec<Vec<usize>>,
    hot: Mutex<LruCache<usize, ()>>,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    /// Create an empty graph with the default hot-set capacity.
    pub fn new() -> Self {
        Self::with_hot_capacity(DEFAULT_HOT_CAPACITY)
    }

    /// Create an empty graph demoting least-recently-accessed nodes
    /// beyond `capacity`.
    pub fn with_hot_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            nodes: Vec::new(),
            name_to_index: HashMap::new(),
            edges_out: Vec::new(),
            edges_in: Vec::new(),
            hot: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.name_to_index.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.name_to_index.is_empty()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges_out.iter().map(|e| e.len()).sum()
    }

    /// Names of all live nodes.
    pub fn node_names(&self) -> Vec<String> {
        self.name_to_index.keys().cloned().collect()
    }

    /// Nodes currently in the hot set.
    pub fn hot_node_count(&self) -> usize {
        self.hot.lock().len()
    }

    /// Insert a node, replacing any previous node of the same name.
    ///
    /// Returns the node's index. Edges of a replaced node are kept.
    pub fn add_node(&mut self, node: DependencyNode) -> usize {
        if let Some(&index) = self.name_to_index.get(&node.name) {
            self.nodes[index] = Some(node);
            self.touch(index);
            return index;
        }

        let index = self.nodes.len();
        self.name_to_index.insert(node.name.clone(), index);
        self.nodes.push(Some(node));
        self.edges_out.push(Vec::new());
        self.edges_in.push(Vec::new());
        self.touch(index);
        index
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, name: &str) -> bool {
        let Some(index) = self.name_to_index.remove(name) else {
            return false;
        };

        for out in std::mem::take(&mut self.edges_out[index]) {
            self.edges_in[out].retain(|&i| i != index);
        }
        for inc in std::mem::take(&mut self.edges_in[index]) {
            self.edges_out[inc].retain(|&i| i != index);
        }
        self.nodes[index] = None;
        self.hot.lock().pop(&index);
        true
    }

    /// Whether a node named `name` exists.
    pub fn has_node(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    fn touch(&self, index: usize) {
        self.hot.lock().put(index, ());
    }

    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Option<&DependencyNode> {
        let index = *self.name_to_index.get(name)?;
        self.touch(index);
        self.nodes[index].as_ref()
    }

    /// Look up a node mutably by name.
    pub fn node_mut(&mut self, name: &str) -> Option<&mut DependencyNode> {
        let index = *self.name_to_index.get(name)?;
        self.touch(index);
        self.nodes[index].as_mut()
    }

    /// Look up a node by index.
    pub fn node_by_index(&self, index: usize) -> Option<&DependencyNode> {
        self.nodes.get(index)?.as_ref()
    }

    /// Iterate over live nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.iter().filter_map(|n| n.as_ref())
    }

    /// Add a dependency edge `from → to`.
    ///
    /// Both nodes must exist and self-loops are rejected.
    pub fn add_edge(&mut self, from: &str, to: &str) -> GraphResult<()> {
        if from == to {
            return Err(GraphError::SelfLoop(from.to_string()));
        }
        let from_index = *self
            .name_to_index
            .get(from)
            .ok_or_else(|| GraphError::NodeMissing(from.to_string()))?;
        let to_index = *self
            .name_to_index
            .get(to)
            .ok_or_else(|| GraphError::NodeMissing(to.to_string()))?;

        if !self.edges_out[from_index].contains(&to_index) {
            self.edges_out[from_index].push(to_index);
            self.edges_in[to_index].push(from_index);
        }
        Ok(())
    }

    /// Remove the edge `from → to` if present.
    pub fn remove_edge(&mut self, from: &str, to: &str) -> bool {
        let (Some(&from_index), Some(&to_index)) =
            (self.name_to_index.get(from), self.name_to_index.get(to))
        else {
            return false;
        };
        let before = self.edges_out[from_index].len();
        self.edges_out[from_index].retain(|&i| i != to_index);
        self.edges_in[to_index].retain(|&i| i != from_index);
        before != self.edges_out[from_index].len()
    }

    fn node_name(&self, index: usize) -> &str {
        self.nodes[index]
            .as_ref()
            .map(|n| n.name.as_str())
            .unwrap_or("")
    }

    /// Names of the direct dependencies of `name`.
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        match self.name_to_index.get(name) {
            Some(&index) => self.edges_out[index]
                .iter()
                .map(|&i| self.node_name(i).to_string())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Names of the packages depending directly on `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        match self.name_to_index.get(name) {
            Some(&index) => self.edges_in[index]
                .iter()
                .map(|&i| self.node_name(i).to_string())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Whether `to` is reachable from `from` along dependency edges.
    pub fn is_reachable(&self, from: &str, to: &str) -> bool {
        let (Some(&start), Some(&goal)) =
            (self.name_to_index.get(from), self.name_to_index.get(to))
        else {
            return false;
        };
        if start == goal {
            return true;
        }

        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(index) = queue.pop_front() {
            for &next in &self.edges_out[index] {
                if next == goal {
                    return true;
                }
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    }

    /// Topological order of the graph (Kahn's algorithm).
    ///
    /// Defined only for an acyclic graph; a cycle yields
    /// [`GraphError::CycleDetected`].
    pub fn topological_sort(&self) -> GraphResult<Vec<String>> {
        let mut in_degree: HashMap<usize, usize> = self
            .name_to_index
            .values()
            .map(|&i| (i, self.edges_in[i].len()))
            .collect();

        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(index) = queue.pop_front() {
            order.push(self.node_name(index).to_string());
            for &next in &self.edges_out[index] {
                if let Some(degree) = in_degree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }

        if order.len() != self.len() {
            let cycles = self.detect_cycles();
            return Err(GraphError::CycleDetected(
                cycles.iter().map(|c| c.len()).sum(),
            ));
        }
        Ok(order)
    }

    /// Find every directed cycle (DFS with a recursion stack).
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut visited = HashSet::new();
        let mut cycles = Vec::new();

        for &start in self.name_to_index.values() {
            if visited.contains(&start) {
                continue;
            }
            let mut rec_stack = HashSet::new();
            let mut path = Vec::new();
            self.dfs_cycles(start, &mut visited, &mut rec_stack, &mut path, &mut cycles);
        }
        cycles
    }

    fn dfs_cycles(
        &self,
        index: usize,
        visited: &mut HashSet<usize>,
        rec_stack: &mut HashSet<usize>,
        path: &mut Vec<usize>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(index);
        rec_stack.insert(index);
        path.push(index);

        for &next in &self.edges_out[index] {
            if rec_stack.contains(&next) {
                // Slice the cycle out of the current path.
                if let Some(pos) = path.iter().position(|&i| i == next) {
                    let cycle = path[pos..]
                        .iter()
                        .map(|&i| self.node_name(i).to_string())
                        .collect();
                    cycles.push(cycle);
                }
            } else if !visited.contains(&next) {
                self.dfs_cycles(next, visited, rec_stack, path, cycles);
            }
        }

        rec_stack.remove(&index);
        path.pop();
    }

    /// Every simple path from `from` to `to`.
    pub fn all_paths(&self, from: &str, to: &str) -> Vec<Vec<String>> {
        let (Some(&start), Some(&goal)) =
            (self.name_to_index.get(from), self.name_to_index.get(to))
        else {
            return Vec::new();
        };

        let mut paths = Vec::new();
        let mut current = Vec::new();
        let mut visited = HashSet::new();
        self.dfs_paths(start, goal, &mut visited, &mut current, &mut paths);
        paths
    }

    fn dfs_paths(
        &self,
        index: usize,
        goal: usize,
        visited: &mut HashSet<usize>,
        current: &mut Vec<usize>,
        paths: &mut Vec<Vec<String>>,
    ) {
        visited.insert(index);
        current.push(index);

        if index == goal {
            paths.push(
                current
                    .iter()
                    .map(|&i| self.node_name(i).to_string())
                    .collect(),
            );
        } else {
            for &next in &self.edges_out[index] {
                if !visited.contains(&next) {
                    self.dfs_paths(next, goal, visited, current, paths);
                }
            }
        }

        current.pop();
        visited.remove(&index);
    }

    /// Every path from a root (no incoming edges) terminating at
    /// `package`.
    pub fn paths_to_package(&self, package: &str) -> Vec<Vec<String>> {
        let Some(&goal) = self.name_to_index.get(package) else {
            return Vec::new();
        };

        let roots: Vec<usize> = self
            .name_to_index
            .values()
            .copied()
            .filter(|&i| self.edges_in[i].is_empty())
            .collect();

        let mut paths = Vec::new();
        for root in roots {
            if root == goal {
                paths.push(vec![self.node_name(goal).to_string()]);
                continue;
            }
            let mut current = Vec::new();
            let mut visited = HashSet::new();
            self.dfs_paths(root, goal, &mut visited, &mut current, &mut paths);
        }
        paths
    }

    /// Drop every node and edge.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.name_to_index.clear();
        self.edges_out.clear();
        self.edges_in.clear();
        self.hot.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(names: &[&str]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for name in names {
            graph.add_node(DependencyNode::new(*name));
        }
        graph
    }

    #[test]
    fn test_add_and_lookup() {
        let mut graph = graph_with(&["fmt", "spdlog"]);
        graph.add_edge("spdlog", "fmt").unwrap();

        assert_eq!(graph.len(), 2);
        assert!(graph.has_node("fmt"));
        assert_eq!(graph.dependencies_of("spdlog"), vec!["fmt"]);
        assert_eq!(graph.dependents_of("fmt"), vec!["spdlog"]);
    }

    #[test]
    fn test_edge_requires_existing_target() {
        let mut graph = graph_with(&["a"]);
        assert!(matches!(
            graph.add_edge("a", "ghost"),
            Err(GraphError::NodeMissing(_))
        ));
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut graph = graph_with(&["a"]);
        assert!(matches!(
            graph.add_edge("a", "a"),
            Err(GraphError::SelfLoop(_))
        ));
    }

    #[test]
    fn test_node_replacement_keeps_single_entry() {
        let mut graph = graph_with(&["fmt"]);
        let replacement = DependencyNode::with_version("fmt", Version::new(9, 1, 0));
        graph.add_node(replacement);

        assert_eq!(graph.len(), 1);
        assert_eq!(
            graph.node("fmt").unwrap().version,
            Some(Version::new(9, 1, 0))
        );
    }

    #[test]
    fn test_remove_node_drops_edges() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.add_edge("a", "b").unwrap();
        graph.add_edge("b", "c").unwrap();

        assert!(graph.remove_node("b"));
        assert!(graph.dependencies_of("a").is_empty());
        assert!(graph.dependents_of("c").is_empty());
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_topological_sort() {
        let mut graph = graph_with(&["app", "spdlog", "fmt"]);
        graph.add_edge("app", "spdlog").unwrap();
        graph.add_edge("spdlog", "fmt").unwrap();

        let order = graph.topological_sort().unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("app") < pos("spdlog"));
        assert!(pos("spdlog") < pos("fmt"));
    }

    #[test]
    fn test_cycle_detection_refuses_topo_sort() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.add_edge("a", "b").unwrap();
        graph.add_edge("b", "c").unwrap();
        graph.add_edge("c", "a").unwrap();

        let cycles = graph.detect_cycles();
        assert_eq!(cycles.len(), 1);
        let cycle: HashSet<&str> = cycles[0].iter().map(|s| s.as_str()).collect();
        assert_eq!(cycle, HashSet::from(["a", "b", "c"]));

        assert!(matches!(
            graph.topological_sort(),
            Err(GraphError::CycleDetected(_))
        ));
    }

    #[test]
    fn test_two_cycle_detected() {
        let mut graph = graph_with(&["a", "b"]);
        graph.add_edge("a", "b").unwrap();
        graph.add_edge("b", "a").unwrap();

        let cycles = graph.detect_cycles();
        assert!(!cycles.is_empty());
        let cycle: HashSet<&str> = cycles[0].iter().map(|s| s.as_str()).collect();
        assert_eq!(cycle, HashSet::from(["a", "b"]));
    }

    #[test]
    fn test_all_paths() {
        let mut graph = graph_with(&["root", "mid1", "mid2", "leaf"]);
        graph.add_edge("root", "mid1").unwrap();
        graph.add_edge("root", "mid2").unwrap();
        graph.add_edge("mid1", "leaf").unwrap();
        graph.add_edge("mid2", "leaf").unwrap();

        let paths = graph.all_paths("root", "leaf");
        assert_eq!(paths.len(), 2);
        for path in &paths {
            assert_eq!(path.first().map(String::as_str), Some("root"));
            assert_eq!(path.last().map(String::as_str), Some("leaf"));
        }

        let to_leaf = graph.paths_to_package("leaf");
        assert_eq!(to_leaf.len(), 2);
    }

    #[test]
    fn test_reachability() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.add_edge("a", "b").unwrap();
        graph.add_edge("b", "c").unwrap();

        assert!(graph.is_reachable("a", "c"));
        assert!(!graph.is_reachable("c", "a"));
    }

    #[test]
    fn test_hot_set_demotion() {
        let mut graph = DependencyGraph::with_hot_capacity(2);
        for name in ["a", "b", "c", "d"] {
            graph.add_node(DependencyNode::new(name));
        }
        // Capacity 2: only the two most recently touched nodes stay hot.
        assert_eq!(graph.hot_node_count(), 2);
        let _ = graph.node("a");
        let _ = graph.node("b");
        assert_eq!(graph.hot_node_count(), 2);
        assert_eq!(graph.len(), 4);
    }
}
