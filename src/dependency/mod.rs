// PAKER - Package Acquisition and Integrity Core
// Dependency Management - Module Exports

//! # Dependency Management
//!
//! Version constraints, the in-memory dependency graph, manifest
//! readers, the incremental parser, and the resolver that drives them:
//!
//! - `version`: semver parsing, normalisation, constraint satisfaction
//! - `graph`: vector-backed directed graph with cycle detection and
//!   topological ordering
//! - `manifest`: format-specific manifest readers with typed output
//! - `parser`: content-hash parse cache with strategy selection
//! - `resolver`: seeds the graph and resolves constraints to versions

pub mod graph;
pub mod manifest;
pub mod parser;
pub mod resolver;
pub mod version;

pub use graph::{DependencyGraph, DependencyNode, GraphError};
pub use manifest::{ManifestFormat, ManifestScan, ParsedDependency};
pub use parser::{IncrementalParser, ParseConfig, ParseOutcome, ParseStats, ParseStrategy};
pub use resolver::{DependencyResolver, ResolveError, ResolverConfig};
pub use version::{ConstraintOp, VersionConstraint, VersionError};
