//! # PAKER - Package Acquisition and Integrity Core
//!
//! The core subsystems of the Paker package manager for C++ projects.
//!
//! ## Architecture
//!
//! - `core`: Configuration and the owned services context
//! - `io`: Asynchronous I/O engine with adaptive buffering and retry
//! - `cache`: Content-addressed package cache with coexisting versions
//! - `dependency`: Version constraints, dependency graph, manifest
//!   parsing, and the incremental resolver
//! - `conflict`: Version/cycle/missing-dependency detection and
//!   resolution
//! - `history`: Version history with archival snapshots and rollback
//!
//! The crate exposes operations, not a command-line surface: the CLI,
//! terminal output, and recommendation layers are separate collaborators
//! built on top of these modules.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Configuration and services context
pub mod core;

// Asynchronous I/O engine
pub mod io;

// Package cache store and path resolution
pub mod cache;

// Dependency graph, manifests, parsing, resolution
pub mod dependency;

// Conflict detection and resolution
pub mod conflict;

// Version history and rollback
pub mod history;

// Re-export commonly used types
pub use crate::core::{PakerConfig, PakerError, PakerResult, PakerServices};
pub use cache::{
    CacheConfig, CacheEntry, CacheLocation, CacheStore, PathResolver, PlacementStrategy,
    StorageStrategy,
};
pub use conflict::{Conflict, ConflictDetector, ConflictKind, ConflictResolver};
pub use dependency::{
    ConstraintOp, DependencyGraph, DependencyNode, DependencyResolver, IncrementalParser,
    ParseConfig, VersionConstraint,
};
pub use history::{
    HistoryEntry, HistoryManager, RollbackEngine, RollbackOptions, RollbackResult,
    RollbackStrategy,
};
pub use io::{IoEngine, IoEngineConfig, IoHandle, IoResult, IoStatus};

/// Re-export version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
