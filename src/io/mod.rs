// PAKER - Package Acquisition and Integrity Core
// Async I/O Engine - Module Exports

//! # Asynchronous I/O Engine
//!
//! Thread-pooled, queue-fed file and network operations with observable
//! progress. Supports:
//!
//! - Non-blocking submission with a future-carrying handle per operation
//! - Batch submission (all tasks enqueued before the call returns)
//! - Adaptive buffer sizing per operation class
//! - Exponential-backoff retry for network operations
//! - Best-effort smart pre-read of frequently accessed paths
//! - Cooperative cancellation and engine statistics

pub mod buffer;
pub mod engine;
pub mod preread;
pub mod retry;

pub use buffer::{AdaptiveBufferManager, BufferClass, BufferConfig};
pub use engine::{IoEngine, IoEngineConfig, IoHandle};
pub use preread::PreReadManager;
pub use retry::RetryConfig;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// I/O engine errors
#[derive(Debug, Error)]
pub enum IoEngineError {
    /// A filesystem or network operation did not complete.
    #[error("I/O failure: {0}")]
    Io(String),

    /// A named path or remote resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The target location is not writable.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A network transfer failed after exhausting retries.
    #[error("Network error: {0}")]
    Network(String),

    /// The operation was cancelled before completion.
    #[error("Operation cancelled")]
    Cancelled,

    /// The engine is shutting down and no longer accepts work.
    #[error("Engine shutting down")]
    ShuttingDown,
}

impl From<std::io::Error> for IoEngineError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => IoEngineError::NotFound(e.to_string()),
            std::io::ErrorKind::PermissionDenied => IoEngineError::PermissionDenied(e.to_string()),
            _ => IoEngineError::Io(e.to_string()),
        }
    }
}

/// Result type for engine-internal operations
pub type IoEngineResult<T> = Result<T, IoEngineError>;

/// Lifecycle status of a submitted operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// Queued, not yet picked up by a worker
    Pending,
    /// Currently executing on a worker
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled before or after execution began
    Cancelled,
}

/// The kind of work a queued operation performs
#[derive(Debug, Clone)]
pub enum OperationKind {
    /// Read a file from disk, optionally decoding it as UTF-8 text.
    ReadFile {
        /// Path to read
        path: PathBuf,
        /// Decode the bytes as text in the result
        as_text: bool,
        /// Submitted by the pre-read layer; failures are silent
        preread: bool,
    },
    /// Write a byte buffer to disk.
    WriteFile {
        /// Path to write
        path: PathBuf,
        /// Contents to write
        contents: Vec<u8>,
    },
    /// Download a remote resource to a local file.
    Download {
        /// Source URL
        url: String,
        /// Destination path
        dest: PathBuf,
    },
}

/// Outcome of a single operation
#[derive(Debug)]
pub struct IoResult {
    /// Operation id assigned at submission
    pub id: Uuid,
    /// Terminal status
    pub status: IoStatus,
    /// Raw bytes for read operations
    pub bytes: Option<Vec<u8>>,
    /// Decoded text for `as_text` reads
    pub text: Option<String>,
    /// Bytes read, written, or transferred
    pub bytes_processed: u64,
    /// Populated when `status` is `Failed` or `Cancelled`
    pub error: Option<IoEngineError>,
    /// Wall-clock time from submission to completion
    pub duration: Duration,
}

impl IoResult {
    pub(crate) fn cancelled(id: Uuid, duration: Duration) -> Self {
        Self {
            id,
            status: IoStatus::Cancelled,
            bytes: None,
            text: None,
            bytes_processed: 0,
            error: Some(IoEngineError::Cancelled),
            duration,
        }
    }

    pub(crate) fn failed(id: Uuid, error: IoEngineError, duration: Duration) -> Self {
        Self {
            id,
            status: IoStatus::Failed,
            bytes: None,
            text: None,
            bytes_processed: 0,
            error: Some(error),
            duration,
        }
    }

    /// Whether the operation completed successfully.
    pub fn is_ok(&self) -> bool {
        self.status == IoStatus::Completed
    }
}

/// Point-in-time engine statistics
#[derive(Debug, Clone, Default)]
pub struct IoEngineStats {
    /// Operations ever submitted
    pub total_operations: u64,
    /// Operations finished successfully
    pub completed_operations: u64,
    /// Operations finished with an error
    pub failed_operations: u64,
    /// Operations cancelled
    pub cancelled_operations: u64,
    /// Operations currently executing
    pub active_operations: u64,
    /// Operations waiting in the queue
    pub queue_size: u64,
    /// Times a submission found the queue above its high-water mark
    pub queue_pressure_events: u64,
    /// completed / (completed + failed), as a percentage
    pub success_rate: f64,
    /// Mean operation duration in milliseconds
    pub average_duration_ms: f64,
    /// Longest single operation in milliseconds
    pub max_duration_ms: u64,
    /// Total bytes moved by completed operations
    pub total_bytes_processed: u64,
    /// Hit rate of the pre-read content cache, as a percentage
    pub preread_hit_rate: f64,
}

impl IoEngineStats {
    /// Render the statistics as a human-readable report.
    pub fn performance_report(&self) -> String {
        let mut report = String::new();
        report.push_str("=== Async I/O Performance Report ===\n");
        report.push_str(&format!("Total operations: {}\n", self.total_operations));
        report.push_str(&format!("Completed: {}\n", self.completed_operations));
        report.push_str(&format!("Failed: {}\n", self.failed_operations));
        report.push_str(&format!("Cancelled: {}\n", self.cancelled_operations));
        report.push_str(&format!("Active: {}\n", self.active_operations));
        report.push_str(&format!("Queue size: {}\n", self.queue_size));
        report.push_str(&format!("Success rate: {:.1}%\n", self.success_rate));
        report.push_str(&format!(
            "Average duration: {:.1} ms (max {} ms)\n",
            self.average_duration_ms, self.max_duration_ms
        ));
        report.push_str(&format!("Bytes processed: {}\n", self.total_bytes_processed));
        report.push_str(&format!("Pre-read hit rate: {:.1}%\n", self.preread_hit_rate));
        report
    }

    /// Produce tuning suggestions from the current counters.
    pub fn optimization_suggestions(&self) -> Vec<String> {
        let mut suggestions = Vec::new();

        if self.queue_size > 100 {
            suggestions.push(format!(
                "Queue backlog is high ({} pending); consider more workers",
                self.queue_size
            ));
        }
        if self.total_operations > 0 && self.success_rate < 90.0 {
            suggestions.push(format!(
                "Success rate is low ({:.1}%); inspect failing operations",
                self.success_rate
            ));
        }
        if self.average_duration_ms > 1000.0 {
            suggestions.push(format!(
                "Average operation time is high ({:.0} ms); check I/O throughput",
                self.average_duration_ms
            ));
        }

        suggestions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            IoEngineError::from(not_found),
            IoEngineError::NotFound(_)
        ));

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            IoEngineError::from(denied),
            IoEngineError::PermissionDenied(_)
        ));
    }

    #[test]
    fn test_optimization_suggestions_thresholds() {
        let mut stats = IoEngineStats {
            total_operations: 10,
            success_rate: 95.0,
            ..Default::default()
        };
        assert!(stats.optimization_suggestions().is_empty());

        stats.queue_size = 150;
        stats.success_rate = 50.0;
        stats.average_duration_ms = 2500.0;
        assert_eq!(stats.optimization_suggestions().len(), 3);
    }
}
