// PAKER - Package Acquisition and Integrity Core
// Async I/O Engine - Adaptive Buffer Management

//! Adaptive buffer sizing for the four I/O operation classes.
//!
//! Each class starts from an initial size, grows toward observed
//! throughput when operations fill the buffer, and shrinks back when
//! utilisation stays low.

use parking_lot::Mutex;
use std::time::Duration;

/// The four buffer classes, one per operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferClass {
    /// Buffers for file reads
    FileRead,
    /// Buffers for file writes
    FileWrite,
    /// Buffers for network downloads
    NetworkDownload,
    /// Buffers for network uploads
    NetworkUpload,
}

impl BufferClass {
    /// All classes, in declaration order.
    pub const ALL: [BufferClass; 4] = [
        BufferClass::FileRead,
        BufferClass::FileWrite,
        BufferClass::NetworkDownload,
        BufferClass::NetworkUpload,
    ];

    fn index(self) -> usize {
        match self {
            BufferClass::FileRead => 0,
            BufferClass::FileWrite => 1,
            BufferClass::NetworkDownload => 2,
            BufferClass::NetworkUpload => 3,
        }
    }
}

/// Sizing parameters for one buffer class
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Starting buffer size in bytes
    pub initial_size: usize,
    /// Lower bound the buffer may shrink to
    pub min_size: usize,
    /// Upper bound the buffer may grow to
    pub max_size: usize,
    /// Multiplier applied when growing
    pub growth_factor: f64,
    /// Multiplier applied when shrinking
    pub shrink_factor: f64,
}

impl BufferConfig {
    fn with_initial(initial_size: usize) -> Self {
        Self {
            initial_size,
            min_size: 4 * 1024,
            max_size: 8 * 1024 * 1024,
            growth_factor: 2.0,
            shrink_factor: 0.5,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::with_initial(64 * 1024)
    }
}

#[derive(Debug)]
struct BufferState {
    config: BufferConfig,
    current_size: usize,
    low_utilisation_streak: u32,
}

impl BufferState {
    fn new(config: BufferConfig) -> Self {
        let current_size = config.initial_size;
        Self {
            config,
            current_size,
            low_utilisation_streak: 0,
        }
    }
}

/// Shrink only after this many consecutive low-utilisation operations.
const SHRINK_STREAK: u32 = 4;

/// Utilisation below this fraction of the buffer counts as low.
const LOW_UTILISATION: f64 = 0.25;

/// Manages the current size of each buffer class.
#[derive(Debug)]
pub struct AdaptiveBufferManager {
    states: [Mutex<BufferState>; 4],
    enabled: bool,
}

impl AdaptiveBufferManager {
    /// Create a manager with the default per-class initial sizes.
    pub fn new(enabled: bool) -> Self {
        Self {
            states: [
                Mutex::new(BufferState::new(BufferConfig::with_initial(64 * 1024))),
                Mutex::new(BufferState::new(BufferConfig::with_initial(64 * 1024))),
                Mutex::new(BufferState::new(BufferConfig::with_initial(256 * 1024))),
                Mutex::new(BufferState::new(BufferConfig::with_initial(128 * 1024))),
            ],
            enabled,
        }
    }

    /// Whether adaptive sizing is active.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current buffer size for a class.
    pub fn current_size(&self, class: BufferClass) -> usize {
        self.states[class.index()].lock().current_size
    }

    /// Sizing parameters for a class.
    pub fn config(&self, class: BufferClass) -> BufferConfig {
        self.states[class.index()].lock().config.clone()
    }

    /// Record one completed operation against a class.
    ///
    /// An operation that moved at least a full buffer grows the class
    /// toward the throughput it observed; sustained low utilisation
    /// shrinks it.
    pub fn record_operation(&self, class: BufferClass, bytes_moved: u64, duration: Duration) {
        if !self.enabled || bytes_moved == 0 {
            return;
        }

        let mut state = self.states[class.index()].lock();
        let current = state.current_size as u64;

        if bytes_moved >= current {
            // The buffer was filled; grow toward observed per-second throughput.
            let throughput = bytes_moved as f64 / duration.as_secs_f64().max(1e-6);
            let ceiling = throughput.max(state.current_size as f64) as usize;
            let grown = (state.current_size as f64 * state.config.growth_factor) as usize;
            state.current_size = grown
                .min(ceiling)
                .clamp(state.config.min_size, state.config.max_size);
            state.low_utilisation_streak = 0;
        } else if (bytes_moved as f64) < current as f64 * LOW_UTILISATION {
            state.low_utilisation_streak += 1;
            if state.low_utilisation_streak >= SHRINK_STREAK {
                let shrunk = (state.current_size as f64 * state.config.shrink_factor) as usize;
                state.current_size = shrunk.clamp(state.config.min_size, state.config.max_size);
                state.low_utilisation_streak = 0;
            }
        } else {
            state.low_utilisation_streak = 0;
        }
    }

    /// Total bytes currently committed across all classes.
    pub fn memory_usage(&self) -> usize {
        BufferClass::ALL
            .iter()
            .map(|c| self.current_size(*c))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_sizes() {
        let mgr = AdaptiveBufferManager::new(true);
        assert_eq!(mgr.current_size(BufferClass::FileRead), 64 * 1024);
        assert_eq!(mgr.current_size(BufferClass::NetworkDownload), 256 * 1024);
    }

    #[test]
    fn test_growth_on_full_buffer() {
        let mgr = AdaptiveBufferManager::new(true);
        let before = mgr.current_size(BufferClass::FileRead);

        // A fast operation that filled the buffer should grow it.
        mgr.record_operation(
            BufferClass::FileRead,
            (before * 4) as u64,
            Duration::from_millis(1),
        );
        assert!(mgr.current_size(BufferClass::FileRead) > before);
    }

    #[test]
    fn test_shrink_on_sustained_low_utilisation() {
        let mgr = AdaptiveBufferManager::new(true);
        let before = mgr.current_size(BufferClass::FileWrite);

        for _ in 0..SHRINK_STREAK {
            mgr.record_operation(BufferClass::FileWrite, 16, Duration::from_millis(5));
        }
        assert!(mgr.current_size(BufferClass::FileWrite) < before);
    }

    #[test]
    fn test_disabled_manager_is_inert() {
        let mgr = AdaptiveBufferManager::new(false);
        let before = mgr.current_size(BufferClass::FileRead);
        mgr.record_operation(
            BufferClass::FileRead,
            (before * 8) as u64,
            Duration::from_millis(1),
        );
        assert_eq!(mgr.current_size(BufferClass::FileRead), before);
    }

    #[test]
    fn test_sizes_respect_bounds() {
        let mgr = AdaptiveBufferManager::new(true);
        for _ in 0..64 {
            let size = mgr.current_size(BufferClass::NetworkDownload) as u64;
            mgr.record_operation(
                BufferClass::NetworkDownload,
                size * 2,
                Duration::from_millis(1),
            );
        }
        let config = mgr.config(BufferClass::NetworkDownload);
        assert!(mgr.current_size(BufferClass::NetworkDownload) <= config.max_size);
    }
}
