// PAKER - Package Acquisition and Integrity Core
// Async I/O Engine - Worker Pool and Operation Queue

//! The I/O engine proper: a fixed worker pool consuming a FIFO queue of
//! file and network operations.
//!
//! Submission is non-blocking and returns an [`IoHandle`] carrying the
//! operation's future result. Workers never panic outward; every
//! submission resolves to an [`IoResult`], a `Cancelled` one when the
//! engine shuts down first.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::buffer::{AdaptiveBufferManager, BufferClass, BufferConfig};
use super::preread::PreReadManager;
use super::retry::{self, RetryConfig};
use super::{IoEngineError, IoEngineResult, IoEngineStats, IoResult, IoStatus, OperationKind};

/// Engine construction parameters
#[derive(Debug, Clone)]
pub struct IoEngineConfig {
    /// Upper bound on worker count; `0` means hardware parallelism
    pub max_workers: usize,
    /// Queue length above which submissions count as queue pressure
    pub queue_high_water: usize,
    /// Grow and shrink buffers from observed throughput
    pub adaptive_buffering: bool,
    /// Score read paths and pre-queue hot ones
    pub smart_pre_read: bool,
    /// Entries held by the pre-read content cache
    pub preread_cache_capacity: usize,
    /// Retry transient network failures
    pub network_retry: bool,
    /// Backoff parameters for network retry
    pub retry: RetryConfig,
}

impl Default for IoEngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 0,
            queue_high_water: 256,
            adaptive_buffering: true,
            smart_pre_read: true,
            preread_cache_capacity: 64,
            network_retry: true,
            retry: RetryConfig::default(),
        }
    }
}

/// How many pre-read candidates one trigger pass queues.
const PREREAD_BATCH: usize = 8;

struct QueuedOp {
    id: Uuid,
    kind: OperationKind,
    submitted: Instant,
    done: oneshot::Sender<IoResult>,
}

#[derive(Default)]
struct DurationStats {
    total_ms: u128,
    count: u64,
    max_ms: u64,
}

struct EngineShared {
    registry: Arc<DashMap<Uuid, IoStatus>>,
    buffers: AdaptiveBufferManager,
    preread: PreReadManager,
    retry: RetryConfig,
    network_retry: bool,
    http: reqwest::Client,
    shutdown: AtomicBool,
    queue_high_water: usize,

    queue_size: AtomicU64,
    total_ops: AtomicU64,
    completed_ops: AtomicU64,
    failed_ops: AtomicU64,
    cancelled_ops: AtomicU64,
    active_ops: AtomicU64,
    pressure_events: AtomicU64,
    total_bytes: AtomicU64,
    durations: Mutex<DurationStats>,
}

/// Handle to one submitted operation.
pub struct IoHandle {
    id: Uuid,
    registry: Arc<DashMap<Uuid, IoStatus>>,
    rx: oneshot::Receiver<IoResult>,
}

impl IoHandle {
    /// The operation id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current status of the operation.
    pub fn status(&self) -> IoStatus {
        self.registry
            .get(&self.id)
            .map(|s| *s)
            .unwrap_or(IoStatus::Completed)
    }

    /// Wait for the operation to finish.
    pub async fn join(self) -> IoResult {
        let result = match self.rx.await {
            Ok(result) => result,
            Err(_) => IoResult::cancelled(self.id, Duration::ZERO),
        };
        self.registry.remove(&self.id);
        result
    }
}

/// The asynchronous I/O engine.
///
/// Must be created inside a Tokio runtime; the worker pool is spawned at
/// construction and runs until [`IoEngine::shutdown`] or drop.
pub struct IoEngine {
    shared: Arc<EngineShared>,
    sender: Mutex<Option<mpsc::UnboundedSender<QueuedOp>>>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    worker_count: usize,
}

impl IoEngine {
    /// Create an engine and spawn its worker pool.
    pub fn new(config: IoEngineConfig) -> Self {
        let hardware = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let worker_count = if config.max_workers == 0 {
            hardware
        } else {
            hardware.min(config.max_workers)
        };

        let shared = Arc::new(EngineShared {
            registry: Arc::new(DashMap::new()),
            buffers: AdaptiveBufferManager::new(config.adaptive_buffering),
            preread: PreReadManager::new(config.smart_pre_read, config.preread_cache_capacity),
            retry: config.retry,
            network_retry: config.network_retry,
            http: reqwest::Client::new(),
            shutdown: AtomicBool::new(false),
            queue_high_water: config.queue_high_water,
            queue_size: AtomicU64::new(0),
            total_ops: AtomicU64::new(0),
            completed_ops: AtomicU64::new(0),
            failed_ops: AtomicU64::new(0),
            cancelled_ops: AtomicU64::new(0),
            active_ops: AtomicU64::new(0),
            pressure_events: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            durations: Mutex::new(DurationStats::default()),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let shared = Arc::clone(&shared);
            let rx = Arc::clone(&rx);
            workers.push(tokio::spawn(worker_loop(shared, rx)));
        }

        log::info!("I/O engine started with {} workers", worker_count);

        Self {
            shared,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            worker_count,
        }
    }

    /// Number of workers in the pool.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    fn submit(&self, kind: OperationKind) -> IoHandle {
        let id = Uuid::new_v4();
        let (done, rx) = oneshot::channel();
        let registry = Arc::clone(&self.shared.registry);
        self.shared.total_ops.fetch_add(1, Ordering::SeqCst);

        let handle = IoHandle { id, registry, rx };

        if self.shared.shutdown.load(Ordering::SeqCst) {
            self.shared.cancelled_ops.fetch_add(1, Ordering::SeqCst);
            self.shared.registry.insert(id, IoStatus::Cancelled);
            let _ = done.send(IoResult::cancelled(id, Duration::ZERO));
            return handle;
        }

        self.shared.registry.insert(id, IoStatus::Pending);
        let op = QueuedOp {
            id,
            kind,
            submitted: Instant::now(),
            done,
        };

        let send_result = {
            let sender = self.sender.lock();
            match sender.as_ref() {
                Some(tx) => tx.send(op).map_err(|mpsc::error::SendError(op)| op),
                None => Err(op),
            }
        };
        match send_result {
            Ok(()) => {
                let queued = self.shared.queue_size.fetch_add(1, Ordering::SeqCst) + 1;
                if queued as usize > self.shared.queue_high_water {
                    self.shared.pressure_events.fetch_add(1, Ordering::SeqCst);
                }
            }
            Err(op) => {
                // Queue already closed; resolve as cancelled.
                self.shared.cancelled_ops.fetch_add(1, Ordering::SeqCst);
                self.shared.registry.insert(id, IoStatus::Cancelled);
                let _ = op.done.send(IoResult::cancelled(id, Duration::ZERO));
            }
        }

        handle
    }

    /// Read a file, optionally decoding the contents as UTF-8 text.
    pub fn read_file<P: Into<PathBuf>>(&self, path: P, as_text: bool) -> IoHandle {
        self.submit(OperationKind::ReadFile {
            path: path.into(),
            as_text,
            preread: false,
        })
    }

    /// Write a byte buffer to a file, creating parent directories.
    pub fn write_file<P: Into<PathBuf>, C: Into<Vec<u8>>>(&self, path: P, contents: C) -> IoHandle {
        self.submit(OperationKind::WriteFile {
            path: path.into(),
            contents: contents.into(),
        })
    }

    /// Download a remote resource to a local file.
    pub fn download<P: Into<PathBuf>>(&self, url: &str, dest: P) -> IoHandle {
        self.submit(OperationKind::Download {
            url: url.to_string(),
            dest: dest.into(),
        })
    }

    /// Batch read. All operations are enqueued before this returns.
    pub fn read_files<P: Into<PathBuf>>(
        &self,
        paths: impl IntoIterator<Item = P>,
        as_text: bool,
    ) -> Vec<IoHandle> {
        paths
            .into_iter()
            .map(|p| self.read_file(p, as_text))
            .collect()
    }

    /// Batch write. All operations are enqueued before this returns.
    pub fn write_files<P: Into<PathBuf>, C: Into<Vec<u8>>>(
        &self,
        items: impl IntoIterator<Item = (P, C)>,
    ) -> Vec<IoHandle> {
        items
            .into_iter()
            .map(|(p, c)| self.write_file(p, c))
            .collect()
    }

    /// Mark every unfinished operation cancelled.
    ///
    /// Pending operations resolve without executing; running operations
    /// run to completion and then report `Cancelled`.
    pub fn cancel_all(&self) {
        for mut entry in self.shared.registry.iter_mut() {
            if matches!(*entry, IoStatus::Pending | IoStatus::Running) {
                *entry = IoStatus::Cancelled;
            }
        }
        log::debug!("cancel_all issued");
    }

    /// Mark queued (not yet running) operations cancelled.
    pub fn clear_queue(&self) {
        for mut entry in self.shared.registry.iter_mut() {
            if matches!(*entry, IoStatus::Pending) {
                *entry = IoStatus::Cancelled;
            }
        }
        log::debug!("queue cleared");
    }

    /// Stop accepting work, drain the queue as cancelled, and join the
    /// worker pool.
    pub async fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.sender.lock().take();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
        log::info!("I/O engine shut down");
    }

    /// Queue pre-reads for the highest-scoring paths.
    ///
    /// Returns the number of reads queued. Failures of these reads are
    /// silent.
    pub fn trigger_pre_read(&self) -> usize {
        if !self.shared.preread.is_enabled() {
            return 0;
        }
        let candidates = self.shared.preread.candidates(PREREAD_BATCH);
        let count = candidates.len();
        for path in candidates {
            let _ = self.submit(OperationKind::ReadFile {
                path,
                as_text: false,
                preread: true,
            });
        }
        count
    }

    /// Paths the pre-read layer currently considers hot.
    pub fn pre_read_candidates(&self) -> Vec<PathBuf> {
        self.shared.preread.candidates(PREREAD_BATCH)
    }

    /// Whether adaptive buffering is enabled.
    pub fn is_adaptive_buffering_enabled(&self) -> bool {
        self.shared.buffers.is_enabled()
    }

    /// Whether smart pre-read is enabled.
    pub fn is_smart_pre_read_enabled(&self) -> bool {
        self.shared.preread.is_enabled()
    }

    /// Whether network retry is enabled.
    pub fn is_network_retry_enabled(&self) -> bool {
        self.shared.network_retry
    }

    /// Sizing parameters of one buffer class.
    pub fn buffer_config(&self, class: BufferClass) -> BufferConfig {
        self.shared.buffers.config(class)
    }

    /// Bytes currently committed to buffers.
    pub fn memory_usage(&self) -> usize {
        self.shared.buffers.memory_usage()
    }

    /// The retry configuration.
    pub fn retry_config(&self) -> RetryConfig {
        self.shared.retry.clone()
    }

    /// Snapshot of the engine statistics.
    pub fn stats(&self) -> IoEngineStats {
        let completed = self.shared.completed_ops.load(Ordering::SeqCst);
        let failed = self.shared.failed_ops.load(Ordering::SeqCst);
        let durations = self.shared.durations.lock();
        let average_duration_ms = if durations.count > 0 {
            durations.total_ms as f64 / durations.count as f64
        } else {
            0.0
        };
        let success_rate = if completed + failed > 0 {
            completed as f64 / (completed + failed) as f64 * 100.0
        } else {
            100.0
        };

        IoEngineStats {
            total_operations: self.shared.total_ops.load(Ordering::SeqCst),
            completed_operations: completed,
            failed_operations: failed,
            cancelled_operations: self.shared.cancelled_ops.load(Ordering::SeqCst),
            active_operations: self.shared.active_ops.load(Ordering::SeqCst),
            queue_size: self.shared.queue_size.load(Ordering::SeqCst),
            queue_pressure_events: self.shared.pressure_events.load(Ordering::SeqCst),
            success_rate,
            average_duration_ms,
            max_duration_ms: durations.max_ms,
            total_bytes_processed: self.shared.total_bytes.load(Ordering::SeqCst),
            preread_hit_rate: self.shared.preread.hit_rate(),
        }
    }
}

impl Drop for IoEngine {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.sender.lock().take();
    }
}

async fn worker_loop(
    shared: Arc<EngineShared>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<QueuedOp>>>,
) {
    loop {
        let op = { receiver.lock().await.recv().await };
        let Some(op) = op else { break };
        shared.queue_size.fetch_sub(1, Ordering::SeqCst);

        let QueuedOp {
            id,
            kind,
            submitted,
            done,
        } = op;

        let is_preread = matches!(kind, OperationKind::ReadFile { preread: true, .. });

        let marked_cancelled = shared
            .registry
            .get(&id)
            .map(|s| *s == IoStatus::Cancelled)
            .unwrap_or(false);
        if marked_cancelled || shared.shutdown.load(Ordering::SeqCst) {
            shared.cancelled_ops.fetch_add(1, Ordering::SeqCst);
            shared.registry.insert(id, IoStatus::Cancelled);
            let _ = done.send(IoResult::cancelled(id, submitted.elapsed()));
            continue;
        }

        shared.registry.insert(id, IoStatus::Running);
        shared.active_ops.fetch_add(1, Ordering::SeqCst);
        let mut result = execute(&shared, id, kind, submitted).await;
        shared.active_ops.fetch_sub(1, Ordering::SeqCst);

        // A cancel_all issued while the operation ran wins over its outcome.
        let cancelled_during_run = shared
            .registry
            .get(&id)
            .map(|s| *s == IoStatus::Cancelled)
            .unwrap_or(false);
        if cancelled_during_run {
            result = IoResult::cancelled(id, submitted.elapsed());
        }

        match result.status {
            IoStatus::Completed => {
                shared.completed_ops.fetch_add(1, Ordering::SeqCst);
                shared
                    .total_bytes
                    .fetch_add(result.bytes_processed, Ordering::SeqCst);
                let elapsed_ms = result.duration.as_millis();
                let mut durations = shared.durations.lock();
                durations.total_ms += elapsed_ms;
                durations.count += 1;
                durations.max_ms = durations.max_ms.max(elapsed_ms as u64);
            }
            IoStatus::Failed => {
                if is_preread {
                    // Pre-reads are best-effort; swallow the failure.
                    log::debug!("pre-read failed: {:?}", result.error);
                } else {
                    shared.failed_ops.fetch_add(1, Ordering::SeqCst);
                }
            }
            IoStatus::Cancelled => {
                shared.cancelled_ops.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }

        shared.registry.insert(id, result.status);
        if is_preread {
            shared.registry.remove(&id);
        }
        let _ = done.send(result);
    }
}

async fn execute(
    shared: &Arc<EngineShared>,
    id: Uuid,
    kind: OperationKind,
    submitted: Instant,
) -> IoResult {
    match kind {
        OperationKind::ReadFile {
            path,
            as_text,
            preread,
        } => {
            if !preread {
                shared.preread.record_access(&path);
                if let Some(bytes) = shared.preread.lookup(&path) {
                    return read_result(id, bytes, as_text, submitted);
                }
            }
            match read_file_bytes(shared, &path).await {
                Ok(bytes) => {
                    if preread {
                        shared.preread.insert(path, bytes.clone());
                    }
                    read_result(id, bytes, as_text, submitted)
                }
                Err(e) => IoResult::failed(id, e, submitted.elapsed()),
            }
        }
        OperationKind::WriteFile { path, contents } => {
            shared.preread.invalidate(&path);
            match write_file_bytes(shared, &path, &contents).await {
                Ok(written) => IoResult {
                    id,
                    status: IoStatus::Completed,
                    bytes: None,
                    text: None,
                    bytes_processed: written,
                    error: None,
                    duration: submitted.elapsed(),
                },
                Err(e) => IoResult::failed(id, e, submitted.elapsed()),
            }
        }
        OperationKind::Download { url, dest } => {
            match download_with_retry(shared, &url, &dest).await {
                Ok(transferred) => IoResult {
                    id,
                    status: IoStatus::Completed,
                    bytes: None,
                    text: None,
                    bytes_processed: transferred,
                    error: None,
                    duration: submitted.elapsed(),
                },
                Err(e) => IoResult::failed(id, e, submitted.elapsed()),
            }
        }
    }
}

fn read_result(id: Uuid, bytes: Vec<u8>, as_text: bool, submitted: Instant) -> IoResult {
    let bytes_processed = bytes.len() as u64;
    let text = as_text.then(|| String::from_utf8_lossy(&bytes).into_owned());
    IoResult {
        id,
        status: IoStatus::Completed,
        bytes: Some(bytes),
        text,
        bytes_processed,
        error: None,
        duration: submitted.elapsed(),
    }
}

async fn read_file_bytes(shared: &Arc<EngineShared>, path: &Path) -> IoEngineResult<Vec<u8>> {
    let start = Instant::now();
    let mut file = tokio::fs::File::open(path).await?;
    let chunk_size = shared.buffers.current_size(BufferClass::FileRead);
    let mut data = Vec::new();
    let mut chunk = vec![0u8; chunk_size];
    loop {
        let n = file.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..n]);
    }
    shared
        .buffers
        .record_operation(BufferClass::FileRead, data.len() as u64, start.elapsed());
    Ok(data)
}

async fn write_file_bytes(
    shared: &Arc<EngineShared>,
    path: &Path,
    contents: &[u8],
) -> IoEngineResult<u64> {
    let start = Instant::now();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let chunk_size = shared.buffers.current_size(BufferClass::FileWrite);
    let mut file = tokio::fs::File::create(path).await?;
    for chunk in contents.chunks(chunk_size.max(1)) {
        file.write_all(chunk).await?;
    }
    file.flush().await?;
    shared.buffers.record_operation(
        BufferClass::FileWrite,
        contents.len() as u64,
        start.elapsed(),
    );
    Ok(contents.len() as u64)
}

struct DownloadFailure {
    transient: bool,
    error: IoEngineError,
}

async fn download_with_retry(
    shared: &Arc<EngineShared>,
    url: &str,
    dest: &Path,
) -> IoEngineResult<u64> {
    let mut attempt = 0u32;
    loop {
        match try_download(shared, url, dest).await {
            Ok(transferred) => return Ok(transferred),
            Err(failure) => {
                if failure.transient && shared.network_retry {
                    if let Some(delay) = shared.retry.delay_for_attempt(attempt + 1) {
                        attempt += 1;
                        log::debug!(
                            "retrying download of {} (attempt {}) after {:?}",
                            url,
                            attempt,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                }
                return Err(failure.error);
            }
        }
    }
}

async fn try_download(
    shared: &Arc<EngineShared>,
    url: &str,
    dest: &Path,
) -> Result<u64, DownloadFailure> {
    let start = Instant::now();

    let response = shared.http.get(url).send().await.map_err(|e| DownloadFailure {
        transient: retry::is_transient_error(&e),
        error: IoEngineError::Network(e.to_string()),
    })?;

    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(DownloadFailure {
            transient: false,
            error: IoEngineError::NotFound(url.to_string()),
        });
    }
    if !status.is_success() {
        return Err(DownloadFailure {
            transient: retry::is_transient_status(status),
            error: IoEngineError::Network(format!("{} returned {}", url, status)),
        });
    }

    let bytes = response.bytes().await.map_err(|e| DownloadFailure {
        transient: true,
        error: IoEngineError::Network(e.to_string()),
    })?;

    write_file_bytes(shared, dest, &bytes)
        .await
        .map_err(|e| DownloadFailure {
            transient: false,
            error: e,
        })?;

    shared.buffers.record_operation(
        BufferClass::NetworkDownload,
        bytes.len() as u64,
        start.elapsed(),
    );
    Ok(bytes.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().expect("tempdir")
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let engine = IoEngine::new(IoEngineConfig::default());
        let dir = temp_dir();
        let path = dir.path().join("roundtrip.txt");

        let write = engine.write_file(&path, "hello engine").join().await;
        assert!(write.is_ok());
        assert_eq!(write.bytes_processed, 12);

        let read = engine.read_file(&path, true).join().await;
        assert!(read.is_ok());
        assert_eq!(read.text.as_deref(), Some("hello engine"));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_read_missing_file_fails_with_not_found() {
        let engine = IoEngine::new(IoEngineConfig::default());
        let dir = temp_dir();

        let result = engine
            .read_file(dir.path().join("absent.txt"), false)
            .join()
            .await;
        assert_eq!(result.status, IoStatus::Failed);
        assert!(matches!(result.error, Some(IoEngineError::NotFound(_))));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_batch_operations() {
        let engine = IoEngine::new(IoEngineConfig::default());
        let dir = temp_dir();

        let items: Vec<(PathBuf, String)> = (0..5)
            .map(|i| {
                (
                    dir.path().join(format!("batch_{}.txt", i)),
                    format!("file {} contents", i),
                )
            })
            .collect();
        let paths: Vec<PathBuf> = items.iter().map(|(p, _)| p.clone()).collect();

        for handle in engine.write_files(items) {
            assert!(handle.join().await.is_ok());
        }
        for handle in engine.read_files(paths, true) {
            let result = handle.join().await;
            assert!(result.is_ok());
            assert!(result.text.unwrap().contains("contents"));
        }

        let stats = engine.stats();
        assert_eq!(stats.completed_operations, 10);
        assert_eq!(stats.failed_operations, 0);
        assert!(stats.total_bytes_processed > 0);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_cancelled() {
        let engine = IoEngine::new(IoEngineConfig::default());
        engine.shutdown().await;

        let result = engine.read_file("/tmp/never-read.txt", false).join().await;
        assert_eq!(result.status, IoStatus::Cancelled);
        assert!(matches!(result.error, Some(IoEngineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_preread_cache_serves_repeat_reads() {
        let engine = IoEngine::new(IoEngineConfig::default());
        let dir = temp_dir();
        let path = dir.path().join("hot.txt");

        engine.write_file(&path, "hot contents").join().await;
        // Build up a score, then pre-read.
        for _ in 0..3 {
            assert!(engine.read_file(&path, false).join().await.is_ok());
        }
        let queued = engine.trigger_pre_read();
        assert!(queued >= 1);

        // Give the pre-read a moment to land, then read again.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = engine.read_file(&path, true).join().await;
        assert!(result.is_ok());
        assert_eq!(result.text.as_deref(), Some("hot contents"));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_stats_track_failures() {
        let engine = IoEngine::new(IoEngineConfig::default());
        let dir = temp_dir();

        engine.write_file(dir.path().join("ok.txt"), "x").join().await;
        engine
            .read_file(dir.path().join("missing.txt"), false)
            .join()
            .await;

        let stats = engine.stats();
        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.completed_operations, 1);
        assert_eq!(stats.failed_operations, 1);
        assert!((stats.success_rate - 50.0).abs() < 1e-9);

        engine.shutdown().await;
    }
}
