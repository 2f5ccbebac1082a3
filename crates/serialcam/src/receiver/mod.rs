//! The consumer loop connecting a byte source to the image sink.
//!
//! One reader task owns the [`FrameReassembler`] and feeds it chunks in
//! arrival order. Completed images go over an `mpsc` channel to a persister
//! task, so writing an image overlaps with reading the next chunks.

mod session;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::framing::{CaptureState, FrameReassembler};
use crate::source::ByteSource;
use crate::storage::ImageSink;

pub use session::{SerialManager, SerialOpener, SerialStatus, Session, SourceOpener};

/// Tuning for the consumer loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverOptions {
    /// Abandon captures open longer than this.
    pub capture_timeout: Option<Duration>,
    /// Give up after this many failed reads in a row.
    pub max_consecutive_errors: u32,
    /// Completed images queued for the persister before the reader waits.
    pub channel_capacity: usize,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            capture_timeout: Some(Duration::from_secs(30)),
            max_consecutive_errors: 5,
            channel_capacity: 8,
        }
    }
}

impl ReceiverOptions {
    /// Options derived from the configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            capture_timeout: config.capture_timeout(),
            ..Self::default()
        }
    }
}

/// Why the consumer loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverExit {
    /// Shutdown was requested.
    Shutdown,
    /// The byte source closed.
    SourceClosed,
    /// Too many consecutive read failures.
    TooManyErrors,
    /// The persister went away.
    SinkClosed,
    /// The reader task panicked or was cancelled.
    Aborted,
}

impl std::fmt::Display for ReceiverExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shutdown => write!(f, "shutdown"),
            Self::SourceClosed => write!(f, "source closed"),
            Self::TooManyErrors => write!(f, "too many read errors"),
            Self::SinkClosed => write!(f, "sink closed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Live counters for one session.
#[derive(Debug, Default)]
pub struct ReceiverStats {
    chunks_read: AtomicU64,
    bytes_read: AtomicU64,
    images_completed: AtomicU64,
    images_stored: AtomicU64,
    images_rejected: AtomicU64,
    captures_abandoned: AtomicU64,
    capturing: AtomicBool,
    buffered_bytes: AtomicU64,
}

/// Point-in-time copy of [`ReceiverStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Non-empty chunks read from the source.
    pub chunks_read: u64,
    /// Bytes read from the source.
    pub bytes_read: u64,
    /// Images returned by the reassembler.
    pub images_completed: u64,
    /// Images written by the sink.
    pub images_stored: u64,
    /// Images the sink rejected or failed to write.
    pub images_rejected: u64,
    /// Captures dropped by timeout, size limit or disconnect.
    pub captures_abandoned: u64,
    /// Reassembler state after the last chunk.
    pub state: CaptureState,
    /// Payload bytes buffered for the current capture.
    pub buffered_bytes: u64,
}

impl ReceiverStats {
    /// Take a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let state = if self.capturing.load(Ordering::Relaxed) {
            CaptureState::Capturing
        } else {
            CaptureState::Idle
        };
        StatsSnapshot {
            chunks_read: self.chunks_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            images_completed: self.images_completed.load(Ordering::Relaxed),
            images_stored: self.images_stored.load(Ordering::Relaxed),
            images_rejected: self.images_rejected.load(Ordering::Relaxed),
            captures_abandoned: self.captures_abandoned.load(Ordering::Relaxed),
            state,
            buffered_bytes: self.buffered_bytes.load(Ordering::Relaxed),
        }
    }

    fn record_chunk(&self, len: usize) {
        self.chunks_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(len as u64, Ordering::Relaxed);
    }

    fn record_reassembler(&self, reassembler: &FrameReassembler) {
        self.capturing
            .store(reassembler.is_capturing(), Ordering::Relaxed);
        self.buffered_bytes
            .store(reassembler.buffered_len() as u64, Ordering::Relaxed);
    }

    fn record_abandoned(&self) {
        self.record_abandoned_n(1);
    }

    fn record_abandoned_n(&self, count: usize) {
        self.captures_abandoned
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Read chunks from `source` until shutdown, feeding `reassembler` and
/// forwarding completed images to `images`.
///
/// A capture still open when the loop ends is abandoned.
pub async fn run_receiver<S>(
    source: &mut S,
    reassembler: &mut FrameReassembler,
    images: mpsc::Sender<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
    options: &ReceiverOptions,
    stats: &ReceiverStats,
) -> ReceiverExit
where
    S: ByteSource + ?Sized,
{
    let mut capture_started: Option<Instant> = None;
    let mut consecutive_errors = 0u32;

    let exit = loop {
        if *shutdown.borrow() {
            break ReceiverExit::Shutdown;
        }

        let read = tokio::select! {
            biased;
            _ = shutdown.changed() => None,
            read = source.read_chunk() => Some(read),
        };
        let Some(read) = read else {
            break ReceiverExit::Shutdown;
        };

        let chunk = match read {
            Ok(chunk) => {
                consecutive_errors = 0;
                chunk
            }
            Err(err) if err.is_source_closed() => break ReceiverExit::SourceClosed,
            Err(err) => {
                consecutive_errors += 1;
                warn!("Read from {} failed: {}", source.name(), err);
                if consecutive_errors >= options.max_consecutive_errors {
                    error!(
                        "Giving up on {} after {} failed reads",
                        source.name(),
                        consecutive_errors
                    );
                    break ReceiverExit::TooManyErrors;
                }
                continue;
            }
        };

        if !chunk.is_empty() {
            stats.record_chunk(chunk.len());
        }

        let was_capturing = reassembler.is_capturing();
        match reassembler.process(&chunk) {
            Some(image) => {
                capture_started = None;
                stats.images_completed.fetch_add(1, Ordering::Relaxed);
                debug!("Image of {} bytes complete", image.len());
                if images.send(image).await.is_err() {
                    break ReceiverExit::SinkClosed;
                }
            }
            None if !was_capturing && reassembler.is_capturing() => {
                capture_started = Some(Instant::now());
            }
            None => {}
        }

        let oversized = reassembler.take_oversized();
        if oversized > 0 {
            capture_started = None;
            stats.record_abandoned_n(oversized);
        }

        if let (Some(limit), Some(started)) = (options.capture_timeout, capture_started) {
            if started.elapsed() >= limit {
                if let Some(dropped) = reassembler.abandon() {
                    warn!(
                        "Capture on {} timed out after {:?}, dropped {} bytes",
                        source.name(),
                        limit,
                        dropped
                    );
                    stats.record_abandoned();
                }
                capture_started = None;
            }
        }

        stats.record_reassembler(reassembler);
    };

    if let Some(dropped) = reassembler.abandon() {
        warn!(
            "Capture on {} truncated ({}), dropped {} bytes",
            source.name(),
            exit,
            dropped
        );
        stats.record_abandoned();
    }
    stats.record_reassembler(reassembler);

    info!("Receiver for {} stopped: {}", source.name(), exit);
    exit
}

/// Hand completed images to `sink` until the channel closes.
///
/// Sink failures are logged and counted; they never stop the loop.
pub async fn run_persister(
    sink: Arc<dyn ImageSink>,
    mut images: mpsc::Receiver<Vec<u8>>,
    origin: String,
    stats: Arc<ReceiverStats>,
) {
    while let Some(image) = images.recv().await {
        match sink.persist(image, &origin).await {
            Ok(Some(_)) => {
                stats.images_stored.fetch_add(1, Ordering::Relaxed);
            }
            Ok(None) => debug!("Image from {} skipped as duplicate", origin),
            Err(err @ Error::DecodeFailure { .. }) => {
                stats.images_rejected.fetch_add(1, Ordering::Relaxed);
                warn!("Discarding image from {}: {}", origin, err);
            }
            Err(err) => {
                stats.images_rejected.fetch_add(1, Ordering::Relaxed);
                error!("Failed to store image from {}: {}", origin, err);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::Result;
    use crate::storage::{ImageSink, StoredImage};

    /// Sink that keeps images in memory.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub images: Mutex<Vec<Vec<u8>>>,
        pub reject: bool,
    }

    impl RecordingSink {
        pub fn images(&self) -> Vec<Vec<u8>> {
            self.images.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ImageSink for RecordingSink {
        async fn persist(&self, image: Vec<u8>, origin: &str) -> Result<Option<StoredImage>> {
            if self.reject {
                return Err(crate::error::Error::decode_failure("rejected by test sink"));
            }
            let stored = StoredImage::new(
                "memory.jpg".to_string(),
                chrono::Utc::now(),
                &image,
                Some(origin.to_string()),
            );
            self.images.lock().unwrap().push(image);
            Ok(Some(stored))
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::testing::RecordingSink;
    use super::*;
    use crate::error::Result;
    use crate::framing::Markers;
    use crate::source::ScriptedSource;

    fn reassembler() -> FrameReassembler {
        FrameReassembler::new(Markers::new("START_IMG", "_END").unwrap())
    }

    fn chunks(items: &[&[u8]]) -> ScriptedSource {
        ScriptedSource::new(items.iter().map(|c| c.to_vec()))
    }

    async fn drain(
        mut source: ScriptedSource,
        options: ReceiverOptions,
    ) -> (ReceiverExit, Vec<Vec<u8>>, StatsSnapshot) {
        crate::logging::init_test_logging();
        let (tx, mut rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = ReceiverStats::default();
        let mut r = reassembler();

        let exit = run_receiver(&mut source, &mut r, tx, shutdown_rx, &options, &stats).await;

        let mut images = Vec::new();
        while let Some(image) = rx.recv().await {
            images.push(image);
        }
        (exit, images, stats.snapshot())
    }

    /// Never yields data.
    struct PendingSource;

    #[async_trait]
    impl ByteSource for PendingSource {
        fn name(&self) -> &str {
            "pending"
        }

        async fn read_chunk(&mut self) -> Result<Vec<u8>> {
            std::future::pending().await
        }
    }

    /// Always fails to read.
    struct BrokenSource;

    #[async_trait]
    impl ByteSource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        async fn read_chunk(&mut self) -> Result<Vec<u8>> {
            Err(Error::SourceRead {
                name: "broken".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "EIO"),
            })
        }
    }

    #[tokio::test]
    async fn test_documented_scenario_end_to_end() {
        let source = chunks(&[b"garbage", b"START_IMGpayload1", b"more", b"_ENDtrailing"]);
        let (exit, images, stats) = drain(source, ReceiverOptions::default()).await;

        assert_eq!(exit, ReceiverExit::SourceClosed);
        assert_eq!(images, vec![b"payload1more".to_vec()]);
        assert_eq!(stats.chunks_read, 4);
        assert_eq!(stats.images_completed, 1);
        assert_eq!(stats.captures_abandoned, 0);
        assert_eq!(stats.state, CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_empty_reads_are_not_counted() {
        let source = chunks(&[b"", b"START_IMGa", b"", b"b_END"]);
        let (_, images, stats) = drain(source, ReceiverOptions::default()).await;

        assert_eq!(images, vec![b"ab".to_vec()]);
        assert_eq!(stats.chunks_read, 2);
        assert_eq!(stats.bytes_read, 15);
    }

    #[tokio::test]
    async fn test_disconnect_mid_capture_is_abandoned() {
        let source = chunks(&[b"START_IMGhalf", b"an image"]);
        let (exit, images, stats) = drain(source, ReceiverOptions::default()).await;

        assert_eq!(exit, ReceiverExit::SourceClosed);
        assert!(images.is_empty());
        assert_eq!(stats.captures_abandoned, 1);
        assert_eq!(stats.state, CaptureState::Idle);
        assert_eq!(stats.buffered_bytes, 0);
    }

    #[tokio::test]
    async fn test_capture_timeout_abandons() {
        let options = ReceiverOptions {
            capture_timeout: Some(Duration::ZERO),
            ..ReceiverOptions::default()
        };
        let source = chunks(&[b"START_IMGslow", b"payload_END"]);
        let (_, images, stats) = drain(source, options).await;

        assert!(images.is_empty());
        assert_eq!(stats.captures_abandoned, 1);
    }

    #[tokio::test]
    async fn test_size_limit_counts_as_abandoned() {
        let (tx, _rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = ReceiverStats::default();
        let mut r = reassembler().with_max_image_bytes(4);
        let mut source = chunks(&[b"START_IMG123", b"456"]);

        run_receiver(
            &mut source,
            &mut r,
            tx,
            shutdown_rx,
            &ReceiverOptions::default(),
            &stats,
        )
        .await;

        assert_eq!(stats.snapshot().captures_abandoned, 1);
    }

    #[tokio::test]
    async fn test_oversized_start_chunk_counts_as_abandoned() {
        let (tx, _rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = ReceiverStats::default();
        let mut r = reassembler().with_max_image_bytes(4);
        let mut source = chunks(&[b"START_IMG123456789", b"_END"]);

        let exit = run_receiver(
            &mut source,
            &mut r,
            tx,
            shutdown_rx,
            &ReceiverOptions::default(),
            &stats,
        )
        .await;

        assert_eq!(exit, ReceiverExit::SourceClosed);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.captures_abandoned, 1);
        assert_eq!(snapshot.images_completed, 0);
    }

    #[tokio::test]
    async fn test_two_cycles_in_order() {
        let source = chunks(&[b"START_IMGA", b"_END", b"noise", b"START_IMGB_END"]);
        let (_, images, stats) = drain(source, ReceiverOptions::default()).await;

        assert_eq!(images, vec![b"A".to_vec(), b"B".to_vec()]);
        assert_eq!(stats.images_completed, 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_pending_read() {
        let (tx, _rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(ReceiverStats::default());

        let task_stats = stats.clone();
        let handle = tokio::spawn(async move {
            let mut source = PendingSource;
            let mut r = reassembler();
            run_receiver(
                &mut source,
                &mut r,
                tx,
                shutdown_rx,
                &ReceiverOptions::default(),
                &task_stats,
            )
            .await
        });

        shutdown_tx.send(true).unwrap();
        let exit = handle.await.unwrap();
        assert_eq!(exit, ReceiverExit::Shutdown);
    }

    #[tokio::test]
    async fn test_repeated_read_errors_give_up() {
        let (tx, _rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = ReceiverStats::default();
        let options = ReceiverOptions {
            max_consecutive_errors: 3,
            ..ReceiverOptions::default()
        };

        let exit = run_receiver(
            &mut BrokenSource,
            &mut reassembler(),
            tx,
            shutdown_rx,
            &options,
            &stats,
        )
        .await;
        assert_eq!(exit, ReceiverExit::TooManyErrors);
    }

    #[tokio::test]
    async fn test_closed_sink_stops_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = ReceiverStats::default();
        let mut source = chunks(&[b"START_IMGx_END", b"more"]);

        let exit = run_receiver(
            &mut source,
            &mut reassembler(),
            tx,
            shutdown_rx,
            &ReceiverOptions::default(),
            &stats,
        )
        .await;
        assert_eq!(exit, ReceiverExit::SinkClosed);
    }

    #[tokio::test]
    async fn test_persister_counts_results() {
        let stats = Arc::new(ReceiverStats::default());
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::channel(4);

        tx.send(b"one".to_vec()).await.unwrap();
        tx.send(b"two".to_vec()).await.unwrap();
        drop(tx);

        run_persister(sink.clone(), rx, "scripted".to_string(), stats.clone()).await;

        assert_eq!(sink.images(), vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(stats.snapshot().images_stored, 2);
    }

    #[tokio::test]
    async fn test_persister_survives_rejections() {
        let stats = Arc::new(ReceiverStats::default());
        let sink = Arc::new(RecordingSink {
            reject: true,
            ..RecordingSink::default()
        });
        let (tx, rx) = mpsc::channel(4);

        tx.send(b"bad".to_vec()).await.unwrap();
        tx.send(b"worse".to_vec()).await.unwrap();
        drop(tx);

        run_persister(sink, rx, "scripted".to_string(), stats.clone()).await;
        assert_eq!(stats.snapshot().images_rejected, 2);
    }

    #[test]
    fn test_receiver_exit_display() {
        assert_eq!(ReceiverExit::SourceClosed.to_string(), "source closed");
        assert_eq!(ReceiverExit::Shutdown.to_string(), "shutdown");
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.framing.capture_timeout_secs = 0;
        assert!(ReceiverOptions::from_config(&config).capture_timeout.is_none());
    }
}
