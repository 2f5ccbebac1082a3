//! Serial connection lifecycle.
//!
//! A [`Session`] is one running reader/persister pair. The
//! [`SerialManager`] owns at most one session and is what the HTTP surface
//! and CLI talk to when connecting or disconnecting a port.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{Config, FramingConfig};
use crate::error::{Error, Result};
use crate::framing::FrameReassembler;
use crate::source::{ByteSource, SerialSource};
use crate::storage::ImageSink;

use super::{run_persister, run_receiver, ReceiverExit, ReceiverOptions, ReceiverStats, StatsSnapshot};

/// Opens byte sources for a port name and baud rate.
pub trait SourceOpener: Send + Sync {
    /// Open `port` at `baud_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`] if the port cannot be opened.
    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn ByteSource>>;
}

/// Opens real serial ports.
#[derive(Debug, Clone)]
pub struct SerialOpener {
    read_timeout: Duration,
    chunk_size: usize,
}

impl SerialOpener {
    /// Create an opener with the given read timeout and chunk size.
    #[must_use]
    pub fn new(read_timeout: Duration, chunk_size: usize) -> Self {
        Self {
            read_timeout,
            chunk_size,
        }
    }

    /// Opener using the serial settings from `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.read_timeout(), config.serial.chunk_size)
    }
}

impl SourceOpener for SerialOpener {
    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn ByteSource>> {
        let source = SerialSource::open(port, baud_rate, self.read_timeout, self.chunk_size)?;
        Ok(Box::new(source))
    }
}

/// A running reader and persister for one byte source.
#[derive(Debug)]
pub struct Session {
    port: String,
    baud_rate: u32,
    connected_at: DateTime<Utc>,
    stats: Arc<ReceiverStats>,
    shutdown: watch::Sender<bool>,
    done: watch::Receiver<Option<ReceiverExit>>,
    reader: JoinHandle<ReceiverExit>,
    persister: JoinHandle<()>,
}

impl Session {
    /// Start reading from `source`.
    ///
    /// `reassembler` must be fresh; each session starts in the idle state.
    pub fn spawn(
        mut source: Box<dyn ByteSource>,
        mut reassembler: FrameReassembler,
        sink: Arc<dyn ImageSink>,
        options: ReceiverOptions,
        baud_rate: u32,
    ) -> Self {
        let port = source.name().to_string();
        let stats = Arc::new(ReceiverStats::default());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (done_tx, done) = watch::channel(None);
        let (image_tx, image_rx) = mpsc::channel(options.channel_capacity.max(1));

        let persister = tokio::spawn(run_persister(
            sink,
            image_rx,
            port.clone(),
            stats.clone(),
        ));

        let reader_stats = stats.clone();
        let reader = tokio::spawn(async move {
            let exit = run_receiver(
                &mut *source,
                &mut reassembler,
                image_tx,
                shutdown_rx,
                &options,
                &reader_stats,
            )
            .await;
            let _ = done_tx.send(Some(exit));
            exit
        });

        info!("Session started on {} at {} baud", port, baud_rate);
        Self {
            port,
            baud_rate,
            connected_at: Utc::now(),
            stats,
            shutdown,
            done,
            reader,
            persister,
        }
    }

    /// Port or source name.
    #[must_use]
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Whether the reader has stopped on its own.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.done.borrow().is_some() || self.reader.is_finished()
    }

    /// Resolves once the reader has stopped.
    pub async fn closed(&self) {
        let mut done = self.done.clone();
        // An error means the reader is gone, which is what we wait for.
        let _ = done.wait_for(Option::is_some).await;
    }

    /// Why the reader stopped, once it has.
    #[must_use]
    pub fn exit(&self) -> Option<ReceiverExit> {
        *self.done.borrow()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Signal shutdown and wait for both tasks.
    pub async fn stop(self) -> ReceiverExit {
        // The reader may already be gone; nothing to signal then.
        let _ = self.shutdown.send(true);
        self.join().await
    }

    /// Wait for the reader to stop on its own, then for the persister to
    /// drain.
    pub async fn join(self) -> ReceiverExit {
        let exit = match self.reader.await {
            Ok(exit) => exit,
            Err(err) => {
                error!("Reader task for {} failed: {}", self.port, err);
                ReceiverExit::Aborted
            }
        };
        if let Err(err) = self.persister.await {
            error!("Persister task for {} failed: {}", self.port, err);
        }
        exit
    }
}

/// Connection status reported to clients.
#[derive(Debug, Clone, Serialize)]
pub struct SerialStatus {
    /// Whether a session is reading.
    pub connected: bool,
    /// Port of the current or last session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Baud rate of the current or last session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,
    /// When the session started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    /// Why the last session ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<ReceiverExit>,
    /// Session counters and reassembler state.
    pub stats: StatsSnapshot,
}

impl SerialStatus {
    fn idle() -> Self {
        Self {
            connected: false,
            port: None,
            baud_rate: None,
            connected_at: None,
            exit: None,
            stats: StatsSnapshot::default(),
        }
    }
}

/// Owns the active serial session, if any.
pub struct SerialManager {
    opener: Arc<dyn SourceOpener>,
    sink: Arc<dyn ImageSink>,
    framing: FramingConfig,
    options: ReceiverOptions,
    session: Option<Session>,
    last: Option<SerialStatus>,
}

impl std::fmt::Debug for SerialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialManager")
            .field("framing", &self.framing)
            .field("options", &self.options)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl SerialManager {
    /// Create a manager with an explicit opener.
    pub fn new(
        opener: Arc<dyn SourceOpener>,
        sink: Arc<dyn ImageSink>,
        framing: FramingConfig,
        options: ReceiverOptions,
    ) -> Self {
        Self {
            opener,
            sink,
            framing,
            options,
            session: None,
            last: None,
        }
    }

    /// Create a manager that opens real serial ports.
    pub fn from_config(config: &Config, sink: Arc<dyn ImageSink>) -> Self {
        Self::new(
            Arc::new(SerialOpener::from_config(config)),
            sink,
            config.framing.clone(),
            ReceiverOptions::from_config(config),
        )
    }

    /// Connect to `port`, replacing any existing session.
    ///
    /// Every connection starts with a fresh, idle reassembler. The previous
    /// session is stopped first so the same port can be reopened.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`] if the port cannot be opened, or
    /// a configuration error if the framing markers are invalid.
    pub async fn connect(&mut self, port: &str, baud_rate: u32) -> Result<()> {
        let reassembler = FrameReassembler::from_config(&self.framing)?;

        if let Some(previous) = self.session.take() {
            info!("Replacing session on {}", previous.port());
            self.retire(previous, true).await;
        }

        let source = self.opener.open(port, baud_rate)?;
        self.start(source, reassembler, baud_rate);
        Ok(())
    }

    /// Start a session on an already opened source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConnected`] if a session is still reading, or a
    /// configuration error if the framing markers are invalid.
    pub async fn attach(&mut self, source: Box<dyn ByteSource>, baud_rate: u32) -> Result<()> {
        if let Some(session) = &self.session {
            if !session.is_finished() {
                return Err(Error::AlreadyConnected {
                    port: session.port().to_string(),
                });
            }
        }

        let reassembler = FrameReassembler::from_config(&self.framing)?;
        if let Some(finished) = self.session.take() {
            self.retire(finished, false).await;
        }
        self.start(source, reassembler, baud_rate);
        Ok(())
    }

    fn start(&mut self, source: Box<dyn ByteSource>, reassembler: FrameReassembler, baud_rate: u32) {
        self.session = Some(Session::spawn(
            source,
            reassembler,
            self.sink.clone(),
            self.options.clone(),
            baud_rate,
        ));
    }

    /// Wait for `session` to end and remember how it went.
    async fn retire(&mut self, session: Session, stop: bool) -> ReceiverExit {
        let stats = session.stats.clone();
        let mut summary = Self::describe(&session);

        let exit = if stop {
            session.stop().await
        } else {
            session.join().await
        };

        summary.connected = false;
        summary.exit = Some(exit);
        summary.stats = stats.snapshot();
        self.last = Some(summary);
        exit
    }

    fn describe(session: &Session) -> SerialStatus {
        SerialStatus {
            connected: !session.is_finished(),
            port: Some(session.port.clone()),
            baud_rate: Some(session.baud_rate),
            connected_at: Some(session.connected_at),
            exit: session.exit(),
            stats: session.stats(),
        }
    }

    /// Stop the active session.
    ///
    /// Returns `None` when nothing was connected; calling it twice is safe.
    pub async fn disconnect(&mut self) -> Option<ReceiverExit> {
        let session = self.session.take()?;
        let port = session.port().to_string();
        let exit = self.retire(session, true).await;
        info!("Disconnected from {} ({})", port, exit);
        Some(exit)
    }

    /// Wait for the active session to end on its own and its images to be
    /// persisted.
    pub async fn wait(&mut self) -> Option<ReceiverExit> {
        let session = self.session.take()?;
        Some(self.retire(session, false).await)
    }

    /// Resolves once the active session stops reading on its own.
    ///
    /// Returns immediately when nothing is connected.
    pub async fn closed(&self) {
        if let Some(session) = &self.session {
            session.closed().await;
        }
    }

    /// Whether a session is currently reading.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_finished())
    }

    /// Status of the active session, or a summary of the last one.
    #[must_use]
    pub fn status(&self) -> SerialStatus {
        match (&self.session, &self.last) {
            (Some(session), _) => Self::describe(session),
            (None, Some(last)) => last.clone(),
            (None, None) => SerialStatus::idle(),
        }
    }
}
