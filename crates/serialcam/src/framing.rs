//! Marker-delimited frame reassembly.
//!
//! A [`FrameReassembler`] turns an unbounded sequence of raw byte chunks into
//! complete image payloads. Payloads are delimited in-band by a start and an
//! end marker; chunk boundaries carry no meaning relative to the markers.
//!
//! The reassembler performs no I/O. Callers feed it chunks in arrival order
//! and hand any returned payload to an [`ImageSink`](crate::storage::ImageSink).

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::config::FramingConfig;
use crate::error::{Error, Result};

/// Start marker sent by the camera firmware.
pub const DEFAULT_START_MARKER: &str = "START_IMAGE";

/// End marker sent by the camera firmware.
pub const DEFAULT_END_MARKER: &str = "END_IMAGE";

/// The pair of byte patterns delimiting one image payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    start: Vec<u8>,
    end: Vec<u8>,
}

impl Markers {
    /// Create a marker pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] if either marker is empty.
    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Result<Self> {
        let start = start.into();
        let end = end.into();
        if start.is_empty() || end.is_empty() {
            return Err(Error::ConfigValidation {
                message: "start and end markers must not be empty".to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// The start marker bytes.
    #[must_use]
    pub fn start(&self) -> &[u8] {
        &self.start
    }

    /// The end marker bytes.
    #[must_use]
    pub fn end(&self) -> &[u8] {
        &self.end
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            start: DEFAULT_START_MARKER.as_bytes().to_vec(),
            end: DEFAULT_END_MARKER.as_bytes().to_vec(),
        }
    }
}

/// Whether the reassembler is currently collecting payload bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    /// Waiting for a start marker.
    #[default]
    Idle,
    /// Accumulating payload until the end marker.
    Capturing,
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Capturing => write!(f, "capturing"),
        }
    }
}

/// Reassembles marker-delimited payloads from a chunked byte stream.
///
/// While idle, chunks without the start marker are dropped. The first start
/// marker begins a capture; whatever follows it in the same chunk is already
/// payload. While capturing, chunks are appended verbatim until one contains
/// the end marker, whose preceding bytes complete the payload. Bytes after
/// the end marker in that chunk are discarded.
///
/// By default markers are only detected when they lie wholly inside one
/// chunk. [`with_span_chunks`](Self::with_span_chunks) enables detection of
/// markers split across two consecutive chunks.
///
/// A reassembler is owned by a single reader; `process` takes `&mut self`.
#[derive(Debug)]
pub struct FrameReassembler {
    markers: Markers,
    state: CaptureState,
    buffer: Vec<u8>,
    /// Trailing bytes of the previous idle chunk, kept only with `span_chunks`.
    tail: Vec<u8>,
    span_chunks: bool,
    max_image_bytes: Option<usize>,
    /// Captures dropped for exceeding `max_image_bytes`, not yet taken.
    oversized: usize,
}

impl FrameReassembler {
    /// Create an idle reassembler for the given markers.
    #[must_use]
    pub fn new(markers: Markers) -> Self {
        Self {
            markers,
            state: CaptureState::Idle,
            buffer: Vec::new(),
            tail: Vec::new(),
            span_chunks: false,
            max_image_bytes: None,
            oversized: 0,
        }
    }

    /// Build a reassembler from framing configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured markers are empty.
    pub fn from_config(config: &FramingConfig) -> Result<Self> {
        let markers = Markers::new(config.start_marker.as_bytes(), config.end_marker.as_bytes())?;
        Ok(Self::new(markers)
            .with_span_chunks(config.span_chunks)
            .with_max_image_bytes(config.max_image_bytes))
    }

    /// Detect markers that straddle a chunk boundary.
    #[must_use]
    pub fn with_span_chunks(mut self, enabled: bool) -> Self {
        self.span_chunks = enabled;
        self
    }

    /// Abandon any capture whose payload grows beyond `max` bytes.
    #[must_use]
    pub fn with_max_image_bytes(mut self, max: usize) -> Self {
        self.max_image_bytes = Some(max);
        self
    }

    /// The markers this reassembler looks for.
    #[must_use]
    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    /// Current capture state.
    #[must_use]
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Whether a capture is in progress.
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.state == CaptureState::Capturing
    }

    /// Number of captures dropped by the size limit since the last call.
    ///
    /// A capture can start and overflow within a single chunk, so this is
    /// the only reliable way to observe those drops.
    pub fn take_oversized(&mut self) -> usize {
        std::mem::take(&mut self.oversized)
    }

    /// Number of payload bytes collected for the current capture.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Feed the next chunk from the byte source.
    ///
    /// Returns the completed payload when this chunk finishes a capture.
    pub fn process(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        if chunk.is_empty() {
            return None;
        }
        trace!(len = chunk.len(), state = %self.state, "chunk received");

        match self.state {
            CaptureState::Idle => {
                let offset = self.locate_start(chunk)?;
                debug!("start marker detected");
                self.state = CaptureState::Capturing;
                self.buffer.clear();
                self.capture(&chunk[offset..])
            }
            CaptureState::Capturing => self.capture(chunk),
        }
    }

    /// Drop any partial capture and return to idle.
    pub fn reset(&mut self) {
        self.state = CaptureState::Idle;
        self.buffer.clear();
        self.tail.clear();
    }

    /// Abandon the current capture.
    ///
    /// Returns the number of payload bytes discarded, or `None` if no capture
    /// was in progress.
    pub fn abandon(&mut self) -> Option<usize> {
        let dropped = self.is_capturing().then_some(self.buffer.len());
        self.reset();
        dropped
    }

    /// Offset in `chunk` just past the start marker, if one is found.
    fn locate_start(&mut self, chunk: &[u8]) -> Option<usize> {
        let marker_len = self.markers.start.len();
        if !self.span_chunks {
            return find(chunk, &self.markers.start).map(|pos| pos + marker_len);
        }

        let mut window = std::mem::take(&mut self.tail);
        let carried = window.len();
        window.extend_from_slice(chunk);

        if let Some(pos) = find(&window, &self.markers.start) {
            // The tail is shorter than the marker, so a match always ends in `chunk`.
            return Some(pos + marker_len - carried);
        }

        let keep = window.len().min(marker_len - 1);
        window.drain(..window.len() - keep);
        self.tail = window;
        None
    }

    fn capture(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        if chunk.is_empty() {
            return None;
        }

        let completed = if self.span_chunks {
            self.append_spanning(chunk)
        } else {
            self.append(chunk)
        };

        if let Some(max) = self.max_image_bytes {
            if self.buffer.len() > max {
                warn!(
                    buffered = self.buffer.len(),
                    max, "capture exceeded size limit, abandoning"
                );
                self.reset();
                self.oversized += 1;
                return None;
            }
        }

        if !completed {
            return None;
        }

        self.state = CaptureState::Idle;
        self.tail.clear();
        let image = std::mem::take(&mut self.buffer);
        debug!(len = image.len(), "end marker detected, image complete");
        Some(image)
    }

    /// Append `chunk`, stopping at the end marker. Returns whether it was found.
    fn append(&mut self, chunk: &[u8]) -> bool {
        match find(chunk, &self.markers.end) {
            Some(pos) => {
                self.buffer.extend_from_slice(&chunk[..pos]);
                true
            }
            None => {
                self.buffer.extend_from_slice(chunk);
                false
            }
        }
    }

    /// Like [`append`](Self::append), but also matches an end marker whose
    /// first bytes were appended with the previous chunk.
    fn append_spanning(&mut self, chunk: &[u8]) -> bool {
        let overlap = self.buffer.len().min(self.markers.end.len() - 1);
        let search_from = self.buffer.len() - overlap;
        self.buffer.extend_from_slice(chunk);

        match find(&self.buffer[search_from..], &self.markers.end) {
            Some(pos) => {
                self.buffer.truncate(search_from + pos);
                true
            }
            None => false,
        }
    }
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new(Markers::default())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
