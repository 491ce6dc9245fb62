//! Frame events and the listener seam.
//!
//! A [`FrameEvent`] is the fundamental unit that flows out of the slicing
//! engine: one JPEG payload cut from the stream, stamped with its source,
//! wall-clock creation time, and session-local sequence number. Events are
//! immutable after construction; the payload is handed out as a [`Bytes`]
//! handle, so observers can keep or copy it without being able to mutate the
//! engine's data.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::{Result, SliceError};

/// Opaque identity of a producing stream.
///
/// Used for attribution and equality only; every [`Slicer`](crate::Slicer)
/// gets a process-unique id at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

impl SourceId {
    /// Allocate the next process-unique source id.
    pub(crate) fn next() -> Self {
        SourceId(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// One JPEG frame sliced from an M-JPEG stream.
#[derive(Debug, Clone)]
pub struct FrameEvent {
    source: SourceId,
    created_at_ms: u64,
    sequence: u64,
    payload: Bytes,
}

impl FrameEvent {
    /// Create a frame event.
    ///
    /// # Errors
    ///
    /// An empty payload is a data-corruption error; a frame event is never
    /// constructed without payload bytes.
    pub fn new(
        source: SourceId,
        created_at_ms: u64,
        sequence: u64,
        payload: Bytes,
    ) -> Result<Self> {
        if payload.is_empty() {
            return Err(SliceError::corruption("frame payload must not be empty"));
        }
        Ok(Self { source, created_at_ms, sequence, payload })
    }

    /// Identity of the stream this frame was sliced from.
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Creation timestamp in milliseconds since the Unix epoch.
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Creation timestamp as a [`SystemTime`].
    pub fn created_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.created_at_ms)
    }

    /// Session-local sequence number, starting at 1 for the first frame.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The JPEG payload.
    ///
    /// The returned handle shares the underlying immutable buffer; cloning
    /// it is cheap and cannot mutate the event.
    pub fn payload(&self) -> Bytes {
        self.payload.clone()
    }

    /// Length of the payload in bytes. Always greater than zero.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Copy the payload into a fresh `Vec<u8>`.
    pub fn to_vec(&self) -> Vec<u8> {
        self.payload.to_vec()
    }

    /// Decode the payload as a JPEG image.
    ///
    /// The slicer itself treats payloads as opaque bytes; this is the
    /// optional decodability check delegated to the `image` codec.
    ///
    /// # Errors
    ///
    /// Payload bytes that do not decode as JPEG are a data-corruption error.
    pub fn decode(&self) -> Result<image::DynamicImage> {
        image::load_from_memory_with_format(&self.payload, image::ImageFormat::Jpeg)
            .map_err(|e| SliceError::corruption_with_source("frame payload is not valid JPEG", e))
    }
}

impl fmt::Display for FrameEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FrameEvent[{}, seq={}, created={}ms, {} bytes]",
            self.source,
            self.sequence,
            self.created_at_ms,
            self.payload.len()
        )
    }
}

/// Observers that want each sliced frame implement this trait.
///
/// `on_frame` runs synchronously on the engine's worker task, in
/// registration order; implementations should hand heavy work off to their
/// own executor rather than block the slicing loop.
pub trait FrameListener: Send + Sync {
    /// Notification for one sliced frame.
    fn on_frame(&self, event: &FrameEvent);

    /// Whether this listener has permanently stopped accepting frames.
    ///
    /// Closed listeners are skipped and removed from the fan-out on the
    /// next dispatch. The default never closes.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
