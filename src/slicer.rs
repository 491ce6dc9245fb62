//! The slicing engine: lifecycle, worker loop, and session outcome.
//!
//! A [`Slicer`] owns one slicing session at a time. `start` hands it an open
//! byte stream and spawns a worker task that repeatedly reads a header
//! block, interprets the declared length, reads the payload, and fans the
//! resulting [`FrameEvent`] out to registered listeners, strictly in slice
//! order with one frame in flight.
//!
//! Lifecycle is an explicit state machine (`Stopped → Starting → Running →
//! Stopping → Stopped`) behind a single mutex, so `start`/`stop` races are
//! well defined. Every blocking read in the worker is raced against a
//! [`CancellationToken`]; `stop` cancels the token and awaits the worker's
//! join handle, so no reader task survives `stop`'s return. When the worker
//! exits (clean end of stream, fatal error, or cancellation) it publishes
//! a [`SessionOutcome`] on a watch channel so a background failure is never
//! silently swallowed.
//!
//! ```rust,no_run
//! use framesaw::{Slicer, FrameEvent, FrameListener};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl FrameListener for Printer {
//!     fn on_frame(&self, event: &FrameEvent) {
//!         println!("frame {}: {} bytes", event.sequence(), event.payload_len());
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> framesaw::Result<()> {
//!     let slicer = Slicer::new();
//!     slicer.subscribe(Arc::new(Printer));
//!     let stream = tokio::net::TcpStream::connect("camera:80").await
//!         .map_err(|e| framesaw::SliceError::connection_failed_with_source("tcp", e))?;
//!     slicer.start(stream)?;
//!     let outcome = slicer.wait().await;
//!     println!("session ended after {} frames", outcome.frames);
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex};

use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event::{FrameEvent, FrameListener, SourceId, now_ms};
use crate::fanout::FrameFanout;
use crate::headers::HeaderBlock;
use crate::reader::{SliceCounters, SliceReader};
use crate::{Result, SliceError};

/// Lifecycle of a slicing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Control state guarded by a single mutex.
struct Control {
    lifecycle: Lifecycle,
    cancel: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
}

/// Terminal report of one slicing session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Frames delivered during the session.
    pub frames: u64,
    /// The fatal error that ended the session, or `None` for normal
    /// termination (end of data or an explicit `stop`).
    pub error: Option<Arc<SliceError>>,
}

impl SessionOutcome {
    /// Returns `true` when the session ended without a fatal error.
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

struct Inner {
    source: SourceId,
    control: Mutex<Control>,
    counters: Arc<SliceCounters>,
    fanout: FrameFanout,
    outcome_tx: watch::Sender<Option<SessionOutcome>>,
}

/// The M-JPEG slicing engine.
///
/// Cheap to clone-by-handle via its public API; all methods take `&self`.
pub struct Slicer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Slicer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slicer")
            .field("source", &self.inner.source)
            .finish_non_exhaustive()
    }
}

impl Default for Slicer {
    fn default() -> Self {
        Self::new()
    }
}

impl Slicer {
    /// Create a stopped engine with a fresh source identity.
    pub fn new() -> Self {
        let (outcome_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                source: SourceId::next(),
                control: Mutex::new(Control {
                    lifecycle: Lifecycle::Stopped,
                    cancel: None,
                    worker: None,
                }),
                counters: Arc::new(SliceCounters::new()),
                fanout: FrameFanout::new(),
                outcome_tx,
            }),
        }
    }

    /// Identity of this engine, attached to every frame it emits.
    pub fn source(&self) -> SourceId {
        self.inner.source
    }

    /// Register a frame listener. Re-registration is a logged no-op.
    pub fn subscribe(&self, listener: Arc<dyn FrameListener>) {
        self.inner.fanout.subscribe(listener);
    }

    /// Remove a frame listener. Removing an unknown listener is a logged no-op.
    pub fn unsubscribe(&self, listener: &Arc<dyn FrameListener>) {
        self.inner.fanout.unsubscribe(listener);
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.fanout.len()
    }

    /// Subscribe to frames as an async stream.
    ///
    /// Internally registers a channel-forwarding listener, so stream
    /// subscribers see the same ordered delivery as direct listeners.
    /// Dropping the returned stream closes the channel; the internal
    /// listener is removed on the next dispatch.
    pub fn frame_stream(&self) -> UnboundedReceiverStream<FrameEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(Arc::new(ChannelListener { tx }));
        UnboundedReceiverStream::new(rx)
    }

    /// Whether a session is currently running.
    pub fn is_started(&self) -> bool {
        self.inner.control.lock().expect("control lock poisoned").lifecycle == Lifecycle::Running
    }

    /// Bytes consumed from the stream in the current session.
    pub fn byte_count(&self) -> u64 {
        self.inner.counters.bytes()
    }

    /// Header blocks fully read in the current session.
    pub fn header_block_count(&self) -> u64 {
        self.inner.counters.header_blocks()
    }

    /// Frames sliced in the current session.
    pub fn frame_count(&self) -> u64 {
        self.inner.counters.frames()
    }

    /// Watch the session outcome. Holds `None` while a session runs (or
    /// before the first start) and the terminal [`SessionOutcome`] once the
    /// worker exits.
    pub fn outcome(&self) -> watch::Receiver<Option<SessionOutcome>> {
        self.inner.outcome_tx.subscribe()
    }

    /// Wait for the current session to end and return its outcome.
    pub async fn wait(&self) -> SessionOutcome {
        let mut rx = self.outcome();
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                // Sender dropped; the engine is gone.
                return SessionOutcome { frames: 0, error: None };
            }
        }
    }

    /// Start slicing an open byte stream.
    ///
    /// The stream must be positioned at the start of the HTTP-style
    /// response. Counters and the sequence number are reset; the worker task
    /// is spawned on the current tokio runtime and runs until end of data, a
    /// fatal error, or [`stop`](Slicer::stop).
    ///
    /// # Errors
    ///
    /// A usage error if a session is already started; counters are left
    /// untouched in that case.
    pub fn start<R>(&self, stream: R) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut control = self.inner.control.lock().expect("control lock poisoned");
        if control.lifecycle != Lifecycle::Stopped {
            return Err(SliceError::usage("slicer is already started"));
        }
        control.lifecycle = Lifecycle::Starting;

        self.inner.counters.reset();
        self.inner.outcome_tx.send_replace(None);

        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let inner = Arc::clone(&self.inner);
        let worker = tokio::spawn(async move {
            run_session(inner, stream, worker_cancel).await;
        });

        control.cancel = Some(cancel);
        control.worker = Some(worker);
        control.lifecycle = Lifecycle::Running;
        info!(source = %self.inner.source, "slicing session started");
        Ok(())
    }

    /// Stop the running session.
    ///
    /// Cancels the worker and awaits its exit; after this returns, no
    /// further frame is delivered. At most one frame already read when stop
    /// was requested may still be delivered before the worker observes
    /// cancellation.
    ///
    /// # Errors
    ///
    /// A usage error if no session is running, including when the session
    /// already ended on its own. Stop is deliberately not idempotent.
    pub async fn stop(&self) -> Result<()> {
        let (cancel, worker) = {
            let mut control = self.inner.control.lock().expect("control lock poisoned");
            if control.lifecycle != Lifecycle::Running {
                return Err(SliceError::usage("slicer is not started"));
            }
            control.lifecycle = Lifecycle::Stopping;
            (control.cancel.take(), control.worker.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "slicing worker ended abnormally");
            }
        }

        let mut control = self.inner.control.lock().expect("control lock poisoned");
        control.lifecycle = Lifecycle::Stopped;
        info!(source = %self.inner.source, "slicing session stopped");
        Ok(())
    }
}

/// Listener adapter that forwards events into an unbounded channel.
struct ChannelListener {
    tx: mpsc::UnboundedSender<FrameEvent>,
}

impl FrameListener for ChannelListener {
    fn on_frame(&self, event: &FrameEvent) {
        // Receiver may be gone; dropped subscriptions are not an error.
        let _ = self.tx.send(event.clone());
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Worker entry point: run the slicing loop, then publish the outcome and
/// flip the lifecycle back to `Stopped`.
async fn run_session<R>(inner: Arc<Inner>, stream: R, cancel: CancellationToken)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut reader = SliceReader::new(stream, Arc::clone(&inner.counters));
    let result = slice_loop(&inner, &mut reader, &cancel).await;

    let frames = inner.counters.frames();
    let error = match result {
        Ok(()) => {
            info!(source = %inner.source, frames, "slicing session ended");
            None
        }
        Err(e) => {
            warn!(source = %inner.source, frames, error = %e, "slicing session failed");
            Some(Arc::new(e))
        }
    };

    {
        let mut control = inner.control.lock().expect("control lock poisoned");
        if control.lifecycle == Lifecycle::Running {
            control.lifecycle = Lifecycle::Stopped;
            control.cancel = None;
            control.worker = None;
        }
    }
    let _ = inner.outcome_tx.send_replace(Some(SessionOutcome { frames, error }));
}

/// The control loop: preamble, then header block → length → payload → event.
async fn slice_loop<R>(
    inner: &Inner,
    reader: &mut SliceReader<R>,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    // First block is the HTTP response preamble: no payload follows it, and
    // it announces the multipart boundary token.
    let preamble = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        block = reader.read_header_block() => block?,
    };
    let Some(lines) = preamble else {
        warn!(source = %inner.source, "end of data before response preamble");
        return Ok(());
    };
    let preamble = HeaderBlock::parse(&lines, None)?;
    let boundary_lookup = preamble.multipart_boundary().map(|token| format!("--{token}"));
    match (&boundary_lookup, preamble.content_type()) {
        (Some(lookup), _) => debug!(boundary = %lookup, "multipart boundary announced"),
        (None, Some(content_type)) => {
            warn!(content_type, "preamble announced no multipart boundary")
        }
        (None, None) => warn!("preamble carried no Content-Type"),
    }

    let mut sequence = 0u64;
    loop {
        let block = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            block = reader.read_header_block() => block?,
        };
        let Some(lines) = block else {
            debug!(source = %inner.source, "end of data at frame boundary");
            return Ok(());
        };

        let block = HeaderBlock::parse(&lines, boundary_lookup.as_deref())?;
        let Some(declared) = block.content_length() else {
            return Err(SliceError::protocol("payload-bearing header block without Content-Length"));
        };
        if declared == 0 {
            return Err(SliceError::protocol("Content-Length must be positive"));
        }
        let declared = usize::try_from(declared)
            .map_err(|_| SliceError::protocol(format!("Content-Length {declared} out of range")))?;

        let payload = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            payload = reader.read_payload(declared) => payload?,
        };
        let Some(payload) = payload else {
            debug!(source = %inner.source, "end of data at payload start");
            return Ok(());
        };

        sequence += 1;
        let event = FrameEvent::new(inner.source, now_ms(), sequence, payload)?;
        inner.fanout.dispatch(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Mutex as StdMutex;
    use tokio::io::AsyncWriteExt;

    const PREAMBLE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=myboundary\r\n\r\n";
    const FRAME: &[u8] =
        b"--myboundary\r\nContent-Type: image/jpeg\r\nContent-Length: 10\r\n\r\n0123456789\r\n";

    struct Collector {
        payloads: StdMutex<Vec<Bytes>>,
    }

    impl Collector {
        fn new() -> Arc<Self> {
            Arc::new(Self { payloads: StdMutex::new(Vec::new()) })
        }
    }

    impl FrameListener for Collector {
        fn on_frame(&self, event: &FrameEvent) {
            self.payloads.lock().unwrap().push(event.payload());
        }
    }

    #[tokio::test]
    async fn slices_the_reference_stream() {
        let mut data = Vec::new();
        data.extend_from_slice(PREAMBLE);
        data.extend_from_slice(FRAME);

        let slicer = Slicer::new();
        let collector = Collector::new();
        slicer.subscribe(collector.clone());

        slicer.start(std::io::Cursor::new(data.clone())).unwrap();
        let outcome = slicer.wait().await;

        assert!(outcome.is_clean(), "outcome: {outcome:?}");
        assert_eq!(outcome.frames, 1);
        assert_eq!(slicer.header_block_count(), 2);
        assert_eq!(slicer.frame_count(), 1);
        assert_eq!(slicer.byte_count(), data.len() as u64);
        assert!(!slicer.is_started());

        let payloads = collector.payloads.lock().unwrap();
        assert_eq!(payloads.as_slice(), &[Bytes::from_static(b"0123456789")]);
    }

    #[tokio::test]
    async fn sequence_numbers_increase_and_reset_per_session() {
        let mut data = Vec::new();
        data.extend_from_slice(PREAMBLE);
        data.extend_from_slice(FRAME);
        data.extend_from_slice(FRAME);
        data.extend_from_slice(FRAME);

        let slicer = Slicer::new();
        let mut frames = slicer.frame_stream();

        slicer.start(std::io::Cursor::new(data.clone())).unwrap();
        let outcome = slicer.wait().await;
        assert_eq!(outcome.frames, 3);

        use tokio_stream::StreamExt;
        for expected in 1..=3u64 {
            let event = frames.next().await.expect("frame expected");
            assert_eq!(event.sequence(), expected);
            assert_eq!(event.source(), slicer.source());
        }

        // A fresh session starts over at 1.
        slicer.start(std::io::Cursor::new(data)).unwrap();
        slicer.wait().await;
        let event = frames.next().await.expect("frame expected");
        assert_eq!(event.sequence(), 1);
    }

    #[tokio::test]
    async fn dropped_frame_stream_is_reaped_on_dispatch() {
        let slicer = Slicer::new();
        let frames = slicer.frame_stream();
        assert_eq!(slicer.listener_count(), 1);
        drop(frames);

        let mut data = Vec::new();
        data.extend_from_slice(PREAMBLE);
        data.extend_from_slice(FRAME);
        slicer.start(std::io::Cursor::new(data)).unwrap();
        let outcome = slicer.wait().await;

        assert!(outcome.is_clean(), "outcome: {outcome:?}");
        assert_eq!(outcome.frames, 1);
        // The abandoned subscription must not linger in the fan-out.
        assert_eq!(slicer.listener_count(), 0);
    }

    #[tokio::test]
    async fn start_twice_is_usage_error_and_leaves_counters() {
        let (_tx, rx) = tokio::io::duplex(64);
        let slicer = Slicer::new();
        slicer.start(rx).unwrap();

        let bytes_before = slicer.byte_count();
        let (_tx2, rx2) = tokio::io::duplex(64);
        let err = slicer.start(rx2).unwrap_err();
        assert!(err.is_usage());
        assert_eq!(slicer.byte_count(), bytes_before);
        assert!(slicer.is_started());

        slicer.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_when_not_started_is_usage_error() {
        let slicer = Slicer::new();
        let err = slicer.stop().await.unwrap_err();
        assert!(err.is_usage());
        assert_eq!(slicer.byte_count(), 0);
    }

    #[tokio::test]
    async fn second_stop_is_rejected() {
        let (_tx, rx) = tokio::io::duplex(64);
        let slicer = Slicer::new();
        slicer.start(rx).unwrap();
        slicer.stop().await.unwrap();
        let err = slicer.stop().await.unwrap_err();
        assert!(err.is_usage());
    }

    #[tokio::test]
    async fn clean_end_at_blank_line_boundary_emits_nothing() {
        let slicer = Slicer::new();
        let collector = Collector::new();
        slicer.subscribe(collector.clone());

        slicer.start(std::io::Cursor::new(PREAMBLE.to_vec())).unwrap();
        let outcome = slicer.wait().await;

        assert!(outcome.is_clean());
        assert_eq!(outcome.frames, 0);
        assert_eq!(slicer.header_block_count(), 1);
        assert!(collector.payloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn truncated_payload_surfaces_corruption() {
        let mut data = Vec::new();
        data.extend_from_slice(PREAMBLE);
        data.extend_from_slice(b"--myboundary\r\nContent-Length: 10\r\n\r\n01234");

        let slicer = Slicer::new();
        let collector = Collector::new();
        slicer.subscribe(collector.clone());

        slicer.start(std::io::Cursor::new(data)).unwrap();
        let outcome = slicer.wait().await;

        let error = outcome.error.expect("session should fail");
        assert!(matches!(*error, SliceError::Corruption { .. }), "got {error:?}");
        assert_eq!(outcome.frames, 0);
        assert!(collector.payloads.lock().unwrap().is_empty());
        assert!(!slicer.is_started());
    }

    #[tokio::test]
    async fn missing_content_length_is_protocol_violation() {
        let mut data = Vec::new();
        data.extend_from_slice(PREAMBLE);
        data.extend_from_slice(b"--myboundary\r\nContent-Type: image/jpeg\r\n\r\n");

        let slicer = Slicer::new();
        slicer.start(std::io::Cursor::new(data)).unwrap();
        let outcome = slicer.wait().await;

        let error = outcome.error.expect("session should fail");
        assert!(matches!(*error, SliceError::Protocol { .. }), "got {error:?}");
    }

    #[tokio::test]
    async fn stop_unblocks_a_pending_read() {
        let (mut tx, rx) = tokio::io::duplex(256);
        tx.write_all(PREAMBLE).await.unwrap();
        tx.flush().await.unwrap();

        let slicer = Slicer::new();
        slicer.start(rx).unwrap();
        // Worker is now blocked reading the next header block.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        slicer.stop().await.unwrap();
        assert!(!slicer.is_started());

        let outcome = slicer.wait().await;
        assert!(outcome.is_clean());
    }

    #[tokio::test]
    async fn frames_keep_flowing_from_a_live_pipe() {
        let (mut tx, rx) = tokio::io::duplex(1024);

        let slicer = Slicer::new();
        let collector = Collector::new();
        slicer.subscribe(collector.clone());
        slicer.start(rx).unwrap();

        tx.write_all(PREAMBLE).await.unwrap();
        for _ in 0..2 {
            tx.write_all(FRAME).await.unwrap();
        }
        tx.flush().await.unwrap();
        drop(tx);

        let outcome = slicer.wait().await;
        assert!(outcome.is_clean());
        assert_eq!(outcome.frames, 2);
        assert_eq!(collector.payloads.lock().unwrap().len(), 2);
    }
}
