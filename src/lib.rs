//! Async M-JPEG stream slicer.
//!
//! Framesaw cuts a continuous M-JPEG-over-HTTP byte stream (the
//! `multipart/x-mixed-replace` convention used by network cameras) into
//! discrete JPEG frames and delivers each one as a timestamped,
//! sequence-numbered [`FrameEvent`] to registered observers.
//!
//! # Features
//!
//! - **Stream slicing**: CRLF header-block framing, `Content-Length` driven
//!   payload extraction, strict truncation handling
//! - **Ordered delivery**: one worker task per session, frames delivered in
//!   slice order with monotonic sequence numbers
//! - **Observable lifecycle**: atomic counters, explicit start/stop, and a
//!   session outcome channel that surfaces background failures
//! - **Mock camera**: a wire-compatible synthetic feed for tests and demos
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use framesaw::{CameraConfig, Framesaw};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> framesaw::Result<()> {
//!     let config = CameraConfig { host: "camera.local".into(), ..CameraConfig::default() };
//!     let slicer = Framesaw::connect(config).await?;
//!
//!     let mut frames = slicer.frame_stream();
//!     while let Some(frame) = frames.next().await {
//!         println!("frame {}: {} bytes", frame.sequence(), frame.payload_len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Any open byte stream works; the engine never opens connections itself:
//!
//! ```rust,no_run
//! # async fn feed_from_socket() -> framesaw::Result<()> {
//! use framesaw::{SliceError, Slicer};
//!
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:18090")
//!     .await
//!     .map_err(|e| SliceError::connection_failed_with_source("tcp connect", e))?;
//! let slicer = Slicer::new();
//! slicer.start(stream)?;
//! # Ok(())
//! # }
//! ```

mod error;
mod event;
mod fanout;
mod headers;
mod reader;
mod slicer;
mod source;

pub mod mockcam;

pub use error::{Result, SliceError};
pub use event::{FrameEvent, FrameListener, SourceId};
pub use fanout::FrameFanout;
pub use headers::{HeaderBlock, HeaderBlockBuilder};
pub use reader::{SliceCounters, SliceReader};
pub use slicer::{SessionOutcome, Slicer};
pub use source::{ByteStream, CameraConfig, HttpCameraSource, StreamSource};

/// Unified entry point for slicing sessions.
///
/// A thin factory over [`Slicer`]: it acquires the transport and starts the
/// engine in one call. Use [`Slicer`] directly when the byte stream comes
/// from somewhere else (a test harness, a recorded file, a raw socket).
pub struct Framesaw;

impl Framesaw {
    /// Connect to a network camera over HTTP and start slicing.
    ///
    /// Opens the configured URL (with Basic authentication when credentials
    /// are set), then starts a [`Slicer`] on the response stream. There is
    /// no automatic reconnection: when the session ends, connect again.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the camera is unreachable or answers
    /// with a non-success status.
    pub async fn connect(config: CameraConfig) -> Result<Slicer> {
        let mut source = HttpCameraSource::new(config);
        let stream = source.open_stream().await?;
        let slicer = Slicer::new();
        slicer.start(stream)?;
        Ok(slicer)
    }
}
