//! Mock network camera for tests and demos.
//!
//! Produces the same `multipart/x-mixed-replace` wire format a real camera
//! emits, so the slicing engine can be exercised without hardware:
//!
//! - [`Feeder`] renders synthetic JPEG frames on a timer and writes them to
//!   any `AsyncWrite` (an in-memory pipe in tests, a socket behind
//!   [`MockCamera`]);
//! - [`MockCamera`] is a minimal TCP acceptor that consumes each client's
//!   request head and then streams frames at it until the client hangs up.
//!
//! ```rust,no_run
//! use framesaw::mockcam::{Feeder, FeederConfig};
//!
//! # async fn demo() -> framesaw::Result<()> {
//! let (client, server) = tokio::io::duplex(64 * 1024);
//! let feeder = Feeder::new(FeederConfig { max_frames: Some(10), ..FeederConfig::default() });
//! tokio::spawn(feeder.run(server));
//! // hand `client` to a Slicer...
//! # Ok(())
//! # }
//! ```

mod content;

pub use content::{ContentProvider, RainbowBackground, SolidBackground};

use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Result, SliceError};

/// Settings for one frame feed.
#[derive(Debug, Clone)]
pub struct FeederConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames per second.
    pub fps: u32,
    /// Boundary token announced in the preamble and written before each frame.
    pub boundary: String,
    /// Stop after this many frames; `None` streams until the peer hangs up.
    pub max_frames: Option<u64>,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            fps: 10,
            boundary: "myboundary".to_owned(),
            max_frames: None,
        }
    }
}

/// Generates synthetic JPEG frames and writes them in multipart wire format.
pub struct Feeder {
    config: FeederConfig,
    provider: Box<dyn ContentProvider>,
    frames_written: u64,
}

impl Feeder {
    /// Create a feeder with the default rainbow content.
    pub fn new(config: FeederConfig) -> Self {
        Self::with_provider(config, Box::new(RainbowBackground::default()))
    }

    /// Create a feeder with a custom content painter.
    pub fn with_provider(config: FeederConfig, provider: Box<dyn ContentProvider>) -> Self {
        Self { config, provider, frames_written: 0 }
    }

    /// Frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Stream frames into `output` until the frame limit is reached or the
    /// peer closes the connection.
    ///
    /// Writes the HTTP-style preamble once, then one multipart frame block
    /// per timer tick.
    pub async fn run<W>(mut self, mut output: W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.write_preamble(&mut output).await?;

        let mut ticker = interval(Duration::from_millis(1_000 / u64::from(self.config.fps.max(1))));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if let Some(max) = self.config.max_frames {
                if self.frames_written >= max {
                    debug!(frames = self.frames_written, "feeder reached frame limit");
                    break;
                }
            }
            ticker.tick().await;

            let jpeg = self.render_frame()?;
            if let Err(e) = self.write_frame(&mut output, &jpeg).await {
                // The slicer side hanging up is how feeds normally end.
                debug!(error = %e, frames = self.frames_written, "feeder output closed");
                break;
            }
            self.frames_written += 1;
        }
        let _ = output.shutdown().await;
        Ok(self.frames_written)
    }

    fn render_frame(&mut self) -> Result<Vec<u8>> {
        let mut frame = RgbImage::new(self.config.width, self.config.height);
        self.provider.paint(&mut frame);

        let mut jpeg = Vec::new();
        JpegEncoder::new(&mut jpeg)
            .encode(frame.as_raw(), frame.width(), frame.height(), image::ExtendedColorType::Rgb8)
            .map_err(|e| SliceError::corruption_with_source("failed to encode JPEG frame", e))?;
        Ok(jpeg)
    }

    async fn write_preamble<W>(&mut self, output: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let head = format!(
            "HTTP/1.1 200 OK\r\n\
             Server: framesaw-mockcam\r\n\
             Pragma: no-cache\r\n\
             Cache-Control: no-cache\r\n\
             Content-Type: multipart/x-mixed-replace;boundary={}\r\n\
             \r\n",
            self.config.boundary
        );
        output
            .write_all(head.as_bytes())
            .await
            .map_err(|e| SliceError::corruption_with_source("failed to write preamble", e))?;
        output
            .flush()
            .await
            .map_err(|e| SliceError::corruption_with_source("failed to flush preamble", e))?;
        Ok(())
    }

    async fn write_frame<W>(&mut self, output: &mut W, jpeg: &[u8]) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let head = format!(
            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            self.config.boundary,
            jpeg.len()
        );
        output.write_all(head.as_bytes()).await?;
        output.write_all(jpeg).await?;
        output.write_all(b"\r\n").await?;
        output.flush().await
    }
}

/// A TCP mock camera: accepts connections and runs a [`Feeder`] per client.
pub struct MockCamera {
    local_addr: std::net::SocketAddr,
    cancel: CancellationToken,
}

impl MockCamera {
    /// Bind to `addr` (use port 0 for an ephemeral port) and start
    /// accepting connections.
    pub async fn bind(addr: &str, config: FeederConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            SliceError::connection_failed_with_source(format!("failed to bind {addr}"), e)
        })?;
        let local_addr = listener.local_addr().map_err(|e| {
            SliceError::connection_failed_with_source("failed to resolve local address", e)
        })?;
        info!(%local_addr, "mock camera listening");

        let cancel = CancellationToken::new();
        let accept_cancel = cancel.clone();
        tokio::spawn(async move {
            accept_loop(listener, config, accept_cancel).await;
        });

        Ok(Self { local_addr, cancel })
    }

    /// The address clients should connect to.
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and tear down running feeds.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for MockCamera {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(listener: TcpListener, config: FeederConfig, cancel: CancellationToken) {
    loop {
        let socket = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("mock camera acceptor cancelled");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!(%peer, "mock camera accepted connection");
                    socket
                }
                Err(e) => {
                    warn!(error = %e, "mock camera accept failed");
                    return;
                }
            },
        };

        let config = config.clone();
        let feed_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(socket, config, feed_cancel).await {
                debug!(error = %e, "mock camera client ended");
            }
        });
    }
}

/// Consume the client's request head, then feed frames until cancellation
/// or disconnect.
async fn handle_client(
    socket: TcpStream,
    config: FeederConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let (read_half, write_half) = socket.into_split();

    let mut request = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        let n = request.read_line(&mut line).await.map_err(|e| {
            SliceError::connection_failed_with_source("failed to read request head", e)
        })?;
        if n == 0 || line.trim_end().is_empty() {
            break;
        }
        debug!(line = line.trim_end(), "request header");
    }

    let feeder = Feeder::new(config);
    tokio::select! {
        _ = cancel.cancelled() => Ok(()),
        result = feeder.run(write_half) => result.map(|_| ()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    use crate::reader::{SliceCounters, SliceReader};

    #[tokio::test]
    async fn feeder_writes_parseable_wire_format() {
        let (mut client, server) = tokio::io::duplex(256 * 1024);
        let config = FeederConfig {
            width: 32,
            height: 24,
            fps: 50,
            max_frames: Some(2),
            ..FeederConfig::default()
        };
        let feed = tokio::spawn(Feeder::new(config).run(server));

        let mut wire = Vec::new();
        client.read_to_end(&mut wire).await.unwrap();
        assert_eq!(feed.await.unwrap().unwrap(), 2);

        let mut reader = SliceReader::new(wire.as_slice(), Arc::new(SliceCounters::new()));
        let preamble = reader.read_header_block().await.unwrap().unwrap();
        assert_eq!(preamble[0], "HTTP/1.1 200 OK");
        assert!(preamble.iter().any(|l| l.contains("boundary=myboundary")));

        for _ in 0..2 {
            let block = reader.read_header_block().await.unwrap().unwrap();
            assert_eq!(block[0], "--myboundary");
            let parsed = crate::HeaderBlock::parse(&block, Some("--myboundary")).unwrap();
            assert_eq!(parsed.boundary(), Some("--myboundary"));
            let len = parsed.content_length().unwrap() as usize;
            let payload = reader.read_payload(len).await.unwrap().unwrap();
            // JPEG SOI marker.
            assert_eq!(&payload[..2], &[0xFF, 0xD8]);
        }
        assert_eq!(reader.read_header_block().await.unwrap(), None);
    }

    #[tokio::test]
    async fn rendered_frames_decode_as_jpeg() {
        let config =
            FeederConfig { width: 16, height: 16, fps: 50, ..FeederConfig::default() };
        let mut feeder = Feeder::new(config);
        let jpeg = feeder.render_frame().unwrap();
        let decoded =
            image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.width(), 16);
        assert_eq!(decoded.height(), 16);
    }
}
