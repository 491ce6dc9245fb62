//! The stream-slicing primitives: line, header-block, and payload reads.
//!
//! [`SliceReader`] wraps an open byte stream in a buffered reader and offers
//! the three read operations the engine loop is built from:
//!
//! - [`read_line`](SliceReader::read_line): the next CRLF-framed line,
//!   without its terminator;
//! - [`read_header_block`](SliceReader::read_header_block): the next group
//!   of non-empty lines, terminated by the classic blank line;
//! - [`read_payload`](SliceReader::read_payload): an exact-length read that
//!   tolerates partial reads from the transport.
//!
//! Line framing is a strict two-byte scan: only `0x0D 0x0A` terminates a
//! line. A `0x0D` not followed by `0x0A` is kept as line data, and a bare
//! `0x0A` is neither a terminator nor data. Every consumed byte feeds the
//! shared [`SliceCounters`], which external threads may read at any time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tracing::{trace, warn};

use crate::{Result, SliceError};

/// Buffer size for the stream reader, matching a typical camera MTU window.
const READ_BUFFER_SIZE: usize = 8192;

/// Atomic per-session counters shared between the worker and external readers.
#[derive(Debug, Default)]
pub struct SliceCounters {
    bytes: AtomicU64,
    header_blocks: AtomicU64,
    frames: AtomicU64,
}

impl SliceCounters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes consumed from the stream, terminators included.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Header blocks fully terminated by a blank line.
    pub fn header_blocks(&self) -> u64 {
        self.header_blocks.load(Ordering::Relaxed)
    }

    /// Payloads read to their full declared length.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero. Called once per session start.
    pub fn reset(&self) {
        self.bytes.store(0, Ordering::Relaxed);
        self.header_blocks.store(0, Ordering::Relaxed);
        self.frames.store(0, Ordering::Relaxed);
    }

    fn add_bytes(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    fn add_header_block(&self) {
        self.header_blocks.fetch_add(1, Ordering::Relaxed);
    }

    fn add_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

/// Buffered reader over an open M-JPEG byte stream.
pub struct SliceReader<R> {
    input: BufReader<R>,
    counters: Arc<SliceCounters>,
}

impl<R: AsyncRead + Unpin> SliceReader<R> {
    /// Wrap an open stream. The stream must be positioned at the start of
    /// the HTTP-style response.
    pub fn new(stream: R, counters: Arc<SliceCounters>) -> Self {
        Self { input: BufReader::with_capacity(READ_BUFFER_SIZE, stream), counters }
    }

    /// Counters shared with this reader.
    pub fn counters(&self) -> &Arc<SliceCounters> {
        &self.counters
    }

    /// Read the next line, with the CRLF terminator stripped.
    ///
    /// Returns `Ok(None)` when the stream ends before a terminator; any
    /// partially accumulated line is discarded.
    ///
    /// # Errors
    ///
    /// A transport I/O failure is a data-corruption error.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line: Vec<u8> = Vec::new();
        let mut saw_cr = false;
        loop {
            let mut byte = [0u8; 1];
            let n = self
                .input
                .read(&mut byte)
                .await
                .map_err(|e| SliceError::corruption_with_source("failed to read header line", e))?;
            if n == 0 {
                warn!(bytes = self.counters.bytes(), "end of data while reading line");
                return Ok(None);
            }
            self.counters.add_bytes(1);
            match byte[0] {
                b'\r' => {
                    if saw_cr {
                        // Previous CR was not part of a terminator; keep it.
                        line.push(b'\r');
                    }
                    saw_cr = true;
                }
                b'\n' if saw_cr => {
                    let text = String::from_utf8_lossy(&line).into_owned();
                    trace!(line = %text, "read line");
                    return Ok(Some(text));
                }
                other => {
                    if saw_cr {
                        line.push(b'\r');
                        saw_cr = false;
                    }
                    // A bare LF falls through here and is dropped: the
                    // two-byte scan treats it as neither terminator nor data.
                    if other != b'\n' {
                        line.push(other);
                    }
                }
            }
        }
    }

    /// Read the next header block.
    ///
    /// Leading empty lines are skipped; the first non-empty line begins
    /// accumulation; an empty line after at least one accumulated line
    /// terminates the block (the blank line is consumed). End-of-data during
    /// skipping or accumulation yields `Ok(None)` instead of a partial
    /// block, and does not count as a completed block.
    pub async fn read_header_block(&mut self) -> Result<Option<Vec<String>>> {
        let mut lines: Vec<String> = Vec::new();
        loop {
            let Some(line) = self.read_line().await? else {
                if !lines.is_empty() {
                    warn!(lines = lines.len(), "end of data inside header block; discarding");
                }
                return Ok(None);
            };
            if line.is_empty() {
                if lines.is_empty() {
                    // Leading blank line, e.g. the CRLF trailing a payload.
                    continue;
                }
                self.counters.add_header_block();
                return Ok(Some(lines));
            }
            lines.push(line);
        }
    }

    /// Read exactly `len` payload bytes.
    ///
    /// Loops over transport reads until the buffer is full. End-of-data
    /// before the first payload byte is normal stream termination
    /// (`Ok(None)`); end-of-data after a partial payload is a corruption
    /// error, and the partial buffer is discarded either way.
    ///
    /// # Errors
    ///
    /// A zero `len` is a usage error. A transport I/O failure or a
    /// truncated payload is a data-corruption error.
    pub async fn read_payload(&mut self, len: usize) -> Result<Option<Bytes>> {
        if len == 0 {
            return Err(SliceError::usage("payload length must be positive"));
        }
        let mut buf = vec![0u8; len];
        let mut filled = 0usize;
        while filled < len {
            let n = self.input.read(&mut buf[filled..]).await.map_err(|e| {
                SliceError::corruption_with_source("failed to read frame payload", e)
            })?;
            if n == 0 {
                if filled == 0 {
                    warn!(bytes = self.counters.bytes(), "end of data at payload start");
                    return Ok(None);
                }
                return Err(SliceError::truncated_payload(filled, len));
            }
            filled += n;
            self.counters.add_bytes(n as u64);
        }
        self.counters.add_frame();
        Ok(Some(Bytes::from(buf)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn reader(data: &'static [u8]) -> SliceReader<&'static [u8]> {
        SliceReader::new(data, Arc::new(SliceCounters::new()))
    }

    #[tokio::test]
    async fn reads_crlf_framed_lines() {
        let mut r = reader(b"first\r\nsecond\r\n");
        assert_eq!(r.read_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(r.read_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(r.read_line().await.unwrap(), None);
        assert_eq!(r.counters().bytes(), 14);
    }

    #[tokio::test]
    async fn lone_cr_is_retained_as_data() {
        let mut r = reader(b"a\rb\r\n");
        assert_eq!(r.read_line().await.unwrap().as_deref(), Some("a\rb"));
    }

    #[tokio::test]
    async fn doubled_cr_keeps_first_cr_and_terminates() {
        let mut r = reader(b"x\r\r\ny\r\n");
        assert_eq!(r.read_line().await.unwrap().as_deref(), Some("x\r"));
        assert_eq!(r.read_line().await.unwrap().as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn bare_lf_is_not_a_terminator() {
        let mut r = reader(b"one\ntwo\r\n");
        assert_eq!(r.read_line().await.unwrap().as_deref(), Some("onetwo"));
    }

    #[tokio::test]
    async fn partial_line_at_eod_is_discarded() {
        let mut r = reader(b"no terminator");
        assert_eq!(r.read_line().await.unwrap(), None);
        // The scanned bytes still count as consumed.
        assert_eq!(r.counters().bytes(), 13);
    }

    #[tokio::test]
    async fn header_block_skips_leading_blanks_and_stops_at_blank() {
        let mut r = reader(b"\r\n\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\nrest");
        let block = r.read_header_block().await.unwrap().unwrap();
        assert_eq!(block, vec!["Content-Type: image/jpeg", "Content-Length: 3"]);
        assert_eq!(r.counters().header_blocks(), 1);
    }

    #[tokio::test]
    async fn eod_during_block_yields_none_and_no_count() {
        let mut r = reader(b"Content-Length: 3\r\n");
        assert_eq!(r.read_header_block().await.unwrap(), None);
        assert_eq!(r.counters().header_blocks(), 0);
    }

    #[tokio::test]
    async fn eod_while_skipping_blanks_yields_none() {
        let mut r = reader(b"\r\n\r\n");
        assert_eq!(r.read_header_block().await.unwrap(), None);
        assert_eq!(r.counters().header_blocks(), 0);
        assert_eq!(r.counters().bytes(), 4);
    }

    #[tokio::test]
    async fn payload_exact_read() {
        let mut r = reader(b"0123456789tail");
        let payload = r.read_payload(10).await.unwrap().unwrap();
        assert_eq!(&payload[..], b"0123456789");
        assert_eq!(r.counters().frames(), 1);
        assert_eq!(r.counters().bytes(), 10);
    }

    #[tokio::test]
    async fn payload_accumulates_across_partial_reads() {
        let (mut tx, rx) = tokio::io::duplex(4);
        let writer = tokio::spawn(async move {
            for chunk in [b"abc".as_slice(), b"def", b"ghij"] {
                tx.write_all(chunk).await.unwrap();
                tx.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let mut r = SliceReader::new(rx, Arc::new(SliceCounters::new()));
        let payload = r.read_payload(10).await.unwrap().unwrap();
        assert_eq!(&payload[..], b"abcdefghij");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn payload_eod_at_start_is_normal_termination() {
        let mut r = reader(b"");
        assert_eq!(r.read_payload(10).await.unwrap(), None);
        assert_eq!(r.counters().frames(), 0);
    }

    #[tokio::test]
    async fn truncated_payload_is_corruption() {
        let mut r = reader(b"01234");
        let err = r.read_payload(10).await.unwrap_err();
        assert!(matches!(err, SliceError::Corruption { .. }), "got {err:?}");
        assert!(err.to_string().contains("5 of 10"));
        // Partial bytes were still consumed from the stream.
        assert_eq!(r.counters().bytes(), 5);
        assert_eq!(r.counters().frames(), 0);
    }

    #[tokio::test]
    async fn zero_length_payload_is_usage_error() {
        let mut r = reader(b"data");
        let err = r.read_payload(0).await.unwrap_err();
        assert!(err.is_usage());
        assert_eq!(r.counters().bytes(), 0);
    }

    #[tokio::test]
    async fn byte_count_covers_headers_and_payload_exactly() {
        let data = b"Content-Length: 4\r\n\r\nwxyz";
        let mut r = reader(data);
        let block = r.read_header_block().await.unwrap().unwrap();
        assert_eq!(block.len(), 1);
        let payload = r.read_payload(4).await.unwrap().unwrap();
        assert_eq!(&payload[..], b"wxyz");
        assert_eq!(r.counters().bytes(), data.len() as u64);
    }
}
