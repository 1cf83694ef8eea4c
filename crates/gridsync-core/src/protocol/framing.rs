//! Bounded, lossy line framing over an async byte stream.
//!
//! Both the coordinator's session read loops and the peer's read loop pull
//! frames through [`FrameReader`].  Only end of stream or an I/O error ends a
//! read loop; bad bytes and overlong lines are reported and skipped.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::protocol::codec::{decode_frame, MAX_LINE_BYTES};

/// One unit read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line with the delimiter stripped.
    Line(String),
    /// A line over [`MAX_LINE_BYTES`]; carries how many bytes were dropped.
    Oversized(usize),
}

/// Reads newline-delimited frames, holding at most one capped line in memory.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    limit: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_limit(inner, MAX_LINE_BYTES)
    }

    /// Like [`FrameReader::new`] but with a custom line cap.
    pub fn with_limit(inner: R, limit: usize) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
            limit,
        }
    }

    /// Returns the next frame, or `Ok(None)` at end of stream.
    ///
    /// A final line without a trailing delimiter is still returned as a
    /// [`Frame::Line`].
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from the underlying stream.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Frame>> {
        // One extra byte leaves room for the delimiter.
        let chunk = self.limit as u64 + 1;

        self.buf.clear();
        let n = (&mut self.reader)
            .take(chunk)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if self.buf.ends_with(b"\n") || (n as u64) < chunk {
            return Ok(Some(Frame::Line(decode_frame(&self.buf))));
        }

        // Over the cap: drop everything up to and including the next delimiter.
        let mut dropped = n;
        loop {
            self.buf.clear();
            let n = (&mut self.reader)
                .take(chunk)
                .read_until(b'\n', &mut self.buf)
                .await?;
            dropped += n;
            if n == 0 || self.buf.ends_with(b"\n") {
                self.buf.clear();
                return Ok(Some(Frame::Oversized(dropped)));
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
