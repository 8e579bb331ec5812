//! Line codec for provider output streams.
//!
//! Wraps [`tokio_util::codec::AnyDelimiterCodec`] so that both `\n` and
//! `\r` end a line. Progress-bar CLIs redraw the current line with bare
//! carriage returns, and each redraw must reach the parser.
//!
//! Blank segments (such as the gap inside `\r\n`) are skipped, invalid UTF-8
//! is decoded lossily, and lines longer than the configured limit are
//! discarded in place instead of surfacing an error. `FramedRead` ends the
//! stream after any decoder error, so an overlong line must not be one.

use bytes::BytesMut;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder};
use tracing::warn;

use crate::{AppError, Result};

/// Default maximum line length in bytes.
///
/// Lines longer than this are dropped by [`OutputCodec`] and counted in
/// [`OutputCodec::skipped`]. Provider CLIs never print lines anywhere near
/// this long, so a hit usually means binary garbage on the stream.
pub const DEFAULT_MAX_LINE_BYTES: usize = 65_536;

/// Decoder yielding trimmed, non-empty output lines.
///
/// Both `\r` and `\n` terminate a line, so every carriage-return redraw of
/// a progress bar comes out as its own item. Surrounding whitespace is
/// trimmed and empty lines never reach the caller.
///
/// # Decoder
///
/// A line longer than the configured limit is discarded up to its next
/// delimiter and decoding carries on with the following line. Only I/O
/// failures surface as errors, mapped to [`AppError::Io`].
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use install_queue::process::codec::OutputCodec;
/// use tokio_util::codec::Decoder;
///
/// let mut codec = OutputCodec::new(16);
/// let mut buf = BytesMut::from(&b"10%\r20%\r\nthis line is far too long\n30%"[..]);
///
/// assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("10%"));
/// assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("20%"));
/// assert_eq!(codec.decode(&mut buf).unwrap(), None);
/// assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("30%"));
/// assert_eq!(codec.skipped(), 1);
/// ```
#[derive(Debug)]
pub struct OutputCodec {
    inner: AnyDelimiterCodec,
    max_line_bytes: usize,
    skipped: usize,
}

impl OutputCodec {
    /// Create a codec that discards lines longer than `max_line_bytes`.
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(
                b"\r\n".to_vec(),
                Vec::new(),
                max_line_bytes,
            ),
            max_line_bytes,
            skipped: 0,
        }
    }

    /// Number of overlong lines discarded so far. A line split across
    /// several reads still counts once.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn next_line(&mut self, src: &mut BytesMut, eof: bool) -> Result<Option<String>> {
        loop {
            let chunk = if eof {
                self.inner.decode_eof(src)
            } else {
                self.inner.decode(src)
            };

            match chunk {
                Ok(Some(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes);
                    let text = text.trim();
                    if !text.is_empty() {
                        return Ok(Some(text.to_owned()));
                    }
                }
                Ok(None) => return Ok(None),
                Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                    self.skipped += 1;
                    warn!(
                        limit = self.max_line_bytes,
                        "output line exceeded length limit, discarding"
                    );
                }
                Err(AnyDelimiterCodecError::Io(err)) => return Err(AppError::Io(err.to_string())),
            }
        }
    }
}

impl Default for OutputCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

impl Decoder for OutputCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next non-empty line from `src`.
    ///
    /// Returns `Ok(None)` while `src` holds no complete line yet. Overlong
    /// lines are skipped rather than returned.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the underlying codec reports an I/O
    /// failure.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.next_line(src, false)
    }

    /// Decode the next line at end of stream, including a final line that
    /// has no trailing delimiter.
    ///
    /// # Errors
    ///
    /// Same as [`decode`](Self::decode).
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.next_line(src, true)
    }
}
