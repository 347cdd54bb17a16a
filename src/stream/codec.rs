//! Line codec with multi-codec fallback decoding.
//!
//! Splits a raw byte stream on `\n`, strips a trailing `\r`, and decodes
//! each accumulated line by trying strict UTF-8 first, then a fixed
//! priority list of fallback code pages. Decoding never fails: the final
//! fallback is decoded non-strictly, so whatever it produces (replacement
//! characters included) becomes the line text.
//!
//! # Usage
//!
//! Use [`LogLineCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`]. On EOF any non-terminated trailing
//! bytes are flushed as a final line.

use bytes::BytesMut;
use encoding_rs::{Encoding, GBK, SHIFT_JIS, WINDOWS_1252};
use tokio_util::codec::Decoder;

use crate::{AppError, Result};

/// Maximum bytes buffered while waiting for a line terminator: 1 MiB.
///
/// An agent that never emits `\n` cannot grow the buffer past this limit;
/// the accumulated bytes are flushed as one oversized line instead of being
/// dropped, since agent output is diagnostics rather than protocol.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Strict fallback code pages tried, in priority order, after UTF-8.
const FALLBACK_ENCODINGS: [&Encoding; 2] = [GBK, SHIFT_JIS];

/// Line codec for agent output streams.
///
/// # Decoder
///
/// Each `\n`-terminated chunk is one line; a trailing `\r` is stripped
/// before decoding. Empty lines decode to the empty string. Lines longer
/// than [`MAX_LINE_BYTES`] are flushed unterminated.
#[derive(Debug, Default)]
pub struct LogLineCodec {
    /// Offset already scanned for `\n`, so buffered bytes are not rescanned.
    next_index: usize,
}

impl LogLineCodec {
    /// Create a new codec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LogLineCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next line from `src`, buffering until `\n` arrives.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') {
            let end = self.next_index + offset;
            self.next_index = 0;
            let mut line = src.split_to(end + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            return Ok(Some(decode_line(&line)));
        }

        if src.len() > MAX_LINE_BYTES {
            self.next_index = 0;
            let line = src.split_to(src.len());
            return Ok(Some(decode_line(&line)));
        }

        self.next_index = src.len();
        Ok(None)
    }

    /// Flush any non-terminated trailing bytes as a final line at EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None if src.is_empty() => Ok(None),
            None => {
                self.next_index = 0;
                let line = src.split_to(src.len());
                Ok(Some(decode_line(&line)))
            }
        }
    }
}

/// Decode one line of bytes, never failing.
///
/// Strict UTF-8 first, then each of [`FALLBACK_ENCODINGS`] strictly, then
/// Windows-1252 non-strictly as the terminal fallback.
fn decode_line(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_owned();
    }

    for encoding in FALLBACK_ENCODINGS {
        let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
        if !had_errors {
            return text.into_owned();
        }
    }

    WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned()
}
