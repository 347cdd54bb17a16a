//! Unit tests for the log-line codec.
//!
//! Covers:
//! - CRLF and LF terminated lines decode in stream order
//! - partial trailing line is flushed at EOF
//! - empty lines decode to the empty string
//! - invalid UTF-8 falls back through the fixed code-page priority list
//! - the terminal fallback never fails
//! - oversized unterminated lines are flushed whole

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use agent_warden::stream::codec::{LogLineCodec, MAX_LINE_BYTES};

// ── Line framing ──────────────────────────────────────────────────────────────

/// `"a\r\nb\n"` yields exactly the lines `"a"` then `"b"`.
#[test]
fn crlf_and_lf_lines_decode_in_order() {
    let mut codec = LogLineCodec::new();
    let mut buf = BytesMut::from("a\r\nb\n");

    let first = codec.decode(&mut buf).expect("decode must not fail");
    assert_eq!(first.as_deref(), Some("a"), "trailing CR must be stripped");

    let second = codec.decode(&mut buf).expect("decode must not fail");
    assert_eq!(second.as_deref(), Some("b"));

    let third = codec.decode(&mut buf).expect("decode must not fail");
    assert!(third.is_none(), "no further lines must be present");
}

/// A non-terminated trailing buffer is not emitted mid-stream, but is
/// flushed as a final line at EOF.
#[test]
fn partial_line_flushes_at_eof() {
    let mut codec = LogLineCodec::new();
    let mut buf = BytesMut::from("partial");

    let mid = codec.decode(&mut buf).expect("decode must not fail");
    assert!(mid.is_none(), "incomplete line must be buffered");

    let flushed = codec.decode_eof(&mut buf).expect("decode_eof must not fail");
    assert_eq!(flushed.as_deref(), Some("partial"));

    let done = codec.decode_eof(&mut buf).expect("decode_eof must not fail");
    assert!(done.is_none(), "buffer must be drained after the flush");
}

/// An empty line decodes to the empty string, not to `None`.
#[test]
fn empty_line_decodes_to_empty_string() {
    let mut codec = LogLineCodec::new();
    let mut buf = BytesMut::from("\n");

    let line = codec.decode(&mut buf).expect("decode must not fail");
    assert_eq!(line.as_deref(), Some(""));
}

// ── Fallback decoding ─────────────────────────────────────────────────────────

/// Bytes invalid under strict UTF-8 but valid GBK decode via the first
/// fallback code page without raising.
#[test]
fn invalid_utf8_falls_back_to_gbk() {
    // GBK encoding of "你好"; 0xC4 0xE3 is not valid UTF-8.
    let mut codec = LogLineCodec::new();
    let mut buf = BytesMut::from(&[0xC4, 0xE3, 0xBA, 0xC3, b'\n'][..]);

    let line = codec.decode(&mut buf).expect("decode must not fail");
    assert_eq!(line.as_deref(), Some("你好"));
}

/// Bytes invalid under UTF-8 and every strict fallback still decode via the
/// terminal non-strict code page.
#[test]
fn terminal_fallback_never_fails() {
    // 0xFF is not a valid lead byte in UTF-8, GBK, or Shift_JIS.
    let mut codec = LogLineCodec::new();
    let mut buf = BytesMut::from(&[0xFF, 0xFE, b'\n'][..]);

    let line = codec
        .decode(&mut buf)
        .expect("decode must not fail")
        .expect("line must be produced");
    assert!(!line.is_empty(), "terminal fallback must produce text");
    assert_eq!(line, "ÿþ", "Windows-1252 maps every byte");
}

/// Plain UTF-8 input is returned unchanged.
#[test]
fn utf8_line_decodes_strictly() {
    let mut codec = LogLineCodec::new();
    let mut buf = BytesMut::from("héllo wörld\n");

    let line = codec.decode(&mut buf).expect("decode must not fail");
    assert_eq!(line.as_deref(), Some("héllo wörld"));
}

// ── Size bounding ─────────────────────────────────────────────────────────────

/// An unterminated line past the buffer cap is flushed whole instead of
/// growing the buffer without bound.
#[test]
fn oversized_line_is_flushed_whole() {
    let mut codec = LogLineCodec::new();
    let oversized = "a".repeat(MAX_LINE_BYTES + 16);
    let mut buf = BytesMut::from(oversized.as_str());

    let line = codec
        .decode(&mut buf)
        .expect("decode must not fail")
        .expect("oversized line must be flushed");
    assert_eq!(line.len(), MAX_LINE_BYTES + 16);
    assert!(buf.is_empty(), "flushed bytes must leave the buffer");
}
