//! Agent log-stream capture.
//!
//! Each spawned agent contributes two byte streams (stdout, stderr). This
//! module turns them into decoded text lines delivered through a per-line
//! callback in strict stream order:
//!
//! - `codec`: line framing with multi-codec fallback decoding — agents are
//!   user-supplied executables whose output encoding is not negotiated.
//! - `reader`: cancellable [`FramedRead`](tokio_util::codec::FramedRead)
//!   task driving the codec over one stream.

pub mod codec;
pub mod reader;
