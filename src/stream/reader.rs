//! Cancellable line-reader task for one agent output stream.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::stream::codec::LogLineCodec;

/// Read `stream` line by line, invoking `on_line` once per decoded line in
/// strict stream order, until EOF or cancellation.
///
/// Cancellation is cooperative: a read already in flight completes (and its
/// line is delivered) before the token is observed. On EOF the codec
/// flushes any non-terminated trailing bytes as a final line.
pub async fn run_line_reader<R, F>(
    identifier: String,
    channel: &'static str,
    stream: R,
    mut on_line: F,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
    F: FnMut(String) + Send,
{
    let mut framed = FramedRead::new(stream, LogLineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(identifier, channel, "line reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(identifier, channel, "line reader: EOF");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(identifier, channel, error = %err, "line reader: read error, stopping");
                        break;
                    }
                    Some(Ok(line)) => on_line(line),
                }
            }
        }
    }
}
