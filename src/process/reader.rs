//! Output reader task.
//!
//! Reads one provider output stream line by line through [`OutputCodec`],
//! runs each line through [`progress::parse_line`], and hands the result to
//! a sink. The sink is invoked for every line, recognized or not, so the
//! notification rate follows the provider's output rate.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::models::progress::ProgressUpdate;
use crate::process::codec::OutputCodec;
use crate::progress;

/// Which child stream a reader is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl OutputStream {
    /// Lowercase stream name for log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Read `output` until EOF, I/O error, or cancellation.
///
/// Returns the number of lines delivered to `sink`.
pub async fn run_reader<R, F>(
    task_id: String,
    stream: OutputStream,
    output: R,
    max_line_bytes: usize,
    mut sink: F,
    cancel: CancellationToken,
) -> usize
where
    R: AsyncRead + Unpin + Send,
    F: FnMut(ProgressUpdate) + Send,
{
    let mut framed = FramedRead::new(output, OutputCodec::new(max_line_bytes));
    let mut lines = 0usize;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(task_id, stream = stream.as_str(), "output reader cancelled");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(task_id, stream = stream.as_str(), lines, "output reader reached EOF");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(task_id, stream = stream.as_str(), %err, "output reader stopped on stream error");
                        break;
                    }
                    Some(Ok(line)) => {
                        lines += 1;
                        trace!(task_id, stream = stream.as_str(), line = line.as_str(), "provider output");
                        sink(progress::parse_line(&line));
                    }
                }
            }
        }
    }

    lines
}
