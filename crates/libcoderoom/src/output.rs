use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Bounded, shareable capture buffer for one process stream.
///
/// The reader task appends as data arrives so whatever was captured is still
/// available if the process is killed mid-run.
#[derive(Debug, Clone)]
pub struct Accumulator {
    inner: Arc<Mutex<Captured>>,
    limit: usize,
}

#[derive(Debug, Default)]
struct Captured {
    data: Vec<u8>,
    dropped_bytes: usize,
}

impl Accumulator {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Captured::default())),
            limit: limit.max(1),
        }
    }

    pub fn push(&self, chunk: &[u8]) {
        let mut captured = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let room = self.limit.saturating_sub(captured.data.len());
        let keep = room.min(chunk.len());
        captured.data.extend_from_slice(&chunk[..keep]);
        captured.dropped_bytes = captured.dropped_bytes.saturating_add(chunk.len() - keep);
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .data
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Captured text so far, with a notice if anything was discarded.
    pub fn text(&self) -> String {
        let captured = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut text = String::from_utf8_lossy(&captured.data).into_owned();
        if captured.dropped_bytes > 0 {
            text.push_str(&format!(
                "\n[output truncated: {} bytes dropped]",
                captured.dropped_bytes
            ));
        }
        text
    }
}

/// Copy `reader` into `sink` until EOF or a read error.
pub(crate) async fn pump<R>(mut reader: R, sink: Accumulator)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => sink.push(&buf[..n]),
            Err(e) => {
                trace!(error = %e, "stream read ended");
                break;
            }
        }
    }
}

/// Combine captured streams the way results are presented to users:
/// stdout, then an `Error:` section when stderr is non-empty.
pub fn combine(stdout: &str, stderr: &str) -> String {
    if stderr.is_empty() {
        stdout.to_string()
    } else {
        format!("{stdout}\nError: {stderr}")
    }
}
