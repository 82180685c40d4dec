//! The backpressure pipe implementation.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::error::PipeError;
use crate::{PipeResult, DEFAULT_HIGH_WATER_MARK};

/// Create a pipe with the default high-water mark.
pub fn pipe() -> (PipeWriter, PipeReader) {
    pipe_with_high_water_mark(DEFAULT_HIGH_WATER_MARK)
}

/// Create a pipe that signals backpressure once `high_water_mark` bytes are
/// buffered.
pub fn pipe_with_high_water_mark(high_water_mark: usize) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        high_water_mark,
        state: Mutex::new(State::default()),
        readable: Notify::new(),
        drained: Notify::new(),
    });

    (
        PipeWriter {
            shared: Arc::clone(&shared),
        },
        PipeReader { shared },
    )
}

/// Result of a single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Chunk buffered, room remains below the high-water mark.
    Accepted,

    /// Chunk buffered, but the mark is reached; the writer should await
    /// [`PipeWriter::drain`] before writing more.
    Backpressured,
}

struct Shared {
    high_water_mark: usize,
    state: Mutex<State>,
    readable: Notify,
    drained: Notify,
}

#[derive(Default)]
struct State {
    chunks: VecDeque<Bytes>,
    buffered: usize,
    ended: bool,
    reader_gone: bool,
}

/// The producer side of a pipe.
pub struct PipeWriter {
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Buffer one chunk.
    ///
    /// Never blocks and never drops an accepted chunk. Returns
    /// [`WriteOutcome::Backpressured`] once buffered bytes reach the
    /// high-water mark; the chunk is still delivered.
    pub fn write(&self, chunk: Bytes) -> PipeResult<WriteOutcome> {
        let outcome = {
            let mut state = self.shared.state.lock();
            if state.ended || state.reader_gone {
                return Err(PipeError::StreamClosed);
            }

            state.buffered += chunk.len();
            state.chunks.push_back(chunk);

            if state.buffered >= self.shared.high_water_mark {
                trace!(buffered = state.buffered, "pipe above high-water mark");
                WriteOutcome::Backpressured
            } else {
                WriteOutcome::Accepted
            }
        };

        self.shared.readable.notify_one();
        Ok(outcome)
    }

    /// Wait until buffered bytes fall back below the high-water mark.
    ///
    /// Resolves immediately when below the mark, and also when the pipe is
    /// ended or the reader goes away, so a stalled producer never hangs on a
    /// dead pipe.
    pub async fn drain(&self) {
        loop {
            let drained = self.shared.drained.notified();
            {
                let state = self.shared.state.lock();
                if state.buffered < self.shared.high_water_mark
                    || state.ended
                    || state.reader_gone
                {
                    return;
                }
            }
            drained.await;
        }
    }

    /// Close the writable side. Idempotent: a second call, including after
    /// the read side is fully drained and closed, has no effect.
    pub fn end(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.ended {
                return;
            }
            state.ended = true;
        }

        trace!("pipe ended");
        self.shared.readable.notify_one();
        self.shared.drained.notify_waiters();
    }

    /// Whether the writable side has been closed.
    pub fn is_ended(&self) -> bool {
        self.shared.state.lock().ended
    }

    /// Bytes currently buffered.
    pub fn buffered_bytes(&self) -> usize {
        self.shared.state.lock().buffered
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.end();
    }
}

/// The consumer side of a pipe.
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader").finish_non_exhaustive()
    }
}

impl PipeReader {
    /// Receive the next chunk.
    ///
    /// Chunks arrive in exact write order with no gaps or duplication.
    /// Returns `None` once the buffer is drained and the writable side has
    /// ended; the sequence is not restartable.
    pub async fn recv(&mut self) -> Option<Bytes> {
        loop {
            let readable = self.shared.readable.notified();
            {
                let mut state = self.shared.state.lock();
                if let Some(chunk) = state.chunks.pop_front() {
                    state.buffered -= chunk.len();
                    let below_mark = state.buffered < self.shared.high_water_mark;
                    drop(state);

                    if below_mark {
                        self.shared.drained.notify_waiters();
                    }
                    return Some(chunk);
                }

                if state.ended {
                    return None;
                }
            }
            readable.await;
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.shared.state.lock().reader_gone = true;
        self.shared.drained.notify_waiters();
    }
}
