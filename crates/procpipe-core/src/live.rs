//! Live input feed: stdin data supplied while the child is running.
//!
//! [`LiveInput::new`] returns a producer handle and the [`InputStream`] that
//! the pipe set consumes. The stream reports `WouldBlock` while the queue is
//! empty and the feed is open, and end-of-data once the feed is closed and
//! drained (or every producer handle has been dropped).

use crate::error::{Error, Result};
use crate::input::InputStream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::Arc;

type OnEmpty = Box<dyn FnMut(&LiveInput) + Send>;

#[derive(Default)]
struct LiveState {
    queue: VecDeque<Vec<u8>>,
    closed: bool,
    on_empty: Option<OnEmpty>,
}

/// Producer side of a live feed. Cheap to clone; all clones feed the same
/// stream.
#[derive(Clone)]
pub struct LiveInput {
    shared: Arc<Mutex<LiveState>>,
}

impl LiveInput {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (LiveInput, InputStream) {
        let shared = Arc::new(Mutex::new(LiveState::default()));
        let reader = LiveReader {
            shared: Arc::clone(&shared),
        };
        (LiveInput { shared }, InputStream::from_reader(reader))
    }

    /// Queue bytes for the child. Empty writes are ignored.
    pub fn write(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        let data = data.into();
        let mut state = self.shared.lock();
        if state.closed {
            return Err(Error::LiveInputClosed);
        }
        if !data.is_empty() {
            state.queue.push_back(data);
        }
        Ok(())
    }

    /// No more input will follow. Already queued bytes are still delivered.
    pub fn close(&self) {
        self.shared.lock().closed = true;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Bytes queued but not yet pulled by the pipe set.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lock().queue.iter().map(Vec::len).sum()
    }

    /// Register a callback invoked each time the queue becomes empty. It
    /// typically writes more input or closes the feed through the handle it
    /// is given. A `LiveInput` captured by the callback counts as a live
    /// producer, so such a feed only ends through `close`. The callback is
    /// released when the stream is dropped.
    pub fn on_empty<F>(&self, callback: F)
    where
        F: FnMut(&LiveInput) + Send + 'static,
    {
        self.shared.lock().on_empty = Some(Box::new(callback));
    }
}

struct LiveReader {
    shared: Arc<Mutex<LiveState>>,
}

impl Read for LiveReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let (mut cb, n) = {
            let mut state = self.shared.lock();
            let Some(front) = state.queue.front_mut() else {
                // Nobody can write any more once only this reader holds the state.
                if state.closed || Arc::strong_count(&self.shared) == 1 {
                    return Ok(0);
                }
                return Err(io::ErrorKind::WouldBlock.into());
            };

            let n = front.len().min(buf.len());
            buf[..n].copy_from_slice(&front[..n]);
            front.drain(..n);
            if front.is_empty() {
                state.queue.pop_front();
            }

            if !state.queue.is_empty() || state.closed {
                return Ok(n);
            }
            match state.on_empty.take() {
                Some(cb) => (cb, n),
                None => return Ok(n),
            }
        };

        // The callback runs unlocked so it may write or close.
        let handle = LiveInput {
            shared: Arc::clone(&self.shared),
        };
        cb(&handle);
        drop(handle);
        let mut state = self.shared.lock();
        if state.on_empty.is_none() {
            state.on_empty = Some(cb);
        }
        Ok(n)
    }
}

impl Drop for LiveReader {
    fn drop(&mut self) {
        // Release the callback outside the lock; it may own a producer handle.
        let callback = self.shared.lock().on_empty.take();
        drop(callback);
    }
}
