//! Platform-independent stdin transmission.
//!
//! Every strategy feeds the child's stdin through a [`StdinWriter`]. The
//! writer drains its [`ChannelBuffer`] first, then pulls from the
//! [`InputSource`] one chunk at a time, and only closes stdin once both are
//! empty. Bytes that the sink does not accept stay in the buffer; nothing is
//! ever dropped except when the child has closed its end of the pipe.

use crate::buffer::ChannelBuffer;
use crate::channel::Channel;
use crate::error::{IoDisposition, Result, classify_io_error};
use crate::input::{Element, InputChunk, InputSource, InputStream};
use std::collections::BTreeSet;
use std::io::{self, Read};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Size of every read from an input stream and every write to stdin.
pub const CHUNK_SIZE: usize = 16384;

/// Upper bound on chunks moved per `write` call, so an endless input source
/// cannot monopolise the supervisor loop.
const WRITE_BURST_CHUNKS: usize = 4;

/// The parent's end of the child's stdin.
pub trait StdinSink {
    /// Wait up to `timeout` for write capacity. A zero timeout is a pure probe.
    fn poll_writable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Write some prefix of `buf`, returning how much was accepted.
    fn write_some(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Switch to non-blocking mode where the platform allows it.
    fn set_non_blocking(&mut self) -> Result<()> {
        Ok(())
    }
}

enum SourceState {
    Exhausted,
    Stream(InputStream),
    Sequence {
        items: Box<dyn Iterator<Item = InputChunk> + Send>,
        current: Option<InputStream>,
    },
}

enum Pull {
    Data(Vec<u8>),
    /// The source has nothing right now but is not finished.
    Starved,
    Exhausted,
}

enum Flush {
    Drained,
    Pending,
    Closed,
}

/// Drives an [`InputSource`] into a [`StdinSink`].
pub struct StdinWriter<S> {
    sink: Option<S>,
    buffer: ChannelBuffer,
    source: SourceState,
    chunk_size: usize,
    write_attempts: u64,
}

impl<S: StdinSink> StdinWriter<S> {
    pub fn new(sink: Option<S>, input: InputSource, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let mut buffer = ChannelBuffer::new();
        let source = match input {
            InputSource::Fixed(bytes) => {
                buffer.extend_with(&bytes);
                SourceState::Exhausted
            }
            InputSource::Stream(stream) => SourceState::Stream(stream),
            InputSource::Sequence(items) => SourceState::Sequence {
                items,
                current: None,
            },
        };
        Self {
            sink,
            buffer,
            source,
            chunk_size,
            write_attempts: 0,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    /// Bytes pulled from the source but not yet accepted by the child.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Total bytes the child has accepted so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.buffer.consumed()
    }

    /// Number of `write_some` calls issued so far.
    #[must_use]
    pub fn write_attempts(&self) -> u64 {
        self.write_attempts
    }

    /// Put the sink, and a stream source if any, into non-blocking mode.
    pub fn unblock(&mut self) -> Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.set_non_blocking()?;
        }
        match &mut self.source {
            SourceState::Stream(stream)
            | SourceState::Sequence {
                current: Some(stream),
                ..
            } => stream.set_non_blocking(),
            _ => Ok(()),
        }
    }

    /// Wait for the sink to become writable; used by strategies that have
    /// nothing else to wait on.
    pub fn wait_writable(&mut self, timeout: Duration) -> bool {
        match self.sink.as_mut() {
            Some(sink) => sink.poll_writable(timeout).unwrap_or(false),
            None => false,
        }
    }

    /// Advance stdin transmission.
    ///
    /// Returns `None` once stdin is drained and closed. Otherwise returns the
    /// channels that still need write readiness: `{Stdin}` while bytes are
    /// waiting on the child, or an empty set while waiting on the source.
    pub fn write(
        &mut self,
        blocking: bool,
        wait: Duration,
    ) -> Result<Option<BTreeSet<Channel>>> {
        if self.sink.is_none() {
            return Ok(None);
        }
        let mut budget = self.chunk_size * WRITE_BURST_CHUNKS;

        if !self.buffer.is_empty() {
            match self.flush(&mut budget)? {
                Flush::Drained => {}
                Flush::Pending => return self.stay_pending(blocking, wait),
                Flush::Closed => return Ok(None),
            }
        }

        if !matches!(self.source, SourceState::Exhausted) {
            let timeout = if blocking { wait } else { Duration::ZERO };
            if !self.probe(timeout)? {
                return Ok(Some(stdin_pending()));
            }

            loop {
                if budget == 0 {
                    return Ok(Some(stdin_pending()));
                }
                let pulled = match self.pull() {
                    Ok(pulled) => pulled,
                    Err(err) => {
                        // The offending element is already consumed; a retry
                        // must not resume past it.
                        self.close();
                        return Err(err);
                    }
                };
                match pulled {
                    Pull::Data(bytes) => {
                        self.buffer.extend_with(&bytes);
                        match self.flush(&mut budget)? {
                            Flush::Drained => {}
                            Flush::Pending => return self.stay_pending(blocking, wait),
                            Flush::Closed => return Ok(None),
                        }
                    }
                    Pull::Starved => return Ok(Some(BTreeSet::new())),
                    Pull::Exhausted => break,
                }
            }
        }

        if self.buffer.is_empty() {
            debug!(
                channel = %Channel::Stdin,
                bytes = self.buffer.consumed(),
                "input exhausted, closing stdin"
            );
            self.sink = None;
            return Ok(None);
        }
        Ok(Some(stdin_pending()))
    }

    /// Bytes are still waiting on the child. A blocking call waits up to
    /// `wait` for capacity before reporting it.
    fn stay_pending(&mut self, blocking: bool, wait: Duration) -> Result<Option<BTreeSet<Channel>>> {
        if blocking && self.sink.is_some() {
            self.probe(wait)?;
        }
        Ok(Some(stdin_pending()))
    }

    /// Release the sink and forget any remaining input.
    pub fn close(&mut self) {
        if self.sink.take().is_some() {
            let dropped = self.buffer.discard();
            if dropped > 0 {
                debug!(channel = %Channel::Stdin, bytes = dropped, "stdin closed with unsent input");
            }
        }
        self.source = SourceState::Exhausted;
    }

    fn probe(&mut self, timeout: Duration) -> Result<bool> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(false);
        };
        match sink.poll_writable(timeout) {
            Ok(ready) => Ok(ready),
            Err(err) => match classify_io_error(&err) {
                IoDisposition::Transient => Ok(false),
                // Let the write itself observe the broken pipe.
                IoDisposition::Closed => Ok(true),
                IoDisposition::Fatal => Err(err.into()),
            },
        }
    }

    fn flush(&mut self, budget: &mut usize) -> Result<Flush> {
        while !self.buffer.is_empty() {
            let Some(sink) = self.sink.as_mut() else {
                return Ok(Flush::Closed);
            };
            if *budget == 0 {
                return Ok(Flush::Pending);
            }
            let len = self.buffer.len().min(self.chunk_size).min(*budget);
            self.write_attempts += 1;
            match sink.write_some(&self.buffer.as_slice()[..len]) {
                Ok(0) => return Ok(Flush::Pending),
                Ok(n) => {
                    trace!(channel = %Channel::Stdin, bytes = n, "wrote to stdin");
                    self.buffer.advance(n);
                    *budget = budget.saturating_sub(n);
                    if n < len {
                        return Ok(Flush::Pending);
                    }
                }
                Err(err) => match classify_io_error(&err) {
                    IoDisposition::Transient => return Ok(Flush::Pending),
                    IoDisposition::Closed => {
                        debug!(channel = %Channel::Stdin, error = %err, "child closed stdin");
                        self.close();
                        return Ok(Flush::Closed);
                    }
                    IoDisposition::Fatal => return Err(err.into()),
                },
            }
        }
        Ok(Flush::Drained)
    }

    fn pull(&mut self) -> Result<Pull> {
        let mut chunk = vec![0_u8; self.chunk_size];
        loop {
            match &mut self.source {
                SourceState::Exhausted => return Ok(Pull::Exhausted),
                SourceState::Stream(stream) => match read_chunk(stream, &mut chunk) {
                    Some(0) => {
                        self.source = SourceState::Exhausted;
                        return Ok(Pull::Exhausted);
                    }
                    Some(n) => {
                        chunk.truncate(n);
                        return Ok(Pull::Data(chunk));
                    }
                    None => return Ok(Pull::Starved),
                },
                SourceState::Sequence { items, current } => {
                    if let Some(stream) = current {
                        match read_chunk(stream, &mut chunk) {
                            Some(0) => {
                                *current = None;
                                continue;
                            }
                            Some(n) => {
                                chunk.truncate(n);
                                return Ok(Pull::Data(chunk));
                            }
                            None => return Ok(Pull::Starved),
                        }
                    }
                    match items.next() {
                        None => {
                            self.source = SourceState::Exhausted;
                            return Ok(Pull::Exhausted);
                        }
                        Some(item) => match item.into_element()? {
                            Element::Scalar(bytes) if bytes.is_empty() => continue,
                            Element::Scalar(bytes) => return Ok(Pull::Data(bytes)),
                            Element::Stream(mut stream) => {
                                stream.set_non_blocking()?;
                                *current = Some(stream);
                            }
                        },
                    }
                }
            }
        }
    }
}

impl<S> std::fmt::Debug for StdinWriter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdinWriter")
            .field("open", &self.sink.is_some())
            .field("buffered", &self.buffer.len())
            .field("written", &self.buffer.consumed())
            .finish()
    }
}

fn stdin_pending() -> BTreeSet<Channel> {
    BTreeSet::from([Channel::Stdin])
}

/// One read from an input stream. `Some(0)` is end-of-data, `None` means
/// nothing is available yet.
fn read_chunk(stream: &mut InputStream, buf: &mut [u8]) -> Option<usize> {
    loop {
        match stream.read(buf) {
            Ok(n) => return Some(n),
            Err(err) => match classify_io_error(&err) {
                IoDisposition::Transient if err.kind() == io::ErrorKind::Interrupted => {}
                IoDisposition::Transient => return None,
                IoDisposition::Closed | IoDisposition::Fatal => {
                    warn!(error = %err, "input stream failed; treating it as finished");
                    return Some(0);
                }
            },
        }
    }
}
