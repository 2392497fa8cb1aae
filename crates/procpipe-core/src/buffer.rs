/// Bytes accepted from the input source but not yet accepted by the child's
/// stdin. The contents are always available as one contiguous slice so a
/// retry can hand them to `write(2)` directly.
#[derive(Debug, Default)]
pub struct ChannelBuffer {
    storage: Vec<u8>,
    /// Start of the unsent bytes within `storage`.
    start: usize,
    consumed: u64,
}

impl ChannelBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.start..]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.storage.len() - self.start
    }

    /// Total number of bytes ever consumed from this buffer.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Mark `len` bytes as consumed. The bytes stay allocated until the next
    /// `extend_with` compacts the buffer, so each byte is moved at most once.
    ///
    /// `len` is clamped to the buffered length; a writer can never accept
    /// more than it was offered.
    pub fn advance(&mut self, len: usize) {
        let len = len.min(self.len());
        self.start += len;
        self.consumed += len as u64;
        if self.start == self.storage.len() {
            self.storage.clear();
            self.start = 0;
        }
    }

    /// Append the contents of the slice to the buffer
    pub fn extend_with(&mut self, slice: &[u8]) {
        if self.start > 0 {
            self.storage.drain(..self.start);
            self.start = 0;
        }
        self.storage.extend_from_slice(slice);
    }

    /// Drop everything still buffered, returning how many bytes were lost.
    pub fn discard(&mut self) -> usize {
        let dropped = self.len();
        self.storage.clear();
        self.start = 0;
        dropped
    }
}
