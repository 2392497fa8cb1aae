//! What gets fed to the child's stdin.
//!
//! An [`InputSource`] is one of three shapes:
//!
//! - `Fixed`: bytes known up front;
//! - `Stream`: an open reader pulled in chunks;
//! - `Sequence`: a lazy iterator of [`InputChunk`]s, each a scalar or a stream,
//!   consumed strictly one element at a time.

use crate::error::{Error, Result};
use filedescriptor::FileDescriptor;
use std::fmt;
use std::io::{self, Read};

/// A readable handle used as stdin input.
///
/// Streams backed by an OS descriptor can be switched to non-blocking mode,
/// after which a read with nothing available reports `WouldBlock` instead of
/// stalling the supervisor loop. The original blocking mode is restored when
/// the stream is dropped, since the descriptor may be shared with other
/// processes (a terminal, for instance).
pub struct InputStream {
    inner: StreamInner,
}

enum StreamInner {
    Descriptor {
        fd: FileDescriptor,
        switched: bool,
    },
    Reader(Box<dyn Read + Send>),
}

impl InputStream {
    /// Wrap an arbitrary reader. Such streams cannot change blocking mode;
    /// readers that never block (in-memory data, live feeds) fit best.
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            inner: StreamInner::Reader(Box::new(reader)),
        }
    }

    /// Wrap an OS-level descriptor (pipe, file, socket).
    pub fn from_descriptor(fd: FileDescriptor) -> Self {
        Self {
            inner: StreamInner::Descriptor { fd, switched: false },
        }
    }

    /// Wrap an open file.
    pub fn from_file(file: std::fs::File) -> Self {
        Self::from_descriptor(FileDescriptor::new(file))
    }

    /// In-memory stream over a byte buffer.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::from_reader(io::Cursor::new(bytes.into()))
    }

    #[must_use]
    pub fn is_descriptor(&self) -> bool {
        matches!(self.inner, StreamInner::Descriptor { .. })
    }

    /// Switch a descriptor-backed stream to non-blocking mode. A no-op for
    /// plain readers and for handle types the platform refuses to switch.
    pub fn set_non_blocking(&mut self) -> Result<()> {
        if let StreamInner::Descriptor { fd, switched } = &mut self.inner {
            if *switched {
                return Ok(());
            }
            match fd.set_non_blocking(true) {
                Ok(()) => *switched = true,
                Err(filedescriptor::Error::OnlySocketsNonBlocking) => {
                    tracing::debug!("input stream stays blocking; platform refuses the switch");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

impl Read for InputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            StreamInner::Descriptor { fd, .. } => fd.read(buf),
            StreamInner::Reader(reader) => reader.read(buf),
        }
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        if let StreamInner::Descriptor { fd, switched: true } = &mut self.inner {
            if let Err(err) = fd.set_non_blocking(false) {
                tracing::debug!(error = %err, "failed to restore blocking mode on input stream");
            }
        }
    }
}

impl fmt::Debug for InputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            StreamInner::Descriptor { fd, switched } => f
                .debug_struct("InputStream")
                .field("fd", fd)
                .field("non_blocking", switched)
                .finish(),
            StreamInner::Reader(_) => f.debug_struct("InputStream").field("reader", &"..").finish(),
        }
    }
}

/// One element of a [`InputSource::Sequence`].
#[derive(Debug)]
pub enum InputChunk {
    Bytes(Vec<u8>),
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Stream(InputStream),
    /// A nested collection. Accepted by the type so callers can forward
    /// loosely-typed data, but always rejected with `UnsupportedInput`.
    List(Vec<InputChunk>),
}

/// An element after validation.
pub(crate) enum Element {
    Scalar(Vec<u8>),
    Stream(InputStream),
}

impl InputChunk {
    /// Short name of the element kind, used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "string",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Stream(_) => "stream",
            Self::List(_) => "list",
        }
    }

    /// Scalars convert like a string cast: `true` is `"1"`, `false` is empty.
    pub(crate) fn into_element(self) -> Result<Element> {
        Ok(match self {
            Self::Bytes(bytes) => Element::Scalar(bytes),
            Self::Text(text) => Element::Scalar(text.into_bytes()),
            Self::Integer(n) => Element::Scalar(n.to_string().into_bytes()),
            Self::Float(x) => Element::Scalar(x.to_string().into_bytes()),
            Self::Bool(true) => Element::Scalar(b"1".to_vec()),
            Self::Bool(false) => Element::Scalar(Vec::new()),
            Self::Stream(stream) => Element::Stream(stream),
            Self::List(items) => {
                return Err(Error::UnsupportedInput(format!(
                    "input sequence yielded a list of {} element(s), but only scalars and streams are supported",
                    items.len()
                )));
            }
        })
    }
}

impl From<Vec<u8>> for InputChunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for InputChunk {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<String> for InputChunk {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for InputChunk {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<i64> for InputChunk {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<f64> for InputChunk {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for InputChunk {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<InputStream> for InputChunk {
    fn from(stream: InputStream) -> Self {
        Self::Stream(stream)
    }
}

/// Everything a pipe set can feed to stdin.
pub enum InputSource {
    Fixed(Vec<u8>),
    Stream(InputStream),
    Sequence(Box<dyn Iterator<Item = InputChunk> + Send>),
}

impl InputSource {
    /// No input: stdin is closed as soon as the child starts.
    #[must_use]
    pub fn none() -> Self {
        Self::Fixed(Vec::new())
    }

    pub fn fixed(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Fixed(bytes.into())
    }

    pub fn sequence<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: Into<InputChunk> + 'static,
    {
        Self::Sequence(Box::new(items.into_iter().map(Into::into)))
    }
}

impl Default for InputSource {
    fn default() -> Self {
        Self::none()
    }
}

impl From<Vec<u8>> for InputSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Fixed(bytes)
    }
}

impl From<&str> for InputSource {
    fn from(text: &str) -> Self {
        Self::Fixed(text.as_bytes().to_vec())
    }
}

impl From<InputStream> for InputSource {
    fn from(stream: InputStream) -> Self {
        Self::Stream(stream)
    }
}

impl fmt::Debug for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(bytes) => write!(f, "Fixed({} bytes)", bytes.len()),
            Self::Stream(stream) => f.debug_tuple("Stream").field(stream).finish(),
            Self::Sequence(_) => f.write_str("Sequence(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(chunk: InputChunk) -> Vec<u8> {
        match chunk.into_element() {
            Ok(Element::Scalar(bytes)) => bytes,
            Ok(Element::Stream(_)) => panic!("expected scalar"),
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn scalars_convert_like_string_casts() {
        assert_eq!(scalar("ab".into()), b"ab");
        assert_eq!(scalar(42_i64.into()), b"42");
        assert_eq!(scalar((-7_i64).into()), b"-7");
        assert_eq!(scalar(1.5_f64.into()), b"1.5");
        assert_eq!(scalar(2.0_f64.into()), b"2");
        assert_eq!(scalar(true.into()), b"1");
        assert_eq!(scalar(false.into()), b"");
        assert_eq!(scalar(vec![0_u8, 255].into()), vec![0, 255]);
    }

    #[test]
    fn streams_pass_through() {
        let chunk = InputChunk::from(InputStream::from_bytes("cd"));
        assert!(matches!(chunk.into_element(), Ok(Element::Stream(_))));
    }

    #[test]
    fn lists_are_unsupported() {
        let chunk = InputChunk::List(vec!["a".into(), "b".into()]);
        assert_eq!(chunk.kind(), "list");
        let err = chunk.into_element().err().expect("rejected");
        assert!(matches!(err, Error::UnsupportedInput(_)));
        assert!(err.to_string().contains("2 element(s)"));
    }

    #[test]
    fn in_memory_stream_reads_then_eofs() {
        let mut stream = InputStream::from_bytes("hello");
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
        let mut buf = [0_u8; 4];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn reader_streams_ignore_non_blocking_switch() {
        let mut stream = InputStream::from_bytes("x");
        assert!(!stream.is_descriptor());
        stream.set_non_blocking().unwrap();
    }

    #[test]
    fn file_streams_are_descriptors() {
        let mut file = tempfile::tempfile().unwrap();
        std::io::Write::write_all(&mut file, b"from file").unwrap();
        std::io::Seek::rewind(&mut file).unwrap();
        let mut stream = InputStream::from_file(file);
        assert!(stream.is_descriptor());
        stream.set_non_blocking().unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert_eq!(out, "from file");
    }

    #[test]
    fn source_debug_hides_payload() {
        let source = InputSource::fixed("secret");
        assert_eq!(format!("{source:?}"), "Fixed(6 bytes)");
        assert_eq!(format!("{:?}", InputSource::sequence(["a"])), "Sequence(..)");
    }

    #[test]
    fn default_source_is_empty_fixed() {
        assert!(matches!(InputSource::default(), InputSource::Fixed(b) if b.is_empty()));
    }
}
