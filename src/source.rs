//! Byte sources that can be read more than once.
//!
//! Entity bodies are plain byte streams, and most streams can only be consumed
//! once. [`ByteSource`] answers "can this be read again?" in one place: seekable
//! sources rewind natively, everything else is drained into memory the first time
//! a replay or snapshot is needed.

use bytes::Bytes;
use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom};

/// Upper bound on the buffer preallocated when draining a request body.
///
/// Bodies larger than this are still buffered in full; the cap only limits how
/// much memory is reserved up front from a declared content length.
pub const REQUEST_BUFFER_CAP: usize = 1024 * 1024;

/// Default number of bytes kept by a diagnostic snapshot.
pub const SNAPSHOT_CAP: usize = 10 * 1024;

/// A reader that can also seek, and therefore supports mark/reset natively.
pub trait SeekRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekRead for T {}

enum Inner {
    Seekable(Box<dyn SeekRead>),
    Stream(Box<dyn Read + Send>),
    Buffered(Cursor<Bytes>),
}

/// A byte stream with explicit mark/reset replay.
///
/// # Examples
///
/// ```
/// use gridcall::ByteSource;
/// use std::io::Read;
///
/// let upload = std::io::repeat(7).take(16);
/// let mut source = ByteSource::from_reader(upload);
/// assert!(!source.is_mark_supported());
///
/// source.make_replayable(16).unwrap();
/// source.mark().unwrap();
///
/// let mut first = Vec::new();
/// source.read_to_end(&mut first).unwrap();
/// source.reset().unwrap();
/// let mut second = Vec::new();
/// source.read_to_end(&mut second).unwrap();
///
/// assert_eq!(first, second);
/// ```
pub struct ByteSource {
    inner: Inner,
    mark: Option<u64>,
}

impl ByteSource {
    /// Wraps an in-memory buffer.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            inner: Inner::Buffered(Cursor::new(bytes.into())),
            mark: None,
        }
    }

    /// Wraps a source that can seek back on its own, such as a file.
    pub fn from_seekable<R: Read + Seek + Send + 'static>(reader: R) -> Self {
        Self {
            inner: Inner::Seekable(Box::new(reader)),
            mark: None,
        }
    }

    /// Wraps a forward-only stream.
    ///
    /// The stream is drained into memory the first time it has to be replayed.
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            inner: Inner::Stream(Box::new(reader)),
            mark: None,
        }
    }

    /// An empty source.
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// Returns `true` if [`mark`](Self::mark) and [`reset`](Self::reset) work
    /// without converting the source first.
    pub fn is_mark_supported(&self) -> bool {
        !matches!(self.inner, Inner::Stream(_))
    }

    /// Returns `true` if the bytes are held in memory.
    pub fn is_buffered(&self) -> bool {
        matches!(self.inner, Inner::Buffered(_))
    }

    /// Makes the source rewindable, draining a forward-only stream into memory.
    ///
    /// Draining reads from the current position to the end of the stream. The
    /// original stream is dropped and the new buffer is positioned at its start,
    /// so any earlier mark is cleared. `size_hint` sizes the initial allocation
    /// and is clamped to [`REQUEST_BUFFER_CAP`].
    pub fn make_replayable(&mut self, size_hint: usize) -> io::Result<()> {
        if let Inner::Stream(stream) = &mut self.inner {
            let mut buf = Vec::with_capacity(size_hint.min(REQUEST_BUFFER_CAP));
            stream.read_to_end(&mut buf)?;
            tracing::trace!(bytes = buf.len(), "buffered forward-only stream for replay");
            self.inner = Inner::Buffered(Cursor::new(Bytes::from(buf)));
            self.mark = None;
        }
        Ok(())
    }

    /// Remembers the current position for a later [`reset`](Self::reset).
    ///
    /// Unlike stream marks there is no read limit: a seekable or buffered source
    /// can always return to its mark.
    pub fn mark(&mut self) -> io::Result<()> {
        self.mark = Some(self.position()?);
        Ok(())
    }

    /// Rewinds to the last mark.
    pub fn reset(&mut self) -> io::Result<()> {
        let mark = self
            .mark
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "reset without mark"))?;
        self.seek_to(mark)
    }

    /// Copies up to `limit` bytes from the current position without consuming them.
    ///
    /// Returns the copied bytes and whether more were available. Forward-only
    /// streams are buffered first; the current position and mark are preserved.
    pub fn peek(&mut self, limit: usize) -> io::Result<(Bytes, bool)> {
        self.make_replayable(limit)?;
        if let Inner::Buffered(cursor) = &self.inner {
            let data = cursor.get_ref();
            let start = (cursor.position() as usize).min(data.len());
            let end = start.saturating_add(limit).min(data.len());
            return Ok((data.slice(start..end), end < data.len()));
        }

        let start = self.position()?;
        let mut buf = Vec::with_capacity(limit.min(SNAPSHOT_CAP));
        let read = self.by_ref().take(limit as u64).read_to_end(&mut buf)?;
        let mut next_byte = [0u8; 1];
        let truncated = read == limit && self.read(&mut next_byte)? > 0;
        self.seek_to(start)?;
        Ok((Bytes::from(buf), truncated))
    }

    /// Reads everything from the current position to the end.
    pub fn read_remaining(&mut self) -> io::Result<Bytes> {
        if let Inner::Buffered(cursor) = &mut self.inner {
            let data = cursor.get_ref().clone();
            let start = (cursor.position() as usize).min(data.len());
            cursor.set_position(data.len() as u64);
            return Ok(data.slice(start..));
        }
        let mut buf = Vec::new();
        self.read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn position(&mut self) -> io::Result<u64> {
        match &mut self.inner {
            Inner::Seekable(reader) => reader.stream_position(),
            Inner::Buffered(cursor) => Ok(cursor.position()),
            Inner::Stream(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "forward-only stream has no position; call make_replayable first",
            )),
        }
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        match &mut self.inner {
            Inner::Seekable(reader) => reader.seek(SeekFrom::Start(pos)).map(|_| ()),
            Inner::Buffered(cursor) => {
                cursor.set_position(pos);
                Ok(())
            }
            Inner::Stream(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "forward-only stream cannot be rewound; call make_replayable first",
            )),
        }
    }
}

impl Read for ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Seekable(reader) => reader.read(buf),
            Inner::Stream(reader) => reader.read(buf),
            Inner::Buffered(cursor) => cursor.read(buf),
        }
    }
}

impl Default for ByteSource {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner {
            Inner::Seekable(_) => "seekable",
            Inner::Stream(_) => "stream",
            Inner::Buffered(_) => "buffered",
        };
        f.debug_struct("ByteSource")
            .field("kind", &kind)
            .field("mark", &self.mark)
            .finish()
    }
}

impl From<Bytes> for ByteSource {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for ByteSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}
