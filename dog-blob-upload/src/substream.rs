//! Bounded windows over one shared seekable stream.
//!
//! A [`SharedStream`] owns the physical stream behind a single lock. Every
//! [`SubStream`] holds a handle to that guard, never the stream itself, and
//! performs each (seek, read) pair while holding the lock, so several
//! substreams can be read from different workers without corrupting each
//! other's position.

use parking_lot::Mutex;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::{BlobError, BlobResult};

/// Bytes pulled from the shared stream per lock acquisition
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Exclusive-access guard around a seekable stream
pub struct SharedStream<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for SharedStream<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Read + Seek> SharedStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(stream)),
        }
    }

    /// Current position of the underlying stream
    pub fn position(&self) -> io::Result<u64> {
        self.inner.lock().stream_position()
    }

    /// Bytes between the current position and the end of the stream.
    /// The position is left unchanged.
    pub fn remaining_len(&self) -> io::Result<u64> {
        let mut stream = self.inner.lock();
        let current = stream.stream_position()?;
        let end = stream.seek(SeekFrom::End(0))?;
        stream.seek(SeekFrom::Start(current))?;
        Ok(end.saturating_sub(current))
    }

    /// Window of `length` bytes starting at absolute offset `begin`
    pub fn substream(&self, begin: u64, length: u64) -> BlobResult<SubStream<S>> {
        SubStream::new(self.clone(), begin, length)
    }

    /// Take the stream back once every substream has been dropped
    pub fn into_inner(self) -> Option<S> {
        Arc::try_unwrap(self.inner).ok().map(Mutex::into_inner)
    }

    /// Seek to `absolute` and read once, atomically with respect to other readers
    fn read_at(&self, absolute: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = self.inner.lock();
        stream.seek(SeekFrom::Start(absolute))?;
        // A concurrent seek would make this read return someone else's bytes
        if stream.stream_position()? != absolute {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "stream failed to seek to the desired location",
            ));
        }
        stream.read(buf)
    }
}

/// Read-only, seekable view of `[begin, begin + length)` of a shared stream
pub struct SubStream<S> {
    stream: SharedStream<S>,
    begin: u64,
    length: u64,
    position: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
    read_buffer_size: usize,
}

impl<S: Read + Seek> SubStream<S> {
    /// Fails when the shared stream cannot report its position
    pub fn new(stream: SharedStream<S>, begin: u64, length: u64) -> BlobResult<Self> {
        stream
            .position()
            .map_err(|_| BlobError::not_seekable("stream"))?;

        Ok(Self {
            stream,
            begin,
            length,
            position: 0,
            buffer: Vec::new(),
            buffer_pos: 0,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        })
    }

    /// Limit how much is read from the shared stream per refill
    pub fn with_read_buffer_size(mut self, bytes: usize) -> Self {
        self.read_buffer_size = bytes.max(1);
        self
    }

    /// Absolute offset of the window in the shared stream
    pub fn begin(&self) -> u64 {
        self.begin
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Position relative to the window start
    pub fn position(&self) -> u64 {
        self.position
    }

    fn remaining(&self) -> u64 {
        self.length - self.position
    }

    fn drain_buffer(&mut self, out: &mut [u8]) -> usize {
        let available = &self.buffer[self.buffer_pos..];
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.buffer_pos += n;
        self.position += n as u64;
        n
    }

    fn refill(&mut self) -> io::Result<()> {
        let want = (self.read_buffer_size as u64).min(self.remaining()) as usize;
        self.buffer.resize(want, 0);
        let got = self
            .stream
            .read_at(self.begin + self.position, &mut self.buffer)?;
        self.buffer.truncate(got);
        self.buffer_pos = 0;
        Ok(())
    }

    fn discard_buffer(&mut self) {
        self.buffer.clear();
        self.buffer_pos = 0;
    }
}

impl<S: Read + Seek> Read for SubStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = (buf.len() as u64).min(self.remaining()) as usize;
        if n == 0 {
            return Ok(0);
        }

        let mut read = self.drain_buffer(&mut buf[..n]);
        if read < n {
            self.refill()?;
            read += self.drain_buffer(&mut buf[read..n]);
        }
        Ok(read)
    }
}

impl<S: Read + Seek> Seek for SubStream<S> {
    /// Targets outside the window are clamped to `[0, len]`
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(offset) => self.position as i128 + offset as i128,
            SeekFrom::End(offset) => self.length as i128 + offset as i128,
        };
        let target = target.clamp(0, self.length as i128) as u64;

        if target != self.position {
            self.discard_buffer();
        }
        self.position = target;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn digits() -> SharedStream<Cursor<Vec<u8>>> {
        SharedStream::new(Cursor::new(b"0123456789".to_vec()))
    }

    /// Reports a position one byte past wherever it was asked to seek
    struct DriftingStream {
        inner: Cursor<Vec<u8>>,
    }

    impl Read for DriftingStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Seek for DriftingStream {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            match pos {
                SeekFrom::Start(offset) => {
                    self.inner.set_position(offset + 1);
                    Ok(offset)
                }
                other => self.inner.seek(other),
            }
        }
    }

    #[test]
    fn test_window_read_in_small_pieces() {
        let mut sub = digits().substream(3, 4).unwrap();
        let mut first = [0u8; 2];
        let mut second = [0u8; 2];
        assert_eq!(sub.read(&mut first).unwrap(), 2);
        assert_eq!(sub.read(&mut second).unwrap(), 2);
        assert_eq!(&first, b"34");
        assert_eq!(&second, b"56");

        let mut rest = [0u8; 8];
        assert_eq!(sub.read(&mut rest).unwrap(), 0);
    }

    #[test]
    fn test_read_never_crosses_window() {
        let mut sub = digits().substream(3, 4).unwrap();
        let mut out = Vec::new();
        sub.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"3456");
        assert_eq!(sub.position(), 4);
    }

    #[test]
    fn test_tiny_read_buffer_still_returns_window() {
        let mut sub = digits().substream(3, 4).unwrap().with_read_buffer_size(1);
        let mut out = Vec::new();
        sub.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"3456");
    }

    #[test]
    fn test_interleaved_substreams_do_not_corrupt_each_other() {
        let shared = digits();
        let mut left = shared.substream(0, 5).unwrap().with_read_buffer_size(2);
        let mut right = shared.substream(5, 5).unwrap().with_read_buffer_size(2);

        let mut left_out = Vec::new();
        let mut right_out = Vec::new();
        let mut byte = [0u8; 1];
        for _ in 0..5 {
            left.read_exact(&mut byte).unwrap();
            left_out.push(byte[0]);
            right.read_exact(&mut byte).unwrap();
            right_out.push(byte[0]);
        }

        assert_eq!(left_out, b"01234");
        assert_eq!(right_out, b"56789");
    }

    #[test]
    fn test_seek_is_clamped_and_drops_lookahead() {
        let mut sub = digits().substream(2, 6).unwrap();
        let mut byte = [0u8; 1];
        sub.read_exact(&mut byte).unwrap();
        assert_eq!(&byte, b"2");

        assert_eq!(sub.seek(SeekFrom::Start(4)).unwrap(), 4);
        sub.read_exact(&mut byte).unwrap();
        assert_eq!(&byte, b"6");

        assert_eq!(sub.seek(SeekFrom::Start(100)).unwrap(), 6);
        assert_eq!(sub.seek(SeekFrom::Current(-100)).unwrap(), 0);
        assert_eq!(sub.seek(SeekFrom::End(-1)).unwrap(), 5);
        sub.read_exact(&mut byte).unwrap();
        assert_eq!(&byte, b"7");
    }

    #[test]
    fn test_seek_mismatch_is_io_error() {
        let shared = SharedStream::new(DriftingStream {
            inner: Cursor::new(b"0123456789".to_vec()),
        });
        let mut sub = shared.substream(3, 4).unwrap();
        let mut buf = [0u8; 4];
        let err = sub.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn test_remaining_len_keeps_position() {
        let mut cursor = Cursor::new(b"0123456789".to_vec());
        cursor.set_position(4);
        let shared = SharedStream::new(cursor);
        assert_eq!(shared.remaining_len().unwrap(), 6);
        assert_eq!(shared.position().unwrap(), 4);
    }

    #[test]
    fn test_into_inner_after_substreams_dropped() {
        let shared = digits();
        let sub = shared.substream(0, 2).unwrap();
        drop(sub);
        assert!(shared.into_inner().is_some());
    }
}
