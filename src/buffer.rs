use std::io;

use bytes::{Bytes, BytesMut};

/// A growable byte region with a read cursor and a write cursor.
///
/// The reactor fills it from a socket (advancing the write cursor) and hands the
/// readable region to the filter chain with [`IoBuffer::take_readable`], which
/// transfers ownership of those bytes instead of copying them. The underlying
/// allocation is reclaimed once every handed-out [`Bytes`] has been dropped.
#[derive(Debug, Default)]
pub struct IoBuffer {
    inner: BytesMut,
}

impl IoBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
        }
    }

    /// Readable length: write cursor minus read cursor.
    pub fn remaining(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn put_slice(&mut self, src: &[u8]) {
        self.inner.extend_from_slice(src);
    }

    /// Appends at most `limit` bytes produced by `read`, which receives the
    /// writable window and returns how many bytes it filled.
    pub fn fill<F>(&mut self, limit: usize, read: F) -> io::Result<usize>
    where
        F: FnOnce(&mut [u8]) -> io::Result<usize>,
    {
        let start = self.inner.len();
        self.inner.resize(start + limit, 0);
        match read(&mut self.inner[start..]) {
            Ok(n) => {
                self.inner.truncate(start + n.min(limit));
                Ok(n)
            }
            Err(e) => {
                self.inner.truncate(start);
                Err(e)
            }
        }
    }

    /// Moves the readable region out of the buffer, advancing the read cursor
    /// to the write cursor.
    pub fn take_readable(&mut self) -> Bytes {
        self.inner.split().freeze()
    }

    /// Moves out exactly `len` readable bytes.
    pub fn take(&mut self, len: usize) -> Option<Bytes> {
        if len > self.inner.len() {
            return None;
        }
        Some(self.inner.split_to(len).freeze())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_fill_from_reader() {
        let mut buffer = IoBuffer::with_capacity(16);
        let mut src: &[u8] = b"hello world";
        let n = buffer.fill(5, |window| src.read(window)).unwrap();
        assert_eq!(n, 5);
        assert_eq!(buffer.remaining(), 5);
        assert_eq!(buffer.as_slice(), b"hello");

        buffer.fill(64, |window| src.read(window)).unwrap();
        assert_eq!(buffer.as_slice(), b"hello world");
    }

    #[test]
    fn test_fill_error_leaves_cursor() {
        let mut buffer = IoBuffer::default();
        buffer.put_slice(b"abc");
        let err = buffer
            .fill(32, |_| Err(io::Error::from(io::ErrorKind::WouldBlock)))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(buffer.as_slice(), b"abc");
    }

    #[test]
    fn test_take_readable_transfers_ownership() {
        let mut buffer = IoBuffer::with_capacity(8);
        buffer.put_slice(b"frame");
        let taken = buffer.take_readable();
        assert_eq!(&taken[..], b"frame");
        assert!(buffer.is_empty());

        buffer.put_slice(b"next");
        assert_eq!(buffer.take(2).unwrap(), Bytes::from_static(b"ne"));
        assert!(buffer.take(3).is_none());
        assert_eq!(buffer.remaining(), 2);
    }
}
