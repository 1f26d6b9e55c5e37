//! Growable byte buffer backing all socket I/O.
//!
//! A `Buffer` owns a contiguous byte store and two cursors:
//!
//! ```text
//! +-------------------+------------------+------------------+
//! | prependable bytes |  readable bytes  |  writable bytes  |
//! +-------------------+------------------+------------------+
//! 0              read_pos          write_pos          capacity
//! ```
//!
//! Bytes in `[read_pos, write_pos)` are unread data, bytes in
//! `[write_pos, capacity)` may be filled. When an append does not fit, the
//! buffer first tries to compact the unread region to offset 0 and only grows
//! the allocation when the combined free space is still too small.

use std::io::{self, IoSliceMut, Read, Write};

/// Initial capacity of a fresh buffer.
pub const INITIAL_CAPACITY: usize = 1024;

/// Size of the on-stack spill area used by [`Buffer::read_from`].
pub const SCRATCH_SIZE: usize = 64 * 1024;

const CRLF: &[u8] = b"\r\n";

#[derive(Debug, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of unread bytes.
    pub fn readable_bytes(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Number of bytes that can be written without compacting or growing.
    pub fn writable_bytes(&self) -> usize {
        self.data.len() - self.write_pos
    }

    /// Number of already consumed bytes in front of the read cursor.
    pub fn prependable_bytes(&self) -> usize {
        self.read_pos
    }

    pub fn is_empty(&self) -> bool {
        self.readable_bytes() == 0
    }

    /// Borrow the unread region.
    pub fn peek(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// Borrow the writable tail, to be filled externally and committed with
    /// [`Buffer::produce`].
    pub fn writable_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.write_pos..]
    }

    /// Offset of the first CRLF inside the unread region.
    pub fn find_crlf(&self) -> Option<usize> {
        self.peek().windows(CRLF.len()).position(|w| w == CRLF)
    }

    /// Advance the read cursor by `len` bytes.
    pub fn consume(&mut self, len: usize) {
        debug_assert!(len <= self.readable_bytes(), "consume past write cursor");
        self.read_pos += len.min(self.readable_bytes());
        self.debug_check();
    }

    /// Advance the read cursor up to `end`, an offset relative to the start
    /// of the unread region.
    pub fn consume_until(&mut self, end: usize) {
        self.consume(end);
    }

    /// Discard every unread byte without zeroing the storage.
    pub fn consume_all(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Commit `len` bytes written into [`Buffer::writable_slice`].
    pub fn produce(&mut self, len: usize) {
        debug_assert!(len <= self.writable_bytes(), "produce past capacity");
        self.write_pos += len.min(self.writable_bytes());
        self.debug_check();
    }

    /// Guarantee at least `len` writable bytes.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() < len {
            self.make_space(len);
        }
        debug_assert!(self.writable_bytes() >= len);
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        let end = self.write_pos + bytes.len();
        self.data[self.write_pos..end].copy_from_slice(bytes);
        self.write_pos = end;
        self.debug_check();
    }

    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    /// Read once from `reader` into the buffer.
    ///
    /// The read is vectored over two segments: the buffer's own writable
    /// tail and a 64 KiB stack scratch area. Only when the tail overflows is
    /// the excess appended, so the buffer never pre-grows for a read that
    /// would have fit.
    pub fn read_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<usize> {
        let mut scratch = [0u8; SCRATCH_SIZE];
        let writable = self.writable_bytes();

        let n = {
            let tail = &mut self.data[self.write_pos..];
            let mut bufs = [IoSliceMut::new(tail), IoSliceMut::new(&mut scratch)];
            reader.read_vectored(&mut bufs)?
        };

        if n <= writable {
            self.write_pos += n;
        } else {
            self.write_pos = self.data.len();
            self.append(&scratch[..n - writable]);
        }
        self.debug_check();
        Ok(n)
    }

    /// Write the unread region once to `writer`, consuming what was written.
    pub fn write_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> io::Result<usize> {
        let n = writer.write(self.peek())?;
        self.consume(n);
        Ok(n)
    }

    /// Take every unread byte as an owned string and reset the buffer.
    pub fn drain_to_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.peek()).into_owned();
        self.reset();
        s
    }

    /// Zero the contents and rewind both cursors.
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.read_pos = 0;
        self.write_pos = 0;
    }

    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.prependable_bytes() < len {
            self.data.resize(self.write_pos + len + 1, 0);
        } else {
            let readable = self.readable_bytes();
            self.data.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        }
    }

    #[inline]
    fn debug_check(&self) {
        debug_assert!(self.read_pos <= self.write_pos);
        debug_assert!(self.write_pos <= self.data.len());
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}
