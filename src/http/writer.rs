use std::io::{self, IoSlice, Write};

use crate::buffer::Buffer;

/// Tracks how far a response has been written across its two segments: the
/// header text held in the connection's write buffer, followed by the
/// mapped file body.
///
/// Both segments go out in a single vectored write. A short write first
/// drains the header segment; once it is exhausted the excess advances the
/// offset into the file.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    file_offset: usize,
    file_len: usize,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start writing a fresh response whose body is `file_len` bytes long.
    pub fn start(&mut self, file_len: usize) {
        self.file_offset = 0;
        self.file_len = file_len;
    }

    /// Bytes of the body already written.
    pub fn file_offset(&self) -> usize {
        self.file_offset
    }

    /// Total bytes still pending across both segments.
    pub fn remaining(&self, header: &Buffer) -> usize {
        header.readable_bytes() + (self.file_len - self.file_offset)
    }

    /// Issue one vectored write of whatever is pending and record the
    /// progress.
    ///
    /// `file` must be the same body whose length was passed to
    /// [`ResponseWriter::start`].
    pub fn write_to<W: Write + ?Sized>(
        &mut self,
        writer: &mut W,
        header: &mut Buffer,
        file: &[u8],
    ) -> io::Result<usize> {
        debug_assert_eq!(file.len(), self.file_len);
        let head_len = header.readable_bytes();
        let body = &file[self.file_offset.min(file.len())..];

        let n = writer.write_vectored(&[IoSlice::new(header.peek()), IoSlice::new(body)])?;

        if n > head_len {
            if head_len > 0 {
                header.consume_all();
            }
            self.file_offset = (self.file_offset + n - head_len).min(self.file_len);
        } else {
            header.consume(n);
        }
        Ok(n)
    }
}
