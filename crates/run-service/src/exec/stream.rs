use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

// Room for the longest UTF-8 sequence, so a chunk can always make progress.
const MIN_CHUNK: usize = 4;

/// Splits a byte stream into line-sized chunks.
///
/// A chunk ends at a newline, at `max_chunk` bytes, or at whatever is buffered
/// when no newline is available yet. An incomplete UTF-8 sequence at the end
/// of the buffer is held back until more bytes arrive or the stream ends.
/// `next_chunk` is cancel-safe: buffered bytes live in the reader, so dropping
/// the future loses nothing.
pub(super) struct ChunkReader<R> {
    reader: R,
    pending: BytesMut,
    max_chunk: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub(super) fn new(reader: R, max_chunk: usize) -> Self {
        Self {
            reader,
            pending: BytesMut::new(),
            max_chunk: max_chunk.max(MIN_CHUNK),
            eof: false,
        }
    }

    pub(super) async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            if let Some(end) = self.chunk_end() {
                return Ok(Some(self.pending.split_to(end).freeze()));
            }
            if self.eof {
                return Ok(None);
            }
            self.pending.reserve(self.max_chunk);
            if self.reader.read_buf(&mut self.pending).await? == 0 {
                self.eof = true;
            }
        }
    }

    fn chunk_end(&self) -> Option<usize> {
        if self.pending.is_empty() {
            return None;
        }
        let window = &self.pending[..self.pending.len().min(self.max_chunk)];
        let end = match window.iter().position(|byte| *byte == b'\n') {
            Some(pos) => pos + 1,
            None if self.eof => window.len(),
            None => char_boundary(window),
        };
        (end > 0).then_some(end)
    }
}

/// Length of `buf` without a trailing, not yet complete UTF-8 sequence.
fn char_boundary(buf: &[u8]) -> usize {
    let len = buf.len();
    for back in 1..=len.min(MIN_CHUNK) {
        let byte = buf[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if back < needed { len - back } else { len };
    }
    len
}
