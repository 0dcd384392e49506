//! Chunked byte queue used on both sides of a channel.
//!
//! Bytes are appended at the tail and consumed from the head. Storage is a
//! deque of fixed-size chunks; exhausted chunks go back to a pool and are
//! reused by later writes, so a long-lived connection stops allocating once
//! it reaches its working set.
//!
//! ```text
//!   first_index                                         last_index
//!       │                                                   │
//!  ┌────▼──────────┐ ┌───────────────┐ ┌────────────────────▼──┐
//!  │░░░░ readable  │ │   readable    │ │ readable    ░░ free ░░│
//!  └───────────────┘ └───────────────┘ └───────────────────────┘
//!       front                                          back
//! ```
//!
//! The readable byte count is always
//! `(chunks - 1) * chunk_size + last_index - first_index`.

use std::collections::VecDeque;

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Errors reported by [`ChunkBuffer`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// More bytes were requested than are buffered.
    #[error("buffer underflow: requested {requested} bytes, {available} available")]
    Underflow {
        /// Bytes requested by the caller.
        requested: usize,
        /// Bytes currently readable.
        available: usize,
    },

    /// A commit claimed more bytes than the writable tail holds.
    #[error("buffer overflow: committed {committed} bytes, {writable} writable")]
    Overflow {
        /// Bytes the caller tried to commit.
        committed: usize,
        /// Bytes writable in the tail chunk.
        writable: usize,
    },

    /// The cursors no longer satisfy the count invariant.
    #[error("buffer cursors corrupted: first={first_index} last={last_index} chunks={chunks}")]
    Corrupted {
        /// Read cursor in the front chunk.
        first_index: usize,
        /// Write cursor in the back chunk.
        last_index: usize,
        /// Number of chunks in use.
        chunks: usize,
    },
}

/// FIFO byte queue backed by fixed-size chunks.
#[derive(Debug)]
pub struct ChunkBuffer {
    chunk_size: usize,
    chunks: VecDeque<Box<[u8]>>,
    pool: Vec<Box<[u8]>>,
    first_index: usize,
    last_index: usize,
}

impl ChunkBuffer {
    /// Create an empty buffer with [`DEFAULT_CHUNK_SIZE`] chunks.
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Create an empty buffer with the given chunk size (minimum 1).
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunks: VecDeque::new(),
            pool: Vec::new(),
            first_index: 0,
            last_index: 0,
        }
    }

    /// Chunk size in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of readable bytes.
    pub fn len(&self) -> usize {
        match self.chunks.len() {
            0 => 0,
            n => (n - 1) * self.chunk_size + self.last_index - self.first_index,
        }
    }

    /// Whether no bytes are readable.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of readable bytes, verifying the cursor invariant.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Corrupted`] if the cursors are inconsistent.
    pub fn checked_len(&self) -> Result<usize, BufferError> {
        let corrupted = || BufferError::Corrupted {
            first_index: self.first_index,
            last_index: self.last_index,
            chunks: self.chunks.len(),
        };

        if self.chunks.is_empty() {
            return if self.first_index == 0 && self.last_index == 0 {
                Ok(0)
            } else {
                Err(corrupted())
            };
        }
        if self.first_index > self.chunk_size || self.last_index > self.chunk_size {
            return Err(corrupted());
        }

        (self.chunks.len() - 1)
            .checked_mul(self.chunk_size)
            .and_then(|full| full.checked_add(self.last_index))
            .and_then(|total| total.checked_sub(self.first_index))
            .ok_or_else(corrupted)
    }

    /// Number of chunks waiting in the reuse pool.
    pub fn pooled_chunks(&self) -> usize {
        self.pool.len()
    }

    /// Append bytes at the tail.
    pub fn write(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let tail = self.writable_slice();
            let n = tail.len().min(data.len());
            tail[..n].copy_from_slice(&data[..n]);
            self.last_index += n;
            data = &data[n..];
        }
    }

    /// Fill `out` from the head, consuming the bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Underflow`] if fewer than `out.len()` bytes are
    /// buffered. The buffer is left untouched in that case.
    pub fn read(&mut self, out: &mut [u8]) -> Result<(), BufferError> {
        let available = self.len();
        if out.len() > available {
            return Err(BufferError::Underflow {
                requested: out.len(),
                available,
            });
        }

        let mut copied = 0;
        while copied < out.len() {
            let front = self.front_slice();
            let n = front.len().min(out.len() - copied);
            out[copied..copied + n].copy_from_slice(&front[..n]);
            self.advance_front(n);
            copied += n;
        }
        Ok(())
    }

    /// Consume `n` bytes from the head into a fresh vector.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read).
    pub fn read_vec(&mut self, n: usize) -> Result<Vec<u8>, BufferError> {
        let mut out = vec![0u8; n];
        self.read(&mut out)?;
        Ok(out)
    }

    /// Readable part of the front chunk. Empty when the buffer is empty.
    pub fn front_slice(&self) -> &[u8] {
        match self.chunks.front() {
            Some(chunk) => {
                let end = if self.chunks.len() == 1 {
                    self.last_index
                } else {
                    self.chunk_size
                };
                &chunk[self.first_index..end]
            }
            None => &[],
        }
    }

    /// Consume `n` bytes of the front chunk.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Underflow`] if `n` exceeds
    /// [`front_slice`](Self::front_slice).
    pub fn consume(&mut self, n: usize) -> Result<(), BufferError> {
        let available = self.front_slice().len();
        if n > available {
            return Err(BufferError::Underflow {
                requested: n,
                available,
            });
        }
        self.advance_front(n);
        Ok(())
    }

    /// Free space at the tail, allocating or reusing a chunk if needed.
    ///
    /// Bytes written here become readable after [`commit`](Self::commit).
    pub fn writable_slice(&mut self) -> &mut [u8] {
        if self.chunks.is_empty() || self.last_index == self.chunk_size {
            let chunk = self.take_chunk();
            self.chunks.push_back(chunk);
            self.last_index = 0;
        }
        let start = self.last_index;
        match self.chunks.back_mut() {
            Some(chunk) => &mut chunk[start..],
            None => &mut [],
        }
    }

    /// Mark `n` bytes of the last [`writable_slice`](Self::writable_slice)
    /// as readable.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Overflow`] if `n` exceeds the writable tail.
    pub fn commit(&mut self, n: usize) -> Result<(), BufferError> {
        let writable = if self.chunks.is_empty() {
            0
        } else {
            self.chunk_size - self.last_index
        };
        if n > writable {
            return Err(BufferError::Overflow {
                committed: n,
                writable,
            });
        }
        self.last_index += n;
        self.retire_if_empty();
        Ok(())
    }

    /// Drop all readable bytes, returning chunks to the pool.
    pub fn clear(&mut self) {
        while let Some(chunk) = self.chunks.pop_front() {
            self.pool.push(chunk);
        }
        self.first_index = 0;
        self.last_index = 0;
    }

    fn take_chunk(&mut self) -> Box<[u8]> {
        self.pool
            .pop()
            .unwrap_or_else(|| vec![0u8; self.chunk_size].into_boxed_slice())
    }

    fn advance_front(&mut self, n: usize) {
        self.first_index += n;
        if self.first_index == self.chunk_size && self.chunks.len() > 1 {
            if let Some(chunk) = self.chunks.pop_front() {
                self.pool.push(chunk);
            }
            self.first_index = 0;
        }
        self.retire_if_empty();
    }

    /// A single drained chunk is recycled and the cursors restart at 0.
    fn retire_if_empty(&mut self) {
        if self.chunks.len() == 1 && self.first_index == self.last_index {
            self.clear();
        }
    }
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_across_chunks() {
        let mut buffer = ChunkBuffer::with_chunk_size(4);
        buffer.write(b"hello world");
        assert_eq!(buffer.len(), 11);
        assert_eq!(buffer.checked_len(), Ok(11));

        let mut out = [0u8; 7];
        buffer.read(&mut out).expect("read");
        assert_eq!(&out, b"hello w");
        assert_eq!(buffer.len(), 4);

        let rest = buffer.read_vec(4).expect("read");
        assert_eq!(rest, b"orld");
        assert!(buffer.is_empty());
        assert_eq!(buffer.checked_len(), Ok(0));
    }

    #[test]
    fn test_count_invariant_under_interleaving() {
        let mut buffer = ChunkBuffer::with_chunk_size(5);
        let mut expected = 0usize;
        for round in 0..50usize {
            let data: Vec<u8> = (0..(round % 13) as u8).collect();
            buffer.write(&data);
            expected += data.len();
            assert_eq!(buffer.checked_len(), Ok(expected));

            let take = (round % 7).min(expected);
            buffer.read_vec(take).expect("read");
            expected -= take;
            assert_eq!(buffer.checked_len(), Ok(expected));
        }
    }

    #[test]
    fn test_underflow_leaves_buffer_untouched() {
        let mut buffer = ChunkBuffer::with_chunk_size(4);
        buffer.write(b"abc");

        let mut out = [0u8; 4];
        assert_eq!(
            buffer.read(&mut out),
            Err(BufferError::Underflow {
                requested: 4,
                available: 3
            })
        );
        assert_eq!(buffer.read_vec(3).expect("read"), b"abc");
    }

    #[test]
    fn test_chunks_are_recycled() {
        let mut buffer = ChunkBuffer::with_chunk_size(4);
        buffer.write(b"12345678");
        buffer.read_vec(8).expect("read");
        assert_eq!(buffer.pooled_chunks(), 2);

        buffer.write(b"abcd");
        assert_eq!(buffer.pooled_chunks(), 1);
        assert_eq!(buffer.read_vec(4).expect("read"), b"abcd");
    }

    #[test]
    fn test_front_slice_and_consume() {
        let mut buffer = ChunkBuffer::with_chunk_size(4);
        buffer.write(b"abcdef");
        assert_eq!(buffer.front_slice(), b"abcd");

        buffer.consume(4).expect("consume");
        assert_eq!(buffer.front_slice(), b"ef");
        assert!(buffer.consume(3).is_err());

        buffer.consume(2).expect("consume");
        assert!(buffer.front_slice().is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_writable_slice_commit() {
        let mut buffer = ChunkBuffer::with_chunk_size(4);
        let tail = buffer.writable_slice();
        assert_eq!(tail.len(), 4);
        tail[..3].copy_from_slice(b"xyz");
        buffer.commit(3).expect("commit");
        assert_eq!(buffer.len(), 3);

        assert_eq!(buffer.writable_slice().len(), 1);
        assert_eq!(
            buffer.commit(2),
            Err(BufferError::Overflow {
                committed: 2,
                writable: 1
            })
        );
        assert_eq!(buffer.read_vec(3).expect("read"), b"xyz");
    }

    #[test]
    fn test_uncommitted_tail_is_not_readable() {
        let mut buffer = ChunkBuffer::with_chunk_size(4);
        buffer.write(b"abcd");
        let _ = buffer.writable_slice();
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.front_slice(), b"abcd");
        buffer.consume(4).expect("consume");
        assert!(buffer.is_empty());
        assert_eq!(buffer.checked_len(), Ok(0));
    }
}
