//! Bounded byte history for late-attaching viewers.
//!
//! [`HistoryBuffer`] keeps the most recent `capacity` bytes of a session's
//! output. When an append pushes it past capacity, the oldest bytes are
//! evicted first. Bytes are stored raw: a cut may land inside a UTF-8 sequence
//! or an escape code, which terminal emulators tolerate.

use std::collections::VecDeque;

use bytes::Bytes;

#[derive(Debug)]
pub struct HistoryBuffer {
    bytes: VecDeque<u8>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(capacity.min(16 * 1024)),
            capacity,
        }
    }

    /// Append a chunk, evicting from the front to stay within capacity.
    pub fn append(&mut self, chunk: &[u8]) {
        if chunk.len() >= self.capacity {
            self.bytes.clear();
            self.bytes
                .extend(&chunk[chunk.len() - self.capacity..]);
            return;
        }
        let overflow = (self.bytes.len() + chunk.len()).saturating_sub(self.capacity);
        self.bytes.drain(..overflow);
        self.bytes.extend(chunk);
    }

    /// Copy of the retained bytes, oldest first.
    pub fn snapshot(&self) -> Bytes {
        let (a, b) = self.bytes.as_slices();
        let mut out = Vec::with_capacity(a.len() + b.len());
        out.extend_from_slice(a);
        out.extend_from_slice(b);
        Bytes::from(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_everything_under_capacity() {
        let mut h = HistoryBuffer::new(16);
        h.append(b"hello ");
        h.append(b"world");
        assert_eq!(&h.snapshot()[..], b"hello world");
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut h = HistoryBuffer::new(8);
        h.append(b"abcdef");
        h.append(b"ghij");
        assert_eq!(&h.snapshot()[..], b"cdefghij");
    }

    #[test]
    fn test_oversized_chunk_keeps_tail() {
        let mut h = HistoryBuffer::new(4);
        h.append(b"xy");
        h.append(b"0123456789");
        assert_eq!(&h.snapshot()[..], b"6789");
    }

    #[test]
    fn test_last_min_n_cap_bytes() {
        // Whatever the chunking, the snapshot is the last min(N, cap) bytes.
        let stream: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        for chunk_size in [1, 3, 7, 64, 999, 1000] {
            let mut h = HistoryBuffer::new(100);
            for chunk in stream.chunks(chunk_size) {
                h.append(chunk);
            }
            assert_eq!(&h.snapshot()[..], &stream[900..], "chunk size {chunk_size}");
        }
    }

    #[test]
    fn test_empty() {
        let mut h = HistoryBuffer::new(10);
        assert!(h.snapshot().is_empty());
        h.append(b"");
        assert!(h.snapshot().is_empty());
    }
}
