//! Per-clip export FIFO
//!
//! Buffers decoded PCM bytes between the decoder and the export writer. After
//! every export frame the queue is normalized to exactly the frame's byte count,
//! so decoder jitter never accumulates into drift.

use std::collections::VecDeque;

/// Ordered byte queue of not-yet-consumed PCM
#[derive(Debug, Default, Clone)]
pub struct FifoByteQueue {
    bytes: VecDeque<u8>,
}

impl FifoByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, data: &[u8]) {
        self.bytes.extend(data.iter().copied());
    }

    pub fn enqueue_zeros(&mut self, count: usize) {
        self.bytes.resize(self.bytes.len() + count, 0);
    }

    /// Pad with zeros (under-run) or drop the oldest bytes (over-run) until
    /// exactly `needed` bytes remain
    pub fn normalize(&mut self, needed: usize) {
        let len = self.bytes.len();
        if len < needed {
            self.enqueue_zeros(needed - len);
        } else if len > needed {
            self.bytes.drain(..len - needed);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Oldest byte first
    pub fn iter(&self) -> impl Iterator<Item = &u8> {
        self.bytes.iter()
    }

    pub fn drain_all(&mut self) -> Vec<u8> {
        self.bytes.drain(..).collect()
    }
}
