//! # Sample Ring Buffer
//!
//! Keeps the most recently played bytes of canonical PCM for visualizers.
//!
//! ## Design
//!
//! - **Writer**: the audio output path, once per pull
//! - **Reader**: any thread wanting a snapshot; never blocks the writer
//! - **Capacity**: fixed at creation, oldest bytes are overwritten
//!
//! ```rust
//! use tonearm_audio::ring_buffer::SampleRing;
//!
//! let ring = SampleRing::new(8);
//! ring.write(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
//! assert_eq!(ring.snapshot(4), vec![7, 8, 9, 10]);
//! ```

use parking_lot::Mutex;

pub struct SampleRing {
    inner: Mutex<RingState>,
    capacity: usize,
}

struct RingState {
    buffer: Vec<u8>,
    /// Next byte to overwrite
    write_pos: usize,
    /// Valid bytes, saturating at capacity
    filled: usize,
}

impl SampleRing {
    /// Create a ring holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RingState {
                buffer: vec![0; capacity],
                write_pos: 0,
                filled: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append bytes, overwriting the oldest when full
    pub fn write(&self, data: &[u8]) {
        if self.capacity == 0 || data.is_empty() {
            return;
        }
        // Only the tail can survive a write larger than the ring
        let data = &data[data.len().saturating_sub(self.capacity)..];

        let mut state = self.inner.lock();
        let start = state.write_pos;
        let first = data.len().min(self.capacity - start);
        state.buffer[start..start + first].copy_from_slice(&data[..first]);
        state.buffer[..data.len() - first].copy_from_slice(&data[first..]);

        state.write_pos = (start + data.len()) % self.capacity;
        state.filled = (state.filled + data.len()).min(self.capacity);
    }

    /// The most recent `n` bytes, oldest first
    ///
    /// Returns fewer bytes when less has been written, and an empty vector
    /// if a writer holds the lock right now.
    pub fn snapshot(&self, n: usize) -> Vec<u8> {
        let Some(state) = self.inner.try_lock() else {
            return Vec::new();
        };

        let n = n.min(state.filled);
        let start = (state.write_pos + self.capacity - n) % self.capacity.max(1);
        let mut out = Vec::with_capacity(n);
        if start + n <= self.capacity {
            out.extend_from_slice(&state.buffer[start..start + n]);
        } else {
            out.extend_from_slice(&state.buffer[start..]);
            out.extend_from_slice(&state.buffer[..n - (self.capacity - start)]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_before_full() {
        let ring = SampleRing::new(16);
        ring.write(&[1, 2, 3]);
        assert_eq!(ring.snapshot(2), vec![2, 3]);
        assert_eq!(ring.snapshot(10), vec![1, 2, 3]);
    }

    #[test]
    fn wraps_and_keeps_latest() {
        let ring = SampleRing::new(4);
        ring.write(&[1, 2, 3]);
        ring.write(&[4, 5, 6]);
        assert_eq!(ring.snapshot(4), vec![3, 4, 5, 6]);
        assert_eq!(ring.snapshot(2), vec![5, 6]);
    }

    #[test]
    fn oversized_write_keeps_tail() {
        let ring = SampleRing::new(3);
        ring.write(&[9, 8, 7, 6, 5]);
        assert_eq!(ring.snapshot(3), vec![7, 6, 5]);
    }

    #[test]
    fn snapshot_does_not_block_on_writer() {
        let ring = SampleRing::new(4);
        ring.write(&[1, 2]);
        let _guard = ring.inner.lock();
        assert!(ring.snapshot(2).is_empty());
    }

    #[test]
    fn zero_capacity_is_inert() {
        let ring = SampleRing::new(0);
        ring.write(&[1, 2, 3]);
        assert!(ring.snapshot(3).is_empty());
    }
}
