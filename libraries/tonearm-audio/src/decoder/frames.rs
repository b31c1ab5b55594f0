//! Decoded-but-undelivered PCM, reused across reads

/// Grow-only queue of interleaved little-endian i16 bytes
///
/// Decoders push one decoded packet at a time and drain whole frames into
/// the caller's buffer. The backing allocation is kept between packets.
#[derive(Debug, Default)]
pub struct FrameQueue {
    data: Vec<u8>,
    read_pos: usize,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes waiting to be drained
    pub fn len(&self) -> usize {
        self.data.len() - self.read_pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything queued
    pub fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }

    /// Append one sample
    pub fn push_sample(&mut self, sample: i16) {
        self.compact();
        self.data.extend_from_slice(&sample.to_le_bytes());
    }

    /// Reserve room for `samples` more samples
    pub fn reserve_samples(&mut self, samples: usize) {
        self.compact();
        self.data.reserve(samples * 2);
    }

    /// Copy as many whole frames as fit into `out`
    ///
    /// Returns the number of bytes written, always a multiple of `frame_size`.
    pub fn drain_into(&mut self, out: &mut [u8], frame_size: usize) -> usize {
        let available = self.len() - self.len() % frame_size;
        let n = available.min(out.len() - out.len() % frame_size);
        out[..n].copy_from_slice(&self.data[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        if self.read_pos == self.data.len() {
            self.clear();
        }
        n
    }

    /// Move unread bytes to the front once the queue has been fully drained
    fn compact(&mut self) {
        if self.read_pos > 0 && self.read_pos == self.data.len() {
            self.clear();
        } else if self.read_pos > 0 && self.read_pos >= self.data.len() / 2 {
            self.data.drain(..self.read_pos);
            self.read_pos = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_only_whole_frames() {
        let mut queue = FrameQueue::new();
        for s in [1i16, 2, 3, 4, 5, 6] {
            queue.push_sample(s);
        }
        // Buffer holds one and a half stereo frames
        let mut out = [0u8; 6];
        assert_eq!(queue.drain_into(&mut out, 4), 4);
        assert_eq!(&out[..4], &[1, 0, 2, 0]);
        assert_eq!(queue.len(), 8);
    }

    #[test]
    fn keeps_order_across_compaction() {
        let mut queue = FrameQueue::new();
        for s in 0..8i16 {
            queue.push_sample(s);
        }
        let mut out = [0u8; 12];
        queue.drain_into(&mut out, 2);
        for s in 8..10i16 {
            queue.push_sample(s);
        }
        let mut rest = [0u8; 8];
        assert_eq!(queue.drain_into(&mut rest, 2), 8);
        let samples: Vec<i16> = rest
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![6, 7, 8, 9]);
    }
}
