//! Playback speed by frame dropping and duplication
//!
//! Pitch changes with speed. At 2x every other canonical frame is dropped;
//! at 0.5x every frame is played twice.

use crate::decoder::{check_buffer, read_full, PcmDecoder};
use crate::error::Result;
use crate::format::CANONICAL_FRAME_SIZE;
use std::fmt;
use std::io::SeekFrom;

/// Playback speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeedMode {
    #[default]
    Normal,
    Double,
    Half,
}

impl SpeedMode {
    /// Next mode in the 1x, 2x, 0.5x rotation
    pub fn next(self) -> Self {
        match self {
            Self::Normal => Self::Double,
            Self::Double => Self::Half,
            Self::Half => Self::Normal,
        }
    }

    pub fn factor(self) -> f64 {
        match self {
            Self::Normal => 1.0,
            Self::Double => 2.0,
            Self::Half => 0.5,
        }
    }
}

impl fmt::Display for SpeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "1x"),
            Self::Double => write!(f, "2x"),
            Self::Half => write!(f, "0.5x"),
        }
    }
}

/// Outcome of one speed-adjusted read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpeedRead {
    /// Bytes written to the caller's buffer
    pub written: usize,
    /// Canonical bytes pulled from the wrapped decoder
    pub consumed: usize,
}

/// Speed transform over a canonical-format decoder
pub struct SpeedTransform<D: PcmDecoder> {
    inner: D,
    mode: SpeedMode,
    scratch: Vec<u8>,
    /// Duplicated frame that did not fit the previous buffer (0.5x only)
    leftover: Vec<u8>,
}

impl<D: PcmDecoder> SpeedTransform<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            mode: SpeedMode::Normal,
            scratch: Vec::new(),
            leftover: Vec::new(),
        }
    }

    pub fn mode(&self) -> SpeedMode {
        self.mode
    }

    /// Change speed; pending output from the previous mode is discarded
    pub fn set_mode(&mut self, mode: SpeedMode) {
        if mode != self.mode {
            tracing::debug!(from = %self.mode, to = %mode, "Speed changed");
        }
        self.mode = mode;
        self.leftover.clear();
    }

    /// Read with speed applied, reporting how much source was consumed
    pub fn read_tracked(&mut self, buf: &mut [u8]) -> Result<SpeedRead> {
        check_buffer(buf, CANONICAL_FRAME_SIZE)?;
        match self.mode {
            SpeedMode::Normal => {
                let n = self.inner.read(buf)?;
                Ok(SpeedRead {
                    written: n,
                    consumed: n,
                })
            }
            SpeedMode::Double => self.read_double(buf),
            SpeedMode::Half => self.read_half(buf),
        }
    }

    fn read_double(&mut self, buf: &mut [u8]) -> Result<SpeedRead> {
        let frames = buf.len() / CANONICAL_FRAME_SIZE;
        self.scratch.resize(frames * 2 * CANONICAL_FRAME_SIZE, 0);
        let consumed = read_full(&mut self.inner, &mut self.scratch)?;

        // A lone trailing frame at end of stream has no pair and is dropped
        let mut written = 0;
        for pair in self.scratch[..consumed].chunks_exact(2 * CANONICAL_FRAME_SIZE) {
            buf[written..written + CANONICAL_FRAME_SIZE]
                .copy_from_slice(&pair[..CANONICAL_FRAME_SIZE]);
            written += CANONICAL_FRAME_SIZE;
        }
        Ok(SpeedRead { written, consumed })
    }

    fn read_half(&mut self, buf: &mut [u8]) -> Result<SpeedRead> {
        let capacity = buf.len() - buf.len() % CANONICAL_FRAME_SIZE;

        let mut written = self.leftover.len().min(capacity);
        buf[..written].copy_from_slice(&self.leftover[..written]);
        self.leftover.drain(..written);
        if written == capacity {
            return Ok(SpeedRead {
                written,
                consumed: 0,
            });
        }

        let frames = (capacity - written) / CANONICAL_FRAME_SIZE;
        self.scratch.resize(frames.div_ceil(2) * CANONICAL_FRAME_SIZE, 0);
        let consumed = read_full(&mut self.inner, &mut self.scratch)?;

        for frame in self.scratch[..consumed].chunks_exact(CANONICAL_FRAME_SIZE) {
            for _ in 0..2 {
                if written < capacity {
                    buf[written..written + CANONICAL_FRAME_SIZE].copy_from_slice(frame);
                    written += CANONICAL_FRAME_SIZE;
                } else {
                    self.leftover.extend_from_slice(frame);
                }
            }
        }
        Ok(SpeedRead { written, consumed })
    }
}

impl<D: PcmDecoder> PcmDecoder for SpeedTransform<D> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.read_tracked(buf)?.written)
    }

    /// Seeks in canonical (unscaled) byte space
    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.leftover.clear();
        self.inner.seek(pos)
    }

    fn length(&self) -> Option<u64> {
        self.inner.length()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn channel_count(&self) -> u16 {
        self.inner.channel_count()
    }

    fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::resolve_seek;

    /// Canonical stereo frames numbered 0..n, both channels equal to the index
    struct Counter {
        frames: u64,
        pos: u64,
    }

    impl PcmDecoder for Counter {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let mut written = 0;
            while written + 4 <= buf.len() && self.pos < self.frames {
                let v = (self.pos as i16).to_le_bytes();
                buf[written..written + 4].copy_from_slice(&[v[0], v[1], v[0], v[1]]);
                written += 4;
                self.pos += 1;
            }
            Ok(written)
        }

        fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
            let target = resolve_seek(pos, self.pos * 4, self.frames * 4, 4);
            self.pos = target / 4;
            Ok(target)
        }

        fn length(&self) -> Option<u64> {
            Some(self.frames * 4)
        }

        fn sample_rate(&self) -> u32 {
            44100
        }

        fn channel_count(&self) -> u16 {
            2
        }
    }

    fn frame_indices(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(4)
            .map(|f| i16::from_le_bytes([f[0], f[1]]))
            .collect()
    }

    #[test]
    fn cycle_rotates_through_modes() {
        assert_eq!(SpeedMode::Normal.next(), SpeedMode::Double);
        assert_eq!(SpeedMode::Double.next(), SpeedMode::Half);
        assert_eq!(SpeedMode::Half.next(), SpeedMode::Normal);
        assert_eq!(SpeedMode::Half.to_string(), "0.5x");
    }

    #[test]
    fn double_keeps_even_frames() {
        let mut speed = SpeedTransform::new(Counter { frames: 100, pos: 0 });
        speed.set_mode(SpeedMode::Double);

        let mut buf = [0u8; 5 * 4];
        let read = speed.read_tracked(&mut buf).unwrap();
        assert_eq!(read.written, 20);
        assert_eq!(read.consumed, 40);
        assert_eq!(frame_indices(&buf), vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn double_drops_lone_final_frame() {
        let mut speed = SpeedTransform::new(Counter { frames: 5, pos: 0 });
        speed.set_mode(SpeedMode::Double);

        let mut buf = [0u8; 8 * 4];
        let read = speed.read_tracked(&mut buf).unwrap();
        assert_eq!(frame_indices(&buf[..read.written]), vec![0, 2]);
        assert_eq!(read.consumed, 20);
        assert_eq!(speed.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn half_duplicates_frames() {
        let mut speed = SpeedTransform::new(Counter { frames: 100, pos: 0 });
        speed.set_mode(SpeedMode::Half);

        let mut buf = [0u8; 6 * 4];
        let read = speed.read_tracked(&mut buf).unwrap();
        assert_eq!(read.consumed, 3 * 4);
        assert_eq!(frame_indices(&buf), vec![0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn half_carries_leftover_into_next_read() {
        let mut speed = SpeedTransform::new(Counter { frames: 100, pos: 0 });
        speed.set_mode(SpeedMode::Half);

        let mut buf = [0u8; 3 * 4];
        let first = speed.read_tracked(&mut buf).unwrap();
        assert_eq!(first.consumed, 2 * 4);
        assert_eq!(frame_indices(&buf), vec![0, 0, 1]);

        let second = speed.read_tracked(&mut buf).unwrap();
        assert_eq!(second.consumed, 4);
        assert_eq!(frame_indices(&buf), vec![1, 2, 2]);
    }

    #[test]
    fn mode_change_discards_leftover() {
        let mut speed = SpeedTransform::new(Counter { frames: 100, pos: 0 });
        speed.set_mode(SpeedMode::Half);

        let mut buf = [0u8; 3 * 4];
        speed.read(&mut buf).unwrap();
        speed.set_mode(SpeedMode::Normal);

        let mut next = [0u8; 4];
        speed.read(&mut next).unwrap();
        assert_eq!(frame_indices(&next), vec![2]);
    }

    #[test]
    fn seek_is_in_unscaled_bytes() {
        let mut speed = SpeedTransform::new(Counter { frames: 100, pos: 0 });
        speed.set_mode(SpeedMode::Double);
        assert_eq!(speed.seek(SeekFrom::Start(40)).unwrap(), 40);

        let mut buf = [0u8; 4];
        speed.read(&mut buf).unwrap();
        assert_eq!(frame_indices(&buf), vec![10]);
    }
}
