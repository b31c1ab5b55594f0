//! Conversion of any decoder to the canonical format
//!
//! Sources already at 44.1 kHz stereo pass straight through. Anything else
//! is upmixed to stereo and resampled by linear interpolation:
//!
//! ```text
//! srcPos = outFrame * srcRate / 44100
//! out    = a + round((b - a) * frac / 44100)
//! ```
//!
//! where `a` and `b` are the source frames either side of `srcPos`. Source
//! frames live in a sliding window keyed by absolute frame index, refilled
//! in chunks and trimmed from the front, so memory stays bounded.

use crate::decoder::{check_buffer, resolve_seek, PcmDecoder};
use crate::error::{AudioError, Result};
use crate::format::{CANONICAL_CHANNELS, CANONICAL_FRAME_SIZE, CANONICAL_SAMPLE_RATE};
use std::io::SeekFrom;

/// Default number of source frames pulled per refill
pub const DEFAULT_CHUNK_FRAMES: usize = 4096;

/// Wraps a decoder and presents it as 44.1 kHz stereo
pub struct Normalizer<D: PcmDecoder> {
    source: D,
    passthrough: bool,
    src_rate: u64,
    src_channels: u16,
    src_frame_size: usize,
    chunk_frames: usize,

    /// Upmixed source frames starting at `window_start`
    window: Vec<[i16; 2]>,
    window_start: u64,
    source_done: bool,
    /// Raw bytes from the source, reused across refills
    scratch: Vec<u8>,

    /// Next output frame
    out_pos: u64,
    out_frames: Option<u64>,
}

impl<D: PcmDecoder> Normalizer<D> {
    pub fn new(source: D) -> Self {
        Self::with_chunk_frames(source, DEFAULT_CHUNK_FRAMES)
    }

    /// Create a normalizer that refills `chunk_frames` source frames at a time
    pub fn with_chunk_frames(source: D, chunk_frames: usize) -> Self {
        let src_rate = u64::from(source.sample_rate());
        let src_channels = source.channel_count();
        let src_frame_size = source.frame_size();
        let passthrough =
            src_rate == u64::from(CANONICAL_SAMPLE_RATE) && src_channels == CANONICAL_CHANNELS;

        let out_frames = source.length().map(|bytes| {
            let src_frames = bytes / src_frame_size as u64;
            let scaled = src_frames * u64::from(CANONICAL_SAMPLE_RATE) / src_rate.max(1);
            if src_frames > 0 {
                scaled.max(1)
            } else {
                0
            }
        });

        if !passthrough {
            tracing::debug!(
                src_rate,
                src_channels,
                ?out_frames,
                "Normalizing source to canonical format"
            );
        }

        Self {
            source,
            passthrough,
            src_rate,
            src_channels,
            src_frame_size,
            chunk_frames: chunk_frames.max(1),
            window: Vec::new(),
            window_start: 0,
            source_done: false,
            scratch: Vec::new(),
            out_pos: 0,
            out_frames,
        }
    }

    /// Whether the source is already canonical and bytes are forwarded untouched
    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    /// Drop window frames before `frame`
    fn trim_window(&mut self, frame: u64) {
        if frame <= self.window_start {
            return;
        }
        let n = ((frame - self.window_start) as usize).min(self.window.len());
        self.window.drain(..n);
        self.window_start += n as u64;
    }

    /// Pull one chunk of source frames into the window
    fn refill(&mut self) -> Result<()> {
        let bytes = self.chunk_frames * self.src_frame_size;
        self.scratch.resize(bytes, 0);
        let n = self.source.read(&mut self.scratch)?;
        if n == 0 {
            self.source_done = true;
            return Ok(());
        }
        if n % self.src_frame_size != 0 {
            return Err(AudioError::FrameMisalignment {
                bytes: n,
                frame_size: self.src_frame_size,
            });
        }

        let stereo = self.src_channels > 1;
        self.window.reserve(n / self.src_frame_size);
        for frame in self.scratch[..n].chunks_exact(self.src_frame_size) {
            let left = i16::from_le_bytes([frame[0], frame[1]]);
            let right = if stereo {
                i16::from_le_bytes([frame[2], frame[3]])
            } else {
                left
            };
            self.window.push([left, right]);
        }
        Ok(())
    }

    /// Make frames `first..=last` resident unless the source ends first
    ///
    /// Frames before `first` are no longer needed and are trimmed before
    /// each refill.
    fn ensure(&mut self, first: u64, last: u64) -> Result<()> {
        while !self.source_done && last >= self.window_start + self.window.len() as u64 {
            self.trim_window(first);
            self.refill()?;
        }
        Ok(())
    }

    fn window_frame(&self, frame: u64) -> Option<[i16; 2]> {
        let offset = frame.checked_sub(self.window_start)?;
        self.window.get(offset as usize).copied()
    }

    fn read_converted(&mut self, buf: &mut [u8]) -> Result<usize> {
        let canon = u64::from(CANONICAL_SAMPLE_RATE);
        let mut written = 0;

        while written + CANONICAL_FRAME_SIZE <= buf.len() {
            if self.out_frames.is_some_and(|total| self.out_pos >= total) {
                break;
            }

            let num = self.out_pos * self.src_rate;
            let index = num / canon;
            let frac = num % canon;

            self.ensure(index, if frac > 0 { index + 1 } else { index })?;

            let Some(a) = self.window_frame(index) else {
                break;
            };
            // Past the last source frame the final frame is held
            let b = if frac > 0 {
                self.window_frame(index + 1).unwrap_or(a)
            } else {
                a
            };

            for (&from, &to) in a.iter().zip(&b) {
                let sample = interpolate(from, to, frac, canon);
                buf[written..written + 2].copy_from_slice(&sample.to_le_bytes());
                written += 2;
            }
            self.out_pos += 1;
        }
        Ok(written)
    }
}

/// Linear interpolation with round-to-nearest on the fractional step
fn interpolate(a: i16, b: i16, frac: u64, denom: u64) -> i16 {
    if frac == 0 {
        return a;
    }
    let diff = i64::from(b) - i64::from(a);
    let denom = denom as i64;
    let step = (diff * frac as i64 + denom / 2).div_euclid(denom);
    (i64::from(a) + step) as i16
}

impl<D: PcmDecoder> PcmDecoder for Normalizer<D> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        check_buffer(buf, CANONICAL_FRAME_SIZE)?;
        if !self.passthrough {
            return self.read_converted(buf);
        }

        let n = self.source.read(buf)?;
        if n % CANONICAL_FRAME_SIZE != 0 {
            return Err(AudioError::FrameMisalignment {
                bytes: n,
                frame_size: CANONICAL_FRAME_SIZE,
            });
        }
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        if self.passthrough {
            return self.source.seek(pos);
        }

        let frame_size = CANONICAL_FRAME_SIZE as u64;
        let length = self.out_frames.map_or(u64::MAX, |f| f * frame_size);
        let target = resolve_seek(pos, self.out_pos * frame_size, length, CANONICAL_FRAME_SIZE);
        let out_frame = target / frame_size;

        let src_frame = out_frame * self.src_rate / u64::from(CANONICAL_SAMPLE_RATE);
        let landed = self
            .source
            .seek(SeekFrom::Start(src_frame * self.src_frame_size as u64))?;

        self.window.clear();
        self.window_start = landed / self.src_frame_size as u64;
        self.source_done = false;
        self.out_pos = out_frame;
        Ok(target)
    }

    fn length(&self) -> Option<u64> {
        if self.passthrough {
            return self.source.length();
        }
        self.out_frames.map(|f| f * CANONICAL_FRAME_SIZE as u64)
    }

    fn sample_rate(&self) -> u32 {
        CANONICAL_SAMPLE_RATE
    }

    fn channel_count(&self) -> u16 {
        CANONICAL_CHANNELS
    }

    fn is_seekable(&self) -> bool {
        self.source.is_seekable()
    }
}
