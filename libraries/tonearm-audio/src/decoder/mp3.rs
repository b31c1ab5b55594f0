//! MP3 decoding with gapless trimming
//!
//! The packet decoder produces the raw stream, encoder and decoder delay
//! included. This wrapper hides the first `start_samples` and last
//! `end_samples` frames so offsets seen by callers start at the first
//! real sample.

use super::packet::{PacketCodec, PacketDecoder};
use super::{check_buffer, resolve_seek, PcmDecoder};
use crate::error::Result;
use crate::gapless::GaplessTrim;
use std::io::SeekFrom;
use std::path::Path;

pub struct Mp3Decoder {
    inner: PacketDecoder,
    trim: GaplessTrim,
    /// Visible frames after trimming both ends
    visible_frames: u64,
}

impl Mp3Decoder {
    pub fn open(path: &Path) -> Result<Self> {
        let trim = GaplessTrim::from_path(path);
        let inner = PacketDecoder::open(path, PacketCodec::Mp3)?;
        Self::with_trim(inner, trim)
    }

    fn with_trim(mut inner: PacketDecoder, trim: GaplessTrim) -> Result<Self> {
        let raw_frames = inner.total_frames();
        let visible_frames = raw_frames.saturating_sub(trim.total());
        if !trim.is_empty() {
            inner.seek_frame(trim.start_samples.min(raw_frames))?;
        }

        tracing::debug!(
            raw_frames,
            start = trim.start_samples,
            end = trim.end_samples,
            visible_frames,
            "MP3 gapless trim applied"
        );

        Ok(Self {
            inner,
            trim,
            visible_frames,
        })
    }

    /// Trim read from the stream's LAME header
    pub fn trim(&self) -> GaplessTrim {
        self.trim
    }

    /// Current frame relative to the trimmed start
    fn visible_position(&self) -> u64 {
        self.inner
            .frame_position()
            .saturating_sub(self.trim.start_samples)
            .min(self.visible_frames)
    }
}

impl PcmDecoder for Mp3Decoder {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let frame_size = self.frame_size();
        check_buffer(buf, frame_size)?;

        let remaining = (self.visible_frames - self.visible_position()) as usize * frame_size;
        let limit = buf.len().min(remaining);
        if limit == 0 {
            return Ok(0);
        }
        self.inner.read(&mut buf[..limit])
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let frame_size = self.frame_size() as u64;
        let length = self.visible_frames * frame_size;
        let current = self.visible_position() * frame_size;
        let target = resolve_seek(pos, current, length, frame_size as usize);

        self.inner
            .seek_frame(self.trim.start_samples + target / frame_size)?;
        Ok(target)
    }

    fn length(&self) -> Option<u64> {
        Some(self.visible_frames * self.frame_size() as u64)
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn channel_count(&self) -> u16 {
        self.inner.channel_count()
    }
}
