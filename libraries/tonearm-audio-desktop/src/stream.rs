//! Position-tracking wrapper at the end of the decode chain
//!
//! Output sessions pull from a [`PlaybackStream`] through `io::Read`. Every
//! successful pull advances the playback position by the canonical bytes
//! consumed (not the bytes produced, which differ at 2x and 0.5x) and copies
//! the output into the sample ring.

use crate::config::PlayerConfig;
use parking_lot::Mutex;
use std::io::{self, Read, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tonearm_audio::format::CANONICAL_FRAME_SIZE;
use tonearm_audio::{Normalizer, PcmDecoder, SampleRing, SpeedMode, SpeedTransform};

/// Progress of one chain, readable without locking the chain itself
#[derive(Debug, Default)]
pub struct StreamProgress {
    position: AtomicU64,
    ended: AtomicBool,
    error: Mutex<Option<String>>,
}

impl StreamProgress {
    /// Canonical bytes played so far
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    /// True once the chain has returned end of stream or failed
    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// The most recent read error, if any
    pub fn last_error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    fn reset(&self, position: u64) {
        self.position.store(position, Ordering::Release);
        self.ended.store(false, Ordering::Release);
        *self.error.lock() = None;
    }
}

/// Requested playback speed, applied by the stream on its next read
///
/// Setting it never touches the chain lock, so a caller is not held up by
/// an output thread that is inside a read.
#[derive(Debug, Default)]
pub struct SpeedControl(AtomicU8);

impl SpeedControl {
    pub fn get(&self) -> SpeedMode {
        match self.0.load(Ordering::Acquire) {
            1 => SpeedMode::Double,
            2 => SpeedMode::Half,
            _ => SpeedMode::Normal,
        }
    }

    pub fn set(&self, mode: SpeedMode) {
        let raw = match mode {
            SpeedMode::Normal => 0,
            SpeedMode::Double => 1,
            SpeedMode::Half => 2,
        };
        self.0.store(raw, Ordering::Release);
    }
}

type Chain = SpeedTransform<Normalizer<Box<dyn PcmDecoder>>>;

pub struct PlaybackStream {
    chain: Chain,
    progress: Arc<StreamProgress>,
    speed: Arc<SpeedControl>,
    ring: Arc<SampleRing>,
    length: Option<u64>,
    seekable: bool,
}

impl PlaybackStream {
    /// Build the canonical chain over `source`
    pub fn new(source: Box<dyn PcmDecoder>, config: &PlayerConfig, ring: Arc<SampleRing>) -> Self {
        let seekable = source.is_seekable();
        let normalizer = Normalizer::with_chunk_frames(source, config.resample_chunk_frames);
        let length = normalizer.length();
        Self {
            chain: SpeedTransform::new(normalizer),
            progress: Arc::new(StreamProgress::default()),
            speed: Arc::new(SpeedControl::default()),
            ring,
            length,
            seekable,
        }
    }

    pub fn progress(&self) -> Arc<StreamProgress> {
        Arc::clone(&self.progress)
    }

    /// Canonical length in bytes, `None` for live streams
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    pub fn speed_control(&self) -> Arc<SpeedControl> {
        Arc::clone(&self.speed)
    }

    /// Reposition to a canonical byte offset, returning where it landed
    pub fn seek_to(&mut self, offset: u64) -> tonearm_audio::Result<u64> {
        let landed = self.chain.seek(SeekFrom::Start(offset))?;
        self.progress.reset(landed);
        Ok(landed)
    }
}

impl Read for PlaybackStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len() - buf.len() % CANONICAL_FRAME_SIZE;
        if len == 0 || self.progress.has_ended() {
            return Ok(0);
        }
        let mode = self.speed.get();
        if mode != self.chain.mode() {
            self.chain.set_mode(mode);
        }

        match self.chain.read_tracked(&mut buf[..len]) {
            Ok(read) => {
                self.progress
                    .position
                    .fetch_add(read.consumed as u64, Ordering::AcqRel);
                if read.written == 0 {
                    tracing::debug!(position = self.progress.position(), "Decode chain ended");
                    self.progress.ended.store(true, Ordering::Release);
                }
                self.ring.write(&buf[..read.written]);
                Ok(read.written)
            }
            Err(e) => {
                tracing::error!(error = %e, "Decode chain read failed");
                *self.progress.error.lock() = Some(e.to_string());
                self.progress.ended.store(true, Ordering::Release);
                Err(io::Error::other(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonearm_audio::decoder::resolve_seek;
    use tonearm_audio::{AudioError, Result};

    struct Silence {
        frames: u64,
        pos: u64,
        fail: bool,
    }

    impl PcmDecoder for Silence {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            if self.fail {
                return Err(AudioError::DecodeError("corrupt packet".to_string()));
            }
            let frames = ((buf.len() / 4) as u64).min(self.frames - self.pos);
            buf[..frames as usize * 4].fill(0);
            self.pos += frames;
            Ok(frames as usize * 4)
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

    fn stream(frames: u64, fail: bool) -> PlaybackStream {
        let source = Box::new(Silence { frames, pos: 0, fail });
        PlaybackStream::new(source, &PlayerConfig::default(), Arc::new(SampleRing::new(64)))
    }

    #[test]
    fn position_counts_consumed_bytes() {
        let mut stream = stream(100, false);
        stream.speed_control().set(SpeedMode::Double);
        let mut buf = [0u8; 40];
        assert_eq!(stream.read(&mut buf).unwrap(), 40);
        assert_eq!(stream.progress().position(), 80);
    }

    #[test]
    fn speed_change_applies_on_next_read() {
        let mut stream = stream(400, false);
        let control = stream.speed_control();
        let mut buf = [0u8; 40];
        stream.read(&mut buf).unwrap();
        assert_eq!(stream.progress().position(), 40);

        control.set(SpeedMode::Half);
        assert_eq!(control.get(), SpeedMode::Half);
        assert_eq!(stream.read(&mut buf).unwrap(), 40);
        assert_eq!(stream.progress().position(), 60);
    }

    #[test]
    fn end_of_stream_is_flagged() {
        let mut stream = stream(2, false);
        let mut buf = [0u8; 64];
        assert_eq!(stream.read(&mut buf).unwrap(), 8);
        assert!(!stream.progress().has_ended());
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert!(stream.progress().has_ended());
    }

    #[test]
    fn seek_resets_progress() {
        let mut stream = stream(100, false);
        let mut buf = [0u8; 400];
        stream.read(&mut buf).unwrap();
        stream.read(&mut buf).unwrap();
        assert!(stream.progress().has_ended());

        assert_eq!(stream.seek_to(41).unwrap(), 40);
        assert_eq!(stream.progress().position(), 40);
        assert!(!stream.progress().has_ended());
    }

    #[test]
    fn read_error_is_recorded_and_propagated() {
        let mut stream = stream(100, true);
        let mut buf = [0u8; 16];
        assert!(stream.read(&mut buf).is_err());
        let progress = stream.progress();
        assert!(progress.has_ended());
        assert!(progress.last_error().unwrap().contains("corrupt packet"));
    }
}
