//! Shared helpers for player integration tests
//!
//! `ManualBackend` stands in for the sound card: nothing is pulled until a
//! test calls [`ManualBackend::pull`], so position and completion are fully
//! deterministic.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tonearm_audio_desktop::{
    AudioBackend, OutputSession, PcmSource, PlayerConfig, PlayerError, Result,
};

struct Slot {
    source: PcmSource,
    playing: AtomicBool,
    volume: Mutex<f32>,
}

type Slots = Arc<Mutex<Vec<Arc<Slot>>>>;

struct ManualSession {
    slot: Arc<Slot>,
    slots: Slots,
}

impl OutputSession for ManualSession {
    fn play(&self) -> Result<()> {
        self.slot.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.slot.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.slot.playing.load(Ordering::SeqCst)
    }

    fn set_volume(&self, volume: f32) {
        *self.slot.volume.lock() = volume;
    }
}

impl Drop for ManualSession {
    fn drop(&mut self) {
        self.slots.lock().retain(|s| !Arc::ptr_eq(s, &self.slot));
    }
}

#[derive(Default)]
pub struct ManualBackend {
    slots: Slots,
    opened: AtomicUsize,
    fail_open: AtomicBool,
}

impl ManualBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pull up to `bytes` from every playing session, returning the total
    pub fn pull(&self, bytes: usize) -> usize {
        let active: Vec<Arc<Slot>> = self
            .slots
            .lock()
            .iter()
            .filter(|s| s.playing.load(Ordering::SeqCst))
            .cloned()
            .collect();

        let mut total = 0;
        for slot in active {
            let mut buf = vec![0u8; bytes];
            let mut filled = 0;
            let mut source = slot.source.lock();
            while filled < bytes {
                match source.read(&mut buf[filled..]) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => filled += n,
                }
            }
            total += filled;
        }
        total
    }

    /// Pull until every session stops producing
    pub fn drain(&self) -> usize {
        let mut total = 0;
        loop {
            let n = self.pull(64 * 1024);
            if n == 0 {
                return total;
            }
            total += n;
        }
    }

    /// Sessions opened so far, including dropped ones
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Sessions currently attached
    pub fn attached(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn playing(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|s| s.playing.load(Ordering::SeqCst))
            .count()
    }

    /// Make subsequent `open_session` calls fail
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Volume of the most recently opened attached session
    pub fn volume(&self) -> Option<f32> {
        self.slots.lock().last().map(|s| *s.volume.lock())
    }
}

impl AudioBackend for ManualBackend {
    fn open_session(&self, source: PcmSource) -> Result<Box<dyn OutputSession>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(PlayerError::DeviceError("output device went away".to_string()));
        }
        let slot = Arc::new(Slot {
            source,
            playing: AtomicBool::new(false),
            volume: Mutex::new(1.0),
        });
        self.slots.lock().push(Arc::clone(&slot));
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ManualSession {
            slot,
            slots: Arc::clone(&self.slots),
        }))
    }
}

/// Config with a fast completion monitor
pub fn test_config() -> PlayerConfig {
    PlayerConfig {
        monitor_interval_ms: 5,
        ..PlayerConfig::default()
    }
}

/// Write a 16-bit sine WAV
pub fn write_sine(dir: &Path, name: &str, rate: u32, channels: u16, secs: f32) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    let frames = (rate as f32 * secs) as usize;
    for i in 0..frames {
        let t = i as f32 / rate as f32;
        let s = ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 12000.0) as i16;
        for _ in 0..channels {
            writer.write_sample(s).unwrap();
        }
    }
    writer.finalize().unwrap();
    path
}

pub fn assert_close(actual: Duration, expected: Duration, tolerance: Duration) {
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff <= tolerance,
        "expected {:?} within {:?}, got {:?}",
        expected,
        tolerance,
        actual
    );
}
