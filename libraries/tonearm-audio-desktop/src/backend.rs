//! Audio output backend
//!
//! The player talks to the platform through two small traits:
//! [`AudioBackend`] opens an [`OutputSession`] that pulls canonical PCM
//! from a shared reader. There is no completion callback and no in-place
//! seek; the player recreates sessions instead.
//!
//! [`CpalBackend`] is the desktop implementation. One process-wide instance
//! owns a dedicated audio thread holding a single cpal stream at 44.1 kHz
//! stereo, and mixes every playing session into it.

use crate::error::{PlayerError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use tonearm_audio::format::{CANONICAL_CHANNELS, CANONICAL_SAMPLE_RATE};

/// Canonical PCM shared between the player and an output session
pub type PcmSource = Arc<Mutex<dyn Read + Send>>;

/// Something that can play canonical PCM
pub trait AudioBackend: Send + Sync {
    /// Start a paused session pulling from `source`
    fn open_session(&self, source: PcmSource) -> Result<Box<dyn OutputSession>>;
}

/// One consumer of a [`PcmSource`]; dropping it stops all pulls
pub trait OutputSession: Send {
    fn play(&self) -> Result<()>;
    fn pause(&self) -> Result<()>;
    fn is_playing(&self) -> bool;
    /// Linear gain, 0.0 to 1.0
    fn set_volume(&self, volume: f32);
}

/// Commands sent to the audio thread
enum AudioCommand {
    /// Drop the stream and exit
    Shutdown,
}

/// Per-session state shared with the audio callback
struct SessionShared {
    source: PcmSource,
    playing: AtomicBool,
    /// f32 bits
    volume: AtomicU32,
}

impl SessionShared {
    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }
}

/// Sessions currently attached to the output stream
#[derive(Default)]
struct Mixer {
    sessions: Mutex<Vec<Arc<SessionShared>>>,
}

/// Reusable buffers for the real-time callback
#[derive(Default)]
struct Renderer {
    active: Vec<Arc<SessionShared>>,
    bytes: Vec<u8>,
    mix: Vec<f32>,
}

impl Renderer {
    /// Audio callback body (runs in the real-time audio thread)
    fn render<T>(&mut self, output: &mut [T], mixer: &Mixer)
    where
        T: SizedSample + FromSample<f32>,
    {
        self.mix.clear();
        self.mix.resize(output.len(), 0.0);

        // Snapshot so no session lock is held while pulling PCM
        {
            let sessions = mixer.sessions.lock();
            self.active.clear();
            self.active.extend(
                sessions
                    .iter()
                    .filter(|s| s.playing.load(Ordering::Acquire))
                    .cloned(),
            );
        }

        for session in &self.active {
            let mut source = session.source.lock();
            // Checked under the source lock: a session paused for a seek must not pull
            if !session.playing.load(Ordering::Acquire) {
                continue;
            }
            self.bytes.resize(output.len() * 2, 0);
            let filled = fill_from(&mut *source, &mut self.bytes);
            drop(source);

            let volume = session.volume();
            for (sample, pcm) in self.mix.iter_mut().zip(self.bytes[..filled].chunks_exact(2)) {
                *sample += f32::from(i16::from_le_bytes([pcm[0], pcm[1]])) / 32768.0 * volume;
            }
        }
        self.active.clear();

        for (out, &sample) in output.iter_mut().zip(&self.mix) {
            *out = T::from_sample(sample.clamp(-1.0, 1.0));
        }
    }
}

/// Read until `buf` is full or the source stops producing
fn fill_from(source: &mut (dyn Read + Send), buf: &mut [u8]) -> usize {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::error!(error = %e, "Output source read failed");
                break;
            }
        }
    }
    // Whole samples only
    filled - filled % 2
}

/// Session handle returned by [`CpalBackend`]
struct CpalSession {
    shared: Arc<SessionShared>,
    mixer: Arc<Mixer>,
}

impl OutputSession for CpalSession {
    fn play(&self) -> Result<()> {
        self.shared.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.shared.playing.store(false, Ordering::Release);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    fn set_volume(&self, volume: f32) {
        self.shared
            .volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

impl Drop for CpalSession {
    fn drop(&mut self) {
        self.shared.playing.store(false, Ordering::Release);
        self.mixer
            .sessions
            .lock()
            .retain(|s| !Arc::ptr_eq(s, &self.shared));
    }
}

/// cpal output backend
///
/// **Architecture**: the cpal `Stream` is not `Send` on every platform, so a
/// dedicated audio thread builds and owns it. The backend itself only holds
/// the mixer and a command channel, and can be shared freely.
pub struct CpalBackend {
    mixer: Arc<Mixer>,
    command_tx: Sender<AudioCommand>,
    _audio_thread: Option<JoinHandle<()>>,
}

static SHARED_BACKEND: OnceLock<std::result::Result<Arc<CpalBackend>, String>> = OnceLock::new();

impl CpalBackend {
    /// The process-wide backend, created on first use
    ///
    /// If initialization fails, every call returns the same
    /// [`PlayerError::OutputInit`] without retrying.
    pub fn shared() -> Result<Arc<Self>> {
        SHARED_BACKEND
            .get_or_init(|| {
                Self::new().map(Arc::new).map_err(|e| {
                    tracing::error!(error = %e, "Audio output initialization failed");
                    e.to_string()
                })
            })
            .clone()
            .map_err(PlayerError::OutputInit)
    }

    /// Open the default output device on a new audio thread
    pub fn new() -> Result<Self> {
        let mixer = Arc::new(Mixer::default());
        let (command_tx, command_rx) = bounded::<AudioCommand>(1);
        let (init_tx, init_rx) = bounded::<Result<String>>(1);

        let mixer_clone = Arc::clone(&mixer);
        let audio_thread = thread::Builder::new()
            .name("tonearm-audio-output".to_string())
            .spawn(move || Self::audio_thread_run(mixer_clone, init_tx, command_rx))
            .map_err(|e| PlayerError::DeviceError(format!("Failed to spawn audio thread: {}", e)))?;

        let device_name = init_rx
            .recv()
            .map_err(|_| PlayerError::DeviceError("Audio thread exited during startup".to_string()))??;

        tracing::info!(device = %device_name, "Audio output started");
        Ok(Self {
            mixer,
            command_tx,
            _audio_thread: Some(audio_thread),
        })
    }

    /// Audio thread main loop
    ///
    /// Owns the cpal stream for its whole life and reports startup success
    /// or failure through `init_tx`.
    fn audio_thread_run(
        mixer: Arc<Mixer>,
        init_tx: Sender<Result<String>>,
        command_rx: Receiver<AudioCommand>,
    ) {
        let stream = match Self::start_stream(&mixer) {
            Ok((stream, name)) => {
                let _ = init_tx.send(Ok(name));
                stream
            }
            Err(e) => {
                let _ = init_tx.send(Err(e));
                return;
            }
        };

        while let Ok(cmd) = command_rx.recv() {
            match cmd {
                AudioCommand::Shutdown => break,
            }
        }
        drop(stream);
        tracing::debug!("Audio thread stopped");
    }

    fn start_stream(mixer: &Arc<Mixer>) -> Result<(Stream, String)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(PlayerError::DeviceNotFound)?;
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let (config, sample_format) = Self::find_config(&device)?;
        let stream = match sample_format {
            SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, mixer)?,
            SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, mixer)?,
            other => {
                return Err(PlayerError::UnsupportedDevice(format!(
                    "sample format {:?}",
                    other
                )))
            }
        };
        stream.play()?;
        Ok((stream, name))
    }

    /// Pick a stereo config that supports the canonical rate, preferring f32
    fn find_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
        let mut fallback = None;
        for supported in device.supported_output_configs()? {
            let in_range = supported.min_sample_rate() <= CANONICAL_SAMPLE_RATE
                && supported.max_sample_rate() >= CANONICAL_SAMPLE_RATE;
            if supported.channels() != CANONICAL_CHANNELS || !in_range {
                continue;
            }
            match supported.sample_format() {
                SampleFormat::F32 => {
                    fallback = Some(SampleFormat::F32);
                    break;
                }
                SampleFormat::I16 if fallback.is_none() => fallback = Some(SampleFormat::I16),
                _ => {}
            }
        }

        let sample_format = fallback.ok_or_else(|| {
            PlayerError::UnsupportedDevice(format!(
                "no {}-channel {} Hz output config",
                CANONICAL_CHANNELS, CANONICAL_SAMPLE_RATE
            ))
        })?;

        let config = StreamConfig {
            channels: CANONICAL_CHANNELS,
            sample_rate: CANONICAL_SAMPLE_RATE,
            buffer_size: cpal::BufferSize::Default,
        };
        Ok((config, sample_format))
    }

    fn build_stream<T>(device: &Device, config: &StreamConfig, mixer: &Arc<Mixer>) -> Result<Stream>
    where
        T: SizedSample + FromSample<f32> + Send + 'static,
    {
        let mixer = Arc::clone(mixer);
        let mut renderer = Renderer::default();
        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| renderer.render(data, &mixer),
            |err| tracing::error!(error = %err, "Audio stream error"),
            None,
        )?;
        Ok(stream)
    }
}

impl AudioBackend for CpalBackend {
    fn open_session(&self, source: PcmSource) -> Result<Box<dyn OutputSession>> {
        let shared = Arc::new(SessionShared {
            source,
            playing: AtomicBool::new(false),
            volume: AtomicU32::new(1.0f32.to_bits()),
        });
        self.mixer.sessions.lock().push(Arc::clone(&shared));
        Ok(Box::new(CpalSession {
            shared,
            mixer: Arc::clone(&self.mixer),
        }))
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        let _ = self.command_tx.send(AudioCommand::Shutdown);
    }
}
