//! Output player
//!
//! Owns one decode chain, the output session pulling from it, and a
//! completion monitor. All mutable state sits behind a single lock; seek
//! and restart swap the output session as one step under that lock, so two
//! sessions never pull from the same chain.
//!
//! Lock order is always state, then stream. Speed changes and shutting the
//! transcoder down take neither lock.

use crate::backend::{AudioBackend, CpalBackend, OutputSession, PcmSource};
use crate::config::PlayerConfig;
use crate::error::{PlayerError, Result};
use crate::icy::IcyWatcher;
use crate::live::{LiveDecoder, TranscoderHandle};
use crate::stream::{PlaybackStream, SpeedControl, StreamProgress};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tonearm_audio::format::{bytes_to_duration, duration_to_bytes, BYTES_PER_SECOND};
use tonearm_audio::{PcmDecoder, SampleRing, SpeedMode};

/// Live-only resources
struct LiveParts {
    transcoder: TranscoderHandle,
    icy: Option<IcyWatcher>,
}

struct PlayerState {
    /// `None` once closed
    stream: Option<Arc<Mutex<PlaybackStream>>>,
    session: Option<Box<dyn OutputSession>>,
    paused: bool,
    volume: f32,
    closed: bool,

    done: Receiver<()>,
    /// Stop flag of the current monitor
    monitor_stop: Arc<AtomicBool>,
    /// Whether the current completion signal has fired
    fired: bool,

    icy: Option<IcyWatcher>,
}

/// Plays one local file or live stream
pub struct Player {
    state: Arc<Mutex<PlayerState>>,
    progress: Arc<StreamProgress>,
    speed: Arc<SpeedControl>,
    ring: Arc<SampleRing>,
    backend: Arc<dyn AudioBackend>,
    transcoder: Option<TranscoderHandle>,
    config: PlayerConfig,
    length: Option<u64>,
    seekable: bool,
    live: bool,
    titles: Option<Receiver<String>>,
}

impl Player {
    /// Open a local file and start playing on the shared output
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, PlayerConfig::default(), CpalBackend::shared()?)
    }

    /// Open a live stream URL and start playing on the shared output
    pub fn open_stream(url: &str) -> Result<Self> {
        Self::open_stream_with(url, PlayerConfig::default(), CpalBackend::shared()?)
    }

    pub fn open_with(path: &Path, config: PlayerConfig, backend: Arc<dyn AudioBackend>) -> Result<Self> {
        let source = tonearm_audio::open_file(path)?;
        tracing::info!(path = %path.display(), "Opening file");
        Self::start(source, config, backend, None)
    }

    pub fn open_stream_with(
        url: &str,
        config: PlayerConfig,
        backend: Arc<dyn AudioBackend>,
    ) -> Result<Self> {
        let decoder = LiveDecoder::spawn(&config.transcoder_path, url)?;
        let transcoder = decoder.handle();

        let icy = match IcyWatcher::open(url, config.icy_header_timeout()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(url, error = %e, "Live titles unavailable");
                None
            }
        };

        tracing::info!(url, "Opening live stream");
        Self::start(Box::new(decoder), config, backend, Some(LiveParts { transcoder, icy }))
    }

    fn start(
        source: Box<dyn PcmDecoder>,
        config: PlayerConfig,
        backend: Arc<dyn AudioBackend>,
        live: Option<LiveParts>,
    ) -> Result<Self> {
        let ring = Arc::new(SampleRing::new(config.sample_ring_bytes));
        let stream = PlaybackStream::new(source, &config, Arc::clone(&ring));
        let progress = stream.progress();
        let speed = stream.speed_control();
        let length = stream.length();
        let seekable = stream.is_seekable();
        let stream = Arc::new(Mutex::new(stream));

        let pcm: PcmSource = stream.clone();
        let session = backend.open_session(pcm)?;
        session.set_volume(1.0);
        session.play()?;

        let (transcoder, icy) = match live {
            Some(parts) => (Some(parts.transcoder), parts.icy),
            None => (None, None),
        };
        let titles = icy.as_ref().map(IcyWatcher::titles);
        let is_live = transcoder.is_some();

        let (done_tx, done_rx) = bounded(1);
        let monitor_stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(PlayerState {
            stream: Some(stream),
            session: Some(session),
            paused: false,
            volume: 1.0,
            closed: false,
            done: done_rx,
            monitor_stop: Arc::clone(&monitor_stop),
            fired: false,
            icy,
        }));

        let player = Self {
            state,
            progress,
            speed,
            ring,
            backend,
            transcoder,
            config,
            length,
            seekable,
            live: is_live,
            titles,
        };
        // On failure the dropped player closes the session and transcoder
        player.spawn_monitor(monitor_stop, done_tx)?;

        tracing::info!(
            duration = ?player.duration(),
            seekable,
            live = is_live,
            "Playback started"
        );
        Ok(player)
    }

    /// Poll for completion; fires `done` once and exits
    fn spawn_monitor(&self, stop: Arc<AtomicBool>, done: Sender<()>) -> Result<()> {
        let state = Arc::clone(&self.state);
        let progress = Arc::clone(&self.progress);
        let length = self.length;
        let interval = self.config.monitor_interval();

        thread::Builder::new()
            .name("tonearm-monitor".to_string())
            .spawn(move || loop {
                thread::sleep(interval);
                let mut st = state.lock();
                if stop.load(Ordering::Acquire) || st.closed {
                    return;
                }
                if st.paused {
                    continue;
                }
                let finished = progress.has_ended()
                    || length.is_some_and(|total| progress.position() >= total);
                if finished {
                    st.fired = true;
                    let _ = done.try_send(());
                    tracing::debug!(position = progress.position(), "Playback complete");
                    return;
                }
            })
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to spawn completion monitor");
                PlayerError::Monitor(e.to_string())
            })?;
        Ok(())
    }

    /// Replace the completion signal and monitor
    fn rearm(&self, st: &mut PlayerState) -> Result<()> {
        st.monitor_stop.store(true, Ordering::Release);
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = bounded(1);
        st.monitor_stop = Arc::clone(&stop);
        st.done = done_rx;
        st.fired = false;
        self.spawn_monitor(stop, done_tx)
    }

    /// Pause the old session, reposition, and start a new session
    ///
    /// The old session stays installed until its replacement is ready. On
    /// failure it is resumed and the position is left where it was.
    fn recreate(&self, st: &mut PlayerState, target: u64) -> Result<()> {
        let Some(stream) = st.stream.clone() else {
            return Ok(());
        };
        if let Some(old) = &st.session {
            old.pause()?;
        }

        match self.reposition(st, stream, target) {
            Ok(landed) => {
                tracing::info!(position = ?bytes_to_duration(landed), "Seeked");
                Ok(())
            }
            Err(e) => {
                if let (false, Some(old)) = (st.paused, &st.session) {
                    if let Err(resume) = old.play() {
                        tracing::warn!(error = %resume, "Failed to resume output after failed seek");
                    }
                }
                Err(e)
            }
        }
    }

    /// Open a stopped session, seek, then start it in place of the old one
    fn reposition(
        &self,
        st: &mut PlayerState,
        stream: Arc<Mutex<PlaybackStream>>,
        target: u64,
    ) -> Result<u64> {
        let pcm: PcmSource = stream.clone();
        let session = self.backend.open_session(pcm)?;
        let landed = stream.lock().seek_to(target)?;

        session.set_volume(st.volume);
        if !st.paused {
            session.play()?;
        }
        drop(st.session.replace(session));
        Ok(landed)
    }

    fn seek_bytes(&self, target: u64) -> Result<()> {
        if !self.seekable {
            return Ok(());
        }
        let mut st = self.state.lock();
        if st.closed {
            return Ok(());
        }
        let target = self.length.map_or(target, |len| target.min(len));
        self.recreate(&mut st, target)?;
        if st.fired {
            self.rearm(&mut st)?;
        }
        Ok(())
    }

    pub fn toggle_pause(&self) -> Result<()> {
        let mut st = self.state.lock();
        if st.closed {
            return Ok(());
        }
        st.paused = !st.paused;
        if let Some(session) = &st.session {
            if st.paused {
                session.pause()?;
            } else {
                session.play()?;
            }
        }
        tracing::debug!(paused = st.paused, "Pause toggled");
        Ok(())
    }

    pub fn paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Time played so far
    pub fn position(&self) -> Duration {
        bytes_to_duration(self.progress.position())
    }

    /// Total time, zero for live streams
    pub fn duration(&self) -> Duration {
        self.length.map(bytes_to_duration).unwrap_or_default()
    }

    pub fn can_seek(&self) -> bool {
        self.seekable
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Seek relative to the current position; negative goes back
    pub fn seek(&self, delta_secs: f64) -> Result<()> {
        let delta = (delta_secs * BYTES_PER_SECOND as f64) as i128;
        let target = (i128::from(self.progress.position()) + delta).max(0) as u64;
        self.seek_bytes(target)
    }

    /// Seek to an absolute position
    pub fn seek_to(&self, position: Duration) -> Result<()> {
        self.seek_bytes(duration_to_bytes(position))
    }

    /// Seek to the start and resume, with a fresh completion signal
    pub fn restart(&self) -> Result<()> {
        let mut st = self.state.lock();
        if st.closed {
            return Ok(());
        }
        st.paused = false;
        if self.seekable {
            self.recreate(&mut st, 0)?;
        } else if let Some(session) = &st.session {
            session.play()?;
        }
        self.rearm(&mut st)
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    pub fn set_volume(&self, volume: f32) {
        let mut st = self.state.lock();
        if st.closed {
            return;
        }
        st.volume = volume.clamp(0.0, 1.0);
        if let Some(session) = &st.session {
            session.set_volume(st.volume);
        }
    }

    /// Change volume by `delta`, returning the new level
    pub fn adjust_volume(&self, delta: f32) -> f32 {
        let mut st = self.state.lock();
        if st.closed {
            return st.volume;
        }
        st.volume = (st.volume + delta).clamp(0.0, 1.0);
        if let Some(session) = &st.session {
            session.set_volume(st.volume);
        }
        st.volume
    }

    pub fn speed(&self) -> SpeedMode {
        self.speed.get()
    }

    /// Rotate 1x, 2x, 0.5x
    pub fn cycle_speed(&self) -> SpeedMode {
        let st = self.state.lock();
        let next = self.speed.get().next();
        self.apply_speed(&st, next);
        self.speed.get()
    }

    pub fn set_speed(&self, mode: SpeedMode) {
        self.apply_speed(&self.state.lock(), mode);
    }

    /// Takes effect on the stream's next read
    fn apply_speed(&self, st: &PlayerState, mode: SpeedMode) {
        if st.closed {
            return;
        }
        self.speed.set(mode);
        tracing::debug!(speed = %mode, "Speed changed");
    }

    /// The most recent `n` bytes of output, for visualizers
    pub fn samples(&self, n: usize) -> Vec<u8> {
        self.ring.snapshot(n)
    }

    /// Live title updates; `None` unless playing a stream with ICY metadata
    pub fn title_updates(&self) -> Option<Receiver<String>> {
        self.titles.clone()
    }

    /// Fires once when playback reaches the end
    ///
    /// Restart, and a seek after completion, replace the signal; fetch it
    /// again afterwards. The receiver disconnects without a message when the
    /// player closes or the signal is replaced.
    pub fn done(&self) -> Receiver<()> {
        self.state.lock().done.clone()
    }

    /// Last read error from the decode chain
    pub fn last_error(&self) -> Option<String> {
        self.progress.last_error()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Stop playback and release the chain; idempotent
    pub fn close(&self) {
        // Idempotent, and safe to run before the state lock is taken
        if let Some(transcoder) = &self.transcoder {
            transcoder.shutdown();
        }

        let (session, stream, icy) = {
            let mut st = self.state.lock();
            if st.closed {
                return;
            }
            st.closed = true;
            st.monitor_stop.store(true, Ordering::Release);
            (st.session.take(), st.stream.take(), st.icy.take())
        };

        if let Some(session) = session {
            if let Err(e) = session.pause() {
                tracing::warn!(error = %e, "Failed to pause output on close");
            }
        }
        drop(stream);
        if let Some(mut icy) = icy {
            icy.close();
        }
        tracing::info!("Player closed");
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("position", &self.position())
            .field("duration", &self.duration())
            .field("live", &self.live)
            .finish_non_exhaustive()
    }
}

