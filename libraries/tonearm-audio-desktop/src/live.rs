//! Live stream decoding through an external transcoder
//!
//! The transcoder connects to the URL (reconnecting on its own), converts
//! whatever codec the station uses, and writes 44.1 kHz stereo s16le to
//! its stdout. A reader thread queues that pipe for the decoder, which has
//! no length and cannot seek.

use crate::error::{PlayerError, Result};
use crossbeam_channel::{Receiver, TryRecvError};
use parking_lot::Mutex;
use std::io::{self, Read, SeekFrom};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tonearm_audio::format::{CANONICAL_CHANNELS, CANONICAL_FRAME_SIZE, CANONICAL_SAMPLE_RATE};
use tonearm_audio::{AudioError, PcmDecoder};

/// How often the exit watcher polls the transcoder
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Largest single read from the transcoder pipe
const PIPE_CHUNK_BYTES: usize = 8192;

/// Chunks buffered ahead of playback, roughly 0.75 s of canonical PCM
const PIPE_QUEUE_CHUNKS: usize = 16;

/// Arguments for a reconnecting PCM transcode of `url`
pub fn transcoder_args(url: &str) -> Vec<String> {
    let rate = CANONICAL_SAMPLE_RATE.to_string();
    let channels = CANONICAL_CHANNELS.to_string();
    [
        "-nostdin",
        "-loglevel",
        "quiet",
        "-reconnect",
        "1",
        "-reconnect_streamed",
        "1",
        "-reconnect_delay_max",
        "5",
        "-i",
        url,
        "-vn",
        "-ac",
        channels.as_str(),
        "-ar",
        rate.as_str(),
        "-f",
        "s16le",
        "pipe:1",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

/// Owner of the transcoder process
///
/// Cloneable; every clone refers to the same process. `shutdown` is
/// idempotent and returns only after the process has exited.
#[derive(Clone)]
pub struct TranscoderHandle {
    child: Arc<Mutex<Option<Child>>>,
    cancelled: Arc<AtomicBool>,
}

impl TranscoderHandle {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Cancel, force-terminate and reap the process
    pub fn shutdown(&self) {
        self.cancelled.store(true, Ordering::Release);
        let Some(mut child) = self.child.lock().take() else {
            return;
        };

        let pid = child.id();
        if let Err(e) = child.kill() {
            tracing::debug!(pid, error = %e, "Transcoder already exited");
        }
        match child.wait() {
            Ok(status) => tracing::debug!(pid, %status, "Transcoder stopped"),
            Err(e) => tracing::warn!(pid, error = %e, "Failed to reap transcoder"),
        }
    }

    /// Watch for the process exiting on its own and log how it ended
    fn spawn_exit_watcher(&self) {
        let handle = self.clone();
        let spawned = thread::Builder::new()
            .name("tonearm-transcoder-wait".to_string())
            .spawn(move || loop {
                {
                    let mut guard = handle.child.lock();
                    let Some(child) = guard.as_mut() else {
                        return;
                    };
                    match child.try_wait() {
                        Ok(Some(status)) if status.success() => {
                            tracing::info!("Transcoder finished");
                            return;
                        }
                        Ok(Some(status)) => {
                            tracing::warn!(%status, "Transcoder exited with failure");
                            return;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to poll transcoder");
                            return;
                        }
                    }
                }
                thread::sleep(EXIT_POLL_INTERVAL);
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "Failed to spawn transcoder watcher");
        }
    }
}

/// PCM from a transcoder subprocess
///
/// A reader thread drains the pipe into a bounded queue so `read` never
/// blocks on the process. When the queue runs dry the decoder plays
/// silence until more data arrives.
pub struct LiveDecoder {
    chunks: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    finished: bool,
    handle: TranscoderHandle,
}

impl LiveDecoder {
    /// Start `program` transcoding `url`
    ///
    /// A missing program is reported as [`PlayerError::TranscoderNotFound`].
    pub fn spawn(program: &Path, url: &str) -> Result<Self> {
        let mut child = Command::new(program)
            .args(transcoder_args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    PlayerError::TranscoderNotFound {
                        program: program.display().to_string(),
                    }
                } else {
                    PlayerError::Transcoder(format!(
                        "Failed to start {}: {}",
                        program.display(),
                        e
                    ))
                }
            })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PlayerError::Transcoder(
                "transcoder stdout was not captured".to_string(),
            ));
        };

        tracing::info!(url, pid = child.id(), program = %program.display(), "Transcoder started");
        let handle = TranscoderHandle {
            child: Arc::new(Mutex::new(Some(child))),
            cancelled: Arc::new(AtomicBool::new(false)),
        };

        let chunks = match spawn_pipe_reader(stdout, handle.clone()) {
            Ok(chunks) => chunks,
            Err(e) => {
                handle.shutdown();
                return Err(PlayerError::Transcoder(format!(
                    "Failed to spawn pipe reader: {e}"
                )));
            }
        };
        handle.spawn_exit_watcher();

        Ok(Self {
            chunks,
            pending: Vec::new(),
            finished: false,
            handle,
        })
    }

    /// Handle for shutting the process down from another thread
    pub fn handle(&self) -> TranscoderHandle {
        self.handle.clone()
    }

    /// Move queued chunks into `pending` until `want` bytes are buffered
    fn top_up(&mut self, want: usize) {
        while self.pending.len() < want {
            match self.chunks.try_recv() {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

/// Drain `stdout` on its own thread into a bounded chunk queue
///
/// The queue disconnects when the pipe reaches end of file or fails.
fn spawn_pipe_reader(
    mut stdout: ChildStdout,
    handle: TranscoderHandle,
) -> io::Result<Receiver<Vec<u8>>> {
    let (tx, rx) = crossbeam_channel::bounded(PIPE_QUEUE_CHUNKS);
    thread::Builder::new()
        .name("tonearm-transcoder-read".to_string())
        .spawn(move || {
            let mut buf = vec![0u8; PIPE_CHUNK_BYTES];
            loop {
                let n = match stdout.read(&mut buf) {
                    Ok(0) => {
                        tracing::debug!("Transcoder pipe closed");
                        return;
                    }
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        if !handle.is_cancelled() {
                            tracing::warn!(error = %e, "Transcoder pipe read failed");
                        }
                        return;
                    }
                };
                if tx.send(buf[..n].to_vec()).is_err() {
                    return;
                }
            }
        })?;
    Ok(rx)
}

impl PcmDecoder for LiveDecoder {
    fn read(&mut self, buf: &mut [u8]) -> tonearm_audio::Result<usize> {
        let len = buf.len() - buf.len() % CANONICAL_FRAME_SIZE;
        if len == 0 || self.handle.is_cancelled() {
            return Ok(0);
        }

        self.top_up(len);
        let available = self.pending.len().min(len);
        let available = available - available % CANONICAL_FRAME_SIZE;
        if available > 0 {
            buf[..available].copy_from_slice(&self.pending[..available]);
            self.pending.drain(..available);
            return Ok(available);
        }

        // A trailing partial frame at end of stream is dropped
        if self.finished {
            return Ok(0);
        }
        tracing::trace!(bytes = len, "Transcoder underrun, playing silence");
        buf[..len].fill(0);
        Ok(len)
    }

    fn seek(&mut self, _pos: SeekFrom) -> tonearm_audio::Result<u64> {
        Err(AudioError::SeekError("live streams are not seekable".to_string()))
    }

    fn length(&self) -> Option<u64> {
        None
    }

    fn sample_rate(&self) -> u32 {
        CANONICAL_SAMPLE_RATE
    }

    fn channel_count(&self) -> u16 {
        CANONICAL_CHANNELS
    }

    fn is_seekable(&self) -> bool {
        false
    }
}

impl Drop for LiveDecoder {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}
