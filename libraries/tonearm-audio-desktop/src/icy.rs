//! ICY "now playing" metadata
//!
//! Internet radio servers interleave metadata into the audio bytes when the
//! request carries `Icy-MetaData: 1`. The response header `icy-metaint: N`
//! gives the layout:
//!
//! ```text
//! [N audio bytes][len][len * 16 metadata bytes][N audio bytes][len]...
//! ```
//!
//! Metadata blocks hold `key='value';` pairs padded with NULs. Only
//! `StreamTitle` is used.

use crate::error::{PlayerError, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;

const TITLE_KEY: &[u8] = b"streamtitle='";

/// Extract `StreamTitle` from one metadata block
///
/// The key match is case-insensitive; the value runs to the next `';` (or
/// the last quote) and trailing NUL padding is ignored.
pub fn parse_stream_title(block: &[u8]) -> Option<String> {
    let end = block.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let block = &block[..end];

    let lower = block.to_ascii_lowercase();
    let start = lower
        .windows(TITLE_KEY.len())
        .position(|w| w == TITLE_KEY)?
        + TITLE_KEY.len();
    let rest = &block[start..];

    let len = rest
        .windows(2)
        .position(|w| w == b"';")
        .or_else(|| rest.iter().rposition(|&b| b == b'\''))
        .unwrap_or(rest.len());

    let title = String::from_utf8_lossy(&rest[..len]).trim().to_string();
    (!title.is_empty()).then_some(title)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Audio bytes left before the next length byte
    Audio(usize),
    Length,
    /// Metadata bytes left in the current block
    Metadata(usize),
}

/// Incremental ICY stream parser
///
/// Feed it response bytes in any chunking; it returns each title that
/// differs from the last one it reported.
#[derive(Debug)]
pub struct IcyParser {
    metaint: usize,
    phase: Phase,
    block: Vec<u8>,
    last_title: Option<String>,
}

impl IcyParser {
    pub fn new(metaint: usize) -> Self {
        Self {
            metaint,
            phase: Phase::Audio(metaint),
            block: Vec::new(),
            last_title: None,
        }
    }

    pub fn feed(&mut self, mut chunk: &[u8]) -> Vec<String> {
        let mut titles = Vec::new();
        while !chunk.is_empty() {
            match self.phase {
                Phase::Audio(remaining) => {
                    let n = remaining.min(chunk.len());
                    chunk = &chunk[n..];
                    self.phase = if n == remaining {
                        Phase::Length
                    } else {
                        Phase::Audio(remaining - n)
                    };
                }
                Phase::Length => {
                    let len = usize::from(chunk[0]) * 16;
                    chunk = &chunk[1..];
                    self.block.clear();
                    self.phase = if len == 0 {
                        Phase::Audio(self.metaint)
                    } else {
                        Phase::Metadata(len)
                    };
                }
                Phase::Metadata(remaining) => {
                    let n = remaining.min(chunk.len());
                    self.block.extend_from_slice(&chunk[..n]);
                    chunk = &chunk[n..];
                    if n < remaining {
                        self.phase = Phase::Metadata(remaining - n);
                        continue;
                    }
                    self.phase = Phase::Audio(self.metaint);
                    if let Some(title) = parse_stream_title(&self.block) {
                        if self.last_title.as_deref() != Some(title.as_str()) {
                            self.last_title = Some(title.clone());
                            titles.push(title);
                        }
                    }
                }
            }
        }
        titles
    }
}

/// Background reader publishing live titles
pub struct IcyWatcher {
    titles: Receiver<String>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl IcyWatcher {
    /// Connect to `url` and start watching for titles
    ///
    /// Fails if the server does not answer within `header_timeout` or does
    /// not declare `icy-metaint`.
    pub fn open(url: &str, header_timeout: Duration) -> Result<Self> {
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (title_tx, title_rx) = bounded::<String>(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let url = url.to_string();
        let drain = title_rx.clone();
        let thread = thread::Builder::new()
            .name("tonearm-icy".to_string())
            .spawn(move || {
                Self::watch(&url, header_timeout, &ready_tx, &title_tx, &drain, shutdown_rx);
            })
            .map_err(|e| PlayerError::Icy(format!("Failed to spawn watcher: {}", e)))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| PlayerError::Icy("watcher exited during connect".to_string()))
            .and_then(|r| r);
        if let Err(e) = ready {
            let _ = thread.join();
            return Err(e);
        }

        Ok(Self {
            titles: title_rx,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Receiver of new titles; disconnected once the watcher stops
    pub fn titles(&self) -> Receiver<String> {
        self.titles.clone()
    }

    /// Stop the read loop and wait for the thread; idempotent
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("ICY watcher thread panicked");
            }
        }
    }

    /// Watcher thread body
    fn watch(
        url: &str,
        header_timeout: Duration,
        ready: &Sender<Result<()>>,
        titles: &Sender<String>,
        drain: &Receiver<String>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                let _ = ready.send(Err(PlayerError::Icy(format!(
                    "Failed to create runtime: {}",
                    e
                ))));
                return;
            }
        };

        runtime.block_on(async {
            let (mut response, metaint) = match Self::connect(url, header_timeout).await {
                Ok(connected) => {
                    let _ = ready.send(Ok(()));
                    connected
                }
                Err(e) => {
                    let _ = ready.send(Err(e));
                    return;
                }
            };

            tracing::debug!(url, metaint, "ICY watcher connected");
            let mut parser = IcyParser::new(metaint);
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    chunk = response.chunk() => match chunk {
                        Ok(Some(bytes)) => {
                            for title in parser.feed(&bytes) {
                                tracing::info!(%title, "Live title changed");
                                // Single slot: a newer title replaces an unread one
                                let _ = drain.try_recv();
                                let _ = titles.try_send(title);
                            }
                        }
                        Ok(None) => {
                            tracing::debug!("ICY stream ended");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "ICY stream dropped");
                            break;
                        }
                    },
                }
            }
        });
    }

    async fn connect(url: &str, header_timeout: Duration) -> Result<(reqwest::Response, usize)> {
        let client = reqwest::Client::new();
        let request = client.get(url).header("Icy-MetaData", "1").send();

        let response = tokio::time::timeout(header_timeout, request)
            .await
            .map_err(|_| PlayerError::Icy(format!("no response within {:?}", header_timeout)))??;

        if !response.status().is_success() {
            return Err(PlayerError::Icy(format!("HTTP error: {}", response.status())));
        }

        let metaint = response
            .headers()
            .get("icy-metaint")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .ok_or_else(|| PlayerError::Icy("server did not send icy-metaint".to_string()))?;

        Ok((response, metaint))
    }
}

impl Drop for IcyWatcher {
    fn drop(&mut self) {
        self.close();
    }
}
