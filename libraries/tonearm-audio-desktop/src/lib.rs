//! Desktop playback for Tonearm
//!
//! This crate turns the decode chain from `tonearm-audio` into a player:
//!
//! - A shared cpal output at 44.1 kHz stereo that mixes every player
//! - Local files and live streams (through an external transcoder)
//! - Pause, seek, restart, volume and 2x/0.5x speed
//! - A one-shot completion signal
//! - ICY "now playing" titles for live streams
//!
//! # Example
//!
//! ```no_run
//! use crossbeam_channel::RecvTimeoutError;
//! use tonearm_audio_desktop::Player;
//! use std::path::Path;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let player = Player::open(Path::new("/music/song.mp3"))?;
//! player.set_volume(0.8);
//! player.seek(30.0)?;
//!
//! let done = player.done();
//! while let Err(RecvTimeoutError::Timeout) = done.recv_timeout(Duration::from_secs(1)) {
//!     println!("{:?} / {:?}", player.position(), player.duration());
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod backend;
pub mod config;
mod error;
pub mod icy;
pub mod live;
mod player;
pub mod stream;

pub use backend::{AudioBackend, CpalBackend, OutputSession, PcmSource};
pub use config::PlayerConfig;
pub use error::{PlayerError, Result};
pub use player::Player;
pub use tonearm_audio::SpeedMode;
