//! Tonearm Audio
//!
//! Platform-agnostic decode chain for Tonearm.
//!
//! This crate provides:
//! - Source decoders for MP3 (gapless), WAV, FLAC, Ogg/Vorbis and AAC/ALAC
//! - A normalizer that upmixes and resamples to 44.1 kHz stereo
//! - A speed transform for 2x and 0.5x playback
//! - A sample ring buffer for visualizers
//!
//! Every stage implements [`PcmDecoder`], so a chain is built by wrapping:
//!
//! ```rust,no_run
//! use tonearm_audio::{decoder, Normalizer, PcmDecoder, SpeedMode, SpeedTransform};
//! use std::path::Path;
//!
//! # fn example() -> tonearm_audio::Result<()> {
//! let source = decoder::open_file(Path::new("/music/song.flac"))?;
//! let mut chain = SpeedTransform::new(Normalizer::new(source));
//! chain.set_mode(SpeedMode::Double);
//!
//! let mut buf = vec![0u8; 4096];
//! let n = chain.read(&mut buf)?;
//! println!("{} bytes of 44.1 kHz stereo", n);
//! # Ok(())
//! # }
//! ```

pub mod decoder;
mod error;
pub mod format;
pub mod gapless;
pub mod normalizer;
pub mod ring_buffer;
pub mod speed;

pub use decoder::{open_file, PcmDecoder, SourceFormat};
pub use error::{AudioError, Result};
pub use gapless::GaplessTrim;
pub use normalizer::Normalizer;
pub use ring_buffer::SampleRing;
pub use speed::{SpeedMode, SpeedRead, SpeedTransform};
