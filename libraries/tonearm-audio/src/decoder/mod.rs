//! Source decoders
//!
//! Every supported format is exposed through [`PcmDecoder`]: interleaved
//! signed 16-bit little-endian PCM at the source's native sample rate and
//! channel count, addressed by byte offset.

mod frames;
mod mp3;
mod packet;
mod wav;

pub use frames::FrameQueue;
pub use mp3::Mp3Decoder;
pub use packet::{PacketCodec, PacketDecoder};
pub use wav::WavDecoder;

use crate::error::{AudioError, Result};
use crate::format;
use std::io::SeekFrom;
use std::path::Path;

/// A source of interleaved 16-bit PCM
///
/// Implementors return whole frames from every read. `Ok(0)` for a
/// non-empty buffer means the stream has ended.
pub trait PcmDecoder: Send {
    /// Read PCM into `buf`
    ///
    /// # Returns
    /// * `Ok(n)` - Bytes written, a multiple of the frame size (0 = end of stream)
    /// * `Err(_)` - Decoding or I/O error
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Reposition the stream by byte offset
    ///
    /// The target is clamped to `[0, length]` and rounded down to a whole
    /// frame. Returns the new offset.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Total decodable bytes, or `None` when unknown (live streams)
    fn length(&self) -> Option<u64>;

    /// Native sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Native channel count (1 or 2)
    fn channel_count(&self) -> u16;

    /// Whether `seek` can succeed at all
    fn is_seekable(&self) -> bool {
        true
    }

    /// Bytes per frame
    fn frame_size(&self) -> usize {
        format::frame_size(self.channel_count())
    }
}

impl<D: PcmDecoder + ?Sized> PcmDecoder for Box<D> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        (**self).seek(pos)
    }

    fn length(&self) -> Option<u64> {
        (**self).length()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn channel_count(&self) -> u16 {
        (**self).channel_count()
    }

    fn is_seekable(&self) -> bool {
        (**self).is_seekable()
    }
}

/// Container/codec family, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// MPEG-1/2 Layer III
    Mp3,
    /// RIFF/WAVE integer PCM
    Wav,
    /// Native FLAC
    Flac,
    /// Ogg Vorbis
    Vorbis,
    /// AAC/ALAC in MP4 (m4a, m4b) or raw ADTS AAC
    Aac,
}

impl SourceFormat {
    /// Detect the format from a path's extension (case-insensitive)
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| {
                AudioError::UnsupportedFormat(format!("no file extension: {}", path.display()))
            })?;

        match ext.as_str() {
            "mp3" => Ok(Self::Mp3),
            "wav" | "wave" => Ok(Self::Wav),
            "flac" => Ok(Self::Flac),
            "ogg" | "oga" => Ok(Self::Vorbis),
            "m4a" | "m4b" | "mp4" | "aac" => Ok(Self::Aac),
            other => Err(AudioError::UnsupportedFormat(format!(
                "unknown extension .{}",
                other
            ))),
        }
    }
}

/// Open a local audio file with the decoder matching its extension
pub fn open_file(path: &Path) -> Result<Box<dyn PcmDecoder>> {
    let format = SourceFormat::from_path(path)?;
    if !path.exists() {
        return Err(AudioError::FileNotFound(path.display().to_string()));
    }

    let decoder: Box<dyn PcmDecoder> = match format {
        SourceFormat::Mp3 => Box::new(Mp3Decoder::open(path)?),
        SourceFormat::Wav => Box::new(WavDecoder::open(path)?),
        SourceFormat::Flac => Box::new(PacketDecoder::open(path, PacketCodec::Flac)?),
        SourceFormat::Vorbis => Box::new(PacketDecoder::open(path, PacketCodec::Vorbis)?),
        SourceFormat::Aac => Box::new(PacketDecoder::open(path, PacketCodec::Aac)?),
    };

    tracing::debug!(
        path = %path.display(),
        ?format,
        sample_rate = decoder.sample_rate(),
        channels = decoder.channel_count(),
        length = ?decoder.length(),
        "Opened source decoder"
    );
    Ok(decoder)
}

/// Resolve a `SeekFrom` against a stream of known length
///
/// Clamps into `[0, length]` and rounds down to a whole frame.
pub fn resolve_seek(pos: SeekFrom, current: u64, length: u64, frame_size: usize) -> u64 {
    let target = match pos {
        SeekFrom::Start(offset) => offset as i128,
        SeekFrom::Current(delta) => current as i128 + delta as i128,
        SeekFrom::End(delta) => length as i128 + delta as i128,
    };
    let clamped = target.clamp(0, length as i128) as u64;
    format::align_down(clamped, frame_size)
}

/// Fill `buf` from `decoder`, stopping early only at end of stream
pub fn read_full<D: PcmDecoder + ?Sized>(decoder: &mut D, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = decoder.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Reject buffers that cannot hold a single frame
pub(crate) fn check_buffer(buf: &[u8], frame_size: usize) -> Result<()> {
    if !buf.is_empty() && buf.len() < frame_size {
        return Err(AudioError::InvalidBuffer(format!(
            "{} bytes is smaller than one {}-byte frame",
            buf.len(),
            frame_size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_formats_by_extension() {
        assert_eq!(SourceFormat::from_path(Path::new("a.mp3")).unwrap(), SourceFormat::Mp3);
        assert_eq!(SourceFormat::from_path(Path::new("a.WAV")).unwrap(), SourceFormat::Wav);
        assert_eq!(SourceFormat::from_path(Path::new("a.flac")).unwrap(), SourceFormat::Flac);
        assert_eq!(SourceFormat::from_path(Path::new("a.ogg")).unwrap(), SourceFormat::Vorbis);
        assert_eq!(SourceFormat::from_path(Path::new("a.m4b")).unwrap(), SourceFormat::Aac);
    }

    #[test]
    fn rejects_unknown_extension() {
        assert!(matches!(
            SourceFormat::from_path(Path::new("notes.txt")),
            Err(AudioError::UnsupportedFormat(_))
        ));
        assert!(SourceFormat::from_path(Path::new("no_extension")).is_err());
    }

    #[test]
    fn open_missing_file_returns_not_found() {
        let result = open_file(Path::new("/nonexistent/file.flac"));
        assert!(matches!(result, Err(AudioError::FileNotFound(_))));
    }

    #[test]
    fn resolve_seek_clamps_and_aligns() {
        assert_eq!(resolve_seek(SeekFrom::Start(10), 0, 100, 4), 8);
        assert_eq!(resolve_seek(SeekFrom::Start(1000), 0, 100, 4), 100);
        assert_eq!(resolve_seek(SeekFrom::Current(-50), 20, 100, 4), 0);
        assert_eq!(resolve_seek(SeekFrom::End(-6), 0, 100, 4), 92);
    }
}
