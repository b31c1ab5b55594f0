//! WAV decoding via hound
//!
//! hound validates the RIFF/WAVE structure and locates the data chunk.
//! Integer samples of 8, 16, 24 or 32 bits are brought to 16 bits here.

use super::{check_buffer, resolve_seek, PcmDecoder};
use crate::error::{AudioError, Result};
use std::fs::File;
use std::io::{BufReader, SeekFrom};
use std::path::Path;

pub struct WavDecoder {
    reader: hound::WavReader<BufReader<File>>,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    total_frames: u64,
    position: u64,
}

impl WavDecoder {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();

        if spec.sample_format != hound::SampleFormat::Int {
            return Err(AudioError::UnsupportedFormat(
                "floating-point WAV is not supported".to_string(),
            ));
        }
        if !matches!(spec.bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(AudioError::UnsupportedFormat(format!(
                "{}-bit WAV is not supported",
                spec.bits_per_sample
            )));
        }
        if spec.channels == 0 || spec.channels > 2 {
            return Err(AudioError::UnsupportedFormat(format!(
                "{}-channel WAV is not supported",
                spec.channels
            )));
        }

        let total_frames = u64::from(reader.duration());
        tracing::debug!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bits = spec.bits_per_sample,
            total_frames,
            "WAV decoder ready"
        );

        Ok(Self {
            reader,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
            total_frames,
            position: 0,
        })
    }
}

/// Bring an integer sample of `bits` width to 16 bits
fn to_i16(sample: i32, bits: u16) -> i16 {
    let shifted = if bits > 16 {
        sample >> (bits - 16)
    } else {
        sample << (16 - bits)
    };
    shifted.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

impl PcmDecoder for WavDecoder {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let frame_size = self.frame_size();
        check_buffer(buf, frame_size)?;

        let remaining = self.total_frames - self.position;
        let frames = ((buf.len() / frame_size) as u64).min(remaining) as usize;
        let wanted_samples = frames * self.channels as usize;
        let bits = self.bits_per_sample;

        let mut written = 0;
        for sample in self.reader.samples::<i32>().take(wanted_samples) {
            let value = to_i16(sample?, bits);
            buf[written..written + 2].copy_from_slice(&value.to_le_bytes());
            written += 2;
        }

        // A truncated data chunk can end mid-frame
        let written = written - written % frame_size;
        self.position += (written / frame_size) as u64;
        Ok(written)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let frame_size = self.frame_size() as u64;
        let length = self.total_frames * frame_size;
        let target = resolve_seek(pos, self.position * frame_size, length, frame_size as usize);
        let frame = target / frame_size;

        let source_frame = u32::try_from(frame)
            .map_err(|_| AudioError::SeekError(format!("frame {} out of range", frame)))?;
        self.reader.seek(source_frame)?;
        self.position = frame;
        Ok(target)
    }

    fn length(&self) -> Option<u64> {
        Some(self.total_frames * self.frame_size() as u64)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channel_count(&self) -> u16 {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::read_full;

    fn write_wav(path: &Path, channels: u16, bits: u16, samples: &[i32]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 22050,
            bits_per_sample: bits,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            match bits {
                8 => writer.write_sample(s as i8).unwrap(),
                16 => writer.write_sample(s as i16).unwrap(),
                _ => writer.write_sample(s).unwrap(),
            }
        }
        writer.finalize().unwrap();
    }

    fn decode_all(decoder: &mut WavDecoder) -> Vec<i16> {
        let mut buf = vec![0u8; 4096];
        let n = read_full(decoder, &mut buf).unwrap();
        buf[..n]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn bit_depth_conversion() {
        assert_eq!(to_i16(-128, 8), -32768);
        assert_eq!(to_i16(127, 8), 32512);
        assert_eq!(to_i16(1234, 16), 1234);
        assert_eq!(to_i16(8_388_607, 24), 32767);
        assert_eq!(to_i16(-8_388_608, 24), -32768);
        assert_eq!(to_i16(i32::MAX, 32), 32767);
    }

    #[test]
    fn reads_24_bit_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hi.wav");
        write_wav(&path, 2, 24, &[256, -256, 8_388_607, -8_388_608]);

        let mut decoder = WavDecoder::open(&path).unwrap();
        assert_eq!(decoder.channel_count(), 2);
        assert_eq!(decoder.sample_rate(), 22050);
        assert_eq!(decoder.length(), Some(8));
        assert_eq!(decode_all(&mut decoder), vec![1, -1, 32767, -32768]);
    }

    #[test]
    fn reads_8_bit_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lo.wav");
        write_wav(&path, 1, 8, &[0, 64, -64]);

        let mut decoder = WavDecoder::open(&path).unwrap();
        assert_eq!(decode_all(&mut decoder), vec![0, 16384, -16384]);
    }

    #[test]
    fn seek_repositions_by_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        let samples: Vec<i32> = (0..100).collect();
        write_wav(&path, 1, 16, &samples);

        let mut decoder = WavDecoder::open(&path).unwrap();
        // Odd offsets round down to a frame
        assert_eq!(decoder.seek(SeekFrom::Start(21)).unwrap(), 20);
        let mut buf = [0u8; 4];
        assert_eq!(decoder.read(&mut buf).unwrap(), 4);
        assert_eq!(i16::from_le_bytes([buf[0], buf[1]]), 10);
        assert_eq!(i16::from_le_bytes([buf[2], buf[3]]), 11);

        // Past the end clamps to length and reads nothing
        assert_eq!(decoder.seek(SeekFrom::Start(10_000)).unwrap(), 200);
        assert_eq!(decoder.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn rejects_float_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0.5f32).unwrap();
        writer.finalize().unwrap();

        assert!(matches!(
            WavDecoder::open(&path),
            Err(AudioError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn rejects_buffer_smaller_than_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("st.wav");
        write_wav(&path, 2, 16, &[1, 2, 3, 4]);

        let mut decoder = WavDecoder::open(&path).unwrap();
        let mut tiny = [0u8; 3];
        assert!(matches!(
            decoder.read(&mut tiny),
            Err(AudioError::InvalidBuffer(_))
        ));
    }

    #[test]
    fn rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.wav");
        std::fs::write(&path, b"RIFF....not a wave file").unwrap();
        assert!(WavDecoder::open(&path).is_err());
    }
}
