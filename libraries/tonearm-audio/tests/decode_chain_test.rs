//! Decode chain integration tests
//!
//! WAV fixtures are written with hound into temp directories and pushed
//! through `open_file`, the normalizer and the speed transform.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tonearm_audio::decoder::read_full;
use tonearm_audio::format::{bytes_to_duration, BYTES_PER_SECOND};
use tonearm_audio::{open_file, AudioError, Normalizer, PcmDecoder, SpeedMode, SpeedTransform};

fn write_sine(dir: &TempDir, name: &str, rate: u32, channels: u16, secs: f32) -> PathBuf {
    let path = dir.path().join(name);
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

fn decode_all<D: PcmDecoder>(decoder: &mut D) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; 8192];
    loop {
        let n = decoder.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

#[test]
fn mono_wav_normalizes_to_canonical() {
    let dir = TempDir::new().unwrap();
    let path = write_sine(&dir, "mono.wav", 44100, 1, 2.0);

    let source = open_file(&path).unwrap();
    assert_eq!(source.channel_count(), 1);

    let mut chain = Normalizer::new(source);
    assert_eq!(chain.sample_rate(), 44100);
    assert_eq!(chain.channel_count(), 2);
    assert_eq!(chain.length(), Some(2 * BYTES_PER_SECOND));

    let pcm = decode_all(&mut chain);
    assert_eq!(pcm.len() as u64, 2 * BYTES_PER_SECOND);
    // Both channels carry the mono signal
    for frame in pcm.chunks_exact(4) {
        assert_eq!(frame[0..2], frame[2..4]);
    }
}

#[test]
fn resampled_duration_is_preserved() {
    let dir = TempDir::new().unwrap();
    let path = write_sine(&dir, "48k.wav", 48000, 2, 3.0);

    let chain = Normalizer::new(open_file(&path).unwrap());
    let duration = bytes_to_duration(chain.length().unwrap());
    assert!((duration.as_secs_f64() - 3.0).abs() < 0.001, "{:?}", duration);
}

#[test]
fn seek_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = write_sine(&dir, "seek.wav", 22050, 1, 1.0);
    let mut chain = Normalizer::new(open_file(&path).unwrap());

    let first = chain.seek(SeekFrom::Start(30_001)).unwrap();
    let second = chain.seek(SeekFrom::Start(30_001)).unwrap();
    assert_eq!(first, second);
    assert_eq!(first % 4, 0);
}

#[test]
fn seek_then_read_matches_fresh_decode() {
    let dir = TempDir::new().unwrap();
    let path = write_sine(&dir, "cont.wav", 32000, 2, 1.0);

    let full = decode_all(&mut Normalizer::new(open_file(&path).unwrap()));

    let mut chain = Normalizer::new(open_file(&path).unwrap());
    let offset = chain.seek(SeekFrom::Start(40_000)).unwrap() as usize;
    let mut buf = vec![0u8; 4096];
    let n = read_full(&mut chain, &mut buf).unwrap();
    assert_eq!(n, 4096);
    assert_eq!(&buf[..], &full[offset..offset + 4096]);
}

#[test]
fn seek_past_end_clamps_to_length() {
    let dir = TempDir::new().unwrap();
    let path = write_sine(&dir, "end.wav", 44100, 2, 0.5);
    let mut chain = Normalizer::new(open_file(&path).unwrap());

    let length = chain.length().unwrap();
    assert_eq!(chain.seek(SeekFrom::Start(length * 10)).unwrap(), length);
    let mut buf = [0u8; 64];
    assert_eq!(chain.read(&mut buf).unwrap(), 0);
}

#[test]
fn double_speed_halves_output() {
    let dir = TempDir::new().unwrap();
    let path = write_sine(&dir, "fast.wav", 44100, 2, 1.0);
    let mut chain = SpeedTransform::new(Normalizer::new(open_file(&path).unwrap()));
    chain.set_mode(SpeedMode::Double);

    let pcm = decode_all(&mut chain);
    assert_eq!(pcm.len() as u64, BYTES_PER_SECOND / 2);
}

#[test]
fn half_speed_doubles_output() {
    let dir = TempDir::new().unwrap();
    let path = write_sine(&dir, "slow.wav", 44100, 2, 1.0);
    let mut chain = SpeedTransform::new(Normalizer::new(open_file(&path).unwrap()));
    chain.set_mode(SpeedMode::Half);

    let pcm = decode_all(&mut chain);
    assert_eq!(pcm.len() as u64, BYTES_PER_SECOND * 2);
}

#[test]
fn unknown_extension_is_rejected() {
    let result = open_file(Path::new("/tmp/cover.jpg"));
    assert!(matches!(result, Err(AudioError::UnsupportedFormat(_))));
}

#[test]
fn corrupt_flac_fails_at_construction() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.flac");
    std::fs::write(&path, b"fLaC\0\0\0\x22garbage").unwrap();
    assert!(open_file(&path).is_err());
}
