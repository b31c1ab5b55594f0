//! Canonical output format
//!
//! Every decode chain ends in 44.1 kHz interleaved stereo, signed 16-bit
//! little-endian PCM. Positions and lengths in the chain are byte offsets
//! in this format.

use std::time::Duration;

/// Canonical sample rate in Hz
pub const CANONICAL_SAMPLE_RATE: u32 = 44_100;

/// Canonical channel count
pub const CANONICAL_CHANNELS: u16 = 2;

/// Bytes per sample (signed 16-bit)
pub const BYTES_PER_SAMPLE: usize = 2;

/// Bytes per canonical frame
pub const CANONICAL_FRAME_SIZE: usize = CANONICAL_CHANNELS as usize * BYTES_PER_SAMPLE;

/// Bytes per second of canonical audio
pub const BYTES_PER_SECOND: u64 = CANONICAL_SAMPLE_RATE as u64 * CANONICAL_FRAME_SIZE as u64;

/// Frame size in bytes for a 16-bit stream with `channels` channels
pub fn frame_size(channels: u16) -> usize {
    channels as usize * BYTES_PER_SAMPLE
}

/// Round a byte offset down to a whole frame
pub fn align_down(offset: u64, frame_size: usize) -> u64 {
    offset - offset % frame_size as u64
}

/// Convert a canonical byte offset to playback time
pub fn bytes_to_duration(bytes: u64) -> Duration {
    let secs = bytes / BYTES_PER_SECOND;
    let rem = bytes % BYTES_PER_SECOND;
    Duration::from_secs(secs) + Duration::from_nanos(rem * 1_000_000_000 / BYTES_PER_SECOND)
}

/// Convert playback time to a frame-aligned canonical byte offset
pub fn duration_to_bytes(duration: Duration) -> u64 {
    let frames = duration.as_nanos() * CANONICAL_SAMPLE_RATE as u128 / 1_000_000_000;
    frames as u64 * CANONICAL_FRAME_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_second_round_trips() {
        assert_eq!(duration_to_bytes(Duration::from_secs(1)), BYTES_PER_SECOND);
        assert_eq!(bytes_to_duration(BYTES_PER_SECOND), Duration::from_secs(1));
    }

    #[test]
    fn duration_to_bytes_is_frame_aligned() {
        let bytes = duration_to_bytes(Duration::from_micros(12_345));
        assert_eq!(bytes % CANONICAL_FRAME_SIZE as u64, 0);
    }

    #[test]
    fn align_down_rounds_to_frame() {
        assert_eq!(align_down(7, 4), 4);
        assert_eq!(align_down(8, 4), 8);
        assert_eq!(align_down(5, 2), 4);
    }
}
