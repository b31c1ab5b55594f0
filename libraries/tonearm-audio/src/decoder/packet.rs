//! Symphonia packet decoder
//!
//! Shared by every compressed format: demux one packet, decode it, convert
//! the planar Symphonia buffer to interleaved i16 in a reusable queue, and
//! hand whole frames to the caller.
//!
//! ## Sample conversion
//!
//! - **Signed ints**: shifted to 16 bits (right for wider types, left for narrower)
//! - **Unsigned ints**: recentred around zero, then shifted
//! - **Floats**: scaled by 32767 and clipped to the i16 range

use super::frames::FrameQueue;
use super::{check_buffer, resolve_seek, PcmDecoder};
use crate::error::{AudioError, Result};
use std::fs::File;
use std::io::SeekFrom;
use std::path::Path;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{
    CodecType, Decoder, DecoderOptions, CODEC_TYPE_AAC, CODEC_TYPE_ALAC, CODEC_TYPE_FLAC,
    CODEC_TYPE_MP3, CODEC_TYPE_NULL, CODEC_TYPE_VORBIS,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use symphonia::core::units::TimeBase;

/// Codec a [`PacketDecoder`] is opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketCodec {
    /// MPEG Layer III (always decoded to stereo)
    Mp3,
    /// FLAC
    Flac,
    /// Vorbis in Ogg
    Vorbis,
    /// AAC or ALAC, usually in MP4
    Aac,
}

impl PacketCodec {
    fn accepts(self, codec: CodecType) -> bool {
        match self {
            Self::Mp3 => codec == CODEC_TYPE_MP3,
            Self::Flac => codec == CODEC_TYPE_FLAC,
            Self::Vorbis => codec == CODEC_TYPE_VORBIS,
            Self::Aac => codec == CODEC_TYPE_AAC || codec == CODEC_TYPE_ALAC,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Mp3 => "MP3",
            Self::Flac => "FLAC",
            Self::Vorbis => "Vorbis",
            Self::Aac => "AAC/ALAC",
        }
    }
}

/// Streaming Symphonia decoder over a local file
///
/// Positions are tracked in frames of *output*, which for every codec is
/// one frame per source frame.
pub struct PacketDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    sample_rate: u32,
    output_channels: u16,

    total_frames: u64,
    /// Next frame to be delivered
    position: u64,
    /// Decoded frames to throw away after an accurate seek
    skip_frames: u64,

    queue: FrameQueue,
    eof: bool,
}

/// Format reader plus the track we decode from it
struct Probed {
    format: Box<dyn FormatReader>,
    track_id: u32,
}

fn probe(path: &Path) -> Result<Probed> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    // Gapless handling stays off: MP3 trimming is applied from the LAME
    // header, and the other codecs are delivered exactly as decoded.
    let format_options = FormatOptions {
        enable_gapless: false,
        ..Default::default()
    };

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_options, &MetadataOptions::default())
        .map_err(|e| AudioError::UnsupportedFormat(format!("Failed to probe file: {}", e)))?;

    let format = probed.format;
    let track_id = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .map(|t| t.id)
        .ok_or_else(|| AudioError::DecodeError("No audio tracks found".to_string()))?;

    Ok(Probed { format, track_id })
}

impl PacketDecoder {
    /// Open `path` and verify it carries `codec`
    pub fn open(path: &Path, codec: PacketCodec) -> Result<Self> {
        let Probed { format, track_id } = probe(path)?;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.id == track_id)
            .ok_or_else(|| AudioError::DecodeError("Track disappeared after probe".to_string()))?;
        let params = &track.codec_params;

        if !codec.accepts(params.codec) {
            return Err(AudioError::UnsupportedFormat(format!(
                "expected {} audio in {}",
                codec.name(),
                path.display()
            )));
        }

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| AudioError::DecodeError("Stream has no sample rate".to_string()))?;
        let source_channels = params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| AudioError::UnsupportedFormat("unknown channel layout".to_string()))?;
        if source_channels == 0 || source_channels > 2 {
            return Err(AudioError::UnsupportedFormat(format!(
                "{}-channel audio",
                source_channels
            )));
        }
        let output_channels = if codec == PacketCodec::Mp3 {
            2
        } else {
            source_channels as u16
        };
        let time_base = params.time_base;
        let declared_frames = params.n_frames;

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| AudioError::UnsupportedFormat(format!("Failed to create decoder: {}", e)))?;

        // MP3 frame counts from the Xing header are not trusted: count what
        // the decoder will actually produce.
        let total_frames = match declared_frames {
            Some(frames) if codec != PacketCodec::Mp3 => frames,
            _ => scan_frames(path, time_base, sample_rate)?,
        };

        tracing::debug!(
            path = %path.display(),
            codec = codec.name(),
            sample_rate,
            source_channels,
            total_frames,
            "Packet decoder ready"
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            time_base,
            sample_rate,
            output_channels,
            total_frames,
            position: 0,
            skip_frames: 0,
            queue: FrameQueue::new(),
            eof: false,
        })
    }

    /// Total frames this decoder will deliver
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Next frame to be delivered
    pub fn frame_position(&self) -> u64 {
        self.position
    }

    /// Reposition to an absolute frame, clamped to the stream
    pub fn seek_frame(&mut self, frame: u64) -> Result<u64> {
        let target = frame.min(self.total_frames);
        self.queue.clear();
        self.skip_frames = 0;

        if target == self.total_frames {
            self.position = target;
            return Ok(target);
        }

        let ts = frames_to_ts(target, self.time_base, self.sample_rate);
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| AudioError::SeekError(format!("Seek to frame {} failed: {}", target, e)))?;
        self.decoder.reset();

        let landed = ts_to_frames(seeked.actual_ts, self.time_base, self.sample_rate);
        if landed > target {
            tracing::warn!(target, landed, "Seek landed past the requested frame");
        }
        self.skip_frames = target.saturating_sub(landed);
        self.position = target;
        self.eof = false;
        Ok(target)
    }

    /// Demux and decode one packet into the queue
    fn decode_next_packet(&mut self) -> Result<()> {
        let packet = match self.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.eof = true;
                return Ok(());
            }
            Err(SymphoniaError::ResetRequired) => {
                self.decoder.reset();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != self.track_id {
            return Ok(());
        }

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!(error = e, ts = packet.ts(), "Skipping undecodable packet");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let frames = decoded.frames() as u64;
        let skip = self.skip_frames.min(frames);
        self.skip_frames -= skip;
        push_decoded(
            decoded,
            skip as usize,
            self.output_channels as usize,
            &mut self.queue,
        );
        Ok(())
    }
}

impl PcmDecoder for PacketDecoder {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let frame_size = self.frame_size();
        check_buffer(buf, frame_size)?;

        loop {
            let remaining = (self.total_frames - self.position) as usize * frame_size;
            if buf.is_empty() || remaining == 0 {
                return Ok(0);
            }

            if !self.queue.is_empty() {
                let limit = buf.len().min(remaining);
                let n = self.queue.drain_into(&mut buf[..limit], frame_size);
                if n > 0 {
                    self.position += (n / frame_size) as u64;
                    return Ok(n);
                }
            }

            if self.eof {
                return Ok(0);
            }
            self.decode_next_packet()?;
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let frame_size = self.frame_size() as u64;
        let length = self.total_frames * frame_size;
        let target = resolve_seek(pos, self.position * frame_size, length, frame_size as usize);
        let frame = self.seek_frame(target / frame_size)?;
        Ok(frame * frame_size)
    }

    fn length(&self) -> Option<u64> {
        Some(self.total_frames * self.frame_size() as u64)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channel_count(&self) -> u16 {
        self.output_channels
    }
}

/// Count the frames a stream decodes to by summing packet durations
fn scan_frames(path: &Path, time_base: Option<TimeBase>, sample_rate: u32) -> Result<u64> {
    let Probed {
        mut format,
        track_id,
    } = probe(path)?;

    let mut total_ts = 0u64;
    loop {
        match format.next_packet() {
            Ok(packet) if packet.track_id() == track_id => total_ts += packet.dur(),
            Ok(_) | Err(SymphoniaError::ResetRequired) => {}
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(ts_to_frames(total_ts, time_base, sample_rate))
}

/// Convert a track timestamp to frames at `sample_rate`
fn ts_to_frames(ts: u64, time_base: Option<TimeBase>, sample_rate: u32) -> u64 {
    match time_base {
        Some(tb) if tb.denom != 0 => {
            (u128::from(ts) * u128::from(tb.numer) * u128::from(sample_rate) / u128::from(tb.denom))
                as u64
        }
        _ => ts,
    }
}

/// Convert a frame index at `sample_rate` to a track timestamp
fn frames_to_ts(frames: u64, time_base: Option<TimeBase>, sample_rate: u32) -> u64 {
    match time_base {
        Some(tb) if tb.numer != 0 && sample_rate != 0 => {
            (u128::from(frames) * u128::from(tb.denom)
                / (u128::from(tb.numer) * u128::from(sample_rate))) as u64
        }
        _ => frames,
    }
}

/// Interleave a planar buffer into the queue as i16, starting at frame `skip`
///
/// A mono source written to a stereo output is duplicated to both channels.
fn push_frames<S, F>(
    buf: &AudioBuffer<S>,
    skip: usize,
    out_channels: usize,
    queue: &mut FrameQueue,
    convert: F,
) where
    S: Sample,
    F: Fn(S) -> i16,
{
    let frames = buf.frames();
    if skip >= frames {
        return;
    }
    let left = buf.chan(0);
    let right = if buf.spec().channels.count() > 1 {
        buf.chan(1)
    } else {
        left
    };

    queue.reserve_samples((frames - skip) * out_channels);
    for i in skip..frames {
        queue.push_sample(convert(left[i]));
        if out_channels > 1 {
            queue.push_sample(convert(right[i]));
        }
    }
}

fn float_to_i16(sample: f64) -> i16 {
    (sample * 32767.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Convert any Symphonia buffer variant to interleaved i16
fn push_decoded(decoded: AudioBufferRef<'_>, skip: usize, out_channels: usize, queue: &mut FrameQueue) {
    match decoded {
        // Signed integer formats - shift to 16 bits
        AudioBufferRef::S8(buf) => push_frames(&buf, skip, out_channels, queue, |s| i16::from(s) << 8),
        AudioBufferRef::S16(buf) => push_frames(&buf, skip, out_channels, queue, |s| s),
        AudioBufferRef::S24(buf) => {
            push_frames(&buf, skip, out_channels, queue, |s| (s.inner() >> 8) as i16)
        }
        AudioBufferRef::S32(buf) => push_frames(&buf, skip, out_channels, queue, |s| (s >> 16) as i16),

        // Unsigned integer formats - recentre, then shift
        AudioBufferRef::U8(buf) => {
            push_frames(&buf, skip, out_channels, queue, |s| (i16::from(s) - 128) << 8)
        }
        AudioBufferRef::U16(buf) => {
            push_frames(&buf, skip, out_channels, queue, |s| (i32::from(s) - 32768) as i16)
        }
        AudioBufferRef::U24(buf) => push_frames(&buf, skip, out_channels, queue, |s| {
            ((s.inner() as i32 - 8_388_608) >> 8) as i16
        }),
        AudioBufferRef::U32(buf) => push_frames(&buf, skip, out_channels, queue, |s| {
            ((i64::from(s) - 2_147_483_648) >> 16) as i16
        }),

        // Float formats - scale and clip
        AudioBufferRef::F32(buf) => {
            push_frames(&buf, skip, out_channels, queue, |s| float_to_i16(f64::from(s)))
        }
        AudioBufferRef::F64(buf) => push_frames(&buf, skip, out_channels, queue, float_to_i16),
    }
}
