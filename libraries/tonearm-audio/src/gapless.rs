//! Encoder delay compensation for gapless MP3 playback
//!
//! Parses the Xing/Info frame that most MP3 encoders write as the first
//! audio frame, and the LAME extension that follows it, to learn how many
//! samples of encoder delay and end padding the stream carries.
//!
//! # Background
//!
//! An MP3 stream decodes to more samples than the encoder was given:
//! - **Encoder delay**: Samples added at start for codec warm-up
//! - **End padding**: Samples added to complete the final frame
//! - **Decoder delay**: 529 samples of algorithmic delay in the decoder itself
//!
//! Without trimming these, you hear a short silence at every track boundary.
//!
//! # Example
//!
//! ```
//! use tonearm_audio::gapless::GaplessTrim;
//!
//! // LAME defaults: 576 samples of delay, 1152 of padding
//! let trim = GaplessTrim::from_lame(576, 1152);
//! assert_eq!(trim.start_samples, 576 + 529);
//! assert_eq!(trim.end_samples, 1152 - 529);
//! ```

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Algorithmic delay of the MP3 synthesis filterbank, in samples
pub const DECODER_DELAY: u32 = 529;

/// How far past the ID3 tag we look for the first frame sync
const SYNC_SEARCH_LIMIT: usize = 64 * 1024;

/// Xing flag: frame count present
const XING_FRAMES: u32 = 0x0001;
/// Xing flag: byte count present
const XING_BYTES: u32 = 0x0002;
/// Xing flag: seek table present
const XING_TOC: u32 = 0x0004;
/// Xing flag: VBR quality present
const XING_QUALITY: u32 = 0x0008;

/// Bytes between the start of the LAME extension and the delay/padding field:
/// encoder tag (9), revision (1), lowpass (1), replay gain (8), flags (1), ABR (1)
const LAME_DELAY_OFFSET: usize = 21;

/// Samples to drop from each end of a decoded MP3 stream
///
/// Computed once when an MP3 decoder is opened and never recomputed.
/// `(0, 0)` when the stream carries no usable LAME information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GaplessTrim {
    /// Samples to skip at start (encoder delay + decoder delay)
    pub start_samples: u64,
    /// Samples to skip at end (padding minus decoder delay, floored at 0)
    pub end_samples: u64,
}

impl GaplessTrim {
    /// Create from LAME-style encoder delay and padding values
    ///
    /// # Arguments
    /// * `encoder_delay` - Samples of encoder delay at start
    /// * `encoder_padding` - Samples of padding at end
    pub fn from_lame(encoder_delay: u32, encoder_padding: u32) -> Self {
        Self {
            start_samples: u64::from(encoder_delay) + u64::from(DECODER_DELAY),
            end_samples: u64::from(encoder_padding.saturating_sub(DECODER_DELAY)),
        }
    }

    /// Read the trim from an MP3 file on disk
    ///
    /// Never fails: an unreadable file yields `(0, 0)`.
    pub fn from_path(path: &Path) -> Self {
        match File::open(path) {
            Ok(file) => Self::from_reader(&mut BufReader::new(file)),
            Err(_) => Self::default(),
        }
    }

    /// Read the trim from a seekable MP3 byte source
    ///
    /// The reader is rewound to the start afterwards. Any parse failure
    /// yields `(0, 0)`: trimming is best-effort.
    pub fn from_reader<R: Read + Seek>(reader: &mut R) -> Self {
        let trim = locate_lame_fields(reader)
            .map(|(delay, padding)| Self::from_lame(delay, padding))
            .unwrap_or_default();
        let _ = reader.seek(SeekFrom::Start(0));
        trim
    }

    /// Total samples trimmed from the stream
    pub fn total(&self) -> u64 {
        self.start_samples + self.end_samples
    }

    /// Check if there is anything to trim
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Unpack the 12-bit encoder delay and 12-bit padding from the LAME field
///
/// Byte layout: [delay_hi:8][delay_lo:4|padding_hi:4][padding_lo:8]
pub fn parse_delay_padding(bytes: [u8; 3]) -> (u32, u32) {
    let delay = (u32::from(bytes[0]) << 4) | (u32::from(bytes[1]) >> 4);
    let padding = ((u32::from(bytes[1]) & 0x0F) << 8) | u32::from(bytes[2]);
    (delay, padding)
}

/// Fields of an MPEG audio frame header that decide where side info ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameHeader {
    mpeg1: bool,
    layer3: bool,
    crc: bool,
    mono: bool,
}

impl FrameHeader {
    fn parse(bytes: [u8; 4]) -> Option<Self> {
        if bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
            return None;
        }
        let version = (bytes[1] >> 3) & 0x03;
        let layer = (bytes[1] >> 1) & 0x03;
        let bitrate_index = bytes[2] >> 4;
        let sample_rate_index = (bytes[2] >> 2) & 0x03;
        // 01 is a reserved version, 00 a reserved layer
        if version == 0b01 || layer == 0b00 || bitrate_index == 0x0F || sample_rate_index == 0x03 {
            return None;
        }
        Some(Self {
            mpeg1: version == 0b11,
            layer3: layer == 0b01,
            crc: bytes[1] & 0x01 == 0,
            mono: bytes[3] >> 6 == 0b11,
        })
    }

    /// Offset of the Xing/Info tag from the start of the frame
    fn xing_offset(&self) -> usize {
        let side_info = match (self.mpeg1, self.mono) {
            (true, false) => 32,
            (true, true) => 17,
            (false, false) => 17,
            (false, true) => 9,
        };
        4 + if self.crc { 2 } else { 0 } + side_info
    }
}

/// Size of a leading ID3v2 tag, header included, or 0 if there is none
fn id3v2_size(header: &[u8; 10]) -> u64 {
    if &header[0..3] != b"ID3" {
        return 0;
    }
    // Synchsafe integer: 7 significant bits per byte
    let size = header[6..10]
        .iter()
        .fold(0u64, |acc, &b| (acc << 7) | u64::from(b & 0x7F));
    let footer = if header[5] & 0x10 != 0 { 10 } else { 0 };
    10 + size + footer
}

fn read_array<R: Read, const N: usize>(reader: &mut R) -> Option<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).ok()?;
    Some(buf)
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Find the first frame header after the ID3 tag, returning its offset
fn find_first_frame<R: Read + Seek>(reader: &mut R) -> Option<(u64, FrameHeader)> {
    reader.seek(SeekFrom::Start(0)).ok()?;
    let id3: [u8; 10] = read_array(reader)?;
    let start = id3v2_size(&id3);
    reader.seek(SeekFrom::Start(start)).ok()?;

    let mut window = Vec::with_capacity(SYNC_SEARCH_LIMIT);
    reader
        .by_ref()
        .take(SYNC_SEARCH_LIMIT as u64)
        .read_to_end(&mut window)
        .ok()?;

    window.windows(4).enumerate().find_map(|(i, w)| {
        FrameHeader::parse([w[0], w[1], w[2], w[3]]).map(|header| (start + i as u64, header))
    })
}

/// Locate the LAME delay/padding field, returning (delay, padding)
fn locate_lame_fields<R: Read + Seek>(reader: &mut R) -> Option<(u32, u32)> {
    let (frame_start, header) = find_first_frame(reader)?;
    if !header.layer3 {
        return None;
    }

    reader
        .seek(SeekFrom::Start(frame_start + header.xing_offset() as u64))
        .ok()?;
    let tag: [u8; 8] = read_array(reader)?;
    if &tag[0..4] != b"Xing" && &tag[0..4] != b"Info" {
        return None;
    }
    let flags = be_u32(&tag[4..8]);

    let mut skip = 0i64;
    if flags & XING_FRAMES != 0 {
        skip += 4;
    }
    if flags & XING_BYTES != 0 {
        skip += 4;
    }
    if flags & XING_TOC != 0 {
        skip += 100;
    }
    if flags & XING_QUALITY != 0 {
        skip += 4;
    }
    reader.seek(SeekFrom::Current(skip)).ok()?;

    let extension: [u8; LAME_DELAY_OFFSET + 3] = read_array(reader)?;
    // Encoder tag such as "LAME3.100" or "Lavc58.54"
    if !extension[0].is_ascii_alphabetic() || !extension[..4].iter().all(u8::is_ascii_graphic) {
        return None;
    }
    let field = [
        extension[LAME_DELAY_OFFSET],
        extension[LAME_DELAY_OFFSET + 1],
        extension[LAME_DELAY_OFFSET + 2],
    ];
    Some(parse_delay_padding(field))
}
