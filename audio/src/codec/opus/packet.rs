//! Opus packet framing.
//!
//! Splits packets into their compressed frames and assembles packets from
//! frames, as specified in RFC 6716 Section 3.2.

use std::time::Duration;

use opuskit_buffer::BufferHandle;
use thiserror::Error;

use super::toc::{Configuration, FrameCode, TOC, frame_count_byte, parse_frame_count_byte};

/// Maximum size of one compressed frame and of a whole packet in bytes.
pub const MAX_PACKET_BYTES: usize = 1275;

/// Maximum audio duration of one packet.
pub const MAX_PACKET_DURATION: Duration = Duration::from_millis(120);

/// Maximum number of frames in a code 3 packet.
const MAX_FRAME_COUNT: usize = 48;

/// Framing violations found while splitting a packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("packet is empty")]
    Empty,

    #[error("packet is too short for its frame code")]
    PacketTooShort,

    #[error("code 1 packet has an odd payload length")]
    OddCode1Length,

    #[error("frame length exceeds available data")]
    FrameLengthExceedsData,

    #[error("frame length exceeds {MAX_PACKET_BYTES} bytes")]
    FrameTooLong,

    #[error("frame count must be between 1 and {MAX_FRAME_COUNT}")]
    InvalidFrameCount,

    #[error("padding exceeds available data")]
    PaddingExceedsData,

    #[error("CBR payload does not divide evenly between frames")]
    UnevenCbrPayload,

    #[error("total audio duration exceeds 120 ms")]
    ExcessiveDuration,
}

/// Packet bytes, owned or on loan from a buffer pool.
#[derive(Debug)]
enum Payload {
    Owned(Vec<u8>),
    Pooled(BufferHandle),
}

impl Payload {
    fn as_slice(&self) -> &[u8] {
        match self {
            Payload::Owned(data) => data,
            Payload::Pooled(region) => &region[..],
        }
    }
}

/// An encoded Opus packet with its encoder-assigned sequence index.
///
/// Packets produced by an encode stream live in pooled memory and return
/// it when dropped. Cloning always yields an owned copy.
#[derive(Debug)]
pub struct Packet {
    data: Payload,
    sequence: u64,
}

impl Packet {
    /// Creates a packet from bytes and a sequence index.
    pub fn new(data: Vec<u8>, sequence: u64) -> Self {
        Self {
            data: Payload::Owned(data),
            sequence,
        }
    }

    /// Creates a packet backed by a pooled region. The region's length is
    /// the packet length.
    pub fn from_region(region: BufferHandle, sequence: u64) -> Self {
        Self {
            data: Payload::Pooled(region),
            sequence,
        }
    }

    /// Creates a packet from a byte slice with sequence index 0.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(data.to_vec(), 0)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_slice()
    }

    /// Consumes the packet and returns its bytes. A pooled region is copied
    /// out and handed back to its pool.
    pub fn into_bytes(self) -> Vec<u8> {
        match self.data {
            Payload::Owned(data) => data,
            Payload::Pooled(region) => region.to_vec(),
        }
    }

    /// Returns true if the bytes live in pooled memory.
    pub fn is_pooled(&self) -> bool {
        matches!(self.data, Payload::Pooled(_))
    }

    /// Returns the length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns true if the packet has no bytes.
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Returns the encoder-assigned sequence index.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the packet with a different sequence index.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Returns the TOC byte of this packet.
    pub fn toc(&self) -> TOC {
        TOC::new(self.as_bytes().first().copied().unwrap_or(0))
    }

    /// Returns the number of frames signalled by the header, or 0 if the
    /// header is incomplete.
    pub fn frame_count(&self) -> usize {
        let data = self.as_bytes();
        if data.is_empty() {
            return 0;
        }
        match self.toc().frame_code() {
            FrameCode::OneFrame => 1,
            FrameCode::TwoEqualFrames | FrameCode::TwoDifferentFrames => 2,
            FrameCode::ArbitraryFrames => match data.get(1) {
                Some(&b) => parse_frame_count_byte(b).2 as usize,
                None => 0,
            },
        }
    }

    /// Returns the total duration of audio in this packet, read from the
    /// header without validating the frame lengths.
    pub fn duration(&self) -> Duration {
        let fd = self.toc().configuration().frame_duration();
        fd.duration() * self.frame_count() as u32
    }
}

impl Clone for Packet {
    fn clone(&self) -> Self {
        Self::new(self.as_bytes().to_vec(), self.sequence)
    }
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence && self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Packet {}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl From<Vec<u8>> for Packet {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data, 0)
    }
}

/// A packet split into its compressed frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePacket<'a> {
    pub toc: TOC,
    pub frames: Vec<&'a [u8]>,
}

impl FramePacket<'_> {
    /// Returns the total audio duration of the packet.
    pub fn duration(&self) -> Duration {
        self.toc.configuration().frame_duration().duration() * self.frames.len() as u32
    }
}

/// Splits a packet into frames, validating every length.
pub fn parse(buf: &[u8]) -> Result<FramePacket<'_>, FramingError> {
    let (&toc_byte, data) = buf.split_first().ok_or(FramingError::Empty)?;
    let toc = TOC::new(toc_byte);

    let frames = match toc.frame_code() {
        FrameCode::OneFrame => {
            check_frame_len(data.len())?;
            vec![data]
        }
        FrameCode::TwoEqualFrames => {
            if data.len() % 2 != 0 {
                return Err(FramingError::OddCode1Length);
            }
            let (a, b) = data.split_at(data.len() / 2);
            check_frame_len(a.len())?;
            vec![a, b]
        }
        FrameCode::TwoDifferentFrames => {
            let (n1, offset) = read_frame_len(data)?;
            let rest = &data[offset..];
            if n1 > rest.len() {
                return Err(FramingError::FrameLengthExceedsData);
            }
            let (a, b) = rest.split_at(n1);
            check_frame_len(a.len())?;
            check_frame_len(b.len())?;
            vec![a, b]
        }
        FrameCode::ArbitraryFrames => parse_code3(data)?,
    };

    let packet = FramePacket { toc, frames };
    if packet.duration() > MAX_PACKET_DURATION {
        return Err(FramingError::ExcessiveDuration);
    }
    Ok(packet)
}

fn parse_code3(data: &[u8]) -> Result<Vec<&[u8]>, FramingError> {
    let (&count_byte, mut rest) = data.split_first().ok_or(FramingError::PacketTooShort)?;
    let (is_vbr, has_padding, count) = parse_frame_count_byte(count_byte);
    let count = count as usize;
    if count == 0 || count > MAX_FRAME_COUNT {
        return Err(FramingError::InvalidFrameCount);
    }

    let mut padding = 0usize;
    if has_padding {
        loop {
            let (&b, tail) = rest.split_first().ok_or(FramingError::PacketTooShort)?;
            rest = tail;
            if b == 255 {
                padding += 254;
            } else {
                padding += b as usize;
                break;
            }
        }
    }

    let mut lengths = Vec::with_capacity(count);
    if is_vbr {
        for _ in 0..count - 1 {
            let (n, used) = read_frame_len(rest)?;
            rest = &rest[used..];
            lengths.push(n);
        }
    }

    if padding > rest.len() {
        return Err(FramingError::PaddingExceedsData);
    }
    let mut payload = &rest[..rest.len() - padding];

    if is_vbr {
        let known: usize = lengths.iter().sum();
        if known > payload.len() {
            return Err(FramingError::FrameLengthExceedsData);
        }
        lengths.push(payload.len() - known);
    } else {
        if payload.len() % count != 0 {
            return Err(FramingError::UnevenCbrPayload);
        }
        lengths.resize(count, payload.len() / count);
    }

    let mut frames = Vec::with_capacity(count);
    for n in lengths {
        check_frame_len(n)?;
        let (frame, tail) = payload.split_at(n);
        frames.push(frame);
        payload = tail;
    }
    Ok(frames)
}

/// Reads a one- or two-byte frame length; returns (length, bytes used).
fn read_frame_len(data: &[u8]) -> Result<(usize, usize), FramingError> {
    match data {
        [] => Err(FramingError::PacketTooShort),
        [b0, ..] if *b0 < 252 => Ok((*b0 as usize, 1)),
        [b0, b1, ..] => Ok((*b0 as usize + 4 * *b1 as usize, 2)),
        _ => Err(FramingError::PacketTooShort),
    }
}

fn write_frame_len(n: usize, out: &mut Vec<u8>) {
    if n < 252 {
        out.push(n as u8);
    } else {
        let b0 = 252 + (n - 252) % 4;
        out.push(b0 as u8);
        out.push(((n - b0) / 4) as u8);
    }
}

fn check_frame_len(n: usize) -> Result<(), FramingError> {
    if n > MAX_PACKET_BYTES {
        return Err(FramingError::FrameTooLong);
    }
    Ok(())
}

/// Returns the worst-case header size for a packet of `frames` frames.
pub(crate) fn header_overhead(frames: usize) -> usize {
    match frames {
        0 | 1 => 1,
        2 => 3,
        n => 2 + 2 * (n - 1),
    }
}

/// Assembles a packet from compressed frames, choosing the smallest frame
/// code that can describe them.
pub(crate) fn build(config: Configuration, stereo: bool, frames: &[&[u8]], out: &mut Vec<u8>) {
    out.clear();
    match frames {
        [one] => {
            out.push(TOC::build(config, stereo, FrameCode::OneFrame).0);
            out.extend_from_slice(one);
        }
        [a, b] if a.len() == b.len() => {
            out.push(TOC::build(config, stereo, FrameCode::TwoEqualFrames).0);
            out.extend_from_slice(a);
            out.extend_from_slice(b);
        }
        [a, b] => {
            out.push(TOC::build(config, stereo, FrameCode::TwoDifferentFrames).0);
            write_frame_len(a.len(), out);
            out.extend_from_slice(a);
            out.extend_from_slice(b);
        }
        many => {
            out.push(TOC::build(config, stereo, FrameCode::ArbitraryFrames).0);
            out.push(frame_count_byte(true, false, many.len() as u8));
            for f in &many[..many.len().saturating_sub(1)] {
                write_frame_len(f.len(), out);
            }
            for f in many {
                out.extend_from_slice(f);
            }
        }
    }
}
