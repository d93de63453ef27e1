//! Opus TOC (Table of Contents) byte.
//!
//! Implements RFC 6716 Section 3.1, in both directions: reading the
//! configuration of a received packet and choosing one for an outgoing
//! packet.

use std::fmt;

use crate::pcm::{FrameDuration, SampleRate};

/// TOC byte from an Opus packet header.
///
/// Layout:
/// ```text
///          0 1 2 3 4 5 6 7
///         +-+-+-+-+-+-+-+-+
///         | config  |s| c |
///         +-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TOC(pub u8);

impl TOC {
    /// Creates a TOC from a byte.
    pub const fn new(byte: u8) -> Self {
        Self(byte)
    }

    /// Assembles a TOC byte.
    pub const fn build(config: Configuration, stereo: bool, code: FrameCode) -> Self {
        let s = if stereo { 0b100 } else { 0 };
        Self((config.0 << 3) | s | code.bits())
    }

    /// Returns the configuration number (0-31).
    pub fn configuration(&self) -> Configuration {
        Configuration(self.0 >> 3)
    }

    /// Returns true if the TOC indicates stereo audio.
    pub fn is_stereo(&self) -> bool {
        (self.0 & 0b00000100) != 0
    }

    /// Returns the frame code (number of frames per packet).
    pub fn frame_code(&self) -> FrameCode {
        FrameCode::from_bits(self.0 & 0b00000011)
    }
}

impl fmt::Display for TOC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "opus_toc: stereo={}, mode={}, bw={}, {}, {}",
            self.is_stereo(),
            self.configuration().mode(),
            self.configuration().bandwidth(),
            self.frame_code(),
            self.configuration().frame_duration(),
        )
    }
}

/// Opus configuration number (0-31).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration(pub u8);

impl Configuration {
    /// Returns the configuration for a mode, bandwidth and frame duration,
    /// or `None` if Opus has no such combination (e.g. SILK at 2.5 ms, CELT
    /// at 40 ms, or medium-band CELT).
    pub fn select(mode: ConfigurationMode, bandwidth: Bandwidth, fd: FrameDuration) -> Option<Self> {
        use Bandwidth::*;
        use ConfigurationMode::*;
        use FrameDuration::*;

        let base = match (mode, bandwidth) {
            (Silk, NB) => 0,
            (Silk, MB) => 4,
            (Silk, WB) => 8,
            (Hybrid, SWB) => 12,
            (Hybrid, FB) => 14,
            (CELT, NB) => 16,
            (CELT, WB) => 20,
            (CELT, SWB) => 24,
            (CELT, FB) => 28,
            _ => return None,
        };
        let offset = match (mode, fd) {
            (Silk, Duration10ms) | (Hybrid, Duration10ms) | (CELT, Duration2500us) => 0,
            (Silk, Duration20ms) | (Hybrid, Duration20ms) | (CELT, Duration5ms) => 1,
            (Silk, Duration40ms) | (CELT, Duration10ms) => 2,
            (Silk, Duration60ms) | (CELT, Duration20ms) => 3,
            _ => return None,
        };
        Some(Self(base + offset))
    }

    /// Returns the configuration mode (SILK, CELT, or Hybrid).
    pub fn mode(&self) -> ConfigurationMode {
        match self.0 {
            0..=11 => ConfigurationMode::Silk,
            12..=15 => ConfigurationMode::Hybrid,
            _ => ConfigurationMode::CELT,
        }
    }

    /// Returns the audio bandwidth.
    pub fn bandwidth(&self) -> Bandwidth {
        match self.0 {
            0..=3 => Bandwidth::NB,
            4..=7 => Bandwidth::MB,
            8..=11 => Bandwidth::WB,
            12..=13 => Bandwidth::SWB,
            14..=15 => Bandwidth::FB,
            16..=19 => Bandwidth::NB,
            20..=23 => Bandwidth::WB,
            24..=27 => Bandwidth::SWB,
            _ => Bandwidth::FB,
        }
    }

    /// Returns the duration of each frame in the packet.
    pub fn frame_duration(&self) -> FrameDuration {
        match self.0 {
            16 | 20 | 24 | 28 => FrameDuration::Duration2500us,
            17 | 21 | 25 | 29 => FrameDuration::Duration5ms,
            0 | 4 | 8 | 12 | 14 | 18 | 22 | 26 | 30 => FrameDuration::Duration10ms,
            2 | 6 | 10 => FrameDuration::Duration40ms,
            3 | 7 | 11 => FrameDuration::Duration60ms,
            _ => FrameDuration::Duration20ms,
        }
    }
}

/// Configuration mode (SILK, CELT, or Hybrid).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationMode {
    Silk,
    CELT,
    Hybrid,
}

impl fmt::Display for ConfigurationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Silk => write!(f, "Silk"),
            Self::CELT => write!(f, "CELT"),
            Self::Hybrid => write!(f, "Hybrid"),
        }
    }
}

/// Frame code indicating number of frames per packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCode {
    /// One frame in the packet.
    OneFrame,
    /// Two frames with equal compressed size.
    TwoEqualFrames,
    /// Two frames with different compressed sizes.
    TwoDifferentFrames,
    /// Arbitrary number of frames.
    ArbitraryFrames,
}

impl FrameCode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::OneFrame,
            1 => Self::TwoEqualFrames,
            2 => Self::TwoDifferentFrames,
            _ => Self::ArbitraryFrames,
        }
    }

    const fn bits(self) -> u8 {
        match self {
            Self::OneFrame => 0,
            Self::TwoEqualFrames => 1,
            Self::TwoDifferentFrames => 2,
            Self::ArbitraryFrames => 3,
        }
    }
}

impl fmt::Display for FrameCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneFrame => write!(f, "One Frame"),
            Self::TwoEqualFrames => write!(f, "Two Equal Frames"),
            Self::TwoDifferentFrames => write!(f, "Two Different Frames"),
            Self::ArbitraryFrames => write!(f, "Arbitrary Frames"),
        }
    }
}

/// Audio bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Bandwidth {
    /// Narrowband (4 kHz audio, 8 kHz sample rate)
    NB,
    /// Medium-band (6 kHz audio, 12 kHz sample rate)
    MB,
    /// Wideband (8 kHz audio, 16 kHz sample rate)
    WB,
    /// Super-wideband (12 kHz audio, 24 kHz sample rate)
    SWB,
    /// Fullband (20 kHz audio, 48 kHz sample rate)
    FB,
}

impl Bandwidth {
    /// Returns the bandwidth a session at `rate` can carry.
    pub fn for_rate(rate: SampleRate) -> Self {
        match rate {
            SampleRate::Hz8000 => Self::NB,
            SampleRate::Hz12000 => Self::MB,
            SampleRate::Hz16000 => Self::WB,
            SampleRate::Hz24000 => Self::SWB,
            SampleRate::Hz48000 => Self::FB,
        }
    }

    /// Returns the effective sample rate for this bandwidth.
    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::NB => 8000,
            Self::MB => 12000,
            Self::WB => 16000,
            Self::SWB => 24000,
            Self::FB => 48000,
        }
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NB => write!(f, "Narrowband"),
            Self::MB => write!(f, "Mediumband"),
            Self::WB => write!(f, "Wideband"),
            Self::SWB => write!(f, "Superwideband"),
            Self::FB => write!(f, "Fullband"),
        }
    }
}

/// Parses the frame count byte following the TOC byte for packets with
/// arbitrary frame counts (code 3).
///
/// Returns (is_vbr, has_padding, frame_count).
pub fn parse_frame_count_byte(byte: u8) -> (bool, bool, u8) {
    let is_vbr = (byte & 0b10000000) != 0;
    let has_padding = (byte & 0b01000000) != 0;
    let frame_count = byte & 0b00111111;
    (is_vbr, has_padding, frame_count)
}

/// Builds the frame count byte for a code 3 packet.
pub fn frame_count_byte(is_vbr: bool, has_padding: bool, frame_count: u8) -> u8 {
    let v = if is_vbr { 0b10000000 } else { 0 };
    let p = if has_padding { 0b01000000 } else { 0 };
    v | p | (frame_count & 0b00111111)
}
