//! PCM format definitions.
//!
//! Opus sessions accept a closed set of sample rates, channel counts and
//! frame durations. Each is an enum so that an invalid value cannot reach a
//! session once it has been parsed.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Sample rates supported by Opus sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SampleRate {
    Hz8000,
    Hz12000,
    Hz16000,
    Hz24000,
    Hz48000,
}

impl SampleRate {
    /// All supported rates, ascending.
    pub const ALL: [SampleRate; 5] = [
        SampleRate::Hz8000,
        SampleRate::Hz12000,
        SampleRate::Hz16000,
        SampleRate::Hz24000,
        SampleRate::Hz48000,
    ];

    /// Returns the rate in Hz.
    pub const fn hz(self) -> u32 {
        match self {
            Self::Hz8000 => 8000,
            Self::Hz12000 => 12000,
            Self::Hz16000 => 16000,
            Self::Hz24000 => 24000,
            Self::Hz48000 => 48000,
        }
    }

    /// Parses a rate in Hz.
    pub fn from_hz(hz: u32) -> Result<Self, Error> {
        Self::ALL
            .into_iter()
            .find(|r| r.hz() == hz)
            .ok_or(Error::UnsupportedSampleRate(hz))
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = Error;

    fn try_from(hz: u32) -> Result<Self, Error> {
        Self::from_hz(hz)
    }
}

impl From<SampleRate> for u32 {
    fn from(rate: SampleRate) -> u32 {
        rate.hz()
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz", self.hz())
    }
}

/// Channel layouts supported by Opus sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Channels {
    Mono,
    Stereo,
}

impl Channels {
    /// Returns the number of interleaved channels.
    pub const fn count(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }

    /// Parses a channel count.
    pub fn from_count(count: u32) -> Result<Self, Error> {
        match count {
            1 => Ok(Self::Mono),
            2 => Ok(Self::Stereo),
            n => Err(Error::UnsupportedChannelCount(n)),
        }
    }
}

impl TryFrom<u32> for Channels {
    type Error = Error;

    fn try_from(count: u32) -> Result<Self, Error> {
        Self::from_count(count)
    }
}

impl From<Channels> for u32 {
    fn from(channels: Channels) -> u32 {
        channels.count() as u32
    }
}

/// Opus frame duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum FrameDuration {
    Duration2500us,
    Duration5ms,
    Duration10ms,
    Duration20ms,
    Duration40ms,
    Duration60ms,
}

impl FrameDuration {
    /// All valid durations, ascending.
    pub const ALL: [FrameDuration; 6] = [
        FrameDuration::Duration2500us,
        FrameDuration::Duration5ms,
        FrameDuration::Duration10ms,
        FrameDuration::Duration20ms,
        FrameDuration::Duration40ms,
        FrameDuration::Duration60ms,
    ];

    /// Returns the duration in microseconds.
    pub const fn micros(self) -> u32 {
        match self {
            Self::Duration2500us => 2_500,
            Self::Duration5ms => 5_000,
            Self::Duration10ms => 10_000,
            Self::Duration20ms => 20_000,
            Self::Duration40ms => 40_000,
            Self::Duration60ms => 60_000,
        }
    }

    /// Returns the duration as a Duration.
    pub const fn duration(self) -> Duration {
        Duration::from_micros(self.micros() as u64)
    }

    /// Returns the number of samples per channel at `rate`.
    ///
    /// Exact for every supported rate: 2.5 ms at 8 kHz is 20 samples.
    pub const fn samples_at(self, rate: SampleRate) -> usize {
        (rate.hz() as usize * self.micros() as usize) / 1_000_000
    }

    /// Finds the duration whose per-channel length at `rate` is `samples`.
    pub fn from_samples(rate: SampleRate, samples: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|fd| fd.samples_at(rate) == samples)
    }

    /// Parses a duration given in milliseconds (2.5, 5, 10, 20, 40 or 60).
    pub fn from_millis(ms: f64) -> Result<Self, Error> {
        let micros = (ms * 1000.0).round();
        Self::ALL
            .into_iter()
            .find(|fd| fd.micros() as f64 == micros)
            .ok_or_else(|| Error::InvalidConfiguration(format!("invalid frame duration {}ms", ms)))
    }

    /// Returns the duration in (possibly fractional) milliseconds.
    pub fn as_millis_f64(self) -> f64 {
        self.micros() as f64 / 1000.0
    }
}

impl TryFrom<f64> for FrameDuration {
    type Error = Error;

    fn try_from(ms: f64) -> Result<Self, Error> {
        Self::from_millis(ms)
    }
}

impl From<FrameDuration> for f64 {
    fn from(fd: FrameDuration) -> f64 {
        fd.as_millis_f64()
    }
}

impl fmt::Display for FrameDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duration2500us => write!(f, "2.5ms"),
            Self::Duration5ms => write!(f, "5ms"),
            Self::Duration10ms => write!(f, "10ms"),
            Self::Duration20ms => write!(f, "20ms"),
            Self::Duration40ms => write!(f, "40ms"),
            Self::Duration60ms => write!(f, "60ms"),
        }
    }
}

/// Sample rate and channel layout of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Format {
    pub sample_rate: SampleRate,
    pub channels: Channels,
}

impl Format {
    /// Creates a format from a validated rate and layout.
    pub const fn new(sample_rate: SampleRate, channels: Channels) -> Self {
        Self { sample_rate, channels }
    }

    /// Creates a format from raw values, validating both.
    pub fn from_raw(sample_rate: u32, channels: u32) -> Result<Self, Error> {
        Ok(Self::new(
            SampleRate::from_hz(sample_rate)?,
            Channels::from_count(channels)?,
        ))
    }

    /// Returns the number of interleaved channels.
    pub const fn channels(&self) -> usize {
        self.channels.count()
    }

    /// Returns the sample rate in Hz.
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate.hz()
    }

    /// Returns the per-channel length of a frame of `fd`.
    pub const fn samples_per_channel(&self, fd: FrameDuration) -> usize {
        fd.samples_at(self.sample_rate)
    }

    /// Returns the interleaved length of a frame of `fd`.
    pub const fn frame_len(&self, fd: FrameDuration) -> usize {
        self.samples_per_channel(fd) * self.channels()
    }

    /// Returns the number of interleaved samples in `duration`, rounded down.
    pub fn samples_in(&self, duration: Duration) -> usize {
        (duration.as_micros() as usize * self.sample_rate() as usize / 1_000_000) * self.channels()
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layout = match self.channels {
            Channels::Mono => "mono",
            Channels::Stereo => "stereo",
        };
        write!(f, "{} {}", self.sample_rate, layout)
    }
}

// Common format presets
impl Format {
    /// 16kHz mono (wideband voice)
    pub const MONO_16K: Format = Format::new(SampleRate::Hz16000, Channels::Mono);
    /// 48kHz mono
    pub const MONO_48K: Format = Format::new(SampleRate::Hz48000, Channels::Mono);
    /// 48kHz stereo
    pub const STEREO_48K: Format = Format::new(SampleRate::Hz48000, Channels::Stereo);
}
