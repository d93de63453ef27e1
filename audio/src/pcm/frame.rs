//! PCM frame type.

use std::time::Duration;

use super::format::{Format, FrameDuration};
use crate::error::{Error, Result};

/// Full-scale magnitude used to map between `i16` and `f32` samples.
pub(crate) const FULL_SCALE: f32 = 32768.0;

/// Interleaved sample storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    /// Signed 16-bit samples.
    I16(Vec<i16>),
    /// Normalized float samples in [-1.0, 1.0].
    F32(Vec<f32>),
}

impl Samples {
    /// Returns the number of interleaved samples.
    pub fn len(&self) -> usize {
        match self {
            Self::I16(s) => s.len(),
            Self::F32(s) => s.len(),
        }
    }

    /// Returns true if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A block of interleaved PCM samples in a known format.
///
/// The frame itself accepts any whole number of sample groups; sessions
/// additionally require the per-channel length to match an Opus frame
/// duration.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmFrame {
    format: Format,
    samples: Samples,
}

impl PcmFrame {
    /// Creates a frame of 16-bit samples.
    pub fn from_i16(format: Format, samples: Vec<i16>) -> Result<Self> {
        Self::new(format, Samples::I16(samples))
    }

    /// Creates a frame of normalized float samples.
    pub fn from_f32(format: Format, samples: Vec<f32>) -> Result<Self> {
        Self::new(format, Samples::F32(samples))
    }

    fn new(format: Format, samples: Samples) -> Result<Self> {
        if samples.len() % format.channels() != 0 {
            return Err(Error::InvalidFrameSize {
                samples: samples.len(),
                sample_rate: format.sample_rate(),
            });
        }
        Ok(Self { format, samples })
    }

    /// Builds a frame from 16-bit-scaled values whose length is already a
    /// whole number of sample groups.
    pub(crate) fn from_scaled(format: Format, scaled: &[f32], float: bool) -> Self {
        debug_assert_eq!(scaled.len() % format.channels(), 0);
        let samples = if float {
            Samples::F32(scaled.iter().map(|&v| v / FULL_SCALE).collect())
        } else {
            Samples::I16(scaled.iter().map(|&v| to_i16(v)).collect())
        };
        Self { format, samples }
    }

    /// Creates a silent 16-bit frame of the given duration.
    pub fn silence(format: Format, fd: FrameDuration) -> Self {
        Self {
            format,
            samples: Samples::I16(vec![0; format.frame_len(fd)]),
        }
    }

    /// Returns the frame format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Returns the sample storage.
    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    /// Returns the 16-bit samples, if the frame holds them.
    pub fn as_i16(&self) -> Option<&[i16]> {
        match &self.samples {
            Samples::I16(s) => Some(s),
            Samples::F32(_) => None,
        }
    }

    /// Returns the float samples, if the frame holds them.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.samples {
            Samples::F32(s) => Some(s),
            Samples::I16(_) => None,
        }
    }

    /// Returns the samples converted to 16-bit.
    pub fn to_i16(&self) -> Vec<i16> {
        match &self.samples {
            Samples::I16(s) => s.clone(),
            Samples::F32(s) => s.iter().map(|&v| to_i16(v * FULL_SCALE)).collect(),
        }
    }

    /// Consumes the frame and returns its sample storage.
    pub fn into_samples(self) -> Samples {
        self.samples
    }

    /// Returns the number of interleaved samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the frame holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the number of samples per channel.
    pub fn samples_per_channel(&self) -> usize {
        self.len() / self.format.channels()
    }

    /// Returns the Opus frame duration matching this frame's length, if any.
    pub fn frame_duration(&self) -> Option<FrameDuration> {
        FrameDuration::from_samples(self.format.sample_rate, self.samples_per_channel())
    }

    /// Returns the playback duration of this frame.
    pub fn duration(&self) -> Duration {
        Duration::from_micros(
            self.samples_per_channel() as u64 * 1_000_000 / self.format.sample_rate() as u64,
        )
    }

    /// Writes the samples into `out` scaled to the 16-bit range.
    pub(crate) fn write_scaled(&self, out: &mut Vec<f32>) {
        out.clear();
        match &self.samples {
            Samples::I16(s) => out.extend(s.iter().map(|&v| v as f32)),
            Samples::F32(s) => out.extend(s.iter().map(|&v| v * FULL_SCALE)),
        }
    }
}

/// Rounds a 16-bit-scaled value to a saturated `i16`.
pub(crate) fn to_i16(v: f32) -> i16 {
    v.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
