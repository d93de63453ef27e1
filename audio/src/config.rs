//! Configuration file types and loading.
//!
//! Sessions and streams can be described in YAML or JSON:
//!
//! ```yaml
//! pool:
//!   ceiling_bytes: 262144
//! encode:
//!   encoder:
//!     sample_rate: 48000
//!     channels: 2
//!     application: audio
//!     bitrate: 64000
//!   frame_duration: 20
//! decode:
//!   decoder:
//!     sample_rate: 48000
//!     channels: 2
//!   reorder_depth: 3
//! ```
//!
//! Bitrate and frame duration have no defaults and must be given.

use std::path::Path;

use opuskit_buffer::BufferPool;
use serde::{Deserialize, Serialize};

use crate::codec::opus::{Application, DEFAULT_COMPLEXITY, Decoder, Encoder, MAX_BITRATE, MIN_BITRATE};
use crate::error::{Error, Result};
use crate::pcm::{Channels, Format, FrameDuration, SampleRate};
use crate::stream::{DecodeStream, EncodeStream, MAX_CONCEALED_GAP};

/// Pool ceiling used when none is configured.
pub const DEFAULT_POOL_CEILING: usize = 256 * 1024;

fn default_complexity() -> u8 {
    DEFAULT_COMPLEXITY
}

fn default_concealment() -> bool {
    true
}

fn default_ceiling() -> usize {
    DEFAULT_POOL_CEILING
}

/// Encoder session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncoderConfig {
    pub sample_rate: SampleRate,
    pub channels: Channels,
    pub application: Application,
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    #[serde(default = "default_complexity")]
    pub complexity: u8,
}

impl EncoderConfig {
    /// Checks ranges that the types alone do not enforce.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_BITRATE..=MAX_BITRATE).contains(&self.bitrate) {
            return Err(Error::InvalidConfiguration(format!(
                "bitrate {} outside {}..={}",
                self.bitrate, MIN_BITRATE, MAX_BITRATE
            )));
        }
        if self.complexity > 10 {
            return Err(Error::InvalidConfiguration(format!(
                "complexity {} outside 0..=10",
                self.complexity
            )));
        }
        Ok(())
    }

    /// Creates a configured encoder.
    pub fn build(&self) -> Result<Encoder> {
        self.validate()?;
        let mut encoder =
            Encoder::with_format(Format::new(self.sample_rate, self.channels), self.application);
        encoder.set_bitrate(self.bitrate)?;
        encoder.set_complexity(self.complexity)?;
        Ok(encoder)
    }
}

/// Decoder session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecoderConfig {
    pub sample_rate: SampleRate,
    pub channels: Channels,
    #[serde(default = "default_concealment")]
    pub concealment: bool,
}

impl DecoderConfig {
    /// Creates a configured decoder.
    pub fn build(&self) -> Decoder {
        let mut decoder = Decoder::with_format(Format::new(self.sample_rate, self.channels));
        decoder.set_concealment(self.concealment);
        decoder
    }
}

/// Capture-side stream settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncodeStreamConfig {
    pub encoder: EncoderConfig,
    /// Frame duration in milliseconds (2.5, 5, 10, 20, 40 or 60).
    pub frame_duration: FrameDuration,
}

impl EncodeStreamConfig {
    pub fn validate(&self) -> Result<()> {
        self.encoder.validate()
    }

    /// Creates the stream, encoding packets into regions from `pool`.
    pub fn build(&self, pool: BufferPool) -> Result<EncodeStream> {
        EncodeStream::new(self.encoder.build()?, self.frame_duration, pool)
    }
}

/// Playback-side stream settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecodeStreamConfig {
    pub decoder: DecoderConfig,
    /// Packets held back while waiting for a missing predecessor.
    #[serde(default)]
    pub reorder_depth: usize,
}

impl DecodeStreamConfig {
    pub fn validate(&self) -> Result<()> {
        if self.reorder_depth as u64 > MAX_CONCEALED_GAP {
            return Err(Error::InvalidConfiguration(format!(
                "reorder depth {} exceeds {}",
                self.reorder_depth, MAX_CONCEALED_GAP
            )));
        }
        Ok(())
    }

    pub fn build(&self) -> Result<DecodeStream> {
        self.validate()?;
        Ok(DecodeStream::new(self.decoder.build(), self.reorder_depth))
    }
}

/// Buffer pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    #[serde(default = "default_ceiling")]
    pub ceiling_bytes: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            ceiling_bytes: DEFAULT_POOL_CEILING,
        }
    }
}

impl PoolConfig {
    pub fn build(&self) -> BufferPool {
        BufferPool::new(self.ceiling_bytes)
    }
}

/// Top-level configuration file structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encode: Option<EncodeStreamConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode: Option<DecodeStreamConfig>,
}

impl Config {
    /// Parses a YAML document and validates it.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(data).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a JSON document and validates it.
    pub fn from_json(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section present.
    pub fn validate(&self) -> Result<()> {
        if let Some(encode) = &self.encode {
            encode.validate()?;
        }
        if let Some(decode) = &self.decode {
            decode.validate()?;
        }
        Ok(())
    }
}

/// Parses a config file from a path (YAML or JSON, chosen by extension).
pub fn parse_config(path: &Path) -> Result<Config> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("read {}: {}", path.display(), e)))?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let parsed = match ext.as_str() {
        "json" => Config::from_json(&data),
        "yaml" | "yml" => Config::from_yaml(&data),
        _ => return Err(Error::Config(format!("unsupported config extension: {}", ext))),
    };
    parsed.map_err(|e| match e {
        Error::Config(msg) => Error::Config(format!("parse {}: {}", path.display(), msg)),
        other => other,
    })
}
