//! Error types for codec sessions and streams.

use opuskit_buffer::BufferError;
use thiserror::Error;

/// Errors returned by sessions, streams and configuration loading.
///
/// Every failure is surfaced to the immediate caller; nothing is retried.
/// `EncodeFailure` and `DecodeFailure` poison only the session that raised
/// them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("opus: unsupported sample rate {0} Hz")]
    UnsupportedSampleRate(u32),

    #[error("opus: unsupported channel count {0}")]
    UnsupportedChannelCount(u32),

    #[error("opus: invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("opus: invalid frame size: {samples} samples per channel at {sample_rate} Hz")]
    InvalidFrameSize { samples: usize, sample_rate: u32 },

    #[error("opus: encode failed: {0}")]
    EncodeFailure(String),

    #[error("opus: decode failed: {0}")]
    DecodeFailure(String),

    #[error("opus: session poisoned, reset required")]
    SessionPoisoned,

    #[error("stream: closed")]
    StreamClosed,

    #[error("pool: out of memory ({requested} bytes)")]
    OutOfMemory { requested: usize },

    #[error("pool: invalid buffer handle")]
    InvalidHandle,

    #[error("config: {0}")]
    Config(String),

    #[error("device: {0}")]
    Device(#[from] std::io::Error),
}

impl From<BufferError> for Error {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::OutOfMemory { requested } => Error::OutOfMemory { requested },
            BufferError::InvalidHandle => Error::InvalidHandle,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
