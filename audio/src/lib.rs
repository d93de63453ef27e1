//! Opus voice and audio codec integration.
//!
//! This crate provides:
//!
//! - `pcm`: validated PCM formats, frame durations and frames
//! - `codec::opus`: encoder and decoder sessions producing RFC 6716 packets
//! - `stream`: encode and decode streams with buffering, reordering and
//!   packet-loss concealment
//! - `device`: capture and render traits for platform audio
//! - `config`: YAML/JSON configuration for all of the above
//!
//! # Example
//!
//! ```rust
//! use opuskit_audio::codec::opus::{Application, Decoder, Encoder};
//! use opuskit_audio::pcm::{Format, FrameDuration};
//! use opuskit_audio::stream::{DecodeStream, EncodeStream};
//! use opuskit_buffer::BufferPool;
//!
//! let pool = BufferPool::new(64 * 1024);
//!
//! let mut encoder = Encoder::new(16000, 1, Application::VoIP)?;
//! encoder.set_bitrate(24000)?;
//! let mut capture = EncodeStream::new(encoder, FrameDuration::Duration20ms, pool)?;
//!
//! let mut playback = DecodeStream::new(Decoder::new(16000, 1)?, 2);
//!
//! // 50 ms of capture yields two 20 ms packets; flush pads the rest.
//! let mut packets = capture.write(&vec![0i16; 800])?;
//! packets.extend(capture.flush()?);
//! capture.end_stream();
//!
//! let mut frames = Vec::new();
//! for packet in packets {
//!     frames.extend(playback.push(packet)?);
//! }
//! frames.extend(playback.flush()?);
//! playback.end_stream();
//!
//! assert_eq!(frames.len(), 3);
//! assert_eq!(frames[0].len(), Format::MONO_16K.frame_len(FrameDuration::Duration20ms));
//! # Ok::<(), opuskit_audio::Error>(())
//! ```

pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod pcm;
pub mod stream;

pub use error::{Error, Result};
pub use pcm::{Format, FrameDuration, PcmFrame};
