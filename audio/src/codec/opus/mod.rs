//! Opus audio codec.
//!
//! Packets follow RFC 6716 framing: a TOC byte selecting the SILK, Hybrid
//! or CELT configuration, then one, two or a counted run of frames. Frame
//! payloads are produced by a self-contained decimating DPCM coder, so no
//! native library is linked.
//!
//! # Example
//!
//! ```
//! use opuskit_audio::codec::opus::{Application, Decoder, Encoder};
//! use opuskit_audio::pcm::{Format, FrameDuration, PcmFrame};
//!
//! let mut encoder = Encoder::new(16000, 1, Application::VoIP)?;
//! encoder.set_bitrate(24000)?;
//!
//! let frame = PcmFrame::silence(Format::MONO_16K, FrameDuration::Duration20ms);
//! let packet = encoder.encode(&frame)?;
//!
//! let mut decoder = Decoder::new(16000, 1)?;
//! let decoded = decoder.decode(Some(&packet))?;
//! assert_eq!(decoded.len(), 320);
//! # Ok::<(), opuskit_audio::Error>(())
//! ```

mod coder;
mod decoder;
mod encoder;
mod packet;
mod toc;

pub use decoder::*;
pub use encoder::*;
pub use packet::{FramePacket, FramingError, MAX_PACKET_BYTES, MAX_PACKET_DURATION, Packet, parse};
pub use toc::*;
