//! PCM audio data model.
//!
//! - `Format`: validated sample rate and channel layout
//! - `FrameDuration`: the six Opus frame durations
//! - `PcmFrame`: interleaved `i16` or `f32` samples in a format

mod format;
mod frame;

pub use format::*;
pub use frame::*;
