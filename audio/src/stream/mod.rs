//! Stream coordination.
//!
//! - `EncodeStream`: capture-order PCM in, packets out
//! - `DecodeStream`: packets in any order, PCM out in sequence order
//!
//! Each stream owns exactly one codec session. Streams share nothing but
//! a `BufferPool`, which is internally synchronized.

mod decode;
mod encode;
mod reorder;
mod state;

pub use decode::*;
pub use encode::*;
pub use state::*;

/// Running counters for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStats {
    /// PCM frames consumed (encode) or produced (decode).
    pub frames: u64,
    /// Packets produced (encode) or accepted (decode).
    pub packets: u64,
    /// Frames produced by packet-loss concealment.
    pub concealed: u64,
    /// Packets dropped as late or duplicate.
    pub dropped: u64,
}
