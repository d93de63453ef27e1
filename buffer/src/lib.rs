//! Frame memory for Opus streams.
//!
//! This crate owns the memory that PCM samples and Opus packets live in
//! while they move through a stream:
//!
//! - [`BufferPool`]: zeroed byte regions reused across frames, growing up to
//!   a configured ceiling and falling back to one-off allocations beyond it
//! - [`RingBuffer<T>`]: a fixed-capacity FIFO that never allocates after
//!   construction and never overwrites unread data
//!
//! # Pooled regions
//!
//! ```
//! use opuskit_buffer::BufferPool;
//!
//! let pool = BufferPool::new(16 * 1024);
//! let packet = pool.acquire(1275).unwrap();
//! assert_eq!(packet.len(), 1275);
//! pool.release(packet).unwrap();
//! assert_eq!(pool.stats().free_regions, 1);
//! ```
//!
//! # Ring buffers
//!
//! ```
//! use opuskit_buffer::RingBuffer;
//!
//! // Stage 10 ms of 16 kHz mono audio.
//! let mut pcm = RingBuffer::<i16>::new(160);
//! pcm.write(&[0; 100]);
//! assert_eq!(pcm.free(), 60);
//! ```
//!
//! # Thread Safety
//!
//! `BufferPool` is `Send + Sync` and clones share one pool, so independent
//! streams on separate threads may draw from it. `RingBuffer` is owned by a
//! single stream and is not synchronized.

mod error;
mod pool;
mod ring_buffer;

pub use error::BufferError;
pub use pool::{BufferHandle, BufferPool, PoolStats};
pub use ring_buffer::RingBuffer;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BufferPool>();
        assert_send_sync::<BufferHandle>();
    }

    #[test]
    fn test_ring_buffer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<RingBuffer<i16>>();
        assert_send::<RingBuffer<f32>>();
    }
}
