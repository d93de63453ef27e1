//! Playback-side stream: packets in, PCM out.

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use super::reorder::{Next, Rejected, ReorderWindow};
use super::{StreamState, StreamStats};
use crate::codec::opus::{Decoder, Packet};
use crate::error::{Error, Result};
use crate::pcm::{Format, PcmFrame};

/// Gaps longer than this many packets reset the decoder instead of being
/// concealed.
pub const MAX_CONCEALED_GAP: u64 = 50;

/// Reorders packets by sequence index and decodes them in order.
///
/// With a `reorder_depth` of N, up to N packets are held back while a
/// predecessor is missing. When the window overflows, or on `flush`, the
/// gap is filled by concealment. The depth is capped at
/// `MAX_CONCEALED_GAP`, since a deeper window could only hold back gaps
/// that reset the decoder anyway.
#[derive(Debug)]
pub struct DecodeStream {
    decoder: Decoder,
    window: ReorderWindow,
    ready: VecDeque<PcmFrame>,
    state: StreamState,
    stats: StreamStats,
}

impl DecodeStream {
    /// Creates a stream around `decoder`.
    pub fn new(decoder: Decoder, reorder_depth: usize) -> Self {
        let max_depth = MAX_CONCEALED_GAP as usize;
        if reorder_depth > max_depth {
            warn!(
                "stream: reorder depth {} capped at {}",
                reorder_depth, max_depth
            );
        }
        let reorder_depth = reorder_depth.min(max_depth);
        debug!(
            "stream: decode stream created ({}, depth={})",
            decoder.format(),
            reorder_depth
        );
        Self {
            decoder,
            window: ReorderWindow::new(reorder_depth),
            ready: VecDeque::new(),
            state: StreamState::Created,
            stats: StreamStats::default(),
        }
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Returns the running counters.
    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Returns the output PCM format.
    pub fn format(&self) -> Format {
        self.decoder.format()
    }

    /// Returns the number of packets held in the reorder window.
    pub fn buffered(&self) -> usize {
        self.window.len()
    }

    /// Returns the reorder depth in packets.
    pub fn reorder_depth(&self) -> usize {
        self.window.depth()
    }

    /// Returns the sequence index that plays next, once playback started.
    pub fn expected_sequence(&self) -> Option<u64> {
        self.window.next_sequence()
    }

    /// Returns the decoder session.
    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Accepts a packet and returns every frame that became playable.
    ///
    /// Packets whose sequence index was already played are dropped and
    /// counted. On a decode failure, frames produced earlier in the call
    /// are kept and returned by the next successful call.
    pub fn push(&mut self, packet: Packet) -> Result<Vec<PcmFrame>> {
        self.state.activate()?;
        let seq = packet.sequence();
        match self.window.push(packet) {
            Ok(()) => self.stats.packets += 1,
            Err(Rejected::Late) => {
                self.stats.dropped += 1;
                warn!("stream: dropped late packet seq={}", seq);
            }
            Err(Rejected::Duplicate) => {
                self.stats.dropped += 1;
                warn!("stream: dropped duplicate packet seq={}", seq);
            }
        }
        self.drain(false)?;
        Ok(self.ready.drain(..).collect())
    }

    /// Reports that the transport lost the next packet. A frame of
    /// concealment is produced immediately.
    pub fn push_missing(&mut self) -> Result<Vec<PcmFrame>> {
        self.state.activate()?;
        if self.window.skip() {
            self.stats.dropped += 1;
        }
        self.conceal()?;
        self.drain(false)?;
        Ok(self.ready.drain(..).collect())
    }

    /// Plays out everything in the reorder window, concealing gaps, and
    /// stops accepting packets. On a decode failure the stream stays open.
    pub fn flush(&mut self) -> Result<Vec<PcmFrame>> {
        if !self.state.accepts_data() {
            return Err(Error::StreamClosed);
        }
        debug!("stream: decode stream flushing ({} buffered)", self.window.len());
        self.drain(true)?;
        self.state.begin_flush()?;
        Ok(self.ready.drain(..).collect())
    }

    /// Closes the stream, discarding anything not yet played. Calling it
    /// again has no effect.
    pub fn end_stream(&mut self) {
        let previous = self.state.close();
        if previous == StreamState::Closed {
            return;
        }
        self.window.clear();
        self.ready.clear();
        debug!("stream: decode stream closed (was {})", previous);
    }

    /// Resets the decoder and forgets the playback position, e.g. after a
    /// decode failure or when the sender restarts its sequence.
    pub fn reset(&mut self) {
        self.decoder.reset();
        self.window.clear();
        debug!("stream: decode stream reset");
    }

    fn drain(&mut self, force: bool) -> Result<()> {
        while let Some(next) = self.window.next(force) {
            match next {
                Next::Packet(packet) => {
                    let frame = self.decoder.decode(Some(&packet))?;
                    trace!("stream: played seq={}", packet.sequence());
                    self.stats.frames += 1;
                    self.ready.push_back(frame);
                }
                Next::Gap(n) if n > MAX_CONCEALED_GAP => {
                    warn!("stream: gap of {} packets, resetting decoder", n);
                    self.decoder.reset();
                }
                Next::Gap(n) => {
                    for _ in 0..n {
                        self.conceal()?;
                    }
                }
            }
        }
        Ok(())
    }

    fn conceal(&mut self) -> Result<()> {
        let frame = self.decoder.decode(None)?;
        self.stats.frames += 1;
        self.stats.concealed += 1;
        self.ready.push_back(frame);
        Ok(())
    }
}
