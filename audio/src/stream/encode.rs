//! Capture-side stream: PCM in, packets out.

use opuskit_buffer::{BufferPool, RingBuffer};
use tracing::{debug, trace};

use super::{StreamState, StreamStats};
use crate::codec::opus::{Encoder, MAX_PACKET_BYTES, Packet};
use crate::error::{Error, Result};
use crate::pcm::{FULL_SCALE, Format, FrameDuration, PcmFrame, Samples};

/// Buffers capture-order PCM and encodes it in frames of a fixed duration.
///
/// Pending samples are held in a ring buffer sized for two frames; every
/// time a full frame is available it is encoded straight into a region from
/// the pool. The returned packets own those regions and give them back when
/// dropped.
#[derive(Debug)]
pub struct EncodeStream {
    encoder: Encoder,
    frame_duration: FrameDuration,
    frame_len: usize,
    pending: RingBuffer<f32>,
    frame: Vec<f32>,
    convert: Vec<f32>,
    outbox: Vec<Packet>,
    pool: BufferPool,
    state: StreamState,
    stats: StreamStats,
}

impl EncodeStream {
    /// Creates a stream around `encoder`.
    ///
    /// The encoder must already have a bitrate.
    pub fn new(encoder: Encoder, frame_duration: FrameDuration, pool: BufferPool) -> Result<Self> {
        if encoder.bitrate().is_none() {
            return Err(Error::InvalidConfiguration("encoder bitrate not set".into()));
        }
        let frame_len = encoder.format().frame_len(frame_duration);
        debug!(
            "stream: encode stream created ({}, {})",
            encoder.format(),
            frame_duration
        );
        Ok(Self {
            encoder,
            frame_duration,
            frame_len,
            pending: RingBuffer::new(2 * frame_len),
            frame: vec![0.0; frame_len],
            convert: Vec::new(),
            outbox: Vec::new(),
            pool,
            state: StreamState::Created,
            stats: StreamStats::default(),
        })
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Returns the running counters.
    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Returns the PCM format accepted by `write`.
    pub fn format(&self) -> Format {
        self.encoder.format()
    }

    /// Returns the duration of each encoded frame.
    pub fn frame_duration(&self) -> FrameDuration {
        self.frame_duration
    }

    /// Returns the number of interleaved samples waiting for a full frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Returns the encoder session.
    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Appends interleaved 16-bit samples and returns every packet
    /// completed by them.
    pub fn write(&mut self, samples: &[i16]) -> Result<Vec<Packet>> {
        let mut convert = std::mem::take(&mut self.convert);
        convert.clear();
        convert.extend(samples.iter().map(|&v| v as f32));
        let result = self.push_scaled(&convert);
        self.convert = convert;
        result
    }

    /// Appends interleaved normalized float samples.
    pub fn write_f32(&mut self, samples: &[f32]) -> Result<Vec<Packet>> {
        let mut convert = std::mem::take(&mut self.convert);
        convert.clear();
        convert.extend(samples.iter().map(|&v| v * FULL_SCALE));
        let result = self.push_scaled(&convert);
        self.convert = convert;
        result
    }

    /// Appends a PCM frame of any length in the stream format.
    pub fn write_frame(&mut self, frame: &PcmFrame) -> Result<Vec<Packet>> {
        if frame.format() != self.format() {
            return Err(Error::InvalidConfiguration(format!(
                "frame format {} does not match stream format {}",
                frame.format(),
                self.format()
            )));
        }
        match frame.samples() {
            Samples::I16(s) => self.write(s),
            Samples::F32(s) => self.write_f32(s),
        }
    }

    /// Pads the partial frame with silence, encodes it, and stops accepting
    /// data.
    ///
    /// If encoding fails the stream stays open, so the caller can `reset`
    /// and keep writing.
    pub fn flush(&mut self) -> Result<Vec<Packet>> {
        if !self.state.accepts_data() {
            return Err(Error::StreamClosed);
        }
        debug!("stream: encode stream flushing ({} pending)", self.pending.len());
        if !self.pending.is_empty() {
            self.encode_pending()?;
        }
        self.state.begin_flush()?;
        Ok(std::mem::take(&mut self.outbox))
    }

    /// Resets the encoder after a failure and drops the samples waiting for
    /// a full frame. Packets completed before the failure are still returned
    /// by the next call. The lifecycle state is unchanged.
    pub fn reset(&mut self) {
        self.encoder.reset();
        if !self.pending.is_empty() {
            debug!("stream: discarding {} pending samples", self.pending.len());
        }
        self.pending.clear();
        debug!("stream: encode stream reset");
    }

    /// Closes the stream. Samples not yet flushed are discarded. Calling it
    /// again has no effect.
    pub fn end_stream(&mut self) {
        let previous = self.state.close();
        if previous == StreamState::Closed {
            return;
        }
        if !self.pending.is_empty() {
            debug!("stream: discarding {} pending samples", self.pending.len());
        }
        self.pending.clear();
        self.outbox.clear();
        debug!("stream: encode stream closed (was {})", previous);
    }

    fn push_scaled(&mut self, data: &[f32]) -> Result<Vec<Packet>> {
        self.state.activate()?;
        let mut rest = data;
        while !rest.is_empty() {
            let n = self.pending.write(rest);
            rest = &rest[n..];
            while self.pending.len() >= self.frame_len {
                self.encode_pending()?;
            }
        }
        Ok(std::mem::take(&mut self.outbox))
    }

    /// Encodes up to one frame of pending samples, padding with silence.
    fn encode_pending(&mut self) -> Result<()> {
        let n = self.pending.read(&mut self.frame);
        self.frame[n..].fill(0.0);

        let mut region = self.pool.acquire(MAX_PACKET_BYTES)?;
        let sequence = self.encoder.next_sequence();
        let len = self.encoder.encode_scaled(&self.frame, &mut region)?;
        region.truncate(len);
        let packet = Packet::from_region(region, sequence);

        self.stats.frames += 1;
        self.stats.packets += 1;
        trace!("stream: packet seq={} bytes={}", sequence, len);
        self.outbox.push(packet);
        Ok(())
    }
}
