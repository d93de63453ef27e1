//! Audio device boundary.
//!
//! Platform capture and playback are reached only through these traits,
//! so the codec and streams never name a platform type. An implementation
//! wraps whatever the host offers (a sound server, a file, a test buffer).

use std::io;

use crate::codec::opus::Packet;
use crate::error::{Error, Result};
use crate::pcm::{Format, PcmFrame};
use crate::stream::{DecodeStream, EncodeStream};

/// A source of interleaved 16-bit PCM.
pub trait CaptureSource {
    /// Returns the format of captured samples.
    fn format(&self) -> Format;

    /// Fills `buf` with captured samples. Returns the number of samples
    /// written; 0 means capture has ended.
    fn capture_frame(&mut self, buf: &mut [i16]) -> io::Result<usize>;
}

/// A consumer of decoded PCM frames.
pub trait RenderSink {
    /// Plays one frame.
    fn render_frame(&mut self, frame: &PcmFrame) -> io::Result<()>;
}

/// Drives `source` into `stream` until capture ends, then flushes the
/// stream. Returns every packet produced, in sequence order.
pub fn pump_capture(
    source: &mut dyn CaptureSource,
    stream: &mut EncodeStream,
    buf: &mut [i16],
) -> Result<Vec<Packet>> {
    if source.format() != stream.format() {
        return Err(Error::InvalidConfiguration(format!(
            "capture format {} does not match stream format {}",
            source.format(),
            stream.format()
        )));
    }
    let mut packets = Vec::new();
    loop {
        let n = source.capture_frame(buf)?.min(buf.len());
        if n == 0 {
            break;
        }
        packets.extend(stream.write(&buf[..n])?);
    }
    packets.extend(stream.flush()?);
    Ok(packets)
}

/// Feeds `packets` to `stream` and renders every frame that becomes
/// playable. Returns the number of frames rendered.
///
/// The stream is not flushed, so packets held back for reordering stay in
/// the window.
pub fn render_packets(
    stream: &mut DecodeStream,
    packets: impl IntoIterator<Item = Packet>,
    sink: &mut dyn RenderSink,
) -> Result<usize> {
    let mut rendered = 0;
    for packet in packets {
        for frame in stream.push(packet)? {
            sink.render_frame(&frame)?;
            rendered += 1;
        }
    }
    Ok(rendered)
}
