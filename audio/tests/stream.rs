//! End-to-end tests: capture through encode stream, a lossy transport,
//! decode stream and render.

use std::f32::consts::PI;
use std::io;

use opuskit_audio::codec::opus::{Application, Decoder, Encoder, Packet, parse};
use opuskit_audio::config::Config;
use opuskit_audio::device::{CaptureSource, RenderSink, pump_capture, render_packets};
use opuskit_audio::pcm::{Format, FrameDuration, PcmFrame};
use opuskit_audio::stream::{DecodeStream, EncodeStream, StreamState};
use opuskit_audio::Error;
use opuskit_buffer::BufferPool;

/// Logs go to the test writer; set RUST_LOG=opuskit_audio=trace to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Produces a 440 Hz tone in chunks of 10 ms.
struct Tone {
    format: Format,
    remaining: usize,
    phase: usize,
}

impl Tone {
    fn new(format: Format, duration_ms: usize) -> Self {
        Self {
            format,
            remaining: format.sample_rate() as usize * duration_ms / 1000,
            phase: 0,
        }
    }
}

impl CaptureSource for Tone {
    fn format(&self) -> Format {
        self.format
    }

    fn capture_frame(&mut self, buf: &mut [i16]) -> io::Result<usize> {
        let channels = self.format.channels();
        let per_channel = (buf.len() / channels).min(self.remaining);
        let rate = self.format.sample_rate() as f32;
        for i in 0..per_channel {
            let t = (self.phase + i) as f32 / rate;
            let v = ((2.0 * PI * 440.0 * t).sin() * 8000.0) as i16;
            for c in 0..channels {
                buf[i * channels + c] = v;
            }
        }
        self.phase += per_channel;
        self.remaining -= per_channel;
        Ok(per_channel * channels)
    }
}

#[derive(Default)]
struct Speaker {
    frames: Vec<PcmFrame>,
}

impl RenderSink for Speaker {
    fn render_frame(&mut self, frame: &PcmFrame) -> io::Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }
}

fn capture(format: Format, app: Application, bitrate: u32, duration_ms: usize) -> Vec<Packet> {
    let mut encoder = Encoder::with_format(format, app);
    encoder.set_bitrate(bitrate).unwrap();
    let mut stream =
        EncodeStream::new(encoder, FrameDuration::Duration20ms, BufferPool::new(128 * 1024)).unwrap();
    let mut source = Tone::new(format, duration_ms);
    let mut buf = vec![0i16; format.frame_len(FrameDuration::Duration10ms)];
    let packets = pump_capture(&mut source, &mut stream, &mut buf).unwrap();
    assert_eq!(stream.state(), StreamState::Flushing);
    stream.end_stream();
    packets
}

/// Swaps every adjacent pair and loses the packet at `lost`.
fn jitter(packets: Vec<Packet>, lost: u64) -> Vec<Packet> {
    let mut out: Vec<Packet> = Vec::with_capacity(packets.len());
    for pair in packets.chunks(2) {
        for p in pair.iter().rev() {
            if p.sequence() != lost {
                out.push(p.clone());
            }
        }
    }
    out
}

fn energy(frame: &PcmFrame) -> f64 {
    frame.to_i16().iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>() / frame.len() as f64
}

#[test]
fn test_stereo_music_over_lossy_transport() {
    init_tracing();
    let format = Format::STEREO_48K;
    let packets = capture(format, Application::Audio, 96000, 1000);
    assert_eq!(packets.len(), 50);
    for (i, p) in packets.iter().enumerate() {
        assert_eq!(p.sequence(), i as u64);
        let parsed = parse(p.as_bytes()).unwrap();
        assert!(parsed.toc.is_stereo());
    }

    let mut playback = DecodeStream::new(Decoder::with_format(format), 3);
    let mut speaker = Speaker::default();
    let mut rendered = render_packets(&mut playback, jitter(packets, 10), &mut speaker).unwrap();
    for frame in playback.flush().unwrap() {
        speaker.render_frame(&frame).unwrap();
        rendered += 1;
    }
    playback.end_stream();

    assert_eq!(rendered, 50);
    let stats = playback.stats();
    assert_eq!(stats.packets, 49);
    assert_eq!(stats.concealed, 1);
    assert_eq!(stats.dropped, 0);
    assert!(speaker.frames.iter().all(|f| f.len() == 1920));
    // The tone survives coding.
    assert!(energy(&speaker.frames[25]) > 1.0e6);
}

#[test]
fn test_voice_negotiates_output_format() {
    let packets = capture(Format::STEREO_48K, Application::VoIP, 32000, 200);
    assert_eq!(packets.len(), 10);

    let mut playback = DecodeStream::new(Decoder::with_format(Format::MONO_16K), 0);
    let mut speaker = Speaker::default();
    let rendered = render_packets(&mut playback, packets, &mut speaker).unwrap();
    assert_eq!(rendered, 10);
    assert!(speaker.frames.iter().all(|f| f.len() == 320));
    assert!(energy(&speaker.frames[5]) > 1.0e5);
}

#[test]
fn test_late_and_duplicate_packets_are_counted() {
    let packets = capture(Format::MONO_16K, Application::VoIP, 24000, 100);
    assert_eq!(packets.len(), 5);

    let mut playback = DecodeStream::new(Decoder::with_format(Format::MONO_16K), 0);
    let arrivals = vec![
        packets[0].clone(),
        packets[0].clone(),
        packets[2].clone(),
        packets[1].clone(),
        packets[3].clone(),
        packets[4].clone(),
    ];
    let mut speaker = Speaker::default();
    let rendered = render_packets(&mut playback, arrivals, &mut speaker).unwrap();

    // 0, concealment for 1, then 2, 3 and 4.
    assert_eq!(rendered, 5);
    let stats = playback.stats();
    assert_eq!(stats.concealed, 1);
    assert_eq!(stats.dropped, 2);
}

#[test]
fn test_sustained_loss_fades_to_silence() {
    init_tracing();
    let packets = capture(Format::MONO_16K, Application::VoIP, 24000, 60);
    let mut playback = DecodeStream::new(Decoder::with_format(Format::MONO_16K), 0);
    for p in packets {
        playback.push(p).unwrap();
    }

    let mut last = f64::MAX;
    for _ in 0..8 {
        let frames = playback.push_missing().unwrap();
        assert_eq!(frames.len(), 1);
        let e = energy(&frames[0]);
        assert!(e <= last);
        last = e;
    }
    assert_eq!(last, 0.0);
    assert_eq!(playback.stats().concealed, 8);
}

#[test]
fn test_streams_from_config() {
    let config = Config::from_yaml(
        r#"
pool:
  ceiling_bytes: 32768
encode:
  encoder:
    sample_rate: 16000
    channels: 1
    application: voip
    bitrate: 16000
  frame_duration: 10
decode:
  decoder:
    sample_rate: 16000
    channels: 1
  reorder_depth: 2
"#,
    )
    .unwrap();
    config.validate().unwrap();

    let pool = config.pool.build();
    let mut encode = config.encode.as_ref().unwrap().build(pool.clone()).unwrap();
    let mut decode = config.decode.as_ref().unwrap().build().unwrap();

    let mut packets = encode.write(&vec![1200i16; 1000]).unwrap();
    packets.extend(encode.flush().unwrap());
    assert_eq!(packets.len(), 7);
    assert_eq!(pool.stats().on_loan, 7);

    let mut frames = Vec::new();
    for p in jitter(packets, u64::MAX) {
        frames.extend(decode.push(p).unwrap());
    }
    frames.extend(decode.flush().unwrap());
    assert_eq!(frames.len(), 7);
    assert_eq!(pool.stats().on_loan, 0);
    assert!(frames.iter().all(|f| f.len() == 160));

    decode.end_stream();
    assert!(matches!(decode.push_missing(), Err(Error::StreamClosed)));
}
