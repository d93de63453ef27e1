//! Opus decoder.

use std::time::Duration;

use tracing::{debug, trace, warn};

use super::coder::{self, CoderError};
use super::packet::{self, FramePacket, Packet};
use crate::error::{Error, Result};
use crate::pcm::{Format, PcmFrame};

/// Duration concealed when no packet has been decoded yet.
pub const FALLBACK_DURATION: Duration = Duration::from_millis(20);

/// Consecutive losses after which concealment falls silent.
pub const MAX_CONCEALED_FRAMES: u32 = 5;

/// Gain applied per concealed frame.
const CONCEAL_DECAY: f32 = 0.6;

/// Opus decoder session.
///
/// Output is always produced at the decoder's own rate and channel count.
/// Packets from an encoder at another rate are resampled by interpolation;
/// mono packets are duplicated to stereo and stereo packets are averaged
/// down to mono.
#[derive(Debug)]
pub struct Decoder {
    format: Format,
    concealment: bool,
    poisoned: bool,
    last_duration: Option<Duration>,
    history: Vec<f32>,
    lost: u32,
    last: Vec<f32>,
    coded: Vec<f32>,
}

impl Decoder {
    /// Creates a new decoder.
    ///
    /// # Parameters
    /// - `sample_rate`: Output sample rate (8000, 12000, 16000, 24000, or 48000)
    /// - `channels`: Output channels (1 or 2)
    pub fn new(sample_rate: u32, channels: u32) -> Result<Self> {
        Ok(Self::with_format(Format::from_raw(sample_rate, channels)?))
    }

    /// Creates a new decoder for an already validated format.
    pub fn with_format(format: Format) -> Self {
        debug!("opus: decoder created ({})", format);
        Self {
            format,
            concealment: true,
            poisoned: false,
            last_duration: None,
            history: Vec::new(),
            lost: 0,
            last: vec![0.0; format.channels()],
            coded: Vec::new(),
        }
    }

    /// Returns the output format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Returns true if lost packets are concealed rather than silenced.
    pub fn concealment(&self) -> bool {
        self.concealment
    }

    /// Enables or disables packet-loss concealment.
    pub fn set_concealment(&mut self, enabled: bool) {
        self.concealment = enabled;
    }

    /// Returns true after a decode failure until `reset`.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Returns the audio duration of a packet without decoding it.
    pub fn packet_duration(packet: &Packet) -> Result<Duration> {
        let parsed = packet::parse(packet.as_bytes())
            .map_err(|err| Error::DecodeFailure(err.to_string()))?;
        Ok(parsed.duration())
    }

    /// Decodes a packet into 16-bit PCM.
    ///
    /// `None` reports a lost packet and is concealed; it never fails, even
    /// on a poisoned session.
    pub fn decode(&mut self, packet: Option<&Packet>) -> Result<PcmFrame> {
        let scaled = self.decode_scaled(packet)?;
        Ok(PcmFrame::from_scaled(self.format, &scaled, false))
    }

    /// Decodes a packet into normalized float PCM.
    pub fn decode_float(&mut self, packet: Option<&Packet>) -> Result<PcmFrame> {
        let scaled = self.decode_scaled(packet)?;
        Ok(PcmFrame::from_scaled(self.format, &scaled, true))
    }

    /// Clears concealment history and the poisoned flag.
    pub fn reset(&mut self) {
        self.poisoned = false;
        self.last_duration = None;
        self.history.clear();
        self.lost = 0;
        self.last.fill(0.0);
        debug!("opus: decoder reset ({})", self.format);
    }

    fn decode_scaled(&mut self, packet: Option<&Packet>) -> Result<Vec<f32>> {
        let mut out = Vec::new();
        let Some(packet) = packet.filter(|p| !p.is_empty()) else {
            let duration = self.last_duration.unwrap_or(FALLBACK_DURATION);
            let samples = self.format.samples_in(duration) / self.format.channels();
            self.conceal(samples, &mut out);
            trace!("opus: concealed {:?} (lost={})", duration, self.lost);
            return Ok(out);
        };

        if self.poisoned {
            return Err(Error::SessionPoisoned);
        }
        let parsed = match packet::parse(packet.as_bytes()) {
            Ok(parsed) => parsed,
            Err(err) => return Err(self.poison(err.to_string())),
        };
        if let Err(err) = self.decode_packet(&parsed, &mut out) {
            return Err(self.poison(err.to_string()));
        }

        self.last_duration = Some(parsed.duration());
        self.lost = 0;
        self.history.clone_from(&out);
        trace!(
            "opus: decoded packet seq={} frames={} samples={}",
            packet.sequence(),
            parsed.frames.len(),
            out.len()
        );
        Ok(out)
    }

    fn poison(&mut self, reason: String) -> Error {
        warn!("opus: decoder poisoned: {}", reason);
        self.poisoned = true;
        Error::DecodeFailure(reason)
    }

    fn decode_packet(
        &mut self,
        parsed: &FramePacket<'_>,
        out: &mut Vec<f32>,
    ) -> std::result::Result<(), CoderError> {
        let src_channels = if parsed.toc.is_stereo() { 2 } else { 1 };
        let fd = parsed.toc.configuration().frame_duration();
        let samples = self.format.samples_per_channel(fd);
        for data in &parsed.frames {
            if data.is_empty() {
                self.conceal(samples, out);
                continue;
            }
            let mut coded = std::mem::take(&mut self.coded);
            let decoded = coder::decode_frame(data, src_channels, &mut coded);
            match decoded {
                Ok(Some(m)) => self.interpolate(&coded, m, src_channels, samples, out),
                Ok(None) => {
                    out.resize(out.len() + samples * self.format.channels(), 0.0);
                    self.last.fill(0.0);
                }
                Err(err) => {
                    self.coded = coded;
                    return Err(err);
                }
            }
            self.coded = coded;
        }
        Ok(())
    }

    /// Resamples `m` coded samples per channel to `n` output samples and
    /// maps the channel layout.
    fn interpolate(&mut self, coded: &[f32], m: usize, src_channels: usize, n: usize, out: &mut Vec<f32>) {
        let channels = self.format.channels();
        let source = |ch: usize, i: usize| -> f32 {
            match (src_channels, channels) {
                (1, _) => coded[i],
                (_, 1) => (coded[i] + coded[m + i]) / 2.0,
                _ => coded[ch * m + i],
            }
        };

        let base = out.len();
        out.reserve(n * channels);
        for k in 0..n {
            for ch in 0..channels {
                let v = if m == n {
                    source(ch, k)
                } else {
                    let p = (k as f64 + 0.5) * m as f64 / n as f64 - 0.5;
                    if p < 0.0 {
                        let t = (p + 1.0) as f32;
                        self.last[ch] * (1.0 - t) + source(ch, 0) * t
                    } else {
                        let i0 = (p.floor() as usize).min(m - 1);
                        let i1 = (i0 + 1).min(m - 1);
                        let t = (p - i0 as f64) as f32;
                        source(ch, i0) * (1.0 - t) + source(ch, i1) * t
                    }
                };
                out.push(v);
            }
        }
        if n > 0 {
            let tail = base + (n - 1) * channels;
            self.last.copy_from_slice(&out[tail..tail + channels]);
        }
    }

    /// Appends `samples` per channel of concealment to `out`.
    ///
    /// Repeats the last decoded output with a gain that ramps down by
    /// `CONCEAL_DECAY` per lost frame, falling silent after
    /// `MAX_CONCEALED_FRAMES` losses or when disabled.
    fn conceal(&mut self, samples: usize, out: &mut Vec<f32>) {
        let channels = self.format.channels();
        let len = samples * channels;
        self.lost = self.lost.saturating_add(1);

        if !self.concealment || self.history.is_empty() || self.lost > MAX_CONCEALED_FRAMES {
            out.resize(out.len() + len, 0.0);
            self.last.fill(0.0);
            return;
        }

        let g0 = CONCEAL_DECAY.powi(self.lost as i32 - 1);
        let g1 = CONCEAL_DECAY.powi(self.lost as i32);
        let base = out.len();
        for i in 0..len {
            let t = (i / channels) as f32 / samples as f32;
            let gain = g0 + (g1 - g0) * t;
            out.push(self.history[i % self.history.len()] * gain);
        }
        if samples > 0 {
            let tail = base + len - channels;
            self.last.copy_from_slice(&out[tail..tail + channels]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::opus::{Application, Encoder};
    use crate::pcm::{Channels, FrameDuration, SampleRate};

    fn tone(format: Format, fd: FrameDuration, amp: f32) -> PcmFrame {
        let n = format.samples_per_channel(fd);
        let hz = format.sample_rate() as f32;
        let samples = (0..n)
            .flat_map(|i| {
                let v = (amp * (i as f32 * 300.0 * std::f32::consts::TAU / hz).sin()) as i16;
                std::iter::repeat(v).take(format.channels())
            })
            .collect();
        PcmFrame::from_i16(format, samples).unwrap()
    }

    fn encode(format: Format, app: Application, frame: &PcmFrame) -> Packet {
        let mut encoder = Encoder::with_format(format, app);
        encoder.set_bitrate(64000).unwrap();
        encoder.encode(frame).unwrap()
    }

    #[test]
    fn test_decoder_create() {
        let decoder = Decoder::new(16000, 1).unwrap();
        assert_eq!(decoder.format(), Format::MONO_16K);
        assert!(decoder.concealment());
        assert!(matches!(Decoder::new(11025, 1), Err(Error::UnsupportedSampleRate(11025))));
        assert!(matches!(Decoder::new(16000, 0), Err(Error::UnsupportedChannelCount(0))));
    }

    #[test]
    fn test_fresh_decoder_conceals_silence() {
        let mut decoder = Decoder::new(48000, 2).unwrap();
        let frame = decoder.decode(None).unwrap();
        assert_eq!(frame.samples_per_channel(), 960);
        assert_eq!(frame.len(), 1920);
        assert!(frame.as_i16().unwrap().iter().all(|&s| s == 0));
    }

    #[test]
    fn test_silence_round_trip_every_configuration() {
        for app in [Application::VoIP, Application::Audio, Application::RestrictedLowdelay] {
            for rate in SampleRate::ALL {
                for channels in [Channels::Mono, Channels::Stereo] {
                    let format = Format::new(rate, channels);
                    for fd in FrameDuration::ALL {
                        let packet = encode(format, app, &PcmFrame::silence(format, fd));
                        let mut decoder = Decoder::with_format(format);
                        let frame = decoder.decode(Some(&packet)).unwrap();
                        assert_eq!(frame.len(), format.frame_len(fd), "{:?} {} {}", app, format, fd);
                        assert!(frame.as_i16().unwrap().iter().all(|&s| s == 0));
                    }
                }
            }
        }
    }

    #[test]
    fn test_output_follows_decoder_rate() {
        let src = Format::MONO_16K;
        let packet = encode(src, Application::VoIP, &tone(src, FrameDuration::Duration20ms, 8000.0));
        for rate in SampleRate::ALL {
            for channels in [Channels::Mono, Channels::Stereo] {
                let format = Format::new(rate, channels);
                let mut decoder = Decoder::with_format(format);
                let frame = decoder.decode(Some(&packet)).unwrap();
                assert_eq!(frame.len(), format.frame_len(FrameDuration::Duration20ms));
            }
        }
    }

    #[test]
    fn test_tone_round_trip() {
        let format = Format::MONO_16K;
        let input = tone(format, FrameDuration::Duration20ms, 8000.0);
        let packet = encode(format, Application::VoIP, &input);
        let mut decoder = Decoder::with_format(format);
        let output = decoder.decode(Some(&packet)).unwrap();

        let err = input
            .as_i16()
            .unwrap()
            .iter()
            .zip(output.as_i16().unwrap())
            .map(|(&a, &b)| (a as i32 - b as i32).abs())
            .max()
            .unwrap();
        assert!(err < 3000, "max error {}", err);
    }

    #[test]
    fn test_channel_negotiation() {
        let stereo = Format::STEREO_48K;
        let packet = encode(stereo, Application::Audio, &tone(stereo, FrameDuration::Duration10ms, 9000.0));
        let mut mono = Decoder::with_format(Format::MONO_48K);
        let frame = mono.decode(Some(&packet)).unwrap();
        assert_eq!(frame.len(), 480);

        let packet = encode(Format::MONO_48K, Application::Audio, &tone(Format::MONO_48K, FrameDuration::Duration10ms, 9000.0));
        let mut dup = Decoder::with_format(stereo);
        let frame = dup.decode(Some(&packet)).unwrap();
        let samples = frame.as_i16().unwrap();
        assert_eq!(samples.len(), 960);
        assert!(samples.chunks_exact(2).all(|p| p[0] == p[1]));
        assert!(samples.iter().any(|&s| s != 0));
    }

    #[test]
    fn test_concealment_decays_to_silence() {
        let format = Format::MONO_16K;
        let packet = encode(format, Application::VoIP, &tone(format, FrameDuration::Duration10ms, 10000.0));
        let mut decoder = Decoder::with_format(format);
        decoder.decode(Some(&packet)).unwrap();

        let energy = |f: &PcmFrame| f.as_i16().unwrap().iter().map(|&s| (s as i64).pow(2)).sum::<i64>();
        let mut prev = i64::MAX;
        for _ in 0..MAX_CONCEALED_FRAMES {
            let frame = decoder.decode(None).unwrap();
            assert_eq!(frame.len(), 160);
            let e = energy(&frame);
            assert!(e > 0 && e < prev);
            prev = e;
        }
        let frame = decoder.decode(None).unwrap();
        assert_eq!(energy(&frame), 0);

        // A good packet restarts concealment.
        decoder.decode(Some(&packet)).unwrap();
        assert!(energy(&decoder.decode(None).unwrap()) > 0);
    }

    #[test]
    fn test_concealment_disabled() {
        let format = Format::MONO_16K;
        let packet = encode(format, Application::VoIP, &tone(format, FrameDuration::Duration20ms, 10000.0));
        let mut decoder = Decoder::with_format(format);
        decoder.set_concealment(false);
        decoder.decode(Some(&packet)).unwrap();
        let frame = decoder.decode(None).unwrap();
        assert_eq!(frame.len(), 320);
        assert!(frame.as_i16().unwrap().iter().all(|&s| s == 0));
    }

    #[test]
    fn test_lost_length_follows_last_packet() {
        let format = Format::MONO_48K;
        let packet = encode(format, Application::Audio, &PcmFrame::silence(format, FrameDuration::Duration60ms));
        let mut decoder = Decoder::with_format(format);
        decoder.decode(Some(&packet)).unwrap();
        assert_eq!(decoder.decode(None).unwrap().len(), 2880);
        assert_eq!(decoder.decode(Some(&Packet::from_slice(&[]))).unwrap().len(), 2880);
    }

    #[test]
    fn test_zero_length_frame_is_concealed() {
        // WB SILK 20 ms, code 0, no payload.
        let mut decoder = Decoder::new(16000, 1).unwrap();
        let frame = decoder.decode(Some(&Packet::from_slice(&[0x48]))).unwrap();
        assert_eq!(frame.len(), 320);
    }

    #[test]
    fn test_corrupt_packet_poisons_until_reset() {
        let mut decoder = Decoder::new(16000, 1).unwrap();
        // Code 1 with an odd payload.
        let bad = Packet::from_slice(&[0x49, 1, 2, 3]);
        assert!(matches!(decoder.decode(Some(&bad)), Err(Error::DecodeFailure(_))));
        assert!(decoder.is_poisoned());

        let good = Packet::from_slice(&[0x48, 0x80]);
        assert!(matches!(decoder.decode(Some(&good)), Err(Error::SessionPoisoned)));
        assert!(decoder.decode(None).is_ok());

        decoder.reset();
        assert_eq!(decoder.decode(Some(&good)).unwrap().len(), 320);
    }

    #[test]
    fn test_bad_payload_is_decode_failure() {
        let mut decoder = Decoder::new(16000, 1).unwrap();
        let bad = Packet::from_slice(&[0x48, 0x08, 4, 0]);
        assert!(matches!(decoder.decode(Some(&bad)), Err(Error::DecodeFailure(_))));
    }

    #[test]
    fn test_decode_float() {
        let format = Format::MONO_16K;
        let packet = encode(format, Application::VoIP, &tone(format, FrameDuration::Duration20ms, 16000.0));
        let mut decoder = Decoder::with_format(format);
        let frame = decoder.decode_float(Some(&packet)).unwrap();
        let samples = frame.as_f32().unwrap();
        assert_eq!(samples.len(), 320);
        assert!(samples.iter().all(|v| v.abs() <= 1.0));
        assert!(samples.iter().any(|v| v.abs() > 0.1));
    }

    #[test]
    fn test_packet_duration() {
        let packet = Packet::from_slice(&[0x4B, 0x83, 1, 1, 0x80, 0x80, 0x80]);
        assert_eq!(Decoder::packet_duration(&packet).unwrap(), Duration::from_millis(60));
        let bad = Packet::from_slice(&[0x4B]);
        assert!(matches!(Decoder::packet_duration(&bad), Err(Error::DecodeFailure(_))));
    }
}
