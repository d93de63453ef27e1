//! Opus encoder.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::coder::{self, ChannelState, CoderError, FrameParams};
use super::packet::{self, MAX_PACKET_BYTES, Packet};
use super::toc::{Bandwidth, Configuration, ConfigurationMode};
use crate::error::{Error, Result};
use crate::pcm::{Format, FrameDuration, PcmFrame, SampleRate};

/// Lowest accepted bitrate in bits per second.
pub const MIN_BITRATE: u32 = 6_000;

/// Highest accepted bitrate in bits per second.
pub const MAX_BITRATE: u32 = 510_000;

/// Complexity used until `set_complexity` is called.
pub const DEFAULT_COMPLEXITY: u8 = 10;

/// Lowest complexity that enables the step search.
const SEARCH_COMPLEXITY: u8 = 5;

/// Opus application type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Application {
    /// Best quality for voice signals.
    #[serde(rename = "voip")]
    VoIP,
    /// Best quality for non-voice signals.
    Audio,
    /// Minimum possible coding delay.
    RestrictedLowdelay,
}

/// How one packet of a given duration is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketPlan {
    /// TOC configuration of every frame in the packet.
    pub configuration: Configuration,
    /// Number of Opus frames in the packet.
    pub frames: usize,
}

/// Opus encoder session.
///
/// Adaptive state (step sizes, decimation filter history, bit reservoir)
/// carries over from one `encode` call to the next, so frames must be
/// submitted in capture order.
#[derive(Debug)]
pub struct Encoder {
    format: Format,
    application: Application,
    bitrate: Option<u32>,
    complexity: u8,
    states: Vec<ChannelState>,
    reservoir: i64,
    sequence: u64,
    poisoned: bool,
    scaled: Vec<f32>,
    frames: [Vec<u8>; 3],
    packet: Vec<u8>,
}

impl Encoder {
    /// Creates a new encoder.
    ///
    /// # Parameters
    /// - `sample_rate`: Sample rate (8000, 12000, 16000, 24000, or 48000)
    /// - `channels`: Number of channels (1 or 2)
    /// - `application`: Intended application type
    ///
    /// The bitrate must be set before the first `encode`.
    pub fn new(sample_rate: u32, channels: u32, application: Application) -> Result<Self> {
        Ok(Self::with_format(Format::from_raw(sample_rate, channels)?, application))
    }

    /// Creates a new encoder for an already validated format.
    pub fn with_format(format: Format, application: Application) -> Self {
        debug!("opus: encoder created ({}, {:?})", format, application);
        Self {
            format,
            application,
            bitrate: None,
            complexity: DEFAULT_COMPLEXITY,
            states: vec![ChannelState::default(); format.channels()],
            reservoir: 0,
            sequence: 0,
            poisoned: false,
            scaled: Vec::new(),
            frames: Default::default(),
            packet: Vec::with_capacity(MAX_PACKET_BYTES),
        }
    }

    /// Returns the session format.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Returns the application type.
    pub fn application(&self) -> Application {
        self.application
    }

    /// Returns the target bitrate, if set.
    pub fn bitrate(&self) -> Option<u32> {
        self.bitrate
    }

    /// Returns the complexity (0-10).
    pub fn complexity(&self) -> u8 {
        self.complexity
    }

    /// Returns true after an encode failure until `reset`.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Returns the sequence index the next packet will carry.
    pub fn next_sequence(&self) -> u64 {
        self.sequence
    }

    /// Sets the target bitrate in bits per second (6000-510000).
    pub fn set_bitrate(&mut self, bitrate: u32) -> Result<()> {
        self.check_poisoned()?;
        if !(MIN_BITRATE..=MAX_BITRATE).contains(&bitrate) {
            return Err(Error::InvalidConfiguration(format!(
                "bitrate {} outside {}..={}",
                bitrate, MIN_BITRATE, MAX_BITRATE
            )));
        }
        self.bitrate = Some(bitrate);
        Ok(())
    }

    /// Sets the encoder complexity (0-10).
    pub fn set_complexity(&mut self, complexity: u8) -> Result<()> {
        self.check_poisoned()?;
        if complexity > 10 {
            return Err(Error::InvalidConfiguration(format!(
                "complexity {} outside 0..=10",
                complexity
            )));
        }
        self.complexity = complexity;
        Ok(())
    }

    /// Returns the packet layout used for frames of `fd`.
    pub fn plan(&self, fd: FrameDuration) -> Result<PacketPlan> {
        plan_packet(self.application, self.format.sample_rate, fd)
    }

    /// Encodes one frame of PCM into a packet.
    pub fn encode(&mut self, frame: &PcmFrame) -> Result<Packet> {
        let sequence = self.sequence;
        self.encode_frame(frame)?;
        Ok(Packet::new(self.packet.clone(), sequence))
    }

    /// Encodes one frame of PCM into `buf`. Returns the number of bytes
    /// written.
    ///
    /// `buf` must hold at least `MAX_PACKET_BYTES` bytes. The packet
    /// consumes the sequence index returned by `next_sequence`.
    pub fn encode_to(&mut self, frame: &PcmFrame, buf: &mut [u8]) -> Result<usize> {
        check_output(buf)?;
        self.encode_frame(frame)?;
        Ok(self.copy_packet(buf))
    }

    /// Encodes interleaved samples already scaled to the 16-bit range.
    pub(crate) fn encode_scaled(&mut self, samples: &[f32], buf: &mut [u8]) -> Result<usize> {
        check_output(buf)?;
        self.encode_packet(samples)?;
        Ok(self.copy_packet(buf))
    }

    /// Clears adaptive state and the poisoned flag. The sequence index
    /// keeps counting.
    pub fn reset(&mut self) {
        self.states.fill(ChannelState::default());
        self.reservoir = 0;
        self.poisoned = false;
        debug!("opus: encoder reset ({})", self.format);
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::SessionPoisoned);
        }
        Ok(())
    }

    fn encode_frame(&mut self, frame: &PcmFrame) -> Result<()> {
        self.check_poisoned()?;
        if frame.format() != self.format {
            return Err(Error::InvalidConfiguration(format!(
                "frame format {} does not match encoder format {}",
                frame.format(),
                self.format
            )));
        }
        let mut scaled = std::mem::take(&mut self.scaled);
        frame.write_scaled(&mut scaled);
        let result = self.encode_packet(&scaled);
        self.scaled = scaled;
        result
    }

    fn encode_packet(&mut self, samples: &[f32]) -> Result<()> {
        self.check_poisoned()?;
        let Some(bitrate) = self.bitrate else {
            return Err(Error::InvalidConfiguration("bitrate not set".into()));
        };
        let channels = self.format.channels();
        let per_channel = samples.len() / channels;
        let fd = FrameDuration::from_samples(self.format.sample_rate, per_channel)
            .filter(|_| samples.len() % channels == 0)
            .ok_or(Error::InvalidFrameSize {
                samples: per_channel,
                sample_rate: self.format.sample_rate(),
            })?;
        let plan = self.plan(fd)?;

        if let Err(err) = self.code_packet(samples, fd, plan, bitrate) {
            warn!("opus: encoder poisoned: {}", err);
            self.poisoned = true;
            return Err(Error::EncodeFailure(err.to_string()));
        }

        trace!(
            "opus: encoded packet seq={} config={} frames={} bytes={}",
            self.sequence,
            plan.configuration.0,
            plan.frames,
            self.packet.len()
        );
        self.sequence += 1;
        Ok(())
    }

    fn code_packet(
        &mut self,
        samples: &[f32],
        fd: FrameDuration,
        plan: PacketPlan,
        bitrate: u32,
    ) -> std::result::Result<(), CoderError> {
        let channels = self.format.channels();
        let frame_bits = bitrate as i64 * fd.micros() as i64 / 1_000_000;
        let budget_bits = frame_bits + self.reservoir.min(frame_bits);

        let sub_len = samples.len() / plan.frames;
        let cap = if plan.frames == 1 {
            MAX_PACKET_BYTES - 1
        } else {
            (MAX_PACKET_BYTES - packet::header_overhead(plan.frames)) / plan.frames
        };
        let floor = coder::min_coded_len(self.format.sample_rate(), channels, sub_len / channels);
        let budget = ((budget_bits / 8) as usize)
            .saturating_sub(packet::header_overhead(plan.frames))
            / plan.frames;
        let params = FrameParams {
            rate: self.format.sample_rate(),
            channels,
            budget: budget.max(floor).min(cap),
            search: self.complexity >= SEARCH_COMPLEXITY,
        };

        for (chunk, out) in samples.chunks_exact(sub_len).zip(self.frames.iter_mut()) {
            coder::encode_frame(chunk, &params, &mut self.states, out)?;
        }
        let frames: Vec<&[u8]> = self.frames[..plan.frames].iter().map(Vec::as_slice).collect();
        packet::build(
            plan.configuration,
            channels == 2,
            &frames,
            &mut self.packet,
        );
        if self.packet.len() > MAX_PACKET_BYTES {
            return Err(CoderError::BudgetOverrun {
                len: self.packet.len(),
                budget: MAX_PACKET_BYTES,
            });
        }

        let used_bits = self.packet.len() as i64 * 8;
        self.reservoir = (self.reservoir + frame_bits - used_bits).clamp(0, frame_bits);
        Ok(())
    }

    fn copy_packet(&self, buf: &mut [u8]) -> usize {
        let n = self.packet.len();
        buf[..n].copy_from_slice(&self.packet);
        n
    }
}

fn check_output(buf: &[u8]) -> Result<()> {
    if buf.len() < MAX_PACKET_BYTES {
        return Err(Error::InvalidConfiguration(format!(
            "output buffer of {} bytes is smaller than {}",
            buf.len(),
            MAX_PACKET_BYTES
        )));
    }
    Ok(())
}

/// Chooses the TOC configuration and frame count for a packet.
///
/// VoIP sessions up to wideband use SILK for 10-60 ms; above wideband they
/// use Hybrid for 10 ms and longer. Everything else is CELT. CELT and Hybrid
/// have no 40/60 ms frames, so those packets carry 2 or 3 frames of 20 ms.
fn plan_packet(application: Application, rate: SampleRate, fd: FrameDuration) -> Result<PacketPlan> {
    use ConfigurationMode::*;
    use FrameDuration::*;

    let bandwidth = Bandwidth::for_rate(rate);
    let long = fd >= Duration10ms;
    let (mode, bandwidth) = match application {
        Application::VoIP if long && bandwidth <= Bandwidth::WB => (Silk, bandwidth),
        Application::VoIP if long => (Hybrid, bandwidth),
        _ if bandwidth == Bandwidth::MB => (CELT, Bandwidth::WB),
        _ => (CELT, bandwidth),
    };
    let (frame_fd, frames) = match (mode, fd) {
        (Silk, _) => (fd, 1),
        (_, Duration40ms) => (Duration20ms, 2),
        (_, Duration60ms) => (Duration20ms, 3),
        _ => (fd, 1),
    };
    let configuration = Configuration::select(mode, bandwidth, frame_fd).ok_or_else(|| {
        Error::InvalidConfiguration(format!("no {} configuration for {} at {}", mode, bandwidth, fd))
    })?;
    Ok(PacketPlan { configuration, frames })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::opus::packet::parse;
    use crate::pcm::Channels;

    fn voip_16k() -> Encoder {
        let mut encoder = Encoder::new(16000, 1, Application::VoIP).unwrap();
        encoder.set_bitrate(24000).unwrap();
        encoder
    }

    fn noise(len: usize, seed: u32) -> Vec<i16> {
        let mut x = seed;
        (0..len)
            .map(|_| {
                x = x.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (x >> 16) as i16
            })
            .collect()
    }

    #[test]
    fn test_encoder_create() {
        let encoder = Encoder::new(16000, 1, Application::VoIP).unwrap();
        assert_eq!(encoder.format(), Format::MONO_16K);
        assert_eq!(encoder.application(), Application::VoIP);
        assert_eq!(encoder.bitrate(), None);
        assert_eq!(encoder.complexity(), DEFAULT_COMPLEXITY);
        assert_eq!(encoder.next_sequence(), 0);
    }

    #[test]
    fn test_encoder_create_invalid() {
        assert!(matches!(
            Encoder::new(44100, 1, Application::Audio),
            Err(Error::UnsupportedSampleRate(44100))
        ));
        assert!(matches!(
            Encoder::new(48000, 3, Application::Audio),
            Err(Error::UnsupportedChannelCount(3))
        ));
    }

    #[test]
    fn test_bitrate_required() {
        let mut encoder = Encoder::new(16000, 1, Application::VoIP).unwrap();
        let frame = PcmFrame::silence(Format::MONO_16K, FrameDuration::Duration20ms);
        assert!(matches!(encoder.encode(&frame), Err(Error::InvalidConfiguration(_))));
        assert!(!encoder.is_poisoned());
    }

    #[test]
    fn test_set_bitrate() {
        let mut encoder = voip_16k();
        assert!(encoder.set_bitrate(MIN_BITRATE).is_ok());
        assert!(encoder.set_bitrate(MAX_BITRATE).is_ok());
        assert!(matches!(encoder.set_bitrate(5999), Err(Error::InvalidConfiguration(_))));
        assert!(matches!(encoder.set_bitrate(510_001), Err(Error::InvalidConfiguration(_))));
        assert_eq!(encoder.bitrate(), Some(MAX_BITRATE));
    }

    #[test]
    fn test_set_complexity() {
        let mut encoder = voip_16k();
        assert!(encoder.set_complexity(0).is_ok());
        assert!(encoder.set_complexity(10).is_ok());
        assert!(matches!(encoder.set_complexity(11), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_encode_silence() {
        let mut encoder = voip_16k();
        let frame = PcmFrame::silence(Format::MONO_16K, FrameDuration::Duration20ms);
        let packet = encoder.encode(&frame).unwrap();
        // WB SILK 20 ms, mono, one silent frame.
        assert_eq!(packet.as_bytes(), &[0x48, 0x80]);
        assert_eq!(packet.sequence(), 0);
    }

    #[test]
    fn test_encode_non_silence() {
        let mut encoder = voip_16k();
        let pcm: Vec<i16> = (0..320)
            .map(|i| ((i as f32 * 440.0 * std::f32::consts::TAU / 16000.0).sin() * 10000.0) as i16)
            .collect();
        let frame = PcmFrame::from_i16(Format::MONO_16K, pcm).unwrap();
        let packet = encoder.encode(&frame).unwrap();
        assert!(packet.len() > 2);
        // 24 kbit/s for 20 ms is 60 bytes, plus what the reservoir lends.
        assert!(packet.len() <= 1 + 60 + 60);
        assert_eq!(parse(packet.as_bytes()).unwrap().frames.len(), 1);
    }

    #[test]
    fn test_invalid_frame_size() {
        let mut encoder = Encoder::new(48000, 1, Application::Audio).unwrap();
        encoder.set_bitrate(64000).unwrap();
        // 13 ms at 48 kHz.
        let frame = PcmFrame::from_i16(Format::MONO_48K, vec![0; 624]).unwrap();
        assert!(matches!(
            encoder.encode(&frame),
            Err(Error::InvalidFrameSize { samples: 624, sample_rate: 48000 })
        ));
        assert!(!encoder.is_poisoned());
    }

    #[test]
    fn test_format_mismatch() {
        let mut encoder = voip_16k();
        let frame = PcmFrame::silence(Format::MONO_48K, FrameDuration::Duration20ms);
        assert!(matches!(encoder.encode(&frame), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_encode_failure_poisons_until_reset() {
        let mut encoder = voip_16k();
        let mut pcm = vec![0.1f32; 320];
        pcm[17] = f32::NAN;
        let bad = PcmFrame::from_f32(Format::MONO_16K, pcm).unwrap();
        assert!(matches!(encoder.encode(&bad), Err(Error::EncodeFailure(_))));
        assert!(encoder.is_poisoned());

        let good = PcmFrame::silence(Format::MONO_16K, FrameDuration::Duration20ms);
        assert!(matches!(encoder.encode(&good), Err(Error::SessionPoisoned)));
        assert!(matches!(encoder.set_bitrate(16000), Err(Error::SessionPoisoned)));
        assert!(matches!(encoder.set_complexity(1), Err(Error::SessionPoisoned)));

        encoder.reset();
        assert!(!encoder.is_poisoned());
        assert!(encoder.encode(&good).is_ok());
    }

    #[test]
    fn test_sequence_survives_reset() {
        let mut encoder = voip_16k();
        let frame = PcmFrame::silence(Format::MONO_16K, FrameDuration::Duration10ms);
        assert_eq!(encoder.encode(&frame).unwrap().sequence(), 0);
        assert_eq!(encoder.encode(&frame).unwrap().sequence(), 1);
        encoder.reset();
        assert_eq!(encoder.encode(&frame).unwrap().sequence(), 2);
        assert_eq!(encoder.next_sequence(), 3);
    }

    #[test]
    fn test_encode_to() {
        let mut encoder = voip_16k();
        let frame = PcmFrame::silence(Format::MONO_16K, FrameDuration::Duration20ms);
        let mut buf = vec![0u8; MAX_PACKET_BYTES];
        let n = encoder.encode_to(&frame, &mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x48, 0x80]);

        let mut small = vec![0u8; 16];
        assert!(matches!(
            encoder.encode_to(&frame, &mut small),
            Err(Error::InvalidConfiguration(_))
        ));
        assert_eq!(encoder.next_sequence(), 1);
    }

    #[test]
    fn test_plan() {
        use FrameDuration::*;
        let cases = [
            (Application::VoIP, SampleRate::Hz16000, Duration20ms, 9, 1),
            (Application::VoIP, SampleRate::Hz8000, Duration60ms, 3, 1),
            (Application::VoIP, SampleRate::Hz16000, Duration5ms, 21, 1),
            (Application::VoIP, SampleRate::Hz12000, Duration2500us, 20, 1),
            (Application::VoIP, SampleRate::Hz48000, Duration10ms, 14, 1),
            (Application::VoIP, SampleRate::Hz24000, Duration40ms, 13, 2),
            (Application::VoIP, SampleRate::Hz48000, Duration60ms, 15, 3),
            (Application::Audio, SampleRate::Hz12000, Duration10ms, 22, 1),
            (Application::Audio, SampleRate::Hz48000, Duration40ms, 31, 2),
            (Application::RestrictedLowdelay, SampleRate::Hz8000, Duration60ms, 19, 3),
        ];
        for (app, rate, fd, config, frames) in cases {
            let plan = plan_packet(app, rate, fd).unwrap();
            assert_eq!(plan.configuration.0, config, "{:?} {} {}", app, rate, fd);
            assert_eq!(plan.frames, frames, "{:?} {} {}", app, rate, fd);
        }
    }

    #[test]
    fn test_every_configuration_plans() {
        for app in [Application::VoIP, Application::Audio, Application::RestrictedLowdelay] {
            for rate in SampleRate::ALL {
                for fd in FrameDuration::ALL {
                    let plan = plan_packet(app, rate, fd).unwrap();
                    let per_frame = plan.configuration.frame_duration().micros() as usize;
                    assert_eq!(per_frame * plan.frames, fd.micros() as usize);
                }
            }
        }
    }

    #[test]
    fn test_packet_limit_at_max_bitrate() {
        for fd in FrameDuration::ALL {
            let format = Format::STEREO_48K;
            let mut encoder = Encoder::with_format(format, Application::Audio);
            encoder.set_bitrate(MAX_BITRATE).unwrap();
            for seed in 0..3 {
                let frame = PcmFrame::from_i16(format, noise(format.frame_len(fd), seed)).unwrap();
                let packet = encoder.encode(&frame).unwrap();
                assert!(packet.len() <= MAX_PACKET_BYTES, "{} bytes at {}", packet.len(), fd);
                assert_eq!(packet.duration(), fd.duration());
            }
        }
    }

    #[test]
    fn test_low_bitrate_still_codes() {
        let format = Format::new(SampleRate::Hz48000, Channels::Stereo);
        let mut encoder = Encoder::with_format(format, Application::VoIP);
        encoder.set_bitrate(MIN_BITRATE).unwrap();
        encoder.set_complexity(0).unwrap();
        let fd = FrameDuration::Duration2500us;
        let frame = PcmFrame::from_i16(format, noise(format.frame_len(fd), 7)).unwrap();
        let packet = encoder.encode(&frame).unwrap();
        assert!(packet.len() > 2);
        assert!(parse(packet.as_bytes()).is_ok());
    }

    #[test]
    fn test_application_serde() {
        let app: Application = serde_json::from_str("\"voip\"").unwrap();
        assert_eq!(app, Application::VoIP);
        let app: Application = serde_json::from_str("\"restricted_lowdelay\"").unwrap();
        assert_eq!(app, Application::RestrictedLowdelay);
        assert_eq!(serde_json::to_string(&Application::Audio).unwrap(), "\"audio\"");
    }
}
