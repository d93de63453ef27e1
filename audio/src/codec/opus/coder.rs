//! Frame payload coder.
//!
//! Each Opus frame carries one payload produced here. A frame is either the
//! one-byte silence marker or a decimated, closed-loop DPCM block:
//!
//! ```text
//! byte 0      bit 7 silence, bits 4-6 decimation index, bits 0-3 q (1-8)
//! byte 1-2    M, coded samples per channel (u16 LE)
//! per channel start sample (i16 LE), step index (u8)
//! codes       q-bit residual codes, MSB first, channel-major, M-1 each
//! ```
//!
//! The payload is self-describing: the decoder needs only the channel count
//! from the TOC byte. Reconstruction uses the same arithmetic on both sides,
//! so the encoder's closed-loop prediction matches the decoder exactly.

use thiserror::Error;

/// Payload of a silent frame.
pub(crate) const SILENCE_FRAME: u8 = 0x80;

/// Decimation factors, indexed by bits 4-6 of the header byte.
pub(crate) const DECIMATIONS: [usize; 7] = [1, 2, 3, 4, 6, 8, 12];

/// Lowest effective rate a frame may be decimated to.
const MIN_CODED_RATE: u32 = 4000;

/// Highest step index; `step_size(63)` covers the full 16-bit range.
const MAX_STEP_INDEX: u8 = 63;

/// How far the step index may fall in one frame.
const STEP_RELEASE: u8 = 6;

/// Upper bound on coded samples per channel (60 ms at 48 kHz).
const MAX_CODED_SAMPLES: usize = 2880;

const STEP_MANTISSA: [f32; 4] = [1.0, 1.189_207, 1.414_214, 1.681_793];

/// Payload coding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum CoderError {
    #[error("non-finite analysis value")]
    NonFinite,

    #[error("payload of {len} bytes exceeds budget of {budget} bytes")]
    BudgetOverrun { len: usize, budget: usize },

    #[error("payload truncated")]
    Truncated,

    #[error("invalid payload header 0x{0:02x}")]
    InvalidHeader(u8),

    #[error("invalid step index {0}")]
    InvalidStep(u8),

    #[error("invalid coded length {0}")]
    InvalidCodedLength(usize),

    #[error("payload is {actual} bytes, header describes {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Returns the quantizer step for a step index.
pub(crate) fn step_size(idx: u8) -> f32 {
    STEP_MANTISSA[(idx % 4) as usize] * (1u32 << (idx / 4)) as f32
}

/// Per-channel analysis state carried between frames.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct ChannelState {
    step_idx: u8,
    lowpass: f32,
}

/// Parameters for coding one frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameParams {
    pub rate: u32,
    pub channels: usize,
    /// Maximum payload size in bytes.
    pub budget: usize,
    /// Enables the analysis-by-synthesis step search.
    pub search: bool,
}

fn allowed_decimations(rate: u32) -> impl Iterator<Item = (usize, usize)> {
    DECIMATIONS
        .into_iter()
        .enumerate()
        .filter(move |&(_, d)| d == 1 || rate / d as u32 >= MIN_CODED_RATE)
}

fn header_len(channels: usize) -> usize {
    3 + 3 * channels
}

/// Returns the exact payload length of a coded frame.
pub(crate) fn coded_len(channels: usize, coded: usize, q: u8) -> usize {
    header_len(channels) + (channels * coded.saturating_sub(1) * q as usize).div_ceil(8)
}

/// Returns the smallest payload a non-silent frame of `samples` per channel
/// can be coded in.
pub(crate) fn min_coded_len(rate: u32, channels: usize, samples: usize) -> usize {
    let d = allowed_decimations(rate).map(|(_, d)| d).last().unwrap_or(1);
    coded_len(channels, samples.div_ceil(d), 1)
}

/// Chooses the decimation index and code width for a budget.
///
/// Prefers the lightest decimation that leaves at least 3 bits per code,
/// then at least 2, and falls back to the heaviest decimation at 1 bit.
fn plan(samples: usize, params: &FrameParams) -> Option<(usize, u8)> {
    let q_for = |d: usize| -> u8 {
        let codes = params.channels * (samples.div_ceil(d) - 1);
        if codes == 0 {
            return 8;
        }
        let bits = params.budget.saturating_sub(header_len(params.channels)) * 8;
        (bits / codes).min(8) as u8
    };

    let candidates: Vec<(usize, usize, u8)> = allowed_decimations(params.rate)
        .map(|(i, d)| (i, d, q_for(d)))
        .collect();
    for min_q in [3, 2] {
        if let Some(&(i, _, q)) = candidates.iter().find(|c| c.2 >= min_q) {
            return Some((i, q));
        }
    }
    candidates
        .last()
        .filter(|c| c.2 >= 1)
        .map(|&(i, _, _)| (i, 1))
}

/// Lowpasses one channel and averages groups of `d` samples.
fn decimate(
    samples: &[f32],
    channels: usize,
    ch: usize,
    d: usize,
    state: &mut ChannelState,
    out: &mut Vec<f32>,
) -> Result<(), CoderError> {
    let alpha = 2.0 / (d as f32 + 1.0);
    out.clear();
    let mut acc = 0.0f32;
    let mut count = 0usize;
    for frame in samples.chunks_exact(channels) {
        state.lowpass += alpha * (frame[ch] - state.lowpass);
        acc += state.lowpass;
        count += 1;
        if count == d {
            out.push(acc / d as f32);
            acc = 0.0;
            count = 0;
        }
    }
    if count > 0 {
        out.push(acc / count as f32);
    }
    if !state.lowpass.is_finite() || out.iter().any(|v| !v.is_finite()) {
        return Err(CoderError::NonFinite);
    }
    Ok(())
}

fn clamp_i16(v: f32) -> f32 {
    v.clamp(i16::MIN as f32, i16::MAX as f32)
}

/// Runs the closed-loop quantizer, passing each code to `emit`.
/// Returns the squared reconstruction error.
fn quantize(coded: &[f32], start: f32, step: f32, q: u8, mut emit: impl FnMut(u8)) -> f64 {
    let top = ((1u32 << q) - 1) as f32;
    let half = top / 2.0;
    let mut recon = start;
    let mut err = 0.0f64;
    for &x in &coded[1..] {
        let k = ((x - recon) / step + half).round().clamp(0.0, top);
        recon = clamp_i16(recon + (k - half) * step);
        err += ((x - recon) as f64).powi(2);
        emit(k as u8);
    }
    err
}

/// Picks a starting step index from the largest sample-to-sample change.
fn initial_step(coded: &[f32], q: u8) -> u8 {
    let peak = coded
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0f32, f32::max);
    let half = ((1u32 << q) - 1) as f32 / 2.0;
    let ideal = (peak / half).max(1.0);
    (4.0 * ideal.log2()).round().clamp(0.0, MAX_STEP_INDEX as f32) as u8
}

/// Encodes one frame of interleaved samples scaled to the 16-bit range.
///
/// `states` holds one entry per channel and is updated in place.
pub(crate) fn encode_frame(
    samples: &[f32],
    params: &FrameParams,
    states: &mut [ChannelState],
    out: &mut Vec<u8>,
) -> Result<(), CoderError> {
    if samples.iter().any(|v| !v.is_finite()) {
        return Err(CoderError::NonFinite);
    }
    out.clear();

    if samples.iter().all(|v| v.abs() < 0.5) {
        for state in states.iter_mut() {
            state.lowpass = 0.0;
        }
        out.push(SILENCE_FRAME);
        return Ok(());
    }

    let channels = params.channels;
    let n = samples.len() / channels;
    let Some((d_idx, q)) = plan(n, params) else {
        return Err(CoderError::BudgetOverrun {
            len: min_coded_len(params.rate, channels, n),
            budget: params.budget,
        });
    };
    let d = DECIMATIONS[d_idx];
    let m = n.div_ceil(d);

    out.push(((d_idx as u8) << 4) | q);
    out.extend_from_slice(&(m as u16).to_le_bytes());

    let mut coded = Vec::with_capacity(m);
    let mut codes = Vec::with_capacity(channels * m);
    for (ch, state) in states.iter_mut().enumerate().take(channels) {
        decimate(samples, channels, ch, d, state, &mut coded)?;
        let start = clamp_i16(coded[0].round());

        let mut base = initial_step(&coded, q);
        if base + STEP_RELEASE < state.step_idx {
            base = state.step_idx - STEP_RELEASE;
        }
        let step_idx = if params.search {
            let lo = base.saturating_sub(2);
            let hi = (base + 1).min(MAX_STEP_INDEX);
            (lo..=hi)
                .map(|idx| (idx, quantize(&coded, start, step_size(idx), q, |_| {})))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map_or(base, |(idx, _)| idx)
        } else {
            base
        };
        state.step_idx = step_idx;

        out.extend_from_slice(&(start as i16).to_le_bytes());
        out.push(step_idx);
        quantize(&coded, start, step_size(step_idx), q, |k| codes.push(k));
    }

    let mut writer = BitWriter::new(out);
    for &k in &codes {
        writer.write(k as u32, q);
    }
    writer.finish();

    let expected = coded_len(channels, m, q);
    if out.len() != expected || out.len() > params.budget {
        return Err(CoderError::BudgetOverrun {
            len: out.len(),
            budget: params.budget,
        });
    }
    Ok(())
}

/// Decodes one frame payload into channel-major samples in the 16-bit range.
///
/// Returns `None` for a silent frame, otherwise the number of coded samples
/// per channel written to `out`.
pub(crate) fn decode_frame(
    data: &[u8],
    channels: usize,
    out: &mut Vec<f32>,
) -> Result<Option<usize>, CoderError> {
    let (&header, rest) = data.split_first().ok_or(CoderError::Truncated)?;
    if header & SILENCE_FRAME != 0 {
        if header == SILENCE_FRAME && rest.is_empty() {
            return Ok(None);
        }
        return Err(CoderError::InvalidHeader(header));
    }
    let q = header & 0x0F;
    let d_idx = (header >> 4) as usize;
    if q == 0 || q > 8 || d_idx >= DECIMATIONS.len() {
        return Err(CoderError::InvalidHeader(header));
    }

    let [lo, hi, rest @ ..] = rest else {
        return Err(CoderError::Truncated);
    };
    let m = u16::from_le_bytes([*lo, *hi]) as usize;
    if m == 0 || m > MAX_CODED_SAMPLES {
        return Err(CoderError::InvalidCodedLength(m));
    }
    let expected = coded_len(channels, m, q);
    if data.len() != expected {
        return Err(CoderError::LengthMismatch {
            expected,
            actual: data.len(),
        });
    }

    let (heads, bits) = rest.split_at(3 * channels);
    let top = ((1u32 << q) - 1) as f32;
    let half = top / 2.0;
    let mut reader = BitReader::new(bits);

    out.clear();
    for head in heads.chunks_exact(3) {
        let start = i16::from_le_bytes([head[0], head[1]]) as f32;
        if head[2] > MAX_STEP_INDEX {
            return Err(CoderError::InvalidStep(head[2]));
        }
        let step = step_size(head[2]);
        let mut recon = start;
        out.push(recon);
        for _ in 1..m {
            let k = reader.read(q).ok_or(CoderError::Truncated)? as f32;
            recon = clamp_i16(recon + (k - half) * step);
            out.push(recon);
        }
    }
    Ok(Some(m))
}

/// MSB-first bit packer appending to a byte vector.
struct BitWriter<'a> {
    out: &'a mut Vec<u8>,
    acc: u32,
    bits: u8,
}

impl<'a> BitWriter<'a> {
    fn new(out: &'a mut Vec<u8>) -> Self {
        Self { out, acc: 0, bits: 0 }
    }

    fn write(&mut self, value: u32, width: u8) {
        self.acc = (self.acc << width) | (value & ((1 << width) - 1));
        self.bits += width;
        while self.bits >= 8 {
            self.bits -= 8;
            self.out.push((self.acc >> self.bits) as u8);
        }
        self.acc &= (1 << self.bits) - 1;
    }

    fn finish(self) {
        if self.bits > 0 {
            self.out.push((self.acc << (8 - self.bits)) as u8);
        }
    }
}

/// MSB-first bit reader.
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read(&mut self, width: u8) -> Option<u32> {
        let mut value = 0u32;
        for _ in 0..width {
            let byte = *self.data.get(self.pos / 8)?;
            let bit = (byte >> (7 - self.pos % 8)) & 1;
            value = (value << 1) | bit as u32;
            self.pos += 1;
        }
        Some(value)
    }
}
