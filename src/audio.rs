//! Audio codec and sample-rate conversion
//!
//! The carrier speaks 8 kHz µ-law (G.711); the model speaks 24 kHz
//! PCM16. The 8k↔24k case is an exact factor of 3, so the fast paths
//! use integer arithmetic: linear interpolation on upsample, plain
//! decimation on downsample. A generic linear-interpolation resampler
//! handles any other ratio. Anti-alias filtering is intentionally
//! omitted: the voice band survives at 8 kHz and the latency budget is
//! tight.
//!
//! All buffers are mono. Byte inputs whose length is not a multiple of
//! the sample size are truncated to the previous even byte.

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

/// Decode one 8-bit µ-law byte to a 16-bit signed PCM sample.
#[inline]
fn ulaw_decode_byte(byte: u8) -> i16 {
    let b = !byte;
    let sign = b & 0x80;
    let exponent = (b >> 4) & 0x07;
    let mantissa = b & 0x0F;
    let magnitude = ((((mantissa as i32) << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Encode one 16-bit signed PCM sample into an 8-bit µ-law byte.
#[inline]
fn ulaw_encode_sample(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign: u8 = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    if pcm > ULAW_CLIP {
        pcm = ULAW_CLIP;
    }
    pcm += ULAW_BIAS;

    // Segment: highest set bit from bit 14 down to bit 7.
    let mut exponent: u8 = 7;
    let mut exp_mask: i32 = 0x4000;
    while exponent > 0 && pcm & exp_mask == 0 {
        exponent -= 1;
        exp_mask >>= 1;
    }

    let mantissa = ((pcm >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decode a µ-law byte sequence into PCM16 samples. One byte in, one
/// sample out; empty input yields empty output.
pub fn decode_ulaw(ulaw: &[u8]) -> Vec<i16> {
    ulaw.iter().map(|&b| ulaw_decode_byte(b)).collect()
}

/// Encode PCM16 samples into µ-law bytes.
pub fn encode_ulaw(pcm: &[i16]) -> Vec<u8> {
    pcm.iter().map(|&s| ulaw_encode_sample(s)).collect()
}

/// Interpret little-endian PCM16 bytes as samples. A trailing odd byte
/// is dropped.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Serialize PCM16 samples as little-endian bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Upsample PCM16 mono 8 kHz → 24 kHz (exact factor 3).
///
/// Inserts two linearly interpolated samples at 1/3 and 2/3 between
/// each adjacent pair; the last input sample is copied through.
pub fn upsample_x3(src: &[i16]) -> Vec<i16> {
    if src.len() < 2 {
        return src.to_vec();
    }
    let mut out = Vec::with_capacity(src.len() * 3);
    for window in src.windows(2) {
        let s0 = window[0] as i32;
        let s1 = window[1] as i32;
        out.push(s0 as i16);
        out.push((s0 + (s1 - s0) / 3) as i16);
        out.push((s0 + (s1 - s0) * 2 / 3) as i16);
    }
    out.push(*src.last().expect("len >= 2"));
    out
}

/// Downsample PCM16 mono 24 kHz → 8 kHz (exact factor 3) by taking
/// every third sample.
pub fn downsample_div3(src: &[i16]) -> Vec<i16> {
    src.iter().step_by(3).copied().collect()
}

/// Generic linear-interpolation resampler for PCM16 mono. Fallback for
/// ratios other than the 3:1 fast paths.
pub fn resample_linear(src: &[i16], from_hz: u32, to_hz: u32) -> Vec<i16> {
    if src.len() < 2 || from_hz == 0 || to_hz == 0 || from_hz == to_hz {
        return src.to_vec();
    }
    let ratio = to_hz as f64 / from_hz as f64;
    let out_len = ((src.len() as f64) * ratio).max(1.0) as usize;
    let mut out = Vec::with_capacity(out_len);
    for j in 0..out_len {
        let pos = j as f64 / ratio;
        let i = pos as usize;
        if i >= src.len() - 1 {
            out.push(*src.last().expect("len >= 2"));
        } else {
            let frac = pos - i as f64;
            let s0 = src[i] as f64;
            let s1 = src[i + 1] as f64;
            out.push((s0 + (s1 - s0) * frac) as i16);
        }
    }
    out
}

/// Convert PCM16 between sample rates, using the exact-factor fast
/// paths for the carrier/model pair.
pub fn convert_rate(src: &[i16], from_hz: u32, to_hz: u32) -> Vec<i16> {
    match (from_hz, to_hz) {
        (a, b) if a == b => src.to_vec(),
        (8_000, 24_000) => upsample_x3(src),
        (24_000, 8_000) => downsample_div3(src),
        (from, to) => resample_linear(src, from, to),
    }
}
