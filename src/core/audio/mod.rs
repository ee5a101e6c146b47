//! G.711 mu-law codec and frame-energy utilities.
//!
//! The carrier leg speaks 8-bit mu-law at 8 kHz; the AI leg accepts the same
//! companded bytes untouched, so decoding here exists purely to measure frame
//! energy for turn detection. All functions are pure and run in time
//! proportional to the frame length, since they sit on the per-frame hot path.

/// Bias added before mu-law compression (ITU-T G.711).
const MULAW_BIAS: i32 = 0x84;
/// Maximum linear magnitude before clipping.
const MULAW_CLIP: i32 = 32635;

/// Encode a single 16-bit linear PCM sample to mu-law.
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let sign: i32 = if sample < 0 { 0x80 } else { 0x00 };
    let mut magnitude = if sample < 0 {
        -(sample as i32)
    } else {
        sample as i32
    };

    if magnitude > MULAW_CLIP {
        magnitude = MULAW_CLIP;
    }
    magnitude += MULAW_BIAS;

    // Segment (exponent) search from the top bit down
    let mut exponent: i32 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (magnitude & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Decode a single mu-law byte to a 16-bit linear PCM sample.
pub fn mulaw_to_linear(mulaw_byte: u8) -> i16 {
    let complement = !mulaw_byte as i32;
    let sign = complement & 0x80;
    let exponent = (complement >> 4) & 0x07;
    let mantissa = complement & 0x0F;

    let mut magnitude = ((mantissa << 1) | 0x21) << (exponent + 2);
    magnitude -= MULAW_BIAS;

    if sign == 0x80 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Decode a buffer of mu-law bytes to linear PCM samples.
pub fn mulaw_to_samples(mulaw_data: &[u8]) -> Vec<i16> {
    mulaw_data.iter().map(|&b| mulaw_to_linear(b)).collect()
}

/// Root-mean-square energy of a PCM frame, in full-scale i16 units.
///
/// Returns 0.0 for an empty frame.
pub fn frame_energy(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// RMS energy of a mu-law frame, decoding inline without an intermediate
/// allocation.
pub fn mulaw_frame_energy(mulaw_data: &[u8]) -> f64 {
    if mulaw_data.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = mulaw_data
        .iter()
        .map(|&b| {
            let s = mulaw_to_linear(b) as f64;
            s * s
        })
        .sum();
    (sum_sq / mulaw_data.len() as f64).sqrt()
}
