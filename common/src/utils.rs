//! Utility functions shared by the receiver stages

use num_complex::Complex32;

/// Exponential moving average update: `alpha * sample + (1 - alpha) * average`.
///
/// Coefficients outside the open interval (0, 1) disable averaging and
/// return the sample unchanged.
pub fn ema(sample: f32, average: f32, alpha: f32) -> f32 {
    if alpha > 0.0 && alpha < 1.0 {
        alpha * sample + (1.0 - alpha) * average
    } else {
        sample
    }
}

/// Complex variant of [`ema`]
pub fn ema_complex(sample: Complex32, average: Complex32, alpha: f32) -> Complex32 {
    if alpha > 0.0 && alpha < 1.0 {
        sample * alpha + average * (1.0 - alpha)
    } else {
        sample
    }
}

/// Convert a power ratio to dB
pub fn pow_to_db(value: f32) -> f32 {
    10.0 * value.log10()
}

/// Convert dB to a power ratio
pub fn db_to_pow(db: f32) -> f32 {
    10f32.powf(db / 10.0)
}

/// Convert an amplitude ratio to dB
pub fn amp_to_db(value: f32) -> f32 {
    20.0 * value.log10()
}

/// Sum of `x[i] * conj(y[i])`
pub fn dot_prod_conj(x: &[Complex32], y: &[Complex32]) -> Complex32 {
    x.iter().zip(y).map(|(a, b)| a * b.conj()).sum()
}

/// Sum of `x[i] * y[i]`
pub fn dot_prod(x: &[Complex32], y: &[Complex32]) -> Complex32 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

/// Total energy of a buffer
pub fn energy(x: &[Complex32]) -> f32 {
    x.iter().map(|v| v.norm_sqr()).sum()
}

/// Average power of a buffer (zero for an empty buffer)
pub fn avg_power(x: &[Complex32]) -> f32 {
    if x.is_empty() {
        0.0
    } else {
        energy(x) / x.len() as f32
    }
}

/// Index and value of the first maximum of a real sequence
pub fn argmax(x: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in x.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best
}

/// Round up to next power of 2
pub fn next_power_of_2(n: usize) -> usize {
    n.max(1).next_power_of_two()
}
