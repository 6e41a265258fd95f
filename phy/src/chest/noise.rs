//! Noise power estimation
//!
//! The pilot-residual estimators compare each interior pilot with the mean
//! of its neighbours. For independent noise of power `s` on every pilot the
//! residual has power `s * (1 + 1/n)` with `n` neighbours, which the
//! estimators divide out.

use num_complex::Complex32;

/// Residual power scaling with two frequency neighbours
const SCALE_1D: f32 = 1.5;

/// Residual power scaling with four neighbours
const SCALE_2D: f32 = 1.25;

/// Noise from pilots of one port, `nref` per pilot symbol.
///
/// Uses frequency and time neighbours when there are at least three pilot
/// symbols, frequency neighbours only otherwise. `None` when no pilot has
/// a full neighbourhood.
pub fn noise_refs(ls: &[Complex32], nref: usize, nsymbols: usize) -> Option<f32> {
    if nref < 3 || ls.len() < nref * nsymbols {
        return None;
    }
    let at = |m: usize, i: usize| ls[m * nref + i];

    let mut power = 0.0;
    let mut count = 0usize;
    if nsymbols >= 3 {
        for m in 1..nsymbols - 1 {
            for i in 1..nref - 1 {
                let avg = (at(m, i - 1) + at(m, i + 1) + at(m - 1, i) + at(m + 1, i)) * 0.25;
                power += (at(m, i) - avg).norm_sqr();
                count += 1;
            }
        }
        Some(power / count as f32 / SCALE_2D)
    } else {
        for m in 0..nsymbols {
            for i in 1..nref - 1 {
                let avg = (at(m, i - 1) + at(m, i + 1)) * 0.5;
                power += (at(m, i) - avg).norm_sqr();
                count += 1;
            }
        }
        if count == 0 {
            return None;
        }
        Some(power / count as f32 / SCALE_1D)
    }
}

/// Noise from a known sequence: mean power of `received - estimate * known`
pub fn noise_known(received: &[Complex32], known: &[Complex32], estimate: &[Complex32]) -> Option<f32> {
    let n = received.len().min(known.len()).min(estimate.len());
    if n == 0 {
        return None;
    }
    let power: f32 = (0..n)
        .map(|i| (received[i] - estimate[i] * known[i]).norm_sqr())
        .sum();
    Some(power / n as f32)
}

/// Noise from resource elements that carry nothing: their mean power
pub fn noise_empty(received: &[Complex32]) -> Option<f32> {
    if received.is_empty() {
        return None;
    }
    Some(received.iter().map(|v| v.norm_sqr()).sum::<f32>() / received.len() as f32)
}
