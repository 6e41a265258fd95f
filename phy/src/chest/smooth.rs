//! Frequency smoothing of pilot estimates

use crate::PhyError;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

/// Smoothing filter applied across the pilots of each pilot symbol
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SmoothingFilter {
    /// Raw pilot estimates
    #[default]
    None,
    /// Three taps `[w, 1 - 2w, w]`
    Triangle { weight: f32 },
    /// Gaussian window of `2 * order + 1` taps
    Gauss { order: usize, std_dev: f32 },
}

impl SmoothingFilter {
    pub fn validate(&self) -> Result<(), PhyError> {
        match *self {
            SmoothingFilter::None => Ok(()),
            SmoothingFilter::Triangle { weight } if (0.0..=0.5).contains(&weight) => Ok(()),
            SmoothingFilter::Gauss { order, std_dev } if order > 0 && std_dev > 0.0 => Ok(()),
            other => Err(PhyError::InvalidConfiguration(format!(
                "invalid smoothing filter {:?}",
                other
            ))),
        }
    }

    /// Filter taps summing to one; a single tap for `None`
    pub fn taps(&self) -> Vec<f32> {
        let mut taps = match *self {
            SmoothingFilter::None => vec![1.0],
            SmoothingFilter::Triangle { weight } => vec![weight, 1.0 - 2.0 * weight, weight],
            SmoothingFilter::Gauss { order, std_dev } => (0..2 * order + 1)
                .map(|i| {
                    let x = i as f32 - order as f32;
                    (-x * x / (2.0 * std_dev * std_dev)).exp()
                })
                .collect(),
        };
        let sum: f32 = taps.iter().sum();
        if sum > 0.0 {
            for t in taps.iter_mut() {
                *t /= sum;
            }
        }
        taps
    }
}

/// Centred convolution of `input` with symmetric `taps`, same length as the
/// input. Near the edges the taps that fall outside are dropped and the
/// remaining ones renormalized, so a constant input passes unchanged.
pub fn smooth(input: &[Complex32], taps: &[f32], out: &mut [Complex32]) {
    let half = taps.len() / 2;
    let len = input.len();
    for (i, o) in out.iter_mut().enumerate().take(len) {
        let mut acc = Complex32::new(0.0, 0.0);
        let mut weight = 0.0;
        for (j, tap) in taps.iter().enumerate() {
            let Some(k) = (i + j).checked_sub(half) else {
                continue;
            };
            if k < len {
                acc += input[k] * *tap;
                weight += *tap;
            }
        }
        *o = if weight > 0.0 { acc / weight } else { input[i] };
    }
}
