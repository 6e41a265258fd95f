//! Low-pass decimation for the PSS search
//!
//! The PSS occupies the central 62 subcarriers, so the search can run at a
//! fraction of the sample rate. The filter keeps the tail of the previous
//! window, so back-to-back windows are filtered as one stream.

use crate::{alloc_cf, PhyError};
use num_complex::Complex32;
use std::f32::consts::PI;
use tracing::debug;

/// Filter taps per unit of decimation factor, on each side of the centre
const TAPS_PER_FACTOR: usize = 8;

/// Hamming-windowed sinc low-pass with cutoff at the decimated Nyquist rate,
/// normalized to unit DC gain
fn lowpass_taps(factor: usize) -> Vec<f32> {
    let half = TAPS_PER_FACTOR * factor;
    let len = 2 * half + 1;
    let cutoff = 0.5 / factor as f32;
    let mut taps: Vec<f32> = (0..len)
        .map(|i| {
            let x = i as f32 - half as f32;
            let sinc = if x == 0.0 {
                1.0
            } else {
                (2.0 * PI * cutoff * x).sin() / (2.0 * PI * cutoff * x)
            };
            let window = 0.54 - 0.46 * (2.0 * PI * i as f32 / (len - 1) as f32).cos();
            2.0 * cutoff * sinc * window
        })
        .collect();
    let sum: f32 = taps.iter().sum();
    for t in taps.iter_mut() {
        *t /= sum;
    }
    taps
}

/// FIR decimator with state carried between windows
pub struct Decimator {
    factor: usize,
    taps: Vec<f32>,
    /// Last `taps.len() - 1` input samples
    history: Vec<Complex32>,
    /// History followed by the current window
    extended: Vec<Complex32>,
    output: Vec<Complex32>,
    max_input_len: usize,
}

impl Decimator {
    /// Create a decimator by `factor` for windows up to `max_input_len` samples
    pub fn new(factor: usize, max_input_len: usize) -> Result<Self, PhyError> {
        if factor < 2 {
            return Err(PhyError::InvalidConfiguration(format!(
                "decimation factor must be at least 2, got {}",
                factor
            )));
        }
        let taps = lowpass_taps(factor);
        let history_len = taps.len() - 1;
        debug!("Decimator: factor {}, {} taps", factor, taps.len());
        Ok(Self {
            factor,
            taps,
            history: alloc_cf(history_len)?,
            extended: alloc_cf(history_len + max_input_len)?,
            output: alloc_cf(max_input_len / factor)?,
            max_input_len,
        })
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Group delay of the filter in input samples
    pub fn delay(&self) -> usize {
        (self.taps.len() - 1) / 2
    }

    /// Filter and decimate one window. Output sample `m` is the filter
    /// output at input sample `m * factor`.
    pub fn process(&mut self, input: &[Complex32]) -> Result<&[Complex32], PhyError> {
        if input.len() > self.max_input_len {
            return Err(PhyError::SizeMismatch {
                context: "decimator input",
                expected: self.max_input_len,
                actual: input.len(),
            });
        }
        let h = self.history.len();
        let total = h + input.len();
        self.extended[..h].copy_from_slice(&self.history);
        self.extended[h..total].copy_from_slice(input);

        let out_len = input.len() / self.factor;
        for (m, out) in self.output[..out_len].iter_mut().enumerate() {
            let t = h + m * self.factor;
            *out = self
                .taps
                .iter()
                .enumerate()
                .map(|(j, tap)| self.extended[t - j] * *tap)
                .sum();
        }

        self.history.copy_from_slice(&self.extended[total - h..total]);
        Ok(&self.output[..out_len])
    }

    /// Forget the previous window
    pub fn reset(&mut self) {
        self.history.fill(Complex32::new(0.0, 0.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(len: usize, freq: f32) -> Vec<Complex32> {
        (0..len)
            .map(|t| Complex32::from_polar(1.0, 2.0 * PI * freq * t as f32))
            .collect()
    }

    #[test]
    fn test_passband_tone_kept() {
        let mut decim = Decimator::new(2, 1000).unwrap();
        let input = tone(1000, 0.1);
        let delay = decim.delay();
        let output = decim.process(&input).unwrap().to_vec();
        assert_eq!(output.len(), 500);
        // Past the filter transient the output is the delayed input
        for m in 20..500 {
            let expected = input[2 * m - delay];
            assert!((output[m] - expected).norm() < 0.02, "m={} {} vs {}", m, output[m], expected);
        }
    }

    #[test]
    fn test_stopband_tone_rejected() {
        let mut decim = Decimator::new(2, 1000).unwrap();
        let output = decim.process(&tone(1000, 0.4)).unwrap();
        let power: f32 = output[20..].iter().map(|v| v.norm_sqr()).sum::<f32>() / (output.len() - 20) as f32;
        assert!(power < 1e-3, "stopband power {}", power);
    }

    #[test]
    fn test_split_windows_match_one_pass() {
        let input = tone(800, 0.07);
        let mut whole = Decimator::new(2, 800).unwrap();
        let expected = whole.process(&input).unwrap().to_vec();

        let mut split = Decimator::new(2, 800).unwrap();
        let mut output = split.process(&input[..400]).unwrap().to_vec();
        output.extend_from_slice(split.process(&input[400..]).unwrap());
        assert_eq!(output.len(), expected.len());
        for (a, b) in output.iter().zip(&expected) {
            assert!((a - b).norm() < 1e-5);
        }

        split.reset();
        let restarted = split.process(&input).unwrap();
        assert!((restarted[0] - expected[0]).norm() < 1e-6);
    }

    #[test]
    fn test_invalid_factor_and_length() {
        assert!(Decimator::new(1, 100).is_err());
        let mut decim = Decimator::new(2, 100).unwrap();
        assert!(decim.process(&[Complex32::new(0.0, 0.0); 101]).is_err());
    }
}
