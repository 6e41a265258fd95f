//! Reference waveform correlator
//!
//! Computes the power profile `|sum_k x[n + k] * conj(r[k])|^2` for every
//! candidate alignment `n` in `0..=N-L` of an input window of length `N`
//! against a reference of length `L`. Two algorithms produce the same
//! profile: a direct time-domain sum and an FFT-based product in the
//! frequency domain.

use crate::{alloc_cf, alloc_filled, PhyError};
use common::utils::{ema, next_power_of_2};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Correlation algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationAlgorithm {
    /// Time-domain sum, O(N*L)
    Direct,
    /// Frequency-domain product, O(N log N)
    Fft,
}

/// Candidate alignments above which the FFT algorithm is selected automatically
pub const AUTO_DIRECT_MAX_LAGS: usize = 64;

impl CorrelationAlgorithm {
    /// Pick the cheaper algorithm for the given input and reference lengths
    pub fn auto(max_input_len: usize, reference_len: usize) -> Self {
        if max_input_len.saturating_sub(reference_len) + 1 > AUTO_DIRECT_MAX_LAGS {
            CorrelationAlgorithm::Fft
        } else {
            CorrelationAlgorithm::Direct
        }
    }
}

/// Cross-correlator against a fixed-length reference waveform
pub struct Correlator {
    /// Reference waveform
    reference: Vec<Complex32>,
    /// Largest accepted input window
    max_input_len: usize,
    /// Active algorithm
    algorithm: CorrelationAlgorithm,
    /// FFT length used by the frequency-domain algorithm
    fft_size: usize,
    /// Forward transform
    fft: Arc<dyn Fft<f32>>,
    /// Inverse transform
    ifft: Arc<dyn Fft<f32>>,
    /// Conjugated spectrum of the zero-padded reference
    ref_spectrum: Vec<Complex32>,
    /// Transform work buffer
    work: Vec<Complex32>,
    /// Transform scratch buffer
    scratch: Vec<Complex32>,
    /// Averaged power profile
    profile: Vec<f32>,
    /// Smoothing coefficient of the profile average
    ema_alpha: f32,
}

impl Correlator {
    /// Create a correlator for `reference` accepting inputs up to `max_input_len` samples
    pub fn new(
        reference: &[Complex32],
        max_input_len: usize,
        algorithm: CorrelationAlgorithm,
    ) -> Result<Self, PhyError> {
        if reference.is_empty() {
            return Err(PhyError::InvalidConfiguration("empty correlation reference".to_string()));
        }
        if max_input_len < reference.len() {
            return Err(PhyError::InvalidConfiguration(format!(
                "maximum input {} shorter than reference {}",
                max_input_len,
                reference.len()
            )));
        }

        let fft_size = next_power_of_2(max_input_len);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let ifft = planner.plan_fft_inverse(fft_size);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());

        let mut correlator = Self {
            reference: alloc_cf(reference.len())?,
            max_input_len,
            algorithm,
            fft_size,
            fft,
            ifft,
            ref_spectrum: alloc_cf(fft_size)?,
            work: alloc_cf(fft_size)?,
            scratch: alloc_cf(scratch_len)?,
            profile: alloc_filled(max_input_len - reference.len() + 1, 0.0)?,
            ema_alpha: 1.0,
        };
        correlator.set_reference(reference)?;

        debug!(
            "Correlator: L={}, max input {}, FFT size {}, {:?}",
            reference.len(),
            max_input_len,
            fft_size,
            algorithm
        );
        Ok(correlator)
    }

    /// Replace the reference waveform; the length must not change
    pub fn set_reference(&mut self, reference: &[Complex32]) -> Result<(), PhyError> {
        crate::check_len("correlator reference", self.reference.len(), reference.len())?;
        self.reference.copy_from_slice(reference);

        self.ref_spectrum.fill(Complex32::new(0.0, 0.0));
        self.ref_spectrum[..reference.len()].copy_from_slice(reference);
        self.fft
            .process_with_scratch(&mut self.ref_spectrum, &mut self.scratch);
        for v in self.ref_spectrum.iter_mut() {
            *v = v.conj();
        }
        self.reset();
        Ok(())
    }

    /// Set the smoothing coefficient of the profile average.
    ///
    /// Values outside (0, 1) disable averaging.
    pub fn set_ema_alpha(&mut self, alpha: f32) {
        self.ema_alpha = alpha;
    }

    /// Switch algorithm
    pub fn set_algorithm(&mut self, algorithm: CorrelationAlgorithm) {
        self.algorithm = algorithm;
    }

    /// Active algorithm
    pub fn algorithm(&self) -> CorrelationAlgorithm {
        self.algorithm
    }

    /// Reference length
    pub fn reference_len(&self) -> usize {
        self.reference.len()
    }

    /// Largest accepted input window
    pub fn max_input_len(&self) -> usize {
        self.max_input_len
    }

    /// Clear the profile average
    pub fn reset(&mut self) {
        self.profile.fill(0.0);
    }

    /// Correlate `input` against the reference and return the (averaged)
    /// power profile of length `input.len() - L + 1`
    pub fn correlate(&mut self, input: &[Complex32]) -> Result<&[f32], PhyError> {
        let l = self.reference.len();
        if input.len() < l || input.len() > self.max_input_len {
            return Err(PhyError::SizeMismatch {
                context: "correlator input",
                expected: self.max_input_len,
                actual: input.len(),
            });
        }
        let n_out = input.len() - l + 1;

        match self.algorithm {
            CorrelationAlgorithm::Direct => {
                for n in 0..n_out {
                    let c: Complex32 = input[n..n + l]
                        .iter()
                        .zip(&self.reference)
                        .map(|(x, r)| x * r.conj())
                        .sum();
                    self.profile[n] = ema(c.norm_sqr(), self.profile[n], self.ema_alpha);
                }
            }
            CorrelationAlgorithm::Fft => {
                self.work[..input.len()].copy_from_slice(input);
                self.work[input.len()..].fill(Complex32::new(0.0, 0.0));
                self.fft.process_with_scratch(&mut self.work, &mut self.scratch);
                for (w, r) in self.work.iter_mut().zip(&self.ref_spectrum) {
                    *w *= *r;
                }
                self.ifft.process_with_scratch(&mut self.work, &mut self.scratch);

                let norm = 1.0 / self.fft_size as f32;
                for n in 0..n_out {
                    let p = (self.work[n] * norm).norm_sqr();
                    self.profile[n] = ema(p, self.profile[n], self.ema_alpha);
                }
            }
        }

        Ok(&self.profile[..n_out])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chirp(len: usize) -> Vec<Complex32> {
        (0..len)
            .map(|n| {
                let phase = std::f32::consts::PI * 7.0 * (n * n) as f32 / len as f32;
                Complex32::from_polar(1.0, phase)
            })
            .collect()
    }

    fn embed(reference: &[Complex32], len: usize, offset: usize) -> Vec<Complex32> {
        let mut input = vec![Complex32::new(0.0, 0.0); len];
        input[offset..offset + reference.len()].copy_from_slice(reference);
        input
    }

    #[test]
    fn test_peak_at_embedded_offset() {
        let reference = chirp(64);
        let input = embed(&reference, 500, 321);

        for algorithm in [CorrelationAlgorithm::Direct, CorrelationAlgorithm::Fft] {
            let mut correlator = Correlator::new(&reference, 500, algorithm).unwrap();
            let profile = correlator.correlate(&input).unwrap();
            assert_eq!(profile.len(), 500 - 64 + 1);
            let (idx, _) = common::utils::argmax(profile).unwrap();
            assert_eq!(idx, 321, "{:?}", algorithm);
        }
    }

    #[test]
    fn test_direct_and_fft_agree() {
        let reference = chirp(37);
        let input: Vec<Complex32> = (0..300)
            .map(|n| Complex32::new((n as f32 * 0.37).sin(), (n as f32 * 0.11).cos()))
            .collect();

        let mut direct = Correlator::new(&reference, 300, CorrelationAlgorithm::Direct).unwrap();
        let mut fft = Correlator::new(&reference, 300, CorrelationAlgorithm::Fft).unwrap();
        let a = direct.correlate(&input).unwrap().to_vec();
        let b = fft.correlate(&input).unwrap().to_vec();

        let peak = a.iter().cloned().fold(0.0f32, f32::max);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() <= 1e-4 * peak, "{} vs {}", x, y);
        }
    }

    #[test]
    fn test_shorter_input_accepted() {
        let reference = chirp(16);
        let mut correlator = Correlator::new(&reference, 256, CorrelationAlgorithm::Fft).unwrap();
        let input = embed(&reference, 100, 10);
        let profile = correlator.correlate(&input).unwrap();
        assert_eq!(profile.len(), 85);
        assert_eq!(common::utils::argmax(profile).unwrap().0, 10);
    }

    #[test]
    fn test_size_errors() {
        let reference = chirp(16);
        let mut correlator = Correlator::new(&reference, 64, CorrelationAlgorithm::Direct).unwrap();
        assert!(matches!(
            correlator.correlate(&vec![Complex32::new(0.0, 0.0); 65]),
            Err(PhyError::SizeMismatch { .. })
        ));
        assert!(correlator.correlate(&reference[..8]).is_err());
        assert!(correlator.set_reference(&reference[..8]).is_err());
        assert!(Correlator::new(&reference, 8, CorrelationAlgorithm::Fft).is_err());
        assert!(Correlator::new(&[], 8, CorrelationAlgorithm::Fft).is_err());
    }

    #[test]
    fn test_profile_average_and_reset() {
        let reference = chirp(16);
        let input = embed(&reference, 32, 4);
        let mut correlator = Correlator::new(&reference, 32, CorrelationAlgorithm::Direct).unwrap();
        let raw = correlator.correlate(&input).unwrap()[4];

        correlator.reset();
        correlator.set_ema_alpha(0.5);
        let first = correlator.correlate(&input).unwrap()[4];
        assert!((first - 0.5 * raw).abs() < 1e-3 * raw);
        let second = correlator.correlate(&input).unwrap()[4];
        assert!((second - 0.75 * raw).abs() < 1e-3 * raw);

        correlator.reset();
        let after_reset = correlator.correlate(&input).unwrap()[4];
        assert!((after_reset - first).abs() < 1e-3 * raw);
    }

    #[test]
    fn test_auto_selection() {
        assert_eq!(CorrelationAlgorithm::auto(128 + 31, 128), CorrelationAlgorithm::Direct);
        assert_eq!(CorrelationAlgorithm::auto(9600, 128), CorrelationAlgorithm::Fft);
    }

    #[test]
    fn test_deterministic() {
        let reference = chirp(32);
        let input = embed(&reference, 200, 77);
        let mut correlator = Correlator::new(&reference, 200, CorrelationAlgorithm::Fft).unwrap();
        let a = correlator.correlate(&input).unwrap().to_vec();
        let b = correlator.correlate(&input).unwrap().to_vec();
        assert_eq!(a, b);
    }
}
