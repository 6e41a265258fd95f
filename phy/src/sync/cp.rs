//! Cyclic prefix correlation
//!
//! The cyclic prefix repeats the last samples of each OFDM symbol, so the
//! product `x[n] * conj(x[n + N])` over a CP is real and positive for a
//! signal without frequency offset and rotates by `-2*pi*cfo` otherwise.
//! The same redundancy distinguishes normal from extended CP.

use super::cfo::wrap_phase;
use crate::{alloc_filled, PhyError};
use common::types::CyclicPrefix;
use common::utils::{ema, energy};
use num_complex::{Complex, Complex32};
use std::f32::consts::PI;
use tracing::trace;

/// Smoothing coefficient of the CP length metrics
pub const CP_EMA_ALPHA: f32 = 0.1;

/// Symbols looked back from the PSS by CP length detection
const CP_DETECT_MAX_SYMBOLS: usize = 3;

/// Fractional CFO estimator based on cyclic prefix correlation
pub struct CpCorrelator {
    /// FFT size
    fft_size: usize,
    /// Prefix sums of `x[n] * conj(x[n + N])`
    prefix: Vec<Complex<f64>>,
}

impl CpCorrelator {
    /// Create an estimator for windows up to `max_len` samples
    pub fn new(fft_size: usize, max_len: usize) -> Result<Self, PhyError> {
        Ok(Self {
            fft_size,
            prefix: alloc_filled(max_len + 1, Complex::new(0.0, 0.0))?,
        })
    }

    /// Locate the strongest CP correlation over `nsymbols` consecutive
    /// symbols of length `symbol_len` and return the fractional CFO it
    /// implies, in subcarriers. Returns `None` when the window is too short.
    pub fn estimate_cfo(
        &mut self,
        input: &[Complex32],
        cp_len: usize,
        nsymbols: usize,
    ) -> Result<Option<f32>, PhyError> {
        let n = self.fft_size;
        if input.len() + 1 > self.prefix.len() {
            return Err(PhyError::SizeMismatch {
                context: "CP correlator input",
                expected: self.prefix.len() - 1,
                actual: input.len(),
            });
        }
        let nsymbols = nsymbols.max(1);
        let symbol_len = n + cp_len;
        let span = (nsymbols - 1) * symbol_len + cp_len + n;
        if cp_len == 0 || input.len() < span {
            return Ok(None);
        }

        // prefix[k] = sum over m < k of x[m] * conj(x[m + N])
        let products = input.len() - n;
        self.prefix[0] = Complex::new(0.0, 0.0);
        for m in 0..products {
            let p = input[m] * input[m + n].conj();
            self.prefix[m + 1] = self.prefix[m] + Complex::new(p.re as f64, p.im as f64);
        }
        let cp_sum = |prefix: &[Complex<f64>], i: usize| prefix[i + cp_len] - prefix[i];

        let candidates = input.len() - span + 1;
        let mut best = Complex::new(0.0f64, 0.0);
        let mut best_mag = -1.0f64;
        let mut best_idx = 0;
        for i in 0..candidates {
            let mut c = Complex::new(0.0f64, 0.0);
            for s in 0..nsymbols {
                c += cp_sum(&self.prefix, i + s * symbol_len);
            }
            let mag = c.norm_sqr();
            if mag > best_mag {
                best_mag = mag;
                best = c;
                best_idx = i;
            }
        }

        let cfo = -wrap_phase(best.arg() as f32) / (2.0 * PI);
        trace!("CP correlation peak at {}, CFO {:.4}", best_idx, cfo);
        Ok(Some(cfo))
    }
}

/// Cyclic prefix length detector comparing normalized CP correlation under
/// both hypotheses over the symbols preceding the PSS
#[derive(Debug, Clone, Default)]
pub struct CpDetector {
    /// Averaged metric for normal CP
    m_norm_avg: f32,
    /// Averaged metric for extended CP
    m_ext_avg: f32,
}

impl CpDetector {
    /// Create a detector with cleared averages
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the metric averages
    pub fn reset(&mut self) {
        self.m_norm_avg = 0.0;
        self.m_ext_avg = 0.0;
    }

    /// Detect the CP length given the index one past the last useful sample
    /// of the PSS symbol
    pub fn detect(&mut self, input: &[Complex32], pss_end: usize, fft_size: usize) -> CyclicPrefix {
        let cp_norm = CyclicPrefix::Normal.cp_len(1, fft_size);
        let cp_ext = CyclicPrefix::Extended.cp_len(0, fft_size);
        let pss_end = pss_end.min(input.len());

        let nof_symbols = (pss_end / (fft_size + cp_ext)).min(CP_DETECT_MAX_SYMBOLS);
        if nof_symbols == 0 {
            return CyclicPrefix::Normal;
        }

        let metric = |cp: usize| -> (f32, f32) {
            let mut r = 0.0;
            let mut c = 0.0;
            let mut start = pss_end - nof_symbols * (fft_size + cp);
            for _ in 0..nof_symbols {
                let cp_part = &input[start..start + cp];
                let tail = &input[start + fft_size..start + fft_size + cp];
                r += tail
                    .iter()
                    .zip(cp_part)
                    .map(|(a, b)| (a * b.conj()).re)
                    .sum::<f32>();
                c += energy(cp_part);
                start += fft_size + cp;
            }
            let m = if c > 0.0 { r / c } else { 0.0 };
            (r, m)
        };

        let (r_norm, m_norm) = metric(cp_norm);
        let (r_ext, m_ext) = metric(cp_ext);
        self.m_norm_avg = ema(m_norm / nof_symbols as f32, self.m_norm_avg, CP_EMA_ALPHA);
        self.m_ext_avg = ema(m_ext / nof_symbols as f32, self.m_ext_avg, CP_EMA_ALPHA);

        let cp = if self.m_norm_avg > self.m_ext_avg {
            CyclicPrefix::Normal
        } else if self.m_norm_avg < self.m_ext_avg {
            CyclicPrefix::Extended
        } else if r_norm > r_ext {
            CyclicPrefix::Normal
        } else {
            CyclicPrefix::Extended
        };
        trace!(
            "CP detection: M_norm={:.3} M_ext={:.3} -> {:?}",
            self.m_norm_avg,
            self.m_ext_avg,
            cp
        );
        cp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Consecutive OFDM-like symbols of pseudo-random data with the given CP
    fn ofdm_symbols(n: usize, cp: usize, count: usize, cfo: f32) -> Vec<Complex32> {
        let mut out = Vec::new();
        let mut state = 12345u32;
        for _ in 0..count {
            let useful: Vec<Complex32> = (0..n)
                .map(|_| {
                    state = state.wrapping_mul(1103515245).wrapping_add(12345);
                    let a = ((state >> 16) & 0x7fff) as f32 / 32768.0 - 0.5;
                    state = state.wrapping_mul(1103515245).wrapping_add(12345);
                    let b = ((state >> 16) & 0x7fff) as f32 / 32768.0 - 0.5;
                    Complex32::new(a, b)
                })
                .collect();
            out.extend_from_slice(&useful[n - cp..]);
            out.extend_from_slice(&useful);
        }
        out.iter()
            .enumerate()
            .map(|(t, v)| v * Complex32::from_polar(1.0, 2.0 * PI * cfo * t as f32 / n as f32))
            .collect()
    }

    #[test]
    fn test_cp_cfo_estimate() {
        let n = 128;
        for &cfo in &[0.0f32, 0.2, -0.35] {
            let input = ofdm_symbols(n, 9, 14, cfo);
            let mut est = CpCorrelator::new(n, input.len()).unwrap();
            let measured = est.estimate_cfo(&input, 9, 3).unwrap().unwrap();
            assert!((measured - cfo).abs() < 0.01, "cfo {} measured {}", cfo, measured);
        }
    }

    #[test]
    fn test_cp_cfo_half_subcarrier() {
        // Every CP product sits on the negative real axis
        let n = 128;
        let input = ofdm_symbols(n, 9, 14, 0.5);
        let mut est = CpCorrelator::new(n, input.len()).unwrap();
        let measured = est.estimate_cfo(&input, 9, 3).unwrap().unwrap();
        assert!((measured.abs() - 0.5).abs() < 1e-3, "measured {}", measured);
    }

    #[test]
    fn test_cp_cfo_short_window() {
        let mut est = CpCorrelator::new(128, 1000).unwrap();
        let input = vec![Complex32::new(1.0, 0.0); 200];
        assert_eq!(est.estimate_cfo(&input, 9, 3).unwrap(), None);
        assert!(est.estimate_cfo(&vec![Complex32::new(0.0, 0.0); 1001], 9, 1).is_err());
    }

    #[test]
    fn test_detect_normal_and_extended() {
        let n = 128;
        let normal = ofdm_symbols(n, 9, 6, 0.0);
        let mut detector = CpDetector::new();
        assert_eq!(detector.detect(&normal, normal.len(), n), CyclicPrefix::Normal);

        let extended = ofdm_symbols(n, 32, 6, 0.0);
        let mut detector = CpDetector::new();
        assert_eq!(detector.detect(&extended, extended.len(), n), CyclicPrefix::Extended);
    }

    #[test]
    fn test_detect_without_history_defaults_to_normal() {
        let mut detector = CpDetector::new();
        let input = vec![Complex32::new(1.0, 0.0); 100];
        assert_eq!(detector.detect(&input, 100, 128), CyclicPrefix::Normal);
    }
}
