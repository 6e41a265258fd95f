//! OFDM Modulation and Demodulation for the LTE downlink
//!
//! Subframe-level conversion between a [`ResourceGrid`] and time-domain
//! samples according to 3GPP TS 36.211 Section 6.12. The DC subcarrier is
//! left empty: the lower half of the grid maps to negative frequencies and
//! the upper half starts one bin above DC. Both directions are scaled by
//! `1/sqrt(N)` so a unit-power grid gives unit-power samples and back.

use crate::resource_grid::ResourceGrid;
use crate::{alloc_cf, check_len, PhyError};
use common::types::{sf_len, symbol_sz, CyclicPrefix};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::debug;

/// FFT bin carrying subcarrier `k` of a grid with `nof_re` subcarriers
pub fn subcarrier_to_bin(k: usize, nof_re: usize, fft_size: usize) -> usize {
    let half = nof_re / 2;
    if k < half {
        fft_size - half + k
    } else {
        k - half + 1
    }
}

/// Shared numerology of modulator and demodulator
#[derive(Debug, Clone, Copy)]
struct Layout {
    fft_size: usize,
    nof_prb: u32,
    cp: CyclicPrefix,
}

impl Layout {
    fn new(nof_prb: u32, cp: CyclicPrefix) -> Result<Self, PhyError> {
        let fft_size = symbol_sz(nof_prb).ok_or_else(|| {
            PhyError::InvalidConfiguration(format!("no FFT size for {} resource blocks", nof_prb))
        })?;
        Ok(Self { fft_size, nof_prb, cp })
    }

    fn check_grid(&self, grid: &ResourceGrid) -> Result<(), PhyError> {
        check_len("grid resource blocks", self.nof_prb as usize, grid.nof_prb() as usize)?;
        if grid.cp() != self.cp {
            return Err(PhyError::InvalidConfiguration(format!(
                "grid has {:?} CP, OFDM configured for {:?}",
                grid.cp(),
                self.cp
            )));
        }
        Ok(())
    }
}

/// OFDM modulator for one subframe
pub struct OfdmModulator {
    layout: Layout,
    /// Inverse FFT plan
    ifft: Arc<dyn Fft<f32>>,
    /// Working buffer for one symbol
    buf: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl OfdmModulator {
    /// Create a modulator for the given bandwidth and cyclic prefix
    pub fn new(nof_prb: u32, cp: CyclicPrefix) -> Result<Self, PhyError> {
        let layout = Layout::new(nof_prb, cp)?;
        let ifft = FftPlanner::new().plan_fft_inverse(layout.fft_size);
        let scratch_len = ifft.get_inplace_scratch_len();
        debug!("OFDM modulator: {} PRB, N={}, {:?} CP", nof_prb, layout.fft_size, cp);
        Ok(Self {
            layout,
            ifft,
            buf: alloc_cf(layout.fft_size)?,
            scratch: alloc_cf(scratch_len)?,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.layout.fft_size
    }

    /// Modulate a grid into `sf_len(N)` samples
    pub fn modulate(&mut self, grid: &ResourceGrid, output: &mut [Complex32]) -> Result<(), PhyError> {
        self.layout.check_grid(grid)?;
        let n = self.layout.fft_size;
        check_len("OFDM modulator output", sf_len(n), output.len())?;

        let nre = grid.nof_re();
        let norm = 1.0 / (n as f32).sqrt();
        let nsymb = self.layout.cp.symbols_per_slot();
        let mut pos = 0;
        for l in 0..grid.nof_symbols() {
            self.buf.fill(Complex32::new(0.0, 0.0));
            for (k, v) in grid.symbol(l).iter().enumerate() {
                self.buf[subcarrier_to_bin(k, nre, n)] = *v;
            }
            self.ifft.process_with_scratch(&mut self.buf, &mut self.scratch);

            let cp_len = self.layout.cp.cp_len(l % nsymb, n);
            let symbol = &mut output[pos..pos + cp_len + n];
            for (o, v) in symbol[..cp_len].iter_mut().zip(&self.buf[n - cp_len..]) {
                *o = *v * norm;
            }
            for (o, v) in symbol[cp_len..].iter_mut().zip(self.buf.iter()) {
                *o = *v * norm;
            }
            pos += cp_len + n;
        }
        Ok(())
    }
}

/// OFDM demodulator for one subframe
pub struct OfdmDemodulator {
    layout: Layout,
    /// Forward FFT plan
    fft: Arc<dyn Fft<f32>>,
    buf: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl OfdmDemodulator {
    /// Create a demodulator for the given bandwidth and cyclic prefix
    pub fn new(nof_prb: u32, cp: CyclicPrefix) -> Result<Self, PhyError> {
        let layout = Layout::new(nof_prb, cp)?;
        let fft = FftPlanner::new().plan_fft_forward(layout.fft_size);
        let scratch_len = fft.get_inplace_scratch_len();
        debug!("OFDM demodulator: {} PRB, N={}, {:?} CP", nof_prb, layout.fft_size, cp);
        Ok(Self {
            layout,
            fft,
            buf: alloc_cf(layout.fft_size)?,
            scratch: alloc_cf(scratch_len)?,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.layout.fft_size
    }

    /// Strip the cyclic prefixes of one subframe and transform every symbol
    pub fn demodulate(&mut self, input: &[Complex32], grid: &mut ResourceGrid) -> Result<(), PhyError> {
        self.layout.check_grid(grid)?;
        let n = self.layout.fft_size;
        check_len("OFDM demodulator input", sf_len(n), input.len())?;

        let nre = grid.nof_re();
        let norm = 1.0 / (n as f32).sqrt();
        for l in 0..grid.nof_symbols() {
            let start = self.layout.cp.useful_start(l, n);
            self.buf.copy_from_slice(&input[start..start + n]);
            self.fft.process_with_scratch(&mut self.buf, &mut self.scratch);

            let mut row = grid.symbol_mut(l);
            for (k, v) in row.iter_mut().enumerate() {
                *v = self.buf[subcarrier_to_bin(k, nre, n)] * norm;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::pss::sync_seq_bin;

    #[test]
    fn test_bin_mapping_skips_dc() {
        assert_eq!(subcarrier_to_bin(0, 72, 128), 92);
        assert_eq!(subcarrier_to_bin(35, 72, 128), 127);
        assert_eq!(subcarrier_to_bin(36, 72, 128), 1);
        assert_eq!(subcarrier_to_bin(71, 72, 128), 36);
        // The synchronization subcarriers land where the PSS replica expects them
        for i in 0..62 {
            assert_eq!(subcarrier_to_bin(5 + i, 72, 128), sync_seq_bin(i, 128));
        }
    }

    #[test]
    fn test_modulate_demodulate() {
        let mut grid = ResourceGrid::new(6, CyclicPrefix::Normal).unwrap();
        for l in 0..grid.nof_symbols() {
            for k in 0..grid.nof_re() {
                let phase = (l * 31 + k * 7) as f32 * 0.37;
                grid.set(l, k, Complex32::from_polar(1.0, phase)).unwrap();
            }
        }
        let mut tx = OfdmModulator::new(6, CyclicPrefix::Normal).unwrap();
        let mut rx = OfdmDemodulator::new(6, CyclicPrefix::Normal).unwrap();
        let mut samples = vec![Complex32::new(0.0, 0.0); 1920];
        tx.modulate(&grid, &mut samples).unwrap();

        // Cyclic prefix of symbol 1 repeats the tail of its useful part
        let start = CyclicPrefix::Normal.symbol_start(1, 128);
        for i in 0..9 {
            assert!((samples[start + i] - samples[start + 128 + i]).norm() < 1e-5);
        }

        let mut out = ResourceGrid::new(6, CyclicPrefix::Normal).unwrap();
        rx.demodulate(&samples, &mut out).unwrap();
        for (a, b) in grid.as_array().iter().zip(out.as_array().iter()) {
            assert!((a - b).norm() < 1e-4);
        }
    }

    #[test]
    fn test_size_checks() {
        let grid = ResourceGrid::new(6, CyclicPrefix::Extended).unwrap();
        let mut tx = OfdmModulator::new(6, CyclicPrefix::Normal).unwrap();
        let mut samples = vec![Complex32::new(0.0, 0.0); 1920];
        assert!(tx.modulate(&grid, &mut samples).is_err());

        let grid = ResourceGrid::new(6, CyclicPrefix::Normal).unwrap();
        assert!(tx.modulate(&grid, &mut samples[..100]).is_err());
        assert!(OfdmModulator::new(0, CyclicPrefix::Normal).is_err());
    }
}
