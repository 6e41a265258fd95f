//! Downlink Resource Grid
//!
//! One subframe of resource elements according to 3GPP TS 36.211 Section
//! 6.2: rows are OFDM symbols in transmission order, columns are the
//! `nof_prb * 12` subcarriers from the lowest frequency upwards. Each row is
//! contiguous, so the element order is frequency-major within a symbol.

use crate::{alloc_cf, PhyError};
use common::types::{nof_re, CyclicPrefix, MAX_PRB, SYNC_SEQ_LEN};
use ndarray::{Array2, ArrayView1, ArrayViewMut1};
use num_complex::Complex32;

/// Reserved subcarriers on each side of the synchronization signals
pub const SYNC_GUARD_LEN: usize = 5;

/// Resource grid for one subframe
#[derive(Debug, Clone)]
pub struct ResourceGrid {
    /// 2D grid: [symbol, subcarrier]
    grid: Array2<Complex32>,
    /// Number of resource blocks
    nof_prb: u32,
    /// Cyclic prefix, fixes the number of symbols
    cp: CyclicPrefix,
}

impl ResourceGrid {
    /// Create an empty grid
    pub fn new(nof_prb: u32, cp: CyclicPrefix) -> Result<Self, PhyError> {
        if nof_prb == 0 || nof_prb > MAX_PRB {
            return Err(PhyError::InvalidConfiguration(format!(
                "invalid number of resource blocks {}",
                nof_prb
            )));
        }
        let shape = (cp.symbols_per_subframe(), nof_re(nof_prb));
        let data = alloc_cf(shape.0 * shape.1)?;
        let grid = Array2::from_shape_vec(shape, data)
            .map_err(|e| PhyError::ProcessingError(format!("resource grid shape: {}", e)))?;
        Ok(Self { grid, nof_prb, cp })
    }

    /// Number of resource blocks
    pub fn nof_prb(&self) -> u32 {
        self.nof_prb
    }

    /// Number of subcarriers per symbol
    pub fn nof_re(&self) -> usize {
        self.grid.ncols()
    }

    /// Number of OFDM symbols
    pub fn nof_symbols(&self) -> usize {
        self.grid.nrows()
    }

    pub fn cp(&self) -> CyclicPrefix {
        self.cp
    }

    /// Zero every resource element
    pub fn clear(&mut self) {
        self.grid.fill(Complex32::new(0.0, 0.0));
    }

    /// Resource element at symbol `l`, subcarrier `k`
    pub fn get(&self, l: usize, k: usize) -> Option<Complex32> {
        self.grid.get((l, k)).copied()
    }

    /// Write a resource element
    pub fn set(&mut self, l: usize, k: usize, value: Complex32) -> Result<(), PhyError> {
        let (nsymb, nre) = self.grid.dim();
        match self.grid.get_mut((l, k)) {
            Some(re) => {
                *re = value;
                Ok(())
            }
            None => Err(PhyError::InvalidConfiguration(format!(
                "RE ({}, {}) outside {}x{} grid",
                l, k, nsymb, nre
            ))),
        }
    }

    /// All subcarriers of symbol `l`
    pub fn symbol(&self, l: usize) -> ArrayView1<'_, Complex32> {
        self.grid.row(l)
    }

    pub fn symbol_mut(&mut self, l: usize) -> ArrayViewMut1<'_, Complex32> {
        self.grid.row_mut(l)
    }

    pub fn as_array(&self) -> &Array2<Complex32> {
        &self.grid
    }

    pub fn as_array_mut(&mut self) -> &mut Array2<Complex32> {
        &mut self.grid
    }

    /// Subcarrier carrying element `i` of a synchronization sequence
    pub fn sync_subcarrier(&self, i: usize) -> usize {
        self.nof_re() / 2 - SYNC_SEQ_LEN / 2 + i
    }

    /// Place a 62-long synchronization sequence around DC in symbol `l`
    pub fn map_sync(&mut self, l: usize, seq: &[Complex32]) -> Result<(), PhyError> {
        crate::check_len("sync sequence", SYNC_SEQ_LEN, seq.len())?;
        if self.nof_re() < SYNC_SEQ_LEN + 2 * SYNC_GUARD_LEN {
            return Err(PhyError::InvalidConfiguration(format!(
                "{} subcarriers cannot carry the synchronization signals",
                self.nof_re()
            )));
        }
        for (i, s) in seq.iter().enumerate() {
            let k = self.sync_subcarrier(i);
            self.set(l, k, *s)?;
        }
        Ok(())
    }

    /// Read the 62 synchronization subcarriers of symbol `l`
    pub fn extract_sync(&self, l: usize) -> [Complex32; SYNC_SEQ_LEN] {
        let mut out = [Complex32::new(0.0, 0.0); SYNC_SEQ_LEN];
        for (i, o) in out.iter_mut().enumerate() {
            *o = self.get(l, self.sync_subcarrier(i)).unwrap_or_default();
        }
        out
    }

    /// Reserved subcarriers on both sides of the synchronization sequence
    pub fn sync_guard_subcarriers(&self) -> impl Iterator<Item = usize> + '_ {
        let low = self.sync_subcarrier(0);
        let high = self.sync_subcarrier(SYNC_SEQ_LEN);
        (low - SYNC_GUARD_LEN..low).chain(high..high + SYNC_GUARD_LEN)
    }

    /// Energy of symbol `l`
    pub fn symbol_energy(&self, l: usize) -> f32 {
        self.grid.row(l).iter().map(|v| v.norm_sqr()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_dimensions() {
        let grid = ResourceGrid::new(6, CyclicPrefix::Normal).unwrap();
        assert_eq!(grid.nof_re(), 72);
        assert_eq!(grid.nof_symbols(), 14);
        let ext = ResourceGrid::new(25, CyclicPrefix::Extended).unwrap();
        assert_eq!(ext.as_array().dim(), (12, 300));
        assert!(ResourceGrid::new(0, CyclicPrefix::Normal).is_err());
        assert!(ResourceGrid::new(111, CyclicPrefix::Normal).is_err());
    }

    #[test]
    fn test_set_and_clear() {
        let mut grid = ResourceGrid::new(6, CyclicPrefix::Normal).unwrap();
        grid.set(3, 10, Complex32::new(1.0, -1.0)).unwrap();
        assert_eq!(grid.get(3, 10), Some(Complex32::new(1.0, -1.0)));
        assert_eq!(grid.symbol(3)[10], Complex32::new(1.0, -1.0));
        assert!((grid.symbol_energy(3) - 2.0).abs() < 1e-6);
        assert!(grid.set(14, 0, Complex32::new(1.0, 0.0)).is_err());
        assert!(grid.get(0, 72).is_none());
        grid.clear();
        assert_eq!(grid.symbol_energy(3), 0.0);
    }

    #[test]
    fn test_sync_mapping() {
        let mut grid = ResourceGrid::new(6, CyclicPrefix::Normal).unwrap();
        let seq: Vec<Complex32> = (0..62).map(|i| Complex32::new(i as f32 + 1.0, 0.0)).collect();
        grid.map_sync(6, &seq).unwrap();
        // 72 subcarriers: five reserved on each side of the 62
        assert_eq!(grid.get(6, 4), Some(Complex32::new(0.0, 0.0)));
        assert_eq!(grid.get(6, 5), Some(Complex32::new(1.0, 0.0)));
        assert_eq!(grid.get(6, 66), Some(Complex32::new(62.0, 0.0)));
        assert_eq!(grid.extract_sync(6)[..], seq[..]);

        let guards: Vec<usize> = grid.sync_guard_subcarriers().collect();
        assert_eq!(guards, vec![0, 1, 2, 3, 4, 67, 68, 69, 70, 71]);
        assert!(grid.map_sync(6, &seq[..10]).is_err());
    }
}
