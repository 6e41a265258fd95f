//! Downlink Signal Generator
//!
//! Builds the time-domain signal of a cell carrying only the
//! synchronization signals and the cell-specific reference signals, for
//! loopback operation and for exercising the receiver without a radio.

use crate::chest::refsignal::CellRefSignal;
use crate::ofdm::OfdmModulator;
use crate::resource_grid::ResourceGrid;
use crate::sync::pss::generate_pss;
use crate::sync::sss::SssTables;
use crate::{alloc_cf, PhyError};
use common::types::{sf_len, Cell, SYNC_SEQ_LEN};
use num_complex::Complex32;
use tracing::{debug, trace};

/// Subframe generator for one cell
pub struct DownlinkGenerator {
    cell: Cell,
    /// Frequency-domain subframe
    grid: ResourceGrid,
    modulator: OfdmModulator,
    crs: CellRefSignal,
    /// PSS of the cell's N_id_2
    pss: [Complex32; SYNC_SEQ_LEN],
    sss_tables: SssTables,
}

impl DownlinkGenerator {
    /// Create a generator for `cell`
    pub fn new(cell: Cell) -> Result<Self, PhyError> {
        let grid = ResourceGrid::new(cell.nof_prb, cell.cp)?;
        let modulator = OfdmModulator::new(cell.nof_prb, cell.cp)?;
        let crs = CellRefSignal::new(&cell)?;
        let pss = generate_pss(cell.identity.n_id_2)?;
        debug!(
            "Downlink generator for cell {}: {} PRB, {} ports, {:?}",
            cell.identity,
            cell.nof_prb,
            cell.nof_ports.count(),
            cell.duplex
        );
        Ok(Self {
            cell,
            grid,
            modulator,
            crs,
            pss,
            sss_tables: SssTables::new(),
        })
    }

    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    /// Frequency-domain grid of the last generated subframe
    pub fn grid(&self) -> &ResourceGrid {
        &self.grid
    }

    /// Fill the grid of subframe `sf_idx` without modulating it
    pub fn map_subframe(&mut self, sf_idx: u32) -> Result<&ResourceGrid, PhyError> {
        let sf_idx = sf_idx % 10;
        self.grid.clear();
        for port in 0..self.cell.nof_ports.count() {
            self.crs.put_sf(port, sf_idx, &mut self.grid)?;
        }

        let duplex = self.cell.duplex;
        if duplex.is_pss_subframe(sf_idx) {
            self.grid.map_sync(duplex.pss_symbol(self.cell.cp), &self.pss)?;
        }
        if sf_idx == 0 || sf_idx == 5 {
            let d = self.sss_tables.generate(self.cell.identity, sf_idx)?;
            let mut sss = [Complex32::new(0.0, 0.0); SYNC_SEQ_LEN];
            for (s, v) in sss.iter_mut().zip(d.iter()) {
                *s = Complex32::new(*v, 0.0);
            }
            self.grid.map_sync(duplex.sss_symbol(self.cell.cp), &sss)?;
        }
        trace!("Mapped subframe {}", sf_idx);
        Ok(&self.grid)
    }

    /// Time-domain samples of subframe `sf_idx`
    pub fn subframe(&mut self, sf_idx: u32) -> Result<Vec<Complex32>, PhyError> {
        self.map_subframe(sf_idx)?;
        let mut out = alloc_cf(sf_len(self.modulator.fft_size()))?;
        self.modulator.modulate(&self.grid, &mut out)?;
        Ok(out)
    }

    /// Consecutive subframes starting at `first_sf`
    pub fn subframes(&mut self, first_sf: u32, count: usize) -> Result<Vec<Complex32>, PhyError> {
        let mut out = Vec::with_capacity(count * sf_len(self.modulator.fft_size()));
        for k in 0..count as u32 {
            out.extend(self.subframe((first_sf + k) % 10)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ofdm::OfdmDemodulator;
    use crate::sync::pss::pss_time_reference;
    use common::types::{AntennaPorts, CellIdentity, CyclicPrefix, DuplexMode};

    fn cell(duplex: DuplexMode) -> Cell {
        Cell {
            identity: CellIdentity::new(12, 2).unwrap(),
            nof_prb: 6,
            nof_ports: AntennaPorts::Two,
            cp: CyclicPrefix::Normal,
            duplex,
        }
    }

    #[test]
    fn test_pss_matches_reference() {
        let mut gen = DownlinkGenerator::new(cell(DuplexMode::Fdd)).unwrap();
        let samples = gen.subframe(5).unwrap();
        assert_eq!(samples.len(), 1920);
        let reference = pss_time_reference(2, 128, 0).unwrap();
        let start = CyclicPrefix::Normal.useful_start(6, 128);
        for (s, r) in samples[start..start + 128].iter().zip(reference.iter()) {
            assert!((s - r).norm() < 1e-4);
        }
    }

    #[test]
    fn test_sync_placement() {
        let mut gen = DownlinkGenerator::new(cell(DuplexMode::Tdd)).unwrap();
        let grid = gen.map_subframe(6).unwrap();
        assert!(grid.symbol_energy(2) > 61.0);
        assert_eq!(grid.symbol_energy(13), 0.0);

        let grid = gen.map_subframe(0).unwrap();
        assert_eq!(grid.symbol_energy(2), 0.0);
        assert!((grid.symbol_energy(13) - 62.0).abs() < 1e-4);

        // Subframe 3 only carries reference signals
        let grid = gen.map_subframe(3).unwrap();
        assert!((grid.symbol_energy(0) - 24.0).abs() < 1e-4);
        assert_eq!(grid.symbol_energy(6), 0.0);
    }

    #[test]
    fn test_demodulated_loopback() {
        let mut gen = DownlinkGenerator::new(cell(DuplexMode::Fdd)).unwrap();
        let samples = gen.subframe(0).unwrap();
        let mut grid = ResourceGrid::new(6, CyclicPrefix::Normal).unwrap();
        OfdmDemodulator::new(6, CyclicPrefix::Normal)
            .unwrap()
            .demodulate(&samples, &mut grid)
            .unwrap();
        for (a, b) in grid.as_array().iter().zip(gen.grid().as_array().iter()) {
            assert!((a - b).norm() < 1e-4);
        }
        assert_eq!(gen.subframes(8, 3).unwrap().len(), 3 * 1920);
    }
}
