//! Cell-Specific Reference Signals
//!
//! Pilot positions and values of the downlink CRS according to 3GPP TS
//! 36.211 Section 6.10.1. Ports 0 and 1 share the symbols `0` and
//! `nsymb - 3` of each slot, ports 2 and 3 use symbol 1. Within a symbol the
//! pilots sit every sixth subcarrier from an offset that depends on the port,
//! the pilot symbol and `N_id_cell mod 6`. Ports in the same pair carry the
//! same values.
//!
//! Pilots are ordered frequency-major within a pilot symbol, then by pilot
//! symbol in transmission order.

use crate::resource_grid::ResourceGrid;
use crate::sequence::GoldSequence;
use crate::{alloc_cf, PhyError};
use common::types::{Cell, MAX_PRB, NOF_SF_X_FRAME};
use num_complex::Complex32;
use std::f32::consts::FRAC_1_SQRT_2;
use tracing::debug;

/// Highest supported CRS antenna port
pub const MAX_PORTS: usize = 4;

/// Pilots per resource block and pilot symbol
pub const REFS_PER_PRB: usize = 2;

/// Pilot symbols per subframe for `port`
pub fn nof_symbols(port: usize) -> usize {
    if port < 2 {
        4
    } else {
        2
    }
}

/// Subframe symbol index of pilot symbol `m` of `port`
pub fn symbol_index(port: usize, m: usize, nsymb: usize) -> usize {
    if port < 2 {
        match m {
            0 => 0,
            1 => nsymb - 3,
            2 => nsymb,
            _ => 2 * nsymb - 3,
        }
    } else {
        1 + m * nsymb
    }
}

/// Frequency offset `v` of pilot symbol `m` of `port`
pub fn v(port: usize, m: usize) -> usize {
    match port {
        0 => {
            if m % 2 == 0 {
                0
            } else {
                3
            }
        }
        1 => {
            if m % 2 == 0 {
                3
            } else {
                0
            }
        }
        2 => {
            if m == 0 {
                0
            } else {
                3
            }
        }
        _ => {
            if m == 0 {
                3
            } else {
                0
            }
        }
    }
}

/// Reference signal descriptor for one cell
#[derive(Debug, Clone)]
pub struct CellRefSignal {
    cell: Cell,
    /// Pilots per port pair, subframe, pilot symbol and pilot index
    pilots: [Vec<Complex32>; 2],
}

impl CellRefSignal {
    /// Generate the pilots of every subframe of a radio frame
    pub fn new(cell: &Cell) -> Result<Self, PhyError> {
        if cell.nof_prb == 0 || cell.nof_prb > MAX_PRB {
            return Err(PhyError::InvalidConfiguration(format!(
                "invalid number of resource blocks {}",
                cell.nof_prb
            )));
        }
        let id = cell.id() as u32;
        let n_cp = cell.cp.n_cp();
        let nsymb = cell.cp.symbols_per_slot();
        let nref = REFS_PER_PRB * cell.nof_prb as usize;
        let skip = 2 * (MAX_PRB - cell.nof_prb) as usize;

        let mut pilots = [
            alloc_cf(NOF_SF_X_FRAME as usize * nof_symbols(0) * nref)?,
            alloc_cf(NOF_SF_X_FRAME as usize * nof_symbols(2) * nref)?,
        ];
        for (pair, table) in pilots.iter_mut().enumerate() {
            let port = 2 * pair;
            let per_sf = nof_symbols(port);
            for sf in 0..NOF_SF_X_FRAME as usize {
                for m in 0..per_sf {
                    let l = symbol_index(port, m, nsymb);
                    let ns = (2 * sf + l / nsymb) as u32;
                    let lp = (l % nsymb) as u32;
                    let c_init = 1024 * (7 * (ns + 1) + lp + 1) * (2 * id + 1) + 2 * id + n_cp;

                    // m' = m + N_RB^max - N_RB
                    let mut seq = GoldSequence::new(c_init);
                    seq.skip(skip);
                    let base = (sf * per_sf + m) * nref;
                    for p in table[base..base + nref].iter_mut() {
                        *p = seq.next_qpsk(FRAC_1_SQRT_2);
                    }
                }
            }
        }
        debug!("CRS generated for cell {} ({} PRB)", cell.identity, cell.nof_prb);
        Ok(Self {
            cell: *cell,
            pilots,
        })
    }

    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    /// Pilots per pilot symbol
    pub fn nof_refs(&self) -> usize {
        REFS_PER_PRB * self.cell.nof_prb as usize
    }

    /// Pilots per subframe for `port`
    pub fn nof_refs_sf(&self, port: usize) -> usize {
        self.nof_refs() * nof_symbols(port)
    }

    /// Subframe symbol of pilot symbol `m`
    pub fn symbol(&self, port: usize, m: usize) -> usize {
        symbol_index(port, m, self.cell.cp.symbols_per_slot())
    }

    /// Subcarrier of the first pilot of pilot symbol `m`
    pub fn first_subcarrier(&self, port: usize, m: usize) -> usize {
        (v(port, m) + self.cell.id() as usize % 6) % 6
    }

    /// Subcarrier of pilot `i` of pilot symbol `m`
    pub fn subcarrier(&self, port: usize, m: usize, i: usize) -> usize {
        self.first_subcarrier(port, m) + 6 * i
    }

    /// Known pilot values of one subframe
    pub fn pilots(&self, port: usize, sf_idx: u32) -> &[Complex32] {
        let len = self.nof_refs_sf(port);
        let start = (sf_idx % NOF_SF_X_FRAME) as usize * len;
        &self.pilots[port / 2][start..start + len]
    }

    fn check_port(&self, port: usize) -> Result<(), PhyError> {
        if port >= self.cell.nof_ports.count() {
            return Err(PhyError::InvalidConfiguration(format!(
                "port {} not configured ({} ports)",
                port,
                self.cell.nof_ports.count()
            )));
        }
        Ok(())
    }

    fn check_grid(&self, grid: &ResourceGrid) -> Result<(), PhyError> {
        if grid.nof_prb() != self.cell.nof_prb || grid.cp() != self.cell.cp {
            return Err(PhyError::InvalidConfiguration(format!(
                "grid of {} PRB / {:?} CP does not match cell with {} PRB / {:?} CP",
                grid.nof_prb(),
                grid.cp(),
                self.cell.nof_prb,
                self.cell.cp
            )));
        }
        Ok(())
    }

    /// Write the pilots of `port` into a subframe grid
    pub fn put_sf(&self, port: usize, sf_idx: u32, grid: &mut ResourceGrid) -> Result<(), PhyError> {
        self.check_port(port)?;
        self.check_grid(grid)?;
        let pilots = self.pilots(port, sf_idx);
        let nref = self.nof_refs();
        for m in 0..nof_symbols(port) {
            let l = self.symbol(port, m);
            for i in 0..nref {
                grid.set(l, self.subcarrier(port, m, i), pilots[m * nref + i])?;
            }
        }
        Ok(())
    }

    /// Read the received pilots of `port` from a subframe grid
    pub fn get_sf(&self, port: usize, grid: &ResourceGrid, out: &mut [Complex32]) -> Result<(), PhyError> {
        self.check_port(port)?;
        self.check_grid(grid)?;
        crate::check_len("CRS pilots", self.nof_refs_sf(port), out.len())?;
        let nref = self.nof_refs();
        for m in 0..nof_symbols(port) {
            let row = grid.symbol(self.symbol(port, m));
            for i in 0..nref {
                out[m * nref + i] = row[self.subcarrier(port, m, i)];
            }
        }
        Ok(())
    }
}
