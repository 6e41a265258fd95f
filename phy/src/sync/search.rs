//! Cell search over the three N_id_2 hypotheses
//!
//! Each hypothesis owns a complete [`Synchronizer`]; the three run
//! concurrently on the same read-only window and share no mutable state.

use super::{SyncFind, Synchronizer};
use crate::config::PhyConfig;
use crate::PhyError;
use common::types::{CellIdentity, CyclicPrefix, DuplexMode};
use num_complex::Complex32;
use rayon::prelude::*;
use tracing::{debug, info};

/// Cell found by a search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSearchResult {
    /// Resolved physical cell identity
    pub identity: CellIdentity,
    /// Index of the first useful sample of the PSS symbol in the window
    pub peak_offset: usize,
    /// Correlation value at the peak
    pub peak_value: f32,
    /// Threshold metric at the peak
    pub peak_metric: f32,
    /// Estimated CFO in Hz
    pub cfo_hz: f32,
    /// Subframe carrying the detected PSS
    pub sf_idx: u32,
    /// Duplex mode of the SSS position that resolved
    pub duplex: DuplexMode,
    /// Detected cyclic prefix
    pub cp: CyclicPrefix,
    /// Normalized SSS correlation score
    pub sss_score: f32,
}

/// Outcome of [`CellSearcher::search`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchOutcome {
    /// A cell was detected and its identity resolved
    Found(CellSearchResult),
    /// A PSS was detected too early in the window to read its SSS
    NoSpace {
        /// Sector identity of the strongest such detection
        n_id_2: u8,
        /// PSS position in the window
        pss_start: usize,
    },
    /// No cell in this window
    NotFound,
}

/// Per-hypothesis result of one search call
#[derive(Debug, Clone, Copy)]
struct Hypothesis {
    find: SyncFind,
    peak_value: f32,
}

/// Searches all N_id_2 values (or only a known one) in parallel
pub struct CellSearcher {
    /// One synchronizer per searched N_id_2
    synchronizers: Vec<Synchronizer>,
    /// Window length
    frame_len: usize,
}

impl CellSearcher {
    /// Create a searcher for windows of `frame_len` samples
    pub fn new(frame_len: usize, config: &PhyConfig) -> Result<Self, PhyError> {
        let known = config.cell_identity()?;
        let sectors: Vec<u8> = match known {
            Some(identity) => vec![identity.n_id_2],
            None => (0..=CellIdentity::MAX_N_ID_2).collect(),
        };

        let mut synchronizers = Vec::with_capacity(sectors.len());
        for n_id_2 in sectors {
            let mut sync = Synchronizer::new(n_id_2, frame_len, &config.sync.find, config)?;
            sync.set_known_n_id_1(known.map(|id| id.n_id_1));
            synchronizers.push(sync);
        }
        info!(
            "Cell searcher: {} hypotheses, window {} samples",
            synchronizers.len(),
            frame_len
        );
        Ok(Self {
            synchronizers,
            frame_len,
        })
    }

    /// Window length
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Search a window for the strongest cell
    pub fn search(&mut self, input: &[Complex32]) -> Result<SearchOutcome, PhyError> {
        let hypotheses = self
            .synchronizers
            .par_iter_mut()
            .map(|sync| {
                let find = sync.find(input, 0)?;
                Ok(Hypothesis {
                    find,
                    peak_value: sync.peak_value(),
                })
            })
            .collect::<Result<Vec<_>, PhyError>>()?;

        let mut best: Option<usize> = None;
        let mut best_no_space: Option<(usize, usize)> = None;
        for (i, hyp) in hypotheses.iter().enumerate() {
            match hyp.find {
                SyncFind::Found { .. } if self.synchronizers[i].sss_detected() => {
                    if best.map_or(true, |b| hyp.peak_value > hypotheses[b].peak_value) {
                        best = Some(i);
                    }
                }
                SyncFind::FoundNoSpace { pss_start } => {
                    if best_no_space.map_or(true, |(b, _)| hyp.peak_value > hypotheses[b].peak_value) {
                        best_no_space = Some((i, pss_start));
                    }
                }
                _ => {}
            }
        }

        if let Some(i) = best {
            let SyncFind::Found { pss_start } = hypotheses[i].find else {
                return Ok(SearchOutcome::NotFound);
            };
            let sync = &self.synchronizers[i];
            let (Some(identity), Some(sss)) = (sync.cell_identity(), sync.sss_detection()) else {
                return Ok(SearchOutcome::NotFound);
            };
            let result = CellSearchResult {
                identity,
                peak_offset: pss_start,
                peak_value: hypotheses[i].peak_value,
                peak_metric: sync.last_peak().map_or(0.0, |p| p.metric),
                cfo_hz: sync.cfo_hz(),
                sf_idx: sync.sf_idx(),
                duplex: sync.duplex(),
                cp: sync.cp(),
                sss_score: sss.score,
            };
            debug!(
                "Cell {} at {} (sf {}), CFO {:.1} Hz",
                identity, pss_start, result.sf_idx, result.cfo_hz
            );
            self.share_cfo(i);
            return Ok(SearchOutcome::Found(result));
        }

        if let Some((i, pss_start)) = best_no_space {
            return Ok(SearchOutcome::NoSpace {
                n_id_2: self.synchronizers[i].n_id_2(),
                pss_start,
            });
        }
        Ok(SearchOutcome::NotFound)
    }

    /// Seed the other hypotheses' CFO estimates from the winner
    fn share_cfo(&mut self, winner: usize) {
        let (head, tail) = self.synchronizers.split_at_mut(winner);
        let Some((source, rest)) = tail.split_first_mut() else {
            return;
        };
        for sync in head.iter_mut().chain(rest.iter_mut()) {
            sync.copy_cfo_state(source);
        }
    }

    /// Restart every hypothesis' CFO estimate from `init_hz`
    pub fn reset_cfo(&mut self, init_hz: f32) {
        for sync in self.synchronizers.iter_mut() {
            sync.reset_cfo(init_hz);
        }
    }

    /// Clear correlation and CP length averages
    pub fn reset(&mut self) {
        for sync in self.synchronizers.iter_mut() {
            sync.reset();
        }
    }

    /// Synchronizers, one per searched N_id_2
    pub fn synchronizers(&self) -> &[Synchronizer] {
        &self.synchronizers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::DownlinkGenerator;
    use common::types::{sf_len, AntennaPorts, Cell};

    fn window(cell: Cell, first_sf: u32) -> Vec<Complex32> {
        let mut gen = DownlinkGenerator::new(cell).unwrap();
        let mut out = Vec::new();
        for k in 0..5 {
            out.extend(gen.subframe((first_sf + k) % 10).unwrap());
        }
        out
    }

    fn config() -> PhyConfig {
        let mut config = PhyConfig::default();
        config.sync.find.cfo_cp = false;
        config
    }

    #[test]
    fn test_search_each_sector() {
        for n_id_2 in 0..3 {
            let cell = Cell {
                identity: CellIdentity::new(150, n_id_2).unwrap(),
                nof_prb: 6,
                nof_ports: AntennaPorts::One,
                cp: CyclicPrefix::Normal,
                duplex: DuplexMode::Fdd,
            };
            let input = window(cell, 1);
            let mut searcher = CellSearcher::new(input.len(), &config()).unwrap();
            let SearchOutcome::Found(result) = searcher.search(&input).unwrap() else {
                panic!("cell {} not found", cell.identity);
            };
            assert_eq!(result.identity, cell.identity);
            assert_eq!(result.sf_idx, 5);
            assert_eq!(
                result.peak_offset,
                4 * sf_len(128) + CyclicPrefix::Normal.useful_start(6, 128)
            );
        }
    }

    #[test]
    fn test_known_cell_restricts_search() {
        let cell = Cell {
            identity: CellIdentity::new(20, 1).unwrap(),
            nof_prb: 6,
            nof_ports: AntennaPorts::Two,
            cp: CyclicPrefix::Normal,
            duplex: DuplexMode::Fdd,
        };
        let input = window(cell, 0);
        let mut config = config();
        config.cell.cell_id = Some(cell.id());
        let mut searcher = CellSearcher::new(input.len(), &config).unwrap();
        assert_eq!(searcher.synchronizers().len(), 1);
        let SearchOutcome::Found(result) = searcher.search(&input).unwrap() else {
            panic!("known cell not found");
        };
        assert_eq!(result.identity, cell.identity);
        assert_eq!(result.sf_idx, 0);
    }

    #[test]
    fn test_silence() {
        let input = vec![Complex32::new(0.0, 0.0); 9600];
        let mut searcher = CellSearcher::new(9600, &config()).unwrap();
        assert_eq!(searcher.search(&input).unwrap(), SearchOutcome::NotFound);
    }
}
