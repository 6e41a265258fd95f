//! Downlink Receiver
//!
//! Chains synchronization, OFDM demodulation and channel estimation. The
//! demodulators and the estimator are configured for the cell the
//! synchronizer tracks and torn down when it is lost, so estimates only
//! exist for a resolved cell.

use crate::chest::{ChannelEstimator, ChestResult};
use crate::config::PhyConfig;
use crate::ofdm::OfdmDemodulator;
use crate::resource_grid::ResourceGrid;
use crate::ue_sync::{SyncStatus, UeSync};
use crate::PhyError;
use common::types::Cell;
use interfaces::SampleProvider;
use tracing::{debug, info};

/// Per-cell processing chain, rebuilt whenever the tracked cell changes
struct CellChain {
    cell: Cell,
    /// One demodulator per receive antenna
    demods: Vec<OfdmDemodulator>,
    /// One grid per receive antenna
    grids: Vec<ResourceGrid>,
    result: ChestResult,
    /// Whether `result` holds the estimate of the last delivered subframe
    valid: bool,
}

/// Synchronized downlink receiver with channel estimation
pub struct DownlinkReceiver {
    sync: UeSync,
    chest: ChannelEstimator,
    chain: Option<CellChain>,
    /// Feed the pilot CFO back to the synchronizer
    cfo_feedback: bool,
}

impl DownlinkReceiver {
    pub fn new(config: &PhyConfig) -> Result<Self, PhyError> {
        let sync = UeSync::new(config)?;
        let chest = ChannelEstimator::new(&config.chest, config.cell.nof_rx_antennas)?;
        Ok(Self {
            sync,
            chest,
            chain: None,
            cfo_feedback: config.chest.cfo_estimate && config.sync.cfo.ref_enable,
        })
    }

    /// Advance the synchronizer by one call and estimate the channel of the
    /// delivered subframe, if any.
    ///
    /// Returns `true` when [`DownlinkReceiver::estimate`] holds a fresh
    /// estimate.
    pub fn process(&mut self, provider: &mut dyn SampleProvider) -> Result<bool, PhyError> {
        let status = self.sync.run(provider)?;
        self.follow_cell()?;
        if let Some(chain) = self.chain.as_mut() {
            chain.valid = false;
        }
        if status != SyncStatus::SubframeReady {
            return Ok(false);
        }
        let Some(chain) = self.chain.as_mut() else {
            return Ok(false);
        };

        for (rx, (demod, grid)) in chain.demods.iter_mut().zip(chain.grids.iter_mut()).enumerate() {
            demod.demodulate(self.sync.subframe(rx), grid)?;
        }
        self.chest.estimate(&chain.grids, self.sync.sf_idx(), &mut chain.result)?;
        chain.valid = true;

        if self.cfo_feedback {
            self.sync.set_cfo_ref(chain.result.cfo_hz());
        }
        Ok(true)
    }

    /// Configure or tear down the processing chain after a state change
    fn follow_cell(&mut self) -> Result<(), PhyError> {
        let tracked = self.sync.cell().copied();
        if tracked == self.chain.as_ref().map(|c| c.cell) {
            return Ok(());
        }
        match tracked {
            Some(cell) => {
                let nof_rx = self.sync.nof_rx();
                let mut demods = Vec::with_capacity(nof_rx);
                let mut grids = Vec::with_capacity(nof_rx);
                for _ in 0..nof_rx {
                    demods.push(OfdmDemodulator::new(cell.nof_prb, cell.cp)?);
                    grids.push(ResourceGrid::new(cell.nof_prb, cell.cp)?);
                }
                self.chest.set_cell(&cell)?;
                self.chain = Some(CellChain {
                    cell,
                    demods,
                    grids,
                    result: ChestResult::new(&cell, nof_rx)?,
                    valid: false,
                });
                info!("Receiver configured for cell {}", cell.identity);
            }
            None => {
                self.chest.clear_cell();
                self.chain = None;
                debug!("Receiver released its cell");
            }
        }
        Ok(())
    }

    /// Estimate of the last delivered subframe
    pub fn estimate(&self) -> Option<&ChestResult> {
        self.chain.as_ref().filter(|c| c.valid).map(|c| &c.result)
    }

    /// Demodulated grids of the last delivered subframe, one per antenna
    pub fn grids(&self) -> Option<&[ResourceGrid]> {
        self.chain.as_ref().filter(|c| c.valid).map(|c| c.grids.as_slice())
    }

    /// Cell the receiver is configured for
    pub fn cell(&self) -> Option<&Cell> {
        self.chain.as_ref().map(|c| &c.cell)
    }

    pub fn sync(&self) -> &UeSync {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut UeSync {
        &mut self.sync
    }

    pub fn chest_mut(&mut self) -> &mut ChannelEstimator {
        &mut self.chest
    }
}
