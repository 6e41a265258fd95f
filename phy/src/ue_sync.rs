//! UE Synchronization State Machine
//!
//! Pulls samples from a [`SampleProvider`] and delivers time- and
//! frequency-aligned subframes. While SEARCHING, windows of several
//! subframes are handed to the [`CellSearcher`]; a cell seen in enough
//! consecutive windows is frozen and the stream is realigned to its next
//! subframe boundary. While TRACKING, one subframe is read per call and the
//! PSS is followed in a narrow window to steer timing and frequency.

use crate::agc::Agc;
use crate::config::PhyConfig;
use crate::sync::cfo::CfoCorrector;
use crate::sync::{CellSearchResult, CellSearcher, SearchOutcome, SyncFind, Synchronizer};
use crate::PhyError;
use common::types::{sf_len, AntennaPorts, Cell, CellIdentity, NOF_SFN, NOF_SF_X_FRAME, SUBCARRIER_SPACING_HZ};
use common::utils::ema;
use interfaces::{AntennaBuffers, SampleProvider};
use num_complex::Complex32;
use tracing::{debug, info, trace, warn};

/// Interval between PSS occurrences in seconds
const PSS_PERIOD_S: f32 = 5e-3;

/// Synchronization state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Looking for a cell
    Searching,
    /// Following a frozen cell subframe by subframe
    Tracking,
}

/// Outcome of [`UeSync::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// No aligned subframe this call
    NotReady,
    /// An aligned subframe is available through [`UeSync::subframe`]
    SubframeReady,
}

/// Sample offset loop state
#[derive(Debug, Clone, Copy, Default)]
struct SampleOffsetLoop {
    /// Averaged PSS offset in samples
    mean: f32,
    /// Offset measured on the last tracked PSS
    last: i32,
    /// Tracked PSS since the last correction
    count: u32,
}

/// Search/track state machine over one sample stream
pub struct UeSync {
    state: SyncState,
    fft_size: usize,
    sf_len: usize,
    /// Samples per search window
    search_len: usize,
    nof_prb: u32,
    nof_ports: AntennaPorts,
    /// Consecutive detections needed to start tracking
    min_valid_frames: u32,
    /// Consecutive PSS misses before tracking is abandoned
    max_lost_frames: u32,
    /// PSS candidates examined around the expected position
    track_len: usize,
    sfo_correct_period: u32,
    sfo_ema: f32,
    pss_loop_bw: f32,
    pss_min_hz: f32,
    pss_stable_count: u32,
    ref_enable: bool,
    ref_loop_bw: f32,
    ref_max_hz: f32,
    searcher: CellSearcher,
    /// Narrow-window synchronizer used while tracking
    strack: Synchronizer,
    buffers: AntennaBuffers,
    corrector: CfoCorrector,
    agc: Option<Agc>,
    agc_period: u32,
    agc_count: u32,
    agc_ready: bool,
    /// Frozen cell while tracking
    cell: Option<Cell>,
    /// Identity seen in the current run of valid windows
    candidate: Option<CellIdentity>,
    valid_count: u32,
    lost_count: u32,
    /// Samples to drop before the next read
    discard: usize,
    /// Samples at the end of the last subframe that belong to the next one
    carry: usize,
    /// Subframe delivered by the last tracking call
    sf_idx: u32,
    sfn: u32,
    next_sf_idx: u32,
    next_sfn: u32,
    /// CFO removed from tracked subframes, in Hz
    cfo_current_hz: f32,
    /// Consecutive tracked PSS with a settled residual
    pss_stable: u32,
    sfo: SampleOffsetLoop,
    peak_value: f32,
    /// Stream position of the first sample of the last delivered block
    timestamp: u64,
    last_search: Option<CellSearchResult>,
}

impl UeSync {
    /// Create a state machine in SEARCHING
    pub fn new(config: &PhyConfig) -> Result<Self, PhyError> {
        config.validate()?;
        let fft_size = config.fft_size()?;
        let sf_len = sf_len(fft_size);
        let sync = &config.sync;
        let search_len = sync.search_subframes * sf_len;

        let searcher = CellSearcher::new(search_len, config)?;
        let mut strack = Synchronizer::new(0, sync.track_len + fft_size - 1, &sync.track, config)?;
        strack.set_sss_enable(false);

        let buffers = AntennaBuffers::new(config.cell.nof_rx_antennas, search_len + sf_len)?;
        let corrector = CfoCorrector::new(sf_len)?;
        let agc = config.agc.enable.then(|| Agc::new(&config.agc));

        let mut ue_sync = Self {
            state: SyncState::Searching,
            fft_size,
            sf_len,
            search_len,
            nof_prb: config.cell.nof_prb,
            nof_ports: config.cell.nof_ports,
            min_valid_frames: sync.min_valid_frames,
            max_lost_frames: sync.max_lost_frames,
            track_len: sync.track_len,
            sfo_correct_period: sync.sfo_correct_period,
            sfo_ema: sync.sfo_ema,
            pss_loop_bw: sync.cfo.pss_loop_bw,
            pss_min_hz: sync.cfo.pss_min_hz,
            pss_stable_count: sync.cfo.pss_stable_count,
            ref_enable: sync.cfo.ref_enable,
            ref_loop_bw: sync.cfo.ref_loop_bw,
            ref_max_hz: sync.cfo.ref_max_hz,
            searcher,
            strack,
            buffers,
            corrector,
            agc,
            agc_period: config.agc.period.max(1),
            agc_count: 0,
            agc_ready: false,
            cell: None,
            candidate: None,
            valid_count: 0,
            lost_count: 0,
            discard: 0,
            carry: 0,
            sf_idx: 0,
            sfn: 0,
            next_sf_idx: 0,
            next_sfn: 0,
            cfo_current_hz: sync.cfo.initial_hz,
            pss_stable: 0,
            sfo: SampleOffsetLoop::default(),
            peak_value: 0.0,
            timestamp: 0,
            last_search: None,
        };
        ue_sync.searcher.reset_cfo(sync.cfo.initial_hz);

        info!(
            "UE sync: {} PRB, FFT {}, search window {} samples, track window {} candidates",
            ue_sync.nof_prb, fft_size, search_len, ue_sync.track_len
        );
        Ok(ue_sync)
    }

    /// Process the next block of samples
    ///
    /// Reads one search window while SEARCHING and one subframe while
    /// TRACKING. Provider failures are returned as errors; losing the cell
    /// is not an error and shows up as a state change.
    pub fn run(&mut self, provider: &mut dyn SampleProvider) -> Result<SyncStatus, PhyError> {
        if provider.nof_channels() != self.buffers.nof_channels() {
            return Err(PhyError::InvalidConfiguration(format!(
                "provider delivers {} channels, receiver expects {}",
                provider.nof_channels(),
                self.buffers.nof_channels()
            )));
        }
        self.init_agc(provider)?;
        self.skip(provider)?;

        match self.state {
            SyncState::Searching => self.run_search(provider),
            SyncState::Tracking => self.run_track(provider),
        }
    }

    fn init_agc(&mut self, provider: &mut dyn SampleProvider) -> Result<(), PhyError> {
        if self.agc_ready {
            return Ok(());
        }
        if let Some(agc) = self.agc.as_mut() {
            match provider.gain_control() {
                Some(control) => agc.init(control)?,
                None => warn!("AGC enabled but the sample provider has no gain control"),
            }
        }
        self.agc_ready = true;
        Ok(())
    }

    fn update_agc(&mut self, provider: &mut dyn SampleProvider, len: usize) -> Result<(), PhyError> {
        let Some(agc) = self.agc.as_mut() else {
            return Ok(());
        };
        let Some(control) = provider.gain_control() else {
            return Ok(());
        };
        agc.update(&self.buffers.channel(0)[..len], control)
    }

    /// Drop pending samples ahead of the next read
    fn skip(&mut self, provider: &mut dyn SampleProvider) -> Result<(), PhyError> {
        if self.discard > 0 {
            trace!("Discarding {} samples", self.discard);
        }
        while self.discard > 0 {
            let n = self.discard.min(self.buffers.capacity());
            provider.recv(&mut self.buffers, 0, n)?;
            self.discard -= n;
        }
        Ok(())
    }

    fn run_search(&mut self, provider: &mut dyn SampleProvider) -> Result<SyncStatus, PhyError> {
        let rx = provider.recv(&mut self.buffers, 0, self.search_len)?;
        self.timestamp = rx.timestamp;
        self.update_agc(provider, self.search_len)?;

        let outcome = self.searcher.search(&self.buffers.channel(0)[..self.search_len])?;
        match outcome {
            SearchOutcome::Found(result) => {
                self.peak_value = result.peak_value;
                self.last_search = Some(result);
                if self.candidate == Some(result.identity) {
                    self.valid_count += 1;
                } else {
                    self.candidate = Some(result.identity);
                    self.valid_count = 1;
                }
                debug!(
                    "SEARCH: cell {} at {} (sf {}), valid {}/{}",
                    result.identity, result.peak_offset, result.sf_idx, self.valid_count, self.min_valid_frames
                );
                if self.valid_count >= self.min_valid_frames {
                    self.start_tracking(&result)?;
                }
            }
            SearchOutcome::NoSpace { n_id_2, pss_start } => {
                // Shift the next window so the PSS lands in its middle
                debug!(
                    "SEARCH: N_id_2={} PSS at {} without room for the SSS",
                    n_id_2, pss_start
                );
                self.discard = self.search_len / 2;
            }
            SearchOutcome::NotFound => {
                if self.valid_count > 0 {
                    debug!("SEARCH: cell lost after {} valid windows", self.valid_count);
                }
                self.candidate = None;
                self.valid_count = 0;
                self.peak_value = 0.0;
            }
        }
        Ok(SyncStatus::NotReady)
    }

    /// Freeze the cell and align the stream to its next subframe boundary
    fn start_tracking(&mut self, result: &CellSearchResult) -> Result<(), PhyError> {
        let n = self.fft_size;
        let pss_symbol = result.duplex.pss_symbol(result.cp);
        let sf_start = result.peak_offset as i64 - result.cp.useful_start(pss_symbol, n) as i64;

        // First subframe boundary at or after the end of the window
        let sf_len = self.sf_len as i64;
        let window = self.search_len as i64;
        let k = (window - sf_start + sf_len - 1).div_euclid(sf_len);
        let next_start = sf_start + k * sf_len;
        self.discard = (next_start - window) as usize;
        self.next_sf_idx = (result.sf_idx as i64 + k).rem_euclid(NOF_SF_X_FRAME as i64) as u32;
        self.next_sfn = 0;

        let cell = Cell {
            identity: result.identity,
            nof_prb: self.nof_prb,
            nof_ports: self.nof_ports,
            cp: result.cp,
            duplex: result.duplex,
        };
        self.strack.set_n_id_2(result.identity.n_id_2)?;
        self.strack.set_cp(result.cp, false);
        self.strack.set_duplex(result.duplex, false);
        self.strack.set_sss_enable(false);
        self.strack.reset();
        self.strack.reset_cfo(0.0);

        self.cfo_current_hz = result.cfo_hz;
        self.pss_stable = 0;
        self.sfo = SampleOffsetLoop::default();
        self.lost_count = 0;
        self.carry = 0;
        self.agc_count = 0;
        self.cell = Some(cell);
        self.state = SyncState::Tracking;

        info!(
            "SYNC: tracking cell {} ({:?}, {:?} CP), CFO {:.1} Hz, next sf {} after {} samples",
            cell.identity, cell.duplex, cell.cp, self.cfo_current_hz, self.next_sf_idx, self.discard
        );
        Ok(())
    }

    fn run_track(&mut self, provider: &mut dyn SampleProvider) -> Result<SyncStatus, PhyError> {
        let Some(cell) = self.cell else {
            return Err(PhyError::NotInitialized("tracked cell"));
        };
        let sf_len = self.sf_len;
        let carry = self.carry;
        if carry > 0 {
            self.buffers.shift_to_front(sf_len - carry, carry)?;
        }
        let rx = provider.recv(&mut self.buffers, carry, sf_len - carry)?;
        self.timestamp = rx.timestamp.saturating_sub(carry as u64);
        self.carry = 0;

        self.sf_idx = self.next_sf_idx;
        self.sfn = self.next_sfn;
        self.next_sf_idx = (self.sf_idx + 1) % NOF_SF_X_FRAME;
        if self.next_sf_idx == 0 {
            self.next_sfn = (self.sfn + 1) % NOF_SFN;
        }

        // Carried samples were corrected with the previous subframe
        let freq = -self.cfo_current_hz / SUBCARRIER_SPACING_HZ / self.fft_size as f32;
        for ch in self.buffers.iter_mut() {
            self.corrector.correct_in_place(&mut ch[carry..sf_len], freq)?;
        }

        if !cell.duplex.is_pss_subframe(self.sf_idx) {
            return Ok(SyncStatus::SubframeReady);
        }

        let expected = cell.cp.useful_start(cell.duplex.pss_symbol(cell.cp), self.fft_size);
        let track_start = expected.saturating_sub(self.track_len / 2);
        let find = self.strack.find(&self.buffers.channel(0)[..sf_len], track_start)?;
        self.peak_value = self.strack.peak_value();
        match find {
            SyncFind::Found { pss_start } | SyncFind::FoundNoSpace { pss_start } => {
                self.track_found(pss_start as i64 - expected as i64);
                self.agc_count += 1;
                if self.agc_count >= self.agc_period {
                    self.agc_count = 0;
                    self.update_agc(provider, sf_len)?;
                }
                Ok(SyncStatus::SubframeReady)
            }
            SyncFind::NotFound => {
                self.lost_count += 1;
                if self.lost_count >= self.max_lost_frames {
                    info!(
                        "SYNC: {} PSS lost in a row, searching again",
                        self.lost_count
                    );
                    self.start_searching();
                    return Ok(SyncStatus::NotReady);
                }
                debug!(
                    "TRACK: PSS not found in sf {} (peak {:.3e}), {} lost",
                    self.sf_idx, self.peak_value, self.lost_count
                );
                Ok(SyncStatus::SubframeReady)
            }
        }
    }

    /// Steer timing and frequency from a tracked PSS `offset` samples from
    /// where it was expected
    fn track_found(&mut self, offset: i64) {
        self.lost_count = 0;
        let offset = offset as i32;
        self.sfo.last = offset;

        if self.sfo_correct_period == 0 {
            self.sfo.mean = offset as f32;
        } else {
            self.sfo.mean = ema(offset as f32, self.sfo.mean, self.sfo_ema);
        }
        self.sfo.count += 1;
        if self.sfo_correct_period == 0 || self.sfo.count >= self.sfo_correct_period {
            let correction = self.sfo.mean.round() as i64;
            if correction > 0 {
                self.discard = correction as usize;
            } else if correction < 0 {
                self.carry = (correction.unsigned_abs() as usize).min(self.sf_len - 1);
            }
            if correction != 0 {
                debug!(
                    "TRACK: time offset {} samples (mean {:.2}) in sf {}",
                    correction, self.sfo.mean, self.sf_idx
                );
            }
            self.sfo.mean = 0.0;
            self.sfo.count = 0;
        }

        let residual = self.strack.cfo_hz();
        if residual.abs() > self.pss_min_hz {
            self.cfo_current_hz += residual * self.pss_loop_bw;
            self.pss_stable = 0;
        } else {
            self.pss_stable = self.pss_stable.saturating_add(1);
        }
        trace!(
            "TRACK: sf {} offset {} CFO {:.1} Hz (PSS residual {:.1} Hz)",
            self.sf_idx, offset, self.cfo_current_hz, residual
        );
    }

    fn start_searching(&mut self) {
        self.state = SyncState::Searching;
        self.cell = None;
        self.candidate = None;
        self.valid_count = 0;
        self.lost_count = 0;
        self.discard = 0;
        self.carry = 0;
        self.pss_stable = 0;
        self.sfo = SampleOffsetLoop::default();
        self.searcher.reset();
        self.searcher.reset_cfo(self.cfo_current_hz);
    }

    /// Feed the residual CFO measured on the reference signals.
    ///
    /// Applied only while TRACKING once the PSS loop has settled; residuals
    /// at or above the configured limit are ignored.
    pub fn set_cfo_ref(&mut self, residual_hz: f32) {
        if self.state != SyncState::Tracking || !self.ref_enable {
            return;
        }
        if self.pss_stable >= self.pss_stable_count && residual_hz.abs() < self.ref_max_hz {
            self.cfo_current_hz += residual_hz * self.ref_loop_bw;
            trace!("TRACK: reference CFO {:.1} Hz -> {:.1} Hz", residual_hz, self.cfo_current_hz);
        }
    }

    /// Return to SEARCHING, keeping the current CFO as the search seed
    pub fn reset(&mut self) {
        self.start_searching();
        self.peak_value = 0.0;
        self.last_search = None;
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Cell being tracked
    pub fn cell(&self) -> Option<&Cell> {
        self.cell.as_ref()
    }

    /// Subframe index of the last delivered subframe
    pub fn sf_idx(&self) -> u32 {
        self.sf_idx
    }

    /// System frame number of the last delivered subframe.
    ///
    /// Counts from zero at the start of tracking until set from the
    /// broadcast channel.
    pub fn sfn(&self) -> u32 {
        self.sfn
    }

    /// Set the system frame number of the last delivered subframe
    pub fn set_sfn(&mut self, sfn: u32) {
        self.sfn = sfn % NOF_SFN;
        self.next_sfn = if self.next_sf_idx == 0 {
            (self.sfn + 1) % NOF_SFN
        } else {
            self.sfn
        };
    }

    /// CFO currently removed from delivered subframes, in Hz
    pub fn cfo_hz(&self) -> f32 {
        self.cfo_current_hz
    }

    /// Averaged sample offset drift in samples per second
    pub fn sfo(&self) -> f32 {
        self.sfo.mean / PSS_PERIOD_S
    }

    /// Sample offset of the last tracked PSS
    pub fn last_sample_offset(&self) -> i32 {
        self.sfo.last
    }

    /// Correlation value of the last detection attempt
    pub fn peak_value(&self) -> f32 {
        self.peak_value
    }

    /// Consecutive PSS misses while tracking
    pub fn lost_count(&self) -> u32 {
        self.lost_count
    }

    /// Consecutive search windows with the same cell
    pub fn valid_count(&self) -> u32 {
        self.valid_count
    }

    /// Last successful search
    pub fn last_search(&self) -> Option<&CellSearchResult> {
        self.last_search.as_ref()
    }

    /// Stream position of the first sample of the last block read
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Samples per subframe
    pub fn sf_len(&self) -> usize {
        self.sf_len
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Last delivered subframe on receive antenna `rx`
    pub fn subframe(&self, rx: usize) -> &[Complex32] {
        &self.buffers.channel(rx)[..self.sf_len]
    }

    /// Number of receive antennas
    pub fn nof_rx(&self) -> usize {
        self.buffers.nof_channels()
    }

    pub fn agc(&self) -> Option<&Agc> {
        self.agc.as_ref()
    }
}
