//! Time and Frequency Synchronization
//!
//! A [`Synchronizer`] looks for the PSS of one N_id_2 in a window of
//! samples, estimates the carrier frequency offset, resolves N_id_1 and the
//! half-frame from the SSS and detects the cyclic prefix length. Within one
//! call the stages always run in the order: integer CFO, CP-based CFO,
//! correction, PSS correlation, peak detection, PSS-based CFO, SSS and CP
//! detection.

pub mod cfo;
pub mod correlator;
pub mod cp;
pub mod decim;
pub mod peak;
pub mod pss;
pub mod search;
pub mod sss;

pub use search::{CellSearchResult, CellSearcher, SearchOutcome};

use crate::chest::extract::ls_pilot;
use crate::config::{DetectorConfig, PhyConfig};
use crate::{alloc_cf, PhyError};
use cfo::{CfoCorrector, CfoEstimator};
use common::types::{sf_len, CellIdentity, CyclicPrefix, DuplexMode, SUBCARRIER_SPACING_HZ, SYNC_SEQ_LEN};
use common::utils::dot_prod_conj;
use correlator::Correlator;
use cp::{CpCorrelator, CpDetector};
use decim::Decimator;
use num_complex::Complex32;
use peak::{find_peak, Peak, PeakDetector};
use rustfft::{Fft, FftPlanner};
use sss::{SssDetection, SssResolver};
use std::sync::Arc;
use tracing::{debug, trace};

/// Windows up to this length combine more symbols in the CP estimator
const CP_NSYMBOLS_LONG_THRESHOLD: usize = 10_000;

/// Outcome of [`Synchronizer::find`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFind {
    /// PSS detected; SSS and CP detection ran
    Found {
        /// Index of the first useful sample of the PSS symbol in the input
        pss_start: usize,
    },
    /// PSS detected too close to the window start to read the SSS
    FoundNoSpace {
        /// Index of the first useful sample of the PSS symbol in the input
        pss_start: usize,
    },
    /// No PSS above threshold
    NotFound,
}

/// PSS correlator against a replica shifted by an integer number of subcarriers
struct IntegerHypothesis {
    /// Shift in subcarriers
    shift: i32,
    /// Correlator against the shifted replica
    correlator: Correlator,
}

/// Reference for the PSS correlation at 1/`decimation` of the sample rate
fn search_reference(n_id_2: u8, fft_size: usize, decimation: usize) -> Result<Vec<Complex32>, PhyError> {
    pss::pss_time_reference(n_id_2, fft_size / decimation.max(1), 0)
}

/// Full-rate position of a PSS found at lag `coarse` of the decimated
/// profile: the lags around `coarse * factor - delay` are correlated with
/// the full-rate reference and the strongest one is returned.
fn refine_peak(
    work: &[Complex32],
    reference: &[Complex32],
    coarse: usize,
    factor: usize,
    delay: usize,
) -> Option<(usize, f32)> {
    let n = reference.len();
    let last = work.len().checked_sub(n)?;
    let centre = (coarse * factor).saturating_sub(delay);
    let start = centre.saturating_sub(factor + 1).min(last);
    let end = (centre + factor + 1).min(last);
    let mut best: Option<(usize, f32)> = None;
    for t in start..=end {
        let value = dot_prod_conj(&work[t..t + n], reference).norm_sqr();
        if best.map_or(true, |(_, b)| value > b) {
            best = Some((t, value));
        }
    }
    best
}

/// PSS/SSS synchronizer for one N_id_2
pub struct Synchronizer {
    /// FFT size
    fft_size: usize,
    /// Largest window searched per call
    frame_len: usize,
    /// Sector identity searched for
    n_id_2: u8,
    /// N_id_1 to verify instead of searching
    known_n_id_1: Option<u16>,
    /// PSS correlator on CFO-corrected samples
    correlator: Correlator,
    /// Integer CFO hypotheses, empty when disabled
    integer: Vec<IntegerHypothesis>,
    /// Time-domain PSS reference
    pss_ref: Vec<Complex32>,
    /// Frequency-domain PSS, the pilots of the SSS equalizer
    pss_freq: [Complex32; SYNC_SEQ_LEN],
    /// Channel on the PSS subcarriers of the last detection
    pss_ce: [Complex32; SYNC_SEQ_LEN],
    /// Low-pass decimator ahead of the correlator, when searching decimated
    decimator: Option<Decimator>,
    /// Peak threshold policy
    peak_detector: PeakDetector,
    /// Running CFO estimate
    cfo: CfoEstimator,
    /// Correct the window before correlating
    cfo_correct: bool,
    /// CP-based fine CFO
    cfo_cp: bool,
    /// PSS-based fine CFO
    cfo_pss: bool,
    /// Integer CFO search
    cfo_integer: bool,
    /// Symbols combined by the CP estimator
    cp_nsymbols: usize,
    cp_correlator: CpCorrelator,
    /// Window corrector
    corrector: CfoCorrector,
    /// SSS symbol corrector
    sss_corrector: CfoCorrector,
    cp_detector: CpDetector,
    /// Detect the CP length on each detection
    detect_cp: bool,
    /// Current CP hypothesis
    cp: CyclicPrefix,
    /// Resolve the SSS on each detection
    sss_enable: bool,
    sss: SssResolver,
    /// Equalize the SSS with the channel seen on the PSS
    sss_equalize: bool,
    /// Current duplex hypothesis
    duplex: DuplexMode,
    /// Try both SSS positions
    detect_duplex: bool,
    /// SSS symbol transform
    fft: Arc<dyn Fft<f32>>,
    fft_buf: Vec<Complex32>,
    fft_scratch: Vec<Complex32>,
    /// CFO-corrected window
    work: Vec<Complex32>,
    /// Strongest peak of the last call
    last_peak: Option<Peak>,
    /// Last PSS-based residual in subcarriers
    pss_residual: f32,
    /// SSS result of the last detection
    sss_detection: Option<SssDetection>,
    /// Subframe of the last detected PSS
    sf_idx: u32,
}

impl Synchronizer {
    /// Create a synchronizer searching windows of up to `frame_len` samples
    pub fn new(n_id_2: u8, frame_len: usize, detector: &DetectorConfig, config: &PhyConfig) -> Result<Self, PhyError> {
        let fft_size = config.fft_size()?;
        if frame_len < fft_size {
            return Err(PhyError::InvalidConfiguration(format!(
                "synchronizer window {} shorter than FFT size {}",
                frame_len, fft_size
            )));
        }
        let sync = &config.sync;
        let pss_ref = pss::pss_time_reference(n_id_2, fft_size, 0)?;
        let decimation = detector.decimation.max(1);
        let decimator = if decimation > 1 {
            Some(Decimator::new(decimation, frame_len)?)
        } else {
            None
        };

        let search_ref = search_reference(n_id_2, fft_size, decimation)?;
        let search_algorithm = sync.correlator.select(frame_len / decimation, search_ref.len());
        let mut correlator = Correlator::new(&search_ref, frame_len / decimation, search_algorithm)?;
        correlator.set_ema_alpha(detector.correlation_alpha);

        // Windows longer than a half-frame hold the PSS twice
        let mut peak_detector = PeakDetector::new(detector.peak_policy, detector.threshold);
        peak_detector.set_repeat_period(Some(5 * sf_len(fft_size) / decimation));

        let algorithm = sync.correlator.select(frame_len, fft_size);

        let mut integer = Vec::new();
        if sync.cfo.integer_enable {
            let range = sync.cfo.integer_range as i32;
            for shift in -range..=range {
                let reference = pss::pss_time_reference(n_id_2, fft_size, shift)?;
                integer.push(IntegerHypothesis {
                    shift,
                    correlator: Correlator::new(&reference, frame_len, algorithm)?,
                });
            }
        }

        let cp_nsymbols = sync.cfo.cp_nsymbols.unwrap_or(if frame_len < CP_NSYMBOLS_LONG_THRESHOLD { 14 } else { 3 });

        let mut sss = SssResolver::new(n_id_2, sync.sss.algorithm)?;
        sss.set_partial_segments(sync.sss.partial_segments)?;
        sss.set_min_separation(sync.sss.min_separation);

        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        let scratch_len = fft.get_inplace_scratch_len();

        let mut cfo = CfoEstimator::new(sync.cfo.ema_alpha);
        cfo.reset(sync.cfo.initial_hz);

        debug!(
            "Synchronizer N_id_2={}: N={}, window {}, decimation {}, {:?}, threshold {:.2} ({:?})",
            n_id_2, fft_size, frame_len, decimation, search_algorithm, detector.threshold, detector.peak_policy
        );

        Ok(Self {
            fft_size,
            frame_len,
            n_id_2,
            known_n_id_1: None,
            correlator,
            integer,
            pss_ref,
            pss_freq: pss::generate_pss(n_id_2)?,
            pss_ce: [Complex32::new(0.0, 0.0); SYNC_SEQ_LEN],
            decimator,
            peak_detector,
            cfo,
            cfo_correct: detector.cfo_correct,
            cfo_cp: detector.cfo_cp,
            cfo_pss: detector.cfo_pss,
            cfo_integer: sync.cfo.integer_enable,
            cp_nsymbols,
            cp_correlator: CpCorrelator::new(fft_size, frame_len)?,
            corrector: CfoCorrector::new(frame_len)?,
            sss_corrector: CfoCorrector::new(fft_size)?,
            cp_detector: CpDetector::new(),
            detect_cp: config.cell.detect_cp,
            cp: config.cell.cyclic_prefix,
            sss_enable: sync.sss.enable,
            sss,
            sss_equalize: sync.sss.equalize,
            duplex: config.cell.duplex,
            detect_duplex: config.cell.detect_duplex,
            fft,
            fft_buf: alloc_cf(fft_size)?,
            fft_scratch: alloc_cf(scratch_len)?,
            work: alloc_cf(frame_len)?,
            last_peak: None,
            pss_residual: 0.0,
            sss_detection: None,
            sf_idx: 0,
        })
    }

    /// Search `input[find_offset..]` (at most one window) for the PSS.
    ///
    /// Samples before `find_offset` are only read by the SSS and CP length
    /// detection, which look back from the detected PSS.
    pub fn find(&mut self, input: &[Complex32], find_offset: usize) -> Result<SyncFind, PhyError> {
        let n = self.fft_size;
        if find_offset + n > input.len() {
            return Err(PhyError::SizeMismatch {
                context: "synchronizer input",
                expected: find_offset + n,
                actual: input.len(),
            });
        }
        let end = (find_offset + self.frame_len).min(input.len());
        let region = &input[find_offset..end];
        let len = region.len();
        self.last_peak = None;
        self.sss_detection = None;

        if self.cfo_integer {
            let mut best = (0usize, f32::MIN);
            for (i, hyp) in self.integer.iter_mut().enumerate() {
                let profile = hyp.correlator.correlate(region)?;
                if let Some((_, value)) = find_peak(profile) {
                    if value > best.1 {
                        best = (i, value);
                    }
                }
            }
            let hyp = &self.integer[best.0];
            self.cfo.set_integer(hyp.shift);
            trace!("Integer CFO {} (peak {:.3e})", hyp.shift, best.1);
        }

        // Integer offsets are invisible to the CP correlation
        if self.cfo_cp {
            let cp_len = self.cp.cp_len(1, n);
            if let Some(measured) = self.cp_correlator.estimate_cfo(region, cp_len, self.cp_nsymbols)? {
                self.cfo.update(measured);
            }
        }

        let applied_fine = if self.cfo_correct { self.cfo.fine() } else { 0.0 };
        let applied = if self.cfo_correct { self.cfo.total() } else { 0.0 };
        let work = &mut self.work[..len];
        if self.cfo_correct {
            self.corrector.correct(region, work, -applied / n as f32)?;
        } else {
            work.copy_from_slice(region);
        }

        let work = &self.work[..len];
        let peak = match self.decimator.as_mut() {
            None => {
                let profile = self.correlator.correlate(work)?;
                self.peak_detector.detect(profile)
            }
            Some(decimator) => {
                let (factor, delay) = (decimator.factor(), decimator.delay());
                let profile = self.correlator.correlate(decimator.process(work)?)?;
                self.peak_detector.detect(profile).and_then(|coarse| {
                    let (index, value) = refine_peak(work, &self.pss_ref, coarse.index, factor, delay)?;
                    trace!("Decimated peak at {} refined to {}", coarse.index, index);
                    Some(Peak { index, value, ..coarse })
                })
            }
        };
        let Some(peak) = peak else {
            return Ok(SyncFind::NotFound);
        };
        self.last_peak = Some(peak);
        if !peak.detected {
            return Ok(SyncFind::NotFound);
        }
        let pss_start = find_offset + peak.index;

        if self.cfo_pss {
            let residual = pss::pss_cfo(&self.pss_ref, &self.work[peak.index..peak.index + n]);
            self.pss_residual = residual;
            self.cfo.update_gated(applied_fine + residual, residual);
        }

        let cp_ext = CyclicPrefix::Extended.cp_len(0, n);
        if self.sss_enable && pss_start + n < 2 * (n + cp_ext) {
            debug!(
                "N_id_2={}: PSS at {} leaves no room for the SSS",
                self.n_id_2, pss_start
            );
            return Ok(SyncFind::FoundNoSpace { pss_start });
        }

        if self.detect_cp {
            self.cp = self.cp_detector.detect(input, pss_start + n, n);
        }

        if self.sss_enable {
            let freq = if self.cfo_correct { -self.cfo.total() / n as f32 } else { 0.0 };
            self.resolve_sss(input, pss_start, freq)?;
        }

        debug!(
            "N_id_2={}: PSS at {} value {:.3e} metric {:.2}, CFO {:.1} Hz, {:?} CP",
            self.n_id_2,
            pss_start,
            peak.value,
            peak.metric,
            self.cfo.total_hz(),
            self.cp
        );
        Ok(SyncFind::Found { pss_start })
    }

    /// Offset from the first useful sample of the SSS symbol to that of the
    /// PSS symbol
    fn sss_distance(&self, duplex: DuplexMode) -> usize {
        let n = self.fft_size;
        match duplex {
            // SSS is the symbol before the PSS
            DuplexMode::Fdd => {
                let pss_symbol = self.cp.symbols_per_slot() - 1;
                n + self.cp.cp_len(pss_symbol, n)
            }
            // SSS closes the slot before the PSS in the third symbol
            DuplexMode::Tdd => 3 * n + self.cp.cp_len(0, n) + 2 * self.cp.cp_len(1, n),
        }
    }

    fn resolve_sss(&mut self, input: &[Complex32], pss_start: usize, freq: f32) -> Result<(), PhyError> {
        let trials: &[DuplexMode] = if self.detect_duplex {
            &[DuplexMode::Fdd, DuplexMode::Tdd]
        } else if self.duplex == DuplexMode::Fdd {
            &[DuplexMode::Fdd]
        } else {
            &[DuplexMode::Tdd]
        };

        if self.sss_equalize {
            let received = self.sync_symbols(input, pss_start, freq)?;
            for ((ce, rx), known) in self.pss_ce.iter_mut().zip(&received).zip(&self.pss_freq) {
                *ce = ls_pilot(*rx, *known);
            }
        }

        let mut best: Option<(SssDetection, DuplexMode)> = None;
        for &duplex in trials {
            let Some(sss_start) = pss_start.checked_sub(self.sss_distance(duplex)) else {
                continue;
            };
            let mut symbols = self.sync_symbols(input, sss_start, freq)?;
            if self.sss_equalize {
                // Zero-forcing with the PSS channel
                for (s, ce) in symbols.iter_mut().zip(&self.pss_ce) {
                    *s = ls_pilot(*s, *ce);
                }
            }
            let detection = match self.known_n_id_1 {
                Some(n_id_1) => self.sss.resolve_known(&symbols, n_id_1)?,
                None => self.sss.resolve(&symbols)?,
            };
            if let Some(det) = detection {
                trace!("{:?} SSS trial: N_id_1={} score {:.3}", duplex, det.n_id_1, det.score);
                if best.map_or(true, |(b, _)| det.score > b.score) {
                    best = Some((det, duplex));
                }
            }
        }

        if let Some((det, duplex)) = best {
            self.duplex = duplex;
            self.sf_idx = match duplex {
                DuplexMode::Fdd => det.sf_idx,
                DuplexMode::Tdd => det.sf_idx + 1,
            };
            self.sss_detection = Some(det);
        } else {
            debug!("N_id_2={}: SSS not resolved", self.n_id_2);
        }
        Ok(())
    }

    /// Frequency-domain synchronization subcarriers of the symbol starting
    /// at `start`
    fn sync_symbols(&mut self, input: &[Complex32], start: usize, freq: f32) -> Result<[Complex32; SYNC_SEQ_LEN], PhyError> {
        let n = self.fft_size;
        if start + n > input.len() {
            return Err(PhyError::SizeMismatch {
                context: "synchronization symbol",
                expected: start + n,
                actual: input.len(),
            });
        }
        self.sss_corrector
            .correct(&input[start..start + n], &mut self.fft_buf, freq)?;
        self.fft.process_with_scratch(&mut self.fft_buf, &mut self.fft_scratch);

        let norm = 1.0 / (n as f32).sqrt();
        let mut symbols = [Complex32::new(0.0, 0.0); SYNC_SEQ_LEN];
        for (i, s) in symbols.iter_mut().enumerate() {
            *s = self.fft_buf[pss::sync_seq_bin(i, n)] * norm;
        }
        Ok(symbols)
    }

    /// Sector identity searched for
    pub fn n_id_2(&self) -> u8 {
        self.n_id_2
    }

    /// Search for another N_id_2, regenerating the references
    pub fn set_n_id_2(&mut self, n_id_2: u8) -> Result<(), PhyError> {
        if n_id_2 == self.n_id_2 {
            return Ok(());
        }
        self.pss_ref = pss::pss_time_reference(n_id_2, self.fft_size, 0)?;
        self.pss_freq = pss::generate_pss(n_id_2)?;
        let decimation = self.decimator.as_ref().map_or(1, Decimator::factor);
        self.correlator
            .set_reference(&search_reference(n_id_2, self.fft_size, decimation)?)?;
        for hyp in self.integer.iter_mut() {
            let reference = pss::pss_time_reference(n_id_2, self.fft_size, hyp.shift)?;
            hyp.correlator.set_reference(&reference)?;
        }
        self.sss.set_n_id_2(n_id_2)?;
        self.n_id_2 = n_id_2;
        Ok(())
    }

    /// Verify a known N_id_1 instead of searching all groups
    pub fn set_known_n_id_1(&mut self, n_id_1: Option<u16>) {
        self.known_n_id_1 = n_id_1;
    }

    /// Cell identity from the last detection, if the SSS was resolved
    pub fn cell_identity(&self) -> Option<CellIdentity> {
        self.sss_detection
            .and_then(|det| CellIdentity::new(det.n_id_1, self.n_id_2))
    }

    pub fn sss_detection(&self) -> Option<SssDetection> {
        self.sss_detection
    }

    /// Whether the last detection resolved the SSS
    pub fn sss_detected(&self) -> bool {
        self.sss_detection.is_some()
    }

    pub fn set_sss_enable(&mut self, enable: bool) {
        self.sss_enable = enable;
    }

    /// Subframe carrying the last detected PSS
    pub fn sf_idx(&self) -> u32 {
        self.sf_idx
    }

    pub fn duplex(&self) -> DuplexMode {
        self.duplex
    }

    /// Fix the duplex mode, optionally keeping detection enabled
    pub fn set_duplex(&mut self, duplex: DuplexMode, detect: bool) {
        self.duplex = duplex;
        self.detect_duplex = detect;
    }

    pub fn cp(&self) -> CyclicPrefix {
        self.cp
    }

    /// Fix the CP length, optionally keeping detection enabled
    pub fn set_cp(&mut self, cp: CyclicPrefix, detect: bool) {
        self.cp = cp;
        self.detect_cp = detect;
    }

    /// Strongest peak of the last call, detected or not
    pub fn last_peak(&self) -> Option<Peak> {
        self.last_peak
    }

    /// Correlation value of the last peak
    pub fn peak_value(&self) -> f32 {
        self.last_peak.map_or(0.0, |p| p.value)
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.peak_detector.set_threshold(threshold);
    }

    /// Running CFO estimate
    pub fn cfo(&self) -> &CfoEstimator {
        &self.cfo
    }

    /// Total CFO estimate in Hz
    pub fn cfo_hz(&self) -> f32 {
        self.cfo.total_hz()
    }

    /// Last PSS-based residual CFO in Hz
    pub fn pss_residual_hz(&self) -> f32 {
        self.pss_residual * SUBCARRIER_SPACING_HZ
    }

    /// Restart the CFO estimate from `init_hz`
    pub fn reset_cfo(&mut self, init_hz: f32) {
        self.cfo.reset(init_hz);
        self.pss_residual = 0.0;
    }

    /// Seed the CFO estimate from another synchronizer
    pub fn copy_cfo_state(&mut self, other: &Synchronizer) {
        self.cfo.copy_state(&other.cfo);
    }

    /// Clear correlation and CP length averages
    pub fn reset(&mut self) {
        self.correlator.reset();
        for hyp in self.integer.iter_mut() {
            hyp.correlator.reset();
        }
        if let Some(decimator) = self.decimator.as_mut() {
            decimator.reset();
        }
        self.cp_detector.reset();
        self.last_peak = None;
        self.sss_detection = None;
    }

    /// FFT size
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Largest window searched per call
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::DownlinkGenerator;
    use common::types::{sf_len, AntennaPorts, Cell};

    fn test_cell(n_id_1: u16, n_id_2: u8) -> Cell {
        Cell {
            identity: CellIdentity::new(n_id_1, n_id_2).unwrap(),
            nof_prb: 6,
            nof_ports: AntennaPorts::One,
            cp: CyclicPrefix::Normal,
            duplex: DuplexMode::Fdd,
        }
    }

    /// Five subframes starting with subframe `first_sf`, with a frequency offset
    fn half_frame(cell: Cell, first_sf: u32, cfo_hz: f32) -> Vec<Complex32> {
        let mut gen = DownlinkGenerator::new(cell).unwrap();
        let mut out = Vec::new();
        for k in 0..5 {
            out.extend(gen.subframe((first_sf + k) % 10).unwrap());
        }
        let fs = common::types::sampling_rate_hz(128) as f32;
        for (t, v) in out.iter_mut().enumerate() {
            *v *= Complex32::from_polar(1.0, 2.0 * std::f32::consts::PI * cfo_hz * t as f32 / fs);
        }
        out
    }

    fn find_config() -> PhyConfig {
        let mut config = PhyConfig::default();
        config.sync.find.cfo_cp = false;
        config
    }

    #[test]
    fn test_find_resolves_cell() {
        let cell = test_cell(33, 2);
        let input = half_frame(cell, 3, 0.0);
        let config = find_config();
        let mut sync = Synchronizer::new(2, input.len(), &config.sync.find, &config).unwrap();

        // Subframe 5 starts two subframes in; its PSS is symbol 6
        let expected = 2 * sf_len(128) + CyclicPrefix::Normal.useful_start(6, 128);
        assert_eq!(sync.find(&input, 0).unwrap(), SyncFind::Found { pss_start: expected });
        assert_eq!(sync.cell_identity(), Some(cell.identity));
        assert_eq!(sync.sf_idx(), 5);
        assert_eq!(sync.cp(), CyclicPrefix::Normal);
        assert!(sync.cfo_hz().abs() < 1.0);
    }

    #[test]
    fn test_pss_cfo_estimate() {
        let cell = test_cell(7, 1);
        let input = half_frame(cell, 8, 2000.0);
        let config = find_config();
        let mut sync = Synchronizer::new(1, input.len(), &config.sync.find, &config).unwrap();
        assert!(matches!(sync.find(&input, 0).unwrap(), SyncFind::Found { .. }));
        assert!((sync.cfo_hz() - 2000.0).abs() < 50.0, "CFO {}", sync.cfo_hz());
        assert_eq!(sync.cell_identity(), Some(cell.identity));
    }

    #[test]
    fn test_no_space_near_window_start() {
        let cell = test_cell(3, 0);
        // The PSS of subframe 0 lands 40 samples into the window
        let lead = CyclicPrefix::Normal.useful_start(6, 128) - 40;
        let full = half_frame(cell, 0, 0.0);
        let input = full[lead..].to_vec();
        let config = find_config();
        let mut sync = Synchronizer::new(0, input.len(), &config.sync.find, &config).unwrap();
        assert_eq!(sync.find(&input, 0).unwrap(), SyncFind::FoundNoSpace { pss_start: 40 });
    }

    #[test]
    fn test_silence_not_found() {
        let config = find_config();
        let input = vec![Complex32::new(0.0, 0.0); 4000];
        let mut sync = Synchronizer::new(0, 4000, &config.sync.find, &config).unwrap();
        assert_eq!(sync.find(&input, 0).unwrap(), SyncFind::NotFound);
        assert!(sync.find(&input[..100], 0).is_err());
    }

    #[test]
    fn test_sss_equalized_through_multipath() {
        let cell = test_cell(101, 1);
        let clean = half_frame(cell, 3, 0.0);
        // Echo 5 samples late, inside the cyclic prefix
        let echo = Complex32::from_polar(0.5, 1.0);
        let input: Vec<Complex32> = (0..clean.len())
            .map(|t| clean[t] + if t >= 5 { echo * clean[t - 5] } else { Complex32::new(0.0, 0.0) })
            .collect();

        let mut config = find_config();
        config.sync.find.cfo_pss = false;
        let mut raw = Synchronizer::new(1, input.len(), &config.sync.find, &config).unwrap();
        raw.find(&input, 0).unwrap();

        config.sync.sss.equalize = true;
        let mut sync = Synchronizer::new(1, input.len(), &config.sync.find, &config).unwrap();
        assert!(matches!(sync.find(&input, 0).unwrap(), SyncFind::Found { .. }));
        assert_eq!(sync.cell_identity(), Some(cell.identity));
        assert_eq!(sync.sf_idx(), 5);
        let equalized = sync.sss_detection().unwrap();
        assert!(equalized.score > 0.99, "score {}", equalized.score);
        assert!(raw.sss_detection().map_or(true, |det| det.score < equalized.score));
    }

    #[test]
    fn test_decimated_find_is_sample_exact() {
        let cell = test_cell(33, 2);
        let input = half_frame(cell, 3, 0.0);
        let mut config = find_config();
        config.sync.find.decimation = 2;
        let mut sync = Synchronizer::new(2, input.len(), &config.sync.find, &config).unwrap();

        let expected = 2 * sf_len(128) + CyclicPrefix::Normal.useful_start(6, 128);
        assert_eq!(sync.find(&input, 0).unwrap(), SyncFind::Found { pss_start: expected });
        assert_eq!(sync.cell_identity(), Some(cell.identity));

        // After a reset the carried filter state starts from silence again
        sync.reset();
        let shifted = &input[300..];
        assert_eq!(sync.find(shifted, 0).unwrap(), SyncFind::Found { pss_start: expected - 300 });
    }

    #[test]
    fn test_find_in_full_frame() {
        let cell = test_cell(5, 1);
        let mut gen = DownlinkGenerator::new(cell).unwrap();
        let mut input = Vec::new();
        for sf in 0..10 {
            input.extend(gen.subframe(sf).unwrap());
        }
        let config = find_config();
        let mut sync = Synchronizer::new(1, input.len(), &config.sync.find, &config).unwrap();

        // Either PSS of the frame may win; both carry the same cell
        let half = 5 * sf_len(128);
        let SyncFind::Found { pss_start } = sync.find(&input, 0).unwrap() else {
            panic!("no PSS in a full frame");
        };
        assert_eq!(pss_start % half, CyclicPrefix::Normal.useful_start(6, 128));
        assert_eq!(sync.sf_idx() as usize, 5 * (pss_start / half));
        assert_eq!(sync.cell_identity(), Some(cell.identity));
    }

    #[test]
    fn test_copy_and_reset_cfo() {
        let config = find_config();
        let mut a = Synchronizer::new(0, 1000, &config.sync.find, &config).unwrap();
        let mut b = Synchronizer::new(1, 1000, &config.sync.find, &config).unwrap();
        a.reset_cfo(750.0);
        b.copy_cfo_state(&a);
        assert!((b.cfo_hz() - 750.0).abs() < 1e-2);
        b.reset_cfo(0.0);
        assert_eq!(b.cfo_hz(), 0.0);
    }
}
