//! Receiver Configuration
//!
//! YAML configuration of the cell search, tracking and channel estimation
//! stages. Every field has a default, so an empty document is a valid
//! configuration for a 6 PRB FDD cell.

use crate::chest::smooth::SmoothingFilter;
use crate::chest::{ChestAlgorithm, NoiseAlgorithm};
use crate::sync::correlator::CorrelationAlgorithm;
use crate::sync::peak::PeakPolicy;
use crate::sync::sss::{SssAlgorithm, DEFAULT_MIN_SEPARATION, DEFAULT_PARTIAL_SEGMENTS};
use crate::PhyError;
use common::types::{symbol_sz, AntennaPorts, CellIdentity, CyclicPrefix, DuplexMode, MAX_PRB, SYNC_SEQ_LEN};
use interfaces::MAX_CHANNELS;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PhyConfig {
    /// Cell and front-end parameters
    #[serde(default)]
    pub cell: CellConfig,
    /// Search and tracking
    #[serde(default)]
    pub sync: SyncConfig,
    /// Channel estimation
    #[serde(default)]
    pub chest: ChestConfig,
    /// Automatic gain control
    #[serde(default)]
    pub agc: AgcConfig,
    /// Logging
    #[serde(default)]
    pub log: LogConfig,
}

/// Cell configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    /// Downlink bandwidth in resource blocks
    #[serde(default = "default_nof_prb")]
    pub nof_prb: u32,
    /// Cell-specific antenna ports
    #[serde(default = "default_nof_ports")]
    pub nof_ports: AntennaPorts,
    /// Receive antennas
    #[serde(default = "default_nof_rx_antennas")]
    pub nof_rx_antennas: usize,
    /// Cyclic prefix assumed until detected
    #[serde(default = "default_cyclic_prefix")]
    pub cyclic_prefix: CyclicPrefix,
    /// Detect the cyclic prefix length during search
    #[serde(default = "default_true")]
    pub detect_cp: bool,
    /// Duplex mode assumed during search
    #[serde(default = "default_duplex")]
    pub duplex: DuplexMode,
    /// Try both SSS positions and keep the stronger one
    #[serde(default)]
    pub detect_duplex: bool,
    /// Restrict the search to a known physical cell identity
    #[serde(default)]
    pub cell_id: Option<u16>,
}

fn default_nof_prb() -> u32 {
    6
}

fn default_nof_ports() -> AntennaPorts {
    AntennaPorts::One
}

fn default_nof_rx_antennas() -> usize {
    1
}

fn default_cyclic_prefix() -> CyclicPrefix {
    CyclicPrefix::Normal
}

fn default_duplex() -> DuplexMode {
    DuplexMode::Fdd
}

fn default_true() -> bool {
    true
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            nof_prb: default_nof_prb(),
            nof_ports: default_nof_ports(),
            nof_rx_antennas: default_nof_rx_antennas(),
            cyclic_prefix: default_cyclic_prefix(),
            detect_cp: true,
            duplex: default_duplex(),
            detect_duplex: false,
            cell_id: None,
        }
    }
}

/// Correlator algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelatorChoice {
    Direct,
    Fft,
    /// Direct for narrow tracking windows, FFT for search windows
    Auto,
}

impl CorrelatorChoice {
    /// Concrete algorithm for a correlator of the given dimensions
    pub fn select(&self, max_input_len: usize, reference_len: usize) -> CorrelationAlgorithm {
        match self {
            CorrelatorChoice::Direct => CorrelationAlgorithm::Direct,
            CorrelatorChoice::Fft => CorrelationAlgorithm::Fft,
            CorrelatorChoice::Auto => CorrelationAlgorithm::auto(max_input_len, reference_len),
        }
    }
}

/// Per-mode detection parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectorConfig {
    /// Peak threshold policy
    #[serde(default = "default_peak_policy")]
    pub peak_policy: PeakPolicy,
    /// Detection threshold in the policy's units
    #[serde(default = "default_find_threshold")]
    pub threshold: f32,
    /// Smoothing coefficient of the correlation profile across calls
    #[serde(default)]
    pub correlation_alpha: f32,
    /// Correct the running CFO estimate before correlating
    #[serde(default = "default_true")]
    pub cfo_correct: bool,
    /// Fine CFO from the cyclic prefix
    #[serde(default = "default_true")]
    pub cfo_cp: bool,
    /// Fine CFO from the PSS halves
    #[serde(default = "default_true")]
    pub cfo_pss: bool,
    /// Correlate at 1/`decimation` of the sample rate (1 disables)
    #[serde(default = "default_decimation")]
    pub decimation: usize,
}

fn default_decimation() -> usize {
    1
}

fn default_peak_policy() -> PeakPolicy {
    PeakPolicy::PeakToSideLobe
}

fn default_find_threshold() -> f32 {
    2.0
}

fn default_find_detector() -> DetectorConfig {
    DetectorConfig {
        peak_policy: default_peak_policy(),
        threshold: default_find_threshold(),
        correlation_alpha: 0.0,
        cfo_correct: true,
        cfo_cp: true,
        cfo_pss: true,
        decimation: default_decimation(),
    }
}

// Tracking runs on samples already corrected with the current CFO
fn default_track_detector() -> DetectorConfig {
    DetectorConfig {
        peak_policy: default_peak_policy(),
        threshold: 1.2,
        correlation_alpha: 0.0,
        cfo_correct: false,
        cfo_cp: false,
        cfo_pss: true,
        decimation: default_decimation(),
    }
}

/// Carrier frequency offset estimation and correction loops
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CfoConfig {
    /// Integer CFO search with shifted PSS replicas
    #[serde(default)]
    pub integer_enable: bool,
    /// Largest integer shift tried, in subcarriers
    #[serde(default = "default_integer_range")]
    pub integer_range: u32,
    /// Symbols combined by the CP estimator (automatic when unset)
    #[serde(default)]
    pub cp_nsymbols: Option<usize>,
    /// Smoothing coefficient of the fine CFO estimate
    #[serde(default = "default_cfo_ema")]
    pub ema_alpha: f32,
    /// Initial CFO in Hz
    #[serde(default)]
    pub initial_hz: f32,
    /// Gain of the PSS tracking loop
    #[serde(default = "default_pss_loop_bw")]
    pub pss_loop_bw: f32,
    /// Residual below which the PSS estimate is considered settled
    #[serde(default = "default_pss_min_hz")]
    pub pss_min_hz: f32,
    /// Settled PSS measurements needed before reference signal updates
    #[serde(default = "default_pss_stable_count")]
    pub pss_stable_count: u32,
    /// Reference signal tracking loop
    #[serde(default = "default_true")]
    pub ref_enable: bool,
    /// Gain of the reference signal tracking loop
    #[serde(default = "default_ref_loop_bw")]
    pub ref_loop_bw: f32,
    /// Reference signal residuals at or above this are ignored
    #[serde(default = "default_pss_min_hz")]
    pub ref_max_hz: f32,
}

fn default_integer_range() -> u32 {
    1
}

fn default_cfo_ema() -> f32 {
    0.1
}

fn default_pss_loop_bw() -> f32 {
    0.05
}

fn default_pss_min_hz() -> f32 {
    400.0
}

fn default_pss_stable_count() -> u32 {
    20
}

fn default_ref_loop_bw() -> f32 {
    0.08
}

impl Default for CfoConfig {
    fn default() -> Self {
        Self {
            integer_enable: false,
            integer_range: default_integer_range(),
            cp_nsymbols: None,
            ema_alpha: default_cfo_ema(),
            initial_hz: 0.0,
            pss_loop_bw: default_pss_loop_bw(),
            pss_min_hz: default_pss_min_hz(),
            pss_stable_count: default_pss_stable_count(),
            ref_enable: true,
            ref_loop_bw: default_ref_loop_bw(),
            ref_max_hz: default_pss_min_hz(),
        }
    }
}

/// SSS detection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SssConfig {
    /// Resolve N_id_1 and the half-frame during search
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Detection algorithm
    #[serde(default = "default_sss_algorithm")]
    pub algorithm: SssAlgorithm,
    /// Segments of the partial algorithm
    #[serde(default = "default_partial_segments")]
    pub partial_segments: usize,
    /// Minimum best-to-second-best correlation ratio
    #[serde(default = "default_min_separation")]
    pub min_separation: f32,
    /// Equalize the SSS with the channel seen on the PSS
    #[serde(default)]
    pub equalize: bool,
}

fn default_sss_algorithm() -> SssAlgorithm {
    SssAlgorithm::Full
}

fn default_partial_segments() -> usize {
    DEFAULT_PARTIAL_SEGMENTS
}

fn default_min_separation() -> f32 {
    DEFAULT_MIN_SEPARATION
}

impl Default for SssConfig {
    fn default() -> Self {
        Self {
            enable: true,
            algorithm: default_sss_algorithm(),
            partial_segments: default_partial_segments(),
            min_separation: default_min_separation(),
            equalize: false,
        }
    }
}

/// Cell search and tracking
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Subframes read per search window
    #[serde(default = "default_search_subframes")]
    pub search_subframes: usize,
    /// Consecutive detections of the same cell before tracking starts
    #[serde(default = "default_min_valid_frames")]
    pub min_valid_frames: u32,
    /// Consecutive PSS misses before tracking is abandoned
    #[serde(default = "default_max_lost_frames")]
    pub max_lost_frames: u32,
    /// Candidate offsets examined around the expected PSS while tracking
    #[serde(default = "default_track_len")]
    pub track_len: usize,
    /// Tracked PSS between sample offset corrections (0 corrects every time)
    #[serde(default = "default_sfo_period")]
    pub sfo_correct_period: u32,
    /// Smoothing coefficient of the sample offset average
    #[serde(default = "default_sfo_ema")]
    pub sfo_ema: f32,
    /// Correlator algorithm
    #[serde(default = "default_correlator")]
    pub correlator: CorrelatorChoice,
    /// Search mode detection
    #[serde(default = "default_find_detector")]
    pub find: DetectorConfig,
    /// Tracking mode detection
    #[serde(default = "default_track_detector")]
    pub track: DetectorConfig,
    /// Frequency offset handling
    #[serde(default)]
    pub cfo: CfoConfig,
    /// SSS detection
    #[serde(default)]
    pub sss: SssConfig,
}

fn default_search_subframes() -> usize {
    5
}

fn default_min_valid_frames() -> u32 {
    2
}

fn default_max_lost_frames() -> u32 {
    4
}

fn default_track_len() -> usize {
    32
}

fn default_sfo_period() -> u32 {
    10
}

fn default_sfo_ema() -> f32 {
    0.1
}

fn default_correlator() -> CorrelatorChoice {
    CorrelatorChoice::Auto
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            search_subframes: default_search_subframes(),
            min_valid_frames: default_min_valid_frames(),
            max_lost_frames: default_max_lost_frames(),
            track_len: default_track_len(),
            sfo_correct_period: default_sfo_period(),
            sfo_ema: default_sfo_ema(),
            correlator: default_correlator(),
            find: default_find_detector(),
            track: default_track_detector(),
            cfo: CfoConfig::default(),
            sss: SssConfig::default(),
        }
    }
}

/// Channel estimation
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChestConfig {
    /// Estimation algorithm
    #[serde(default = "default_chest_algorithm")]
    pub algorithm: ChestAlgorithm,
    /// Noise estimation algorithm
    #[serde(default = "default_noise_algorithm")]
    pub noise: NoiseAlgorithm,
    /// Estimate the residual CFO from the pilots
    #[serde(default = "default_true")]
    pub cfo_estimate: bool,
    /// Frequency smoothing of the pilot estimates
    #[serde(default)]
    pub filter: SmoothingFilter,
    /// Estimate the timing error from the pilot phase slope
    #[serde(default)]
    pub sync_error: bool,
}

fn default_chest_algorithm() -> ChestAlgorithm {
    ChestAlgorithm::Interpolate
}

fn default_noise_algorithm() -> NoiseAlgorithm {
    NoiseAlgorithm::Refs
}

impl Default for ChestConfig {
    fn default() -> Self {
        Self {
            algorithm: default_chest_algorithm(),
            noise: default_noise_algorithm(),
            cfo_estimate: true,
            filter: SmoothingFilter::None,
            sync_error: false,
        }
    }
}

/// Automatic gain control
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgcConfig {
    #[serde(default)]
    pub enable: bool,
    /// Tracked subframes between gain updates
    #[serde(default = "default_agc_period")]
    pub period: u32,
    /// Target average sample power in dB
    #[serde(default = "default_agc_target")]
    pub target_power_db: f32,
    /// Initial receive gain in dB
    #[serde(default = "default_agc_initial")]
    pub initial_gain_db: f32,
    #[serde(default)]
    pub min_gain_db: f32,
    #[serde(default = "default_agc_max")]
    pub max_gain_db: f32,
    /// Smoothing coefficient of the measured power
    #[serde(default = "default_agc_alpha")]
    pub ema_alpha: f32,
}

fn default_agc_period() -> u32 {
    10
}

fn default_agc_target() -> f32 {
    -20.0
}

fn default_agc_initial() -> f32 {
    40.0
}

fn default_agc_max() -> f32 {
    90.0
}

fn default_agc_alpha() -> f32 {
    0.5
}

impl Default for AgcConfig {
    fn default() -> Self {
        Self {
            enable: false,
            period: default_agc_period(),
            target_power_db: default_agc_target(),
            initial_gain_db: default_agc_initial(),
            min_gain_db: 0.0,
            max_gain_db: default_agc_max(),
            ema_alpha: default_agc_alpha(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Include the event target in log lines
    #[serde(default)]
    pub with_target: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: false,
        }
    }
}

fn check_alpha(name: &str, alpha: f32) -> Result<(), PhyError> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(PhyError::InvalidConfiguration(format!(
            "{} must be within [0, 1], got {}",
            name, alpha
        )));
    }
    Ok(())
}

impl PhyConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(contents: &str) -> Result<Self, PhyError> {
        let config: PhyConfig = serde_yaml::from_str(contents)
            .map_err(|e| PhyError::InvalidConfiguration(format!("YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from YAML file
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: PhyConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// FFT size for the configured bandwidth
    pub fn fft_size(&self) -> Result<usize, PhyError> {
        symbol_sz(self.cell.nof_prb).ok_or_else(|| {
            PhyError::InvalidConfiguration(format!("unsupported bandwidth of {} PRB", self.cell.nof_prb))
        })
    }

    /// Known cell identity, if the search is restricted to one
    pub fn cell_identity(&self) -> Result<Option<CellIdentity>, PhyError> {
        match self.cell.cell_id {
            None => Ok(None),
            Some(pci) => CellIdentity::from_pci(pci)
                .map(Some)
                .ok_or_else(|| PhyError::InvalidConfiguration(format!("invalid cell id {}", pci))),
        }
    }

    /// Check ranges and cross-field consistency
    pub fn validate(&self) -> Result<(), PhyError> {
        let cell = &self.cell;
        if cell.nof_prb < 6 || cell.nof_prb > MAX_PRB {
            return Err(PhyError::InvalidConfiguration(format!(
                "nof_prb must be within 6..={}, got {}",
                MAX_PRB, cell.nof_prb
            )));
        }
        let fft_size = self.fft_size()?;
        if cell.nof_rx_antennas == 0 || cell.nof_rx_antennas > MAX_CHANNELS {
            return Err(PhyError::InvalidConfiguration(format!(
                "nof_rx_antennas must be within 1..={}, got {}",
                MAX_CHANNELS, cell.nof_rx_antennas
            )));
        }
        self.cell_identity()?;

        let sync = &self.sync;
        if sync.search_subframes == 0 {
            return Err(PhyError::InvalidConfiguration("search_subframes must be positive".to_string()));
        }
        if sync.search_subframes < 5 {
            warn!(
                "Search window of {} subframes may not contain a PSS",
                sync.search_subframes
            );
        }
        if sync.min_valid_frames == 0 || sync.max_lost_frames == 0 {
            return Err(PhyError::InvalidConfiguration(
                "min_valid_frames and max_lost_frames must be positive".to_string(),
            ));
        }
        let max_track = common::types::sf_len(fft_size) / 2;
        if sync.track_len < 2 || sync.track_len > max_track {
            return Err(PhyError::InvalidConfiguration(format!(
                "track_len must be within 2..={}, got {}",
                max_track, sync.track_len
            )));
        }
        check_alpha("sfo_ema", sync.sfo_ema)?;
        check_alpha("find.correlation_alpha", sync.find.correlation_alpha)?;
        check_alpha("track.correlation_alpha", sync.track.correlation_alpha)?;
        check_alpha("cfo.ema_alpha", sync.cfo.ema_alpha)?;
        check_alpha("cfo.pss_loop_bw", sync.cfo.pss_loop_bw)?;
        check_alpha("cfo.ref_loop_bw", sync.cfo.ref_loop_bw)?;
        if sync.find.threshold < 0.0 || sync.track.threshold < 0.0 {
            return Err(PhyError::InvalidConfiguration("peak thresholds must be non-negative".to_string()));
        }
        if sync.cfo.integer_range as usize >= fft_size / 2 {
            return Err(PhyError::InvalidConfiguration(format!(
                "integer CFO range {} too large for FFT size {}",
                sync.cfo.integer_range, fft_size
            )));
        }
        if sync.cfo.cp_nsymbols == Some(0) {
            return Err(PhyError::InvalidConfiguration("cp_nsymbols must be positive".to_string()));
        }
        for (name, decimation) in [("find", sync.find.decimation), ("track", sync.track.decimation)] {
            if decimation == 0 || fft_size % decimation != 0 || fft_size / decimation < SYNC_SEQ_LEN + 2 {
                return Err(PhyError::InvalidConfiguration(format!(
                    "{}.decimation {} not supported with FFT size {}",
                    name, decimation, fft_size
                )));
            }
        }
        if sync.sss.partial_segments == 0 || sync.sss.partial_segments > 31 {
            return Err(PhyError::InvalidConfiguration(format!(
                "SSS partial segments must be within 1..=31, got {}",
                sync.sss.partial_segments
            )));
        }

        self.chest.filter.validate()?;

        let agc = &self.agc;
        check_alpha("agc.ema_alpha", agc.ema_alpha)?;
        if agc.min_gain_db > agc.max_gain_db {
            return Err(PhyError::InvalidConfiguration(format!(
                "AGC gain range {}..{} dB is empty",
                agc.min_gain_db, agc.max_gain_db
            )));
        }
        if agc.enable && agc.period == 0 {
            return Err(PhyError::InvalidConfiguration("agc.period must be positive".to_string()));
        }
        Ok(())
    }
}
