//! Downlink Channel Estimation
//!
//! Estimates the channel of every (port, receive antenna) pair from the
//! cell-specific reference signals of one subframe, together with the
//! noise power and the RSRP/RSSI/RSRQ/SNR quality metrics.
//!
//! The estimator only knows about a cell after [`ChannelEstimator::set_cell`];
//! estimates for an unresolved cell are refused.

pub mod extract;
pub mod interp;
pub mod noise;
pub mod refsignal;
pub mod smooth;

use crate::config::ChestConfig;
use crate::resource_grid::{ResourceGrid, SYNC_GUARD_LEN};
use crate::sync::cfo::wrap_phase;
use crate::sync::pss::generate_pss;
use crate::{alloc_cf, alloc_filled, PhyError};
use common::types::{Cell, CyclicPrefix, SYNC_SEQ_LEN};
use common::utils::pow_to_db;
use ndarray::Array2;
use num_complex::Complex32;
use refsignal::CellRefSignal;
use serde::{Deserialize, Serialize};
use smooth::SmoothingFilter;
use std::f32::consts::PI;
use tracing::{debug, trace};

/// Time between pilot symbols one slot apart, in seconds
const SLOT_DURATION_S: f32 = 0.5e-3;

/// Subcarriers between the pilots of one pilot symbol
const PILOT_SPACING: usize = 6;

/// Channel estimation algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChestAlgorithm {
    /// Linear interpolation in frequency, then in time within each slot
    Interpolate,
    /// Pilots averaged over the subframe, one estimate for all symbols
    Average,
}

/// Noise estimation algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseAlgorithm {
    /// Residual of the pilots around their neighbours
    Refs,
    /// Residual of the PSS against the channel estimate
    Pss,
    /// Power of the reserved subcarriers next to the PSS
    Empty,
}

/// Channel estimates and quality metrics of one subframe
#[derive(Debug, Clone)]
pub struct ChestResult {
    nof_ports: usize,
    nof_rx: usize,
    nof_prb: u32,
    cp: CyclicPrefix,
    /// Estimates per port and antenna, `[symbol, subcarrier]`
    ce: Vec<Array2<Complex32>>,
    /// Pilot power per port and antenna
    rsrp: Vec<f32>,
    /// Received power per antenna
    rssi: Vec<f32>,
    /// Noise power per antenna
    noise: Vec<f32>,
    /// Residual CFO from the pilots in Hz
    cfo_hz: f32,
    /// Timing error from the pilot phase slope, in samples
    sync_error: Option<f32>,
}

impl ChestResult {
    /// Allocate estimates for `cell` received on `nof_rx` antennas
    pub fn new(cell: &Cell, nof_rx: usize) -> Result<Self, PhyError> {
        if nof_rx == 0 {
            return Err(PhyError::InvalidConfiguration("no receive antennas".to_string()));
        }
        let nof_ports = cell.nof_ports.count();
        let shape = (cell.nof_symbols(), cell.nof_re());
        let mut ce = Vec::with_capacity(nof_ports * nof_rx);
        for _ in 0..nof_ports * nof_rx {
            let data = alloc_cf(shape.0 * shape.1)?;
            ce.push(
                Array2::from_shape_vec(shape, data)
                    .map_err(|e| PhyError::ProcessingError(format!("estimate shape: {}", e)))?,
            );
        }
        Ok(Self {
            nof_ports,
            nof_rx,
            nof_prb: cell.nof_prb,
            cp: cell.cp,
            ce,
            rsrp: alloc_filled(nof_ports * nof_rx, 0.0)?,
            rssi: alloc_filled(nof_rx, 0.0)?,
            noise: alloc_filled(nof_rx, 0.0)?,
            cfo_hz: 0.0,
            sync_error: None,
        })
    }

    pub fn nof_ports(&self) -> usize {
        self.nof_ports
    }

    pub fn nof_rx(&self) -> usize {
        self.nof_rx
    }

    /// Channel estimate of `port` seen by antenna `rx`
    pub fn ce(&self, port: usize, rx: usize) -> &Array2<Complex32> {
        &self.ce[port * self.nof_rx + rx]
    }

    /// RSRP of `port` on antenna `rx`
    pub fn rsrp(&self, port: usize, rx: usize) -> f32 {
        self.rsrp[port * self.nof_rx + rx]
    }

    /// RSRP averaged over ports and antennas
    pub fn rsrp_avg(&self) -> f32 {
        self.rsrp.iter().sum::<f32>() / self.rsrp.len() as f32
    }

    pub fn rssi(&self, rx: usize) -> f32 {
        self.rssi[rx]
    }

    pub fn rssi_avg(&self) -> f32 {
        self.rssi.iter().sum::<f32>() / self.nof_rx as f32
    }

    /// `nof_prb * RSRP / RSSI`
    pub fn rsrq_avg(&self) -> f32 {
        let rssi = self.rssi_avg();
        if rssi > 0.0 {
            self.nof_prb as f32 * self.rsrp_avg() / rssi
        } else {
            0.0
        }
    }

    /// Noise power on antenna `rx`
    pub fn noise(&self, rx: usize) -> f32 {
        self.noise[rx]
    }

    pub fn noise_avg(&self) -> f32 {
        self.noise.iter().sum::<f32>() / self.nof_rx as f32
    }

    /// `RSRP / noise`, infinite for a noiseless estimate
    pub fn snr(&self) -> f32 {
        let noise = self.noise_avg();
        let rsrp = self.rsrp_avg();
        if noise > 0.0 {
            rsrp / noise
        } else if rsrp > 0.0 {
            f32::INFINITY
        } else {
            0.0
        }
    }

    pub fn rsrp_db(&self) -> f32 {
        pow_to_db(self.rsrp_avg())
    }

    pub fn rsrq_db(&self) -> f32 {
        pow_to_db(self.rsrq_avg())
    }

    pub fn snr_db(&self) -> f32 {
        pow_to_db(self.snr())
    }

    /// Residual CFO from the pilots in Hz
    pub fn cfo_hz(&self) -> f32 {
        self.cfo_hz
    }

    /// Timing error in samples, positive when the FFT window starts early
    /// relative to the received symbols; `None` unless enabled
    pub fn sync_error(&self) -> Option<f32> {
        self.sync_error
    }

    fn matches(&self, cell: &Cell) -> bool {
        self.nof_ports == cell.nof_ports.count() && self.nof_prb == cell.nof_prb && self.cp == cell.cp
    }
}

/// Cell-specific reference signal channel estimator
pub struct ChannelEstimator {
    config: ChestConfig,
    nof_rx: usize,
    /// Pilot descriptor of the current cell
    crs: Option<CellRefSignal>,
    /// PSS of the current cell
    pss: [Complex32; SYNC_SEQ_LEN],
    /// Received pilots of one port
    received: Vec<Complex32>,
    /// Raw estimates of one port
    ls: Vec<Complex32>,
    /// Smoothing taps, a single tap when smoothing is off
    taps: Vec<f32>,
    /// Smoothed estimates of one port
    smoothed: Vec<Complex32>,
    /// FFT size of the current cell
    fft_size: usize,
    /// Pilot-residual noise sum and count per antenna
    refs_noise: Vec<(f32, usize)>,
    /// Noise kept between synchronization subframes
    noise_prev: Vec<f32>,
}

impl ChannelEstimator {
    /// Create an estimator for `nof_rx` antennas; call `set_cell` before use
    pub fn new(config: &ChestConfig, nof_rx: usize) -> Result<Self, PhyError> {
        if nof_rx == 0 || nof_rx > interfaces::MAX_CHANNELS {
            return Err(PhyError::InvalidConfiguration(format!(
                "invalid number of receive antennas {}",
                nof_rx
            )));
        }
        config.filter.validate()?;
        Ok(Self {
            config: config.clone(),
            nof_rx,
            crs: None,
            pss: [Complex32::new(0.0, 0.0); SYNC_SEQ_LEN],
            received: Vec::new(),
            ls: Vec::new(),
            taps: config.filter.taps(),
            smoothed: Vec::new(),
            fft_size: 0,
            refs_noise: alloc_filled(nof_rx, (0.0, 0))?,
            noise_prev: alloc_filled(nof_rx, 0.0)?,
        })
    }

    /// Regenerate the pilots for a newly resolved cell
    pub fn set_cell(&mut self, cell: &Cell) -> Result<(), PhyError> {
        if self.crs.as_ref().map(|crs| crs.cell()) == Some(cell) {
            return Ok(());
        }
        let fft_size = cell
            .fft_size()
            .ok_or_else(|| PhyError::InvalidConfiguration(format!("unsupported bandwidth of {} PRB", cell.nof_prb)))?;
        let crs = CellRefSignal::new(cell)?;
        let max_refs = crs.nof_refs_sf(0);
        self.received = alloc_cf(max_refs)?;
        self.ls = alloc_cf(max_refs)?;
        self.smoothed = alloc_cf(max_refs)?;
        self.fft_size = fft_size;
        self.pss = generate_pss(cell.identity.n_id_2)?;
        self.noise_prev.fill(0.0);
        self.crs = Some(crs);
        debug!(
            "Channel estimator set to cell {} ({:?}, {:?} noise)",
            cell.identity, self.config.algorithm, self.config.noise
        );
        Ok(())
    }

    /// Forget the cell
    pub fn clear_cell(&mut self) {
        self.crs = None;
    }

    pub fn cell(&self) -> Option<&Cell> {
        self.crs.as_ref().map(|crs| crs.cell())
    }

    pub fn set_algorithm(&mut self, algorithm: ChestAlgorithm) {
        self.config.algorithm = algorithm;
    }

    pub fn set_noise_algorithm(&mut self, noise: NoiseAlgorithm) {
        self.config.noise = noise;
    }

    /// Change the pilot smoothing filter
    pub fn set_filter(&mut self, filter: SmoothingFilter) -> Result<(), PhyError> {
        filter.validate()?;
        self.taps = filter.taps();
        self.config.filter = filter;
        Ok(())
    }

    /// Estimate the channel of subframe `sf_idx` from one grid per antenna
    pub fn estimate(&mut self, grids: &[ResourceGrid], sf_idx: u32, result: &mut ChestResult) -> Result<(), PhyError> {
        let crs = self
            .crs
            .as_ref()
            .ok_or(PhyError::NotInitialized("channel estimator cell"))?;
        let cell = *crs.cell();
        crate::check_len("receive grids", self.nof_rx, grids.len())?;
        if !result.matches(&cell) || result.nof_rx != self.nof_rx {
            return Err(PhyError::SizeMismatch {
                context: "channel estimate",
                expected: cell.nof_ports.count() * self.nof_rx,
                actual: result.ce.len(),
            });
        }

        let nref = crs.nof_refs();
        let nof_ports = cell.nof_ports.count();
        let mut cfo_corr = Complex32::new(0.0, 0.0);
        let mut sync_corr = Complex32::new(0.0, 0.0);
        self.refs_noise.fill((0.0, 0));

        for (rx, grid) in grids.iter().enumerate() {
            for port in 0..nof_ports {
                let nsym = refsignal::nof_symbols(port);
                let len = nref * nsym;
                let received = &mut self.received[..len];
                crs.get_sf(port, grid, received)?;
                extract::ls_estimate(received, crs.pilots(port, sf_idx), &mut self.ls[..len])?;
                let ls = &self.ls[..len];

                result.rsrp[port * self.nof_rx + rx] =
                    received.iter().map(|v| v.norm_sqr()).sum::<f32>() / len as f32;

                if let Some(noise) = noise::noise_refs(ls, nref, nsym) {
                    self.refs_noise[rx].0 += noise;
                    self.refs_noise[rx].1 += 1;
                }

                // Pilot symbols m and m + 2 share subcarriers one slot apart
                if self.config.cfo_estimate && port < 2 {
                    for m in 0..nsym - 2 {
                        let a = &ls[m * nref..(m + 1) * nref];
                        let b = &ls[(m + 2) * nref..(m + 3) * nref];
                        cfo_corr += a.iter().zip(b).map(|(x, y)| x * y.conj()).sum::<Complex32>();
                    }
                }

                // A timing error rotates neighbouring pilots by a constant phase
                if self.config.sync_error {
                    for pilots in ls.chunks_exact(nref) {
                        sync_corr += pilots.windows(2).map(|w| w[1] * w[0].conj()).sum::<Complex32>();
                    }
                }

                let estimates = if self.taps.len() > 1 {
                    for (raw, out) in ls.chunks_exact(nref).zip(self.smoothed[..len].chunks_exact_mut(nref)) {
                        smooth::smooth(raw, &self.taps, out);
                    }
                    &self.smoothed[..len]
                } else {
                    ls
                };

                let ce = &mut result.ce[port * self.nof_rx + rx];
                match self.config.algorithm {
                    ChestAlgorithm::Interpolate => interpolate_port(crs, port, estimates, ce),
                    ChestAlgorithm::Average => average_port(crs, port, estimates, ce)?,
                }
            }

            // RSSI over the pilot symbols of port 0
            let nsym = refsignal::nof_symbols(0);
            result.rssi[rx] = (0..nsym)
                .map(|m| grid.symbol_energy(crs.symbol(0, m)))
                .sum::<f32>()
                / nsym as f32;
        }

        let duplex = cell.duplex;
        let sync_sf = duplex.is_pss_subframe(sf_idx % 10);
        for (rx, grid) in grids.iter().enumerate() {
            let estimate = match self.config.noise {
                NoiseAlgorithm::Refs => {
                    let (sum, count) = self.refs_noise[rx];
                    (count > 0).then(|| sum / count as f32)
                }
                NoiseAlgorithm::Pss if sync_sf => {
                    let l = duplex.pss_symbol(cell.cp);
                    let received = grid.extract_sync(l);
                    let ce = result.ce(0, rx);
                    let mut h = [Complex32::new(0.0, 0.0); SYNC_SEQ_LEN];
                    for (i, v) in h.iter_mut().enumerate() {
                        *v = ce[(l, grid.sync_subcarrier(i))];
                    }
                    noise::noise_known(&received, &self.pss, &h)
                }
                NoiseAlgorithm::Empty if sync_sf => {
                    let l = duplex.pss_symbol(cell.cp);
                    let row = grid.symbol(l);
                    let mut guards = [Complex32::new(0.0, 0.0); 2 * SYNC_GUARD_LEN];
                    for (g, k) in guards.iter_mut().zip(grid.sync_guard_subcarriers()) {
                        *g = row[k];
                    }
                    noise::noise_empty(&guards)
                }
                _ => None,
            };
            if let Some(noise) = estimate {
                self.noise_prev[rx] = noise;
            }
            result.noise[rx] = self.noise_prev[rx];
        }

        result.cfo_hz = if self.config.cfo_estimate && cfo_corr.norm_sqr() > 0.0 {
            -wrap_phase(cfo_corr.arg()) / (2.0 * PI * SLOT_DURATION_S)
        } else {
            0.0
        };

        result.sync_error = if self.config.sync_error && sync_corr.norm_sqr() > 0.0 {
            let phase = -wrap_phase(sync_corr.arg());
            Some(phase * self.fft_size as f32 / (2.0 * PI * PILOT_SPACING as f32))
        } else {
            None
        };

        trace!(
            "sf {}: RSRP {:.1} dB, RSRQ {:.1} dB, SNR {:.1} dB, CFO {:.1} Hz",
            sf_idx,
            result.rsrp_db(),
            result.rsrq_db(),
            result.snr_db(),
            result.cfo_hz
        );
        Ok(())
    }
}

/// Frequency interpolation of every pilot symbol, then time interpolation per slot
fn interpolate_port(crs: &CellRefSignal, port: usize, ls: &[Complex32], ce: &mut Array2<Complex32>) {
    let nref = crs.nof_refs();
    let nsym = refsignal::nof_symbols(port);
    let mut symbols = Vec::with_capacity(nsym);
    for m in 0..nsym {
        let l = crs.symbol(port, m);
        interp::interpolate_freq(
            &ls[m * nref..(m + 1) * nref],
            crs.first_subcarrier(port, m),
            PILOT_SPACING,
            ce.row_mut(l),
        );
        symbols.push(l);
    }
    let nsymb = crs.cell().cp.symbols_per_slot();
    interp::interpolate_time(ce, &symbols, 0..nsymb);
    interp::interpolate_time(ce, &symbols, nsymb..2 * nsymb);
}

/// Pilots averaged per subcarrier over the subframe, one estimate for all symbols
fn average_port(crs: &CellRefSignal, port: usize, ls: &[Complex32], ce: &mut Array2<Complex32>) -> Result<(), PhyError> {
    let nref = crs.nof_refs();
    let nre = ce.ncols();
    let mut sum = alloc_cf(nre)?;
    let mut count = alloc_filled(nre, 0u32)?;
    for m in 0..refsignal::nof_symbols(port) {
        for i in 0..nref {
            let k = crs.subcarrier(port, m, i);
            sum[k] += ls[m * nref + i];
            count[k] += 1;
        }
    }

    let mut positions = Vec::with_capacity(nre / 3);
    let mut pilots = Vec::with_capacity(nre / 3);
    for (k, (s, c)) in sum.iter().zip(&count).enumerate() {
        if *c > 0 {
            positions.push(k);
            pilots.push(*s / *c as f32);
        }
    }
    let first = positions.first().copied().unwrap_or(0);
    let spacing = match positions.as_slice() {
        [a, b, ..] => b - a,
        _ => PILOT_SPACING,
    };
    interp::interpolate_freq(&pilots, first, spacing, ce.row_mut(0));
    interp::replicate_symbol(ce, 0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::{AntennaPorts, CellIdentity, DuplexMode};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn cell(pci: u16, ports: AntennaPorts, nof_prb: u32) -> Cell {
        Cell {
            identity: CellIdentity::from_pci(pci).unwrap(),
            nof_prb,
            nof_ports: ports,
            cp: CyclicPrefix::Normal,
            duplex: DuplexMode::Fdd,
        }
    }

    /// Grid carrying the pilots of every port through a per-RE channel
    fn received_grid(crs: &CellRefSignal, sf_idx: u32, h: impl Fn(usize, usize) -> Complex32) -> ResourceGrid {
        let c = crs.cell();
        let mut tx = ResourceGrid::new(c.nof_prb, c.cp).unwrap();
        for port in 0..c.nof_ports.count() {
            crs.put_sf(port, sf_idx, &mut tx).unwrap();
        }
        let mut rx = tx.clone();
        for l in 0..rx.nof_symbols() {
            for k in 0..rx.nof_re() {
                let v = tx.get(l, k).unwrap();
                rx.set(l, k, v * h(l, k)).unwrap();
            }
        }
        rx
    }

    fn awgn(rng: &mut StdRng, power: f32) -> Complex32 {
        let u1: f32 = rng.gen_range(1e-9..1.0);
        let u2: f32 = rng.gen();
        Complex32::from_polar((-power * u1.ln()).sqrt(), 2.0 * PI * u2)
    }

    fn estimate_with(config: &ChestConfig, c: &Cell, grid: &ResourceGrid, sf_idx: u32) -> ChestResult {
        let mut chest = ChannelEstimator::new(config, 1).unwrap();
        chest.set_cell(c).unwrap();
        let mut result = ChestResult::new(c, 1).unwrap();
        chest.estimate(std::slice::from_ref(grid), sf_idx, &mut result).unwrap();
        result
    }

    #[test]
    fn test_requires_cell() {
        let c = cell(10, AntennaPorts::One, 6);
        let mut chest = ChannelEstimator::new(&ChestConfig::default(), 1).unwrap();
        let grid = ResourceGrid::new(6, CyclicPrefix::Normal).unwrap();
        let mut result = ChestResult::new(&c, 1).unwrap();
        assert!(matches!(
            chest.estimate(&[grid], 0, &mut result),
            Err(PhyError::NotInitialized(_))
        ));
        assert!(ChannelEstimator::new(&ChestConfig::default(), 0).is_err());
    }

    #[test]
    fn test_flat_channel() {
        let c = cell(17, AntennaPorts::Two, 6);
        let h = Complex32::from_polar(0.7, -0.4);
        let crs = CellRefSignal::new(&c).unwrap();
        let grid = received_grid(&crs, 2, |_, _| h);

        let mut chest = ChannelEstimator::new(&ChestConfig::default(), 1).unwrap();
        chest.set_cell(&c).unwrap();
        let mut result = ChestResult::new(&c, 1).unwrap();
        chest.estimate(&[grid], 2, &mut result).unwrap();

        for port in 0..2 {
            for v in result.ce(port, 0).iter() {
                assert!((v - h).norm() < 1e-5);
            }
            assert!((result.rsrp(port, 0) - 0.49).abs() < 1e-4);
        }
        assert!(result.noise_avg() < 1e-10);
        assert!(result.snr_db() > 60.0);
        assert!(result.cfo_hz().abs() < 1e-3);
        // Pilot symbols carry 24 pilots of power 0.49 over 6 PRB
        assert!((result.rssi_avg() - 24.0 * 0.49).abs() < 1e-3);
        assert!((result.rsrq_avg() - 6.0 / 24.0).abs() < 1e-4);
    }

    #[test]
    fn test_frequency_ramp_with_edges() {
        let c = cell(9, AntennaPorts::One, 6);
        let a = Complex32::new(0.5, 0.1);
        let b = Complex32::new(0.004, -0.003);
        let crs = CellRefSignal::new(&c).unwrap();
        let grid = received_grid(&crs, 4, |_, k| a + b * k as f32);

        let mut chest = ChannelEstimator::new(&ChestConfig::default(), 1).unwrap();
        chest.set_cell(&c).unwrap();
        let mut result = ChestResult::new(&c, 1).unwrap();
        chest.estimate(&[grid], 4, &mut result).unwrap();
        let ce = result.ce(0, 0);
        for l in 0..14 {
            for k in 0..72 {
                assert!((ce[(l, k)] - (a + b * k as f32)).norm() < 1e-4, "l={} k={}", l, k);
            }
        }
    }

    #[test]
    fn test_time_ramp_per_slot() {
        // Gain changing linearly over the subframe is followed exactly
        let c = cell(3, AntennaPorts::One, 6);
        let h = |l: usize, _k: usize| Complex32::new(1.0 + 0.05 * l as f32, 0.02 * l as f32);
        let crs = CellRefSignal::new(&c).unwrap();
        let grid = received_grid(&crs, 1, h);

        let mut chest = ChannelEstimator::new(&ChestConfig::default(), 1).unwrap();
        chest.set_cell(&c).unwrap();
        let mut result = ChestResult::new(&c, 1).unwrap();
        chest.estimate(&[grid], 1, &mut result).unwrap();
        let ce = result.ce(0, 0);
        for l in 0..14 {
            assert!((ce[(l, 30)] - h(l, 30)).norm() < 1e-4, "l={}", l);
        }
    }

    #[test]
    fn test_zero_pilot_stays_finite() {
        let c = cell(0, AntennaPorts::One, 6);
        let crs = CellRefSignal::new(&c).unwrap();
        let mut grid = received_grid(&crs, 0, |_, _| Complex32::new(1.0, 0.0));
        grid.set(0, 6, Complex32::new(0.0, 0.0)).unwrap();

        let mut chest = ChannelEstimator::new(&ChestConfig::default(), 1).unwrap();
        chest.set_cell(&c).unwrap();
        let mut result = ChestResult::new(&c, 1).unwrap();
        chest.estimate(&[grid], 0, &mut result).unwrap();
        let ce = result.ce(0, 0);
        assert!(ce.iter().all(|v| v.re.is_finite() && v.im.is_finite()));
        assert_eq!(ce[(0, 6)], Complex32::new(0.0, 0.0));
        // Pilots two positions away are not disturbed
        assert!((ce[(0, 18)] - Complex32::new(1.0, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn test_average_algorithm() {
        let c = cell(22, AntennaPorts::Four, 6);
        let h = Complex32::new(-0.3, 0.9);
        let crs = CellRefSignal::new(&c).unwrap();
        let grid = received_grid(&crs, 6, |_, _| h);

        let mut config = ChestConfig::default();
        config.algorithm = ChestAlgorithm::Average;
        let mut chest = ChannelEstimator::new(&config, 1).unwrap();
        chest.set_cell(&c).unwrap();
        let mut result = ChestResult::new(&c, 1).unwrap();
        chest.estimate(&[grid], 6, &mut result).unwrap();
        for port in 0..4 {
            assert!(result.ce(port, 0).iter().all(|v| (v - h).norm() < 1e-5));
        }
    }

    #[test]
    fn test_pilot_cfo() {
        let c = cell(5, AntennaPorts::One, 6);
        let cfo_hz = 100.0;
        // Phase advancing with the symbol start time
        let h = |l: usize, _k: usize| {
            let t = CyclicPrefix::Normal.useful_start(l, 128) as f32 / 1.92e6;
            Complex32::from_polar(1.0, 2.0 * PI * cfo_hz * t)
        };
        let crs = CellRefSignal::new(&c).unwrap();
        let grid = received_grid(&crs, 3, h);

        let mut chest = ChannelEstimator::new(&ChestConfig::default(), 1).unwrap();
        chest.set_cell(&c).unwrap();
        let mut result = ChestResult::new(&c, 1).unwrap();
        chest.estimate(&[grid], 3, &mut result).unwrap();
        assert!((result.cfo_hz() - cfo_hz).abs() < 1.0, "CFO {}", result.cfo_hz());
    }

    #[test]
    fn test_pilot_cfo_half_turn_per_slot() {
        // 1 kHz rotates the pilots by pi between slots
        let c = cell(5, AntennaPorts::One, 6);
        let h = |l: usize, _k: usize| {
            let t = CyclicPrefix::Normal.useful_start(l, 128) as f32 / 1.92e6;
            Complex32::from_polar(1.0, 2.0 * PI * 1000.0 * t)
        };
        let crs = CellRefSignal::new(&c).unwrap();
        let grid = received_grid(&crs, 3, h);

        let mut chest = ChannelEstimator::new(&ChestConfig::default(), 1).unwrap();
        chest.set_cell(&c).unwrap();
        let mut result = ChestResult::new(&c, 1).unwrap();
        chest.estimate(&[grid], 3, &mut result).unwrap();
        assert!((result.cfo_hz().abs() - 1000.0).abs() < 1.0, "CFO {}", result.cfo_hz());
    }

    #[test]
    fn test_empty_noise_in_sync_subframes_only() {
        let c = cell(1, AntennaPorts::One, 6);
        let crs = CellRefSignal::new(&c).unwrap();
        let mut grid = received_grid(&crs, 0, |_, _| Complex32::new(1.0, 0.0));
        for k in grid.sync_guard_subcarriers().collect::<Vec<_>>() {
            grid.set(6, k, Complex32::new(0.1, 0.0)).unwrap();
        }

        let mut config = ChestConfig::default();
        config.noise = NoiseAlgorithm::Empty;
        let mut chest = ChannelEstimator::new(&config, 1).unwrap();
        chest.set_cell(&c).unwrap();
        let mut result = ChestResult::new(&c, 1).unwrap();
        chest.estimate(&[grid], 0, &mut result).unwrap();
        assert!((result.noise(0) - 0.01).abs() < 1e-6);

        // Subframe 2 keeps the previous estimate
        let grid = received_grid(&crs, 2, |_, _| Complex32::new(1.0, 0.0));
        chest.estimate(&[grid], 2, &mut result).unwrap();
        assert!((result.noise(0) - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_smoothing_reduces_pilot_noise() {
        let c = cell(12, AntennaPorts::One, 6);
        let h = Complex32::new(0.6, -0.5);
        let crs = CellRefSignal::new(&c).unwrap();
        let mut grid = received_grid(&crs, 2, |_, _| h);
        let mut rng = StdRng::seed_from_u64(11);
        for l in 0..grid.nof_symbols() {
            for k in 0..grid.nof_re() {
                let v = grid.get(l, k).unwrap();
                grid.set(l, k, v + awgn(&mut rng, 0.05)).unwrap();
            }
        }

        let mse = |filter: SmoothingFilter| {
            let config = ChestConfig {
                filter,
                ..ChestConfig::default()
            };
            let result = estimate_with(&config, &c, &grid, 2);
            let ce = result.ce(0, 0);
            ce.iter().map(|v| (v - h).norm_sqr()).sum::<f32>() / ce.len() as f32
        };
        let raw = mse(SmoothingFilter::None);
        let smoothed = mse(SmoothingFilter::Gauss { order: 4, std_dev: 2.0 });
        assert!(smoothed < 0.5 * raw, "raw {} smoothed {}", raw, smoothed);
    }

    #[test]
    fn test_smoothing_keeps_flat_channel() {
        let c = cell(30, AntennaPorts::Two, 6);
        let h = Complex32::from_polar(0.9, 2.1);
        let crs = CellRefSignal::new(&c).unwrap();
        let grid = received_grid(&crs, 7, |_, _| h);
        let config = ChestConfig {
            filter: SmoothingFilter::Triangle { weight: 0.3 },
            ..ChestConfig::default()
        };
        let result = estimate_with(&config, &c, &grid, 7);
        for port in 0..2 {
            assert!(result.ce(port, 0).iter().all(|v| (v - h).norm() < 1e-5));
        }
        assert!(ChannelEstimator::new(
            &ChestConfig {
                filter: SmoothingFilter::Triangle { weight: 0.8 },
                ..ChestConfig::default()
            },
            1
        )
        .is_err());
    }

    #[test]
    fn test_sync_error_from_pilot_slope() {
        // Symbols received two samples late relative to the FFT window
        let c = cell(8, AntennaPorts::Two, 6);
        let tau = 2.0f32;
        let crs = CellRefSignal::new(&c).unwrap();
        let grid = received_grid(&crs, 1, |_, k| {
            Complex32::from_polar(1.0, -2.0 * PI * k as f32 * tau / 128.0)
        });

        let config = ChestConfig {
            sync_error: true,
            ..ChestConfig::default()
        };
        let result = estimate_with(&config, &c, &grid, 1);
        let error = result.sync_error().unwrap();
        assert!((error - tau).abs() < 1e-3, "sync error {}", error);

        let result = estimate_with(&ChestConfig::default(), &c, &grid, 1);
        assert_eq!(result.sync_error(), None);
        let flat = received_grid(&crs, 1, |_, _| Complex32::new(1.0, 0.0));
        let result = estimate_with(&config, &c, &flat, 1);
        assert!(result.sync_error().unwrap().abs() < 1e-4);
    }

    #[test]
    fn test_result_shape_checked() {
        let c = cell(1, AntennaPorts::Two, 6);
        let mut chest = ChannelEstimator::new(&ChestConfig::default(), 1).unwrap();
        chest.set_cell(&c).unwrap();
        let other = cell(1, AntennaPorts::One, 6);
        let mut result = ChestResult::new(&other, 1).unwrap();
        let grid = ResourceGrid::new(6, CyclicPrefix::Normal).unwrap();
        assert!(chest.estimate(&[grid], 0, &mut result).is_err());
    }
}
