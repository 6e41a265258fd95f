//! Carrier frequency offset estimation state and correction
//!
//! Offsets are kept in units of the subcarrier spacing. The integer part
//! comes from shifted PSS replicas; the fractional part is a single running
//! estimate fed by the cyclic-prefix and PSS estimators through an
//! exponential moving average.

use crate::{alloc_cf, PhyError};
use common::types::SUBCARRIER_SPACING_HZ;
use common::utils::ema;
use num_complex::Complex32;
use std::f32::consts::PI;
use std::f64::consts::PI as PI64;
use tracing::trace;

/// PSS-based updates larger than this are treated as outliers once the
/// running estimate is initialized
pub const MAX_PSS_CFO_UPDATE_HZ: f32 = 7000.0;

/// Frequency change, in cycles per sample, below which the cached
/// correction table is reused
pub const CFO_TOLERANCE: f32 = 1e-7;

/// Map a phase into (-pi, pi]; -pi itself maps to pi
pub fn wrap_phase(phase: f32) -> f32 {
    let mut p = phase % (2.0 * PI);
    if p <= -PI {
        p += 2.0 * PI;
    } else if p > PI {
        p -= 2.0 * PI;
    }
    p
}

/// Running carrier frequency offset estimate
#[derive(Debug, Clone)]
pub struct CfoEstimator {
    /// Integer offset in subcarriers found on the last search
    integer: i32,
    /// Running fractional estimate in subcarriers
    fine: f32,
    /// Whether `fine` holds a measurement rather than a seed
    fine_set: bool,
    /// Smoothing coefficient
    ema_alpha: f32,
}

impl CfoEstimator {
    /// Create an estimator with the given smoothing coefficient
    pub fn new(ema_alpha: f32) -> Self {
        Self {
            integer: 0,
            fine: 0.0,
            fine_set: false,
            ema_alpha,
        }
    }

    /// Set the smoothing coefficient
    pub fn set_ema_alpha(&mut self, alpha: f32) {
        self.ema_alpha = alpha;
    }

    /// Restart from `init_hz`; the first measurement afterwards replaces the seed
    pub fn reset(&mut self, init_hz: f32) {
        self.integer = 0;
        self.fine = init_hz / SUBCARRIER_SPACING_HZ;
        self.fine_set = false;
    }

    /// Seed this estimator from another one
    pub fn copy_state(&mut self, other: &CfoEstimator) {
        self.integer = other.integer;
        self.fine = other.fine;
        self.fine_set = false;
    }

    /// Feed a fractional measurement (subcarriers)
    pub fn update(&mut self, measured: f32) {
        if !self.fine_set {
            self.fine = measured;
            self.fine_set = true;
        } else {
            self.fine = ema(measured, self.fine, self.ema_alpha);
        }
        trace!("CFO update: measured {:.4}, mean {:.4}", measured, self.fine);
    }

    /// Feed a fractional measurement derived from a residual offset,
    /// discarding outliers once the estimate is initialized
    pub fn update_gated(&mut self, measured: f32, residual: f32) {
        if self.fine_set && residual.abs() * SUBCARRIER_SPACING_HZ >= MAX_PSS_CFO_UPDATE_HZ {
            trace!("CFO update rejected: residual {:.4}", residual);
            return;
        }
        self.update(measured);
    }

    /// Record the integer offset
    pub fn set_integer(&mut self, integer: i32) {
        self.integer = integer;
    }

    /// Integer offset in subcarriers
    pub fn integer(&self) -> i32 {
        self.integer
    }

    /// Fractional running estimate in subcarriers
    pub fn fine(&self) -> f32 {
        self.fine
    }

    /// Whether a measurement has been folded in since the last reset
    pub fn is_set(&self) -> bool {
        self.fine_set
    }

    /// Total offset in subcarriers
    pub fn total(&self) -> f32 {
        self.integer as f32 + self.fine
    }

    /// Total offset in Hz
    pub fn total_hz(&self) -> f32 {
        self.total() * SUBCARRIER_SPACING_HZ
    }
}

/// Multiplies a signal by `exp(j*2*pi*freq*n)` using a cached phasor table
pub struct CfoCorrector {
    /// Phasor table for `freq`
    table: Vec<Complex32>,
    /// Frequency of the cached table in cycles per sample
    freq: f32,
}

impl CfoCorrector {
    /// Create a corrector for buffers up to `max_len` samples
    pub fn new(max_len: usize) -> Result<Self, PhyError> {
        let mut table = alloc_cf(max_len)?;
        table.fill(Complex32::new(1.0, 0.0));
        Ok(Self { table, freq: 0.0 })
    }

    /// Largest supported buffer
    pub fn max_len(&self) -> usize {
        self.table.len()
    }

    fn prepare(&mut self, freq: f32, len: usize) -> Result<(), PhyError> {
        if len > self.table.len() {
            return Err(PhyError::SizeMismatch {
                context: "CFO corrector",
                expected: self.table.len(),
                actual: len,
            });
        }
        if (freq - self.freq).abs() > CFO_TOLERANCE {
            for (n, v) in self.table.iter_mut().enumerate() {
                let cycles = (freq as f64 * n as f64).fract();
                *v = Complex32::from_polar(1.0, (2.0 * PI64 * cycles) as f32);
            }
            self.freq = freq;
        }
        Ok(())
    }

    /// Write `input * exp(j*2*pi*freq*n)` to `output`
    pub fn correct(&mut self, input: &[Complex32], output: &mut [Complex32], freq: f32) -> Result<(), PhyError> {
        crate::check_len("CFO corrector output", input.len(), output.len())?;
        self.prepare(freq, input.len())?;
        for ((o, i), t) in output.iter_mut().zip(input).zip(&self.table) {
            *o = i * t;
        }
        Ok(())
    }

    /// In-place variant of [`CfoCorrector::correct`]
    pub fn correct_in_place(&mut self, buf: &mut [Complex32], freq: f32) -> Result<(), PhyError> {
        self.prepare(freq, buf.len())?;
        for (v, t) in buf.iter_mut().zip(&self.table) {
            *v *= *t;
        }
        Ok(())
    }
}
