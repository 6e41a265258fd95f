//! Secondary Synchronization Signal
//!
//! Implements SSS generation according to 3GPP TS 36.211 Section 6.11.2 and
//! its detection. The SSS interleaves two length-31 m-sequences selected by
//! the pair (m0, m1), scrambled by sequences depending on N_id_2; the order
//! of the two halves differs between subframe 0 and subframe 5, which
//! resolves the half-frame boundary.

use crate::PhyError;
use common::types::{CellIdentity, SYNC_SEQ_LEN};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Length of each SSS half
pub const SSS_HALF_LEN: usize = SYNC_SEQ_LEN / 2;

/// Number of N_id_1 values
pub const NOF_N_ID_1: usize = CellIdentity::MAX_N_ID_1 as usize + 1;

/// Default number of segments of the partial correlation
pub const DEFAULT_PARTIAL_SEGMENTS: usize = 3;

/// Default minimum best-to-second-best correlation ratio
pub const DEFAULT_MIN_SEPARATION: f32 = 1.2;

/// SSS detection algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SssAlgorithm {
    /// Coherent correlation over each full 31-element half
    Full,
    /// Non-coherent sum of coherent correlations over short segments,
    /// robust against residual frequency offset
    Partial,
    /// Correlation of consecutive-element products, insensitive to a
    /// linear phase across the sequence
    Differential,
}

/// Result of a successful SSS detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SssDetection {
    /// Cell identity group
    pub n_id_1: u16,
    /// Subframe carrying the detected SSS (0 or 5)
    pub sf_idx: u32,
    /// First m-sequence index
    pub m0: usize,
    /// Second m-sequence index
    pub m1: usize,
    /// Correlation score normalized to the received energy
    pub score: f32,
}

/// Length-31 sequence `1 - 2x(i)` from `x(i+5) = sum of taps`, x = [0,0,0,0,1]
fn m_sequence(taps: &[usize]) -> [f32; SSS_HALF_LEN] {
    let mut x = [0u8; SSS_HALF_LEN];
    x[4] = 1;
    for i in 0..SSS_HALF_LEN - 5 {
        x[i + 5] = taps.iter().fold(0, |acc, &t| acc ^ x[i + t]);
    }
    let mut out = [0.0; SSS_HALF_LEN];
    for (o, b) in out.iter_mut().zip(&x) {
        *o = 1.0 - 2.0 * *b as f32;
    }
    out
}

/// (m0, m1) for an N_id_1 value
pub fn m0_m1(n_id_1: u16) -> (usize, usize) {
    let n = n_id_1 as usize;
    let q_prime = n / 30;
    let q = (n + q_prime * (q_prime + 1) / 2) / 30;
    let m_prime = n + q * (q + 1) / 2;
    let m0 = m_prime % 31;
    let m1 = (m0 + m_prime / 31 + 1) % 31;
    (m0, m1)
}

/// Base sequences shared by generation and detection
#[derive(Debug, Clone)]
pub struct SssTables {
    /// s~(n)
    s: [f32; SSS_HALF_LEN],
    /// c~(n)
    c: [f32; SSS_HALF_LEN],
    /// z~(n)
    z: [f32; SSS_HALF_LEN],
    /// N_id_1 by (m0, m1)
    n_id_1: [[Option<u16>; SSS_HALF_LEN]; SSS_HALF_LEN],
}

impl SssTables {
    /// Build the tables
    pub fn new() -> Self {
        let mut n_id_1 = [[None; SSS_HALF_LEN]; SSS_HALF_LEN];
        for n in 0..NOF_N_ID_1 as u16 {
            let (m0, m1) = m0_m1(n);
            n_id_1[m0][m1] = Some(n);
        }
        Self {
            s: m_sequence(&[2, 0]),
            c: m_sequence(&[3, 0]),
            z: m_sequence(&[4, 2, 1, 0]),
            n_id_1,
        }
    }

    /// s_m(n) = s~((n + m) mod 31)
    fn s_m(&self, m: usize, n: usize) -> f32 {
        self.s[(n + m) % SSS_HALF_LEN]
    }

    /// c0(n) = c~((n + N_id_2) mod 31)
    fn c0(&self, n_id_2: u8, n: usize) -> f32 {
        self.c[(n + n_id_2 as usize) % SSS_HALF_LEN]
    }

    /// c1(n) = c~((n + N_id_2 + 3) mod 31)
    fn c1(&self, n_id_2: u8, n: usize) -> f32 {
        self.c[(n + n_id_2 as usize + 3) % SSS_HALF_LEN]
    }

    /// z1_m(n) = z~((n + (m mod 8)) mod 31)
    fn z1(&self, m: usize, n: usize) -> f32 {
        self.z[(n + m % 8) % SSS_HALF_LEN]
    }

    /// N_id_1 for an (m0, m1) pair, if the pair is valid
    pub fn lookup(&self, m0: usize, m1: usize) -> Option<u16> {
        self.n_id_1.get(m0)?.get(m1).copied().flatten()
    }

    /// SSS of subframe 0 or 5 as +/-1 values
    pub fn generate(&self, identity: CellIdentity, sf_idx: u32) -> Result<[f32; SYNC_SEQ_LEN], PhyError> {
        if identity.n_id_1 > CellIdentity::MAX_N_ID_1 || identity.n_id_2 > CellIdentity::MAX_N_ID_2 {
            return Err(PhyError::InvalidConfiguration(format!("invalid cell identity {:?}", identity)));
        }
        let (m0, m1) = m0_m1(identity.n_id_1);
        let (ma, mb) = match sf_idx {
            0 => (m0, m1),
            5 => (m1, m0),
            _ => {
                return Err(PhyError::InvalidConfiguration(format!(
                    "SSS is only sent in subframes 0 and 5, not {}",
                    sf_idx
                )))
            }
        };
        let n_id_2 = identity.n_id_2;
        let mut d = [0.0; SYNC_SEQ_LEN];
        for n in 0..SSS_HALF_LEN {
            d[2 * n] = self.s_m(ma, n) * self.c0(n_id_2, n);
            d[2 * n + 1] = self.s_m(mb, n) * self.c1(n_id_2, n) * self.z1(ma, n);
        }
        Ok(d)
    }
}

impl Default for SssTables {
    fn default() -> Self {
        Self::new()
    }
}

/// SSS detector for one N_id_2
#[derive(Debug, Clone)]
pub struct SssResolver {
    /// Sequence tables
    tables: SssTables,
    /// Sector identity the descrambling sequences depend on
    n_id_2: u8,
    /// Detection algorithm
    algorithm: SssAlgorithm,
    /// Segments of the partial correlation
    partial_segments: usize,
    /// Minimum best-to-second-best ratio
    min_separation: f32,
}

impl SssResolver {
    /// Create a resolver for the given N_id_2
    pub fn new(n_id_2: u8, algorithm: SssAlgorithm) -> Result<Self, PhyError> {
        if n_id_2 > CellIdentity::MAX_N_ID_2 {
            return Err(PhyError::InvalidConfiguration(format!("invalid N_id_2 {}", n_id_2)));
        }
        Ok(Self {
            tables: SssTables::new(),
            n_id_2,
            algorithm,
            partial_segments: DEFAULT_PARTIAL_SEGMENTS,
            min_separation: DEFAULT_MIN_SEPARATION,
        })
    }

    /// Change the N_id_2 the descrambling depends on
    pub fn set_n_id_2(&mut self, n_id_2: u8) -> Result<(), PhyError> {
        if n_id_2 > CellIdentity::MAX_N_ID_2 {
            return Err(PhyError::InvalidConfiguration(format!("invalid N_id_2 {}", n_id_2)));
        }
        self.n_id_2 = n_id_2;
        Ok(())
    }

    pub fn n_id_2(&self) -> u8 {
        self.n_id_2
    }

    pub fn set_algorithm(&mut self, algorithm: SssAlgorithm) {
        self.algorithm = algorithm;
    }

    pub fn algorithm(&self) -> SssAlgorithm {
        self.algorithm
    }

    /// Set the number of partial correlation segments (1..=31)
    pub fn set_partial_segments(&mut self, segments: usize) -> Result<(), PhyError> {
        if segments == 0 || segments > SSS_HALF_LEN {
            return Err(PhyError::InvalidConfiguration(format!(
                "invalid number of SSS segments {}",
                segments
            )));
        }
        self.partial_segments = segments;
        Ok(())
    }

    pub fn set_min_separation(&mut self, ratio: f32) {
        self.min_separation = ratio;
    }

    /// Shared sequence tables
    pub fn tables(&self) -> &SssTables {
        &self.tables
    }

    /// Resolve N_id_1 and the half-frame from the 62 SSS subcarriers.
    ///
    /// Returns `None` when either half does not stand out clearly from its
    /// second-best candidate, or when the pair is not a valid N_id_1.
    pub fn resolve(&self, sss: &[Complex32]) -> Result<Option<SssDetection>, PhyError> {
        crate::check_len("SSS input", SYNC_SEQ_LEN, sss.len())?;
        let energy: f32 = sss.iter().map(|v| v.norm_sqr()).sum();
        if energy <= 0.0 {
            return Ok(None);
        }

        let mut y = [Complex32::new(0.0, 0.0); SSS_HALF_LEN];
        for (n, v) in y.iter_mut().enumerate() {
            *v = sss[2 * n] * self.tables.c0(self.n_id_2, n);
        }
        let Some((ma, best_a)) = self.best_shift(&y, "even") else {
            return Ok(None);
        };

        for (n, v) in y.iter_mut().enumerate() {
            *v = sss[2 * n + 1] * self.tables.c1(self.n_id_2, n) * self.tables.z1(ma, n);
        }
        let Some((mb, best_b)) = self.best_shift(&y, "odd") else {
            return Ok(None);
        };

        let (m0, m1, sf_idx) = if ma < mb { (ma, mb, 0) } else { (mb, ma, 5) };
        let Some(n_id_1) = self.tables.lookup(m0, m1) else {
            trace!("SSS pair ({}, {}) is not a valid N_id_1", m0, m1);
            return Ok(None);
        };

        let score = (best_a + best_b) / (SSS_HALF_LEN as f32 * energy);
        debug!(
            "SSS N_id_2={}: m0={} m1={} -> N_id_1={} sf_idx={} score={:.3}",
            self.n_id_2, m0, m1, n_id_1, sf_idx, score
        );
        Ok(Some(SssDetection {
            n_id_1,
            sf_idx,
            m0,
            m1,
            score,
        }))
    }

    /// Verify a known N_id_1 and resolve only the half-frame by comparing
    /// the subframe 0 and subframe 5 hypotheses
    pub fn resolve_known(&self, sss: &[Complex32], n_id_1: u16) -> Result<Option<SssDetection>, PhyError> {
        crate::check_len("SSS input", SYNC_SEQ_LEN, sss.len())?;
        let identity = CellIdentity::new(n_id_1, self.n_id_2)
            .ok_or_else(|| PhyError::InvalidConfiguration(format!("invalid N_id_1 {}", n_id_1)))?;
        let energy: f32 = sss.iter().map(|v| v.norm_sqr()).sum();
        if energy <= 0.0 {
            return Ok(None);
        }

        let corr = |d: &[f32; SYNC_SEQ_LEN]| -> f32 {
            let c: Complex32 = sss.iter().zip(d).map(|(y, s)| *y * *s).sum();
            c.norm_sqr()
        };
        let c0 = corr(&self.tables.generate(identity, 0)?);
        let c5 = corr(&self.tables.generate(identity, 5)?);
        let (sf_idx, best, other) = if c0 >= c5 { (0, c0, c5) } else { (5, c5, c0) };
        if !self.separated(best, other) {
            trace!("Known N_id_1={}: sf0 {:.3e} vs sf5 {:.3e} not separated", n_id_1, c0, c5);
            return Ok(None);
        }

        let (m0, m1) = m0_m1(n_id_1);
        Ok(Some(SssDetection {
            n_id_1,
            sf_idx,
            m0,
            m1,
            score: best / (SYNC_SEQ_LEN as f32 * energy),
        }))
    }

    fn separated(&self, best: f32, second: f32) -> bool {
        best > 0.0 && (second <= 0.0 || best / second >= self.min_separation)
    }

    /// Best cyclic shift of `s~` for a descrambled half and its correlation
    /// power, if it passes the separation check
    fn best_shift(&self, y: &[Complex32; SSS_HALF_LEN], half: &str) -> Option<(usize, f32)> {
        let mut corr = [0.0f32; SSS_HALF_LEN];
        for (m, c) in corr.iter_mut().enumerate() {
            *c = self.correlate_shift(y, m);
        }

        let mut best = (0, f32::MIN);
        for (m, &c) in corr.iter().enumerate() {
            if c > best.1 {
                best = (m, c);
            }
        }
        let second = corr
            .iter()
            .enumerate()
            .filter(|(m, _)| *m != best.0)
            .map(|(_, &c)| c)
            .fold(0.0f32, f32::max);

        if !self.separated(best.1, second) {
            trace!(
                "SSS {} half: best m={} {:.3e}, second {:.3e}, below separation {:.2}",
                half,
                best.0,
                best.1,
                second,
                self.min_separation
            );
            return None;
        }
        Some(best)
    }

    fn correlate_shift(&self, y: &[Complex32; SSS_HALF_LEN], m: usize) -> f32 {
        match self.algorithm {
            SssAlgorithm::Full => {
                let c: Complex32 = y.iter().enumerate().map(|(n, v)| *v * self.tables.s_m(m, n)).sum();
                c.norm_sqr()
            }
            SssAlgorithm::Partial => {
                let seg = SSS_HALF_LEN / self.partial_segments;
                let mut total = 0.0;
                for k in 0..self.partial_segments {
                    let start = k * seg;
                    // The last segment absorbs the remainder
                    let end = if k + 1 == self.partial_segments { SSS_HALF_LEN } else { start + seg };
                    let c: Complex32 = (start..end).map(|n| y[n] * self.tables.s_m(m, n)).sum();
                    total += c.norm_sqr();
                }
                total
            }
            SssAlgorithm::Differential => {
                let c: Complex32 = (0..SSS_HALF_LEN - 1)
                    .map(|n| y[n] * y[n + 1].conj() * (self.tables.s_m(m, n) * self.tables.s_m(m, n + 1)))
                    .sum();
                c.norm()
            }
        }
    }
}
