//! Correlation peak detection with threshold policies

use common::utils::argmax;
use serde::{Deserialize, Serialize};
use std::ops::{Range, RangeInclusive};
use tracing::trace;

/// Threshold policy applied to the strongest correlation peak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakPolicy {
    /// Peak value compared against a fixed level
    Absolute,
    /// Peak value divided by the mean of the remaining profile
    PeakToAverage,
    /// Peak value divided by the strongest value outside the main lobe
    PeakToSideLobe,
}

/// Lags searched on either side of a repeated lobe for its maximum
const REPEAT_TOLERANCE: usize = 2;

/// Strongest correlation peak of a profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Index of the peak within the scanned profile
    pub index: usize,
    /// Profile value at the peak
    pub value: f32,
    /// Value the threshold is compared against, per the active policy
    pub metric: f32,
    /// Whether the metric reached the threshold
    pub detected: bool,
}

/// Index and value of the profile maximum; the lowest index wins on ties
pub fn find_peak(profile: &[f32]) -> Option<(usize, f32)> {
    argmax(profile)
}

/// [`find_peak`] restricted to `window`; the index is relative to the
/// start of the profile
pub fn find_peak_in(profile: &[f32], window: Range<usize>) -> Option<(usize, f32)> {
    let end = window.end.min(profile.len());
    let start = window.start.min(end);
    argmax(&profile[start..end]).map(|(i, v)| (start + i, v))
}

/// Peak detector with exactly one active threshold policy
#[derive(Debug, Clone, Copy)]
pub struct PeakDetector {
    /// Active policy
    policy: PeakPolicy,
    /// Detection threshold in the policy's units
    threshold: f32,
    /// Lag at which the main lobe is expected to repeat
    repeat_period: Option<usize>,
}

impl PeakDetector {
    /// Create a peak detector
    pub fn new(policy: PeakPolicy, threshold: f32) -> Self {
        Self {
            policy,
            threshold,
            repeat_period: None,
        }
    }

    /// Treat lobes at multiples of `period` from the peak as repetitions of
    /// the main lobe rather than side lobes
    pub fn set_repeat_period(&mut self, period: Option<usize>) {
        self.repeat_period = period.filter(|&p| p > 0);
    }

    /// Active policy
    pub fn policy(&self) -> PeakPolicy {
        self.policy
    }

    /// Detection threshold
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Change the detection threshold
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    /// Find the strongest peak over the whole profile.
    ///
    /// Returns `None` only for an empty profile. A peak below threshold is
    /// returned with `detected == false`.
    pub fn detect(&self, profile: &[f32]) -> Option<Peak> {
        self.detect_in(profile, 0..profile.len())
    }

    /// Find the strongest peak within `window` of the profile; the returned
    /// index is relative to the start of the profile.
    pub fn detect_in(&self, profile: &[f32], window: Range<usize>) -> Option<Peak> {
        let (index, value) = find_peak_in(profile, window.clone())?;
        // A peak exists, so the window is non-empty and within the profile
        let start = window.start;
        let scanned = &profile[start..window.end.min(profile.len())];
        let rel = index - start;

        let metric = match self.policy {
            PeakPolicy::Absolute => value,
            PeakPolicy::PeakToAverage => peak_to_average(scanned, rel, value),
            PeakPolicy::PeakToSideLobe => peak_to_side_lobe(scanned, rel, value, self.repeat_period),
        };
        let detected = value > 0.0 && metric >= self.threshold;

        trace!(
            "Peak at {} value {:.3e} metric {:.2} ({:?} >= {:.2}: {})",
            start + rel,
            value,
            metric,
            self.policy,
            self.threshold,
            detected
        );

        Some(Peak {
            index: start + rel,
            value,
            metric,
            detected,
        })
    }
}

fn ratio(peak: f32, reference: f32) -> f32 {
    if peak <= 0.0 {
        0.0
    } else if reference <= 0.0 {
        f32::INFINITY
    } else {
        peak / reference
    }
}

fn peak_to_average(profile: &[f32], peak_idx: usize, peak: f32) -> f32 {
    if profile.len() < 2 {
        return ratio(peak, 0.0);
    }
    let rest: f32 = profile.iter().sum::<f32>() - profile[peak_idx];
    ratio(peak, rest / (profile.len() - 1) as f32)
}

/// Lags covered by the lobe around `peak_idx`, found by walking down both
/// flanks
fn lobe(profile: &[f32], peak_idx: usize) -> RangeInclusive<usize> {
    let len = profile.len();
    let mut ub = peak_idx;
    while ub + 1 < len && profile[ub + 1] <= profile[ub] {
        ub += 1;
    }
    let mut lb = peak_idx;
    while lb > 0 && profile[lb - 1] <= profile[lb] {
        lb -= 1;
    }
    lb..=ub
}

/// Compare the peak against the strongest value outside the main lobe and
/// outside its repetitions every `repeat` lags.
fn peak_to_side_lobe(profile: &[f32], peak_idx: usize, peak: f32, repeat: Option<usize>) -> f32 {
    let len = profile.len();
    let mut lobes = vec![lobe(profile, peak_idx)];
    if let Some(period) = repeat {
        let before = (1..).map_while(|k: usize| peak_idx.checked_sub(k * period));
        let after = (1..)
            .map(|k: usize| peak_idx + k * period)
            .take_while(|&centre| centre < len);
        for centre in before.chain(after) {
            let window = centre.saturating_sub(REPEAT_TOLERANCE)..centre + REPEAT_TOLERANCE + 1;
            if let Some((idx, _)) = find_peak_in(profile, window) {
                lobes.push(lobe(profile, idx));
            }
        }
    }

    let side = profile
        .iter()
        .enumerate()
        .filter(|(i, _)| !lobes.iter().any(|l| l.contains(i)))
        .map(|(_, v)| *v)
        .fold(0.0f32, f32::max);
    ratio(peak, side)
}
