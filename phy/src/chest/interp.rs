//! Channel estimate interpolation
//!
//! Frequency first, then time. Both passes fill the gaps between pilots
//! with a straight line and carry the nearest segment's line past the
//! outermost pilots. A slot with a single pilot symbol is replicated flat.

use ndarray::{Array2, ArrayViewMut1};
use num_complex::Complex32;
use std::ops::Range;

/// Fill `out` from pilots at `first + spacing * i`
pub fn interpolate_freq(pilots: &[Complex32], first: usize, spacing: usize, mut out: ArrayViewMut1<'_, Complex32>) {
    match pilots.len() {
        0 => out.fill(Complex32::new(0.0, 0.0)),
        1 => out.fill(pilots[0]),
        n => {
            let spacing = spacing.max(1);
            let inv = 1.0 / spacing as f32;
            for (k, o) in out.iter_mut().enumerate() {
                let seg = if k <= first {
                    0
                } else {
                    ((k - first) / spacing).min(n - 2)
                };
                let x0 = (first + seg * spacing) as f32;
                let slope = (pilots[seg + 1] - pilots[seg]) * inv;
                *o = pilots[seg] + slope * (k as f32 - x0);
            }
        }
    }
}

/// Pair of pilot symbols whose line covers symbol `l`
fn segment(pilots: &[usize], l: usize) -> (usize, usize) {
    let n = pilots.len();
    let upper = pilots.iter().position(|&p| p > l).unwrap_or(n).clamp(1, n - 1);
    (pilots[upper - 1], pilots[upper])
}

/// Fill the symbols of `symbols` that carry no pilots from those that do.
///
/// `pilot_symbols` must be sorted; those outside `symbols` are ignored.
pub fn interpolate_time(ce: &mut Array2<Complex32>, pilot_symbols: &[usize], symbols: Range<usize>) {
    let pilots: Vec<usize> = pilot_symbols
        .iter()
        .copied()
        .filter(|l| symbols.contains(l))
        .collect();
    let nre = ce.ncols();

    match pilots.len() {
        0 => {}
        1 => {
            let src = pilots[0];
            for l in symbols.filter(|&l| l != src) {
                for k in 0..nre {
                    ce[(l, k)] = ce[(src, k)];
                }
            }
        }
        _ => {
            for l in symbols.filter(|l| !pilots.contains(l)) {
                let (a, b) = segment(&pilots, l);
                let t = (l as f32 - a as f32) / (b - a) as f32;
                for k in 0..nre {
                    let va = ce[(a, k)];
                    let vb = ce[(b, k)];
                    ce[(l, k)] = va + (vb - va) * t;
                }
            }
        }
    }
}

/// Copy row `src` into every other row
pub fn replicate_symbol(ce: &mut Array2<Complex32>, src: usize) {
    let (nsymb, nre) = ce.dim();
    for l in (0..nsymb).filter(|&l| l != src) {
        for k in 0..nre {
            ce[(l, k)] = ce[(src, k)];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn c(re: f32, im: f32) -> Complex32 {
        Complex32::new(re, im)
    }

    #[test]
    fn test_pilot_on_every_element_returns_channel() {
        use crate::chest::extract::ls_estimate;
        use ndarray::Array2;

        let (nsymb, nre) = (14, 72);
        let h = |l: usize, k: usize| {
            let (l, k) = (l as f32, k as f32);
            Complex32::from_polar(0.6 + 0.3 * (0.2 * k).sin(), 0.02 * k * k / 7.0 - 0.15 * l)
        };
        let known = |l: usize, k: usize| Complex32::from_polar(1.0, 0.7 * ((3 * l + 5 * k) % 11) as f32);

        let mut ce = Array2::zeros((nsymb, nre));
        let mut estimates = vec![c(0.0, 0.0); nre];
        for l in 0..nsymb {
            let tx: Vec<Complex32> = (0..nre).map(|k| known(l, k)).collect();
            let rx: Vec<Complex32> = (0..nre).map(|k| h(l, k) * tx[k]).collect();
            ls_estimate(&rx, &tx, &mut estimates).unwrap();
            interpolate_freq(&estimates, 0, 1, ce.row_mut(l));
        }
        let all: Vec<usize> = (0..nsymb).collect();
        interpolate_time(&mut ce, &all, 0..nsymb);

        for l in 0..nsymb {
            for k in 0..nre {
                assert!((ce[(l, k)] - h(l, k)).norm() < 1e-5, "l={} k={}", l, k);
            }
        }
    }

    #[test]
    fn test_linear_ramp_with_edges() {
        // h[k] = a + b*k, pilots every 6th subcarrier from 2
        let a = c(0.3, -0.2);
        let b = c(0.01, 0.02);
        let pilots: Vec<Complex32> = (0..12).map(|i| a + b * (2 + 6 * i) as f32).collect();
        let mut out = Array1::zeros(72);
        interpolate_freq(&pilots, 2, 6, out.view_mut());
        for (k, v) in out.iter().enumerate() {
            assert!((v - (a + b * k as f32)).norm() < 1e-5, "k={}", k);
        }
    }

    #[test]
    fn test_single_and_no_pilot() {
        let mut out = Array1::from_elem(8, c(5.0, 5.0));
        interpolate_freq(&[c(1.0, 2.0)], 3, 6, out.view_mut());
        assert!(out.iter().all(|v| *v == c(1.0, 2.0)));
        interpolate_freq(&[], 0, 6, out.view_mut());
        assert!(out.iter().all(|v| *v == c(0.0, 0.0)));
    }

    #[test]
    fn test_time_two_point_line() {
        let mut ce = Array2::zeros((7, 3));
        for k in 0..3 {
            ce[(0, k)] = c(1.0, 0.0);
            ce[(4, k)] = c(3.0, 1.0);
        }
        interpolate_time(&mut ce, &[0, 4], 0..7);
        // slope (0.5, 0.25) per symbol, continued past symbol 4
        assert!((ce[(2, 1)] - c(2.0, 0.5)).norm() < 1e-6);
        assert!((ce[(6, 2)] - c(4.0, 1.5)).norm() < 1e-6);
        assert_eq!(ce[(4, 0)], c(3.0, 1.0));
    }

    #[test]
    fn test_time_edges_before_first_pilot() {
        let mut ce = Array2::zeros((14, 1));
        ce[(8, 0)] = c(2.0, 0.0);
        ce[(11, 0)] = c(5.0, 0.0);
        interpolate_time(&mut ce, &[8, 11], 7..14);
        assert!((ce[(7, 0)] - c(1.0, 0.0)).norm() < 1e-6);
        assert!((ce[(13, 0)] - c(7.0, 0.0)).norm() < 1e-6);
        // Symbols outside the range are untouched
        assert_eq!(ce[(6, 0)], c(0.0, 0.0));
    }

    #[test]
    fn test_single_pilot_symbol_is_flat() {
        let mut ce = Array2::zeros((7, 2));
        ce[(1, 0)] = c(0.5, 0.5);
        ce[(1, 1)] = c(-1.0, 0.0);
        interpolate_time(&mut ce, &[1, 8], 0..7);
        for l in 0..7 {
            assert_eq!(ce[(l, 0)], c(0.5, 0.5));
            assert_eq!(ce[(l, 1)], c(-1.0, 0.0));
        }
        replicate_symbol(&mut ce, 3);
        assert_eq!(ce[(6, 1)], c(-1.0, 0.0));
    }
}
