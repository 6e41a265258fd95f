//! Least-squares pilot estimates

use crate::{check_len, PhyError};
use num_complex::Complex32;

/// Raw channel estimate of one pilot: `received / known`.
///
/// An exactly zero received value (or a zero known value) gives zero, so a
/// blanked resource element never turns into NaN.
#[inline]
pub fn ls_pilot(received: Complex32, known: Complex32) -> Complex32 {
    if received == Complex32::new(0.0, 0.0) || known.norm_sqr() == 0.0 {
        Complex32::new(0.0, 0.0)
    } else {
        received / known
    }
}

/// Raw estimates of a pilot set, in the order of `known`
pub fn ls_estimate(received: &[Complex32], known: &[Complex32], out: &mut [Complex32]) -> Result<(), PhyError> {
    check_len("received pilots", known.len(), received.len())?;
    check_len("pilot estimates", known.len(), out.len())?;
    for ((o, r), k) in out.iter_mut().zip(received).zip(known) {
        *o = ls_pilot(*r, *k);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_division_recovers_gain() {
        let known = [Complex32::new(0.7071, 0.7071), Complex32::new(-0.7071, 0.7071)];
        let h = Complex32::from_polar(0.5, 1.2);
        let received = [known[0] * h, known[1] * h];
        let mut out = [Complex32::new(0.0, 0.0); 2];
        ls_estimate(&received, &known, &mut out).unwrap();
        for v in out.iter() {
            assert!((v - h).norm() < 1e-5);
        }
    }

    #[test]
    fn test_zero_received_is_zero() {
        let known = [Complex32::new(0.0, 1.0); 3];
        let received = [Complex32::new(0.0, 2.0), Complex32::new(0.0, 0.0), Complex32::new(0.0, -1.0)];
        let mut out = [Complex32::new(9.0, 9.0); 3];
        ls_estimate(&received, &known, &mut out).unwrap();
        assert_eq!(out[1], Complex32::new(0.0, 0.0));
        assert!(out.iter().all(|v| v.re.is_finite() && v.im.is_finite()));
        assert_eq!(ls_pilot(Complex32::new(1.0, 0.0), Complex32::new(0.0, 0.0)), Complex32::new(0.0, 0.0));
        assert!(ls_estimate(&received[..2], &known, &mut out).is_err());
    }
}
