//! Primary Synchronization Signal
//!
//! Implements the PSS sequence according to 3GPP TS 36.211 Section 6.11.1:
//! a length-63 Zadoff-Chu sequence with the middle element punctured,
//! mapped onto the 62 subcarriers around DC.

use crate::{alloc_cf, PhyError};
use common::types::SYNC_SEQ_LEN;
use num_complex::Complex32;
use rustfft::FftPlanner;
use std::f32::consts::PI;

/// Zadoff-Chu root index per N_id_2
pub const PSS_ROOTS: [u32; 3] = [25, 29, 34];

/// Frequency-domain PSS for the given N_id_2
pub fn generate_pss(n_id_2: u8) -> Result<[Complex32; SYNC_SEQ_LEN], PhyError> {
    let u = *PSS_ROOTS
        .get(n_id_2 as usize)
        .ok_or_else(|| PhyError::InvalidConfiguration(format!("invalid N_id_2 {}", n_id_2)))?;

    let mut seq = [Complex32::new(0.0, 0.0); SYNC_SEQ_LEN];
    for (i, s) in seq.iter_mut().enumerate() {
        // Element 31 of the Zadoff-Chu sequence is punctured
        let m = if i < 31 { i as u32 } else { i as u32 + 1 };
        // exp(-j*pi*u*m*(m+1)/63) with the exponent reduced modulo 2*pi
        let k = (u * m * (m + 1) / 2) % 63;
        *s = Complex32::from_polar(1.0, -2.0 * PI * k as f32 / 63.0);
    }
    Ok(seq)
}

/// FFT bin carrying element `i` of a 62-long synchronization sequence.
///
/// The lower half sits on negative frequencies, the upper half starts one
/// bin above DC.
pub fn sync_seq_bin(i: usize, fft_size: usize) -> usize {
    if i < SYNC_SEQ_LEN / 2 {
        fft_size - SYNC_SEQ_LEN / 2 + i
    } else {
        i - SYNC_SEQ_LEN / 2 + 1
    }
}

/// Time-domain useful part of the PSS symbol, optionally shifted by an
/// integer number of subcarriers. Scaled so that a PSS symbol produced by
/// the unitary OFDM modulator matches it sample by sample.
pub fn pss_time_reference(n_id_2: u8, fft_size: usize, shift: i32) -> Result<Vec<Complex32>, PhyError> {
    if fft_size < SYNC_SEQ_LEN + 2 {
        return Err(PhyError::InvalidConfiguration(format!(
            "FFT size {} too small for the PSS",
            fft_size
        )));
    }
    let pss = generate_pss(n_id_2)?;

    let mut buf = alloc_cf(fft_size)?;
    for (i, s) in pss.iter().enumerate() {
        let bin = (sync_seq_bin(i, fft_size) as i64 + shift as i64).rem_euclid(fft_size as i64);
        buf[bin as usize] = *s;
    }

    let ifft = FftPlanner::new().plan_fft_inverse(fft_size);
    ifft.process(&mut buf);
    let norm = 1.0 / (fft_size as f32).sqrt();
    for v in buf.iter_mut() {
        *v *= norm;
    }
    Ok(buf)
}

/// Fractional frequency offset, in subcarriers, from the phase advance
/// between the two halves of a received PSS symbol.
///
/// The received samples are first stripped of the known modulation; each
/// sample of the first half is then compared with its counterpart half a
/// symbol later. The result lies in (-1, 1].
pub fn pss_cfo(reference: &[Complex32], received: &[Complex32]) -> f32 {
    let half = reference.len().min(received.len()) / 2;
    let z = |t: usize| reference[t].conj() * received[t];
    let y: Complex32 = (0..half).map(|t| z(t).conj() * z(t + half)).sum();
    super::cfo::wrap_phase(y.arg()) / PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::dot_prod_conj;

    #[test]
    fn test_pss_unit_modulus() {
        for n_id_2 in 0..3 {
            let pss = generate_pss(n_id_2).unwrap();
            for s in pss.iter() {
                assert!((s.norm() - 1.0).abs() < 1e-5);
            }
        }
        assert!(generate_pss(3).is_err());
    }

    #[test]
    fn test_pss_first_element() {
        // d_u(0) = exp(-j*pi*u*0*1/63) = 1
        let pss = generate_pss(1).unwrap();
        assert!((pss[0] - Complex32::new(1.0, 0.0)).norm() < 1e-6);
        // d_u(31) uses n = 32 of the unpunctured sequence: 29*32*33/2 = 3 mod 63
        let expected = Complex32::from_polar(1.0, -2.0 * PI * 3.0 / 63.0);
        assert!((pss[31] - expected).norm() < 1e-4);
    }

    #[test]
    fn test_bin_mapping_skips_dc() {
        assert_eq!(sync_seq_bin(0, 128), 97);
        assert_eq!(sync_seq_bin(30, 128), 127);
        assert_eq!(sync_seq_bin(31, 128), 1);
        assert_eq!(sync_seq_bin(61, 128), 31);
    }

    #[test]
    fn test_time_reference_energy_and_orthogonality() {
        let refs: Vec<Vec<Complex32>> = (0..3).map(|n| pss_time_reference(n, 128, 0).unwrap()).collect();
        for r in &refs {
            let energy: f32 = r.iter().map(|v| v.norm_sqr()).sum();
            assert!((energy - 62.0).abs() < 1e-2);
        }
        let auto = dot_prod_conj(&refs[0], &refs[0]).norm();
        let cross = dot_prod_conj(&refs[0], &refs[1]).norm();
        assert!(cross < 0.3 * auto);
    }

    #[test]
    fn test_pss_cfo_recovers_offset() {
        let n = 128;
        let reference = pss_time_reference(0, n, 0).unwrap();
        for &cfo in &[0.0f32, 0.3, -0.45] {
            let received: Vec<Complex32> = reference
                .iter()
                .enumerate()
                .map(|(t, v)| v * Complex32::from_polar(1.0, 2.0 * PI * cfo * t as f32 / n as f32))
                .collect();
            let est = pss_cfo(&reference, &received);
            assert!((est - cfo).abs() < 1e-3, "cfo {} estimated {}", cfo, est);
        }
    }

    #[test]
    fn test_reference_size_limit() {
        // A 64-point reference serves the search at half the 6 PRB rate
        assert_eq!(pss_time_reference(1, 64, 0).unwrap().len(), 64);
        assert!(pss_time_reference(1, 32, 0).is_err());
    }

    #[test]
    fn test_shifted_reference() {
        let base = pss_time_reference(2, 128, 0).unwrap();
        let shifted = pss_time_reference(2, 128, 1).unwrap();
        // A one-subcarrier shift is a linear phase ramp in time
        for (t, (b, s)) in base.iter().zip(&shifted).enumerate() {
            let ramp = Complex32::from_polar(1.0, 2.0 * PI * t as f32 / 128.0);
            assert!((b * ramp - s).norm() < 1e-4);
        }
    }
}
