//! Pseudo-random sequence generation
//!
//! Length-31 Gold sequence of 3GPP TS 36.211 Section 7.2, used to scramble
//! the cell-specific reference signals.

use num_complex::Complex32;

/// Number of initial outputs discarded after seeding
const NC: usize = 1600;

/// Gold sequence generator
#[derive(Debug, Clone)]
pub struct GoldSequence {
    /// First m-sequence register, x1(n) in bit 0
    x1: u32,
    /// Second m-sequence register, seeded with c_init
    x2: u32,
}

impl GoldSequence {
    /// Create a generator positioned at c(0) for the given seed
    pub fn new(c_init: u32) -> Self {
        let mut gen = Self {
            x1: 1,
            x2: c_init & 0x7FFF_FFFF,
        };
        for _ in 0..NC {
            gen.advance();
        }
        gen
    }

    fn advance(&mut self) {
        // x1(n+31) = x1(n+3) + x1(n)
        let x1_new = ((self.x1 >> 3) ^ self.x1) & 1;
        self.x1 = (self.x1 >> 1) | (x1_new << 30);

        // x2(n+31) = x2(n+3) + x2(n+2) + x2(n+1) + x2(n)
        let x2_new = ((self.x2 >> 3) ^ (self.x2 >> 2) ^ (self.x2 >> 1) ^ self.x2) & 1;
        self.x2 = (self.x2 >> 1) | (x2_new << 30);
    }

    /// Next bit c(n)
    pub fn next_bit(&mut self) -> u8 {
        let c = (self.x1 ^ self.x2) & 1;
        self.advance();
        c as u8
    }

    /// Next QPSK symbol `((1 - 2c(2m)) + j(1 - 2c(2m+1))) * amplitude`
    pub fn next_qpsk(&mut self, amplitude: f32) -> Complex32 {
        let c0 = self.next_bit();
        let c1 = self.next_bit();
        Complex32::new(
            amplitude * (1.0 - 2.0 * c0 as f32),
            amplitude * (1.0 - 2.0 * c1 as f32),
        )
    }

    /// Skip `n` bits
    pub fn skip(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }
}

/// First `len` bits of the sequence seeded with `c_init`
pub fn gold_bits(c_init: u32, len: usize) -> Vec<u8> {
    let mut gen = GoldSequence::new(c_init);
    (0..len).map(|_| gen.next_bit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_seed_is_x1_only() {
        // With c_init = 0 the second register stays empty and c(n) = x1(n + Nc)
        let bits = gold_bits(0, 64);
        let mut x1 = vec![0u8; NC + 64 + 31];
        x1[0] = 1;
        for n in 0..NC + 64 {
            x1[n + 31] = x1[n + 3] ^ x1[n];
        }
        assert_eq!(&bits[..], &x1[NC..NC + 64]);
    }

    #[test]
    fn test_skip_matches_generation() {
        let mut a = GoldSequence::new(0x1234);
        let mut b = GoldSequence::new(0x1234);
        for _ in 0..37 {
            a.next_bit();
        }
        b.skip(37);
        assert_eq!(gold_bits(0x1234, 100), gold_bits(0x1234, 100));
        for _ in 0..20 {
            assert_eq!(a.next_bit(), b.next_bit());
        }
    }

    #[test]
    fn test_qpsk_symbols() {
        let mut gen = GoldSequence::new(511);
        let bits = gold_bits(511, 20);
        let amp = std::f32::consts::FRAC_1_SQRT_2;
        for i in 0..10 {
            let s = gen.next_qpsk(amp);
            assert!((s.norm() - 1.0).abs() < 1e-6);
            assert_eq!(s.re > 0.0, bits[2 * i] == 0);
            assert_eq!(s.im > 0.0, bits[2 * i + 1] == 0);
        }
        assert_ne!(gold_bits(1, 64), gold_bits(2, 64));
    }
}
