//! A bloom filter over request fingerprints.
//!
//! Sized from an expected element count and a target false-positive rate.
//! Bit positions come from double hashing two words of the SHA-256
//! fingerprint, which is already uniformly distributed, so no further hashing
//! is needed. There is no removal.

use crate::request::Fingerprint;
use std::f64::consts::LN_2;

#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Creates a filter with `num_bits` bits and `num_hashes` probes per element.
    pub fn new(num_bits: u64, num_hashes: u32) -> Self {
        let num_bits = num_bits.max(64);
        let words = num_bits.div_ceil(64) as usize;
        BloomFilter {
            bits: vec![0; words],
            num_bits,
            num_hashes: num_hashes.max(1),
        }
    }

    /// Creates a filter that holds `expected_items` elements at roughly
    /// `false_positive_rate`.
    pub fn with_estimates(expected_items: u64, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(f64::MIN_POSITIVE, 0.999_999);
        let num_bits = (-n * p.ln() / (LN_2 * LN_2)).ceil() as u64;
        let num_hashes = ((num_bits as f64 / n) * LN_2).round() as u32;
        Self::new(num_bits, num_hashes)
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn add(&mut self, fingerprint: &Fingerprint) {
        for index in self.positions(fingerprint) {
            self.bits[(index / 64) as usize] |= 1 << (index % 64);
        }
    }

    pub fn might_contain(&self, fingerprint: &Fingerprint) -> bool {
        self.positions(fingerprint)
            .all(|index| self.bits[(index / 64) as usize] & (1 << (index % 64)) != 0)
    }

    /// Inserts `fingerprint` and reports whether it was (probably) present already.
    pub fn test_and_add(&mut self, fingerprint: &Fingerprint) -> bool {
        let mut present = true;
        for index in self.positions(fingerprint) {
            let word = &mut self.bits[(index / 64) as usize];
            let mask = 1 << (index % 64);
            if *word & mask == 0 {
                present = false;
                *word |= mask;
            }
        }
        present
    }

    fn positions(&self, fingerprint: &Fingerprint) -> impl Iterator<Item = u64> {
        let (h1, h2) = fingerprint.hash_pair();
        let h2 = h2 | 1;
        let num_bits = self.num_bits;
        (0..self.num_hashes as u64)
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % num_bits)
    }
}
