//! MinHash signatures over shingle sets.
//!
//! Each permutation is a universal hash `(a * h + b) mod p` with the Mersenne
//! prime `p = 2^61 - 1`, applied to a SHA-256 derived 64-bit hash of the
//! shingle. The `(a, b)` family is drawn from a seeded RNG so that independent
//! worker processes compute identical signatures.

use crate::canonical::shingles;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const MERSENNE_PRIME: u64 = (1 << 61) - 1;

/// Fixed-size sketch of a shingle set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub values: Vec<u64>,
}

impl Signature {
    /// Fraction of agreeing slots, an estimate of Jaccard similarity.
    pub fn jaccard(&self, other: &Self) -> f64 {
        if self.values.len() != other.values.len() || self.values.is_empty() {
            return 0.0;
        }
        let agree = self
            .values
            .iter()
            .zip(other.values.iter())
            .filter(|(a, b)| a == b)
            .count();
        agree as f64 / self.values.len() as f64
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A permutation family of fixed size.
#[derive(Debug, Clone)]
pub struct MinHasher {
    a: Vec<u64>,
    b: Vec<u64>,
}

impl MinHasher {
    pub fn new(num_perm: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut a = Vec::with_capacity(num_perm);
        let mut b = Vec::with_capacity(num_perm);
        for _ in 0..num_perm {
            a.push(rng.random_range(1..MERSENNE_PRIME));
            b.push(rng.random_range(0..MERSENNE_PRIME));
        }
        Self { a, b }
    }

    pub fn num_perm(&self) -> usize {
        self.a.len()
    }

    /// Signature of an arbitrary set of items.
    pub fn signature<I, S>(&self, items: I) -> Signature
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mins = vec![u64::MAX; self.num_perm()];
        for item in items {
            let h = base_hash(item.as_ref());
            for (slot, (a, b)) in mins.iter_mut().zip(self.a.iter().zip(self.b.iter())) {
                let permuted = permute(h, *a, *b);
                if permuted < *slot {
                    *slot = permuted;
                }
            }
        }
        Signature { values: mins }
    }

    /// Signature of a whole field value's shingles (not per token).
    pub fn value_signature(&self, value: &str) -> Signature {
        self.signature(shingles(value))
    }
}

fn base_hash(item: &str) -> u64 {
    let digest = Sha256::digest(item.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

#[inline]
fn permute(h: u64, a: u64, b: u64) -> u64 {
    let product = (a as u128) * ((h % MERSENNE_PRIME) as u128) + b as u128;
    (product % MERSENNE_PRIME as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_signature() {
        let h1 = MinHasher::new(64, 7);
        let h2 = MinHasher::new(64, 7);
        assert_eq!(h1.value_signature("ACME INC"), h2.value_signature("ACME INC"));
    }

    #[test]
    fn test_identical_values_have_jaccard_one() {
        let hasher = MinHasher::new(128, 1);
        let a = hasher.value_signature("ACME INCORPORATED");
        assert_eq!(a.jaccard(&a.clone()), 1.0);
    }

    #[test]
    fn test_similar_values_score_higher_than_unrelated() {
        let hasher = MinHasher::new(128, 1);
        let a = hasher.value_signature("ACME INCORPORATED");
        let b = hasher.value_signature("ACME INCORPORATION");
        let c = hasher.value_signature("ZEPHYR LOGISTICS");
        assert!(a.jaccard(&b) > a.jaccard(&c));
    }

    #[test]
    fn test_empty_value_signature_is_all_max() {
        let hasher = MinHasher::new(16, 1);
        let sig = hasher.value_signature("");
        assert!(sig.values.iter().all(|v| *v == u64::MAX));
    }
}
