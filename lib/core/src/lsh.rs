//! Banded MinHash LSH.
//!
//! The band count and rows per band are chosen for a Jaccard threshold by
//! minimizing the equally weighted false positive and false negative areas
//! under the banding S-curve.

use crate::minhash::Signature;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

const INTEGRATION_STEPS: usize = 64;
const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001b3;

/// Banding parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Banding {
    pub bands: usize,
    pub rows: usize,
}

impl Banding {
    /// Bands and rows minimizing `0.5 * fp + 0.5 * fn` for `threshold`.
    pub fn optimal(threshold: f64, num_perm: usize) -> Self {
        let mut best = Banding { bands: 1, rows: num_perm.max(1) };
        let mut best_error = f64::INFINITY;
        for bands in 1..=num_perm {
            for rows in 1..=(num_perm / bands) {
                let fp = integrate(|s| collision_probability(s, bands, rows), 0.0, threshold);
                let fn_ = integrate(|s| 1.0 - collision_probability(s, bands, rows), threshold, 1.0);
                let error = 0.5 * fp + 0.5 * fn_;
                if error < best_error {
                    best_error = error;
                    best = Banding { bands, rows };
                }
            }
        }
        best
    }
}

fn collision_probability(s: f64, bands: usize, rows: usize) -> f64 {
    1.0 - (1.0 - s.powi(rows as i32)).powi(bands as i32)
}

/// Composite Simpson rule.
fn integrate<F: Fn(f64) -> f64>(f: F, a: f64, b: f64) -> f64 {
    if b <= a {
        return 0.0;
    }
    let h = (b - a) / INTEGRATION_STEPS as f64;
    let mut sum = f(a) + f(b);
    for i in 1..INTEGRATION_STEPS {
        let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
        sum += weight * f(a + i as f64 * h);
    }
    sum * h / 3.0
}

fn band_key(values: &[u64]) -> u64 {
    let mut state = FNV_OFFSET;
    for value in values {
        for byte in value.to_le_bytes() {
            state ^= byte as u64;
            state = state.wrapping_mul(FNV_PRIME);
        }
    }
    state
}

/// Approximate-similarity bucket structure for one field of one shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinHashLsh {
    threshold: f64,
    num_perm: usize,
    banding: Banding,
    tables: Vec<HashMap<u64, Vec<u32>>>,
    len: usize,
}

impl MinHashLsh {
    pub fn new(threshold: f64, num_perm: usize) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Configuration(format!(
                "LSH threshold must be in [0, 1], got {}",
                threshold
            )));
        }
        if num_perm < 2 {
            return Err(Error::Configuration(
                "LSH needs at least 2 permutations".to_string(),
            ));
        }
        let banding = Banding::optimal(threshold, num_perm);
        Ok(Self {
            threshold,
            num_perm,
            banding,
            tables: (0..banding.bands).map(|_| HashMap::new()).collect(),
            len: 0,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn num_perm(&self) -> usize {
        self.num_perm
    }

    pub fn banding(&self) -> Banding {
        self.banding
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, signature: &Signature) -> Result<()> {
        if signature.len() != self.num_perm {
            return Err(Error::InvalidInput(format!(
                "signature has {} values, index expects {}",
                signature.len(),
                self.num_perm
            )));
        }
        Ok(())
    }

    fn keys<'a>(&'a self, signature: &'a Signature) -> impl Iterator<Item = u64> + 'a {
        signature
            .values
            .chunks(self.banding.rows)
            .take(self.banding.bands)
            .map(band_key)
    }

    pub fn insert(&mut self, position: u32, signature: &Signature) -> Result<()> {
        self.check(signature)?;
        let keys: Vec<u64> = self.keys(signature).collect();
        for (table, key) in self.tables.iter_mut().zip(keys) {
            table.entry(key).or_default().push(position);
        }
        self.len += 1;
        Ok(())
    }

    /// Positions sharing at least one band with `signature`, ascending.
    pub fn query(&self, signature: &Signature) -> Result<BTreeSet<u32>> {
        self.check(signature)?;
        let mut candidates = BTreeSet::new();
        for (table, key) in self.tables.iter().zip(self.keys(signature)) {
            if let Some(positions) = table.get(&key) {
                candidates.extend(positions.iter().copied());
            }
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minhash::MinHasher;

    #[test]
    fn test_optimal_banding_fits_permutations() {
        let banding = Banding::optimal(0.6, 128);
        assert!(banding.bands * banding.rows <= 128);
        assert!(banding.bands > 1 && banding.rows > 1);
        // the S-curve midpoint should land near the threshold
        let midpoint = (1.0 / banding.bands as f64).powf(1.0 / banding.rows as f64);
        assert!((midpoint - 0.6).abs() < 0.15, "midpoint {}", midpoint);
    }

    #[test]
    fn test_query_finds_identical_and_near_values() {
        let hasher = MinHasher::new(128, 1);
        let mut lsh = MinHashLsh::new(0.6, 128).unwrap();
        lsh.insert(0, &hasher.value_signature("ACME INCORPORATED")).unwrap();
        lsh.insert(1, &hasher.value_signature("ZEPHYR LOGISTICS GROUP")).unwrap();
        lsh.insert(2, &hasher.value_signature("ACME INCORPORATED")).unwrap();

        let hits = lsh.query(&hasher.value_signature("ACME INCORPORATED")).unwrap();
        assert!(hits.contains(&0));
        assert!(hits.contains(&2));
        assert!(!hits.contains(&1));
        assert_eq!(lsh.len(), 3);
    }

    #[test]
    fn test_rejects_wrong_signature_size() {
        let lsh = MinHashLsh::new(0.6, 128).unwrap();
        let small = MinHasher::new(16, 1).value_signature("ACME");
        assert!(lsh.query(&small).is_err());
    }

    #[test]
    fn test_rejects_bad_threshold() {
        assert!(MinHashLsh::new(1.5, 128).is_err());
        assert!(MinHashLsh::new(0.5, 1).is_err());
    }
}
