//! Seeded 32-bit hashing for split assignments.
//!
//! Assignments must be stable across SDK restarts and across language
//! implementations, so the hash is xxHash32 bit-for-bit; everything else in
//! this module is arithmetic on top of it.

use twox_hash::XxHash32;

/// Scale of segment split thresholds: per-mille of one hundred thousand.
pub const PROMILLE_SCALE: u32 = 100_000;

const HASH_SPACE: f64 = u32::MAX as f64;

/// xxHash32 of `input` under `seed`.
pub fn hash32(input: &str, seed: u32) -> u32 {
    XxHash32::oneshot(seed, input.as_bytes())
}

/// Maps `hash` onto weighted buckets.
///
/// Each weight claims a share of the 32-bit hash space proportional to its
/// fraction of the total; the result is the first bucket whose cumulative
/// upper bound exceeds `hash`. Returns `None` when the weights sum to zero
/// or the accumulated bounds never cover `hash` (floating-point edge).
pub fn weighted_bucket(hash: u32, weights: &[f64]) -> Option<usize> {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let mut upper = 0.0;
    for (index, weight) in weights.iter().enumerate() {
        upper += (weight / total) * HASH_SPACE;
        if (hash as f64) < upper {
            return Some(index);
        }
    }
    None
}

/// Threshold gate for segment splits: `0` never passes, `>= 100_000` always
/// passes, anything else admits `hash mod 100_000 < pass_promille`.
pub fn passes_promille(hash: u32, pass_promille: u32) -> bool {
    if pass_promille == 0 {
        return false;
    }
    if pass_promille >= PROMILLE_SCALE {
        return true;
    }
    hash % PROMILLE_SCALE < pass_promille
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash32("uid1", 7), hash32("uid1", 7));
        assert_ne!(hash32("uid1", 7), hash32("uid1", 8));
        assert_ne!(hash32("uid1", 7), hash32("uid2", 7));
    }

    #[test]
    fn single_weighted_bucket_wins() {
        let hash = hash32("uid1", 7);
        assert_eq!(weighted_bucket(hash, &[0.0, 10_000.0]), Some(1));
        assert_eq!(
            weighted_bucket(
                hash,
                &[
                    0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 10_000.0, 0.0, 0.0, 0.0
                ]
            ),
            Some(9)
        );
    }

    #[test]
    fn zero_total_weight_yields_none() {
        assert_eq!(weighted_bucket(123, &[0.0, 0.0]), None);
        assert_eq!(weighted_bucket(123, &[]), None);
    }

    #[test]
    fn distribution_tracks_weights() {
        let weights = [50.0, 50.0];
        let n = 10_000usize;
        let mut counts = [0usize; 2];
        for i in 0..n {
            let hash = hash32(&format!("user-{i}"), 0);
            let bucket = weighted_bucket(hash, &weights).unwrap();
            counts[bucket] += 1;
        }
        // Each bucket should be within 2% of its configured share.
        let tolerance = (n as f64 * 0.02) as usize;
        for count in counts {
            assert!(
                count.abs_diff(n / 2) <= tolerance,
                "bucket count {count} outside tolerance of {}",
                n / 2
            );
        }
    }

    #[test]
    fn uneven_distribution_tracks_weights() {
        let weights = [80.0, 20.0];
        let n = 10_000usize;
        let mut counts = [0usize; 2];
        for i in 0..n {
            let hash = hash32(&format!("subject-{i}"), 42);
            counts[weighted_bucket(hash, &weights).unwrap()] += 1;
        }
        let tolerance = (n as f64 * 0.02) as usize;
        assert!(counts[0].abs_diff(8_000) <= tolerance);
        assert!(counts[1].abs_diff(2_000) <= tolerance);
    }

    #[test]
    fn promille_gate_extremes() {
        for hash in [0u32, 1, 99_999, 100_000, u32::MAX] {
            assert!(!passes_promille(hash, 0));
            assert!(passes_promille(hash, PROMILLE_SCALE));
            assert!(passes_promille(hash, PROMILLE_SCALE + 1));
        }
        assert!(passes_promille(100_000, 1)); // 100_000 % 100_000 == 0
        assert!(!passes_promille(99_999, 99_999));
        assert!(passes_promille(99_998, 99_999));
    }
}
