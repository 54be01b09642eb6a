//! Uploader selection
//!
//! This module handles:
//! - Delegation weight with diminishing returns
//! - Deterministic weighted random choice between stakers
//!
//! Every replica must pick the same uploader, so the random source is seeded
//! only from block metadata and the square root uses integers.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Curve constant of the delegation weight
pub const DELEGATION_WEIGHT_BASE: u64 = 10_000;

/// Token granularity of the delegation weight (1 token = 10^9 base units)
pub const DELEGATION_WEIGHT_UNIT: u64 = 1_000_000_000;

/// Starting guess of the square root, close to the result for small inputs
const SQRT_INITIAL_GUESS: u64 = 14_142;

/// Weight a staker gains from its total delegation.
///
/// `weight = unit * (sqrt(A * (A + d / unit)) - A)` with `A = 10000`.
pub fn delegation_weight(delegation: u64) -> u64 {
    let base = DELEGATION_WEIGHT_BASE as u128;
    let number = base * (base + (delegation / DELEGATION_WEIGHT_UNIT) as u128);

    // Babylonian method, stops once two iterations are within 2 of each other
    let mut x = SQRT_INITIAL_GUESS as u128;
    let mut epsilon = u128::MAX;
    while epsilon > 2 {
        let next = (x + number / x) / 2;
        epsilon = x.abs_diff(next);
        x = next;
    }

    let weight = x.saturating_sub(base) * DELEGATION_WEIGHT_UNIT as u128;
    u64::try_from(weight).unwrap_or(u64::MAX)
}

/// Selection candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Staker address
    pub account: String,
    /// Selection weight
    pub weight: u64,
}

/// Seed derived from block metadata
pub fn selection_seed(height: u64, time: u64) -> u64 {
    height.wrapping_add(time)
}

/// Pick one candidate with probability proportional to its weight.
///
/// Candidates are ordered by ascending weight (ties keep input order) before
/// drawing. Returns `None` when there are no candidates or every weight is
/// zero.
pub fn weighted_random_choice(candidates: &[Candidate], seed: u64) -> Option<String> {
    let mut ordered: Vec<&Candidate> = candidates.iter().collect();
    ordered.sort_by_key(|candidate| candidate.weight);

    let total: u128 = ordered.iter().map(|c| c.weight as u128).sum();
    if total == 0 {
        return None;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut value = rng.gen_range(0..total);

    for candidate in ordered {
        let weight = candidate.weight as u128;
        if weight > value {
            return Some(candidate.account.clone());
        }
        value -= weight;
    }

    None
}
