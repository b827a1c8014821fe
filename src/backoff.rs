//! Deterministic out-of-turn backoff.
//!
//! Every node must compute the same per-validator delay for a given height or
//! timing verification forks the chain, so the shuffle below is pinned down to
//! the bit: a 64-bit linear-congruential generator (Knuth's MMIX multiplier
//! `6364136223846793005`, increment `1442695040888963407`) seeded with the
//! snapshot number, each draw taking the upper 32 bits of the state, feeding a
//! Fisher-Yates shuffle that walks from the highest index down and swaps with
//! `draw % (i + 1)`. Changing any of these constants is a hard fork.

use crate::{
    constants::{INITIAL_BACKOFF_SECS, WIGGLE_TIME_SECS},
    snapshot::Snapshot,
};
use alloy_primitives::Address;

struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.state >> 32) as u32
    }
}

/// The shuffled backoff steps `[0, n)` for the given seed.
pub fn backoff_steps(seed: u64, n: usize) -> Vec<u64> {
    let mut steps: Vec<u64> = (0..n as u64).collect();
    let mut rng = Lcg::new(seed);
    for i in (1..n).rev() {
        let j = rng.next_u32() as usize % (i + 1);
        steps.swap(i, j);
    }
    steps
}

/// Seconds an out-of-turn validator must add on top of the block period. Zero
/// for the in-turn validator and for addresses outside the set.
pub fn back_off_time(snap: &Snapshot, validator: Address) -> u64 {
    if snap.inturn(validator) {
        return 0;
    }
    let Some(idx) = snap.index_of(validator) else {
        // the backoff does not matter when a validator is not authorized
        return 0;
    };
    let steps = backoff_steps(snap.number, snap.validators.len());
    INITIAL_BACKOFF_SECS + steps[idx] * WIGGLE_TIME_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    #[test]
    fn shuffle_is_deterministic() {
        let a = backoff_steps(12345, 21);
        let b = backoff_steps(12345, 21);
        assert_eq!(a, b);
        assert_ne!(a, backoff_steps(12346, 21));
    }

    #[test]
    fn shuffle_is_a_permutation() {
        for seed in [0u64, 1, 1024, u64::MAX] {
            let mut steps = backoff_steps(seed, 21);
            steps.sort_unstable();
            assert_eq!(steps, (0..21).collect::<Vec<_>>());
        }
    }

    #[test]
    fn backoff_times_are_distinct_per_height() {
        // every out-of-turn validator lands on a different step, so no two
        // validators share a timing slot
        let validators: Vec<Address> = (1..=7u8).map(Address::repeat_byte).collect();
        let snap = Snapshot::new(100, 42, B256::ZERO, validators.clone());
        let mut delays: Vec<u64> = validators
            .iter()
            .filter(|&&v| !snap.inturn(v))
            .map(|&v| back_off_time(&snap, v))
            .collect();
        delays.sort_unstable();
        delays.dedup();
        assert_eq!(delays.len(), validators.len() - 1);
    }

    #[test]
    fn inturn_validator_has_no_backoff() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let c = Address::repeat_byte(3);
        let snap = Snapshot::new(100, 9, B256::ZERO, vec![a, b, c]);
        // block 10 belongs to index 10 % 3 == 1, i.e. `b`
        assert_eq!(back_off_time(&snap, b), 0);
        assert!(back_off_time(&snap, a) >= INITIAL_BACKOFF_SECS);
        assert!(back_off_time(&snap, c) >= INITIAL_BACKOFF_SECS);
        // outsiders never wait
        assert_eq!(back_off_time(&snap, Address::repeat_byte(9)), 0);
    }
}
