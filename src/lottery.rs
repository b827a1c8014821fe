//! Provider lottery: deterministic weighted selection of the provider that
//! shares in a block's reward.
//!
//! Voting power combines staked margin and free proof-of-resource capacity.
//! The draw seed is derived from the parent header only, so every node that
//! agrees on the parent agrees on the winner.

use crate::{header::Header, system_contracts::ProviderInfos};
use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_rlp::RlpEncodable;
use once_cell::sync::Lazy;

/// Providers staking less than this are excluded from the draw (wei).
pub static STAKE_THRESHOLD: Lazy<U256> =
    Lazy::new(|| U256::from(500u64) * U256::from(10u64).pow(U256::from(18)));

/// Weight of the staked margin in voting power.
pub const LUCKY_RATE: u64 = 6;
/// Weight of the proof-of-resource value in voting power.
pub const LUCKY_POR_RATE: u64 = 4;
/// Free storage counted per free cpu, in GiB.
pub const MAX_STORAGE_PER_CPU: u64 = 1;
/// Free memory counted per free cpu, in MiB.
pub const MAX_MEMORY_PER_CPU: u64 = 4;
/// Wei value of one resource unit.
pub const POR_UNIT: u64 = 10_000_000_000_000_000;

/// Provider state value marking a disabled provider.
pub const PROVIDER_STATE_DISABLED: u8 = 2;

const GIB: u64 = 1_073_741_824;
const MIB: u64 = 1_048_576;

/// One eligible draw entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteInfo {
    pub provider: Address,
    pub voting_power: U256,
}

/// Voting power of a single provider entry, or `None` when the entry is
/// filtered out (disabled, or staked below the threshold).
pub fn voting_power(entry: &ProviderInfos) -> Option<VoteInfo> {
    if entry.info.state == PROVIDER_STATE_DISABLED {
        return None;
    }
    if entry.marginAmount < *STAKE_THRESHOLD {
        return None;
    }

    let cpu_free = entry.info.total.cpuCount.saturating_sub(entry.info.lock.cpuCount);
    let mut storage_free =
        entry.info.total.storageCount.saturating_sub(entry.info.lock.storageCount) / U256::from(GIB);
    let mut memory_free =
        entry.info.total.memoryCount.saturating_sub(entry.info.lock.memoryCount) / U256::from(MIB);

    let storage_cap = U256::from(MAX_STORAGE_PER_CPU) * cpu_free;
    if storage_free > storage_cap {
        storage_free = storage_cap;
    }
    let memory_cap = U256::from(MAX_MEMORY_PER_CPU) * cpu_free;
    if memory_free > memory_cap {
        memory_free = memory_cap;
    }

    let por_value = (cpu_free + storage_free + memory_free) * U256::from(POR_UNIT);
    let power = entry.marginAmount * U256::from(LUCKY_RATE) + por_value * U256::from(LUCKY_POR_RATE);
    Some(VoteInfo { provider: entry.info.owner, voting_power: power })
}

/// Filters and weighs provider entries in contract order.
pub fn collect_votes(entries: &[ProviderInfos]) -> Vec<VoteInfo> {
    entries.iter().filter_map(voting_power).collect()
}

#[derive(RlpEncodable)]
struct SeedInput {
    state_root: B256,
    parent_hash: B256,
    coinbase: Address,
    time: u64,
}

/// Draw seed: keccak over the RLP of the parent's state root, hash, coinbase
/// and timestamp, read as a big-endian integer.
pub fn lottery_seed(parent: &Header) -> U256 {
    let input = SeedInput {
        state_root: parent.state_root,
        parent_hash: parent.hash_slow(),
        coinbase: parent.coinbase,
        time: parent.timestamp,
    };
    U256::from_be_bytes(keccak256(alloy_rlp::encode(&input)).0)
}

/// Elects the winner among `votes` for the block following `parent`. Returns
/// the zero address when no voting power is present.
pub fn draw(parent: &Header, votes: &[VoteInfo]) -> Address {
    let total: U256 = votes.iter().fold(U256::ZERO, |acc, v| acc + v.voting_power);
    if total.is_zero() {
        return Address::ZERO;
    }

    let magic = lottery_seed(parent) % total;
    let mut running = U256::ZERO;
    for vote in votes {
        running += vote.voting_power;
        if magic < running {
            tracing::debug!(
                provider = %vote.provider,
                voting_power = %vote.voting_power,
                running = %running,
                "chose lottery provider"
            );
            return vote.provider;
        }
    }
    Address::ZERO
}
