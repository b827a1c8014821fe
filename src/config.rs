//! Chain and engine configuration.

use crate::constants::DEFAULT_EPOCH_LENGTH;
use serde::{Deserialize, Serialize};

/// Chain-wide parameters the engine needs: the EIP-155 chain id and the
/// activation heights of the consensus-affecting forks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// Enables governance proposals, the blacklist filter and developer
    /// verification.
    pub redcoast_block: Option<u64>,
    /// Enables deterministic out-of-turn backoff in block timing.
    pub ramanujan_block: Option<u64>,
}

impl ChainConfig {
    pub fn is_redcoast_active_at_block(&self, number: u64) -> bool {
        self.redcoast_block.is_some_and(|b| b <= number)
    }

    pub fn is_ramanujan_active_at_block(&self, number: u64) -> bool {
        self.ramanujan_block.is_some_and(|b| b <= number)
    }

    /// Scheduled fork heights in ascending order, deduplicated, genesis
    /// excluded. Input to the fork-id checksum.
    pub fn fork_heights(&self) -> Vec<u64> {
        let mut forks: Vec<u64> = [self.redcoast_block, self.ramanujan_block]
            .into_iter()
            .flatten()
            .filter(|&b| b > 0)
            .collect();
        forks.sort_unstable();
        forks.dedup();
        forks
    }
}

/// Engine parameters. `period` is the minimum number of seconds between
/// blocks; `epoch` the number of blocks between validator-set refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DposConfig {
    pub period: u64,
    pub epoch: u64,
    /// Gate contract creation on the address-list contract's developer set.
    pub enable_dev_verification: bool,
}

impl Default for DposConfig {
    fn default() -> Self {
        Self { period: 60, epoch: DEFAULT_EPOCH_LENGTH, enable_dev_verification: false }
    }
}

impl DposConfig {
    /// Replaces a zero epoch with the default length.
    pub fn sanitize(mut self) -> Self {
        if self.epoch == 0 {
            self.epoch = DEFAULT_EPOCH_LENGTH;
        }
        self
    }
}
