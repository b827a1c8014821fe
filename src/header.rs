//! Engine block header.
//!
//! This is the header shape the consensus rules operate on. Besides the usual
//! Ethereum fields it carries the engine-added distribution fields: the
//! provider-lottery winner, the team address, and the two distribution rates
//! (both scaled by 20000).

use crate::system_txs::SignedSystemTx;
use alloy_primitives::{keccak256, Address, Bloom, Bytes, B256, B64, U256};
use alloy_rlp::{RlpDecodable, RlpEncodable};

#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Header {
    pub parent_hash: B256,
    pub uncle_hash: B256,
    pub coinbase: Address,
    pub state_root: B256,
    pub transactions_root: B256,
    pub receipts_root: B256,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Bytes,
    pub mix_digest: B256,
    pub nonce: B64,
    /// Winner of the provider lottery for this block, or zero.
    pub provider: Address,
    pub team_address: Address,
    /// Team share of the emission, scaled by 20000.
    pub team_rate: u64,
    /// Validator share of the emission, scaled by 20000.
    pub validator_rate: u64,
}

impl Header {
    /// Full block hash: keccak over the RLP of every field, seal included.
    pub fn hash_slow(&self) -> B256 {
        keccak256(alloy_rlp::encode(self))
    }
}

/// The engine's view of a block: the header plus the transaction list with
/// recovered senders. The host maps its own block type into this.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<SignedSystemTx>,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<SignedSystemTx>) -> Self {
        Self { header, transactions }
    }

    pub fn hash_slow(&self) -> B256 {
        self.header.hash_slow()
    }
}
