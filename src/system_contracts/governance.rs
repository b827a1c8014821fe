//! Governance proposal payloads and the transactions that carry them.
//!
//! Passed proposals are executed as miner-originated zero-price transactions
//! whose calldata is the RLP of the proposal; the recipient is the governance
//! sentinel address, while the embedded `receiver`/`value`/`data` triplet is
//! what actually runs in the VM.

use super::{Proposal, SYS_GOV_TO};
use alloy_consensus::TxLegacy;
use alloy_primitives::{Address, Bytes, TxKind, U256};
use alloy_rlp::RlpEncodable;

/// A passed proposal as the engine consumes it.
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable)]
pub struct GovProposal {
    pub id: U256,
    pub action: U256,
    pub proposer: Address,
    pub receiver: Address,
    pub value: U256,
    pub data: Bytes,
}

impl From<Proposal> for GovProposal {
    fn from(p: Proposal) -> Self {
        Self {
            id: p.id,
            action: p.action,
            proposer: p.proposer,
            receiver: p.receiver,
            value: p.value,
            data: p.data,
        }
    }
}

impl GovProposal {
    /// RLP payload carried by the governance transaction.
    pub fn payload(&self) -> Bytes {
        alloy_rlp::encode(self).into()
    }

    /// The unsigned governance transaction for this proposal.
    pub fn to_transaction(&self, nonce: u64, gas_limit: u64, chain_id: u64) -> TxLegacy {
        TxLegacy {
            chain_id: Some(chain_id),
            nonce,
            gas_price: 0,
            gas_limit,
            to: TxKind::Call(SYS_GOV_TO),
            value: U256::ZERO,
            input: self.payload(),
        }
    }

    /// Whether a received governance transaction matches this proposal.
    pub fn matches(&self, tx: &TxLegacy) -> bool {
        tx.to == TxKind::Call(SYS_GOV_TO)
            && tx.value == U256::ZERO
            && tx.gas_price == 0
            && tx.input == self.payload()
    }
}
