//! Miner-originated system transactions: detection and block splitting.

use crate::{header::Header, system_contracts::is_system_contract};
use alloy_consensus::{Signed, TxLegacy};
use alloy_primitives::{Address, TxKind, B256};

/// A legacy transaction with its recovered sender. The host recovers senders
/// once; the engine never re-derives them.
#[derive(Debug, Clone)]
pub struct SignedSystemTx {
    pub sender: Address,
    pub tx: Signed<TxLegacy>,
}

impl SignedSystemTx {
    pub fn new(sender: Address, tx: Signed<TxLegacy>) -> Self {
        Self { sender, tx }
    }

    pub fn hash(&self) -> B256 {
        *self.tx.hash()
    }

    pub fn to(&self) -> Option<Address> {
        match self.tx.tx().to {
            TxKind::Call(to) => Some(to),
            TxKind::Create => None,
        }
    }
}

/// A transaction is a system transaction when it calls a system contract,
/// originates from the block's coinbase, and carries a zero gas price.
pub fn is_system_transaction(tx: &SignedSystemTx, header: &Header) -> bool {
    match tx.to() {
        Some(to) => {
            tx.sender == header.coinbase && is_system_contract(to) && tx.tx.tx().gas_price == 0
        }
        None => false,
    }
}

/// A block body partitioned into user and system transactions.
#[derive(Debug, Clone, Default)]
pub struct SplitTxs {
    pub user_txs: Vec<SignedSystemTx>,
    pub system_txs: Vec<SignedSystemTx>,
}

/// Partitions a block body, preserving order within both halves.
pub fn split_txs(transactions: Vec<SignedSystemTx>, header: &Header) -> SplitTxs {
    let mut split = SplitTxs::default();
    for tx in transactions {
        if is_system_transaction(&tx, header) {
            split.system_txs.push(tx);
        } else {
            split.user_txs.push(tx);
        }
    }
    split
}
