//! Interfaces the engine consumes from the host node.
//!
//! The engine never stores the chain: it receives a [`HeaderReader`] on every
//! call that needs ancestry, and reaches state and the VM through the
//! accessors installed at construction time.

use crate::{error::DposError, header::Header};
use alloy_consensus::{Signed, TxLegacy};
use alloy_primitives::{Address, Bytes, B256, U256};
use std::sync::Arc;

/// Mime type handed to the signing callback along with the seal RLP.
pub const MIMETYPE_DPOS: &str = "application/x-dpos-header";

/// Read-only view of the header chain.
pub trait HeaderReader: Send + Sync {
    /// Header with the given hash at the given height.
    fn header(&self, hash: &B256, number: u64) -> Option<Header>;

    /// Canonical header at the given height.
    fn header_by_number(&self, number: u64) -> Option<Header>;

    fn header_by_hash(&self, hash: &B256) -> Option<Header>;

    /// Current canonical chain head.
    fn current_header(&self) -> Option<Header>;
}

/// Key-value store used for snapshot checkpoints.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DposError>;
}

/// Mutable account state at one block. Lock balances are the engine's
/// time-release ledger, kept separate from spendable balances.
pub trait StateDb {
    fn balance(&self, address: Address) -> U256;
    fn set_balance(&mut self, address: Address, amount: U256);
    fn add_balance(&mut self, address: Address, amount: U256);

    fn lock_balance(&self, address: Address) -> U256;
    fn set_lock_balance(&mut self, address: Address, amount: U256);
    fn add_lock_balance(&mut self, address: Address, amount: U256);
    fn sub_lock_balance(&mut self, address: Address, amount: U256);

    fn nonce(&self, address: Address) -> u64;
    fn set_nonce(&mut self, address: Address, nonce: u64);

    /// Raw storage slot read, used for developer-verification checks.
    fn storage(&self, address: Address, slot: B256) -> B256;

    /// Current state root with all pending changes folded in.
    fn intermediate_root(&mut self) -> B256;
}

/// A call message executed against in-state system contracts.
#[derive(Debug, Clone)]
pub struct SystemMsg {
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: U256,
    pub input: Bytes,
    /// True for state-mutating system calls, false for read-only queries.
    pub apply: bool,
}

impl SystemMsg {
    /// Read-only contract query.
    pub fn call(from: Address, to: Address, input: Bytes) -> Self {
        Self {
            from,
            to,
            nonce: 0,
            value: U256::ZERO,
            gas_limit: u64::MAX,
            gas_price: U256::ZERO,
            input,
            apply: false,
        }
    }

    /// State-mutating system invocation originated by the coinbase.
    pub fn transact(from: Address, to: Address, nonce: u64, value: U256, input: Bytes) -> Self {
        Self {
            from,
            to,
            nonce,
            value,
            gas_limit: u64::MAX,
            gas_price: U256::ZERO,
            input,
            apply: true,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }
}

/// Transaction-execution VM, treated as a black box. Calls run to completion
/// or fail; they are not interruptible mid-call.
pub trait VmCaller: Send + Sync {
    fn execute_msg(
        &self,
        msg: &SystemMsg,
        state: &mut dyn StateDb,
        header: &Header,
    ) -> Result<Bytes, DposError>;
}

/// Resolves the state database at a given state root.
pub type StateFn = Box<dyn Fn(B256) -> Result<Box<dyn StateDb>, DposError> + Send + Sync>;

/// Signer callback producing a 65-byte recoverable signature over the given
/// payload on behalf of the account.
pub type SignFn = Arc<dyn Fn(Address, &str, &[u8]) -> Result<[u8; 65], DposError> + Send + Sync>;

/// Signer callback for transactions (EIP-155 with the given chain id).
pub type SignTxFn =
    Arc<dyn Fn(Address, TxLegacy, u64) -> Result<Signed<TxLegacy>, DposError> + Send + Sync>;
