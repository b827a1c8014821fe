//! DPoS consensus engine: authority rotation with staked-provider reward
//! sharing.
//!
//! The engine decides who may seal each block, verifies that rule on incoming
//! headers, and drives the on-chain economic loop (delayed block rewards, the
//! provider lottery, validator punishment and governance proposals) through
//! system contracts executed in state. It is a library: the host node supplies
//! header storage, the state database, the VM and the key-value store through
//! the traits in [`provider`].

pub mod backoff;
pub mod blacklist;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod forkid;
pub mod header;
pub mod lottery;
pub mod provider;
pub mod reward;
pub mod rpc;
pub mod seal;
pub mod snapshot;
pub mod system_contracts;
pub mod system_txs;

pub use config::{ChainConfig, DposConfig};
pub use engine::Dpos;
pub use error::DposError;
pub use header::{Block, Header};
pub use provider::{HeaderReader, KeyValueStore, StateDb, SystemMsg, VmCaller};
pub use snapshot::Snapshot;
pub use system_txs::SignedSystemTx;
