//! The DPoS engine: caches, signing identity, and system-contract access.

mod finalize;
mod prepare;
mod sealer;
mod verify;

pub use finalize::SystemTxSource;
pub use sealer::calc_difficulty;

use crate::{
    blacklist::BlacklistCache,
    config::{ChainConfig, DposConfig},
    constants::{IN_MEMORY_BLACKLISTS, IN_MEMORY_SIGNATURES, IN_MEMORY_SNAPSHOTS},
    error::DposError,
    header::Header,
    lottery::{self, VoteInfo},
    provider::{HeaderReader, KeyValueStore, SignFn, SignTxFn, StateDb, StateFn, SystemMsg, VmCaller},
    seal::SignatureCache,
    snapshot::Snapshot,
    system_contracts::{self, ValidatorFactory},
    system_txs::{self, SignedSystemTx},
};
use alloy_primitives::{Address, Bytes, B256};
use alloy_sol_types::SolCall;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use schnellru::{ByLength, LruMap};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

/// Distribution rates used when the validator factory cannot be read.
pub const DEFAULT_TEAM_RATE: u64 = 400;
pub const DEFAULT_VALIDATOR_RATE: u64 = 1000;

#[derive(Default)]
struct SignerSlot {
    val: Address,
    sign_fn: Option<SignFn>,
    sign_tx_fn: Option<SignTxFn>,
    // retained per address so a node can re-authorize a known key without
    // re-supplying the callbacks
    sign_fns: HashMap<Address, SignFn>,
    sign_tx_fns: HashMap<Address, SignTxFn>,
}

/// The DPoS consensus engine.
pub struct Dpos {
    chain_config: ChainConfig,
    config: DposConfig,
    genesis_hash: B256,
    db: Arc<dyn KeyValueStore>,
    vm: Arc<dyn VmCaller>,

    recent_snaps: RwLock<LruMap<B256, Snapshot, ByLength>>,
    signatures: SignatureCache,
    blacklists: BlacklistCache,

    signer: RwLock<SignerSlot>,
    state_fn: RwLock<Option<StateFn>>,

    /// Lazily resolved provider-factory address; only a non-zero resolution
    /// is cached so an uninitialized factory is retried on later blocks.
    provider_factory: OnceCell<Address>,
}

impl Dpos {
    pub fn new(
        chain_config: ChainConfig,
        config: DposConfig,
        db: Arc<dyn KeyValueStore>,
        vm: Arc<dyn VmCaller>,
        genesis_hash: B256,
    ) -> Self {
        Self {
            chain_config,
            config: config.sanitize(),
            genesis_hash,
            db,
            vm,
            recent_snaps: RwLock::new(LruMap::new(ByLength::new(IN_MEMORY_SNAPSHOTS))),
            signatures: SignatureCache::new(IN_MEMORY_SIGNATURES),
            blacklists: BlacklistCache::new(IN_MEMORY_BLACKLISTS),
            signer: RwLock::new(SignerSlot::default()),
            state_fn: RwLock::new(None),
            provider_factory: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &DposConfig {
        &self.config
    }

    pub fn chain_config(&self) -> &ChainConfig {
        &self.chain_config
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_config.chain_id
    }

    pub fn genesis_hash(&self) -> B256 {
        self.genesis_hash
    }

    /// Installs the accessor used to open state at a given root.
    pub fn set_state_fn(&self, state_fn: StateFn) {
        *self.state_fn.write() = Some(state_fn);
    }

    /// Injects the signing identity used to seal blocks. Passing `None` for
    /// the callbacks switches back to a previously authorized address;
    /// returns false when no callbacks are known for it.
    pub fn authorize(
        &self,
        val: Address,
        sign_fn: Option<SignFn>,
        sign_tx_fn: Option<SignTxFn>,
    ) -> bool {
        let mut slot = self.signer.write();
        slot.val = val;
        match sign_fn {
            Some(sign_fn) => {
                slot.sign_fns.insert(val, sign_fn.clone());
                slot.sign_fn = Some(sign_fn);
                if let Some(sign_tx_fn) = sign_tx_fn {
                    slot.sign_tx_fns.insert(val, sign_tx_fn.clone());
                    slot.sign_tx_fn = Some(sign_tx_fn);
                }
                true
            }
            None => {
                let Some(sign_fn) = slot.sign_fns.get(&val).cloned() else { return false };
                let Some(sign_tx_fn) = slot.sign_tx_fns.get(&val).cloned() else { return false };
                slot.sign_fn = Some(sign_fn);
                slot.sign_tx_fn = Some(sign_tx_fn);
                true
            }
        }
    }

    /// The account that sealed the block. Coinbase and sealer must agree, so
    /// this never needs a signature recovery.
    pub fn author(&self, header: &Header) -> Address {
        header.coinbase
    }

    /// Whether the local signing identity produced this block.
    pub fn is_local_block(&self, header: &Header) -> bool {
        self.signer.read().val == header.coinbase
    }

    pub fn is_system_contract(&self, to: Address) -> bool {
        system_contracts::is_system_contract(to)
    }

    pub fn is_system_transaction(&self, tx: &SignedSystemTx, header: &Header) -> bool {
        system_txs::is_system_transaction(tx, header)
    }

    pub(crate) fn validator(&self) -> Address {
        self.signer.read().val
    }

    pub(crate) fn sign_fn(&self) -> Option<SignFn> {
        self.signer.read().sign_fn.clone()
    }

    pub(crate) fn sign_tx_fn(&self) -> Option<SignTxFn> {
        self.signer.read().sign_tx_fn.clone()
    }

    pub(crate) fn db(&self) -> &dyn KeyValueStore {
        self.db.as_ref()
    }

    pub(crate) fn vm(&self) -> &dyn VmCaller {
        self.vm.as_ref()
    }

    pub(crate) fn signatures(&self) -> &SignatureCache {
        &self.signatures
    }

    pub(crate) fn recent_snaps(&self) -> &RwLock<LruMap<B256, Snapshot, ByLength>> {
        &self.recent_snaps
    }

    pub(crate) fn blacklists(&self) -> &BlacklistCache {
        &self.blacklists
    }

    pub(crate) fn state_at(&self, root: B256) -> Result<Box<dyn StateDb>, DposError> {
        let guard = self.state_fn.read();
        let state_fn = guard.as_ref().ok_or(DposError::StateFnUnset)?;
        state_fn(root)
    }

    /// Executes a read-only contract call against the parent state of
    /// `header`.
    fn read_at_parent(
        &self,
        chain: &dyn HeaderReader,
        header: &Header,
        to: Address,
        input: Bytes,
    ) -> Result<Bytes, DposError> {
        let parent = chain
            .header(&header.parent_hash, header.number.saturating_sub(1))
            .ok_or(DposError::UnknownAncestor)?;
        let mut state = self.state_at(parent.state_root)?;
        let msg = SystemMsg::call(header.coinbase, to, input);
        self.vm.execute_msg(&msg, state.as_mut(), &parent)
    }

    /// The active validator set from state, sorted ascending by address.
    pub fn get_top_validators(
        &self,
        chain: &dyn HeaderReader,
        header: &Header,
    ) -> Result<Vec<Address>, DposError> {
        let (to, data) = system_contracts::get_all_active_validators();
        let ret = self.read_at_parent(chain, header, to, data)?;
        let mut validators =
            ValidatorFactory::getAllActiveValidatorAddrCall::abi_decode_returns(&ret)?;
        validators.sort();
        Ok(validators)
    }

    /// The (team, validator) distribution rates from state, falling back to
    /// the defaults on any failure.
    pub fn get_distribute_rate(&self, chain: &dyn HeaderReader, header: &Header) -> (u64, u64) {
        match self.try_get_distribute_rate(chain, header) {
            Ok(rates) => rates,
            Err(err) => {
                tracing::debug!(%err, "falling back to default distribute rates");
                (DEFAULT_TEAM_RATE, DEFAULT_VALIDATOR_RATE)
            }
        }
    }

    fn try_get_distribute_rate(
        &self,
        chain: &dyn HeaderReader,
        header: &Header,
    ) -> Result<(u64, u64), DposError> {
        let (to, data) = system_contracts::team_percent();
        let ret = self.read_at_parent(chain, header, to, data)?;
        let team = ValidatorFactory::team_percentCall::abi_decode_returns(&ret)?;

        let (to, data) = system_contracts::validator_percent();
        let ret = self.read_at_parent(chain, header, to, data)?;
        let validator = ValidatorFactory::validator_percentCall::abi_decode_returns(&ret)?;

        Ok((team.wrapping_to::<u64>(), validator.wrapping_to::<u64>()))
    }

    pub fn get_team_address(
        &self,
        chain: &dyn HeaderReader,
        header: &Header,
    ) -> Result<Address, DposError> {
        let (to, data) = system_contracts::team_address();
        let ret = self.read_at_parent(chain, header, to, data)?;
        Ok(ValidatorFactory::team_addressCall::abi_decode_returns(&ret)?)
    }

    fn provider_factory_address(
        &self,
        chain: &dyn HeaderReader,
        header: &Header,
    ) -> Result<Address, DposError> {
        if let Some(addr) = self.provider_factory.get() {
            return Ok(*addr);
        }
        let (to, data) = system_contracts::provider_factory();
        let ret = self.read_at_parent(chain, header, to, data)?;
        let addr = ValidatorFactory::providerFactoryCall::abi_decode_returns(&ret)?;
        if addr != Address::ZERO {
            let _ = self.provider_factory.set(addr);
        }
        Ok(addr)
    }

    /// Filtered and weighed provider entries for the lottery, in contract
    /// order.
    pub fn get_provider_infos(
        &self,
        chain: &dyn HeaderReader,
        header: &Header,
    ) -> Result<Vec<VoteInfo>, DposError> {
        let factory = self.provider_factory_address(chain, header)?;
        if factory == Address::ZERO {
            return Ok(Vec::new());
        }
        let (to, data) = system_contracts::get_provider_info(factory);
        let ret = self.read_at_parent(chain, header, to, data)?;
        let providers =
            crate::system_contracts::ProviderFactory::getProviderInfoCall::abi_decode_returns(&ret)?;
        Ok(lottery::collect_votes(&providers))
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
