//! Shared fixtures: an in-memory chain, state and VM, plus signing helpers.

#![allow(dead_code)]

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use dpos_engine::{
    constants::{EXTRA_SEAL, EXTRA_VANITY},
    error::DposError,
    header::Header,
    provider::{HeaderReader, KeyValueStore, SignFn, SignTxFn, StateDb, SystemMsg, VmCaller},
    ChainConfig, Dpos, DposConfig,
};
use parking_lot::Mutex;
use secp256k1::{PublicKey, SecretKey, SECP256K1};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

pub const CHAIN_ID: u64 = 919;

pub fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

// ---------------------------------------------------------------------------
// validator keys
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ValidatorKey {
    pub secret: SecretKey,
    pub address: Address,
}

pub fn validator_key(seed: u8) -> ValidatorKey {
    let secret = SecretKey::from_slice(&[seed; 32]).unwrap();
    let public = PublicKey::from_secret_key(SECP256K1, &secret);
    let address = Address::from_slice(&keccak256(&public.serialize_uncompressed()[1..])[12..]);
    ValidatorKey { secret, address }
}

/// `n` keys sorted ascending by address, the order the engine keeps them in.
pub fn validator_keys(n: usize) -> Vec<ValidatorKey> {
    let mut keys: Vec<ValidatorKey> = (1..=n as u8).map(validator_key).collect();
    keys.sort_by_key(|k| k.address);
    keys
}

pub fn sign_header(header: &mut Header, secret: &SecretKey) {
    let digest = dpos_engine::seal::seal_hash(header, CHAIN_ID);
    let message = secp256k1::Message::from_digest_slice(digest.as_slice()).unwrap();
    let (rec_id, sig) = SECP256K1.sign_ecdsa_recoverable(&message, secret).serialize_compact();
    let mut extra = header.extra_data.to_vec();
    let start = extra.len() - EXTRA_SEAL;
    extra[start..start + 64].copy_from_slice(&sig);
    extra[start + 64] = rec_id.to_i32() as u8;
    header.extra_data = Bytes::from(extra);
}

/// Wallet-style signing callback for `key`: hashes the payload and signs.
pub fn sign_fn_for(key: &ValidatorKey) -> SignFn {
    let secret = key.secret;
    Arc::new(move |_, _, payload: &[u8]| {
        let digest = keccak256(payload);
        let message = secp256k1::Message::from_digest_slice(digest.as_slice()).unwrap();
        let (rec_id, sig) = SECP256K1.sign_ecdsa_recoverable(&message, &secret).serialize_compact();
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig);
        out[64] = rec_id.to_i32() as u8;
        Ok(out)
    })
}

/// Transaction signer stub: system-tx matching never checks the signature, so
/// a placeholder signature is enough.
pub fn sign_tx_fn_stub() -> SignTxFn {
    use alloy_consensus::SignableTransaction;
    Arc::new(|_, tx, _| {
        let signature =
            alloy_primitives::Signature::new(Default::default(), Default::default(), false);
        Ok(tx.into_signed(signature))
    })
}

// ---------------------------------------------------------------------------
// headers
// ---------------------------------------------------------------------------

pub fn empty_extra() -> Bytes {
    Bytes::from(vec![0u8; EXTRA_VANITY + EXTRA_SEAL])
}

pub fn epoch_extra(validators: &[Address]) -> Bytes {
    let mut extra = vec![0u8; EXTRA_VANITY];
    for validator in validators {
        extra.extend_from_slice(validator.as_slice());
    }
    extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
    Bytes::from(extra)
}

/// Genesis carrying the initial validator set in its extra-data.
pub fn genesis(validators: &[Address], timestamp: u64) -> Header {
    Header {
        number: 0,
        gas_limit: 30_000_000,
        timestamp,
        extra_data: epoch_extra(validators),
        ..Default::default()
    }
}

/// Unsigned child header with sane defaults; seal it with `sign_header`.
pub fn child_of(parent: &Header, coinbase: Address, period: u64) -> Header {
    Header {
        parent_hash: parent.hash_slow(),
        uncle_hash: alloy_consensus::constants::EMPTY_OMMER_ROOT_HASH,
        number: parent.number + 1,
        coinbase,
        gas_limit: parent.gas_limit,
        timestamp: parent.timestamp + period,
        difficulty: U256::from(1),
        extra_data: empty_extra(),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// chain / db / state / vm mocks
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockChain {
    inner: Mutex<ChainInner>,
}

#[derive(Default)]
struct ChainInner {
    by_hash: HashMap<B256, Header>,
    by_number: HashMap<u64, Header>,
    head: u64,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, header: Header) -> B256 {
        let hash = header.hash_slow();
        let mut inner = self.inner.lock();
        inner.head = inner.head.max(header.number);
        inner.by_number.insert(header.number, header.clone());
        inner.by_hash.insert(hash, header);
        hash
    }
}

impl HeaderReader for MockChain {
    fn header(&self, hash: &B256, number: u64) -> Option<Header> {
        let inner = self.inner.lock();
        inner.by_hash.get(hash).filter(|h| h.number == number).cloned()
    }

    fn header_by_number(&self, number: u64) -> Option<Header> {
        self.inner.lock().by_number.get(&number).cloned()
    }

    fn header_by_hash(&self, hash: &B256) -> Option<Header> {
        self.inner.lock().by_hash.get(hash).cloned()
    }

    fn current_header(&self) -> Option<Header> {
        let inner = self.inner.lock();
        inner.by_number.get(&inner.head).cloned()
    }
}

#[derive(Default)]
pub struct MemoryDb {
    inner: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.inner.lock().contains_key(key)
    }
}

impl KeyValueStore for MemoryDb {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.lock().get(key).cloned()
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), DposError> {
        self.inner.lock().insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}

/// Account state shared between the test body and the engine's `StateFn`.
#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<StateInner>>,
}

#[derive(Default)]
struct StateInner {
    balances: HashMap<Address, U256>,
    lock_balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    storage: HashMap<(Address, B256), B256>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_storage(&self, address: Address, slot: B256, value: B256) {
        self.inner.lock().storage.insert((address, slot), value);
    }
}

impl StateDb for SharedState {
    fn balance(&self, address: Address) -> U256 {
        self.inner.lock().balances.get(&address).copied().unwrap_or_default()
    }

    fn set_balance(&mut self, address: Address, amount: U256) {
        self.inner.lock().balances.insert(address, amount);
    }

    fn add_balance(&mut self, address: Address, amount: U256) {
        let mut inner = self.inner.lock();
        let entry = inner.balances.entry(address).or_default();
        *entry += amount;
    }

    fn lock_balance(&self, address: Address) -> U256 {
        self.inner.lock().lock_balances.get(&address).copied().unwrap_or_default()
    }

    fn set_lock_balance(&mut self, address: Address, amount: U256) {
        self.inner.lock().lock_balances.insert(address, amount);
    }

    fn add_lock_balance(&mut self, address: Address, amount: U256) {
        let mut inner = self.inner.lock();
        let entry = inner.lock_balances.entry(address).or_default();
        *entry += amount;
    }

    fn sub_lock_balance(&mut self, address: Address, amount: U256) {
        let mut inner = self.inner.lock();
        let entry = inner.lock_balances.entry(address).or_default();
        *entry = entry.saturating_sub(amount);
    }

    fn nonce(&self, address: Address) -> u64 {
        self.inner.lock().nonces.get(&address).copied().unwrap_or_default()
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.inner.lock().nonces.insert(address, nonce);
    }

    fn storage(&self, address: Address, slot: B256) -> B256 {
        self.inner.lock().storage.get(&(address, slot)).copied().unwrap_or_default()
    }

    fn intermediate_root(&mut self) -> B256 {
        B256::repeat_byte(0xd1)
    }
}

/// VM stub answering contract calls by method selector.
#[derive(Default)]
pub struct MockVm {
    responses: Mutex<HashMap<[u8; 4], Bytes>>,
    calls: Mutex<Vec<SystemMsg>>,
}

impl MockVm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, selector: [u8; 4], response: Vec<u8>) {
        self.responses.lock().insert(selector, Bytes::from(response));
    }

    /// Every message the engine executed, in order.
    pub fn calls(&self) -> Vec<SystemMsg> {
        self.calls.lock().clone()
    }

    pub fn calls_with_selector(&self, selector: [u8; 4]) -> Vec<SystemMsg> {
        self.calls
            .lock()
            .iter()
            .filter(|msg| msg.input.len() >= 4 && msg.input[..4] == selector)
            .cloned()
            .collect()
    }
}

impl VmCaller for MockVm {
    fn execute_msg(
        &self,
        msg: &SystemMsg,
        _state: &mut dyn StateDb,
        _header: &Header,
    ) -> Result<Bytes, DposError> {
        self.calls.lock().push(msg.clone());
        if msg.input.len() >= 4 {
            let mut selector = [0u8; 4];
            selector.copy_from_slice(&msg.input[..4]);
            if let Some(response) = self.responses.lock().get(&selector) {
                return Ok(response.clone());
            }
        }
        Err(DposError::VmError(format!("unexpected call to {}", msg.to)))
    }
}

// ---------------------------------------------------------------------------
// engine setup
// ---------------------------------------------------------------------------

pub struct Harness {
    pub chain: Arc<MockChain>,
    pub db: Arc<MemoryDb>,
    pub vm: Arc<MockVm>,
    pub state: SharedState,
    pub engine: Arc<Dpos>,
}

pub fn harness(config: DposConfig, chain_config: ChainConfig, genesis_header: Header) -> Harness {
    let chain = MockChain::new();
    let db = MemoryDb::new();
    let vm = MockVm::new();
    let state = SharedState::new();

    let genesis_hash = chain.insert(genesis_header);
    let engine = Arc::new(Dpos::new(chain_config, config, db.clone(), vm.clone(), genesis_hash));

    let state_handle = state.clone();
    engine.set_state_fn(Box::new(move |_root| Ok(Box::new(state_handle.clone()))));

    Harness { chain, db, vm, state, engine }
}

pub fn default_chain_config() -> ChainConfig {
    ChainConfig { chain_id: CHAIN_ID, redcoast_block: None, ramanujan_block: None }
}
