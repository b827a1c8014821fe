//! Seal codec: the canonical header serialization validators sign, and
//! recovery of the sealer address from the 65-byte suffix of `extraData`.

use crate::{constants::EXTRA_SEAL, error::DposError, header::Header};
use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_rlp::Encodable;
use bytes::{BufMut, BytesMut};
use parking_lot::RwLock;
use schnellru::{ByLength, LruMap};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, SECP256K1,
};

/// Seal hash of a header: keccak over the chain-id-prefixed RLP with the
/// 65-byte signature stripped from `extraData`. This is the digest validators
/// sign; it is independent of the distribution fields appended after `nonce`.
pub fn seal_hash(header: &Header, chain_id: u64) -> B256 {
    keccak256(seal_rlp(header, chain_id))
}

/// The RLP bytes that need to be signed for sealing.
///
/// Panics if `extra_data` is shorter than 65 bytes. This is deliberate: a
/// fallback encoding without the signature hole could be abused to produce two
/// different hashes for the same header.
pub fn seal_rlp(header: &Header, chain_id: u64) -> Vec<u8> {
    let mut out = BytesMut::new();
    encode_seal_header(header, &mut out, chain_id);
    out.to_vec()
}

fn encode_seal_header(header: &Header, out: &mut dyn BufMut, chain_id: u64) {
    rlp_header(header, chain_id).encode(out);
    Encodable::encode(&U256::from(chain_id), out);
    Encodable::encode(&header.parent_hash, out);
    Encodable::encode(&header.uncle_hash, out);
    Encodable::encode(&header.coinbase, out);
    Encodable::encode(&header.state_root, out);
    Encodable::encode(&header.transactions_root, out);
    Encodable::encode(&header.receipts_root, out);
    Encodable::encode(&header.logs_bloom, out);
    Encodable::encode(&header.difficulty, out);
    Encodable::encode(&U256::from(header.number), out);
    Encodable::encode(&header.gas_limit, out);
    Encodable::encode(&header.gas_used, out);
    Encodable::encode(&header.timestamp, out);
    Encodable::encode(&header.extra_data[..header.extra_data.len() - EXTRA_SEAL], out);
    Encodable::encode(&header.mix_digest, out);
    Encodable::encode(&header.nonce, out);
}

fn rlp_header(header: &Header, chain_id: u64) -> alloy_rlp::Header {
    let mut rlp_head = alloy_rlp::Header { list: true, payload_length: 0 };

    rlp_head.payload_length += U256::from(chain_id).length();
    rlp_head.payload_length += header.parent_hash.length();
    rlp_head.payload_length += header.uncle_hash.length();
    rlp_head.payload_length += header.coinbase.length();
    rlp_head.payload_length += header.state_root.length();
    rlp_head.payload_length += header.transactions_root.length();
    rlp_head.payload_length += header.receipts_root.length();
    rlp_head.payload_length += header.logs_bloom.length();
    rlp_head.payload_length += header.difficulty.length();
    rlp_head.payload_length += U256::from(header.number).length();
    rlp_head.payload_length += header.gas_limit.length();
    rlp_head.payload_length += header.gas_used.length();
    rlp_head.payload_length += header.timestamp.length();
    rlp_head.payload_length += header.extra_data[..header.extra_data.len() - EXTRA_SEAL].length();
    rlp_head.payload_length += header.mix_digest.length();
    rlp_head.payload_length += header.nonce.length();

    rlp_head
}

/// LRU of recovered sealers keyed by the full block hash.
pub struct SignatureCache {
    inner: RwLock<LruMap<B256, Address, ByLength>>,
}

impl SignatureCache {
    pub fn new(capacity: u32) -> Self {
        Self { inner: RwLock::new(LruMap::new(ByLength::new(capacity))) }
    }

    /// Extracts the sealer address from a signed header.
    pub fn recover(&self, header: &Header, chain_id: u64) -> Result<Address, DposError> {
        let hash = header.hash_slow();
        if let Some(sealer) = self.inner.write().get(&hash) {
            return Ok(*sealer);
        }

        if header.extra_data.len() < EXTRA_SEAL {
            return Err(DposError::MissingSignature);
        }
        let signature = &header.extra_data[header.extra_data.len() - EXTRA_SEAL..];

        let recovery_id = RecoveryId::from_i32(signature[EXTRA_SEAL - 1] as i32)
            .map_err(|_| DposError::SignatureRecovery)?;
        let signature = RecoverableSignature::from_compact(&signature[..EXTRA_SEAL - 1], recovery_id)
            .map_err(|_| DposError::SignatureRecovery)?;

        let message = Message::from_digest_slice(seal_hash(header, chain_id).as_slice())
            .map_err(|_| DposError::SignatureRecovery)?;
        let public = SECP256K1
            .recover_ecdsa(&message, &signature)
            .map_err(|_| DposError::SignatureRecovery)?;

        let sealer =
            Address::from_slice(&keccak256(&public.serialize_uncompressed()[1..])[12..]);

        self.inner.write().insert(hash, sealer);
        Ok(sealer)
    }
}
