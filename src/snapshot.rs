//! Authority snapshot: the validator set and recent-sealer window derived
//! from the header chain at a given block.

use crate::{
    constants::{EXTRA_SEAL, EXTRA_VANITY, SNAPSHOT_FORMAT_VERSION, SNAPSHOT_KEY_PREFIX, VALIDATOR_BYTES_LEN},
    error::DposError,
    header::Header,
    provider::KeyValueStore,
    seal::SignatureCache,
};
use alloy_primitives::{Address, B256};
use std::collections::{BTreeMap, BTreeSet};

/// Pure value describing authority state after a header. Two nodes replaying
/// the same header chain must arrive at byte-identical snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Epoch length the snapshot was built with.
    pub epoch: u64,
    /// Block number this snapshot covers.
    pub number: u64,
    /// Hash of the block this snapshot covers.
    pub hash: B256,
    /// Authorized validators, iterated ascending by address bytes.
    pub validators: BTreeSet<Address>,
    /// Recent sealers: block number -> address, bounded by the recency limit.
    pub recents: BTreeMap<u64, Address>,
}

impl Snapshot {
    /// Fresh snapshot with no recent-sealer history, used at genesis and when
    /// checkpointing a freshly elected set.
    pub fn new(epoch: u64, number: u64, hash: B256, validators: Vec<Address>) -> Self {
        Self { epoch, number, hash, validators: validators.into_iter().collect(), recents: BTreeMap::new() }
    }

    /// Parses 20-byte-stride validator addresses from an epoch header's
    /// middle extra section.
    pub fn parse_validators(bytes: &[u8]) -> Result<Vec<Address>, DposError> {
        if bytes.len() % VALIDATOR_BYTES_LEN != 0 {
            return Err(DposError::InvalidSpanValidators);
        }
        Ok(bytes
            .chunks_exact(VALIDATOR_BYTES_LEN)
            .map(Address::from_slice)
            .collect())
    }

    /// Validators in ascending address order.
    pub fn validators(&self) -> Vec<Address> {
        self.validators.iter().copied().collect()
    }

    /// Sliding-window size within which a validator may not re-seal.
    pub fn recency_limit(&self) -> u64 {
        (self.validators.len() / 2 + 1) as u64
    }

    pub fn index_of(&self, validator: Address) -> Option<usize> {
        self.validators.iter().position(|&v| v == validator)
    }

    /// The validator expected to seal the block after this snapshot.
    pub fn inturn_validator(&self) -> Address {
        let sorted = self.validators();
        sorted[((self.number + 1) % sorted.len() as u64) as usize]
    }

    pub fn inturn(&self, validator: Address) -> bool {
        self.inturn_validator() == validator
    }

    /// Whether sealing block `next_number` with `validator` would violate the
    /// recents window.
    pub fn signed_recently(&self, validator: Address, next_number: u64) -> bool {
        let limit = self.recency_limit();
        self.recents
            .iter()
            .any(|(&seen, &who)| who == validator && (next_number < limit || seen > next_number - limit))
    }

    /// Distance heuristic used by the miner to decide whether re-mining a
    /// block is worthwhile for `validator`.
    pub fn enough_distance(&self, validator: Address, header: &Header) -> bool {
        let Some(idx) = self.index_of(validator) else { return true };
        let n = self.validators.len() as i64;
        if n == 1 {
            return true;
        }
        if validator == header.coinbase {
            return false;
        }
        let offset = (self.number as i64 + 1) % n;
        let idx = idx as i64;
        if idx >= offset {
            idx - offset >= n - 2
        } else {
            n + idx - offset >= n - 2
        }
    }

    /// Folds `headers` (ascending, contiguous, starting right after this
    /// snapshot) into a new snapshot, rotating the validator set at epoch
    /// boundaries.
    pub fn apply(
        &self,
        headers: &[Header],
        sigcache: &SignatureCache,
        chain_id: u64,
    ) -> Result<Snapshot, DposError> {
        if headers.is_empty() {
            return Ok(self.clone());
        }
        for pair in headers.windows(2) {
            if pair[1].number != pair[0].number + 1 {
                return Err(DposError::OutOfRangeChain);
            }
            if pair[1].parent_hash != pair[0].hash_slow() {
                return Err(DposError::BlockHashInconsistent);
            }
        }
        if headers[0].number != self.number + 1 {
            return Err(DposError::OutOfRangeChain);
        }
        if headers[0].parent_hash != self.hash {
            return Err(DposError::BlockHashInconsistent);
        }

        let mut snap = self.clone();
        for header in headers {
            let number = header.number;

            // Slide the recents window before judging the new sealer.
            let limit = snap.recency_limit();
            if number >= limit {
                let cutoff = number - limit;
                snap.recents.retain(|&seen, _| seen > cutoff);
            }

            let sealer = sigcache.recover(header, chain_id)?;
            if !snap.validators.contains(&sealer) {
                return Err(DposError::UnauthorizedValidator);
            }
            if snap.recents.values().any(|&recent| recent == sealer) {
                return Err(DposError::RecentlySigned);
            }

            // Epoch boundary: re-elect from the header's validator section.
            // The recents window is deliberately left in place so rapid
            // validator churn cannot erase it.
            if number % snap.epoch == 0 {
                let extra = &header.extra_data;
                if extra.len() < EXTRA_VANITY + EXTRA_SEAL {
                    return Err(DposError::MissingSignature);
                }
                let elected =
                    Self::parse_validators(&extra[EXTRA_VANITY..extra.len() - EXTRA_SEAL])?;
                if elected.is_empty() {
                    return Err(DposError::InvalidValidatorsLength);
                }
                snap.validators = elected.into_iter().collect();
            }

            snap.recents.insert(number, sealer);
            snap.number = number;
            snap.hash = header.hash_slow();
        }

        Ok(snap)
    }

    /// Serializes the snapshot into its persisted blob form: version byte,
    /// number, hash, epoch, sorted validators, recents pairs (all integers
    /// big-endian).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            1 + 8 + 32 + 8 + 4 + self.validators.len() * 20 + 4 + self.recents.len() * 28,
        );
        buf.push(SNAPSHOT_FORMAT_VERSION);
        buf.extend_from_slice(&self.number.to_be_bytes());
        buf.extend_from_slice(self.hash.as_slice());
        buf.extend_from_slice(&self.epoch.to_be_bytes());
        buf.extend_from_slice(&(self.validators.len() as u32).to_be_bytes());
        for validator in &self.validators {
            buf.extend_from_slice(validator.as_slice());
        }
        buf.extend_from_slice(&(self.recents.len() as u32).to_be_bytes());
        for (number, sealer) in &self.recents {
            buf.extend_from_slice(&number.to_be_bytes());
            buf.extend_from_slice(sealer.as_slice());
        }
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DposError> {
        let mut cursor = Cursor { data, offset: 0 };

        let version = cursor.take(1)?[0];
        if version != SNAPSHOT_FORMAT_VERSION {
            return Err(DposError::SnapshotDecode(format!("unsupported version {version}")));
        }
        let number = u64::from_be_bytes(cursor.take(8)?.try_into().unwrap());
        let hash = B256::from_slice(cursor.take(32)?);
        let epoch = u64::from_be_bytes(cursor.take(8)?.try_into().unwrap());

        let validator_count = u32::from_be_bytes(cursor.take(4)?.try_into().unwrap());
        let mut validators = BTreeSet::new();
        for _ in 0..validator_count {
            validators.insert(Address::from_slice(cursor.take(20)?));
        }

        let recents_count = u32::from_be_bytes(cursor.take(4)?.try_into().unwrap());
        let mut recents = BTreeMap::new();
        for _ in 0..recents_count {
            let seen = u64::from_be_bytes(cursor.take(8)?.try_into().unwrap());
            recents.insert(seen, Address::from_slice(cursor.take(20)?));
        }

        if cursor.offset != data.len() {
            return Err(DposError::SnapshotDecode("trailing bytes".to_string()));
        }
        Ok(Self { epoch, number, hash, validators, recents })
    }

    /// Persists the snapshot blob under its well-known key.
    pub fn store(&self, db: &dyn KeyValueStore) -> Result<(), DposError> {
        db.put(&snapshot_key(&self.hash), &self.to_bytes())
    }

    /// Loads a snapshot blob previously stored for `hash`.
    pub fn load(db: &dyn KeyValueStore, hash: &B256) -> Result<Option<Self>, DposError> {
        match db.get(&snapshot_key(hash)) {
            Some(blob) => Ok(Some(Self::from_bytes(&blob)?)),
            None => Ok(None),
        }
    }
}

/// Storage key of the snapshot blob for a block hash.
pub fn snapshot_key(hash: &B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(SNAPSHOT_KEY_PREFIX.len() + 32);
    key.extend_from_slice(SNAPSHOT_KEY_PREFIX);
    key.extend_from_slice(hash.as_slice());
    key
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], DposError> {
        if self.offset + len > self.data.len() {
            return Err(DposError::SnapshotDecode("truncated blob".to_string()));
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{keccak256, Bytes};
    use secp256k1::{PublicKey, SecretKey, SECP256K1};

    fn key(byte: u8) -> (SecretKey, Address) {
        let secret = SecretKey::from_slice(&[byte; 32]).unwrap();
        let public = PublicKey::from_secret_key(SECP256K1, &secret);
        let address = Address::from_slice(&keccak256(&public.serialize_uncompressed()[1..])[12..]);
        (secret, address)
    }

    fn seal(header: &mut Header, secret: &SecretKey, chain_id: u64) {
        let digest = crate::seal::seal_hash(header, chain_id);
        let message = secp256k1::Message::from_digest_slice(digest.as_slice()).unwrap();
        let (rec_id, sig) = SECP256K1.sign_ecdsa_recoverable(&message, secret).serialize_compact();
        let mut extra = header.extra_data.to_vec();
        let start = extra.len() - EXTRA_SEAL;
        extra[start..start + 64].copy_from_slice(&sig);
        extra[start + 64] = rec_id.to_i32() as u8;
        header.extra_data = Bytes::from(extra);
    }

    fn child(parent: &Header, number: u64, coinbase: Address) -> Header {
        Header {
            parent_hash: parent.hash_slow(),
            number,
            coinbase,
            gas_limit: 30_000_000,
            timestamp: 1000 + number,
            extra_data: Bytes::from(vec![0u8; EXTRA_VANITY + EXTRA_SEAL]),
            ..Default::default()
        }
    }

    const CHAIN_ID: u64 = 919;

    #[test]
    fn blob_roundtrip() {
        let mut snap = Snapshot::new(
            100,
            2048,
            B256::repeat_byte(0x42),
            vec![Address::repeat_byte(3), Address::repeat_byte(1), Address::repeat_byte(2)],
        );
        snap.recents.insert(2047, Address::repeat_byte(1));
        snap.recents.insert(2048, Address::repeat_byte(2));

        let decoded = Snapshot::from_bytes(&snap.to_bytes()).unwrap();
        assert_eq!(decoded, snap);
        // serialization is canonical
        assert_eq!(decoded.to_bytes(), snap.to_bytes());
    }

    #[test]
    fn blob_rejects_unknown_version() {
        let snap = Snapshot::new(100, 1, B256::ZERO, vec![Address::repeat_byte(1)]);
        let mut blob = snap.to_bytes();
        blob[0] = 0x7f;
        assert!(Snapshot::from_bytes(&blob).is_err());
    }

    #[test]
    fn inturn_rotates_by_height() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let c = Address::repeat_byte(3);
        // snapshot at block 0, so block 1 belongs to index 1 % 3
        let snap = Snapshot::new(100, 0, B256::ZERO, vec![c, a, b]);
        assert_eq!(snap.inturn_validator(), b);
        assert!(snap.inturn(b));
        assert!(!snap.inturn(a));
    }

    #[test]
    fn apply_rejects_recent_sealer() {
        // Five validators give a recency limit of 3: a sealer must rest for
        // two blocks before signing again.
        let (sk_a, a) = key(0x11);
        let (sk_b, b) = key(0x22);
        let (sk_c, c) = key(0x33);
        let (_, d) = key(0x44);
        let (_, e) = key(0x55);

        let genesis = Header {
            number: 0,
            extra_data: Bytes::from(vec![0u8; EXTRA_VANITY + EXTRA_SEAL]),
            ..Default::default()
        };
        let snap = Snapshot::new(100, 0, genesis.hash_slow(), vec![a, b, c, d, e]);
        let sigcache = SignatureCache::new(64);

        // A@1, B@2, A@3 keeps A inside the window
        let mut h1 = child(&genesis, 1, a);
        seal(&mut h1, &sk_a, CHAIN_ID);
        let mut h2 = child(&h1, 2, b);
        seal(&mut h2, &sk_b, CHAIN_ID);
        let mut h3 = child(&h2, 3, a);
        seal(&mut h3, &sk_a, CHAIN_ID);

        let err = snap.apply(&[h1.clone(), h2.clone(), h3], &sigcache, CHAIN_ID).unwrap_err();
        assert!(matches!(err, DposError::RecentlySigned));

        // A@1, B@2, C@3, A@4 passes: block 4 slides A's entry out
        let mut h3 = child(&h2, 3, c);
        seal(&mut h3, &sk_c, CHAIN_ID);
        let mut h4 = child(&h3, 4, a);
        seal(&mut h4, &sk_a, CHAIN_ID);

        let folded = snap.apply(&[h1, h2, h3, h4], &sigcache, CHAIN_ID).unwrap();
        assert_eq!(folded.number, 4);
        assert_eq!(folded.recents.len(), 3);
        assert!(!folded.recents.contains_key(&1));
    }

    #[test]
    fn window_boundary_allows_alternating_pair_of_three() {
        // With three validators the limit is 2, so a sealer may return after
        // a single block of rest: A@1, B@2, A@3 is a valid chain.
        let (sk_a, a) = key(0x11);
        let (sk_b, b) = key(0x22);
        let (_, c) = key(0x33);

        let genesis = Header::default();
        let snap = Snapshot::new(100, 0, genesis.hash_slow(), vec![a, b, c]);
        let sigcache = SignatureCache::new(64);

        let mut h1 = child(&genesis, 1, a);
        seal(&mut h1, &sk_a, CHAIN_ID);
        let mut h2 = child(&h1, 2, b);
        seal(&mut h2, &sk_b, CHAIN_ID);
        let mut h3 = child(&h2, 3, a);
        seal(&mut h3, &sk_a, CHAIN_ID);

        let folded = snap.apply(&[h1, h2, h3], &sigcache, CHAIN_ID).unwrap();
        assert_eq!(folded.recents.get(&3), Some(&a));
    }

    #[test]
    fn apply_rejects_unknown_sealer() {
        let (_, a) = key(0x11);
        let (sk_d, d) = key(0x44);
        assert_ne!(a, d);

        let genesis = Header::default();
        let snap = Snapshot::new(100, 0, genesis.hash_slow(), vec![a]);
        let sigcache = SignatureCache::new(64);

        let mut h1 = child(&genesis, 1, d);
        seal(&mut h1, &sk_d, CHAIN_ID);
        let err = snap.apply(&[h1], &sigcache, CHAIN_ID).unwrap_err();
        assert!(matches!(err, DposError::UnauthorizedValidator));
    }

    #[test]
    fn apply_rotates_validators_at_epoch() {
        let (sk_a, a) = key(0x11);
        let (_, b) = key(0x22);

        let genesis = Header::default();
        let snap = Snapshot::new(2, 0, genesis.hash_slow(), vec![a]);
        let sigcache = SignatureCache::new(64);

        let mut h1 = child(&genesis, 1, a);
        seal(&mut h1, &sk_a, CHAIN_ID);

        // epoch boundary at 2 elects {a, b}
        let mut elected = vec![a, b];
        elected.sort();
        let mut extra = vec![0u8; EXTRA_VANITY];
        for v in &elected {
            extra.extend_from_slice(v.as_slice());
        }
        extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
        let mut h2 = child(&h1, 2, a);
        h2.extra_data = Bytes::from(extra);
        seal(&mut h2, &sk_a, CHAIN_ID);

        let folded = snap.apply(&[h1, h2], &sigcache, CHAIN_ID).unwrap();
        assert_eq!(folded.validators(), elected);
        // rotation does not clear the recorded sealer of the epoch block
        assert_eq!(folded.recents.get(&2), Some(&a));
    }

    #[test]
    fn apply_rejects_gaps() {
        let (sk_a, a) = key(0x11);
        let genesis = Header::default();
        let snap = Snapshot::new(100, 0, genesis.hash_slow(), vec![a]);
        let sigcache = SignatureCache::new(64);

        let mut h2 = child(&genesis, 2, a);
        seal(&mut h2, &sk_a, CHAIN_ID);
        assert!(matches!(
            snap.apply(&[h2], &sigcache, CHAIN_ID),
            Err(DposError::OutOfRangeChain)
        ));
    }

    #[test]
    fn enough_distance_boundaries() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let c = Address::repeat_byte(3);
        let snap = Snapshot::new(100, 10, B256::ZERO, vec![a, b, c]);

        let header = Header { coinbase: a, number: 11, ..Default::default() };
        assert!(!snap.enough_distance(a, &header));
        // unknown validator is always far enough
        assert!(snap.enough_distance(Address::repeat_byte(9), &header));
    }
}
