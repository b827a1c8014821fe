//! Header verification and snapshot materialization.

use super::Dpos;
use crate::{
    backoff::back_off_time,
    constants::{
        CHECKPOINT_INTERVAL, DIFF_IN_TURN, DIFF_NO_TURN, EXTRA_SEAL, EXTRA_VANITY,
        GAS_LIMIT_BOUND_DIVISOR, MAX_GAS_LIMIT, MIN_GAS_LIMIT, VALIDATOR_BYTES_LEN,
    },
    error::DposError,
    header::Header,
    provider::HeaderReader,
    snapshot::Snapshot,
};
use alloy_consensus::constants::EMPTY_OMMER_ROOT_HASH;
use alloy_primitives::B256;
use std::sync::{mpsc, Arc};

impl Dpos {
    /// Checks whether a header conforms to the consensus rules.
    pub fn verify_header(
        &self,
        chain: &dyn HeaderReader,
        header: &Header,
    ) -> Result<(), DposError> {
        self.verify_header_with_parents(chain, header, &[])
    }

    /// Verifies a batch of headers on a background task. Results stream on
    /// the returned channel in input order; sending on the abort channel
    /// terminates the task without further results.
    pub fn verify_headers(
        self: Arc<Self>,
        chain: Arc<dyn HeaderReader>,
        headers: Vec<Header>,
    ) -> (mpsc::Sender<()>, mpsc::Receiver<Result<(), DposError>>) {
        let (abort_tx, abort_rx) = mpsc::channel();
        let (results_tx, results_rx) = mpsc::channel();

        let engine = self;
        std::thread::spawn(move || {
            for i in 0..headers.len() {
                let result =
                    engine.verify_header_with_parents(chain.as_ref(), &headers[i], &headers[..i]);
                if matches!(abort_rx.try_recv(), Ok(())) {
                    return;
                }
                if results_tx.send(result).is_err() {
                    return;
                }
            }
        });

        (abort_tx, results_rx)
    }

    /// The caller may pass the batch of ancestors (ascending) being verified
    /// alongside, so they do not need to be in the database yet.
    pub(crate) fn verify_header_with_parents(
        &self,
        chain: &dyn HeaderReader,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), DposError> {
        let number = header.number;

        // Don't waste time checking blocks from the future.
        if header.timestamp > super::unix_now() {
            return Err(DposError::FutureBlock);
        }

        let extra_len = header.extra_data.len();
        if extra_len < EXTRA_VANITY {
            return Err(DposError::MissingVanity);
        }
        if extra_len < EXTRA_VANITY + EXTRA_SEAL {
            return Err(DposError::MissingSignature);
        }

        // Epoch headers carry the elected validator set, others must not.
        let is_epoch = number % self.config.epoch == 0;
        let validator_bytes = extra_len - EXTRA_VANITY - EXTRA_SEAL;
        if !is_epoch && validator_bytes != 0 {
            return Err(DposError::ExtraValidators);
        }
        if is_epoch && validator_bytes % VALIDATOR_BYTES_LEN != 0 {
            return Err(DposError::InvalidSpanValidators);
        }

        if header.mix_digest != B256::ZERO {
            return Err(DposError::InvalidMixDigest);
        }
        if header.uncle_hash != EMPTY_OMMER_ROOT_HASH {
            return Err(DposError::InvalidUncleHash);
        }
        if number > 0 && header.difficulty.is_zero() {
            return Err(DposError::InvalidDifficulty);
        }

        self.verify_cascading_fields(chain, header, parents)
    }

    fn verify_cascading_fields(
        &self,
        chain: &dyn HeaderReader,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), DposError> {
        let number = header.number;
        if number == 0 {
            // genesis is the always valid dead-end
            return Ok(());
        }

        let parent = match parents.last() {
            Some(parent) => parent.clone(),
            None => chain
                .header(&header.parent_hash, number - 1)
                .ok_or(DposError::UnknownAncestor)?,
        };
        if parent.number != number - 1 || parent.hash_slow() != header.parent_hash {
            return Err(DposError::UnknownAncestor);
        }

        let snap = self.snapshot(chain, number - 1, header.parent_hash, parents)?;

        self.verify_block_time(&snap, header, &parent)?;

        if header.gas_limit > MAX_GAS_LIMIT {
            return Err(DposError::GasLimitTooHigh { have: header.gas_limit, max: MAX_GAS_LIMIT });
        }
        if header.gas_used > header.gas_limit {
            return Err(DposError::GasUsedExceedsLimit {
                gas_used: header.gas_used,
                gas_limit: header.gas_limit,
            });
        }
        let delta = parent.gas_limit / GAS_LIMIT_BOUND_DIVISOR;
        if parent.gas_limit.abs_diff(header.gas_limit) >= delta
            || header.gas_limit < MIN_GAS_LIMIT
        {
            return Err(DposError::GasLimitOutOfBounds {
                have: header.gas_limit,
                parent: parent.gas_limit,
                delta,
            });
        }

        self.verify_seal_against(&snap, header)
    }

    fn verify_block_time(
        &self,
        snap: &Snapshot,
        header: &Header,
        parent: &Header,
    ) -> Result<(), DposError> {
        if header.timestamp < parent.timestamp + self.config.period {
            return Err(DposError::InvalidTimestamp);
        }
        if self.chain_config.is_ramanujan_active_at_block(header.number)
            && header.timestamp
                < parent.timestamp + self.config.period + back_off_time(snap, header.coinbase)
        {
            return Err(DposError::InvalidTimestamp);
        }
        Ok(())
    }

    /// Checks the seal signature of `header` against the snapshot at its
    /// parent.
    pub fn verify_seal(
        &self,
        chain: &dyn HeaderReader,
        header: &Header,
    ) -> Result<(), DposError> {
        if header.number == 0 {
            return Err(DposError::UnknownBlock);
        }
        let snap = self.snapshot(chain, header.number - 1, header.parent_hash, &[])?;
        self.verify_seal_against(&snap, header)
    }

    fn verify_seal_against(&self, snap: &Snapshot, header: &Header) -> Result<(), DposError> {
        let sealer = self.signatures().recover(header, self.chain_config.chain_id)?;
        if sealer != header.coinbase {
            return Err(DposError::CoinbaseMismatch);
        }
        if !snap.validators.contains(&sealer) {
            return Err(DposError::UnauthorizedValidator);
        }
        if snap.signed_recently(sealer, header.number) {
            return Err(DposError::RecentlySigned);
        }

        let inturn = snap.inturn(sealer);
        if inturn && header.difficulty != DIFF_IN_TURN {
            return Err(DposError::WrongDifficulty);
        }
        if !inturn && header.difficulty != DIFF_NO_TURN {
            return Err(DposError::WrongDifficulty);
        }
        Ok(())
    }

    /// The authority snapshot after applying the header at `(number, hash)`.
    ///
    /// Walks backward until it finds a cached snapshot, an on-disk checkpoint
    /// or the genesis, then replays the gathered headers forward. Fresh
    /// results land in the in-memory LRU; checkpoint multiples are persisted.
    pub fn snapshot(
        &self,
        chain: &dyn HeaderReader,
        number: u64,
        hash: B256,
        parents: &[Header],
    ) -> Result<Snapshot, DposError> {
        let mut headers: Vec<Header> = Vec::new();
        let mut number = number;
        let mut hash = hash;
        let mut parents = parents;

        let snap = loop {
            if let Some(snap) = self.recent_snaps().write().get(&hash) {
                break snap.clone();
            }

            if number % CHECKPOINT_INTERVAL == 0 {
                if let Some(snap) = Snapshot::load(self.db(), &hash)? {
                    tracing::trace!(number, %hash, "loaded snapshot from disk");
                    break snap;
                }
            }

            if number == 0 {
                let genesis =
                    chain.header_by_number(0).ok_or(DposError::UnknownAncestor)?;
                let genesis_hash = genesis.hash_slow();
                let extra = &genesis.extra_data;
                if extra.len() < EXTRA_VANITY + EXTRA_SEAL {
                    return Err(DposError::MissingSignature);
                }
                let validators =
                    Snapshot::parse_validators(&extra[EXTRA_VANITY..extra.len() - EXTRA_SEAL])?;
                if validators.is_empty() {
                    return Err(DposError::InvalidValidatorsLength);
                }
                let snap = Snapshot::new(self.config.epoch, 0, genesis_hash, validators);
                snap.store(self.db())?;
                tracing::info!(hash = %genesis_hash, "stored genesis snapshot to disk");
                break snap;
            }

            // No snapshot for this header: gather it and move backward.
            let header = match parents.split_last() {
                Some((last, rest)) => {
                    if last.hash_slow() != hash || last.number != number {
                        return Err(DposError::UnknownAncestor);
                    }
                    parents = rest;
                    last.clone()
                }
                None => chain.header(&hash, number).ok_or(DposError::UnknownAncestor)?,
            };
            hash = header.parent_hash;
            number -= 1;
            headers.push(header);
        };

        headers.reverse();
        let applied = !headers.is_empty();
        let snap = snap.apply(&headers, self.signatures(), self.chain_config.chain_id)?;
        self.recent_snaps().write().insert(snap.hash, snap.clone());

        if applied && snap.number % CHECKPOINT_INTERVAL == 0 {
            snap.store(self.db())?;
            tracing::trace!(number = snap.number, hash = %snap.hash, "stored snapshot to disk");
        }
        Ok(snap)
    }

    /// Which of `coinbases` would be the in-turn sealer of `header`'s height.
    pub fn check_has_in_turn(
        &self,
        chain: &dyn HeaderReader,
        coinbases: &[alloy_primitives::Address],
        header: &Header,
    ) -> Option<alloy_primitives::Address> {
        let snap = self
            .snapshot(chain, header.number - 1, header.parent_hash, &[])
            .ok()?;
        coinbases.iter().copied().find(|&coinbase| snap.inturn(coinbase))
    }
}
