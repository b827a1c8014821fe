//! Sealing: signing the prepared block and delivering it after the timing
//! slot, plus the miner-facing probes around it.

use super::{unix_now, Dpos};
use crate::{
    constants::{DIFF_IN_TURN, DIFF_NO_TURN, EXTRA_SEAL, WIGGLE_TIME_SECS},
    error::DposError,
    header::{Block, Header},
    provider::{HeaderReader, MIMETYPE_DPOS},
    seal,
    snapshot::Snapshot,
};
use alloy_primitives::{Address, Bytes, B256, U256};
use rand::Rng;
use std::{
    sync::mpsc::{self, RecvTimeoutError},
    time::Duration,
};

/// The difficulty a block sealed by `validator` should carry on top of the
/// snapshot: 2 in-turn, 1 otherwise.
pub fn calc_difficulty(snap: &Snapshot, validator: Address) -> U256 {
    if snap.inturn(validator) {
        DIFF_IN_TURN
    } else {
        DIFF_NO_TURN
    }
}

impl Dpos {
    /// Attempts to seal `block` with the local signing credentials. The
    /// sealed block is delivered on `results` once the timing slot elapses;
    /// a message on `stop` (or dropping its sender) cancels the wait.
    pub fn seal(
        &self,
        chain: &dyn HeaderReader,
        block: Block,
        results: mpsc::Sender<Block>,
        stop: mpsc::Receiver<()>,
    ) -> Result<(), DposError> {
        let header = &block.header;
        let number = header.number;
        if number == 0 {
            return Err(DposError::UnknownBlock);
        }
        // For 0-period chains, refuse to seal empty blocks: no reward but
        // would spin sealing.
        if self.config.period == 0 && block.transactions.is_empty() {
            tracing::info!("sealing paused, waiting for transactions");
            return Ok(());
        }

        let val = self.validator();
        let sign_fn = self.sign_fn().ok_or(DposError::SignerUnavailable(val))?;

        let snap = self.snapshot(chain, number - 1, header.parent_hash, &[])?;
        if !snap.validators.contains(&val) {
            return Err(DposError::UnauthorizedValidator);
        }
        if snap.signed_recently(val, number) {
            tracing::info!("signed recently, must wait for others");
            return Ok(());
        }

        let delay = self.sealing_delay(&snap, header);
        tracing::info!(
            number,
            ?delay,
            difficulty = %header.difficulty,
            val = %val,
            "sealing block"
        );

        let signature = sign_fn(val, MIMETYPE_DPOS, &seal::seal_rlp(header, self.chain_id()))?;

        let mut sealed = block;
        let mut extra = sealed.header.extra_data.to_vec();
        let start = extra.len() - EXTRA_SEAL;
        extra[start..].copy_from_slice(&signature);
        sealed.header.extra_data = Bytes::from(extra);

        let seal_hash = self.seal_hash(&sealed.header);
        std::thread::spawn(move || {
            match stop.recv_timeout(delay) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {}
            }
            if results.send(sealed).is_err() {
                tracing::warn!(%seal_hash, "sealing result is not read by miner");
            }
        });

        Ok(())
    }

    /// Remaining wait before a prepared header may be broadcast, wiggle
    /// included.
    pub fn delay(&self, chain: &dyn HeaderReader, header: &Header) -> Option<Duration> {
        let snap = self
            .snapshot(chain, header.number - 1, header.parent_hash, &[])
            .ok()?;
        Some(self.sealing_delay(&snap, header))
    }

    fn sealing_delay(&self, snap: &Snapshot, header: &Header) -> Duration {
        let mut delay = Duration::from_secs(header.timestamp.saturating_sub(unix_now()));
        if header.difficulty == DIFF_NO_TURN {
            // not our turn explicitly, delay it a bit more
            let wiggle = Duration::from_secs(
                (snap.validators.len() as u64 / 2 + 1) * WIGGLE_TIME_SECS,
            );
            delay += Duration::from_nanos(
                rand::thread_rng().gen_range(0..wiggle.as_nanos() as u64),
            );
        }
        delay
    }

    /// The difficulty a block sealed locally on top of `parent` should carry,
    /// or `None` when the snapshot cannot be materialized.
    pub fn calc_difficulty(
        &self,
        chain: &dyn HeaderReader,
        parent: &Header,
    ) -> Option<U256> {
        let snap = self.snapshot(chain, parent.number, parent.hash_slow(), &[]).ok()?;
        Some(calc_difficulty(&snap, self.validator()))
    }

    /// Seal hash of `header` under the configured chain id.
    pub fn seal_hash(&self, header: &Header) -> B256 {
        seal::seal_hash(header, self.chain_id())
    }

    /// Whether sealing on top of `parent` would put the local validator
    /// inside the recents window.
    pub fn sign_recently(
        &self,
        chain: &dyn HeaderReader,
        parent: &Header,
    ) -> Result<bool, DposError> {
        let snap = self.snapshot(chain, parent.number, parent.hash_slow(), &[])?;
        let val = self.validator();
        if !snap.validators.contains(&val) {
            return Err(DposError::UnauthorizedValidator);
        }
        Ok(snap.signed_recently(val, parent.number + 1))
    }

    /// Whether the local validator is far enough from the in-turn slot that
    /// re-mining `header`'s height is worthwhile.
    pub fn enough_distance(&self, chain: &dyn HeaderReader, header: &Header) -> bool {
        match self.snapshot(chain, header.number - 1, header.parent_hash, &[]) {
            Ok(snap) => snap.enough_distance(self.validator(), header),
            Err(_) => true,
        }
    }
}
