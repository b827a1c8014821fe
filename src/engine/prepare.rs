//! Local block preparation: filling the consensus fields of a header before
//! transactions run on top of it.

use super::{sealer::calc_difficulty, unix_now, Dpos};
use crate::{
    backoff::back_off_time,
    constants::{EXTRA_SEAL, EXTRA_VANITY, NEXT_FORK_HASH_SIZE},
    error::DposError,
    forkid::next_fork_hash,
    header::Header,
    lottery,
    provider::HeaderReader,
    snapshot::Snapshot,
};
use alloy_primitives::{Address, B256, B64};

impl Dpos {
    /// Prepares `header` for sealing by the local validator: coinbase,
    /// difficulty, distribution fields, lottery winner, extra-data layout and
    /// timestamp.
    pub fn prepare(&self, chain: &dyn HeaderReader, header: &mut Header) -> Result<(), DposError> {
        let val = self.validator();
        header.coinbase = val;
        header.nonce = B64::ZERO;

        let number = header.number;
        let snap = self.snapshot(chain, number - 1, header.parent_hash, &[])?;

        let votes = match self.get_provider_infos(chain, header) {
            Ok(votes) => votes,
            Err(err) => {
                tracing::error!(%err, "failed to read provider info");
                Vec::new()
            }
        };
        let (team_rate, validator_rate) = self.get_distribute_rate(chain, header);

        let parent = chain.header_by_hash(&header.parent_hash);
        header.provider = match parent.as_ref() {
            Some(parent) => lottery::draw(parent, &votes),
            None => Address::ZERO,
        };
        header.team_rate = team_rate;
        header.validator_rate = validator_rate;
        header.team_address = self.get_team_address(chain, header).unwrap_or_default();

        header.difficulty = calc_difficulty(&snap, val);

        // vanity ‖ next-fork-hash ‖ (epoch validators) ‖ seal placeholder
        let mut extra = header.extra_data.to_vec();
        let vanity = EXTRA_VANITY - NEXT_FORK_HASH_SIZE;
        if extra.len() < vanity {
            extra.resize(vanity, 0);
        }
        extra.truncate(vanity);
        extra.extend_from_slice(&next_fork_hash(&self.chain_config, self.genesis_hash, number));
        if number % self.config.epoch == 0 {
            for validator in self.get_top_validators(chain, header)? {
                extra.extend_from_slice(validator.as_slice());
            }
        }
        extra.extend_from_slice(&[0u8; EXTRA_SEAL]);
        header.extra_data = extra.into();

        header.mix_digest = B256::ZERO;

        let parent = parent.ok_or(DposError::UnknownAncestor)?;
        header.timestamp = self.block_time(&snap, header, &parent);
        let now = unix_now();
        if header.timestamp < now {
            header.timestamp = now;
        }

        Ok(())
    }

    /// Earliest timestamp the local validator may give the block: the parent
    /// time plus the period, plus the deterministic backoff once the
    /// Ramanujan fork is live.
    pub(crate) fn block_time(&self, snap: &Snapshot, header: &Header, parent: &Header) -> u64 {
        let mut time = parent.timestamp + self.config.period;
        if self.chain_config.is_ramanujan_active_at_block(header.number) {
            time += back_off_time(snap, header.coinbase);
        }
        time
    }
}
