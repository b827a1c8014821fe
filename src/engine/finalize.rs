//! State-transition closure: system-contract initialization, punishment,
//! delayed rewards, epoch validation, governance, and the recomputation
//! checks on the header's distribution fields.

use super::Dpos;
use crate::{
    blacklist::{self, BlacklistMap},
    constants::{EXTRA_SEAL, EXTRA_VANITY, MAX_VALIDATORS},
    error::DposError,
    header::{Block, Header},
    provider::{HeaderReader, SignTxFn, StateDb, SystemMsg},
    reward,
    system_contracts::{
        self, governance::GovProposal, Governance, ADDRESS_LIST_CONTRACT, AddressList,
        DEV_MAPPING_POSITION, VALIDATOR_FACTORY_ADMIN,
    },
    system_txs::SignedSystemTx,
};
use alloy_consensus::constants::EMPTY_OMMER_ROOT_HASH;
use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_sol_types::SolCall;
use std::sync::Arc;

/// Where finalization takes its system transactions from: pre-supplied ones
/// to match against (block import), or fresh ones signed locally (mining).
pub enum SystemTxSource<'a> {
    Verify { pending: &'a [SignedSystemTx] },
    Assemble,
}

impl Dpos {
    /// Finalizes an imported block: runs the system-contract loop against
    /// `state`, matching the pre-supplied `system_txs`, and re-derives the
    /// header's distribution fields from state. Any mismatch rejects the
    /// block.
    pub fn finalize(
        &self,
        chain: &dyn HeaderReader,
        header: &mut Header,
        state: &mut dyn StateDb,
        txs: &mut Vec<SignedSystemTx>,
        system_txs: &[SignedSystemTx],
    ) -> Result<(), DposError> {
        self.finalize_inner(chain, header, state, txs, SystemTxSource::Verify { pending: system_txs })
    }

    /// Finalizes a locally mined block, synthesizing and signing the system
    /// transactions, and returns the assembled block.
    pub fn finalize_and_assemble(
        &self,
        chain: &dyn HeaderReader,
        header: &mut Header,
        state: &mut dyn StateDb,
        txs: Vec<SignedSystemTx>,
    ) -> Result<Block, DposError> {
        let mut txs = txs;
        self.finalize_inner(chain, header, state, &mut txs, SystemTxSource::Assemble)?;
        Ok(Block::new(header.clone(), txs))
    }

    fn finalize_inner(
        &self,
        chain: &dyn HeaderReader,
        header: &mut Header,
        state: &mut dyn StateDb,
        txs: &mut Vec<SignedSystemTx>,
        source: SystemTxSource<'_>,
    ) -> Result<(), DposError> {
        let number = header.number;
        let verifying = matches!(source, SystemTxSource::Verify { .. });

        // All system contracts come to life at block 1.
        if number == 1 {
            if let Err(err) = self.initialize_system_contracts(chain, header, state) {
                tracing::error!(%err, "initialize system contracts failed");
                return Err(err);
            }
        }

        self.try_punish_validator(chain, header, state)?;

        if number > 3 {
            reward::distribute_block_reward(chain, header, state);
        }

        // Epoch rollover: the contract has rotated internally; the header
        // must carry exactly the set it now reports.
        if number % self.config.epoch == 0 {
            let new_validators = self.get_top_validators(chain, header)?;
            if verifying {
                let mut validator_bytes = Vec::with_capacity(new_validators.len() * 20);
                for validator in &new_validators {
                    validator_bytes.extend_from_slice(validator.as_slice());
                }
                let extra = &header.extra_data;
                let suffix = extra.len() - EXTRA_SEAL;
                if extra[EXTRA_VANITY..suffix] != validator_bytes[..] {
                    return Err(DposError::MismatchingEpochValidators);
                }
            }
        }

        if self.chain_config.is_redcoast_active_at_block(number) {
            self.handle_governance(header, state, txs, &source)?;
        }

        if verifying {
            self.verify_distribution_fields(chain, header)?;
        }

        header.state_root = state.intermediate_root();
        header.uncle_hash = EMPTY_OMMER_ROOT_HASH;
        Ok(())
    }

    /// Re-derives rates, team address and lottery winner from state and
    /// rejects the block on any mismatch with the header.
    fn verify_distribution_fields(
        &self,
        chain: &dyn HeaderReader,
        header: &Header,
    ) -> Result<(), DposError> {
        let (team_rate, validator_rate) = self.get_distribute_rate(chain, header);

        if let Ok(team_address) = self.get_team_address(chain, header) {
            if team_address != header.team_address {
                tracing::error!(
                    have = %header.team_address,
                    want = %team_address,
                    "invalid team address"
                );
                return Err(DposError::InvalidTeamAddress);
            }
        }

        let votes = match self.get_provider_infos(chain, header) {
            Ok(votes) => votes,
            Err(err) => {
                tracing::error!(%err, "get provider info failed");
                Vec::new()
            }
        };
        let total: U256 = votes.iter().fold(U256::ZERO, |acc, v| acc + v.voting_power);
        if total.is_zero() {
            if header.provider != Address::ZERO {
                tracing::error!(have = %header.provider, "invalid provider");
                return Err(DposError::InvalidProvider);
            }
        } else if let Some(parent) = chain.header_by_hash(&header.parent_hash) {
            let expected = crate::lottery::draw(&parent, &votes);
            if header.provider != expected {
                tracing::error!(have = %header.provider, want = %expected, "invalid provider");
                return Err(DposError::InvalidProvider);
            }
        } else {
            tracing::debug!(number = header.number, "parent not found, skip provider check");
        }

        if header.team_rate != team_rate || header.validator_rate != validator_rate {
            return Err(DposError::InvalidDistributeRate);
        }
        Ok(())
    }

    /// Initializes the validator factory with the genesis validator set.
    fn initialize_system_contracts(
        &self,
        chain: &dyn HeaderReader,
        header: &Header,
        state: &mut dyn StateDb,
    ) -> Result<(), DposError> {
        let snap = self.snapshot(chain, 0, header.parent_hash, &[])?;
        let genesis_validators = snap.validators();
        if genesis_validators.is_empty() || genesis_validators.len() > MAX_VALIDATORS {
            return Err(DposError::InvalidValidatorsLength);
        }

        let (to, data) =
            system_contracts::initialize_validator_factory(genesis_validators, VALIDATOR_FACTORY_ADMIN);
        let nonce = state.nonce(header.coinbase);
        let msg = SystemMsg::transact(header.coinbase, to, nonce, U256::ZERO, data);
        self.vm().execute_msg(&msg, state, header)?;
        Ok(())
    }

    /// Reports the due validator of this height to the punish contract:
    /// itself when it missed its slot, the zero sentinel otherwise. Runs on
    /// every block.
    fn try_punish_validator(
        &self,
        chain: &dyn HeaderReader,
        header: &Header,
        state: &mut dyn StateDb,
    ) -> Result<(), DposError> {
        let number = header.number;
        let snap = self.snapshot(chain, number - 1, header.parent_hash, &[])?;
        let validators = snap.validators();
        let due = validators[(number % validators.len() as u64) as usize];

        let signed_recently = snap.recents.values().any(|&recent| recent == due);
        let target = if signed_recently { Address::ZERO } else { due };

        let (to, data) = system_contracts::try_punish(target);
        let nonce = state.nonce(header.coinbase);
        let msg = SystemMsg::transact(header.coinbase, to, nonce, U256::ZERO, data);
        if let Err(err) = self.vm().execute_msg(&msg, state, header) {
            tracing::error!(%err, validator = %target, "can't punish validator");
            return Err(err);
        }
        Ok(())
    }

    /// Executes all passed governance proposals, then finishes them by id.
    /// Finishing reorders the contract's pending list, which is why the two
    /// passes may not be interleaved.
    fn handle_governance(
        &self,
        header: &Header,
        state: &mut dyn StateDb,
        txs: &mut Vec<SignedSystemTx>,
        source: &SystemTxSource<'_>,
    ) -> Result<(), DposError> {
        let sign_tx_fn = match source {
            SystemTxSource::Verify { .. } => None,
            SystemTxSource::Assemble => match self.sign_tx_fn() {
                Some(sign_tx_fn) => Some(sign_tx_fn),
                // a non-mining node has no tx signer and cannot assemble
                // governance transactions
                None => return Ok(()),
            },
        };

        let count = self.get_passed_proposal_count(header, state)?;

        if let SystemTxSource::Verify { pending } = source {
            if count as usize != pending.len() {
                return Err(DposError::InvalidSystemTxCount {
                    have: pending.len(),
                    want: count as usize,
                });
            }
        }

        let mut ids = Vec::with_capacity(count as usize);
        for i in 0..count {
            let proposal = self.get_passed_proposal_by_index(header, state, i)?;
            let tx = match source {
                SystemTxSource::Verify { pending } => {
                    let tx = pending[i as usize].clone();
                    self.replay_proposal(header, state, &proposal, &tx, i as usize)?;
                    tx
                }
                SystemTxSource::Assemble => {
                    let sign_tx_fn = sign_tx_fn
                        .as_ref()
                        .ok_or(DposError::SignerUnavailable(header.coinbase))?;
                    self.execute_proposal(header, state, &proposal, sign_tx_fn, i as usize)?
                }
            };
            txs.push(tx);
            ids.push(proposal.id);
        }

        for id in ids {
            self.finish_proposal_by_id(header, state, id)?;
        }
        Ok(())
    }

    fn get_passed_proposal_count(
        &self,
        header: &Header,
        state: &mut dyn StateDb,
    ) -> Result<u32, DposError> {
        let (to, data) = system_contracts::get_passed_proposal_count();
        let ret = self.vm().execute_msg(&SystemMsg::call(header.coinbase, to, data), state, header)?;
        Ok(Governance::getPassedProposalCountCall::abi_decode_returns(&ret)?)
    }

    fn get_passed_proposal_by_index(
        &self,
        header: &Header,
        state: &mut dyn StateDb,
        index: u32,
    ) -> Result<GovProposal, DposError> {
        let (to, data) = system_contracts::get_passed_proposal_by_index(index);
        let ret = self.vm().execute_msg(&SystemMsg::call(header.coinbase, to, data), state, header)?;
        let proposal = Governance::getPassedProposalByIndexCall::abi_decode_returns(&ret)?;
        Ok(proposal.into())
    }

    /// Validates a received governance transaction against the proposal and
    /// runs the embedded call.
    fn replay_proposal(
        &self,
        header: &Header,
        state: &mut dyn StateDb,
        proposal: &GovProposal,
        tx: &SignedSystemTx,
        index: usize,
    ) -> Result<(), DposError> {
        if tx.sender != header.coinbase {
            return Err(DposError::SystemTxMismatch { index });
        }
        if !proposal.matches(tx.tx.tx()) {
            return Err(DposError::SystemTxMismatch { index });
        }

        let nonce = state.nonce(tx.sender);
        state.set_nonce(tx.sender, nonce + 1);

        let msg = SystemMsg {
            from: tx.sender,
            to: proposal.receiver,
            nonce,
            value: proposal.value,
            gas_limit: header.gas_limit,
            gas_price: U256::ZERO,
            input: proposal.data.clone(),
            apply: false,
        };
        self.vm().execute_msg(&msg, state, header)?;
        Ok(())
    }

    /// Synthesizes, signs and runs the governance transaction for a proposal.
    fn execute_proposal(
        &self,
        header: &Header,
        state: &mut dyn StateDb,
        proposal: &GovProposal,
        sign_tx_fn: &SignTxFn,
        index: usize,
    ) -> Result<SignedSystemTx, DposError> {
        let nonce = state.nonce(header.coinbase);
        let tx = proposal.to_transaction(nonce, header.gas_limit, self.chain_id());
        let signed = sign_tx_fn(header.coinbase, tx, self.chain_id())?;
        let tx = SignedSystemTx::new(header.coinbase, signed);
        self.replay_proposal(header, state, proposal, &tx, index)?;
        Ok(tx)
    }

    fn finish_proposal_by_id(
        &self,
        header: &Header,
        state: &mut dyn StateDb,
        id: U256,
    ) -> Result<(), DposError> {
        let (to, data) = system_contracts::finish_proposal_by_id(id);
        let nonce = state.nonce(header.coinbase);
        let msg = SystemMsg::transact(header.coinbase, to, nonce, U256::ZERO, data);
        self.vm().execute_msg(&msg, state, header)?;
        Ok(())
    }

    /// Consensus admission check for a transaction: rejects denylisted
    /// senders and recipients. `parent_state` must be the state of the
    /// header's parent block.
    pub fn validate_tx(
        &self,
        sender: Address,
        to: Option<Address>,
        header: &Header,
        parent_state: &mut dyn StateDb,
    ) -> Result<(), DposError> {
        // the list contract only exists after the fork block
        let Some(redcoast) = self.chain_config.redcoast_block else { return Ok(()) };
        if redcoast >= header.number {
            return Ok(());
        }

        let map = self.get_blacklist(header, parent_state)?;
        blacklist::check(&map, sender, to)
    }

    fn get_blacklist(
        &self,
        header: &Header,
        parent_state: &mut dyn StateDb,
    ) -> Result<Arc<BlacklistMap>, DposError> {
        self.blacklists().get_or_fill(header.parent_hash, || {
            let (to, data) = system_contracts::get_blacks_from();
            let ret =
                self.vm().execute_msg(&SystemMsg::call(header.coinbase, to, data), parent_state, header)?;
            let froms = AddressList::getBlacksFromCall::abi_decode_returns(&ret)?;

            let (to, data) = system_contracts::get_blacks_to();
            let ret =
                self.vm().execute_msg(&SystemMsg::call(header.coinbase, to, data), parent_state, header)?;
            let tos = AddressList::getBlacksToCall::abi_decode_returns(&ret)?;

            Ok((froms, tos))
        })
    }

    /// Whether `caller` may create a contract at `height`. Reads the
    /// address-list contract's storage directly: slot 0 packs the enabled
    /// flag at byte 30, the `devs` mapping sits at position 2.
    pub fn can_create(&self, state: &dyn StateDb, caller: Address, height: u64) -> bool {
        if self.chain_config.is_redcoast_active_at_block(height)
            && self.config.enable_dev_verification
            && is_developer_verification_enabled(state)
        {
            let slot = dev_mapping_slot(caller);
            // any non-zero value marks a verified developer
            return !state.storage(ADDRESS_LIST_CONTRACT, slot).is_zero();
        }
        true
    }
}

fn is_developer_verification_enabled(state: &dyn StateDb) -> bool {
    let packed = state.storage(ADDRESS_LIST_CONTRACT, B256::ZERO);
    packed.0[30] == 0x01
}

fn dev_mapping_slot(caller: Address) -> B256 {
    let mut buf = [0u8; 64];
    buf[12..32].copy_from_slice(caller.as_slice());
    buf[62..64].copy_from_slice(&DEV_MAPPING_POSITION.to_be_bytes());
    keccak256(buf)
}
