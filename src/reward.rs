//! Delayed, decaying block-reward emission.
//!
//! Rewards trail the chain head by one emission day (1440 blocks). Each block
//! pays out the reward of the block one day back, splitting it between the
//! provider elected by that block's lottery, the team address, and the sealing
//! validator; team and validator shares are credited locked as well. A second
//! pass then walks up to 100 further days back, releasing a small slice of the
//! previously locked shares each day. Finally the fee escrow accumulated at
//! the system address is swept.

use crate::{
    constants::BLOCKS_PER_DAY,
    header::Header,
    provider::{HeaderReader, StateDb},
    system_contracts::SYSTEM_ADDRESS,
};
use alloy_primitives::{Address, U256};
use once_cell::sync::Lazy;

/// Base per-block emission in wei.
pub static BASE_BLOCK_REWARD: Lazy<U256> =
    Lazy::new(|| U256::from(61_969_993_482u64) * U256::from(100_000_000u64));

/// Rate denominators: header rates are scaled by 20000.
const RATE_SCALE: u64 = 20_000;

/// Emission at block `number`: constant for the first day, halved once for
/// the next two days, then halved again every three further days.
pub fn block_reward(number: u64) -> U256 {
    let day = BLOCKS_PER_DAY;
    let mut reward = *BASE_BLOCK_REWARD;
    if number <= day {
        return reward;
    }
    reward /= U256::from(2);
    if number <= day * 3 {
        return reward;
    }
    let halvings = (number - day * 3 - 1) / (day * 3) + 1;
    for _ in 0..halvings {
        reward /= U256::from(2);
    }
    reward
}

/// Runs the reward step for `header`: yesterday's payout, the unlock walk,
/// and the fee-escrow sweep.
pub fn distribute_block_reward(
    chain: &dyn HeaderReader,
    header: &Header,
    state: &mut dyn StateDb,
) {
    let fee = state.balance(SYSTEM_ADDRESS);

    if header.number > BLOCKS_PER_DAY {
        let yest_number = header.number - BLOCKS_PER_DAY;
        let reward = block_reward(yest_number);

        if let Some(yest) = chain.header_by_number(yest_number) {
            let team_address = yest.team_address;
            let team_cut = reward * U256::from(yest.team_rate) / U256::from(RATE_SCALE);
            let validator_cut =
                reward * U256::from(yest.validator_rate) / U256::from(RATE_SCALE);
            let provider_cut = (reward / U256::from(2))
                .saturating_sub(team_cut)
                .saturating_sub(validator_cut);

            if !provider_cut.is_zero() {
                if yest.provider != Address::ZERO {
                    state.add_balance(yest.provider, provider_cut);
                    state.add_lock_balance(yest.provider, team_cut);
                }
                state.add_balance(team_address, team_cut);
                state.add_lock_balance(team_address, team_cut);
                state.add_balance(yest.coinbase, validator_cut);
                state.add_lock_balance(yest.coinbase, validator_cut);
            }
            tracing::info!(
                number = yest_number,
                provider = %yest.provider,
                %team_cut,
                %validator_cut,
                %provider_cut,
                "distributed delayed reward"
            );

            // Release slices of the locked shares for up to 100 earlier days.
            // The rates are yesterday's, integer-scaled down by 100.
            for i in 0..100u64 {
                let Some(last_number) = header.number.checked_sub(BLOCKS_PER_DAY * (i + 2))
                else {
                    break;
                };
                if last_number == 0 {
                    break;
                }
                let Some(last) = chain.header_by_number(last_number) else {
                    tracing::error!(last_number, "reward unlock header not found");
                    continue;
                };

                let reward = block_reward(last_number);
                let mut unlock_cut = reward / U256::from(200);
                let team_cut =
                    reward * U256::from(yest.team_rate / 100) / U256::from(RATE_SCALE);
                unlock_cut = unlock_cut.saturating_sub(team_cut);
                let validator_cut =
                    reward * U256::from(yest.validator_rate / 100) / U256::from(RATE_SCALE);
                unlock_cut = unlock_cut.saturating_sub(validator_cut);
                if unlock_cut.is_zero() {
                    continue;
                }

                if last.provider != Address::ZERO {
                    state.add_balance(last.provider, unlock_cut);
                    release_locked(state, last.provider, unlock_cut);
                }
                state.add_balance(team_address, team_cut);
                release_locked(state, team_address, team_cut);
                state.add_balance(last.coinbase, validator_cut);
                release_locked(state, last.coinbase, validator_cut);
            }
        }
    }

    // burn the accumulated fee escrow
    state.add_balance(Address::ZERO, fee);
    state.set_balance(SYSTEM_ADDRESS, U256::ZERO);
}

/// Subtracts `amount` from the locked balance, flooring at zero.
fn release_locked(state: &mut dyn StateDb, address: Address, amount: U256) {
    if state.lock_balance(address) > amount {
        state.sub_lock_balance(address, amount);
    } else {
        state.set_lock_balance(address, U256::ZERO);
    }
}
