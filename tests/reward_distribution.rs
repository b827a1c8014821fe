//! Delayed reward distribution against mock chain and state.

mod common;

use alloy_primitives::{Address, U256};
use common::*;
use dpos_engine::{
    constants::BLOCKS_PER_DAY,
    header::Header,
    provider::StateDb,
    reward::{block_reward, distribute_block_reward, BASE_BLOCK_REWARD},
    system_contracts::SYSTEM_ADDRESS,
};

fn header_at(number: u64, coinbase: Address, provider: Address, team: Address) -> Header {
    Header {
        number,
        coinbase,
        provider,
        team_address: team,
        team_rate: 400,
        validator_rate: 1000,
        gas_limit: 30_000_000,
        ..Default::default()
    }
}

#[test]
fn distributes_yesterday_and_unlocks_older_days() {
    let chain = MockChain::new();
    let mut state = SharedState::new();

    let provider_y = Address::repeat_byte(0x01);
    let team = Address::repeat_byte(0x02);
    let validator_y = Address::repeat_byte(0x03);
    let provider_old = Address::repeat_byte(0x04);
    let validator_old = Address::repeat_byte(0x05);

    let number = 2 * BLOCKS_PER_DAY + 1; // 2881: yesterday = 1441, unlock day = 1
    chain.insert(header_at(number - BLOCKS_PER_DAY, validator_y, provider_y, team));
    chain.insert(header_at(1, validator_old, provider_old, team));

    state.set_balance(SYSTEM_ADDRESS, U256::from(777));

    let header = header_at(number, Address::repeat_byte(0x06), Address::ZERO, team);
    distribute_block_reward(chain.as_ref(), &header, &mut state);

    // yesterday's split
    let r_y = block_reward(number - BLOCKS_PER_DAY);
    assert_eq!(r_y, *BASE_BLOCK_REWARD / U256::from(2));
    let team_cut = r_y * U256::from(400u64) / U256::from(20_000u64);
    let validator_cut = r_y * U256::from(1000u64) / U256::from(20_000u64);
    let provider_cut = r_y / U256::from(2) - team_cut - validator_cut;

    assert_eq!(state.balance(provider_y), provider_cut);
    assert_eq!(state.lock_balance(provider_y), team_cut);
    assert_eq!(state.balance(validator_y), validator_cut);
    assert_eq!(state.lock_balance(validator_y), validator_cut);

    // the unlock pass for day-1 block, rates scaled down by 100
    let r_old = block_reward(1);
    let team_cut_old = r_old * U256::from(400u64 / 100) / U256::from(20_000u64);
    let validator_cut_old = r_old * U256::from(1000u64 / 100) / U256::from(20_000u64);
    let unlock_cut = r_old / U256::from(200) - team_cut_old - validator_cut_old;

    assert_eq!(state.balance(provider_old), unlock_cut);
    // nothing was locked for it, the release floors at zero
    assert_eq!(state.lock_balance(provider_old), U256::ZERO);
    assert_eq!(state.balance(validator_old), validator_cut_old);

    // the team collects both passes; its lock gained yesterday's cut and
    // released the old one
    assert_eq!(state.balance(team), team_cut + team_cut_old);
    assert_eq!(state.lock_balance(team), team_cut - team_cut_old);

    // fee escrow swept to the zero address
    assert_eq!(state.balance(Address::ZERO), U256::from(777));
    assert_eq!(state.balance(SYSTEM_ADDRESS), U256::ZERO);
}

#[test]
fn no_emission_during_the_first_day() {
    let chain = MockChain::new();
    let mut state = SharedState::new();
    state.set_balance(SYSTEM_ADDRESS, U256::from(55));

    let header = header_at(100, Address::repeat_byte(0x06), Address::ZERO, Address::ZERO);
    distribute_block_reward(chain.as_ref(), &header, &mut state);

    // only the escrow sweep happened
    assert_eq!(state.balance(Address::ZERO), U256::from(55));
    assert_eq!(state.balance(SYSTEM_ADDRESS), U256::ZERO);
    assert_eq!(state.balance(Address::repeat_byte(0x06)), U256::ZERO);
}

#[test]
fn missing_yesterday_header_skips_emission() {
    let chain = MockChain::new();
    let mut state = SharedState::new();
    state.set_balance(SYSTEM_ADDRESS, U256::from(9));

    // no header at number - 1440 in the chain
    let header = header_at(2 * BLOCKS_PER_DAY, Address::repeat_byte(0x06), Address::ZERO, Address::ZERO);
    distribute_block_reward(chain.as_ref(), &header, &mut state);

    assert_eq!(state.balance(Address::ZERO), U256::from(9));
    assert_eq!(state.balance(SYSTEM_ADDRESS), U256::ZERO);
}
