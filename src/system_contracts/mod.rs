//! In-state system contracts: well-known addresses and the ABI surface the
//! engine consumes. Encoding and decoding go through `sol!`-generated types;
//! the engine never hand-rolls ABI bytes.

pub mod governance;

use alloy_primitives::{address, Address, Bytes};
use alloy_sol_types::{sol, SolCall};

/// Validator factory: validator-set registry, distribution rates, punishment.
pub const VALIDATOR_FACTORY_CONTRACT: Address =
    address!("0x000000000000000000000000000000000000c002");
/// Address-list contract: blacklists and developer verification.
pub const ADDRESS_LIST_CONTRACT: Address =
    address!("0x000000000000000000000000000000000000c003");
/// Governance contract holding passed proposals.
pub const SYS_GOV_CONTRACT: Address = address!("0x000000000000000000000000000000000000c005");
/// Sentinel recipient of synthesized governance transactions.
pub const SYS_GOV_TO: Address = address!("0x000000000000000000000000000000000000c006");

/// Admin handed to the validator factory at initialization.
pub const VALIDATOR_FACTORY_ADMIN: Address =
    address!("0xce930537a2148b8dc43899ff2e9bcbee0e801c54");

/// Escrow account accumulating transaction fees for the engine to sweep.
pub const SYSTEM_ADDRESS: Address = address!("0xfffffffffffffffffffffffffffffffffffffffe");

/// Storage slot position of the `devs` mapping in the address-list contract.
pub const DEV_MAPPING_POSITION: u16 = 2;

/// Whether `to` is a system contract the coinbase may call with zero-price
/// transactions.
pub fn is_system_contract(to: Address) -> bool {
    to == VALIDATOR_FACTORY_CONTRACT
}

sol! {
    struct PoaResource {
        uint256 cpuCount;
        uint256 memoryCount;
        uint256 storageCount;
    }

    struct ProviderInfo {
        PoaResource total;
        PoaResource used;
        PoaResource lock;
        bool challenge;
        uint8 state;
        address owner;
        string region;
        string info;
        uint256 lastChallengeTime;
    }

    struct ProviderInfos {
        address providerContract;
        ProviderInfo info;
        uint256 marginAmount;
        address[] audits;
    }

    struct Proposal {
        uint256 id;
        uint256 action;
        address proposer;
        address receiver;
        uint256 value;
        bytes data;
    }

    interface ValidatorFactory {
        function initialize(address[] validators, address admin) external;
        function getAllActiveValidatorAddr() external view returns (address[] memory);
        function team_percent() external view returns (uint256);
        function validator_percent() external view returns (uint256);
        function team_address() external view returns (address);
        function providerFactory() external view returns (address);
        function tryPunish(address val) external;
    }

    interface ProviderFactory {
        function getProviderInfo(uint256 start, uint256 limit) external view returns (ProviderInfos[] memory);
    }

    interface Governance {
        function getPassedProposalCount() external view returns (uint32);
        function getPassedProposalByIndex(uint32 index) external view returns (Proposal memory);
        function finishProposalById(uint256 id) external;
    }

    interface AddressList {
        function getBlacksFrom() external view returns (address[] memory);
        function getBlacksTo() external view returns (address[] memory);
    }
}

/// `initialize(validators, admin)` on the validator factory.
pub fn initialize_validator_factory(validators: Vec<Address>, admin: Address) -> (Address, Bytes) {
    let call = ValidatorFactory::initializeCall { validators, admin };
    (VALIDATOR_FACTORY_CONTRACT, call.abi_encode().into())
}

/// `tryPunish(val)` on the validator factory.
pub fn try_punish(val: Address) -> (Address, Bytes) {
    (VALIDATOR_FACTORY_CONTRACT, ValidatorFactory::tryPunishCall { val }.abi_encode().into())
}

pub fn get_all_active_validators() -> (Address, Bytes) {
    (VALIDATOR_FACTORY_CONTRACT, ValidatorFactory::getAllActiveValidatorAddrCall {}.abi_encode().into())
}

pub fn team_percent() -> (Address, Bytes) {
    (VALIDATOR_FACTORY_CONTRACT, ValidatorFactory::team_percentCall {}.abi_encode().into())
}

pub fn validator_percent() -> (Address, Bytes) {
    (VALIDATOR_FACTORY_CONTRACT, ValidatorFactory::validator_percentCall {}.abi_encode().into())
}

pub fn team_address() -> (Address, Bytes) {
    (VALIDATOR_FACTORY_CONTRACT, ValidatorFactory::team_addressCall {}.abi_encode().into())
}

pub fn provider_factory() -> (Address, Bytes) {
    (VALIDATOR_FACTORY_CONTRACT, ValidatorFactory::providerFactoryCall {}.abi_encode().into())
}

/// `getProviderInfo(start, limit)` on the resolved provider factory; zero
/// arguments fetch the full list.
pub fn get_provider_info(factory: Address) -> (Address, Bytes) {
    let call = ProviderFactory::getProviderInfoCall {
        start: alloy_primitives::U256::ZERO,
        limit: alloy_primitives::U256::ZERO,
    };
    (factory, call.abi_encode().into())
}

pub fn get_passed_proposal_count() -> (Address, Bytes) {
    (SYS_GOV_CONTRACT, Governance::getPassedProposalCountCall {}.abi_encode().into())
}

pub fn get_passed_proposal_by_index(index: u32) -> (Address, Bytes) {
    (SYS_GOV_CONTRACT, Governance::getPassedProposalByIndexCall { index }.abi_encode().into())
}

pub fn finish_proposal_by_id(id: alloy_primitives::U256) -> (Address, Bytes) {
    (SYS_GOV_CONTRACT, Governance::finishProposalByIdCall { id }.abi_encode().into())
}

pub fn get_blacks_from() -> (Address, Bytes) {
    (ADDRESS_LIST_CONTRACT, AddressList::getBlacksFromCall {}.abi_encode().into())
}

pub fn get_blacks_to() -> (Address, Bytes) {
    (ADDRESS_LIST_CONTRACT, AddressList::getBlacksToCall {}.abi_encode().into())
}
