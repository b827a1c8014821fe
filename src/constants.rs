//! Engine constants for header `extraData` layout, caches and scheduling.

use alloy_primitives::U256;

/// Fixed number of extra-data prefix bytes reserved for vanity and fork hash.
pub const EXTRA_VANITY: usize = 32;
/// Fixed 65-byte ECDSA signature suffix (r, s, v).
pub const EXTRA_SEAL: usize = 65;
/// Trailing bytes of the vanity section carrying the next-fork hash.
pub const NEXT_FORK_HASH_SIZE: usize = 4;
/// Size of one validator entry in an epoch header (plain address).
pub const VALIDATOR_BYTES_LEN: usize = 20;

/// Max validators allowed to seal.
pub const MAX_VALIDATORS: usize = 21;
/// Default number of blocks between validator-set refreshes from the contract.
pub const DEFAULT_EPOCH_LENGTH: u64 = 100;

/// Number of recent snapshots kept in memory.
pub const IN_MEMORY_SNAPSHOTS: u32 = 128;
/// Number of recent block signatures kept in memory.
pub const IN_MEMORY_SIGNATURES: u32 = 4096;
/// Number of recent blacklist snapshots kept in memory.
pub const IN_MEMORY_BLACKLISTS: u32 = 21;
/// Number of blocks after which the snapshot is saved to the database.
pub const CHECKPOINT_INTERVAL: u64 = 1024;

/// Per-signer delay unit for concurrent out-of-turn signers, in seconds.
pub const WIGGLE_TIME_SECS: u64 = 1;
/// Fixed offset before the first backoff step, in seconds.
pub const INITIAL_BACKOFF_SECS: u64 = 1;

/// Block difficulty for in-turn signatures.
pub const DIFF_IN_TURN: U256 = U256::from_limbs([2, 0, 0, 0]);
/// Block difficulty for out-of-turn signatures.
pub const DIFF_NO_TURN: U256 = U256::from_limbs([1, 0, 0, 0]);

/// Hard cap on the header gas limit.
pub const MAX_GAS_LIMIT: u64 = 0x7fff_ffff_ffff_ffff;
/// Minimum allowed gas limit.
pub const MIN_GAS_LIMIT: u64 = 5_000;
/// The divisor bounding per-block gas-limit movement.
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;

/// Blocks per emission day; rewards trail the chain head by this distance.
pub const BLOCKS_PER_DAY: u64 = 1440;

/// Key prefix for persisted snapshot blobs.
pub const SNAPSHOT_KEY_PREFIX: &[u8] = b"dpos-snapshot-";
/// Leading version byte of the snapshot blob.
pub const SNAPSHOT_FORMAT_VERSION: u8 = 1;
