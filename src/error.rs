//! Consensus error taxonomy.
//!
//! These are kept engine-private in spirit: the host should match on the
//! variants it cares about (notably [`DposError::FutureBlock`], which is soft
//! and may be re-queued) and treat the rest as block rejection.

use alloy_primitives::{Address, B256};

#[derive(Debug, thiserror::Error)]
pub enum DposError {
    /// The block is not part of the local chain, or genesis was requested for
    /// an operation that does not support it.
    #[error("unknown block")]
    UnknownBlock,

    /// The parent of a verified header is missing.
    #[error("unknown ancestor")]
    UnknownAncestor,

    /// The header's timestamp is ahead of wall-clock time. Soft failure.
    #[error("block in the future")]
    FutureBlock,

    #[error("extra-data 32 byte vanity prefix missing")]
    MissingVanity,

    #[error("extra-data 65 byte signature suffix missing")]
    MissingSignature,

    /// Non-epoch block carries validator data in its extra-data.
    #[error("non-epoch block contains extra validator list")]
    ExtraValidators,

    /// Validator section not divisible into 20-byte addresses.
    #[error("invalid validator list on epoch block")]
    InvalidSpanValidators,

    #[error("non-zero mix digest")]
    InvalidMixDigest,

    #[error("non empty uncle hash")]
    InvalidUncleHash,

    /// Difficulty is absent where one is required.
    #[error("invalid difficulty")]
    InvalidDifficulty,

    /// Difficulty does not match the turn-ness of the signer.
    #[error("wrong difficulty")]
    WrongDifficulty,

    #[error("invalid timestamp")]
    InvalidTimestamp,

    #[error("invalid gas limit: have {have}, max {max}")]
    GasLimitTooHigh { have: u64, max: u64 },

    #[error("invalid gas used: have {gas_used}, gas limit {gas_limit}")]
    GasUsedExceedsLimit { gas_used: u64, gas_limit: u64 },

    #[error("invalid gas limit: have {have}, want {parent} +- {delta}")]
    GasLimitOutOfBounds { have: u64, parent: u64, delta: u64 },

    /// Snapshot replay was asked to fold out-of-range or non-contiguous
    /// headers.
    #[error("out of range or non-contiguous chain")]
    OutOfRangeChain,

    #[error("the block hash is inconsistent")]
    BlockHashInconsistent,

    #[error("unauthorized validator")]
    UnauthorizedValidator,

    #[error("coinbase do not match with signature")]
    CoinbaseMismatch,

    /// The sealer is still inside the recents window.
    #[error("recently signed")]
    RecentlySigned,

    #[error("invalid validators length")]
    InvalidValidatorsLength,

    /// Epoch header's validator section differs from the set read from state.
    #[error("mismatching validator list on epoch block")]
    MismatchingEpochValidators,

    #[error("illegal provider")]
    InvalidProvider,

    #[error("illegal team address")]
    InvalidTeamAddress,

    #[error("illegal distribute rate")]
    InvalidDistributeRate,

    #[error("invalid system governance tx count: have {have}, want {want}")]
    InvalidSystemTxCount { have: usize, want: usize },

    /// A supplied governance system tx does not match the locally synthesized
    /// one.
    #[error("system tx mismatch at index {index}")]
    SystemTxMismatch { index: usize },

    /// Transaction sender or recipient is denylisted.
    #[error("address denied")]
    AddressDenied,

    #[error("signature recovery failed")]
    SignatureRecovery,

    /// No signing identity authorized for the requested operation.
    #[error("signer unavailable for {0}")]
    SignerUnavailable(Address),

    /// The host has not installed a state accessor yet.
    #[error("state accessor not configured")]
    StateFnUnset,

    #[error("state unavailable for root {0}: {1}")]
    StateUnavailable(B256, String),

    #[error("system contract call failed: {0}")]
    VmError(String),

    #[error("snapshot decode failed: {0}")]
    SnapshotDecode(String),

    #[error("snapshot store failed: {0}")]
    SnapshotStore(String),

    #[error(transparent)]
    AbiDecode(#[from] alloy_sol_types::Error),
}
