//! Fork-hash advertisement for the header's vanity tail.
//!
//! The 4-byte value embedded at `extra[28..32]` is the CRC-32 (IEEE
//! polynomial) of the genesis hash followed by the big-endian heights of every
//! fork passed at the given head, plus the next scheduled fork if one exists.

use crate::config::ChainConfig;
use alloy_primitives::B256;
use crc::{Crc, CRC_32_ISO_HDLC};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Checksum advertising the next scheduled fork on top of everything already
/// activated at `head`.
pub fn next_fork_hash(config: &ChainConfig, genesis: B256, head: u64) -> [u8; 4] {
    let mut buf = Vec::with_capacity(32 + 8 * (config.fork_heights().len() + 1));
    buf.extend_from_slice(genesis.as_slice());
    for fork in config.fork_heights() {
        buf.extend_from_slice(&fork.to_be_bytes());
        if fork > head {
            // first future fork terminates the stream
            break;
        }
    }
    CRC32.checksum(&buf).to_be_bytes()
}
