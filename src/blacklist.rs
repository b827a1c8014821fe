//! Per-parent-hash transaction denylist.
//!
//! The from/to lists live in the address-list contract; the merged map is
//! cached by parent hash and filled under a mutex so concurrent verification
//! workers trigger a single contract read per block.

use crate::error::DposError;
use alloy_primitives::{Address, B256};
use parking_lot::{Mutex, RwLock};
use schnellru::{ByLength, LruMap};
use std::{collections::HashMap, sync::Arc};

/// Which direction(s) of a transaction an address is barred from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    From,
    To,
    Both,
}

pub type BlacklistMap = HashMap<Address, Direction>;

/// Merges the raw contract lists into one directional map.
pub fn build_map(froms: Vec<Address>, tos: Vec<Address>) -> BlacklistMap {
    let mut map = BlacklistMap::with_capacity(froms.len() + tos.len());
    for from in froms {
        map.insert(from, Direction::From);
    }
    for to in tos {
        match map.get(&to).copied() {
            Some(Direction::From) => {
                map.insert(to, Direction::Both);
            }
            _ => {
                map.insert(to, Direction::To);
            }
        }
    }
    map
}

/// Checks a sender/recipient pair against the map.
pub fn check(map: &BlacklistMap, sender: Address, to: Option<Address>) -> Result<(), DposError> {
    if let Some(&direction) = map.get(&sender) {
        if direction != Direction::To {
            return Err(DposError::AddressDenied);
        }
    }
    if let Some(to) = to {
        if let Some(&direction) = map.get(&to) {
            if direction != Direction::From {
                return Err(DposError::AddressDenied);
            }
        }
    }
    Ok(())
}

/// LRU of denylist maps keyed by parent hash, with a single-flight fill path.
pub struct BlacklistCache {
    cache: RwLock<LruMap<B256, Arc<BlacklistMap>, ByLength>>,
    fill: Mutex<()>,
}

impl BlacklistCache {
    pub fn new(capacity: u32) -> Self {
        Self { cache: RwLock::new(LruMap::new(ByLength::new(capacity))), fill: Mutex::new(()) }
    }

    /// Returns the cached map for `parent_hash`, or fills it via `fetch`.
    /// `fetch` produces the raw (`from`, `to`) lists from state.
    pub fn get_or_fill<F>(&self, parent_hash: B256, fetch: F) -> Result<Arc<BlacklistMap>, DposError>
    where
        F: FnOnce() -> Result<(Vec<Address>, Vec<Address>), DposError>,
    {
        if let Some(map) = self.cache.write().get(&parent_hash) {
            return Ok(map.clone());
        }

        let _guard = self.fill.lock();
        // another worker may have filled the entry while we waited
        if let Some(map) = self.cache.write().get(&parent_hash) {
            return Ok(map.clone());
        }

        let (froms, tos) = fetch()?;
        let map = Arc::new(build_map(froms, tos));
        self.cache.write().insert(parent_hash, map.clone());
        Ok(map)
    }
}
