//! `dpos_*` read-only RPC namespace: snapshot and validator queries.

use crate::{engine::Dpos, provider::HeaderReader, snapshot::Snapshot};
use alloy_primitives::{Address, B256};
use jsonrpsee::{core::RpcResult, proc_macros::rpc, types::ErrorObject};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};

/// Snapshot as served over RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResult {
    pub number: u64,
    pub hash: B256,
    pub epoch: u64,
    pub validators: Vec<Address>,
    pub recents: BTreeMap<u64, Address>,
}

impl From<Snapshot> for SnapshotResult {
    fn from(snap: Snapshot) -> Self {
        Self {
            number: snap.number,
            hash: snap.hash,
            epoch: snap.epoch,
            validators: snap.validators(),
            recents: snap.recents,
        }
    }
}

#[rpc(server, namespace = "dpos")]
pub trait DposApi {
    /// Snapshot at the given block number, or the chain head.
    #[method(name = "getSnapshot")]
    async fn get_snapshot(&self, number: Option<u64>) -> RpcResult<SnapshotResult>;

    /// Snapshot at the given block hash.
    #[method(name = "getSnapshotAtHash")]
    async fn get_snapshot_at_hash(&self, hash: B256) -> RpcResult<SnapshotResult>;

    /// Authorized validators at the given block number, or the chain head.
    #[method(name = "getValidators")]
    async fn get_validators(&self, number: Option<u64>) -> RpcResult<Vec<Address>>;

    /// Authorized validators at the given block hash.
    #[method(name = "getValidatorsAtHash")]
    async fn get_validators_at_hash(&self, hash: B256) -> RpcResult<Vec<Address>>;
}

pub struct DposApiImpl {
    chain: Arc<dyn HeaderReader>,
    engine: Arc<Dpos>,
}

impl DposApiImpl {
    pub fn new(chain: Arc<dyn HeaderReader>, engine: Arc<Dpos>) -> Self {
        Self { chain, engine }
    }

    fn snapshot_at_number(&self, number: Option<u64>) -> RpcResult<Snapshot> {
        let header = match number {
            Some(number) => self.chain.header_by_number(number),
            None => self.chain.current_header(),
        }
        .ok_or_else(unknown_block)?;
        self.engine
            .snapshot(self.chain.as_ref(), header.number, header.hash_slow(), &[])
            .map_err(internal_error)
    }

    fn snapshot_at_hash(&self, hash: B256) -> RpcResult<Snapshot> {
        let header = self.chain.header_by_hash(&hash).ok_or_else(unknown_block)?;
        self.engine
            .snapshot(self.chain.as_ref(), header.number, hash, &[])
            .map_err(internal_error)
    }
}

fn unknown_block() -> ErrorObject<'static> {
    ErrorObject::owned(-32000, "unknown block", None::<()>)
}

fn internal_error(err: crate::error::DposError) -> ErrorObject<'static> {
    ErrorObject::owned(-32000, err.to_string(), None::<()>)
}

#[async_trait::async_trait]
impl DposApiServer for DposApiImpl {
    async fn get_snapshot(&self, number: Option<u64>) -> RpcResult<SnapshotResult> {
        Ok(self.snapshot_at_number(number)?.into())
    }

    async fn get_snapshot_at_hash(&self, hash: B256) -> RpcResult<SnapshotResult> {
        Ok(self.snapshot_at_hash(hash)?.into())
    }

    async fn get_validators(&self, number: Option<u64>) -> RpcResult<Vec<Address>> {
        Ok(self.snapshot_at_number(number)?.validators())
    }

    async fn get_validators_at_hash(&self, hash: B256) -> RpcResult<Vec<Address>> {
        Ok(self.snapshot_at_hash(hash)?.validators())
    }
}
