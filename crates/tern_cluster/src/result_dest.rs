//! Destinations for materialized intermediate results.
//!
//! A subplan's rows fan out to one stream per consumer node plus, on the
//! coordinator, a local file. The byte transport to remote nodes is external
//! and reached through [`ResultTransport`].

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};

use tern_common::config::IntermediateResultConfig;
use tern_common::datum::OwnedRow;
use tern_common::error::{ClusterError, ExecutionError, TernResult};
use tern_common::node::NodeDescriptor;
use tern_common::types::{DistributedTxnId, NodeId, ResultId};

use crate::local_executor::TupleSink;

/// An open stream receiving the rows of one intermediate result.
pub trait ResultStream {
    fn write_row(&mut self, row: &OwnedRow) -> TernResult<()>;

    /// Flush and close. The result is visible to readers only after this.
    fn finish(self: Box<Self>) -> TernResult<()>;
}

/// Ships intermediate results to other nodes.
pub trait ResultTransport {
    fn open_stream(
        &self,
        txn: DistributedTxnId,
        result_id: &ResultId,
        node: &NodeDescriptor,
    ) -> TernResult<Box<dyn ResultStream>>;
}

/// Stores the coordinator's own copy of intermediate results.
pub trait LocalResultStore {
    fn create(&self, txn: DistributedTxnId, result_id: &ResultId) -> TernResult<Box<dyn ResultStream>>;

    /// Drop every result stored for `txn`. Called once the transaction ends.
    fn remove_transaction(&self, txn: DistributedTxnId) -> TernResult<()>;
}

/// Summary of a finished destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationStats {
    pub rows: u64,
    pub bytes: u64,
    pub remote_nodes: Vec<NodeId>,
    pub wrote_local_file: bool,
}

/// Fans rows out to every target and enforces the size limit.
pub struct IntermediateResultDestination {
    result_id: ResultId,
    remote: Vec<(NodeId, Box<dyn ResultStream>)>,
    local: Option<Box<dyn ResultStream>>,
    max_bytes: Option<u64>,
    limit_kb: i64,
    bytes_sent: u64,
    rows_sent: u64,
}

impl IntermediateResultDestination {
    /// Open a stream to each node in `nodes` and, when `write_local_file` is
    /// set, one in the local store. The size limit comes from `limits`.
    pub fn open(
        txn: DistributedTxnId,
        result_id: ResultId,
        nodes: &[NodeDescriptor],
        write_local_file: bool,
        transport: &dyn ResultTransport,
        local_store: &dyn LocalResultStore,
        limits: &IntermediateResultConfig,
    ) -> TernResult<Self> {
        let mut remote = Vec::with_capacity(nodes.len());
        for node in nodes {
            let stream = transport.open_stream(txn, &result_id, node)?;
            remote.push((node.node_id, stream));
        }
        let local = if write_local_file {
            Some(local_store.create(txn, &result_id)?)
        } else {
            None
        };

        Ok(Self {
            result_id,
            remote,
            local,
            max_bytes: limits.max_result_bytes(),
            limit_kb: limits.max_intermediate_result_kb,
            bytes_sent: 0,
            rows_sent: 0,
        })
    }

    pub fn result_id(&self) -> &ResultId {
        &self.result_id
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn finish(self) -> TernResult<DestinationStats> {
        let mut remote_nodes = Vec::with_capacity(self.remote.len());
        for (node_id, stream) in self.remote {
            stream.finish()?;
            remote_nodes.push(node_id);
        }
        let wrote_local_file = match self.local {
            Some(stream) => {
                stream.finish()?;
                true
            }
            None => false,
        };
        Ok(DestinationStats {
            rows: self.rows_sent,
            bytes: self.bytes_sent,
            remote_nodes,
            wrote_local_file,
        })
    }
}

impl TupleSink for IntermediateResultDestination {
    fn push(&mut self, row: OwnedRow) -> TernResult<()> {
        self.bytes_sent = self.bytes_sent.saturating_add(row.encoded_len() as u64);
        if let Some(max) = self.max_bytes {
            if self.bytes_sent > max {
                return Err(ExecutionError::ResultSizeExceeded {
                    result_id: self.result_id.clone(),
                    limit_kb: self.limit_kb,
                }
                .into());
            }
        }

        for (_, stream) in &mut self.remote {
            stream.write_row(&row)?;
        }
        if let Some(stream) = &mut self.local {
            stream.write_row(&row)?;
        }
        self.rows_sent += 1;
        Ok(())
    }
}

// ── File-backed local store ──────────────────────────────────────────────────

/// Writes local copies as JSON lines under
/// `<base_dir>/<distributed_txn_id>/<result_id>.data`.
///
/// Rows go to a `.data.tmp` file that is renamed into place on `finish`, so a
/// result that failed part-way is never readable.
#[derive(Debug, Clone)]
pub struct DirectoryResultStore {
    base_dir: PathBuf,
}

impl DirectoryResultStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn result_path(&self, txn: DistributedTxnId, result_id: &ResultId) -> PathBuf {
        self.base_dir
            .join(txn.to_string())
            .join(format!("{result_id}.data"))
    }

    /// Read a finished result back.
    pub fn read_result(&self, txn: DistributedTxnId, result_id: &ResultId) -> TernResult<Vec<OwnedRow>> {
        let file = File::open(self.result_path(txn, result_id)).map_err(ExecutionError::Io)?;
        let mut rows = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(ExecutionError::Io)?;
            let row: OwnedRow = serde_json::from_str(&line)
                .map_err(|e| ExecutionError::Io(std::io::Error::from(e)))?;
            rows.push(row);
        }
        Ok(rows)
    }

    pub fn transaction_dir(&self, txn: DistributedTxnId) -> PathBuf {
        self.base_dir.join(txn.to_string())
    }
}

impl LocalResultStore for DirectoryResultStore {
    fn create(&self, txn: DistributedTxnId, result_id: &ResultId) -> TernResult<Box<dyn ResultStream>> {
        let final_path = self.result_path(txn, result_id);
        let tmp_path = final_path.with_extension("data.tmp");
        fs::create_dir_all(self.transaction_dir(txn)).map_err(ExecutionError::Io)?;
        let file = File::create(&tmp_path).map_err(ExecutionError::Io)?;
        tracing::debug!(path = %final_path.display(), "writing intermediate result file");
        Ok(Box::new(FileResultStream {
            writer: BufWriter::new(file),
            tmp_path,
            final_path,
            published: false,
        }))
    }

    fn remove_transaction(&self, txn: DistributedTxnId) -> TernResult<()> {
        match fs::remove_dir_all(self.transaction_dir(txn)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ExecutionError::Io(e).into()),
        }
    }
}

struct FileResultStream {
    writer: BufWriter<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    published: bool,
}

impl ResultStream for FileResultStream {
    fn write_row(&mut self, row: &OwnedRow) -> TernResult<()> {
        serde_json::to_writer(&mut self.writer, row)
            .map_err(|e| ExecutionError::Io(std::io::Error::from(e)))?;
        self.writer.write_all(b"\n").map_err(ExecutionError::Io)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> TernResult<()> {
        self.writer.flush().map_err(ExecutionError::Io)?;
        fs::rename(&self.tmp_path, &self.final_path).map_err(ExecutionError::Io)?;
        self.published = true;
        Ok(())
    }
}

impl Drop for FileResultStream {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        if let Err(e) = fs::remove_file(&self.tmp_path) {
            tracing::warn!(path = %self.tmp_path.display(), error = %e, "failed to remove partial result file");
        }
    }
}

// ── In-memory store ──────────────────────────────────────────────────────────

/// Where a copy of a result lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResultLocation {
    Local,
    Node(NodeId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResultKey {
    txn: DistributedTxnId,
    result_id: ResultId,
    location: ResultLocation,
}

/// In-process transport and local store. Rows become visible on `finish`.
#[derive(Debug, Clone, Default)]
pub struct MemoryResultStore {
    results: Arc<DashMap<ResultKey, Vec<OwnedRow>>>,
    unreachable: Arc<DashSet<NodeId>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `open_stream` to `node_id` fail, as a dropped connection would.
    pub fn mark_unreachable(&self, node_id: NodeId) {
        self.unreachable.insert(node_id);
    }

    pub fn rows_at(&self, location: ResultLocation, result_id: &ResultId) -> Option<Vec<OwnedRow>> {
        self.results
            .iter()
            .find(|e| e.key().location == location && &e.key().result_id == result_id)
            .map(|e| e.value().clone())
    }

    pub fn has_local_copy(&self, result_id: &ResultId) -> bool {
        self.rows_at(ResultLocation::Local, result_id).is_some()
    }

    /// Remote nodes holding a finished copy of `result_id`.
    pub fn nodes_holding(&self, result_id: &ResultId) -> BTreeSet<NodeId> {
        self.results
            .iter()
            .filter(|e| &e.key().result_id == result_id)
            .filter_map(|e| match e.key().location {
                ResultLocation::Node(id) => Some(id),
                ResultLocation::Local => None,
            })
            .collect()
    }

    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    fn open(&self, txn: DistributedTxnId, result_id: &ResultId, location: ResultLocation) -> Box<dyn ResultStream> {
        Box::new(MemoryResultStream {
            key: ResultKey {
                txn,
                result_id: result_id.clone(),
                location,
            },
            rows: Vec::new(),
            results: Arc::clone(&self.results),
        })
    }
}

impl ResultTransport for MemoryResultStore {
    fn open_stream(
        &self,
        txn: DistributedTxnId,
        result_id: &ResultId,
        node: &NodeDescriptor,
    ) -> TernResult<Box<dyn ResultStream>> {
        if self.unreachable.contains(&node.node_id) {
            return Err(ClusterError::Transport {
                node_id: node.node_id,
                reason: format!("could not connect to {}", node.endpoint()),
            }
            .into());
        }
        Ok(self.open(txn, result_id, ResultLocation::Node(node.node_id)))
    }
}

impl LocalResultStore for MemoryResultStore {
    fn create(&self, txn: DistributedTxnId, result_id: &ResultId) -> TernResult<Box<dyn ResultStream>> {
        Ok(self.open(txn, result_id, ResultLocation::Local))
    }

    fn remove_transaction(&self, txn: DistributedTxnId) -> TernResult<()> {
        self.results.retain(|key, _| key.txn != txn);
        Ok(())
    }
}

struct MemoryResultStream {
    key: ResultKey,
    rows: Vec<OwnedRow>,
    results: Arc<DashMap<ResultKey, Vec<OwnedRow>>>,
}

impl ResultStream for MemoryResultStream {
    fn write_row(&mut self, row: &OwnedRow) -> TernResult<()> {
        self.rows.push(row.clone());
        Ok(())
    }

    fn finish(self: Box<Self>) -> TernResult<()> {
        let MemoryResultStream { key, rows, results } = *self;
        results.insert(key, rows);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_common::datum::Datum;
    use tern_common::types::{NodeGroupId, PlanId, SubPlanId};

    fn txn() -> DistributedTxnId {
        DistributedTxnId {
            initiator: NodeGroupId(0),
            txn_number: 11,
        }
    }

    fn node(id: u32) -> NodeDescriptor {
        NodeDescriptor::new(NodeId(id), NodeGroupId(id as i32), format!("w{id}"), 5432)
    }

    fn row(i: i64) -> OwnedRow {
        OwnedRow::new(vec![Datum::Int64(i), Datum::Text(format!("v{i}"))])
    }

    fn limit_kb(kb: i64) -> IntermediateResultConfig {
        IntermediateResultConfig {
            max_intermediate_result_kb: kb,
            ..Default::default()
        }
    }

    #[test]
    fn test_fan_out_to_nodes_and_local_file() {
        let store = MemoryResultStore::new();
        let rid = ResultId::generate(PlanId(1), SubPlanId(1));
        let mut dest = IntermediateResultDestination::open(
            txn(),
            rid.clone(),
            &[node(1), node(3)],
            true,
            &store,
            &store,
            &limit_kb(-1),
        )
        .unwrap();
        dest.push(row(1)).unwrap();
        dest.push(row(2)).unwrap();

        // Nothing visible before finish.
        assert_eq!(store.result_count(), 0);
        let stats = dest.finish().unwrap();

        assert_eq!(stats.rows, 2);
        assert!(stats.wrote_local_file);
        assert_eq!(stats.remote_nodes, vec![NodeId(1), NodeId(3)]);
        assert_eq!(store.nodes_holding(&rid), [NodeId(1), NodeId(3)].into_iter().collect());
        assert_eq!(store.rows_at(ResultLocation::Local, &rid), Some(vec![row(1), row(2)]));
    }

    #[test]
    fn test_size_limit_is_fatal() {
        let store = MemoryResultStore::new();
        let rid = ResultId::generate(PlanId(2), SubPlanId(1));
        let mut dest =
            IntermediateResultDestination::open(txn(), rid, &[node(2)], false, &store, &store, &limit_kb(1))
                .unwrap();

        let big = OwnedRow::new(vec![Datum::Text("x".repeat(600))]);
        dest.push(big.clone()).unwrap();
        let err = dest.push(big).unwrap_err();
        assert_eq!(err.sqlstate(), "54000");
        assert_eq!(dest.bytes_sent(), 2 * 601);
    }

    #[test]
    fn test_zero_limit_rejects_first_row() {
        let store = MemoryResultStore::new();
        let rid = ResultId::generate(PlanId(2), SubPlanId(2));
        let mut dest =
            IntermediateResultDestination::open(txn(), rid, &[], true, &store, &store, &limit_kb(0)).unwrap();
        assert!(dest.push(row(1)).is_err());
    }

    #[test]
    fn test_unreachable_node_fails_open() {
        let store = MemoryResultStore::new();
        store.mark_unreachable(NodeId(4));
        let rid = ResultId::generate(PlanId(3), SubPlanId(1));
        let err = IntermediateResultDestination::open(txn(), rid, &[node(4)], false, &store, &store, &limit_kb(-1))
            .err()
            .unwrap();
        assert!(err.is_transient());
    }

    #[test]
    fn test_directory_store_round_trip_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryResultStore::new(dir.path());
        let rid = ResultId::generate(PlanId(5), SubPlanId(2));

        let mut stream = store.create(txn(), &rid).unwrap();
        stream.write_row(&row(7)).unwrap();
        stream.write_row(&OwnedRow::new(vec![Datum::Null, Datum::Bytea(vec![1, 2])])).unwrap();
        stream.finish().unwrap();

        assert!(store.result_path(txn(), &rid).ends_with("0_11/5_2.data"));
        let rows = store.read_result(txn(), &rid).unwrap();
        assert_eq!(rows, vec![row(7), OwnedRow::new(vec![Datum::Null, Datum::Bytea(vec![1, 2])])]);

        store.remove_transaction(txn()).unwrap();
        assert!(!store.transaction_dir(txn()).exists());
        // Removing twice is fine.
        store.remove_transaction(txn()).unwrap();
    }

    #[test]
    fn test_unfinished_file_is_never_published() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryResultStore::new(dir.path());
        let rid = ResultId::generate(PlanId(6), SubPlanId(1));

        let mut stream = store.create(txn(), &rid).unwrap();
        stream.write_row(&row(1)).unwrap();
        assert!(!store.result_path(txn(), &rid).exists());
        drop(stream);

        assert!(!store.result_path(txn(), &rid).exists());
        assert!(store.read_result(txn(), &rid).is_err());
        let leftovers = fs::read_dir(store.transaction_dir(txn())).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_failed_destination_leaves_no_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = DirectoryResultStore::new(dir.path());
        let transport = MemoryResultStore::new();
        let rid = ResultId::generate(PlanId(6), SubPlanId(2));
        let mut dest = IntermediateResultDestination::open(
            txn(),
            rid.clone(),
            &[node(1)],
            true,
            &transport,
            &files,
            &limit_kb(1),
        )
        .unwrap();

        let big = OwnedRow::new(vec![Datum::Text("x".repeat(600))]);
        dest.push(big.clone()).unwrap();
        assert!(dest.push(big).is_err());
        drop(dest);

        assert!(!files.result_path(txn(), &rid).exists());
        assert_eq!(transport.result_count(), 0);
    }

    #[test]
    fn test_huge_limit_does_not_overflow() {
        let store = MemoryResultStore::new();
        let rid = ResultId::generate(PlanId(7), SubPlanId(1));
        let mut dest = IntermediateResultDestination::open(
            txn(),
            rid,
            &[],
            true,
            &store,
            &store,
            &limit_kb(1 << 54),
        )
        .unwrap();
        dest.push(row(1)).unwrap();

        let mut dest = IntermediateResultDestination::open(
            txn(),
            ResultId::generate(PlanId(7), SubPlanId(2)),
            &[],
            true,
            &store,
            &store,
            &limit_kb(i64::MAX),
        )
        .unwrap();
        dest.push(row(2)).unwrap();
        assert_eq!(dest.finish().unwrap().rows, 1);
    }

    #[test]
    fn test_memory_store_remove_transaction() {
        let store = MemoryResultStore::new();
        let rid = ResultId::generate(PlanId(8), SubPlanId(1));
        let mut stream = store.create(txn(), &rid).unwrap();
        stream.write_row(&row(1)).unwrap();
        stream.finish().unwrap();
        assert!(store.has_local_copy(&rid));

        store.remove_transaction(txn()).unwrap();
        assert!(!store.has_local_copy(&rid));
    }
}
