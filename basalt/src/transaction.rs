//! Transactions, per-tuple version chains, and the transaction manager.
//!
//! Every write leaves the new version in the table heap and pushes a
//! partial pre-image (an undo log) into the writing transaction's log
//! arena. Chains are addressed with `(txn_id, log index)` handles rather
//! than pointers, so they survive transaction-table reshuffling, and the
//! per-rid chain heads live in a per-page map behind per-page mutexes.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::table_heap::TableHeap;
use crate::table_page::TupleMeta;
use crate::watermark::Watermark;
use crate::{PageId, Rid, TableOid, Timestamp, TxnId, INVALID_TS, TXN_START_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    SnapshotIsolation,
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionState {
    Running = 0,
    Tainted = 1,
    Committed = 2,
    Aborted = 3,
}

impl TransactionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TransactionState::Running,
            1 => TransactionState::Tainted,
            2 => TransactionState::Committed,
            _ => TransactionState::Aborted,
        }
    }
}

/// Handle to an undo log inside some transaction's log arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UndoLink {
    pub txn_id: TxnId,
    pub log_idx: usize,
}

/// A partial, timestamped pre-image of a tuple, linked into a reverse
/// chain per rid.
#[derive(Debug, Clone)]
pub struct UndoLog {
    /// Whether this version was a deletion marker.
    pub is_deleted: bool,
    /// Which schema fields `tuple` carries, by position.
    pub modified_fields: Vec<bool>,
    /// The modified fields, serialized against the partial schema.
    pub tuple: Vec<u8>,
    /// Commit timestamp of the version this log restores.
    pub ts: Timestamp,
    /// Next-older version, if any.
    pub prev_version: Option<UndoLink>,
}

struct TxnInner {
    undo_logs: Vec<UndoLog>,
    write_set: HashMap<TableOid, HashSet<Rid>>,
}

/// A single transaction. Undo logs are append-only (or updated in place by
/// their owner); other transactions and the version-link map reference them
/// by index, so entries are never removed while the transaction lives.
pub struct Transaction {
    txn_id: TxnId,
    isolation: IsolationLevel,
    read_ts: Timestamp,
    state: AtomicU8,
    commit_ts: AtomicU64,
    inner: Mutex<TxnInner>,
}

impl Transaction {
    fn new(txn_id: TxnId, isolation: IsolationLevel, read_ts: Timestamp) -> Self {
        Self {
            txn_id,
            isolation,
            read_ts,
            state: AtomicU8::new(TransactionState::Running as u8),
            commit_ts: AtomicU64::new(INVALID_TS),
            inner: Mutex::new(TxnInner {
                undo_logs: Vec::new(),
                write_set: HashMap::new(),
            }),
        }
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// The temporary timestamp this transaction stamps in-flight writes
    /// with. Identical to the transaction id.
    pub fn temp_ts(&self) -> Timestamp {
        self.txn_id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn read_ts(&self) -> Timestamp {
        self.read_ts
    }

    pub fn commit_ts(&self) -> Timestamp {
        self.commit_ts.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TransactionState {
        TransactionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Marks a running transaction as tainted after a write-write
    /// conflict. Tainted transactions can only abort.
    pub fn set_tainted(&self) {
        let _ = self.state.compare_exchange(
            TransactionState::Running as u8,
            TransactionState::Tainted as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn set_state(&self, state: TransactionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Appends an undo log and returns its stable handle.
    pub fn append_undo_log(&self, log: UndoLog) -> UndoLink {
        let mut inner = self.inner.lock().unwrap();
        inner.undo_logs.push(log);
        UndoLink {
            txn_id: self.txn_id,
            log_idx: inner.undo_logs.len() - 1,
        }
    }

    /// Rewrites one of this transaction's own undo logs in place.
    pub fn modify_undo_log(&self, log_idx: usize, log: UndoLog) {
        let mut inner = self.inner.lock().unwrap();
        inner.undo_logs[log_idx] = log;
    }

    pub fn undo_log(&self, log_idx: usize) -> Option<UndoLog> {
        self.inner.lock().unwrap().undo_logs.get(log_idx).cloned()
    }

    pub fn undo_log_count(&self) -> usize {
        self.inner.lock().unwrap().undo_logs.len()
    }

    pub fn append_write_set(&self, table: TableOid, rid: Rid) {
        let mut inner = self.inner.lock().unwrap();
        inner.write_set.entry(table).or_default().insert(rid);
    }

    pub fn write_set(&self) -> HashMap<TableOid, HashSet<Rid>> {
        self.inner.lock().unwrap().write_set.clone()
    }
}

/// Resolves table oids to heaps. Implemented by the catalog; keeps the
/// kernel independent of catalog types.
pub trait TableProvider: Send + Sync {
    fn table_heap(&self, oid: TableOid) -> Option<Arc<TableHeap>>;
    fn table_oids(&self) -> Vec<TableOid>;
}

struct PageVersionInfo {
    prev_version: Mutex<HashMap<u16, UndoLink>>,
}

/// Allocates transaction ids and commit timestamps, owns the version-link
/// map and the watermark, and drives commit, abort, and garbage
/// collection.
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    txn_map: RwLock<HashMap<TxnId, Arc<Transaction>>>,
    version_info: Mutex<HashMap<PageId, Arc<PageVersionInfo>>>,
    commit_mutex: Mutex<()>,
    watermark: Mutex<Watermark>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU64::new(TXN_START_ID),
            txn_map: RwLock::new(HashMap::new()),
            version_info: Mutex::new(HashMap::new()),
            commit_mutex: Mutex::new(()),
            watermark: Mutex::new(Watermark::new(0)),
        }
    }

    /// Starts a transaction reading from the latest committed snapshot.
    pub fn begin(&self, isolation: IsolationLevel) -> Arc<Transaction> {
        let mut txn_map = self.txn_map.write().unwrap();
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);

        let mut watermark = self.watermark.lock().unwrap();
        let read_ts = watermark.latest_commit_ts();
        watermark.add_txn(read_ts);
        drop(watermark);

        let txn = Arc::new(Transaction::new(txn_id, isolation, read_ts));
        txn_map.insert(txn_id, Arc::clone(&txn));
        crate::basalt_debug_log!(
            "[TxnManager::begin] txn {} read_ts {}",
            txn_id ^ TXN_START_ID,
            read_ts
        );
        txn
    }

    pub fn get_txn(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.txn_map.read().unwrap().get(&txn_id).cloned()
    }

    /// Serializable certification hook. Always passes; full serialization
    /// checking is intentionally left open.
    fn verify_txn(&self, _txn: &Transaction) -> bool {
        true
    }

    /// Commits `txn`: stamps every write-set tuple with the next commit
    /// timestamp while holding the commit mutex, so commit order equals
    /// timestamp order. Returns `Ok(false)` when serializable verification
    /// rejects the transaction (it is aborted before returning).
    pub fn commit(&self, txn: &Transaction, tables: &dyn TableProvider) -> io::Result<bool> {
        let commit_lock = self.commit_mutex.lock().unwrap();

        if txn.state() != TransactionState::Running {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "txn not in running state",
            ));
        }

        if txn.isolation() == IsolationLevel::Serializable && !self.verify_txn(txn) {
            drop(commit_lock);
            self.abort(txn)?;
            return Ok(false);
        }

        let commit_ts = self.watermark.lock().unwrap().latest_commit_ts() + 1;

        for (table_oid, rids) in txn.write_set() {
            let heap = tables.table_heap(table_oid).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unknown table oid {table_oid}"),
                )
            })?;
            for rid in rids {
                let mut meta = heap.get_tuple_meta(rid)?;
                meta.ts = commit_ts;
                heap.update_tuple_meta(meta, rid)?;
            }
        }

        txn.commit_ts.store(commit_ts, Ordering::Release);
        txn.set_state(TransactionState::Committed);

        let mut watermark = self.watermark.lock().unwrap();
        watermark.update_commit_ts(commit_ts);
        watermark.remove_txn(txn.read_ts());

        crate::basalt_debug_log!(
            "[TxnManager::commit] txn {} commit_ts {commit_ts}",
            txn.txn_id() ^ TXN_START_ID
        );
        Ok(true)
    }

    /// Aborts a running or tainted transaction. Writes are not undone: the
    /// transaction's temporary timestamp never matches any commit
    /// timestamp, so its versions stay invisible to every reader.
    pub fn abort(&self, txn: &Transaction) -> io::Result<()> {
        let state = txn.state();
        if state != TransactionState::Running && state != TransactionState::Tainted {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "txn not in running / tainted state",
            ));
        }

        let _txn_map = self.txn_map.write().unwrap();
        txn.set_state(TransactionState::Aborted);
        self.watermark.lock().unwrap().remove_txn(txn.read_ts());
        Ok(())
    }

    /// Garbage-collects undo logs no live snapshot can reach and drops
    /// finished transactions whose logs are all unreachable. Returns the
    /// number of transactions removed.
    pub fn garbage_collect(&self, tables: &dyn TableProvider) -> io::Result<usize> {
        let watermark = self.watermark.lock().unwrap().watermark();

        // A log is reachable iff the version above it in the chain is newer
        // than the watermark: some snapshot at or above the watermark may
        // still need to step down into it.
        let mut reachable: HashSet<UndoLink> = HashSet::new();
        for oid in tables.table_oids() {
            let Some(heap) = tables.table_heap(oid) else {
                continue;
            };
            let mut iter = heap.iter()?;
            while !iter.is_end() {
                let rid = iter.rid();
                let (meta, _) = iter.get_tuple()?;
                iter.advance()?;

                let mut newer_ts = meta.ts;
                let mut link = self.get_undo_link(rid);
                while let Some(current) = link {
                    if newer_ts <= watermark {
                        break;
                    }
                    let Some(log) = self.get_undo_log(current) else {
                        break;
                    };
                    reachable.insert(current);
                    newer_ts = log.ts;
                    link = log.prev_version;
                }
            }
        }

        let mut txn_map = self.txn_map.write().unwrap();
        let before = txn_map.len();
        txn_map.retain(|&txn_id, txn| {
            let state = txn.state();
            if state != TransactionState::Committed && state != TransactionState::Aborted {
                return true;
            }
            if state == TransactionState::Committed && txn.commit_ts() > watermark {
                return true;
            }
            let log_count = txn.undo_log_count();
            (0..log_count).any(|log_idx| reachable.contains(&UndoLink { txn_id, log_idx }))
        });
        Ok(before - txn_map.len())
    }

    /// Compare-and-set of a rid's version-chain head under the owning
    /// page's mutex. `check` sees the current head and may veto the swap;
    /// a veto returns `false`.
    pub fn update_version_link(
        &self,
        rid: Rid,
        new_link: Option<UndoLink>,
        check: Option<&dyn Fn(Option<&UndoLink>) -> bool>,
    ) -> bool {
        let page_info = {
            let mut version_info = self.version_info.lock().unwrap();
            Arc::clone(version_info.entry(rid.0).or_insert_with(|| {
                Arc::new(PageVersionInfo {
                    prev_version: Mutex::new(HashMap::new()),
                })
            }))
        };

        let mut prev_version = page_info.prev_version.lock().unwrap();
        if let Some(check) = check {
            if !check(prev_version.get(&rid.1)) {
                return false;
            }
        }
        match new_link {
            Some(link) => {
                prev_version.insert(rid.1, link);
            }
            None => {
                prev_version.remove(&rid.1);
            }
        }
        true
    }

    /// Head of the rid's undo chain, if any.
    pub fn get_undo_link(&self, rid: Rid) -> Option<UndoLink> {
        let page_info = {
            let version_info = self.version_info.lock().unwrap();
            Arc::clone(version_info.get(&rid.0)?)
        };
        let prev_version = page_info.prev_version.lock().unwrap();
        prev_version.get(&rid.1).copied()
    }

    /// Resolves a link into the owning transaction's log arena. `None`
    /// when the transaction has been garbage-collected.
    pub fn get_undo_log(&self, link: UndoLink) -> Option<UndoLog> {
        let txn = self.get_txn(link.txn_id)?;
        txn.undo_log(link.log_idx)
    }

    pub fn latest_commit_ts(&self) -> Timestamp {
        self.watermark.lock().unwrap().latest_commit_ts()
    }

    pub fn watermark(&self) -> Timestamp {
        self.watermark.lock().unwrap().watermark()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::{BufferPoolConfig, BufferPoolManager};
    use crate::pager::Pager;
    use tempfile::tempdir;

    struct SingleTable {
        heap: Arc<TableHeap>,
    }

    impl TableProvider for SingleTable {
        fn table_heap(&self, oid: TableOid) -> Option<Arc<TableHeap>> {
            (oid == 1).then(|| Arc::clone(&self.heap))
        }

        fn table_oids(&self) -> Vec<TableOid> {
            vec![1]
        }
    }

    fn setup(dir: &std::path::Path) -> (SingleTable, TransactionManager) {
        let pager = Pager::open(dir.join("txn.db")).unwrap();
        let bpm = Arc::new(BufferPoolManager::new(
            BufferPoolConfig {
                pool_size: 16,
                replacer_k: 2,
            },
            pager,
        ));
        let heap = Arc::new(TableHeap::new(bpm).unwrap());
        (SingleTable { heap }, TransactionManager::new())
    }

    #[test]
    fn test_begin_assigns_ids_and_read_ts() {
        let dir = tempdir().unwrap();
        let (_tables, mgr) = setup(dir.path());

        let a = mgr.begin(IsolationLevel::SnapshotIsolation);
        let b = mgr.begin(IsolationLevel::SnapshotIsolation);
        assert!(a.txn_id() >= TXN_START_ID);
        assert_ne!(a.txn_id(), b.txn_id());
        assert_eq!(a.read_ts(), 0);
        assert_eq!(b.read_ts(), 0);
    }

    #[test]
    fn test_commit_stamps_write_set() {
        let dir = tempdir().unwrap();
        let (tables, mgr) = setup(dir.path());

        let txn = mgr.begin(IsolationLevel::SnapshotIsolation);
        let rid = tables
            .heap
            .insert_tuple(
                TupleMeta {
                    ts: txn.temp_ts(),
                    is_deleted: false,
                },
                b"payload",
            )
            .unwrap();
        txn.append_write_set(1, rid);

        assert!(mgr.commit(&txn, &tables).unwrap());
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(txn.commit_ts(), 1);
        let meta = tables.heap.get_tuple_meta(rid).unwrap();
        assert_eq!(meta.ts, 1);
    }

    #[test]
    fn test_commit_from_wrong_state_is_rejected() {
        let dir = tempdir().unwrap();
        let (tables, mgr) = setup(dir.path());

        let txn = mgr.begin(IsolationLevel::SnapshotIsolation);
        mgr.abort(&txn).unwrap();
        let err = mgr.commit(&txn, &tables).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_abort_releases_watermark_entry() {
        let dir = tempdir().unwrap();
        let (_tables, mgr) = setup(dir.path());

        let txn = mgr.begin(IsolationLevel::SnapshotIsolation);
        assert_eq!(mgr.watermark(), 0);
        mgr.abort(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);

        // A tainted transaction can also abort.
        let txn = mgr.begin(IsolationLevel::SnapshotIsolation);
        txn.set_tainted();
        assert_eq!(txn.state(), TransactionState::Tainted);
        mgr.abort(&txn).unwrap();
    }

    #[test]
    fn test_version_link_cas() {
        let dir = tempdir().unwrap();
        let (_tables, mgr) = setup(dir.path());

        let rid: Rid = (0, 0);
        let link_a = UndoLink {
            txn_id: TXN_START_ID,
            log_idx: 0,
        };
        assert!(mgr.update_version_link(rid, Some(link_a), None));
        assert_eq!(mgr.get_undo_link(rid), Some(link_a));

        // A stale-head check vetoes the swap.
        let link_b = UndoLink {
            txn_id: TXN_START_ID + 1,
            log_idx: 0,
        };
        let swapped =
            mgr.update_version_link(rid, Some(link_b), Some(&|head| head.is_none()));
        assert!(!swapped);
        assert_eq!(mgr.get_undo_link(rid), Some(link_a));

        assert!(mgr.update_version_link(rid, None, None));
        assert_eq!(mgr.get_undo_link(rid), None);
    }

    #[test]
    fn test_undo_log_arena_handles() {
        let dir = tempdir().unwrap();
        let (_tables, mgr) = setup(dir.path());

        let txn = mgr.begin(IsolationLevel::SnapshotIsolation);
        let link = txn.append_undo_log(UndoLog {
            is_deleted: false,
            modified_fields: vec![true],
            tuple: vec![1, 2, 3],
            ts: 0,
            prev_version: None,
        });
        assert_eq!(link.log_idx, 0);

        let log = mgr.get_undo_log(link).unwrap();
        assert_eq!(log.tuple, vec![1, 2, 3]);

        txn.modify_undo_log(
            0,
            UndoLog {
                is_deleted: true,
                modified_fields: vec![true],
                tuple: vec![],
                ts: 0,
                prev_version: None,
            },
        );
        assert!(mgr.get_undo_log(link).unwrap().is_deleted);
    }

    #[test]
    fn test_garbage_collect_drops_unreachable_txns() {
        let dir = tempdir().unwrap();
        let (tables, mgr) = setup(dir.path());

        // Two committed updates of the same rid, then no live readers.
        let writer1 = mgr.begin(IsolationLevel::SnapshotIsolation);
        let rid = tables
            .heap
            .insert_tuple(
                TupleMeta {
                    ts: writer1.temp_ts(),
                    is_deleted: false,
                },
                b"v1",
            )
            .unwrap();
        writer1.append_write_set(1, rid);
        assert!(mgr.commit(&writer1, &tables).unwrap());

        let writer2 = mgr.begin(IsolationLevel::SnapshotIsolation);
        let link = writer2.append_undo_log(UndoLog {
            is_deleted: false,
            modified_fields: vec![true],
            tuple: b"v1".to_vec(),
            ts: 1,
            prev_version: None,
        });
        assert!(mgr.update_version_link(rid, Some(link), None));
        tables
            .heap
            .update_tuple_in_place(
                TupleMeta {
                    ts: writer2.temp_ts(),
                    is_deleted: false,
                },
                b"v2",
                rid,
                None,
            )
            .unwrap();
        writer2.append_write_set(1, rid);
        assert!(mgr.commit(&writer2, &tables).unwrap());

        // Watermark is now the latest commit; v1's undo log is below it and
        // unreachable, so both committed transactions can be dropped.
        let dropped = mgr.garbage_collect(&tables).unwrap();
        assert_eq!(dropped, 2);
        assert!(mgr.get_txn(writer1.txn_id()).is_none());
        assert!(mgr.get_txn(writer2.txn_id()).is_none());
    }

    #[test]
    fn test_garbage_collect_keeps_logs_needed_by_snapshots() {
        let dir = tempdir().unwrap();
        let (tables, mgr) = setup(dir.path());

        let writer1 = mgr.begin(IsolationLevel::SnapshotIsolation);
        let rid = tables
            .heap
            .insert_tuple(
                TupleMeta {
                    ts: writer1.temp_ts(),
                    is_deleted: false,
                },
                b"v1",
            )
            .unwrap();
        writer1.append_write_set(1, rid);
        assert!(mgr.commit(&writer1, &tables).unwrap());

        // A reader pins the snapshot at commit-ts 1.
        let reader = mgr.begin(IsolationLevel::SnapshotIsolation);

        let writer2 = mgr.begin(IsolationLevel::SnapshotIsolation);
        let link = writer2.append_undo_log(UndoLog {
            is_deleted: false,
            modified_fields: vec![true],
            tuple: b"v1".to_vec(),
            ts: 1,
            prev_version: None,
        });
        assert!(mgr.update_version_link(rid, Some(link), None));
        tables
            .heap
            .update_tuple_in_place(
                TupleMeta {
                    ts: writer2.temp_ts(),
                    is_deleted: false,
                },
                b"v2",
                rid,
                None,
            )
            .unwrap();
        writer2.append_write_set(1, rid);
        assert!(mgr.commit(&writer2, &tables).unwrap());

        // The reader at ts 1 still needs writer2's undo log.
        let dropped = mgr.garbage_collect(&tables).unwrap();
        assert!(mgr.get_txn(writer2.txn_id()).is_some());

        mgr.abort(&reader).unwrap();
        let dropped_after = mgr.garbage_collect(&tables).unwrap();
        assert!(dropped + dropped_after >= 2);
        assert!(mgr.get_txn(writer2.txn_id()).is_none());
    }
}
