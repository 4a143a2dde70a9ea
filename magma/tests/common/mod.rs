use std::sync::Arc;

use basalt::buffer_pool::{BufferPoolConfig, BufferPoolManager};
use basalt::pager::Pager;
use basalt::transaction::{IsolationLevel, Transaction, TransactionManager};
use basalt::Rid;
use magma::catalog::{Catalog, TableInfo};
use magma::executor::{
    ExecuteCtx, Executor, InsertExecutor, SeqScanExecutor, ValuesExecutor,
};
use magma::plan::{Expr, InsertPlan, SeqScanPlan, ValuesPlan};
use magma::types::{Column, DataType, Row, Schema, Value};
use tempfile::TempDir;

/// A full stack over a temp file: buffer pool, catalog, transactions. The
/// temp dir lives as long as the fixture.
pub struct TestDb {
    pub catalog: Arc<Catalog>,
    pub txn_mgr: Arc<TransactionManager>,
    _dir: TempDir,
}

#[allow(dead_code)]
impl TestDb {
    pub fn new(name: &str) -> Self {
        Self::with_pool_size(name, 256)
    }

    pub fn with_pool_size(name: &str, pool_size: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let pager = Pager::open(dir.path().join(format!("{name}.db"))).unwrap();
        let bpm = Arc::new(BufferPoolManager::new(
            BufferPoolConfig {
                pool_size,
                replacer_k: 2,
            },
            pager,
        ));
        TestDb {
            catalog: Arc::new(Catalog::new(bpm)),
            txn_mgr: Arc::new(TransactionManager::new()),
            _dir: dir,
        }
    }

    pub fn begin(&self) -> Arc<Transaction> {
        self.txn_mgr.begin(IsolationLevel::SnapshotIsolation)
    }

    pub fn commit(&self, txn: &Transaction) -> bool {
        self.txn_mgr.commit(txn, self.catalog.as_ref()).unwrap()
    }

    pub fn abort(&self, txn: &Transaction) {
        self.txn_mgr.abort(txn).unwrap();
    }

    pub fn ctx<'a>(&'a self, txn: &'a Arc<Transaction>) -> ExecuteCtx<'a> {
        ExecuteCtx {
            catalog: &self.catalog,
            txn_mgr: &self.txn_mgr,
            txn,
        }
    }

    /// `accounts(id INT, balance INT)`, the workhorse table of these tests.
    pub fn create_accounts_table(&self) -> Arc<TableInfo> {
        self.catalog
            .create_table(
                "accounts",
                Schema::new(vec![
                    Column::new("id", DataType::Int),
                    Column::new("balance", DataType::Int),
                ]),
            )
            .unwrap()
    }

    /// Inserts `(id, balance)` rows inside `txn` through the executors.
    pub fn insert_accounts(&self, txn: &Arc<Transaction>, rows: &[(i32, i32)]) -> i32 {
        let table = self.catalog.table_by_name("accounts").unwrap();
        let values_plan = ValuesPlan {
            rows: rows
                .iter()
                .map(|(id, balance)| vec![Value::Int(*id), Value::Int(*balance)])
                .collect(),
        };
        let insert_plan = InsertPlan {
            table_oid: table.oid,
        };
        let child = Box::new(ValuesExecutor::new(table.schema.clone(), &values_plan));
        let mut insert = InsertExecutor::new(self.ctx(txn), &insert_plan, child).unwrap();
        insert.init().unwrap();
        let (row, _) = insert.next().unwrap().unwrap();
        match row[0] {
            Value::Int(count) => count,
            _ => panic!("insert emitted a non-integer count"),
        }
    }

    /// Scans `accounts` in `txn`, optionally filtered.
    pub fn scan_accounts(&self, txn: &Arc<Transaction>, filter: Option<Expr>) -> Vec<(Row, Rid)> {
        let table = self.catalog.table_by_name("accounts").unwrap();
        let plan = SeqScanPlan {
            table_oid: table.oid,
            filter,
        };
        let ctx = self.ctx(txn);
        let mut scan = SeqScanExecutor::new(ctx, &plan).unwrap();
        scan.init().unwrap();
        let mut rows = Vec::new();
        while let Some(out) = scan.next().unwrap() {
            rows.push(out);
        }
        rows
    }

    /// Balance of `id` as seen by `txn`, or `None` when invisible.
    pub fn balance_of(&self, txn: &Arc<Transaction>, id: i32) -> Option<i32> {
        self.scan_accounts(txn, None)
            .into_iter()
            .find(|(row, _)| row[0] == Value::Int(id))
            .map(|(row, _)| match row[1] {
                Value::Int(balance) => balance,
                _ => panic!("balance is not an integer"),
            })
    }
}
