//! The tuple-at-a-time execution collaborators.
//!
//! Every executor follows the two-method contract: `init` prepares state,
//! `next` produces one `(row, rid)` at a time. Write executors drain their
//! child, apply MVCC bookkeeping through the transaction manager, and emit
//! a single affected-row count.

use std::sync::Arc;

use basalt::transaction::{Transaction, TransactionManager};
use basalt::{Rid, INVALID_PAGE_ID};

use crate::catalog::Catalog;
use crate::errors::ExecutionError;
use crate::types::{Row, Schema};

pub mod common;
mod delete;
mod insert;
mod scan;
mod update;
mod values;

pub use delete::DeleteExecutor;
pub use insert::InsertExecutor;
pub use scan::SeqScanExecutor;
pub use update::UpdateExecutor;
pub use values::ValuesExecutor;

/// Rid attached to rows that do not live in a table (counts, literals).
pub const INVALID_RID: Rid = (INVALID_PAGE_ID, 0);

/// Everything an executor needs: the catalog plus the calling transaction.
#[derive(Clone, Copy)]
pub struct ExecuteCtx<'a> {
    pub catalog: &'a Catalog,
    pub txn_mgr: &'a Arc<TransactionManager>,
    pub txn: &'a Arc<Transaction>,
}

pub trait Executor {
    fn schema(&self) -> &Schema;

    fn init(&mut self) -> Result<(), ExecutionError>;

    fn next(&mut self) -> Result<Option<(Row, Rid)>, ExecutionError>;
}
