use std::sync::Arc;

use basalt::{Rid, TupleMeta};

use super::common::{
    append_and_link_undo_log, check_txn_still_running, check_write_write_conflict,
    generate_full_log, merge_to_full_log, own_undo_link,
};
use super::{ExecuteCtx, Executor, INVALID_RID};
use crate::catalog::{IndexInfo, TableInfo};
use crate::errors::ExecutionError;
use crate::plan::DeletePlan;
use crate::types::{Column, DataType, Row, Schema, Value};

/// Marks the child's rows deleted under the transaction's temporary
/// timestamp after linking an undo log holding the full pre-image, and
/// removes their index entries. Emits a single count row.
pub struct DeleteExecutor<'a> {
    ctx: ExecuteCtx<'a>,
    plan: &'a DeletePlan,
    child: Box<dyn Executor + 'a>,
    table: Arc<TableInfo>,
    indexes: Vec<Arc<IndexInfo>>,
    output_schema: Schema,
    done: bool,
}

impl<'a> DeleteExecutor<'a> {
    pub fn new(
        ctx: ExecuteCtx<'a>,
        plan: &'a DeletePlan,
        child: Box<dyn Executor + 'a>,
    ) -> Result<Self, ExecutionError> {
        let table = ctx
            .catalog
            .table(plan.table_oid)
            .ok_or_else(|| ExecutionError::TableNotFound(format!("oid {}", plan.table_oid)))?;
        let indexes = ctx.catalog.table_indexes(&table.name);
        Ok(Self {
            ctx,
            plan,
            child,
            table,
            indexes,
            output_schema: Schema::new(vec![Column::new("rows_deleted", DataType::Int)]),
            done: false,
        })
    }
}

impl Executor for DeleteExecutor<'_> {
    fn schema(&self) -> &Schema {
        &self.output_schema
    }

    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Row, Rid)>, ExecutionError> {
        if self.done {
            return Ok(None);
        }
        check_txn_still_running(&self.ctx)?;

        let mut targets = Vec::new();
        while let Some(target) = self.child.next()? {
            targets.push(target);
        }
        let rids: Vec<Rid> = targets.iter().map(|(_, rid)| *rid).collect();
        check_write_write_conflict(&self.ctx, &self.table.heap, &rids)?;

        let mut deleted = 0i32;
        for (row, rid) in targets {
            let meta = self.table.heap.get_tuple_meta(rid)?;

            if meta.ts == self.ctx.txn.temp_ts() {
                // Re-deleting our own write: widen our existing diff log to
                // the full pre-image so reconstruction never consults the
                // tombstoned base tuple. A self-inserted tuple has no log
                // and needs none.
                if let Some(link) = own_undo_link(&self.ctx, rid) {
                    let old_log = self
                        .ctx
                        .txn
                        .undo_log(link.log_idx)
                        .ok_or_else(|| ExecutionError::Corruption("dangling undo link".into()))?;
                    let full = merge_to_full_log(&old_log, &row, &self.table.schema)?;
                    self.ctx.txn.modify_undo_log(link.log_idx, full);
                }
            } else {
                let prev = self.ctx.txn_mgr.get_undo_link(rid);
                let log =
                    generate_full_log(&row, &self.table.schema, meta.is_deleted, meta.ts, prev)?;
                append_and_link_undo_log(&self.ctx, rid, log)?;
            }

            self.table.heap.update_tuple_meta(
                TupleMeta {
                    ts: self.ctx.txn.temp_ts(),
                    is_deleted: true,
                },
                rid,
            )?;
            self.ctx.txn.append_write_set(self.plan.table_oid, rid);

            for index in &self.indexes {
                if let Some(key) = row[index.key_column].as_i64() {
                    index.index.remove(&key)?;
                }
            }
            deleted += 1;
        }

        self.done = true;
        Ok(Some((vec![Value::Int(deleted)], INVALID_RID)))
    }
}
