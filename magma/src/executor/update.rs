use std::sync::Arc;

use basalt::{Rid, TupleMeta};

use super::common::{
    append_and_link_undo_log, check_txn_still_running, check_write_write_conflict,
    generate_diff_log, merge_diff_into_log, own_undo_link,
};
use super::{ExecuteCtx, Executor, INVALID_RID};
use crate::catalog::{IndexInfo, TableInfo};
use crate::errors::ExecutionError;
use crate::eval::evaluate;
use crate::plan::UpdatePlan;
use crate::tuple::serialize_row;
use crate::types::{Column, DataType, Row, Schema, Value};

/// Rewrites the child's rows in place under the transaction's temporary
/// timestamp, linking (or merging into) a diff undo log holding the old
/// values of every changed field. Emits a single count row.
pub struct UpdateExecutor<'a> {
    ctx: ExecuteCtx<'a>,
    plan: &'a UpdatePlan,
    child: Box<dyn Executor + 'a>,
    table: Arc<TableInfo>,
    indexes: Vec<Arc<IndexInfo>>,
    output_schema: Schema,
    done: bool,
}

impl<'a> UpdateExecutor<'a> {
    pub fn new(
        ctx: ExecuteCtx<'a>,
        plan: &'a UpdatePlan,
        child: Box<dyn Executor + 'a>,
    ) -> Result<Self, ExecutionError> {
        let table = ctx
            .catalog
            .table(plan.table_oid)
            .ok_or_else(|| ExecutionError::TableNotFound(format!("oid {}", plan.table_oid)))?;
        if plan.target_exprs.len() != table.schema.len() {
            return Err(ExecutionError::GenericError(format!(
                "update needs {} target expressions, got {}",
                table.schema.len(),
                plan.target_exprs.len()
            )));
        }
        let indexes = ctx.catalog.table_indexes(&table.name);
        Ok(Self {
            ctx,
            plan,
            child,
            table,
            indexes,
            output_schema: Schema::new(vec![Column::new("rows_updated", DataType::Int)]),
            done: false,
        })
    }
}

impl Executor for UpdateExecutor<'_> {
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

        let mut updated = 0i32;
        for (old_row, rid) in targets {
            let new_row: Row = self
                .plan
                .target_exprs
                .iter()
                .map(|expr| evaluate(expr, &old_row))
                .collect::<Result<_, _>>()?;
            if new_row == old_row {
                continue;
            }
            let modified_fields: Vec<bool> = old_row
                .iter()
                .zip(&new_row)
                .map(|(old, new)| old != new)
                .collect();

            let meta = self.table.heap.get_tuple_meta(rid)?;
            if meta.ts == self.ctx.txn.temp_ts() {
                // Re-updating our own write: fold the new pre-images into
                // the existing log. A self-inserted tuple has no log and
                // needs none.
                if let Some(link) = own_undo_link(&self.ctx, rid) {
                    let old_log = self
                        .ctx
                        .txn
                        .undo_log(link.log_idx)
                        .ok_or_else(|| ExecutionError::Corruption("dangling undo link".into()))?;
                    let merged =
                        merge_diff_into_log(&old_log, &old_row, &modified_fields, &self.table.schema)?;
                    self.ctx.txn.modify_undo_log(link.log_idx, merged);
                }
            } else {
                let prev = self.ctx.txn_mgr.get_undo_link(rid);
                let log = generate_diff_log(&old_row, &new_row, &self.table.schema, meta.ts, prev)?;
                append_and_link_undo_log(&self.ctx, rid, log)?;
            }

            let bytes = serialize_row(&new_row, &self.table.schema)?;
            self.table.heap.update_tuple_in_place(
                TupleMeta {
                    ts: self.ctx.txn.temp_ts(),
                    is_deleted: false,
                },
                &bytes,
                rid,
                None,
            )?;
            self.ctx.txn.append_write_set(self.plan.table_oid, rid);

            for index in &self.indexes {
                let old_key = old_row[index.key_column].as_i64();
                let new_key = new_row[index.key_column].as_i64();
                if old_key == new_key {
                    continue;
                }
                if let Some(key) = old_key {
                    index.index.remove(&key)?;
                }
                if let Some(key) = new_key {
                    index.index.insert(&key, &rid)?;
                }
            }
            updated += 1;
        }

        self.done = true;
        Ok(Some((vec![Value::Int(updated)], INVALID_RID)))
    }
}
