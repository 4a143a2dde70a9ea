use std::sync::Arc;

use basalt::{Rid, TupleMeta};

use super::common::check_txn_still_running;
use super::{ExecuteCtx, Executor, INVALID_RID};
use crate::catalog::{IndexInfo, TableInfo};
use crate::errors::ExecutionError;
use crate::plan::InsertPlan;
use crate::tuple::serialize_row;
use crate::types::{Column, DataType, Row, Schema, Value};

/// Appends the child's rows to the table heap with the transaction's
/// temporary timestamp, records them in the write set, and maintains the
/// table's hash indexes. Emits a single count row.
pub struct InsertExecutor<'a> {
    ctx: ExecuteCtx<'a>,
    plan: &'a InsertPlan,
    child: Box<dyn Executor + 'a>,
    table: Arc<TableInfo>,
    indexes: Vec<Arc<IndexInfo>>,
    output_schema: Schema,
    done: bool,
}

impl<'a> InsertExecutor<'a> {
    pub fn new(
        ctx: ExecuteCtx<'a>,
        plan: &'a InsertPlan,
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
            output_schema: Schema::new(vec![Column::new("rows_inserted", DataType::Int)]),
            done: false,
        })
    }
}

impl Executor for InsertExecutor<'_> {
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

        let mut inserted = 0i32;
        while let Some((row, _)) = self.child.next()? {
            let bytes = serialize_row(&row, &self.table.schema)?;
            let meta = TupleMeta {
                ts: self.ctx.txn.temp_ts(),
                is_deleted: false,
            };
            let rid = self.table.heap.insert_tuple(meta, &bytes)?;
            self.ctx.txn.append_write_set(self.plan.table_oid, rid);

            for index in &self.indexes {
                if let Some(key) = row[index.key_column].as_i64() {
                    index.index.insert(&key, &rid)?;
                }
            }
            inserted += 1;
            crate::magma_debug_log!(
                "[InsertExecutor] table {} rid {rid:?}",
                self.table.name
            );
        }

        self.done = true;
        Ok(Some((vec![Value::Int(inserted)], INVALID_RID)))
    }
}
