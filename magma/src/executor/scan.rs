use std::sync::Arc;

use basalt::table_heap::TableIterator;
use basalt::Rid;

use super::common::{check_txn_still_running, collect_undo_logs, reconstruct_tuple};
use super::{ExecuteCtx, Executor};
use crate::catalog::TableInfo;
use crate::errors::ExecutionError;
use crate::eval::evaluate_predicate;
use crate::plan::SeqScanPlan;
use crate::tuple::parse_row;
use crate::types::{Row, Schema};

/// Sequential scan with snapshot-isolation visibility: the base version is
/// returned when it is at or below the transaction's read timestamp (or is
/// the transaction's own in-flight write); otherwise the tuple is
/// reconstructed from its undo chain.
pub struct SeqScanExecutor<'a> {
    ctx: ExecuteCtx<'a>,
    plan: &'a SeqScanPlan,
    table: Arc<TableInfo>,
    iter: Option<TableIterator>,
}

impl<'a> SeqScanExecutor<'a> {
    pub fn new(ctx: ExecuteCtx<'a>, plan: &'a SeqScanPlan) -> Result<Self, ExecutionError> {
        let table = ctx
            .catalog
            .table(plan.table_oid)
            .ok_or_else(|| ExecutionError::TableNotFound(format!("oid {}", plan.table_oid)))?;
        Ok(Self {
            ctx,
            plan,
            table,
            iter: None,
        })
    }
}

impl Executor for SeqScanExecutor<'_> {
    fn schema(&self) -> &Schema {
        &self.table.schema
    }

    fn init(&mut self) -> Result<(), ExecutionError> {
        self.iter = Some(self.table.heap.iter()?);
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Row, Rid)>, ExecutionError> {
        let iter = self
            .iter
            .as_mut()
            .ok_or_else(|| ExecutionError::GenericError("scan used before init".to_string()))?;

        while !iter.is_end() {
            check_txn_still_running(&self.ctx)?;

            let rid = iter.rid();
            let (meta, base_tuple) = iter.get_tuple()?;
            iter.advance()?;

            let row = {
                let txn = self.ctx.txn;
                if txn.read_ts() >= meta.ts || txn.temp_ts() == meta.ts {
                    if meta.is_deleted {
                        continue;
                    }
                    parse_row(&base_tuple, &self.table.schema)?
                } else {
                    let Some(undo_logs) =
                        collect_undo_logs(self.ctx.txn_mgr, rid, txn.read_ts())
                    else {
                        continue;
                    };
                    match reconstruct_tuple(&self.table.schema, &base_tuple, &meta, &undo_logs)? {
                        Some(row) => row,
                        None => continue,
                    }
                }
            };

            if let Some(filter) = &self.plan.filter {
                if !evaluate_predicate(filter, &row)? {
                    continue;
                }
            }
            return Ok(Some((row, rid)));
        }
        Ok(None)
    }
}
