//! MVCC helpers shared by the executors: snapshot reconstruction,
//! write-write conflict detection, and undo-log construction.

use std::sync::Arc;

use basalt::transaction::{Transaction, TransactionManager, UndoLink, UndoLog};
use basalt::{Rid, TableHeap, Timestamp, TupleMeta};

use crate::errors::ExecutionError;
use crate::tuple::{parse_row, partial_schema, project_row, serialize_row};
use crate::types::{Row, Schema};

use super::ExecuteCtx;

/// A writer conflicts when the tuple carries a timestamp newer than its
/// snapshot that is not its own temporary timestamp.
pub fn is_write_write_conflict(meta: &TupleMeta, txn: &Transaction) -> bool {
    meta.ts > txn.read_ts() && meta.ts != txn.temp_ts()
}

/// Taints the transaction and fails when any rid carries a conflicting
/// version.
pub(super) fn check_write_write_conflict(
    ctx: &ExecuteCtx<'_>,
    heap: &Arc<TableHeap>,
    rids: &[Rid],
) -> Result<(), ExecutionError> {
    for rid in rids {
        let meta = heap.get_tuple_meta(*rid)?;
        if is_write_write_conflict(&meta, ctx.txn) {
            ctx.txn.set_tainted();
            return Err(ExecutionError::WriteConflict);
        }
    }
    Ok(())
}

/// Fails the operator when its transaction was tainted or aborted between
/// tuples.
pub(super) fn check_txn_still_running(ctx: &ExecuteCtx<'_>) -> Result<(), ExecutionError> {
    use basalt::transaction::TransactionState;
    match ctx.txn.state() {
        TransactionState::Running => Ok(()),
        TransactionState::Tainted => Err(ExecutionError::WriteConflict),
        state => Err(ExecutionError::TxnStateViolation(format!(
            "operator invoked on a {state:?} transaction"
        ))),
    }
}

/// Walks a rid's undo chain, collecting logs until one at or below
/// `read_ts` is included. `None` when the chain offers no version visible
/// at that snapshot.
pub fn collect_undo_logs(
    txn_mgr: &TransactionManager,
    rid: Rid,
    read_ts: Timestamp,
) -> Option<Vec<UndoLog>> {
    let mut logs = Vec::new();
    let mut link = txn_mgr.get_undo_link(rid);
    while let Some(current) = link {
        let log = txn_mgr.get_undo_log(current)?;
        let visible = log.ts <= read_ts;
        link = log.prev_version;
        logs.push(log);
        if visible {
            return Some(logs);
        }
    }
    None
}

/// Replays undo logs newest-to-oldest over the base tuple. `None` when the
/// resulting version is a deletion.
pub fn reconstruct_tuple(
    schema: &Schema,
    base_tuple: &[u8],
    base_meta: &TupleMeta,
    undo_logs: &[UndoLog],
) -> Result<Option<Row>, ExecutionError> {
    let mut is_deleted = base_meta.is_deleted;
    let mut row = parse_row(base_tuple, schema)?;

    for log in undo_logs {
        is_deleted = log.is_deleted;
        if log.is_deleted {
            continue;
        }
        let partial = partial_schema(schema, &log.modified_fields);
        let partial_row = parse_row(&log.tuple, &partial)?;
        let mut partial_idx = 0;
        for (column_idx, modified) in log.modified_fields.iter().enumerate() {
            if *modified {
                row[column_idx] = partial_row[partial_idx].clone();
                partial_idx += 1;
            }
        }
    }

    Ok((!is_deleted).then_some(row))
}

/// Builds an undo log holding the old values of every field that differs
/// between the old and new row.
pub(super) fn generate_diff_log(
    old_row: &Row,
    new_row: &Row,
    schema: &Schema,
    ts: Timestamp,
    prev_version: Option<UndoLink>,
) -> Result<UndoLog, ExecutionError> {
    let modified_fields: Vec<bool> = old_row
        .iter()
        .zip(new_row)
        .map(|(old, new)| old != new)
        .collect();
    let partial = partial_schema(schema, &modified_fields);
    let tuple = serialize_row(&project_row(old_row, &modified_fields), &partial)?;
    Ok(UndoLog {
        is_deleted: false,
        modified_fields,
        tuple,
        ts,
        prev_version,
    })
}

/// Builds an undo log snapshotting the full pre-image of a row.
pub(super) fn generate_full_log(
    row: &Row,
    schema: &Schema,
    is_deleted: bool,
    ts: Timestamp,
    prev_version: Option<UndoLink>,
) -> Result<UndoLog, ExecutionError> {
    Ok(UndoLog {
        is_deleted,
        modified_fields: vec![true; schema.len()],
        tuple: serialize_row(row, schema)?,
        ts,
        prev_version,
    })
}

/// Appends `log` to the transaction and links it in as the rid's chain
/// head. The swap is compare-and-set against the head observed when the
/// log was built; losing the race is a write-write conflict.
pub(super) fn append_and_link_undo_log(
    ctx: &ExecuteCtx<'_>,
    rid: Rid,
    log: UndoLog,
) -> Result<(), ExecutionError> {
    let expected_head = log.prev_version;
    let link = ctx.txn.append_undo_log(log);
    let swapped = ctx.txn_mgr.update_version_link(
        rid,
        Some(link),
        Some(&|head: Option<&UndoLink>| head.copied() == expected_head),
    );
    if !swapped {
        ctx.txn.set_tainted();
        return Err(ExecutionError::WriteConflict);
    }
    Ok(())
}

/// The rid's chain head, provided this transaction owns it.
pub(super) fn own_undo_link(ctx: &ExecuteCtx<'_>, rid: Rid) -> Option<UndoLink> {
    let link = ctx.txn_mgr.get_undo_link(rid)?;
    (link.txn_id == ctx.txn.txn_id()).then_some(link)
}

/// Widens one of this transaction's own diff logs into a full pre-image
/// log. Fields the log already captures keep their pre-image values; the
/// rest are taken from `current_row`, which still holds their committed
/// values.
pub(super) fn merge_to_full_log(
    old_log: &UndoLog,
    current_row: &Row,
    schema: &Schema,
) -> Result<UndoLog, ExecutionError> {
    let old_partial = partial_schema(schema, &old_log.modified_fields);
    let old_values = parse_row(&old_log.tuple, &old_partial)?;

    let mut original = Vec::with_capacity(schema.len());
    let mut old_idx = 0;
    for (column_idx, value) in current_row.iter().enumerate() {
        if old_log.modified_fields[column_idx] {
            original.push(old_values[old_idx].clone());
            old_idx += 1;
        } else {
            original.push(value.clone());
        }
    }

    Ok(UndoLog {
        is_deleted: old_log.is_deleted,
        modified_fields: vec![true; schema.len()],
        tuple: serialize_row(&original, schema)?,
        ts: old_log.ts,
        prev_version: old_log.prev_version,
    })
}

/// Merges additional modified fields into one of this transaction's own
/// diff logs. Fields already captured keep their original pre-image
/// values; newly modified fields take their value from `old_row`, the row
/// as of this transaction's previous write.
pub(super) fn merge_diff_into_log(
    old_log: &UndoLog,
    old_row: &Row,
    newly_modified: &[bool],
    schema: &Schema,
) -> Result<UndoLog, ExecutionError> {
    let old_partial = partial_schema(schema, &old_log.modified_fields);
    let old_values = parse_row(&old_log.tuple, &old_partial)?;

    let mut merged_fields = Vec::with_capacity(schema.len());
    let mut merged_values = Vec::new();
    let mut old_idx = 0;
    for column_idx in 0..schema.len() {
        let previously = old_log.modified_fields[column_idx];
        let newly = newly_modified[column_idx];
        merged_fields.push(previously || newly);
        if previously {
            merged_values.push(old_values[old_idx].clone());
            old_idx += 1;
        } else if newly {
            merged_values.push(old_row[column_idx].clone());
        }
    }

    let merged_partial = partial_schema(schema, &merged_fields);
    Ok(UndoLog {
        is_deleted: old_log.is_deleted,
        modified_fields: merged_fields,
        tuple: serialize_row(&merged_values, &merged_partial)?,
        ts: old_log.ts,
        prev_version: old_log.prev_version,
    })
}
