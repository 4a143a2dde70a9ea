use basalt::Rid;

use super::{Executor, INVALID_RID};
use crate::errors::ExecutionError;
use crate::plan::ValuesPlan;
use crate::types::{Row, Schema};

/// Emits literal rows; the usual child of an insert.
pub struct ValuesExecutor<'a> {
    plan: &'a ValuesPlan,
    schema: Schema,
    cursor: usize,
}

impl<'a> ValuesExecutor<'a> {
    pub fn new(schema: Schema, plan: &'a ValuesPlan) -> Self {
        Self {
            plan,
            schema,
            cursor: 0,
        }
    }
}

impl Executor for ValuesExecutor<'_> {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn init(&mut self) -> Result<(), ExecutionError> {
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Row, Rid)>, ExecutionError> {
        let Some(row) = self.plan.rows.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some((row.clone(), INVALID_RID)))
    }
}
