use std::cmp::Ordering;

use crate::errors::ExecutionError;
use crate::plan::{BinaryOperator, Expr};
use crate::types::Value;

pub fn evaluate(expr: &Expr, row: &[Value]) -> Result<Value, ExecutionError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Column(idx) => row
            .get(*idx)
            .cloned()
            .ok_or_else(|| ExecutionError::ColumnNotFound(format!("column #{idx}"))),
        Expr::Binary { op, left, right } => {
            let lval = evaluate(left, row)?;
            let rval = evaluate(right, row)?;
            evaluate_binary(*op, lval, rval)
        }
    }
}

/// Evaluates a filter predicate; a null result is treated as false.
pub fn evaluate_predicate(expr: &Expr, row: &[Value]) -> Result<bool, ExecutionError> {
    match evaluate(expr, row)? {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        other => Err(ExecutionError::GenericError(format!(
            "predicate evaluated to non-boolean {other:?}"
        ))),
    }
}

fn evaluate_binary(
    op: BinaryOperator,
    lval: Value,
    rval: Value,
) -> Result<Value, ExecutionError> {
    match op {
        BinaryOperator::And | BinaryOperator::Or => {
            let (Value::Bool(l), Value::Bool(r)) = (&lval, &rval) else {
                return Err(ExecutionError::GenericError(
                    "logical operator applied to non-boolean".to_string(),
                ));
            };
            Ok(Value::Bool(match op {
                BinaryOperator::And => *l && *r,
                _ => *l || *r,
            }))
        }
        BinaryOperator::Plus | BinaryOperator::Minus => {
            let (Some(l), Some(r)) = (lval.as_i64(), rval.as_i64()) else {
                return Err(ExecutionError::GenericError(
                    "arithmetic on non-integer values".to_string(),
                ));
            };
            let result = match op {
                BinaryOperator::Plus => l + r,
                _ => l - r,
            };
            // Stay in the narrower type when both sides were Int.
            if matches!((&lval, &rval), (Value::Int(_), Value::Int(_))) {
                Ok(Value::Int(result as i32))
            } else {
                Ok(Value::Bigint(result))
            }
        }
        _ => {
            let Some(ordering) = lval.compare(&rval) else {
                // Comparisons involving nulls are never true.
                return Ok(Value::Null);
            };
            let result = match op {
                BinaryOperator::Eq => ordering == Ordering::Equal,
                BinaryOperator::NotEq => ordering != Ordering::Equal,
                BinaryOperator::Lt => ordering == Ordering::Less,
                BinaryOperator::LtEq => ordering != Ordering::Greater,
                BinaryOperator::Gt => ordering == Ordering::Greater,
                BinaryOperator::GtEq => ordering != Ordering::Less,
                _ => unreachable!("arithmetic handled above"),
            };
            Ok(Value::Bool(result))
        }
    }
}
