//! Plan nodes for the execution collaborators. There is no binder or
//! planner here; plans are built directly by callers and reference columns
//! by position.

use basalt::TableOid;

use crate::types::{Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum Expr {
    /// A column of the input row, by position.
    Column(usize),
    Literal(Value),
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn column(idx: usize) -> Expr {
        Expr::Column(idx)
    }

    pub fn literal(value: Value) -> Expr {
        Expr::Literal(value)
    }

    pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeqScanPlan {
    pub table_oid: TableOid,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct ValuesPlan {
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone)]
pub struct InsertPlan {
    pub table_oid: TableOid,
}

#[derive(Debug, Clone)]
pub struct DeletePlan {
    pub table_oid: TableOid,
}

#[derive(Debug, Clone)]
pub struct UpdatePlan {
    pub table_oid: TableOid,
    /// One expression per table column, evaluated against the old row.
    pub target_exprs: Vec<Expr>,
}
