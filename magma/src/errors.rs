use std::io;

#[derive(Debug)]
pub enum ExecutionError {
    IoFailure(io::Error),
    /// Buffer pool or index capacity exhausted.
    OutOfSpace,
    /// An MVCC writer observed a version newer than its snapshot.
    WriteConflict,
    TxnStateViolation(String),
    TableNotFound(String),
    ColumnNotFound(String),
    /// A storage invariant was violated; not recoverable here.
    Corruption(String),
    GenericError(String),
}

impl From<io::Error> for ExecutionError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::StorageFull => ExecutionError::OutOfSpace,
            io::ErrorKind::InvalidData => ExecutionError::Corruption(err.to_string()),
            _ => ExecutionError::IoFailure(err),
        }
    }
}
