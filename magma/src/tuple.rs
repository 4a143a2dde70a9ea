//! Row serialization against a schema: big-endian integers,
//! length-prefixed text, single-byte booleans, and dates as day numbers
//! from 2000-01-01. Nulls serialize as the type's zero value.

use bytes::{BufMut, BytesMut};
use chrono::{Duration, NaiveDate};

use crate::errors::ExecutionError;
use crate::types::{DataType, Row, Schema, Value};

fn date_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()
}

pub fn serialize_row(row: &[Value], schema: &Schema) -> Result<Vec<u8>, ExecutionError> {
    if row.len() != schema.len() {
        return Err(ExecutionError::GenericError(format!(
            "row has {} values but schema has {} columns",
            row.len(),
            schema.len()
        )));
    }

    let mut data = BytesMut::new();
    for (value, column) in row.iter().zip(schema.columns()) {
        match (column.data_type, value) {
            (DataType::Int, Value::Int(v)) => data.put_i32(*v),
            (DataType::Int, Value::Null) => data.put_i32(0),
            (DataType::Bigint, Value::Bigint(v)) => data.put_i64(*v),
            (DataType::Bigint, Value::Null) => data.put_i64(0),
            (DataType::Bool, Value::Bool(v)) => data.put_u8(*v as u8),
            (DataType::Bool, Value::Null) => data.put_u8(0),
            (DataType::Text, Value::Text(v)) => {
                data.put_u32(v.len() as u32);
                data.put_slice(v.as_bytes());
            }
            (DataType::Text, Value::Null) => data.put_u32(0),
            (DataType::Date, Value::Date(v)) => {
                let days = v.signed_duration_since(date_epoch()).num_days() as i32;
                data.put_i32(days);
            }
            (DataType::Date, Value::Null) => data.put_i32(0),
            (data_type, value) => {
                return Err(ExecutionError::GenericError(format!(
                    "cannot serialize {value:?} as {data_type:?} column {}",
                    column.name
                )));
            }
        }
    }
    Ok(data.to_vec())
}

fn take<'a>(bytes: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8], ExecutionError> {
    let slice = bytes
        .get(*offset..*offset + len)
        .ok_or_else(|| ExecutionError::Corruption("tuple shorter than schema".to_string()))?;
    *offset += len;
    Ok(slice)
}

pub fn parse_row(bytes: &[u8], schema: &Schema) -> Result<Row, ExecutionError> {
    let mut offset = 0;
    let mut row = Vec::with_capacity(schema.len());

    for column in schema.columns() {
        let value = match column.data_type {
            DataType::Int => {
                let raw = take(bytes, &mut offset, 4)?;
                Value::Int(i32::from_be_bytes(raw.try_into().unwrap()))
            }
            DataType::Bigint => {
                let raw = take(bytes, &mut offset, 8)?;
                Value::Bigint(i64::from_be_bytes(raw.try_into().unwrap()))
            }
            DataType::Bool => Value::Bool(take(bytes, &mut offset, 1)?[0] != 0),
            DataType::Text => {
                let len =
                    u32::from_be_bytes(take(bytes, &mut offset, 4)?.try_into().unwrap()) as usize;
                let raw = take(bytes, &mut offset, len)?;
                Value::Text(String::from_utf8_lossy(raw).into_owned())
            }
            DataType::Date => {
                let days = i32::from_be_bytes(take(bytes, &mut offset, 4)?.try_into().unwrap());
                Value::Date(date_epoch() + Duration::days(days as i64))
            }
        };
        row.push(value);
    }
    Ok(row)
}

/// Schema over only the fields marked in `modified`, preserving order.
/// Undo logs serialize their partial tuples against this projection.
pub fn partial_schema(schema: &Schema, modified: &[bool]) -> Schema {
    Schema::new(
        schema
            .columns()
            .iter()
            .zip(modified)
            .filter(|(_, m)| **m)
            .map(|(c, _)| c.clone())
            .collect(),
    )
}

/// Projects the marked fields of a row, matching [`partial_schema`].
pub fn project_row(row: &[Value], modified: &[bool]) -> Row {
    row.iter()
        .zip(modified)
        .filter(|(_, m)| **m)
        .map(|(v, _)| v.clone())
        .collect()
}
