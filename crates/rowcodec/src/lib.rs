//! Schema-driven row codec: encodes a positional row (`Vec<Option<Value>>`)
//! against a [`Schema`] into a self-describing byte buffer, and back.
//!
//! The layout is exact (spec §4.4/§6), not a general-purpose
//! serialization format: a leading null bitmap, then fixed-width payloads
//! for scalar columns and u16-length-prefixed payloads for `Text`/`Bytes`,
//! in column order. Nothing here reflects on a `Value` at runtime — every
//! decision is driven by the column's declared `SqlType`.


use common::{ColumnId, DbError, DbResult};
use serde::{Deserialize, Serialize};
use types::{SqlType, Value};

/// Maximum length, in bytes, of an inline `Text`/`Bytes` cell (spec §3:
/// "length must fit in u16").
pub const MAX_VARLEN: usize = u16::MAX as usize;

/// A single column's declared shape: name, type, and whether `NULL` is a
/// legal value for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: SqlType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: SqlType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable,
        }
    }
}

/// Ordered column list for one table. Immutable for the life of the
/// table (spec §3): there is no `add_column`/`remove_column` here by
/// design.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<ColumnId> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .map(|i| i as ColumnId)
    }

    pub fn column(&self, ordinal: ColumnId) -> Option<&Column> {
        self.columns.get(ordinal as usize)
    }

    fn bitmap_len(&self) -> usize {
        self.len().div_ceil(8)
    }
}

fn bit_mask(bit_in_byte: usize) -> u8 {
    0x80 >> bit_in_byte
}

fn is_null_bit_set(bitmap: &[u8], col: usize) -> bool {
    let byte = col / 8;
    let bit = col % 8;
    bitmap[byte] & bit_mask(bit) != 0
}

fn set_null_bit(bitmap: &mut [u8], col: usize) {
    let byte = col / 8;
    let bit = col % 8;
    bitmap[byte] |= bit_mask(bit);
}

/// Encode `values` against `schema` into a fresh byte buffer.
///
/// `values.len()` must equal `schema.len()`. A `None` in a non-nullable
/// column, or a value whose `SqlType` does not match the declared column
/// type, fails; an inline `Text`/`Bytes` value over [`MAX_VARLEN`] bytes
/// fails with `VarTooLong`.
pub fn encode(schema: &Schema, values: &[Option<Value>]) -> DbResult<Vec<u8>> {
    if values.len() != schema.len() {
        return Err(DbError::SchemaMismatch {
            expected: schema.len(),
            got: values.len(),
        });
    }

    let mut bitmap = vec![0u8; schema.bitmap_len()];
    let mut cells = Vec::new();

    for (idx, (column, value)) in schema.columns().iter().zip(values.iter()).enumerate() {
        match value {
            None => {
                if !column.nullable {
                    return Err(DbError::SchemaMismatchNotAllowNull(column.name.clone()));
                }
                set_null_bit(&mut bitmap, idx);
            }
            Some(v) => {
                if v.sql_type() != column.ty {
                    return Err(DbError::SchemaMismatchNotInt(column.name.clone()));
                }
                encode_cell(&mut cells, v)?;
            }
        }
    }

    let mut out = Vec::with_capacity(bitmap.len() + cells.len());
    out.extend_from_slice(&bitmap);
    out.extend_from_slice(&cells);
    Ok(out)
}

fn encode_cell(out: &mut Vec<u8>, value: &Value) -> DbResult<()> {
    match value {
        Value::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Bool(v) => out.push(if *v { 1 } else { 0 }),
        Value::Float64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Text(s) => {
            let bytes = s.as_bytes();
            if bytes.len() > MAX_VARLEN {
                return Err(DbError::VarTooLong(bytes.len()));
            }
            out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            out.extend_from_slice(bytes);
        }
        Value::Bytes(b) => {
            if b.len() > MAX_VARLEN {
                return Err(DbError::VarTooLong(b.len()));
            }
            out.extend_from_slice(&(b.len() as u16).to_le_bytes());
            out.extend_from_slice(b);
        }
    }
    Ok(())
}

/// Decode a buffer previously produced by [`encode`] for the same
/// `schema`. Fails with `BadBuffer` on a short or malformed buffer.
pub fn decode(schema: &Schema, bytes: &[u8]) -> DbResult<Vec<Option<Value>>> {
    let bitmap_len = schema.bitmap_len();
    if bytes.len() < bitmap_len {
        return Err(DbError::BadBuffer("buffer shorter than null bitmap".into()));
    }
    let bitmap = &bytes[..bitmap_len];
    let mut cursor = bitmap_len;
    let mut out = Vec::with_capacity(schema.len());

    for (idx, column) in schema.columns().iter().enumerate() {
        if is_null_bit_set(bitmap, idx) {
            out.push(None);
            continue;
        }
        let value = decode_cell(column.ty, bytes, &mut cursor)?;
        out.push(Some(value));
    }
    Ok(out)
}

fn take<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> DbResult<&'a [u8]> {
    let end = cursor
        .checked_add(len)
        .ok_or_else(|| DbError::BadBuffer("length overflow".into()))?;
    if end > bytes.len() {
        return Err(DbError::BadBuffer(format!(
            "expected {len} more bytes at offset {cursor}, buffer has {}",
            bytes.len()
        )));
    }
    let slice = &bytes[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn decode_cell(ty: SqlType, bytes: &[u8], cursor: &mut usize) -> DbResult<Value> {
    match ty {
        SqlType::Int32 => {
            let raw = take(bytes, cursor, 4)?;
            Ok(Value::Int32(i32::from_le_bytes(raw.try_into().unwrap())))
        }
        SqlType::Int64 => {
            let raw = take(bytes, cursor, 8)?;
            Ok(Value::Int64(i64::from_le_bytes(raw.try_into().unwrap())))
        }
        SqlType::Bool => {
            let raw = take(bytes, cursor, 1)?;
            Ok(Value::Bool(raw[0] != 0))
        }
        SqlType::Float64 => {
            let raw = take(bytes, cursor, 8)?;
            Ok(Value::Float64(f64::from_le_bytes(raw.try_into().unwrap())))
        }
        SqlType::Text => {
            let len_bytes = take(bytes, cursor, 2)?;
            let len = u16::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
            let raw = take(bytes, cursor, len)?;
            let s = std::str::from_utf8(raw)
                .map_err(|_| DbError::BadBuffer("text cell is not valid utf-8".into()))?;
            Ok(Value::Text(s.to_string()))
        }
        SqlType::Bytes => {
            let len_bytes = take(bytes, cursor, 2)?;
            let len = u16::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
            let raw = take(bytes, cursor, len)?;
            Ok(Value::Bytes(raw.to_vec()))
        }
    }
}
