//! Text form of intermediate records.
//!
//! Map output, reduce input and reduce output hold one record per line,
//! written as `<key> <value>\n`. Neither field may contain a space or a
//! newline, so every line splits into exactly two fields.

use std::io::{self, Write};

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::KeyValue;

const SEPARATOR: u8 = b' ';
const TERMINATOR: u8 = b'\n';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("malformed record {line:?}: expected exactly `<key> <value>`")]
    Malformed { line: String },

    #[error("key {0:?} cannot be written as a record")]
    InvalidKey(String),

    #[error("value {0:?} cannot be written as a record")]
    InvalidValue(String),
}

/// Splits a record line (without its terminator) into key and value.
pub fn split_record(line: &[u8]) -> Result<(&[u8], &[u8]), RecordError> {
    let mut fields = line.split(|&b| b == SEPARATOR);
    match (fields.next(), fields.next(), fields.next()) {
        (Some(key), Some(value), None) if !key.is_empty() && !value.contains(&TERMINATOR) => {
            Ok((key, value))
        }
        _ => Err(RecordError::Malformed {
            line: String::from_utf8_lossy(line).into_owned(),
        }),
    }
}

/// Parses a record line into an owned pair.
pub fn decode_record(line: &[u8]) -> Result<KeyValue, RecordError> {
    let (key, value) = split_record(line)?;
    Ok(KeyValue::new(
        Bytes::copy_from_slice(key),
        Bytes::copy_from_slice(value),
    ))
}

/// Appends `kv` to `buf` as a terminated record line.
pub fn encode_record(kv: &KeyValue, buf: &mut BytesMut) -> Result<(), RecordError> {
    if kv.key.is_empty() || kv.key.iter().any(|&b| b == SEPARATOR || b == TERMINATOR) {
        return Err(RecordError::InvalidKey(
            String::from_utf8_lossy(&kv.key).into_owned(),
        ));
    }
    if kv.value.iter().any(|&b| b == SEPARATOR || b == TERMINATOR) {
        return Err(RecordError::InvalidValue(
            String::from_utf8_lossy(&kv.value).into_owned(),
        ));
    }

    buf.reserve(kv.key.len() + kv.value.len() + 2);
    buf.put_slice(&kv.key);
    buf.put_u8(SEPARATOR);
    buf.put_slice(&kv.value);
    buf.put_u8(TERMINATOR);
    Ok(())
}

/// Writes an already validated record line, restoring its terminator.
pub fn write_line<W: Write>(writer: &mut W, line: &[u8]) -> io::Result<()> {
    writer.write_all(line)?;
    writer.write_all(&[TERMINATOR])
}
