use std::io::{self, BufRead};

use anyhow::Result;
use bytes::Bytes;

pub fn string_from_bytes(bytes: Bytes) -> Result<String> {
    Ok(String::from_utf8(bytes.into())?)
}

/// Reads the next line into `buf` without its `\n` terminator.
///
/// Returns `false` at end of input. A final line with no terminator is
/// still returned.
pub fn next_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<bool> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Ok(false);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    Ok(true)
}
