use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};

use common::codec::encode_record;
use common::{KeyValue, MapFn};

/// Records are written out in chunks of roughly this many bytes.
const WRITE_CHUNK: usize = 64 * 1024;

/// Runs `map_fn` over the whole of `input` and writes the pairs it emits to
/// `output` as records. The map key is the input path.
///
/// Returns the number of records written.
pub fn perform_map(map_fn: MapFn, input: &Path, output: &Path, aux: Bytes) -> Result<usize> {
    let contents =
        fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let kv = KeyValue::new(
        Bytes::from(input.to_string_lossy().into_owned()),
        Bytes::from(contents),
    );

    let file =
        File::create(output).with_context(|| format!("failed to create {}", output.display()))?;
    let mut writer = BufWriter::new(file);

    let mut buf = BytesMut::with_capacity(WRITE_CHUNK);
    let mut records = 0;
    for pair in map_fn(kv, aux)? {
        encode_record(&pair?, &mut buf)?;
        records += 1;

        if buf.len() >= WRITE_CHUNK {
            writer.write_all(&buf)?;
            buf.clear();
        }
    }
    writer.write_all(&buf)?;
    writer
        .flush()
        .with_context(|| format!("failed to write {}", output.display()))?;

    Ok(records)
}
