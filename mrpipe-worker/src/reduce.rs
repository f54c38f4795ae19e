use std::fs::File;
use std::io::{self, prelude::*, BufReader, BufWriter};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use bytesize::MB;
use ext_sort::{buffer::LimitedBufferBuilder, ExternalSorter, ExternalSorterBuilder};

use common::codec::decode_record;
use common::ReduceFn;

/// Lines held in memory by the sorter before it spills a chunk to disk.
const SORT_BUFFER: u64 = 100 * MB;

/// Sorts the records of `input` by key, calls `reduce_fn` once per key with
/// all of its values, and writes what it returns to `output` in key order.
///
/// Returns the number of distinct keys.
pub fn perform_reduce(
    reduce_fn: ReduceFn,
    input: &Path,
    output: &Path,
    aux: Bytes,
) -> Result<usize> {
    let file = File::open(input).with_context(|| format!("failed to open {}", input.display()))?;
    let reader = BufReader::new(file);

    // Spill files go next to the output so they share its filesystem.
    let tmp_dir = output
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let sorter: ExternalSorter<String, io::Error, LimitedBufferBuilder> =
        ExternalSorterBuilder::new()
            .with_tmp_dir(tmp_dir)
            .with_buffer(LimitedBufferBuilder::new(SORT_BUFFER as usize, false))
            .build()
            .map_err(|e| anyhow!("failed to set up sort: {e}"))?;
    let sorted = sorter
        .sort(reader.lines())
        .map_err(|e| anyhow!("failed to sort {}: {e}", input.display()))?;

    let out =
        File::create(output).with_context(|| format!("failed to create {}", output.display()))?;
    let mut writer = BufWriter::new(out);

    // Sorting whole lines keeps the records of each key together, since
    // keys never contain the separator.
    let mut group: Option<(Bytes, Vec<Bytes>)> = None;
    let mut keys = 0;
    for line in sorted {
        let line = line.map_err(|e| anyhow!("failed to sort {}: {e}", input.display()))?;
        let record = decode_record(line.as_bytes())
            .with_context(|| format!("bad record in {}", input.display()))?;

        let same_key = matches!(&group, Some((key, _)) if *key == record.key);
        if same_key {
            if let Some((_, values)) = group.as_mut() {
                values.push(record.value);
            }
        } else if let Some((key, values)) = group.replace((record.key, vec![record.value])) {
            emit(reduce_fn, key, values, &aux, &mut writer)?;
            keys += 1;
        }
    }
    if let Some((key, values)) = group.take() {
        emit(reduce_fn, key, values, &aux, &mut writer)?;
        keys += 1;
    }

    writer
        .flush()
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok(keys)
}

fn emit<W: Write>(
    reduce_fn: ReduceFn,
    key: Bytes,
    values: Vec<Bytes>,
    aux: &Bytes,
    writer: &mut W,
) -> Result<()> {
    let out = reduce_fn(key, Box::new(values.into_iter()), aux.clone())?;
    writer.write_all(&out)?;
    Ok(())
}
