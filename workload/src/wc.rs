//! A MapReduce-compatible implementation of word count.
//!

use std::collections::BTreeMap;

use anyhow::Result;
use bytes::{BufMut, Bytes, BytesMut};

use common::utils::string_from_bytes;
use common::{KeyValue, MapOutput};

/// Counts the words of one shard. Counts are summed per shard before they
/// are emitted, so a word appears once per map output file.
pub fn map(kv: KeyValue, _aux: Bytes) -> MapOutput {
    let s = string_from_bytes(kv.value)?;

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for word in s.split_whitespace() {
        *counts.entry(word.to_owned()).or_default() += 1;
    }

    let iter = counts.into_iter().map(|(word, count)| {
        Ok(KeyValue {
            key: Bytes::from(word),
            value: Bytes::from(count.to_string()),
        })
    });
    Ok(Box::new(iter))
}

pub fn reduce(
    key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Bytes> {
    let mut count = 0u64;
    for value in values {
        count += string_from_bytes(value)?.parse::<u64>()?;
    }

    let mut writer = BytesMut::with_capacity(key.len() + 24);
    writer.put_slice(&key);
    writer.put(format!(" {}\n", count).as_bytes());
    Ok(writer.freeze())
}
