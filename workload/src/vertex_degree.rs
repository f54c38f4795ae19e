//! A MapReduce-compatible application that computes the
//! degree of each vertex in a graph, given a list of edges.

use anyhow::{anyhow, Result};
use bytes::{BufMut, Bytes, BytesMut};

use common::utils::string_from_bytes;
use common::{KeyValue, MapOutput};

fn parse_line(line: &str) -> Result<(u64, u64)> {
    let mut iter = line.split_whitespace().take(2);
    let a = iter
        .next()
        .ok_or_else(|| anyhow!("Invalid input file format"))?
        .parse()?;
    let b = iter
        .next()
        .ok_or_else(|| anyhow!("Invalid input file format"))?
        .parse()?;
    Ok((a, b))
}

pub fn map(kv: KeyValue, _aux: Bytes) -> MapOutput {
    let s = string_from_bytes(kv.value)?;
    let edges = s
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect::<Result<Vec<_>>>()?;

    let iter = edges.into_iter().flat_map(move |(a, b)| {
        [
            Ok(KeyValue {
                key: Bytes::from(a.to_string()),
                value: Bytes::from("1"),
            }),
            Ok(KeyValue {
                key: Bytes::from(b.to_string()),
                value: Bytes::from("1"),
            }),
        ]
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
        count += String::from_utf8(value.to_vec())?.parse::<u64>()?;
    }

    let mut value = BytesMut::with_capacity(24);
    let vertex_no = String::from_utf8(key.to_vec())?;
    value.put(format!("{} {}\n", &vertex_no, count).as_bytes());
    Ok(value.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_edge_counts_for_both_ends() {
        let kv = KeyValue::new(Bytes::from("edges"), Bytes::from("1 2\n2 3\n\n"));
        let keys: Vec<Bytes> = map(kv, Bytes::new())
            .unwrap()
            .map(|kv| kv.unwrap().into_key())
            .collect();
        assert_eq!(keys, ["1", "2", "2", "3"].map(Bytes::from));
    }

    #[test]
    fn rejects_non_numeric_vertices() {
        let kv = KeyValue::new(Bytes::from("edges"), Bytes::from("1 x\n"));
        assert!(map(kv, Bytes::new()).is_err());
    }

    #[test]
    fn reduce_reports_degree() {
        let values = vec![Bytes::from("1"), Bytes::from("1")];
        let out = reduce(Bytes::from("2"), Box::new(values.into_iter()), Bytes::new()).unwrap();
        assert_eq!(&out[..], b"2 2\n");
    }
}
