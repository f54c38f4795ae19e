//! Splits the job input into one map-input file per worker.

use std::io;
use std::path::{Path, PathBuf};

use common::utils::next_line;
use tracing::debug;

use crate::files::{open_reader, OutputFiles};

/// Deals the lines of `input` across `shards` round-robin: line `k` goes to
/// shard `k % shards.len()`, and every line is written with a `\n`.
///
/// Every shard file is created, including those that receive no lines.
/// Returns the number of lines written to each shard.
pub fn shard_input(input: &Path, shards: &[PathBuf]) -> io::Result<Vec<usize>> {
    let mut reader = open_reader(input)?;
    let mut outputs = OutputFiles::create(shards)?;

    let mut counts = vec![0usize; outputs.len()];
    let mut line = Vec::new();
    let mut next = 0;
    while next_line(&mut reader, &mut line)? {
        outputs.write_line(next, &line)?;
        counts[next] += 1;
        next = (next + 1) % counts.len();
    }
    outputs.finish()?;

    debug!(input = %input.display(), ?counts, "sharded input");
    Ok(counts)
}
