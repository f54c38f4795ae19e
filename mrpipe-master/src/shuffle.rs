//! Repartitions map output by key hash so each reducer sees every
//! occurrence of the keys it owns.

use std::path::PathBuf;

use common::codec::split_record;
use common::utils::next_line;
use common::{ihash, partition_of, PartitionFn};
use tracing::debug;

use crate::error::ShuffleError;
use crate::files::{open_reader, OutputFiles};

#[derive(Clone, Copy)]
pub struct ShuffleEngine {
    hash: PartitionFn,
}

impl Default for ShuffleEngine {
    fn default() -> Self {
        Self::new(ihash)
    }
}

impl ShuffleEngine {
    pub fn new(hash: PartitionFn) -> Self {
        Self { hash }
    }

    /// The destination index of `key` among `partitions` files.
    pub fn partition(&self, key: &[u8], partitions: usize) -> usize {
        partition_of(self.hash, key, partitions)
    }

    /// Appends every record of `inputs` (in file order, then line order) to
    /// the output chosen by its key. All outputs are created before the
    /// first input is read. A malformed record aborts the shuffle.
    ///
    /// Returns the number of records written to each output.
    pub fn shuffle(
        &self,
        inputs: &[PathBuf],
        outputs: &[PathBuf],
    ) -> Result<Vec<usize>, ShuffleError> {
        let mut destinations = OutputFiles::create(outputs)?;
        let partitions = destinations.len();
        let mut counts = vec![0usize; partitions];

        let mut line = Vec::new();
        for path in inputs {
            let mut reader = open_reader(path)?;
            let mut line_no = 0;
            while next_line(&mut reader, &mut line)? {
                line_no += 1;
                let (key, _) = split_record(&line).map_err(|source| ShuffleError::Malformed {
                    path: path.clone(),
                    line: line_no,
                    source,
                })?;

                let target = self.partition(key, partitions);
                destinations.write_line(target, &line)?;
                counts[target] += 1;
            }
        }
        destinations.finish()?;

        debug!(?counts, "shuffled map output");
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::fs;
    use std::path::Path;

    use super::*;

    fn paths(dir: &Path, stage: &str, n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| dir.join(format!("{stage}-{i}"))).collect()
    }

    fn keys_of(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| line.split(' ').next().unwrap().to_owned())
            .collect()
    }

    #[test]
    fn every_key_lands_in_its_hash_partition() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = paths(dir.path(), "map-output", 3);
        fs::write(&inputs[0], "apple 1\nbanana 2\ncherry 1\n").unwrap();
        fs::write(&inputs[1], "banana 1\ndate 4\n").unwrap();
        fs::write(&inputs[2], "apple 3\nelder 1\nfig 1\ngrape 2\n").unwrap();
        let outputs = paths(dir.path(), "reduce-input", 3);

        let engine = ShuffleEngine::default();
        let counts = engine.shuffle(&inputs, &outputs).unwrap();
        assert_eq!(counts.iter().sum::<usize>(), 9);

        let mut home: HashMap<String, usize> = HashMap::new();
        for (index, output) in outputs.iter().enumerate() {
            let keys = keys_of(output);
            assert_eq!(keys.len(), counts[index]);
            for key in keys {
                assert_eq!(engine.partition(key.as_bytes(), 3), index);
                let previous = home.insert(key.clone(), index);
                assert!(previous.is_none() || previous == Some(index), "{key} split");
            }
        }
        assert_eq!(home.len(), 7);
    }

    #[test]
    fn records_are_copied_verbatim_in_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = paths(dir.path(), "map-output", 2);
        fs::write(&inputs[0], "k 1\nk 2\n").unwrap();
        fs::write(&inputs[1], "k 3").unwrap();
        let outputs = paths(dir.path(), "reduce-input", 1);

        ShuffleEngine::default().shuffle(&inputs, &outputs).unwrap();
        assert_eq!(fs::read_to_string(&outputs[0]).unwrap(), "k 1\nk 2\nk 3\n");
    }

    #[test]
    fn hash_function_is_pluggable() {
        fn everything_to_one(_: &[u8]) -> u32 {
            1
        }

        let dir = tempfile::tempdir().unwrap();
        let inputs = paths(dir.path(), "map-output", 1);
        fs::write(&inputs[0], "x 1\ny 1\nz 1\n").unwrap();
        let outputs = paths(dir.path(), "reduce-input", 3);

        let counts = ShuffleEngine::new(everything_to_one)
            .shuffle(&inputs, &outputs)
            .unwrap();
        assert_eq!(counts, [0, 3, 0]);
        assert!(outputs.iter().all(|p| p.exists()));
    }

    #[test]
    fn malformed_record_aborts_with_location() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = paths(dir.path(), "map-output", 2);
        fs::write(&inputs[0], "a 1\n").unwrap();
        fs::write(&inputs[1], "b 1\nnot a record\n").unwrap();
        let outputs = paths(dir.path(), "reduce-input", 2);

        let err = ShuffleEngine::default()
            .shuffle(&inputs, &outputs)
            .unwrap_err();
        match err {
            ShuffleError::Malformed { path, line, .. } => {
                assert_eq!(path, inputs[1]);
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn shuffle_is_stable_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = paths(dir.path(), "map-output", 2);
        fs::write(&inputs[0], "one 1\ntwo 1\nthree 1\n").unwrap();
        fs::write(&inputs[1], "four 1\nfive 1\nsix 1\n").unwrap();
        let first = paths(dir.path(), "first", 2);
        let second = paths(dir.path(), "second", 2);

        let engine = ShuffleEngine::default();
        engine.shuffle(&inputs, &first).unwrap();
        engine.shuffle(&inputs, &second).unwrap();

        for (a, b) in first.iter().zip(&second) {
            let a: HashSet<String> = keys_of(a).into_iter().collect();
            let b: HashSet<String> = keys_of(b).into_iter().collect();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn missing_map_output_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = paths(dir.path(), "map-output", 1);
        let outputs = paths(dir.path(), "reduce-input", 1);

        let err = ShuffleEngine::default()
            .shuffle(&inputs, &outputs)
            .unwrap_err();
        assert!(matches!(err, ShuffleError::Io(_)));
    }
}
