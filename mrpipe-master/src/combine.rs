use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::files::annotate;

/// Copies each of `inputs`, in order, into `writer` byte for byte.
/// Returns the number of bytes written.
pub fn combine_results<W: Write>(inputs: &[PathBuf], writer: &mut W) -> io::Result<u64> {
    let mut total = 0;
    for path in inputs {
        let mut file = File::open(path).map_err(|e| annotate(e, "open", path))?;
        total += io::copy(&mut file, writer).map_err(|e| annotate(e, "copy", path))?;
    }
    writer.flush()?;
    Ok(total)
}

/// Creates (or truncates) `output` and fills it from `inputs`.
pub fn combine_into(inputs: &[PathBuf], output: &Path) -> io::Result<u64> {
    let file = File::create(output).map_err(|e| annotate(e, "create", output))?;
    let mut writer = BufWriter::new(file);
    combine_results(inputs, &mut writer)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn concatenates_in_index_order() {
        let dir = tempfile::tempdir().unwrap();
        let inputs: Vec<PathBuf> = (0..3)
            .map(|i| dir.path().join(format!("reduce-output-{i}")))
            .collect();
        fs::write(&inputs[0], "b 1\n").unwrap();
        fs::write(&inputs[1], "").unwrap();
        fs::write(&inputs[2], "a 2\nc 1").unwrap();

        let mut out = Vec::new();
        let written = combine_results(&inputs, &mut out).unwrap();

        let expected: Vec<u8> = inputs.iter().flat_map(|p| fs::read(p).unwrap()).collect();
        assert_eq!(out, expected);
        assert_eq!(written, expected.len() as u64);
    }

    #[test]
    fn writes_the_job_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reduce-output-0");
        fs::write(&input, "x 9\n").unwrap();
        let output = dir.path().join("result");
        fs::write(&output, "stale contents that are longer\n").unwrap();

        combine_into(&[input], &output).unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "x 9\n");
    }

    #[test]
    fn missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Vec::new();
        let err = combine_results(&[dir.path().join("absent")], &mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
