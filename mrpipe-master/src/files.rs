//! Scoped handling of the per-partition files a phase writes.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Adds the path and action to an I/O error so it can be reported on its own.
pub(crate) fn annotate(err: io::Error, action: &str, path: &Path) -> io::Error {
    io::Error::new(
        err.kind(),
        format!("failed to {action} {}: {err}", path.display()),
    )
}

pub(crate) fn open_reader(path: &Path) -> io::Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| annotate(e, "open", path))
}

/// One buffered writer per destination, all created before anything is
/// written. If any destination cannot be created, the ones already opened
/// are closed when the partial set is dropped.
pub(crate) struct OutputFiles {
    paths: Vec<PathBuf>,
    writers: Vec<BufWriter<File>>,
}

impl OutputFiles {
    pub fn create(paths: &[PathBuf]) -> io::Result<Self> {
        if paths.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "at least one destination file is required",
            ));
        }

        let writers = paths
            .iter()
            .map(|path| {
                File::create(path)
                    .map(BufWriter::new)
                    .map_err(|e| annotate(e, "create", path))
            })
            .collect::<io::Result<Vec<_>>>()?;

        Ok(Self {
            paths: paths.to_vec(),
            writers,
        })
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn write_line(&mut self, index: usize, line: &[u8]) -> io::Result<()> {
        common::codec::write_line(&mut self.writers[index], line)
            .map_err(|e| annotate(e, "write", &self.paths[index]))
    }

    /// Flushes every destination.
    pub fn finish(mut self) -> io::Result<()> {
        for (writer, path) in self.writers.iter_mut().zip(&self.paths) {
            writer.flush().map_err(|e| annotate(e, "flush", path))?;
        }
        Ok(())
    }
}
