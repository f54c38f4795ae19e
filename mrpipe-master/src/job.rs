use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;
use crate::worker::WorkerCommand;

/// Everything needed to run one job. Fixed once built.
#[derive(Debug, Clone)]
pub struct JobConfig {
    workers: usize,
    worker: WorkerCommand,
    input: PathBuf,
    output: PathBuf,
    task_timeout: Option<Duration>,
    workdir: Option<PathBuf>,
}

impl JobConfig {
    pub fn new(
        program: impl Into<PathBuf>,
        workers: usize,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        if workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        Ok(Self {
            workers,
            worker: WorkerCommand::new(program),
            input: input.into(),
            output: output.into(),
            task_timeout: None,
            workdir: None,
        })
    }

    /// Arguments passed to every worker process.
    pub fn with_worker_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.worker = self.worker.args(args);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Keep intermediate files in `dir` instead of a temporary directory
    /// that is removed when the job ends.
    pub fn with_workdir(mut self, dir: Option<PathBuf>) -> Self {
        self.workdir = dir;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn worker(&self) -> &WorkerCommand {
        &self.worker
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }
}

/// The intermediate files of a job. File `i` of every kind belongs to
/// worker `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLayout {
    pub map_inputs: Vec<PathBuf>,
    pub map_outputs: Vec<PathBuf>,
    pub reduce_inputs: Vec<PathBuf>,
    pub reduce_outputs: Vec<PathBuf>,
}

impl JobLayout {
    pub fn new(dir: &Path, workers: usize) -> Self {
        let files = |stage: &str| -> Vec<PathBuf> {
            (0..workers)
                .map(|i| dir.join(format!("{stage}-{i}")))
                .collect()
        };

        Self {
            map_inputs: files("map-input"),
            map_outputs: files("map-output"),
            reduce_inputs: files("reduce-input"),
            reduce_outputs: files("reduce-output"),
        }
    }
}

/// Progress of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Sharding,
    Mapping,
    Shuffling,
    Reducing,
    Combining,
    Completed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Pending => "pending",
            JobState::Sharding => "sharding",
            JobState::Mapping => "mapping",
            JobState::Shuffling => "shuffling",
            JobState::Reducing => "reducing",
            JobState::Combining => "combining",
            JobState::Completed => "completed",
        };
        f.write_str(name)
    }
}
