use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use common::codec::RecordError;
use common::protocol::ProtocolError;

use crate::worker::WorkerState;

/// Failures of a single worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to start worker {index} ({program}): {source}")]
    Spawn {
        index: usize,
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("worker {index}: {source}")]
    Protocol {
        index: usize,
        #[source]
        source: ProtocolError,
    },

    #[error("failed to send `{command}` to worker {index}: {source}")]
    Send {
        index: usize,
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("worker {index} reported error: {message}")]
    Reported { index: usize, message: String },

    #[error("worker {index} closed its output before reporting a result")]
    UnexpectedExit { index: usize },

    #[error("worker {index} did not report a result within {timeout:?}")]
    Timeout { index: usize, timeout: Duration },

    #[error("worker {index} exited with {status}")]
    ExitStatus { index: usize, status: ExitStatus },

    #[error("worker {index} is {state:?} and cannot {action}")]
    InvalidState {
        index: usize,
        state: WorkerState,
        action: &'static str,
    },

    #[error("worker {index}: {source}")]
    Io {
        index: usize,
        #[source]
        source: io::Error,
    },
}

impl WorkerError {
    /// Index of the worker the error belongs to.
    pub fn index(&self) -> usize {
        match self {
            WorkerError::Spawn { index, .. }
            | WorkerError::Protocol { index, .. }
            | WorkerError::Send { index, .. }
            | WorkerError::Reported { index, .. }
            | WorkerError::UnexpectedExit { index }
            | WorkerError::Timeout { index, .. }
            | WorkerError::ExitStatus { index, .. }
            | WorkerError::InvalidState { index, .. }
            | WorkerError::Io { index, .. } => *index,
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("a worker pool needs at least one worker")]
    Empty,

    #[error(
        "expected {expected} input and output files, \
         got {inputs} inputs and {outputs} outputs"
    )]
    LengthMismatch {
        expected: usize,
        inputs: usize,
        outputs: usize,
    },

    #[error("worker pool is {0} and cannot start a phase")]
    Unavailable(crate::pool::PoolState),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("{} worker(s) failed to shut down: {}", .0.len(), join_errors(.0))]
    Shutdown(Vec<WorkerError>),
}

fn join_errors(errors: &[WorkerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum ShuffleError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{}:{line}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        #[source]
        source: RecordError,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("a job needs at least one worker")]
    NoWorkers,
}

/// The step of a job a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Setup,
    Sharding,
    Startup,
    Map,
    Shuffle,
    Reduce,
    Combine,
    Shutdown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Setup => "setup",
            Phase::Sharding => "sharding",
            Phase::Startup => "worker startup",
            Phase::Map => "map",
            Phase::Shuffle => "shuffle",
            Phase::Reduce => "reduce",
            Phase::Combine => "combine",
            Phase::Shutdown => "worker shutdown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PhaseError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Shuffle(#[from] ShuffleError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A failed job, tagged with the phase that failed.
#[derive(Debug, Error)]
#[error("{phase} failed: {source}")]
pub struct JobError {
    pub phase: Phase,
    #[source]
    pub source: PhaseError,
}

impl JobError {
    pub fn new(phase: Phase, source: impl Into<PhaseError>) -> Self {
        Self {
            phase,
            source: source.into(),
        }
    }

    /// Shorthand for `map_err(JobError::at(phase))`.
    pub fn at<E: Into<PhaseError>>(phase: Phase) -> impl FnOnce(E) -> Self {
        move |source| Self::new(phase, source)
    }
}
