//! Control protocol between the master and a worker process.
//!
//! The master writes one [`Command`] per line to the worker's standard input.
//! The worker answers every task with exactly one [`Status`] line on its
//! standard output; any other line it prints is a diagnostic.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const MAP: &str = "map";
pub const REDUCE: &str = "reduce";
pub const DONE: &str = "done";
pub const OK: &str = "ok";
pub const ERROR: &str = "error";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty command")]
    Empty,

    #[error("unrecognized command {0:?}")]
    UnknownCommand(String),

    #[error("`{command}` expects {expected} argument(s), got {got}")]
    WrongArity {
        command: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("path {0:?} cannot be sent over the control pipe")]
    UnsendablePath(PathBuf),
}

/// The kind of work a worker performs for one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Map,
    Reduce,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Map => MAP,
            TaskKind::Reduce => REDUCE,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command line sent from the master to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Task {
        kind: TaskKind,
        input: PathBuf,
        output: PathBuf,
    },
    Done,
}

impl Command {
    /// Builds a task command, refusing paths the line format cannot carry.
    pub fn task(
        kind: TaskKind,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<Self, ProtocolError> {
        Ok(Command::Task {
            kind,
            input: sendable(input.as_ref())?,
            output: sendable(output.as_ref())?,
        })
    }

    /// Parses one line received on the worker's standard input.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();

        let kind = match name {
            "" => return Err(ProtocolError::Empty),
            MAP => TaskKind::Map,
            REDUCE => TaskKind::Reduce,
            DONE if args.is_empty() => return Ok(Command::Done),
            DONE => {
                return Err(ProtocolError::WrongArity {
                    command: DONE,
                    expected: 0,
                    got: args.len(),
                })
            }
            _ => return Err(ProtocolError::UnknownCommand(line.to_owned())),
        };

        match args.as_slice() {
            [input, output] => Ok(Command::Task {
                kind,
                input: PathBuf::from(input),
                output: PathBuf::from(output),
            }),
            _ => Err(ProtocolError::WrongArity {
                command: kind.as_str(),
                expected: 2,
                got: args.len(),
            }),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Task {
                kind,
                input,
                output,
            } => write!(f, "{} {} {}", kind, input.display(), output.display()),
            Command::Done => f.write_str(DONE),
        }
    }
}

fn sendable(path: &Path) -> Result<PathBuf, ProtocolError> {
    match path.to_str() {
        Some(s) if !s.is_empty() && !s.chars().any(char::is_whitespace) => Ok(path.to_path_buf()),
        _ => Err(ProtocolError::UnsendablePath(path.to_path_buf())),
    }
}

/// A line received on the worker's standard output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// The last task succeeded.
    Ok,

    /// The last task failed with the given message.
    Error(String),

    /// Anything else the worker printed.
    Diagnostic(String),
}

impl Status {
    /// Classifies a status line by prefix.
    pub fn parse(line: &str) -> Self {
        if line.starts_with(OK) {
            Status::Ok
        } else if let Some(rest) = line.strip_prefix(ERROR) {
            let message = rest.strip_prefix(':').unwrap_or(rest);
            let message = message.strip_prefix(' ').unwrap_or(message);
            Status::Error(message.to_owned())
        } else {
            Status::Diagnostic(line.to_owned())
        }
    }

    /// Builds an error status whose message fits on one line.
    pub fn error(message: impl fmt::Display) -> Self {
        Status::Error(message.to_string().replace(['\r', '\n'], " "))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => f.write_str(OK),
            Status::Error(message) => write!(f, "{ERROR}: {message}"),
            Status::Diagnostic(line) => f.write_str(line),
        }
    }
}
