//! A fixed set of workers driven through phases in lockstep.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use common::protocol::TaskKind;
use tracing::{debug, error, info, warn};

use crate::error::{PoolError, WorkerError};
use crate::worker::{ProcessWorker, Worker, WorkerCommand};

/// Where the pool is between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// No phase running; workers are waiting for tasks.
    Idle,

    /// A phase was started and has not completed.
    PhaseInFlight(TaskKind),

    /// A phase failed. The pool can only be closed.
    Failed,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolState::Idle => f.write_str("idle"),
            PoolState::PhaseInFlight(kind) => write!(f, "running a {kind} phase"),
            PoolState::Failed => f.write_str("failed"),
        }
    }
}

/// How [`WorkerPool::close`] stops the workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// Send `done` and wait for every worker to exit.
    Graceful,

    /// Kill every worker; they may be mid-task or stuck.
    Kill,
}

impl PoolState {
    pub fn shutdown(&self) -> Shutdown {
        match self {
            PoolState::Idle => Shutdown::Graceful,
            PoolState::PhaseInFlight(_) | PoolState::Failed => Shutdown::Kill,
        }
    }
}

pub struct WorkerPool<W: Worker> {
    workers: Vec<W>,
    state: PoolState,
    task_timeout: Option<Duration>,
}

impl WorkerPool<ProcessWorker> {
    /// Starts `n` copies of `command`.
    pub async fn open(n: usize, command: &WorkerCommand) -> Result<Self, PoolError> {
        Self::open_with(n, |index| ProcessWorker::spawn(index, command)).await
    }
}

impl<W: Worker> WorkerPool<W> {
    /// Starts `n` workers with `start`. If worker `i` fails to start, the
    /// workers `0..i` are closed before the error is returned.
    pub async fn open_with<F>(n: usize, mut start: F) -> Result<Self, PoolError>
    where
        F: FnMut(usize) -> Result<W, WorkerError>,
    {
        if n == 0 {
            return Err(PoolError::Empty);
        }

        let mut workers = Vec::with_capacity(n);
        for index in 0..n {
            match start(index) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    error!("failed to start worker {index}: {err}");
                    let started = Self::from_workers(workers);
                    if let Err(close_err) = started.close().await {
                        warn!("cleanup after failed start: {close_err}");
                    }
                    return Err(err.into());
                }
            }
        }

        info!(workers = n, "worker pool started");
        Ok(Self::from_workers(workers))
    }

    /// Wraps workers that are already running. Worker `i` must report
    /// index `i`.
    pub fn from_workers(workers: Vec<W>) -> Self {
        Self {
            workers,
            state: PoolState::Idle,
            task_timeout: None,
        }
    }

    /// Bounds how long the pool waits for each task result. A worker that
    /// misses the deadline fails the phase.
    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    pub fn workers(&self) -> &[W] {
        &self.workers
    }

    /// Runs map task `i` on worker `i` and waits for all of them.
    pub async fn map(&mut self, inputs: &[PathBuf], outputs: &[PathBuf]) -> Result<(), PoolError> {
        self.run_phase(TaskKind::Map, inputs, outputs).await
    }

    /// Runs reduce task `i` on worker `i` and waits for all of them.
    pub async fn reduce(
        &mut self,
        inputs: &[PathBuf],
        outputs: &[PathBuf],
    ) -> Result<(), PoolError> {
        self.run_phase(TaskKind::Reduce, inputs, outputs).await
    }

    async fn run_phase(
        &mut self,
        kind: TaskKind,
        inputs: &[PathBuf],
        outputs: &[PathBuf],
    ) -> Result<(), PoolError> {
        let expected = self.workers.len();
        if inputs.len() != expected || outputs.len() != expected {
            return Err(PoolError::LengthMismatch {
                expected,
                inputs: inputs.len(),
                outputs: outputs.len(),
            });
        }
        if self.state != PoolState::Idle {
            return Err(PoolError::Unavailable(self.state));
        }

        self.state = PoolState::PhaseInFlight(kind);

        for ((worker, input), output) in self.workers.iter_mut().zip(inputs).zip(outputs) {
            if let Err(err) = worker.dispatch(kind, input, output).await {
                error!("{kind} phase aborted: {err}");
                self.state = PoolState::Failed;
                return Err(err.into());
            }
        }
        debug!(task = %kind, workers = expected, "dispatched phase");

        let timeout = self.task_timeout;
        for worker in self.workers.iter_mut() {
            if let Err(err) = await_with_deadline(worker, timeout).await {
                error!("{kind} phase aborted: {err}");
                self.state = PoolState::Failed;
                return Err(err.into());
            }
        }

        self.state = PoolState::Idle;
        info!(task = %kind, workers = expected, "phase complete");
        Ok(())
    }

    /// Stops every worker. Workers are asked to exit when the pool is idle
    /// and killed when a phase was interrupted. Every worker is attempted;
    /// the failures are returned together.
    pub async fn close(mut self) -> Result<(), PoolError> {
        match self.state.shutdown() {
            Shutdown::Kill => {
                warn!("pool is {}, killing {} worker(s)", self.state, self.workers.len());
                self.kill_all().await
            }
            Shutdown::Graceful => {
                let mut errors = Vec::new();
                for worker in self.workers.iter_mut() {
                    if let Err(err) = worker.terminate().await {
                        errors.push(err);
                    }
                }
                if errors.is_empty() {
                    debug!("worker pool closed");
                    return Ok(());
                }

                // Anything that refused to exit is killed.
                if let Err(PoolError::Shutdown(mut more)) = self.kill_all().await {
                    errors.append(&mut more);
                }
                Err(PoolError::Shutdown(errors))
            }
        }
    }

    async fn kill_all(&mut self) -> Result<(), PoolError> {
        let mut errors = Vec::new();
        for worker in self.workers.iter_mut() {
            if let Err(err) = worker.kill().await {
                errors.push(err);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PoolError::Shutdown(errors))
        }
    }
}

async fn await_with_deadline<W: Worker>(
    worker: &mut W,
    deadline: Option<Duration>,
) -> Result<(), WorkerError> {
    let Some(limit) = deadline else {
        return worker.await_result().await;
    };

    let index = worker.index();
    match tokio::time::timeout(limit, worker.await_result()).await {
        Ok(result) => result,
        Err(_) => Err(WorkerError::Timeout {
            index,
            timeout: limit,
        }),
    }
}
