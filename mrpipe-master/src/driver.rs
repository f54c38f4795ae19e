//! Runs a whole job: shard, map, shuffle, reduce, combine.

use std::fs;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::combine::combine_into;
use crate::error::{JobError, Phase, PhaseError};
use crate::job::{JobConfig, JobLayout, JobState};
use crate::pool::WorkerPool;
use crate::shard::shard_input;
use crate::shuffle::ShuffleEngine;
use crate::worker::ProcessWorker;

/// What a finished job did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobReport {
    pub workers: usize,
    pub input_lines: usize,
    pub shard_lines: Vec<usize>,
    pub shuffled_records: usize,
    pub partition_records: Vec<usize>,
    pub output_bytes: u64,
    pub timings: Vec<StateTiming>,
}

/// Wall-clock time spent in one job state.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StateTiming {
    pub state: JobState,
    pub elapsed_ms: u64,
}

struct Progress {
    state: JobState,
    entered: Instant,
    timings: Vec<StateTiming>,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: JobState::Pending,
            entered: Instant::now(),
            timings: Vec::new(),
        }
    }

    fn advance(&mut self, next: JobState) {
        let now = Instant::now();
        if self.state != JobState::Pending {
            let elapsed = now.duration_since(self.entered);
            self.timings.push(StateTiming {
                state: self.state,
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            });
        }
        info!("job {} -> {}", self.state, next);
        self.state = next;
        self.entered = now;
    }
}

/// Runs `f` on the blocking pool, tagging any failure with `phase`.
async fn blocking<T, E, F>(phase: Phase, f: F) -> Result<T, JobError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<PhaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| JobError::new(phase, e))?
        .map_err(|e| JobError::new(phase, e))
}

/// Runs `config` to completion and writes its output file.
///
/// Any worker failure aborts the job; the workers are killed and the error
/// names the phase that failed.
pub async fn run_job(config: &JobConfig) -> Result<JobReport, JobError> {
    let workers = config.workers();
    let started = Instant::now();
    let mut progress = Progress::new();

    // Held until the end of the job so the directory outlives the workers.
    let (_scratch, dir) = match config.workdir() {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(JobError::at(Phase::Setup))?;
            (None, dir.to_path_buf())
        }
        None => {
            let scratch = tempfile::Builder::new()
                .prefix("mapReduce")
                .tempdir()
                .map_err(JobError::at(Phase::Setup))?;
            let dir = scratch.path().to_path_buf();
            (Some(scratch), dir)
        }
    };
    info!(workers, workdir = %dir.display(), "starting job");

    let layout = JobLayout::new(&dir, workers);
    let mut report = JobReport {
        workers,
        ..JobReport::default()
    };

    progress.advance(JobState::Sharding);
    let input = config.input().to_path_buf();
    let shards = layout.map_inputs.clone();
    report.shard_lines = blocking(Phase::Sharding, move || shard_input(&input, &shards)).await?;
    report.input_lines = report.shard_lines.iter().sum();

    progress.advance(JobState::Mapping);
    let mut pool = WorkerPool::open(workers, config.worker())
        .await
        .map_err(JobError::at(Phase::Startup))?
        .with_task_timeout(config.task_timeout());

    let phases = run_phases(&mut pool, &layout, &mut progress).await;
    let closed = pool.close().await;
    report.partition_records = match (phases, closed) {
        (Ok(counts), Ok(())) => counts,
        (Ok(_), Err(err)) => return Err(JobError::new(Phase::Shutdown, err)),
        (Err(err), Ok(())) => return Err(err),
        (Err(err), Err(close_err)) => {
            warn!("failed to stop workers after {}: {close_err}", err.phase);
            return Err(err);
        }
    };
    report.shuffled_records = report.partition_records.iter().sum();

    progress.advance(JobState::Combining);
    let sources = layout.reduce_outputs.clone();
    let output = config.output().to_path_buf();
    report.output_bytes = blocking(Phase::Combine, move || combine_into(&sources, &output)).await?;

    progress.advance(JobState::Completed);
    report.timings = progress.timings;
    info!(
        output = %config.output().display(),
        bytes = report.output_bytes,
        elapsed = ?started.elapsed(),
        "job finished"
    );
    Ok(report)
}

/// Map, shuffle and reduce on a running pool. Returns the record count of
/// each reduce partition.
async fn run_phases(
    pool: &mut WorkerPool<ProcessWorker>,
    layout: &JobLayout,
    progress: &mut Progress,
) -> Result<Vec<usize>, JobError> {
    pool.map(&layout.map_inputs, &layout.map_outputs)
        .await
        .map_err(JobError::at(Phase::Map))?;

    progress.advance(JobState::Shuffling);
    let inputs = layout.map_outputs.clone();
    let outputs = layout.reduce_inputs.clone();
    let counts = blocking(Phase::Shuffle, move || {
        ShuffleEngine::default().shuffle(&inputs, &outputs)
    })
    .await?;

    progress.advance(JobState::Reducing);
    pool.reduce(&layout.reduce_inputs, &layout.reduce_outputs)
        .await
        .map_err(JobError::at(Phase::Reduce))?;

    Ok(counts)
}
