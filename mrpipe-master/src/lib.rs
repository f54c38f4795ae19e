//! The master side of mrpipe.
//!
//! [`run_job`] drives a job end to end. The pieces it is built from are
//! usable on their own: [`shard_input`] splits the input, [`WorkerPool`]
//! runs a phase across all workers, [`ShuffleEngine`] repartitions map
//! output and [`combine_results`] joins the reducer outputs.

pub mod combine;
pub mod driver;
pub mod error;
mod files;
pub mod job;
pub mod pool;
pub mod shard;
pub mod shuffle;
pub mod worker;

pub use combine::{combine_into, combine_results};
pub use driver::{run_job, JobReport, StateTiming};
pub use error::{ConfigError, JobError, Phase, PhaseError, PoolError, ShuffleError, WorkerError};
pub use job::{JobConfig, JobLayout, JobState};
pub use pool::{PoolState, Shutdown, WorkerPool};
pub use shard::shard_input;
pub use shuffle::ShuffleEngine;
pub use worker::{ProcessWorker, Worker, WorkerCommand, WorkerState};
