use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Worker executable started once per worker.
    pub worker: PathBuf,

    /// Number of workers, shards and reduce partitions.
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    pub workers: u32,

    /// Input file; one map record per line.
    pub input: PathBuf,

    /// File the combined reducer output is written to.
    pub output: PathBuf,

    /// Seconds to wait for each task result. 0 waits forever.
    #[arg(short, long, default_value = "0")]
    pub task_timeout: u64,

    /// Keep intermediate files in this directory instead of a temporary one.
    #[arg(short = 'd', long)]
    pub workdir: Option<PathBuf>,

    /// Write a JSON summary of the job here.
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    /// Arguments passed to every worker process.
    #[clap(value_parser, last = true)]
    pub worker_args: Vec<String>,
}
