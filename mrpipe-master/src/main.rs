mod args;

use std::fs;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use args::Args;
use mrpipe_master::{run_job, JobConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let task_timeout = (args.task_timeout > 0).then(|| Duration::from_secs(args.task_timeout));
    let config = JobConfig::new(args.worker, args.workers as usize, args.input, args.output)?
        .with_worker_args(args.worker_args)
        .with_task_timeout(task_timeout)
        .with_workdir(args.workdir);

    let report = run_job(&config).await?;

    if let Some(path) = args.report {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(&path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        info!("report written to {}", path.display());
    }

    Ok(())
}
