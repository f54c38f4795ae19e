use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use bytes::Bytes;
use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod args;
use args::Args;

mod core;
use crate::core::{heartbeat, serve, TaskRunner};

mod map;
mod reduce;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the control protocol, so logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();

    let args = Args::parse();

    let Some(workload) = workload::try_named(&args.workload) else {
        bail!(
            "the workload `{}` is not a known workload (known: {})",
            args.workload,
            workload::NAMES.join(", ")
        );
    };
    let runner = TaskRunner::new(workload, Bytes::from(args.args.join(" ")));

    let out = Arc::new(Mutex::new(tokio::io::stdout()));
    if args.heartbeat > 0 {
        tokio::spawn(heartbeat(out.clone(), Duration::from_secs(args.heartbeat)));
    }

    info!(workload = %args.workload, pid = std::process::id(), "worker ready");
    serve(runner, BufReader::new(tokio::io::stdin()), out).await
}
