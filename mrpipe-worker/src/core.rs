//! The worker side of the control protocol.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use common::protocol::{Command, Status, TaskKind};
use common::Workload;

use crate::{map, reduce};

/// Diagnostic line written periodically so the master can see the worker
/// is alive.
pub const HEARTBEAT: &str = "heartbeat";

/// Runs map and reduce tasks for one workload.
#[derive(Clone)]
pub struct TaskRunner {
    workload: Workload,
    aux: Bytes,
}

impl TaskRunner {
    pub fn new(workload: Workload, aux: Bytes) -> Self {
        Self { workload, aux }
    }

    /// Runs one task to completion. Blocks on file I/O.
    pub fn run(&self, kind: TaskKind, input: &Path, output: &Path) -> anyhow::Result<()> {
        match kind {
            TaskKind::Map => {
                let map_fn = self.workload.map_fn;
                let records = map::perform_map(map_fn, input, output, self.aux.clone())?;
                info!(input = %input.display(), records, "map finished");
            }
            TaskKind::Reduce => {
                let reduce_fn = self.workload.reduce_fn;
                let keys = reduce::perform_reduce(reduce_fn, input, output, self.aux.clone())?;
                info!(input = %input.display(), keys, "reduce finished");
            }
        }
        Ok(())
    }
}

/// Writes `line` and a newline to `out` as one unit.
pub async fn write_line<W>(out: &Mutex<W>, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut out = out.lock().await;
    out.write_all(format!("{line}\n").as_bytes()).await?;
    out.flush().await
}

/// Answers commands read from `input` until `done` or end of input.
///
/// Every task gets exactly one status line. A failed task or an unknown
/// command is answered with an error and the worker keeps serving.
pub async fn serve<R, W>(runner: TaskRunner, input: R, out: Arc<Mutex<W>>) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let status = match Command::parse(&line) {
            Ok(Command::Done) => {
                info!("received done, exiting");
                return Ok(());
            }
            Ok(Command::Task {
                kind,
                input,
                output,
            }) => {
                debug!(
                    task = %kind,
                    input = %input.display(),
                    output = %output.display(),
                    "received task"
                );
                let started = Instant::now();
                let task = runner.clone();
                match tokio::task::spawn_blocking(move || task.run(kind, &input, &output)).await {
                    Ok(Ok(())) => {
                        debug!(task = %kind, elapsed = ?started.elapsed(), "task succeeded");
                        Status::Ok
                    }
                    Ok(Err(e)) => {
                        warn!(task = %kind, "task failed: {e:#}");
                        Status::error(format!("{e:#}"))
                    }
                    Err(e) => {
                        warn!(task = %kind, "task panicked: {e}");
                        Status::error(format!("{kind} task panicked: {e}"))
                    }
                }
            }
            Err(e) => {
                warn!("rejected command: {e}");
                Status::error(e)
            }
        };

        write_line(&out, &status.to_string()).await?;
    }

    info!("end of input, exiting");
    Ok(())
}

/// Writes a heartbeat line every `period` until `out` fails.
pub async fn heartbeat<W>(out: Arc<Mutex<W>>, period: Duration)
where
    W: AsyncWrite + Unpin,
{
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = write_line(&out, HEARTBEAT).await {
            debug!("heartbeat stopped: {e}");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn wc_runner() -> TaskRunner {
        TaskRunner::new(workload::try_named("wc").unwrap(), Bytes::new())
    }

    async fn run_session(script: String) -> Vec<String> {
        let out = Arc::new(Mutex::new(Vec::new()));
        serve(wc_runner(), script.as_bytes(), out.clone())
            .await
            .unwrap();
        let written = out.lock().await.clone();
        String::from_utf8(written)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[tokio::test]
    async fn answers_every_task_once() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("map-input-0");
        let mapped = dir.path().join("map-output-0");
        let reduced = dir.path().join("reduce-output-0");
        fs::write(&input, "b a\nb\n").unwrap();

        let script = format!(
            "map {} {}\nreduce {} {}\ndone\nmap never run\n",
            input.display(),
            mapped.display(),
            mapped.display(),
            reduced.display()
        );
        assert_eq!(run_session(script).await, ["ok", "ok"]);
        assert_eq!(fs::read_to_string(&reduced).unwrap(), "a 1\nb 2\n");
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("map-input-0");
        fs::write(&input, "x\n").unwrap();

        let script = format!(
            "bogus\nmap {missing} {out}\nmap {input} {out}\n",
            missing = dir.path().join("absent").display(),
            input = input.display(),
            out = dir.path().join("map-output-0").display(),
        );
        let replies = run_session(script).await;

        assert_eq!(replies.len(), 3);
        assert!(replies[0].starts_with("error: unrecognized command"));
        assert!(replies[1].starts_with("error: "));
        assert!(replies[1].contains("absent"));
        assert_eq!(replies[2], "ok");
    }

    #[tokio::test]
    async fn blank_lines_are_answered_with_an_error() {
        assert_eq!(run_session("\n   \n".into()).await, ["error: empty command"; 2]);
    }

    #[tokio::test]
    async fn end_of_input_ends_the_session() {
        assert!(run_session(String::new()).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_writes_periodically() {
        let out = Arc::new(Mutex::new(Vec::new()));
        let beat = tokio::spawn(heartbeat(out.clone(), Duration::from_secs(30)));

        tokio::time::sleep(Duration::from_secs(95)).await;
        beat.abort();

        let written = out.lock().await.clone();
        assert_eq!(String::from_utf8(written).unwrap(), "heartbeat\n".repeat(3));
    }
}
