//! Handles to the processes that run map and reduce tasks.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio_stream::StreamExt;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, info, warn};

use common::protocol::{self, Status, TaskKind};

use crate::error::WorkerError;

/// Longest line kept from a worker. Anything past it is dropped.
pub const MAX_STATUS_LINE: usize = 64 * 1024;

/// One line of worker output, without its `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub bytes: Bytes,

    /// The line was longer than the limit and only its start was kept.
    pub truncated: bool,
}

/// Splits worker output into lines of raw bytes.
///
/// Worker output need not be UTF-8, and an over-long line is cut at the
/// limit rather than treated as an error.
#[derive(Debug)]
pub struct OutputLineCodec {
    max: usize,
    discarding: bool,
}

impl OutputLineCodec {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            discarding: false,
        }
    }
}

impl Decoder for OutputLineCodec {
    type Item = OutputLine;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<OutputLine>, io::Error> {
        loop {
            let newline = buf.iter().position(|&b| b == b'\n');
            if self.discarding {
                match newline {
                    Some(end) => {
                        buf.advance(end + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        buf.clear();
                        return Ok(None);
                    }
                }
            }

            return Ok(match newline {
                Some(end) if end <= self.max => {
                    let mut line = buf.split_to(end + 1);
                    line.truncate(end);
                    Some(OutputLine {
                        bytes: line.freeze(),
                        truncated: false,
                    })
                }
                _ if buf.len() > self.max => {
                    self.discarding = true;
                    Some(OutputLine {
                        bytes: buf.split_to(self.max).freeze(),
                        truncated: true,
                    })
                }
                _ => None,
            });
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<OutputLine>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() || self.discarding {
            buf.clear();
            return Ok(None);
        }
        // A final line with no terminator.
        Ok(Some(OutputLine {
            bytes: buf.split().freeze(),
            truncated: false,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Started, no task outstanding.
    Idle,

    /// A task was dispatched and its result has not been read yet.
    Running(TaskKind),

    /// The process is gone.
    Terminated,
}

/// Something that runs map and reduce tasks on named files, one at a time.
///
/// Dispatching only hands the task over; [`Worker::await_result`] is where
/// the caller waits for it to finish.
#[async_trait]
pub trait Worker: Send {
    /// Position of this worker in its pool.
    fn index(&self) -> usize;

    fn state(&self) -> WorkerState;

    async fn dispatch(
        &mut self,
        kind: TaskKind,
        input: &Path,
        output: &Path,
    ) -> Result<(), WorkerError>;

    async fn dispatch_map(&mut self, input: &Path, output: &Path) -> Result<(), WorkerError> {
        self.dispatch(TaskKind::Map, input, output).await
    }

    async fn dispatch_reduce(&mut self, input: &Path, output: &Path) -> Result<(), WorkerError> {
        self.dispatch(TaskKind::Reduce, input, output).await
    }

    /// Waits until the outstanding task reports success or failure.
    async fn await_result(&mut self) -> Result<(), WorkerError>;

    /// Asks the worker to exit and waits for it.
    async fn terminate(&mut self) -> Result<(), WorkerError>;

    /// Stops the worker without asking.
    async fn kill(&mut self) -> Result<(), WorkerError>;
}

/// How to start a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// A worker running as a child process, controlled over its stdin/stdout.
///
/// The child's stderr is inherited so its logs reach the terminal. The
/// process is killed if the handle is dropped while it is still running.
pub struct ProcessWorker {
    index: usize,
    state: WorkerState,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: FramedRead<ChildStdout, OutputLineCodec>,
}

impl ProcessWorker {
    pub fn spawn(index: usize, command: &WorkerCommand) -> Result<Self, WorkerError> {
        let spawn_error = |source| WorkerError::Spawn {
            index,
            program: command.program.display().to_string(),
            source,
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(spawn_error(std::io::Error::other("control pipes were not opened")));
        };

        debug!(worker = index, pid = ?child.id(), "worker started");
        Ok(Self {
            index,
            state: WorkerState::Idle,
            child,
            stdin: Some(stdin),
            stdout: FramedRead::new(stdout, OutputLineCodec::new(MAX_STATUS_LINE)),
        })
    }

    async fn send(&mut self, command: &protocol::Command) -> Result<(), WorkerError> {
        let index = self.index;
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(WorkerError::InvalidState {
                index,
                state: self.state,
                action: "receive commands",
            });
        };

        let line = format!("{command}\n");
        let sent = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        };
        sent.await.map_err(|source| WorkerError::Send {
            index,
            command: command.to_string(),
            source,
        })?;

        debug!(worker = index, %command, "sent command");
        Ok(())
    }

    /// Next line from the worker, or `None` once its stdout is closed.
    async fn next_line(&mut self) -> Result<Option<String>, WorkerError> {
        match self.stdout.next().await {
            None => Ok(None),
            Some(Ok(line)) => {
                let text = String::from_utf8_lossy(&line.bytes).into_owned();
                if line.truncated {
                    warn!(
                        worker = self.index,
                        "line longer than {MAX_STATUS_LINE} bytes, rest dropped"
                    );
                }
                Ok(Some(text))
            }
            Some(Err(source)) => Err(WorkerError::Io {
                index: self.index,
                source,
            }),
        }
    }
}

#[async_trait]
impl Worker for ProcessWorker {
    fn index(&self) -> usize {
        self.index
    }

    fn state(&self) -> WorkerState {
        self.state
    }

    async fn dispatch(
        &mut self,
        kind: TaskKind,
        input: &Path,
        output: &Path,
    ) -> Result<(), WorkerError> {
        if self.state != WorkerState::Idle {
            return Err(WorkerError::InvalidState {
                index: self.index,
                state: self.state,
                action: "accept a task",
            });
        }

        let command = protocol::Command::task(kind, input, output).map_err(|source| {
            WorkerError::Protocol {
                index: self.index,
                source,
            }
        })?;
        self.send(&command).await?;
        self.state = WorkerState::Running(kind);
        Ok(())
    }

    async fn await_result(&mut self) -> Result<(), WorkerError> {
        let WorkerState::Running(kind) = self.state else {
            return Err(WorkerError::InvalidState {
                index: self.index,
                state: self.state,
                action: "report a result",
            });
        };

        loop {
            let Some(line) = self.next_line().await? else {
                return Err(WorkerError::UnexpectedExit { index: self.index });
            };

            match Status::parse(&line) {
                Status::Ok => {
                    self.state = WorkerState::Idle;
                    debug!(worker = self.index, task = %kind, "task finished");
                    return Ok(());
                }
                Status::Error(message) => {
                    self.state = WorkerState::Idle;
                    return Err(WorkerError::Reported {
                        index: self.index,
                        message,
                    });
                }
                Status::Diagnostic(line) => info!(worker = self.index, "{line}"),
            }
        }
    }

    async fn terminate(&mut self) -> Result<(), WorkerError> {
        match self.state {
            WorkerState::Terminated => return Ok(()),
            WorkerState::Running(_) => {
                return Err(WorkerError::InvalidState {
                    index: self.index,
                    state: self.state,
                    action: "shut down gracefully",
                })
            }
            WorkerState::Idle => {}
        }

        self.send(&protocol::Command::Done).await?;
        // Closing stdin lets a worker that missed `done` see end of input.
        self.stdin = None;

        while let Some(line) = self.next_line().await? {
            debug!(worker = self.index, "{line}");
        }

        let status = self.child.wait().await.map_err(|source| WorkerError::Io {
            index: self.index,
            source,
        })?;
        self.state = WorkerState::Terminated;

        if status.success() {
            debug!(worker = self.index, "worker exited");
            Ok(())
        } else {
            Err(WorkerError::ExitStatus {
                index: self.index,
                status,
            })
        }
    }

    async fn kill(&mut self) -> Result<(), WorkerError> {
        if self.state == WorkerState::Terminated {
            return Ok(());
        }
        self.stdin = None;

        let index = self.index;
        let io_error = |source| WorkerError::Io { index, source };
        if self.child.try_wait().map_err(io_error)?.is_none() {
            self.child.kill().await.map_err(io_error)?;
            warn!(worker = index, "worker killed");
        }
        self.state = WorkerState::Terminated;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// A shell stand-in for the worker binary.
    fn shell_worker(index: usize, script: &str) -> ProcessWorker {
        let command = WorkerCommand::new("sh").args(["-c", script]);
        ProcessWorker::spawn(index, &command).unwrap()
    }

    const ECHO_OK: &str = r#"
        while read cmd input output; do
            case "$cmd" in
                map|reduce) echo "working on $input"; echo ok ;;
                done) exit 0 ;;
                *) echo "error: unknown command $cmd" ;;
            esac
        done
    "#;

    #[tokio::test]
    async fn runs_a_task_and_shuts_down() {
        let mut worker = shell_worker(0, ECHO_OK);
        assert_eq!(worker.state(), WorkerState::Idle);

        worker
            .dispatch_map(Path::new("/tmp/in"), Path::new("/tmp/out"))
            .await
            .unwrap();
        assert_eq!(worker.state(), WorkerState::Running(TaskKind::Map));

        worker.await_result().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Idle);

        worker.terminate().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Terminated);
    }

    #[tokio::test]
    async fn surfaces_the_reported_message() {
        let mut worker = shell_worker(2, r#"read line; echo "error: input missing"; read line"#);

        worker
            .dispatch_reduce(Path::new("/tmp/in"), Path::new("/tmp/out"))
            .await
            .unwrap();
        match worker.await_result().await {
            Err(WorkerError::Reported { index, message }) => {
                assert_eq!(index, 2);
                assert_eq!(message, "input missing");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        worker.kill().await.unwrap();
    }

    #[tokio::test]
    async fn exit_without_status_is_a_lifecycle_error() {
        let mut worker = shell_worker(1, "read line; exit 3");

        worker
            .dispatch_map(Path::new("/tmp/in"), Path::new("/tmp/out"))
            .await
            .unwrap();
        assert!(matches!(
            worker.await_result().await,
            Err(WorkerError::UnexpectedExit { index: 1 })
        ));
        worker.kill().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Terminated);
    }

    #[tokio::test]
    async fn kill_stops_a_busy_worker() {
        let mut worker = shell_worker(0, "read line; sleep 30");

        worker
            .dispatch_map(Path::new("/tmp/in"), Path::new("/tmp/out"))
            .await
            .unwrap();
        worker.kill().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Terminated);
        assert!(worker.kill().await.is_ok());
    }

    #[tokio::test]
    async fn nonzero_exit_on_done_is_reported() {
        let mut worker = shell_worker(0, "read line; exit 4");
        assert!(matches!(
            worker.terminate().await,
            Err(WorkerError::ExitStatus { index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn refuses_a_second_task_while_running() {
        let mut worker = shell_worker(0, ECHO_OK);
        worker
            .dispatch_map(Path::new("/tmp/in"), Path::new("/tmp/out"))
            .await
            .unwrap();

        let second = worker
            .dispatch_map(Path::new("/tmp/in"), Path::new("/tmp/out"))
            .await;
        assert!(matches!(second, Err(WorkerError::InvalidState { .. })));
        worker.await_result().await.unwrap();
        worker.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn non_utf8_diagnostics_are_ignored() {
        let mut worker = shell_worker(0, r#"read line; printf 'diag \377\n'; echo ok; read line"#);

        worker
            .dispatch_map(Path::new("/tmp/in"), Path::new("/tmp/out"))
            .await
            .unwrap();
        worker.await_result().await.unwrap();
        worker.kill().await.unwrap();
    }

    #[tokio::test]
    async fn overlong_diagnostics_are_cut_not_fatal() {
        let script = r#"read line; head -c 70000 /dev/zero | tr '\0' x; echo; echo ok; read line"#;
        let mut worker = shell_worker(0, script);

        worker
            .dispatch_reduce(Path::new("/tmp/in"), Path::new("/tmp/out"))
            .await
            .unwrap();
        worker.await_result().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Idle);
        worker.kill().await.unwrap();
    }

    /// Answers the first task, then prints a stray line after its `ok`.
    /// The second task fails. `done` prints one more line before exiting.
    const STRAY_AFTER_OK: &str = r#"
        n=0
        while read cmd input output; do
            case "$cmd" in
                map|reduce)
                    n=$((n + 1))
                    if [ "$n" -eq 1 ]; then
                        echo ok; echo "late note"
                    else
                        echo "error: task $n failed"
                    fi ;;
                done) echo "late on exit"; exit 0 ;;
            esac
        done
    "#;

    #[tokio::test]
    async fn lines_after_a_result_belong_to_no_task() {
        let mut worker = shell_worker(0, STRAY_AFTER_OK);

        worker
            .dispatch_map(Path::new("/tmp/in"), Path::new("/tmp/out"))
            .await
            .unwrap();
        worker.await_result().await.unwrap();

        worker
            .dispatch_reduce(Path::new("/tmp/in"), Path::new("/tmp/out"))
            .await
            .unwrap();
        match worker.await_result().await {
            Err(WorkerError::Reported { message, .. }) => assert_eq!(message, "task 2 failed"),
            other => panic!("unexpected result: {other:?}"),
        }

        worker.terminate().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Terminated);
    }

    #[tokio::test]
    async fn terminate_drains_lines_left_after_a_result() {
        let mut worker = shell_worker(0, STRAY_AFTER_OK);

        worker
            .dispatch_map(Path::new("/tmp/in"), Path::new("/tmp/out"))
            .await
            .unwrap();
        worker.await_result().await.unwrap();
        worker.terminate().await.unwrap();
    }

    #[test]
    fn codec_keeps_raw_bytes_and_cuts_long_lines() {
        let mut codec = OutputLineCodec::new(4);
        let mut buf = BytesMut::from(&b"ab\xff\nlonger line\nok\ntail"[..]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.bytes, &b"ab\xff"[..]);
        assert!(!first.truncated);

        let cut = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(cut.bytes, &b"long"[..]);
        assert!(cut.truncated);

        let ok = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(ok.bytes, &b"ok"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        let tail = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(tail.bytes, &b"tail"[..]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn codec_waits_for_the_rest_of_a_line() {
        let mut codec = OutputLineCodec::new(64);
        let mut buf = BytesMut::from(&b"partial"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b" line\n");
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line.bytes, &b"partial line"[..]);
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let command = WorkerCommand::new("/definitely/not/a/worker");
        assert!(matches!(
            ProcessWorker::spawn(5, &command),
            Err(WorkerError::Spawn { index: 5, .. })
        ));
    }
}
