mod output;
mod process;
mod stream;

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use protocol::framing::{encode_bytes, encode_frame};
use protocol::{ErrorKind, TerminalStatus, NOTICE_PREFIX};
use system_utils::process::exit_code;
use tokio::io::AsyncRead;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use self::output::{start_notices, stop_notices, terminal_notice, StopReason};
use self::process::{force_kill, launch, terminate_group, terminate_quietly, Launched};
use self::stream::ChunkReader;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ExecError {
    #[error("command is empty")]
    EmptyCommand,
    #[error("invalid command line: {0}")]
    InvalidCommand(#[from] shell_words::ParseError),
    #[error("timeout must be a positive number of seconds")]
    InvalidTimeout,
}

/// A validated command, ready to launch.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExecSpec {
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
    pub(crate) working_dir: PathBuf,
    pub(crate) timeout: Duration,
}

impl ExecSpec {
    /// Splits `command` with shell quoting rules; nothing is expanded and no
    /// shell is involved at launch.
    pub(crate) fn parse(
        command: &str,
        working_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, ExecError> {
        if timeout.is_zero() {
            return Err(ExecError::InvalidTimeout);
        }
        let mut words = shell_words::split(command)?.into_iter();
        let program = words.next().ok_or(ExecError::EmptyCommand)?;
        Ok(Self {
            program,
            args: words.collect(),
            working_dir: working_dir.into(),
            timeout,
        })
    }

    pub(crate) fn display_command(&self) -> String {
        shell_words::join(std::iter::once(&self.program).chain(self.args.iter()))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ExecLimits {
    pub(crate) grace_period: Duration,
    pub(crate) channel_capacity: usize,
    pub(crate) max_chunk_bytes: usize,
}

/// Owns the producer tasks and the service-wide stop signal.
///
/// Cancelling the shutdown token stops every run the same way a timeout
/// does; [`Supervisor::drain`] then waits for the process groups to go.
#[derive(Debug, Clone, Default)]
pub(crate) struct Supervisor {
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Supervisor {
    pub(crate) fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            tasks: TaskTracker::new(),
        }
    }

    /// Token for a single run, also cancelled by service shutdown.
    pub(crate) fn run_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Stops every run and waits for the tasks. False when `limit` ran out first.
    pub(crate) async fn drain(&self, limit: Duration) -> bool {
        self.shutdown.cancel();
        self.tasks.close();
        tokio::time::timeout(limit, self.tasks.wait()).await.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExecEvent {
    Output(Bytes),
    Notice(String),
    /// Always the last event. `notice` is the closing annotation.
    Finished {
        status: TerminalStatus,
        notice: String,
    },
}

impl ExecEvent {
    pub(crate) fn to_frame(&self) -> String {
        match self {
            Self::Output(bytes) => encode_bytes(bytes),
            Self::Notice(notice) | Self::Finished { notice, .. } => {
                encode_frame(&format!("{NOTICE_PREFIX} {notice}"))
            }
        }
    }
}

/// Consumer end of a running execution. Dropping it terminates the process.
pub(crate) struct ExecStream {
    rx: mpsc::Receiver<ExecEvent>,
}

impl ExecStream {
    pub(crate) async fn recv(&mut self) -> Option<ExecEvent> {
        self.rx.recv().await
    }

    pub(crate) fn into_stream(self) -> impl Stream<Item = ExecEvent> + Send + 'static {
        futures_util::stream::unfold(self.rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
    }
}

pub(crate) fn spawn_stream(
    spec: ExecSpec,
    limits: &ExecLimits,
    supervisor: &Supervisor,
    cancel: CancellationToken,
) -> ExecStream {
    let (tx, rx) = mpsc::channel(limits.channel_capacity.max(1));
    let limits = limits.clone();
    supervisor.spawn(async move {
        drive(spec, limits, tx, cancel).await;
    });
    ExecStream { rx }
}

/// Runs the command and keeps only its terminal status.
pub(crate) async fn run_to_completion(
    spec: ExecSpec,
    limits: &ExecLimits,
    supervisor: &Supervisor,
    cancel: CancellationToken,
) -> TerminalStatus {
    let mut stream = spawn_stream(spec, limits, supervisor, cancel);
    while let Some(event) = stream.recv().await {
        if let ExecEvent::Finished { status, .. } = event {
            return status;
        }
    }
    TerminalStatus::Errored {
        kind: ErrorKind::Read,
        message: "execution ended without a status".to_string(),
    }
}

enum Step {
    Sent,
    Eof,
    Deadline,
    Closed,
    Failed(io::Error),
}

/// Forwards one chunk. Cancel-safe: the channel slot is reserved before the
/// read, and the read keeps partial data in the reader.
async fn forward_one<R: AsyncRead + Unpin>(
    reader: &mut ChunkReader<R>,
    tx: &mpsc::Sender<ExecEvent>,
    deadline: Instant,
) -> Step {
    let permit = tokio::select! {
        biased;
        _ = sleep_until(deadline) => return Step::Deadline,
        permit = tx.reserve() => match permit {
            Ok(permit) => permit,
            Err(_) => return Step::Closed,
        },
    };
    let chunk = tokio::select! {
        biased;
        _ = sleep_until(deadline) => return Step::Deadline,
        _ = tx.closed() => return Step::Closed,
        read = reader.next_chunk() => match read {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return Step::Eof,
            Err(err) => return Step::Failed(err),
        },
    };
    permit.send(ExecEvent::Output(chunk));
    Step::Sent
}

async fn drive(
    spec: ExecSpec,
    limits: ExecLimits,
    tx: mpsc::Sender<ExecEvent>,
    cancel: CancellationToken,
) {
    for notice in start_notices(&spec) {
        if tx.send(ExecEvent::Notice(notice)).await.is_err() {
            return;
        }
    }
    if cancel.is_cancelled() {
        finish(&tx, StopReason::Cancelled.stopped(None), &limits).await;
        return;
    }

    let Launched {
        mut child,
        output,
        pgid,
    } = match launch(&spec) {
        Ok(launched) => launched,
        Err(err) => {
            tracing::warn!(
                event = "exec.launch_failed",
                program = %spec.program,
                cwd = %spec.working_dir.display(),
                error = %err,
            );
            let status = TerminalStatus::Errored {
                kind: ErrorKind::Launch,
                message: err.to_string(),
            };
            finish(&tx, status, &limits).await;
            return;
        }
    };
    tracing::info!(
        event = "exec.spawned",
        pid = pgid,
        program = %spec.program,
        cwd = %spec.working_dir.display(),
        timeout_secs = spec.timeout.as_secs_f64(),
    );

    let mut reader = ChunkReader::new(output, limits.max_chunk_bytes);
    let deadline = Instant::now() + spec.timeout;

    let stop = loop {
        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Some(StopReason::Cancelled),
            step = forward_one(&mut reader, &tx, deadline) => step,
        };
        match step {
            Step::Sent => continue,
            Step::Eof => break None,
            Step::Deadline => break Some(StopReason::Timeout),
            Step::Closed => {
                abandon(&mut child, pgid, &mut reader, limits.grace_period).await;
                return;
            }
            Step::Failed(err) => {
                tracing::warn!(event = "exec.read_failed", error = %err);
                terminate_quietly(&mut child, pgid, limits.grace_period).await;
                let status = TerminalStatus::Errored {
                    kind: ErrorKind::Read,
                    message: err.to_string(),
                };
                finish(&tx, status, &limits).await;
                return;
            }
        }
    };
    let reader_open = stop.is_some();

    let reason = match stop {
        Some(reason) => reason,
        None => tokio::select! {
            biased;
            _ = cancel.cancelled() => StopReason::Cancelled,
            exit = timeout_at(deadline, child.wait()) => match exit {
                Ok(Ok(exit)) => {
                    let status = TerminalStatus::Completed {
                        exit_code: exit_code(exit),
                    };
                    tracing::info!(event = "exec.completed", exit_code = ?status.return_code());
                    finish(&tx, status, &limits).await;
                    return;
                }
                Ok(Err(err)) => {
                    force_kill(&mut child, pgid).await;
                    let status = TerminalStatus::Errored {
                        kind: ErrorKind::Read,
                        message: err.to_string(),
                    };
                    finish(&tx, status, &limits).await;
                    return;
                }
                Err(_) => StopReason::Timeout,
            },
        },
    };

    match reason {
        StopReason::Timeout => tracing::warn!(
            event = "exec.timeout",
            pgid,
            timeout_secs = spec.timeout.as_secs_f64(),
            grace_secs = limits.grace_period.as_secs_f64(),
        ),
        StopReason::Cancelled => tracing::info!(
            event = "exec.cancelled",
            pgid,
            grace_secs = limits.grace_period.as_secs_f64(),
        ),
    }
    for notice in stop_notices(reason, spec.timeout, limits.grace_period) {
        if tx.send(ExecEvent::Notice(notice)).await.is_err() {
            abandon(&mut child, pgid, &mut reader, limits.grace_period).await;
            return;
        }
    }
    let stopped = shut_down(
        &mut child,
        pgid,
        &mut reader,
        reader_open,
        &tx,
        limits.grace_period,
        reason,
    )
    .await;
    if let Some(status) = stopped {
        finish(&tx, status, &limits).await;
    }
}

/// SIGTERM to the group, keep forwarding through the grace period, then
/// SIGKILL. The shutdown is clean only if the leader exited and the output
/// pipe closed, meaning no member still holds it, before the grace period
/// ran out. Returns `None` when the consumer went away in the meantime.
async fn shut_down<R: AsyncRead + Unpin>(
    child: &mut Child,
    pgid: i32,
    reader: &mut ChunkReader<R>,
    mut reader_open: bool,
    tx: &mpsc::Sender<ExecEvent>,
    grace: Duration,
    reason: StopReason,
) -> Option<TerminalStatus> {
    terminate_group(pgid);
    let grace_deadline = Instant::now() + grace;

    let exited = loop {
        tokio::select! {
            biased;
            exit = child.wait() => break exit.ok(),
            _ = sleep_until(grace_deadline) => break None,
            step = forward_one(reader, tx, grace_deadline), if reader_open => match step {
                Step::Sent | Step::Deadline => {}
                Step::Eof | Step::Failed(_) => reader_open = false,
                Step::Closed => {
                    force_kill(child, pgid).await;
                    return None;
                }
            },
        }
    };

    if exited.is_some() {
        while reader_open {
            match forward_one(reader, tx, grace_deadline).await {
                Step::Sent => {}
                Step::Deadline => break,
                Step::Eof | Step::Failed(_) => reader_open = false,
                Step::Closed => {
                    force_kill(child, pgid).await;
                    return None;
                }
            }
        }
    }

    let status = match exited {
        Some(exit) if !reader_open => reason.stopped(exit_code(exit)),
        _ => reason.killed(),
    };
    // Also reaps members that closed their output but ignored SIGTERM.
    force_kill(child, pgid).await;
    match &status {
        TerminalStatus::ForceKilled | TerminalStatus::Cancelled { forced: true, .. } => {
            tracing::warn!(event = "exec.force_killed", pgid, grace_secs = grace.as_secs_f64());
        }
        _ => tracing::info!(event = "exec.terminated", pgid, exit_code = ?status.return_code()),
    }
    Some(status)
}

/// Nobody reads the output any more: stop the group without reporting.
async fn abandon<R: AsyncRead + Unpin>(
    child: &mut Child,
    pgid: i32,
    reader: &mut ChunkReader<R>,
    grace: Duration,
) {
    tracing::info!(event = "exec.abandoned", pgid);
    terminate_group(pgid);
    let _ = tokio::time::timeout(grace, async {
        let _ = child.wait().await;
        while let Ok(Some(_)) = reader.next_chunk().await {}
    })
    .await;
    force_kill(child, pgid).await;
}

async fn finish(tx: &mpsc::Sender<ExecEvent>, status: TerminalStatus, limits: &ExecLimits) {
    let notice = terminal_notice(&status, limits.grace_period);
    let _ = tx.send(ExecEvent::Finished { status, notice }).await;
}
