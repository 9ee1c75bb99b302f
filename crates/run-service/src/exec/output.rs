use std::time::Duration;

use protocol::{format_return_code, ErrorKind, TerminalStatus};

use super::ExecSpec;

pub(super) const OUTPUT_BELOW: &str = "---process output below---";

pub(super) fn start_notices(spec: &ExecSpec) -> Vec<String> {
    vec![
        format!("Timeout set to {} seconds", secs(spec.timeout)),
        format!("Job directory: {}", spec.working_dir.display()),
        format!("Running: {}", spec.display_command()),
        OUTPUT_BELOW.to_string(),
    ]
}

/// Why a running process is being stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum StopReason {
    Timeout,
    Cancelled,
}

impl StopReason {
    fn tag(self) -> &'static str {
        match self {
            Self::Timeout => "[TIMEOUT]",
            Self::Cancelled => "[CANCELLED]",
        }
    }

    pub(super) fn stopped(self, exit_code: Option<i32>) -> TerminalStatus {
        match self {
            Self::Timeout => TerminalStatus::TimedOut { exit_code },
            Self::Cancelled => TerminalStatus::Cancelled {
                exit_code,
                forced: false,
            },
        }
    }

    pub(super) fn killed(self) -> TerminalStatus {
        match self {
            Self::Timeout => TerminalStatus::ForceKilled,
            Self::Cancelled => TerminalStatus::Cancelled {
                exit_code: None,
                forced: true,
            },
        }
    }
}

pub(super) fn stop_notices(reason: StopReason, timeout: Duration, grace: Duration) -> [String; 2] {
    match reason {
        StopReason::Timeout => [
            "---timeout process output above---".to_string(),
            format!(
                "[TIMEOUT] The program is still running, but the execution exceeded {}s limit, terminating now and will kill it in {} seconds...",
                secs(timeout),
                secs(grace)
            ),
        ],
        StopReason::Cancelled => [
            "---cancelled process output above---".to_string(),
            format!(
                "[CANCELLED] The execution was cancelled, terminating now and will kill it in {} seconds...",
                secs(grace)
            ),
        ],
    }
}

/// Last annotation of a stream; exactly one per run.
pub(super) fn terminal_notice(status: &TerminalStatus, grace: Duration) -> String {
    match status {
        TerminalStatus::Completed { exit_code } => format!(
            "---finished process output above return_code={}---",
            format_return_code(*exit_code)
        ),
        TerminalStatus::TimedOut { .. } => clean_shutdown(StopReason::Timeout),
        TerminalStatus::ForceKilled => force_kill(StopReason::Timeout, grace),
        TerminalStatus::Cancelled { forced: false, .. } => clean_shutdown(StopReason::Cancelled),
        TerminalStatus::Cancelled { forced: true, .. } => force_kill(StopReason::Cancelled, grace),
        TerminalStatus::Errored { kind, message } => match kind {
            ErrorKind::Launch => format!("[ERROR] failed to launch process: {message}"),
            ErrorKind::Read => format!("[ERROR] failed while reading process output: {message}"),
        },
    }
}

fn clean_shutdown(reason: StopReason) -> String {
    format!("{} Clean shutdown completed", reason.tag())
}

fn force_kill(reason: StopReason, grace: Duration) -> String {
    format!("{} Force kill after {} seconds", reason.tag(), secs(grace))
}

fn secs(duration: Duration) -> String {
    let value = duration.as_secs_f64();
    if value.fract() == 0.0 {
        format!("{}", duration.as_secs())
    } else {
        format!("{value}")
    }
}
