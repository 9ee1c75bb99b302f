use serde::{Deserialize, Serialize};

pub mod framing;
pub mod jobs;

/// Prefix carried by every annotation the service interleaves with process output.
pub const NOTICE_PREFIX: &str = "[DEEPMD]";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Launch,
    Read,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TerminalStatus {
    Completed {
        exit_code: Option<i32>,
    },
    /// Deadline hit, process exited on its own within the grace period.
    TimedOut {
        exit_code: Option<i32>,
    },
    ForceKilled,
    /// Stopped on request. `forced` when the group had to be killed.
    Cancelled {
        exit_code: Option<i32>,
        forced: bool,
    },
    Errored {
        kind: ErrorKind,
        message: String,
    },
}

impl TerminalStatus {
    pub fn return_code(&self) -> Option<i32> {
        match self {
            Self::Completed { exit_code }
            | Self::TimedOut { exit_code }
            | Self::Cancelled { exit_code, .. } => *exit_code,
            Self::ForceKilled | Self::Errored { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::TimedOut { .. } => "timed_out",
            Self::ForceKilled => "force_killed",
            Self::Cancelled { .. } => "cancelled",
            Self::Errored { .. } => "errored",
        }
    }
}

/// Response of the non-streaming run endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunResult {
    pub return_code: Option<i32>,
    pub status: TerminalStatus,
    pub job_dir: String,
}

pub fn format_return_code(code: Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}
