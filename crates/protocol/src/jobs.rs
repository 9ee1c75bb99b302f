use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub const EVENT_SOURCE: &str = "deepmd.ai/batch-queue";
pub const EVENT_TYPE: &str = "deepmd.modal.batch.queuejob.status.changed";
pub const EVENT_SPEC_VERSION: &str = "1.0";
pub const DEFAULT_EVENT_SUBJECT: &str = "run_service_internal";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Submitted,
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Cleaned,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout | Self::Cleaned
        )
    }

    /// Terminal records only move on to `Cleaned`; everything else moves forward.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return next == Self::Cleaned && self != Self::Cleaned;
        }
        next.rank() >= self.rank() && next != Self::Submitted
    }

    fn rank(self) -> u8 {
        match self {
            Self::Submitted => 0,
            Self::Pending => 1,
            Self::Running => 2,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout => 3,
            Self::Cleaned => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobStatusData {
    pub queuejob_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub message: String,
}

/// Status change envelope in CloudEvents 1.0 shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobStatusEvent {
    pub id: String,
    pub source: String,
    pub specversion: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub time: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub datacontenttype: String,
    pub data: JobStatusData,
}

impl JobStatusEvent {
    pub fn status_changed(
        job_id: impl Into<String>,
        status: JobStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: EVENT_SOURCE.to_string(),
            specversion: EVENT_SPEC_VERSION.to_string(),
            event_type: EVENT_TYPE.to_string(),
            time: humantime::format_rfc3339_millis(SystemTime::now()).to_string(),
            subject: Some(DEFAULT_EVENT_SUBJECT.to_string()),
            datacontenttype: "application/json".to_string(),
            data: JobStatusData {
                queuejob_id: job_id.into(),
                status,
                message: message.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobRecord {
    pub job_id: String,
    pub owner_user_id: String,
    pub command: String,
    pub job_dir: String,
    pub timeout_secs: u64,
    pub current_status: JobStatus,
    #[serde(default)]
    pub return_code: Option<i32>,
    #[serde(default)]
    pub status_history: Vec<JobStatusEvent>,
    pub created_at: String,
    pub updated_at: String,
}

/// Body of `POST /jobs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSubmission {
    pub command: String,
    #[serde(default)]
    pub job_dir: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
}
