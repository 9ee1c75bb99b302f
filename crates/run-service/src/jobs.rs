use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use protocol::jobs::{JobRecord, JobStatus, JobStatusEvent};
use protocol::TerminalStatus;
use tokio::sync::{RwLock, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::exec::{run_to_completion, ExecLimits, ExecSpec, Supervisor};

struct Entry {
    seq: u64,
    record: JobRecord,
    cancel: CancellationToken,
    finished_at: Option<Instant>,
}

impl Entry {
    fn advance(&mut self, status: JobStatus, message: &str, return_code: Option<i32>) -> bool {
        let record = &mut self.record;
        if !record.current_status.can_transition_to(status) {
            tracing::warn!(
                event = "job.transition_refused",
                job_id = %record.job_id,
                from = ?record.current_status,
                to = ?status,
            );
            return false;
        }
        record.current_status = status;
        if return_code.is_some() {
            record.return_code = return_code;
        }
        record.updated_at = now_rfc3339();
        record
            .status_history
            .push(JobStatusEvent::status_changed(&record.job_id, status, message));
        if status.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(Instant::now());
        }
        tracing::info!(event = "job.status", job_id = %record.job_id, status = ?status, message);
        true
    }
}

pub(crate) enum CancelOutcome {
    /// The job was queued or running; it stops asynchronously.
    Requested(JobRecord),
    AlreadyFinished(JobRecord),
}

/// In-memory job records plus the permits bounding how many run at once.
#[derive(Clone)]
pub(crate) struct JobRegistry {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
    permits: Arc<Semaphore>,
    next_seq: Arc<AtomicU64>,
    supervisor: Supervisor,
}

impl JobRegistry {
    pub(crate) fn new(max_concurrent: usize, supervisor: Supervisor) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            next_seq: Arc::new(AtomicU64::new(0)),
            supervisor,
        }
    }

    /// Stores a new `Submitted` record with its own cancel token.
    pub(crate) async fn create(
        &self,
        owner: &str,
        spec: &ExecSpec,
        command: &str,
    ) -> (JobRecord, CancellationToken) {
        let job_id = uuid::Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let record = JobRecord {
            job_id: job_id.clone(),
            owner_user_id: owner.to_string(),
            command: command.to_string(),
            job_dir: spec.working_dir.display().to_string(),
            timeout_secs: spec.timeout.as_secs(),
            current_status: JobStatus::Submitted,
            return_code: None,
            status_history: vec![JobStatusEvent::status_changed(
                &job_id,
                JobStatus::Submitted,
                "job submitted",
            )],
            created_at: now.clone(),
            updated_at: now,
        };
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let cancel = self.supervisor.run_token();
        let mut guard = self.inner.write().await;
        guard.insert(
            job_id,
            Entry {
                seq,
                record: record.clone(),
                cancel: cancel.clone(),
                finished_at: None,
            },
        );
        (record, cancel)
    }

    /// Appends a status event. Returns `None` for unknown jobs and for moves
    /// the lifecycle forbids; the record is left untouched in both cases.
    pub(crate) async fn transition(
        &self,
        job_id: &str,
        status: JobStatus,
        message: &str,
        return_code: Option<i32>,
    ) -> Option<JobRecord> {
        let mut guard = self.inner.write().await;
        let entry = guard.get_mut(job_id)?;
        entry
            .advance(status, message, return_code)
            .then(|| entry.record.clone())
    }

    /// Records are visible to their owner only.
    pub(crate) async fn get(&self, owner: &str, job_id: &str) -> Option<JobRecord> {
        let guard = self.inner.read().await;
        guard
            .get(job_id)
            .filter(|entry| entry.record.owner_user_id == owner)
            .map(|entry| entry.record.clone())
    }

    /// Newest first.
    pub(crate) async fn list(&self, owner: &str) -> Vec<JobRecord> {
        let guard = self.inner.read().await;
        let mut entries: Vec<&Entry> = guard
            .values()
            .filter(|entry| entry.record.owner_user_id == owner)
            .collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        entries.into_iter().map(|entry| entry.record.clone()).collect()
    }

    pub(crate) async fn cancel(&self, owner: &str, job_id: &str) -> Option<CancelOutcome> {
        let guard = self.inner.read().await;
        let entry = guard
            .get(job_id)
            .filter(|entry| entry.record.owner_user_id == owner)?;
        if entry.record.current_status.is_terminal() {
            return Some(CancelOutcome::AlreadyFinished(entry.record.clone()));
        }
        entry.cancel.cancel();
        tracing::info!(event = "job.cancel_requested", job_id, owner);
        Some(CancelOutcome::Requested(entry.record.clone()))
    }

    /// Marks records that finished at least `retention` ago as cleaned and
    /// drops them. Returns the final form of each dropped record.
    pub(crate) async fn sweep(&self, retention: Duration) -> Vec<JobRecord> {
        let mut guard = self.inner.write().await;
        let expired: Vec<String> = guard
            .iter()
            .filter(|(_, entry)| {
                entry
                    .finished_at
                    .is_some_and(|at| at.elapsed() >= retention)
            })
            .map(|(job_id, _)| job_id.clone())
            .collect();
        let mut cleaned = Vec::with_capacity(expired.len());
        for job_id in expired {
            if let Some(mut entry) = guard.remove(&job_id) {
                entry.advance(JobStatus::Cleaned, "record expired", None);
                cleaned.push(entry.record);
            }
        }
        if !cleaned.is_empty() {
            tracing::info!(event = "job.swept", count = cleaned.len());
        }
        cleaned
    }

    /// Sweeps every `every` until service shutdown.
    pub(crate) fn spawn_sweeper(&self, every: Duration, retention: Duration) {
        let registry = self.clone();
        let stop = self.supervisor.run_token();
        self.supervisor.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.sweep(retention).await;
                    }
                }
            }
        });
    }

    pub(crate) async fn submit(
        &self,
        owner: &str,
        spec: ExecSpec,
        command: &str,
        limits: ExecLimits,
    ) -> JobRecord {
        let (record, cancel) = self.create(owner, &spec, command).await;
        let registry = self.clone();
        let job_id = record.job_id.clone();
        self.supervisor.spawn(async move {
            registry.run(job_id, spec, limits, cancel).await;
        });
        record
    }

    async fn run(
        &self,
        job_id: String,
        spec: ExecSpec,
        limits: ExecLimits,
        cancel: CancellationToken,
    ) {
        self.transition(&job_id, JobStatus::Pending, "waiting for a free slot", None)
            .await;
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.transition(&job_id, JobStatus::Cancelled, "cancelled before start", None)
                    .await;
                return;
            }
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.transition(&job_id, JobStatus::Failed, "job queue closed", None)
                        .await;
                    return;
                }
            },
        };
        self.transition(&job_id, JobStatus::Running, "process launched", None)
            .await;
        let outcome = run_to_completion(spec, &limits, &self.supervisor, cancel).await;
        let status = job_status_for(&outcome);
        let message = match &outcome {
            TerminalStatus::Errored { message, .. } => message.clone(),
            other => other.label().to_string(),
        };
        self.transition(&job_id, status, &message, outcome.return_code())
            .await;
    }
}

pub(crate) fn job_status_for(outcome: &TerminalStatus) -> JobStatus {
    match outcome {
        TerminalStatus::Completed { exit_code: Some(0) } => JobStatus::Completed,
        TerminalStatus::Completed { .. } | TerminalStatus::Errored { .. } => JobStatus::Failed,
        TerminalStatus::TimedOut { .. } | TerminalStatus::ForceKilled => JobStatus::Timeout,
        TerminalStatus::Cancelled { .. } => JobStatus::Cancelled,
    }
}

fn now_rfc3339() -> String {
    humantime::format_rfc3339_millis(SystemTime::now()).to_string()
}
