//! Wall-clock job scheduler.
//!
//! Each job moves `idle -> due -> running -> idle`. The timer path and the
//! manual path both go through [`Scheduler::trigger`], which holds a
//! per-job gate for the duration of the run; a second trigger while the gate
//! is held is rejected with `JobBusy`. After a timer fire the next instant is
//! computed from the current time, so instants missed while the process was
//! down or busy are never replayed.

use crate::application::orchestrator::RunReport;
use crate::domain::entities::job_spec::JobSpec;
use crate::domain::error::DomainError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Upper bound on a single sleep so host clock adjustments are noticed.
const MAX_TICK: Duration = Duration::from_secs(60);

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self) -> Result<RunReport, DomainError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Due,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Timer,
    Manual,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastRun {
    pub trigger: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    #[serde(flatten)]
    pub spec: JobSpec,
    pub state: JobState,
    pub next_trigger: Option<DateTime<Utc>>,
    /// Why the job cannot run at all, if it cannot.
    pub unavailable: Option<String>,
    pub last_run: Option<LastRun>,
}

struct JobEntry {
    spec: JobSpec,
    handler: Result<Arc<dyn JobHandler>, String>,
    gate: Arc<AsyncMutex<()>>,
    state: Arc<Mutex<JobState>>,
    last_run: Mutex<Option<LastRun>>,
}

/// Resets the job to idle however the run ends, including cancellation.
struct StateGuard(Arc<Mutex<JobState>>);

impl StateGuard {
    fn set(&self, state: JobState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

impl Drop for StateGuard {
    fn drop(&mut self) {
        self.set(JobState::Idle);
    }
}

#[derive(Default)]
pub struct Scheduler {
    jobs: BTreeMap<String, JobEntry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: JobSpec, handler: Arc<dyn JobHandler>) {
        self.insert(spec, Ok(handler));
    }

    /// Register a job that cannot run, e.g. because a credential is missing.
    /// It is listed with its reason and rejects every trigger.
    pub fn register_unavailable(&mut self, spec: JobSpec, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(job = %spec.job_name, reason = %reason, "job disabled");
        self.insert(spec, Err(reason));
    }

    fn insert(&mut self, spec: JobSpec, handler: Result<Arc<dyn JobHandler>, String>) {
        self.jobs.insert(
            spec.job_name.clone(),
            JobEntry {
                spec,
                handler,
                gate: Arc::new(AsyncMutex::new(())),
                state: Arc::new(Mutex::new(JobState::Idle)),
                last_run: Mutex::new(None),
            },
        );
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    pub fn spec(&self, name: &str) -> Option<&JobSpec> {
        self.jobs.get(name).map(|j| &j.spec)
    }

    pub fn state(&self, name: &str) -> Option<JobState> {
        self.jobs
            .get(name)
            .map(|j| *j.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Next timer instant after `after`, or `None` for jobs the timer does
    /// not fire.
    pub fn next_trigger(&self, name: &str, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let job = self.jobs.get(name)?;
        if !job.spec.enabled || job.handler.is_err() {
            return None;
        }
        job.spec.schedule.next_after(after, &job.spec.timezone)
    }

    pub fn status(&self, now: &DateTime<Utc>) -> Vec<JobStatus> {
        self.jobs
            .iter()
            .map(|(name, job)| JobStatus {
                spec: job.spec.clone(),
                state: *job.state.lock().unwrap_or_else(PoisonError::into_inner),
                next_trigger: self.next_trigger(name, now),
                unavailable: job.handler.as_ref().err().cloned(),
                last_run: job.last_run.lock().unwrap_or_else(PoisonError::into_inner).clone(),
            })
            .collect()
    }

    /// Run a job now. Rejected with `JobBusy` if it is already running.
    pub async fn trigger(&self, name: &str, source: TriggerSource) -> Result<RunReport, DomainError> {
        let job = self
            .jobs
            .get(name)
            .ok_or_else(|| DomainError::InvalidInput(format!("Unknown job: '{name}'")))?;
        let handler = job
            .handler
            .clone()
            .map_err(|reason| DomainError::Configuration(format!("job '{name}' is disabled: {reason}")))?;

        let _permit = job
            .gate
            .clone()
            .try_lock_owned()
            .map_err(|_| DomainError::JobBusy(name.to_string()))?;
        let state = StateGuard(job.state.clone());
        state.set(JobState::Due);

        let started_at = Utc::now();
        info!(job = name, trigger = ?source, "job started");
        state.set(JobState::Running);
        let result = handler.run().await;
        let finished_at = Utc::now();

        let (success, summary) = match &result {
            Ok(report) => {
                if report.is_success() {
                    info!(job = name, "{}", report.summary_line());
                } else {
                    warn!(job = name, errors = ?report.errors, "{}", report.summary_line());
                }
                (report.is_success(), report.summary_line())
            }
            Err(e) => {
                error!(job = name, error = %e, "job failed");
                (false, e.to_string())
            }
        };
        *job.last_run.lock().unwrap_or_else(PoisonError::into_inner) = Some(LastRun {
            trigger: source,
            started_at,
            finished_at,
            success,
            summary,
        });

        result
    }

    /// Fire jobs at their scheduled instants until `shutdown` turns true.
    /// Running jobs are cancelled on shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let now = Utc::now();
        let mut next: HashMap<String, DateTime<Utc>> = HashMap::new();
        for name in self.jobs.keys() {
            if let Some(at) = self.next_trigger(name, &now) {
                info!(job = %name, next = %at, "scheduled");
                next.insert(name.clone(), at);
            }
        }
        if next.is_empty() {
            warn!("no enabled jobs, waiting for shutdown");
        }

        let mut tasks: JoinSet<()> = JoinSet::new();
        while !*shutdown.borrow() {
            let now = Utc::now();
            let wait = next
                .values()
                .min()
                .map(|at| (*at - now).to_std().unwrap_or(Duration::ZERO).min(MAX_TICK));

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "job task panicked");
                    }
                    continue;
                }
                _ = sleep_for(wait) => {}
            }

            let now = Utc::now();
            let due: Vec<String> = next
                .iter()
                .filter(|(_, at)| **at <= now)
                .map(|(name, _)| name.clone())
                .collect();

            for name in due {
                match self.next_trigger(&name, &now) {
                    Some(at) => {
                        info!(job = %name, next = %at, "rescheduled");
                        next.insert(name.clone(), at);
                    }
                    None => {
                        next.remove(&name);
                    }
                }

                let scheduler = self.clone();
                tasks.spawn(async move {
                    match scheduler.trigger(&name, TriggerSource::Timer).await {
                        Ok(_) => {}
                        Err(DomainError::JobBusy(_)) => {
                            warn!(job = %name, "previous run still in progress, skipping trigger")
                        }
                        // already logged by trigger
                        Err(_) => {}
                    }
                });
            }
        }

        if !tasks.is_empty() {
            info!(running = tasks.len(), "shutdown requested, cancelling running jobs");
        }
        tasks.shutdown().await;
        info!("scheduler stopped");
    }
}

async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}
