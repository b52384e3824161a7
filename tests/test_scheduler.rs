use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use marketpulse::application::orchestrator::RunReport;
use marketpulse::application::scheduler::{JobHandler, JobState, Scheduler, TriggerSource};
use marketpulse::domain::entities::job_spec::{JobKind, JobSpec};
use marketpulse::domain::error::DomainError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// Blocks inside `run` until released.
#[derive(Default)]
struct GatedJob {
    started: Notify,
    release: Notify,
    runs: AtomicUsize,
}

#[async_trait]
impl JobHandler for GatedJob {
    async fn run(&self) -> Result<RunReport, DomainError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        Ok(RunReport::new("chip_daily"))
    }
}

struct FailingJob;

#[async_trait]
impl JobHandler for FailingJob {
    async fn run(&self) -> Result<RunReport, DomainError> {
        Err(DomainError::Transient("upstream down".into()))
    }
}

fn spec(kind: JobKind, cron: &str, enabled: bool) -> JobSpec {
    JobSpec::new(kind, cron.parse().unwrap(), chrono_tz::Asia::Taipei, enabled)
}

#[tokio::test]
async fn test_overlapping_trigger_is_rejected() {
    let job = Arc::new(GatedJob::default());
    let mut scheduler = Scheduler::new();
    scheduler.register(spec(JobKind::ChipDaily, "0 16 * * 1-5", true), job.clone());
    let scheduler = Arc::new(scheduler);

    let s = scheduler.clone();
    let first = tokio::spawn(async move { s.trigger("chip_daily", TriggerSource::Manual).await });
    job.started.notified().await;
    assert_eq!(scheduler.state("chip_daily"), Some(JobState::Running));

    let err = scheduler
        .trigger("chip_daily", TriggerSource::Timer)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::JobBusy(_)));

    job.release.notify_one();
    first.await.unwrap().unwrap();
    assert_eq!(scheduler.state("chip_daily"), Some(JobState::Idle));
    assert_eq!(job.runs.load(Ordering::SeqCst), 1);

    let status = scheduler.status(&Utc::now());
    let last = status[0].last_run.as_ref().unwrap();
    assert_eq!(last.trigger, TriggerSource::Manual);
    assert!(last.success);
}

#[tokio::test]
async fn test_cancelled_run_returns_to_idle() {
    let job = Arc::new(GatedJob::default());
    let mut scheduler = Scheduler::new();
    scheduler.register(spec(JobKind::ChipDaily, "0 16 * * 1-5", true), job.clone());
    let scheduler = Arc::new(scheduler);

    let s = scheduler.clone();
    let running = tokio::spawn(async move { s.trigger("chip_daily", TriggerSource::Timer).await });
    job.started.notified().await;
    running.abort();
    let _ = running.await;

    assert_eq!(scheduler.state("chip_daily"), Some(JobState::Idle));
}

#[tokio::test]
async fn test_failed_run_is_recorded() {
    let mut scheduler = Scheduler::new();
    scheduler.register(spec(JobKind::VideoDigest, "0 8 * * *", true), Arc::new(FailingJob));

    let err = scheduler
        .trigger("video_digest", TriggerSource::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Transient(_)));
    let status = scheduler.status(&Utc::now());
    let last = status[0].last_run.as_ref().unwrap();
    assert!(!last.success);
    assert!(last.summary.contains("upstream down"));
}

#[test]
fn test_next_trigger_skips_weekend() {
    let mut scheduler = Scheduler::new();
    scheduler.register(spec(JobKind::ChipDaily, "0 16 * * 1-5", true), Arc::new(FailingJob));

    // Friday 17:00 in Taipei.
    let after = Utc.with_ymd_and_hms(2024, 5, 3, 9, 0, 0).unwrap();
    let next = scheduler.next_trigger("chip_daily", &after).unwrap();
    assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap());
}

#[test]
fn test_disabled_and_unavailable_jobs() {
    let mut scheduler = Scheduler::new();
    scheduler.register(spec(JobKind::ChipDaily, "0 16 * * 1-5", false), Arc::new(FailingJob));
    scheduler.register_unavailable(spec(JobKind::VideoDigest, "0 8 * * *", true), "missing OPENROUTER_API_KEY");

    let now = Utc::now();
    assert!(scheduler.next_trigger("chip_daily", &now).is_none());
    assert!(scheduler.next_trigger("video_digest", &now).is_none());

    let status = scheduler.status(&now);
    assert_eq!(status.len(), 2);
    let video = status.iter().find(|s| s.spec.job_name == "video_digest").unwrap();
    assert_eq!(video.unavailable.as_deref(), Some("missing OPENROUTER_API_KEY"));
}

#[tokio::test]
async fn test_trigger_errors() {
    let mut scheduler = Scheduler::new();
    scheduler.register_unavailable(spec(JobKind::VideoDigest, "0 8 * * *", true), "no key");

    let err = scheduler.trigger("nope", TriggerSource::Manual).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidInput(_)));
    let err = scheduler
        .trigger("video_digest", TriggerSource::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Configuration(_)));
}

#[tokio::test]
async fn test_run_loop_stops_on_shutdown() {
    let mut scheduler = Scheduler::new();
    scheduler.register(spec(JobKind::ChipDaily, "0 16 * * 1-5", true), Arc::new(FailingJob));
    let scheduler = Arc::new(scheduler);

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(scheduler.clone().run(rx));
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}
