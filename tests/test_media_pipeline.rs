mod common;

use common::{setup, setup_with, test_config};
use marketpulse::application::orchestrator::{ItemOutcome, RunReport};
use marketpulse::domain::error::DomainError;
use marketpulse::domain::values::source_type::SourceType;
use std::sync::atomic::Ordering;

const CHANNEL: &str = "UC_finance";

fn outcome<'a>(report: &'a RunReport, item_id: &str) -> &'a ItemOutcome {
    &report
        .items
        .iter()
        .find(|i| i.key.period == item_id)
        .unwrap()
        .outcome
}

#[tokio::test]
async fn test_new_item_is_summarized_and_posted_once() {
    let (mp, fakes) = setup();
    fakes
        .video
        .add_item(CHANNEL, "v1", "2024/05/03 早盤解析", 3, Some("今天聯準會維持利率不變"));

    let report = mp.run_job("video_digest").await.unwrap();
    assert_eq!(report.candidates, 1);
    assert_eq!(report.dispatched, 1);
    assert!(report.is_success());
    assert!(mp.has_processed(SourceType::Video, CHANNEL, "v1").unwrap());

    let bodies = fakes.sink.bodies();
    assert_eq!(bodies.len(), 1);
    assert!(bodies[0].starts_with("# 2024/05/03 早盤解析"));
    assert!(bodies[0].contains("watch?v=v1"));
    assert!(bodies[0].contains("## Key Figures"));
    assert!(bodies[0].contains("## 🔗 重要資訊來源\n1. [UC_finance] [2024/05/03 早盤解析]("));
    assert_eq!(fakes.sink.threads_created.load(Ordering::SeqCst), 1);
    assert_eq!(
        fakes.sink.topics(),
        vec![("finance-channel".to_string(), "daily_finance".to_string())]
    );

    let again = mp.run_job("video_digest").await.unwrap();
    assert_eq!(again.dispatched, 0);
    assert_eq!(again.skipped, 1);
    assert_eq!(fakes.sink.post_count(), 1);
    assert_eq!(fakes.summarizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transcript_retried_until_success() {
    let (mp, fakes) = setup();
    fakes.video.add_item(CHANNEL, "v1", "2024/05/03", 3, Some("text"));
    fakes.video.fail_transcript_times("v1", 2);

    let report = mp.run_job("video_digest").await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.items[0].attempts.transcript, 3);
    assert_eq!(report.items[0].attempts.summarize, 1);
    assert_eq!(report.items[0].attempts.dispatch, 1);
}

#[tokio::test]
async fn test_transient_summarizer_failures_then_success() {
    let (mp, fakes) = setup();
    fakes.video.add_item(CHANNEL, "v1", "2024/05/03", 3, Some("text"));
    fakes.summarizer.push(Err(DomainError::Transient("429 rate limited".into())));
    fakes.summarizer.push(Err(DomainError::Transient("502 bad gateway".into())));

    let report = mp.run_job("video_digest").await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.items[0].attempts.summarize, 3);
    assert_eq!(fakes.summarizer.calls.load(Ordering::SeqCst), 3);
    assert_eq!(fakes.sink.post_count(), 1);
}

#[tokio::test]
async fn test_transcript_exhaustion_leaves_item_unprocessed() {
    let (mp, fakes) = setup();
    fakes.video.add_item(CHANNEL, "v1", "2024/05/03", 3, Some("text"));
    fakes.video.fail_transcript_times("v1", 10);

    let report = mp.run_job("video_digest").await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(!report.is_success());
    assert_eq!(report.items[0].attempts.transcript, 3);
    assert_eq!(fakes.video.transcript_calls.load(Ordering::SeqCst), 3);
    assert_eq!(fakes.summarizer.calls.load(Ordering::SeqCst), 0);
    assert!(!mp.has_processed(SourceType::Video, CHANNEL, "v1").unwrap());
}

#[tokio::test]
async fn test_malformed_summary_is_never_posted() {
    let (mp, fakes) = setup();
    fakes.video.add_item(CHANNEL, "v1", "2024/05/03", 3, Some("text"));
    fakes.summarizer.push(Ok("I cannot help with that."));
    fakes.summarizer.push(Ok("## Core Theme\nonly one section"));

    let report = mp.run_job("video_digest").await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(matches!(outcome(&report, "v1"), ItemOutcome::Failed { error } if error.contains("Malformed")));
    assert_eq!(report.items[0].attempts.summarize, 2);
    assert_eq!(fakes.sink.post_count(), 0);
    assert!(!mp.has_processed(SourceType::Video, CHANNEL, "v1").unwrap());

    // The script is used up, so the next run gets a valid summary.
    let retry = mp.run_job("video_digest").await.unwrap();
    assert_eq!(retry.dispatched, 1);
    assert!(mp.has_processed(SourceType::Video, CHANNEL, "v1").unwrap());
}

#[tokio::test]
async fn test_summarizer_auth_failure_is_not_retried() {
    let (mp, fakes) = setup();
    fakes.video.add_item(CHANNEL, "v1", "2024/05/03", 3, Some("text"));
    fakes
        .summarizer
        .push(Err(DomainError::Configuration("401 invalid key".into())));

    let report = mp.run_job("video_digest").await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(fakes.summarizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_item_without_transcript_is_no_data() {
    let (mp, fakes) = setup();
    fakes.video.add_item(CHANNEL, "v1", "2024/05/03", 3, None);
    fakes.video.add_item(CHANNEL, "v2", "2024/05/04", 4, Some("text"));

    let report = mp.run_job("video_digest").await.unwrap();
    assert_eq!(report.candidates, 2);
    assert_eq!(report.no_data, 1);
    assert_eq!(report.dispatched, 1);
    assert!(matches!(outcome(&report, "v1"), ItemOutcome::NoData { .. }));
    assert!(!mp.has_processed(SourceType::Video, CHANNEL, "v1").unwrap());
    assert!(mp.has_processed(SourceType::Video, CHANNEL, "v2").unwrap());
}

#[tokio::test]
async fn test_items_share_the_daily_topic_thread() {
    let (mp, fakes) = setup();
    fakes.video.add_item(CHANNEL, "v1", "2024/05/03", 3, Some("a"));
    fakes.video.add_item(CHANNEL, "v2", "2024/05/04", 4, Some("b"));

    let report = mp.run_job("video_digest").await.unwrap();
    assert_eq!(report.dispatched, 2);
    assert_eq!(fakes.sink.threads_created.load(Ordering::SeqCst), 1);
    assert_eq!(
        fakes.sink.topics(),
        vec![("finance-channel".to_string(), "daily_finance".to_string())]
    );
}

#[tokio::test]
async fn test_title_filter() {
    let mut config = test_config();
    config.title_pattern = Some(regex::Regex::new(r"^\d{4}/\d{2}/\d{2}").unwrap());
    let (mp, fakes) = setup_with(&config);
    fakes.video.add_item(CHANNEL, "v1", "2024/05/03 盤前", 3, Some("a"));
    fakes.video.add_item(CHANNEL, "v2", "週末閒聊", 4, Some("b"));

    let report = mp.run_job("video_digest").await.unwrap();
    assert_eq!(report.candidates, 1);
    assert_eq!(report.items[0].key.period, "v1");
}

#[tokio::test]
async fn test_video_job_unavailable_without_summarizer() {
    let fakes = common::Fakes::new();
    let mut providers = fakes.providers();
    providers.summarizer = None;
    let mp = marketpulse::MarketPulse::with_providers(":memory:", &test_config(), providers).unwrap();

    let err = mp.run_job("video_digest").await.unwrap_err();
    assert!(matches!(err, DomainError::Configuration(_)));
    let status = mp.job_status();
    let video = status.iter().find(|s| s.spec.job_name == "video_digest").unwrap();
    assert!(video.unavailable.is_some());
    assert!(video.next_trigger.is_none());
}
