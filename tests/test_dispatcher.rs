mod common;

use common::FakeSink;
use marketpulse::application::dispatcher::Dispatcher;
use marketpulse::domain::entities::envelope::DispatchEnvelope;
use marketpulse::domain::error::DomainError;
use marketpulse::domain::ports::notification_sink::NotificationSink;
use marketpulse::infrastructure::sinks::console::ConsoleSink;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn envelope(topic: &str, body: &str) -> DispatchEnvelope {
    DispatchEnvelope {
        topic: topic.to_string(),
        title: format!("title for {topic}"),
        body: body.to_string(),
        tags: vec!["籌碼異動".into()],
        target_channel: "chip-channel".into(),
    }
}

#[tokio::test]
async fn test_same_topic_reuses_thread() {
    let sink = Arc::new(FakeSink::default());
    let dispatcher = Dispatcher::new(sink.clone(), Duration::from_secs(1));

    let a = dispatcher.dispatch(&envelope("chip_report:2024-05-03", "first")).await;
    let b = dispatcher.dispatch(&envelope("chip_report:2024-05-03", "second")).await;
    assert!(a.success && b.success);
    assert_eq!(a.thread_ref, b.thread_ref);
    assert_eq!(sink.threads_created.load(Ordering::SeqCst), 1);
    assert_eq!(sink.bodies(), vec!["first".to_string(), "second".to_string()]);
}

#[tokio::test]
async fn test_distinct_topics_get_distinct_threads() {
    let sink = Arc::new(FakeSink::default());
    let dispatcher = Dispatcher::new(sink.clone(), Duration::from_secs(1));

    let a = dispatcher.dispatch(&envelope("chip_report:2024-05-03", "x")).await;
    let b = dispatcher.dispatch(&envelope("chip_report:2024-05-06", "y")).await;
    assert_ne!(a.thread_ref, b.thread_ref);
    assert_eq!(sink.threads_created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failure_is_typed_not_raised() {
    let sink = Arc::new(FakeSink::default());
    sink.fail_next_posts(1);
    let dispatcher = Dispatcher::new(sink.clone(), Duration::from_secs(1));

    let result = dispatcher.dispatch(&envelope("t", "body")).await;
    assert!(!result.success);
    assert!(result.thread_ref.is_none());
    assert!(result.error.unwrap().contains("503"));
    assert_eq!(sink.post_count(), 0);
}

#[tokio::test]
async fn test_slow_sink_times_out() {
    let sink = Arc::new(FakeSink::default());
    sink.delay_posts(Duration::from_millis(300));
    let dispatcher = Dispatcher::new(sink, Duration::from_millis(20));

    let err = dispatcher.try_dispatch(&envelope("t", "body")).await.unwrap_err();
    match err {
        DomainError::Dispatch(msg) => assert!(msg.contains("timed out")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_console_sink_keeps_one_thread_per_topic() {
    let sink = ConsoleSink::new();
    let a = sink.get_or_create_thread("c", "daily_finance", "t", &[]).await.unwrap();
    let b = sink.get_or_create_thread("c", "daily_finance", "t", &[]).await.unwrap();
    let c = sink.get_or_create_thread("c", "other", "t", &[]).await.unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    sink.post(&a, "hello").await.unwrap();
}
