//! Discord sink against a local stand-in of the REST API.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use marketpulse::domain::error::DomainError;
use marketpulse::domain::ports::notification_sink::NotificationSink;
use marketpulse::infrastructure::sinks::discord::DiscordSink;
use marketpulse::infrastructure::sqlite::migrations::open_connection;
use marketpulse::infrastructure::sqlite::thread_map::SqliteThreadMap;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOPIC: &str = "chip_report:2024-05-03";
const TITLE: &str = "📊 2024-05-03 籌碼日報";

#[derive(Default)]
struct FakeDiscord {
    channel_types: HashMap<String, u8>,
    created_threads: Vec<(String, Value)>,
    /// Accepted messages as (channel or thread id, content).
    messages: Vec<(String, String)>,
    message_requests: usize,
    /// Status returned for the n-th message request (1-based).
    fail_request: HashMap<usize, u16>,
    deleted: HashSet<String>,
}

type Shared = Arc<Mutex<FakeDiscord>>;

async fn get_channel(State(state): State<Shared>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    let state = state.lock().unwrap();
    match state.channel_types.get(&id) {
        Some(kind) => (
            StatusCode::OK,
            Json(json!({
                "id": id,
                "type": kind,
                "available_tags": [
                    { "id": "11", "name": "籌碼異動" },
                    { "id": "12", "name": "盤後" }
                ]
            })),
        ),
        None => (StatusCode::NOT_FOUND, Json(json!({ "message": "Unknown Channel" }))),
    }
}

async fn create_thread(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut state = state.lock().unwrap();
    state.created_threads.push((id, body));
    let thread_id = format!("thread-{}", state.created_threads.len());
    (StatusCode::CREATED, Json(json!({ "id": thread_id })))
}

async fn create_message(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut state = state.lock().unwrap();
    state.message_requests += 1;
    let n = state.message_requests;
    if state.deleted.contains(&id) {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "Unknown Channel" })));
    }
    if let Some(code) = state.fail_request.get(&n) {
        let status = StatusCode::from_u16(*code).unwrap();
        return (status, Json(json!({ "message": "upstream error" })));
    }
    let content = body["content"].as_str().unwrap_or_default().to_string();
    state.messages.push((id, content));
    (StatusCode::OK, Json(json!({ "id": format!("msg-{n}") })))
}

async fn start(state: Shared) -> String {
    let app = Router::new()
        .route("/channels/{id}", get(get_channel))
        .route("/channels/{id}/threads", post(create_thread))
        .route("/channels/{id}/messages", post(create_message))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

async fn setup(channels: &[(&str, u8)]) -> (DiscordSink, Arc<SqliteThreadMap>, Shared) {
    let state: Shared = Arc::default();
    {
        let mut s = state.lock().unwrap();
        for (id, kind) in channels {
            s.channel_types.insert(id.to_string(), *kind);
        }
    }
    let base_url = start(state.clone()).await;
    let threads = Arc::new(SqliteThreadMap::new(open_connection(":memory:").unwrap()));
    let sink = DiscordSink::new("token".into(), threads.clone(), Duration::from_secs(5)).with_base_url(base_url);
    (sink, threads, state)
}

#[tokio::test]
async fn test_forum_post_resolves_tags_and_reuses_thread() {
    let (sink, threads, state) = setup(&[("forum-1", 15)]).await;
    let tags = vec!["籌碼異動".to_string(), "not-on-forum".to_string()];

    let thread = sink.get_or_create_thread("forum-1", TOPIC, TITLE, &tags).await.unwrap();
    assert_eq!(thread.id, "thread-1");
    assert_eq!(thread.channel_id, "forum-1");

    {
        let s = state.lock().unwrap();
        assert_eq!(s.created_threads.len(), 1);
        let (channel, body) = &s.created_threads[0];
        assert_eq!(channel, "forum-1");
        assert_eq!(body["name"], json!(TITLE));
        assert_eq!(body["applied_tags"], json!(["11"]));
        assert_eq!(body["message"]["content"], json!(format!("**{TITLE}**")));
    }

    let again = sink.get_or_create_thread("forum-1", TOPIC, TITLE, &tags).await.unwrap();
    assert_eq!(again, thread);
    assert_eq!(state.lock().unwrap().created_threads.len(), 1);
    assert_eq!(threads.get("forum-1", TOPIC).unwrap(), Some(thread));

    let other = sink
        .get_or_create_thread("forum-1", "chip_report:2024-05-06", "📊 2024-05-06 籌碼日報", &tags)
        .await
        .unwrap();
    assert_eq!(other.id, "thread-2");
}

#[tokio::test]
async fn test_text_channel_receives_posts_directly() {
    let (sink, _threads, state) = setup(&[("text-1", 0)]).await;

    let thread = sink.get_or_create_thread("text-1", TOPIC, TITLE, &[]).await.unwrap();
    assert_eq!(thread.id, "text-1");
    sink.post(&thread, "hello").await.unwrap();

    let s = state.lock().unwrap();
    assert!(s.created_threads.is_empty());
    assert_eq!(s.messages, vec![("text-1".to_string(), "hello".to_string())]);
}

#[tokio::test]
async fn test_deleted_thread_is_recreated_on_retry() {
    let (sink, threads, state) = setup(&[("forum-1", 15)]).await;
    let thread = sink.get_or_create_thread("forum-1", TOPIC, TITLE, &[]).await.unwrap();
    state.lock().unwrap().deleted.insert(thread.id.clone());

    let err = sink.post(&thread, "report").await.unwrap_err();
    assert!(matches!(err, DomainError::Dispatch(_)));
    assert!(err.is_retryable());
    assert!(threads.get("forum-1", TOPIC).unwrap().is_none());

    let fresh = sink.get_or_create_thread("forum-1", TOPIC, TITLE, &[]).await.unwrap();
    assert_eq!(fresh.id, "thread-2");
    sink.post(&fresh, "report").await.unwrap();

    let s = state.lock().unwrap();
    assert_eq!(s.created_threads.len(), 2);
    assert_eq!(s.messages, vec![("thread-2".to_string(), "report".to_string())]);
}

#[tokio::test]
async fn test_failed_chunk_resumes_without_repeating_delivered_ones() {
    let (sink, _threads, state) = setup(&[("text-1", 0)]).await;
    let thread = sink.get_or_create_thread("text-1", TOPIC, TITLE, &[]).await.unwrap();
    let (a, b) = ("a".repeat(1500), "b".repeat(1500));
    let body = format!("{a}\n{b}");
    state.lock().unwrap().fail_request.insert(2, 502);

    let err = sink.post(&thread, &body).await.unwrap_err();
    assert!(err.is_retryable());
    sink.post(&thread, &body).await.unwrap();

    {
        let s = state.lock().unwrap();
        assert_eq!(s.message_requests, 3);
        assert_eq!(
            s.messages,
            vec![("text-1".to_string(), a.clone()), ("text-1".to_string(), b.clone())]
        );
    }

    // A completed post leaves no progress behind: the same body is sent in full again.
    sink.post(&thread, &body).await.unwrap();
    let s = state.lock().unwrap();
    assert_eq!(s.message_requests, 5);
    assert_eq!(s.messages.len(), 4);
}
