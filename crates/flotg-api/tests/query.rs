use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    Router,
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{HeaderMap, Request, StatusCode, header},
    middleware, routing,
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use flotg_api::{AppState, AppStateInner, call, router};
use flotg_db::Database;
use flotg_ingest::{Converter, Ingestor, PeerDirectory, ProviderProfile};
use flotg_queue::{CancellationToken, Queue};
use flotg_types::api::{ErrorBody, NDJSON, REQUEST_ID_HEADER};
use flotg_types::events::{PeerRef, PlainMessage, ProviderEvent, ResolvedPeer};
use flotg_types::{Level, Logger, Message, Sink, Source, SourceFlags};

/// Keeps the text of every record so tests can tell which storage calls ran.
#[derive(Default)]
struct RecordedMessages(Mutex<Vec<String>>);

impl RecordedMessages {
    fn count(&self, message: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|m| *m == message).count()
    }
}

impl Sink for RecordedMessages {
    fn record(&self, _level: Level, _kind: &'static str, message: &str, _fields: &[(&'static str, String)]) {
        self.0.lock().unwrap().push(message.to_string());
    }
}

struct Harness {
    app: Router,
    state: AppState,
    ingestor: Ingestor,
    queue: Queue,
    cancel: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn harness(db: Database, submit_timeout: Duration) -> Harness {
    harness_with(db, submit_timeout, Duration::from_secs(5), Logger::null()).await
}

async fn harness_with(db: Database, submit_timeout: Duration, rpc_wait: Duration, logger: Logger) -> Harness {
    let cancel = CancellationToken::new();
    let queue = Queue::new(16, logger.clone());
    queue.initialize(&cancel).unwrap();
    let worker = queue.clone();
    tokio::spawn(async move { worker.run().await });

    let directory = PeerDirectory::new();
    for peer in [
        ResolvedPeer::Channel {
            id: 42,
            title: "News".into(),
            username: None,
        },
        ResolvedPeer::User {
            id: 5,
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            username: None,
        },
        ResolvedPeer::Chat {
            id: 9,
            title: "Friends".into(),
        },
    ] {
        directory.insert(peer).await;
    }

    let db = Arc::new(db);
    let converter = Converter::new(ProviderProfile {
        uid_prefix: "tg".into(),
        link_base: "https://provider".into(),
        flag: SourceFlags::TG,
    });
    let ingestor = Ingestor::new(queue.clone(), db.clone(), Arc::new(directory), converter, logger.clone());

    let state: AppState = Arc::new(AppStateInner {
        queue: queue.clone(),
        db,
        logger,
        submit_timeout,
        rpc_wait,
        shutdown: cancel.clone(),
    });
    let app = router(state.clone()).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4100))));

    Harness {
        app,
        state,
        ingestor,
        queue,
        cancel,
    }
}

fn message_event(peer: PeerRef, id: i64, text: &str) -> ProviderEvent {
    ProviderEvent::Message(PlainMessage {
        id,
        date: 1_700_000_000 + id,
        peer,
        text: text.into(),
        post: false,
        post_author: None,
    })
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, headers, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, json: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

fn lines<T: serde::de::DeserializeOwned>(body: &[u8]) -> Vec<T> {
    std::str::from_utf8(body)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn error_text(body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body).unwrap().error
}

#[tokio::test]
async fn channel_message_round_trip() {
    let h = harness(Database::open_in_memory().unwrap(), Duration::from_secs(5)).await;

    let outcome = h
        .ingestor
        .ingest_and_wait(message_event(PeerRef::Channel(42), 7, "hi"))
        .await
        .unwrap();
    assert!(outcome.is_stored());

    let (status, headers, body) = send(&h.app, get("/sources/tg-fromid-42/messages")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], NDJSON);
    assert!(headers[REQUEST_ID_HEADER].to_str().unwrap().starts_with("rpc-"));

    let messages: Vec<Message> = lines(&body);
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(message.message_uid, "tg-fromid-42-7");
    assert_eq!(message.source_uid, "tg-fromid-42");
    assert_eq!(message.text, "hi");
    assert_eq!(message.links, vec!["https://provider/c/42/7".to_string()]);
    assert_eq!(message.flags.kind(), flotg_types::SourceKind::Channel);
}

#[tokio::test]
async fn redelivery_after_restart_keeps_one_copy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flo_tg.db");
    let event = message_event(PeerRef::Channel(42), 7, "hi");

    {
        let h = harness(Database::open(&path).unwrap(), Duration::from_secs(5)).await;
        assert!(h.ingestor.ingest_and_wait(event.clone()).await.unwrap().is_stored());
    }

    let h = harness(Database::open(&path).unwrap(), Duration::from_secs(5)).await;
    let outcome = h.ingestor.ingest_and_wait(event).await.unwrap();
    assert_eq!(outcome.source.unwrap(), "tg-fromid-42");
    assert_eq!(outcome.message.unwrap().unwrap(), "tg-fromid-42-7");

    let (status, _, body) = send(&h.app, get("/sources/tg-fromid-42/messages")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(lines::<Message>(&body).len(), 1);
    assert_eq!(on_disk_count(&path, "tg-fromid-42"), 1);
}

fn on_disk_count(path: &Path, container: &str) -> i64 {
    let db = Database::open(path).unwrap();
    db.with_conn(|conn| {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", container), [], |row| row.get(0))?)
    })
    .unwrap()
}

#[tokio::test]
async fn empty_source_list_returns_every_source_in_storage_order() {
    let h = harness(Database::open_in_memory().unwrap(), Duration::from_secs(5)).await;
    for (peer, id) in [(PeerRef::Chat(9), 1), (PeerRef::Channel(42), 2), (PeerRef::User(5), 3)] {
        assert!(h.ingestor.ingest_and_wait(message_event(peer, id, "x")).await.unwrap().is_stored());
    }

    let (status, _, body) = send(&h.app, post_json("/sources", r#"{"source_uids":[]}"#)).await;
    assert_eq!(status, StatusCode::OK);
    let sources: Vec<Source> = lines(&body);
    let uids: Vec<&str> = sources.iter().map(|s| s.source_uid.as_str()).collect();
    assert_eq!(uids, vec!["tg-fromid-9", "tg-fromid-42", "tg-fromid-5"]);
    assert_eq!(sources[2].title, "Ada Lovelace");

    let (_, _, all) = send(&h.app, get("/sources")).await;
    assert_eq!(all, body);

    let (_, _, one) = send(&h.app, post_json("/sources", r#"{"source_uids":["tg-fromid-42"]}"#)).await;
    let picked: Vec<Source> = lines(&one);
    assert_eq!(picked.len(), 1);
    assert_eq!(picked[0].title, "News");
    assert_eq!(picked[0].deep_id, 42);
}

#[tokio::test]
async fn saturated_queue_answers_busy_without_reading() {
    let recorded = Arc::new(RecordedMessages::default());
    let h = harness_with(
        Database::open_in_memory().unwrap(),
        Duration::from_millis(50),
        Duration::from_secs(5),
        Logger::new(recorded.clone()),
    )
    .await;
    h.queue
        .enqueue(|_| std::thread::sleep(Duration::from_millis(400)))
        .await
        .unwrap();

    let (status, _, body) = send(&h.app, get("/sources")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_text(&body), "queue is busy, try again");

    // Drain the lane: the timed-out read must have been skipped.
    h.queue.submit(&CancellationToken::new(), Duration::from_secs(5), |_| ()).await.unwrap();
    assert_eq!(recorded.count("Sources read"), 0);

    let (status, _, _) = send(&h.app, get("/sources")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recorded.count("Sources read"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stalled_storage_is_bounded_by_rpc_wait() {
    let h = harness_with(
        Database::open_in_memory().unwrap(),
        Duration::from_millis(50),
        Duration::from_millis(200),
        Logger::null(),
    )
    .await;

    // Hold the storage connection so the read blocks once the worker starts it.
    let (held_tx, held_rx) = std::sync::mpsc::channel();
    let db = h.state.db.clone();
    let holder = std::thread::spawn(move || {
        db.with_conn(|_| {
            held_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_secs(1));
            Ok(())
        })
        .unwrap();
    });
    held_rx.recv().unwrap();

    let started = Instant::now();
    let (status, _, body) = send(&h.app, get("/sources")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_text(&body), "queue is busy, try again");
    assert!(started.elapsed() < Duration::from_millis(800));

    holder.join().unwrap();
    let (status, _, _) = send(&h.app, get("/sources")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn ready_tracks_queue_state() {
    let h = harness(Database::open_in_memory().unwrap(), Duration::from_secs(5)).await;

    let (status, _, body) = send(&h.app, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(std::str::from_utf8(&body).unwrap(), r#"{"status":"ok"}"#);

    h.queue.stop();
    let (status, _, body) = send(&h.app, get("/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_text(&body), "not ready: queue");

    let (status, _, _) = send(&h.app, get("/sources")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let h = harness(Database::open_in_memory().unwrap(), Duration::from_secs(5)).await;

    let (status, _, _) = send(&h.app, get("/sources/bad%20uid/messages")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = send(&h.app, post_json("/sources", r#"{"uids":["x"]}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_text(&body).starts_with("bad request"));

    let (status, _, body) = send(&h.app, get("/sources/tg-fromid-777/messages")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}

async fn boom() -> &'static str {
    panic!("boom")
}

#[tokio::test]
async fn panicking_handler_becomes_an_error_response() {
    let h = harness(Database::open_in_memory().unwrap(), Duration::from_secs(5)).await;
    let app: Router = Router::new()
        .route("/boom", routing::get(boom))
        .layer(middleware::from_fn_with_state(h.state.clone(), call::track_call));

    let (status, headers, body) = send(&app, get("/boom")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_text(&body), "panic (details hidden): rpc call");
    assert!(headers.contains_key(REQUEST_ID_HEADER));

    // The service keeps answering after the fault.
    let (status, _, _) = send(&h.app, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
}
