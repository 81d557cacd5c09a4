use super::*;
use crate::config::ServerConfig;
use axum::body::Bytes;
use axum::http::HeaderName;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, timeout};

fn query(id: Option<&str>) -> Query<ClientIdQuery> {
    Query(ClientIdQuery { client_id: id.map(str::to_owned) })
}

fn chunked_body(chunks: &[&'static str]) -> Body {
    let chunks: Vec<Result<Bytes, std::io::Error>> =
        chunks.iter().map(|&c| Ok(Bytes::from_static(c.as_bytes()))).collect();
    Body::from_stream(futures::stream::iter(chunks))
}

fn recording_registry(config: ServerConfig) -> (SessionRegistry, Arc<Mutex<Vec<(Value, ClientId)>>>) {
    let registry = SessionRegistry::new(config);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    registry.on_message(move |message, client_id| {
        sink.lock().unwrap().push((message.clone(), client_id.clone()));
    });
    (registry, seen)
}

fn rejection(result: Result<Response, RequestError>) -> RequestError {
    match result {
        Ok(response) => panic!("expected rejection, got {}", response.status()),
        Err(err) => err,
    }
}

fn header<'a>(response: &'a Response, name: &HeaderName) -> &'a str {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_else(|| panic!("missing header {name}"))
}

// =============================================================================
// GET
// =============================================================================

#[tokio::test]
async fn get_assigns_client_id_and_stream_headers() {
    let registry = SessionRegistry::default();
    let response = handle_get(State(registry.clone()), query(None)).await.expect("get");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, &CONTENT_TYPE), "text/plain; charset=utf-8");
    assert_eq!(header(&response, &CONNECTION), "keep-alive");
    assert_eq!(header(&response, &CACHE_CONTROL), "no-cache");

    let assigned = ClientId::from(header(&response, &CLIENT_ID_HEADER));
    assert!(!assigned.as_str().is_empty());
    assert!(registry.contains(&assigned));
}

#[tokio::test]
async fn get_reuses_supplied_client_id() {
    let registry = SessionRegistry::default();
    let response = handle_get(State(registry.clone()), query(Some("c1"))).await.expect("get");

    assert_eq!(header(&response, &CLIENT_ID_HEADER), "c1");
    assert!(registry.contains(&ClientId::from("c1")));
}

#[tokio::test]
async fn get_body_carries_sent_frames() {
    let registry = SessionRegistry::default();
    let response = handle_get(State(registry.clone()), query(Some("c1"))).await.expect("get");
    let mut body = response.into_body().into_data_stream();

    assert!(registry.send_message(&ClientId::from("c1"), &json!({"type": "echo"})));

    let chunk = timeout(Duration::from_millis(500), body.next())
        .await
        .expect("body chunk timed out")
        .expect("body ended")
        .expect("body error");
    assert_eq!(&chunk[..], b"{\"type\":\"echo\"}\n");
}

#[tokio::test]
async fn dropping_get_response_removes_session() {
    let registry = SessionRegistry::default();
    let response = handle_get(State(registry.clone()), query(Some("c1"))).await.expect("get");

    drop(response);

    assert!(!registry.contains(&ClientId::from("c1")));
    assert!(!registry.send_message(&ClientId::from("c1"), &json!({})));
}

#[tokio::test]
async fn get_rejects_id_that_is_not_a_header_value() {
    let registry = SessionRegistry::default();
    let err = rejection(handle_get(State(registry.clone()), query(Some("bad\nid"))).await);

    assert!(matches!(err, RequestError::InvalidClientId));
    assert_eq!(registry.session_count(), 0);
}

#[tokio::test]
async fn head_is_refused_without_touching_sessions() {
    let registry = SessionRegistry::default();
    let _live = registry.register(ClientId::from("c1"));

    let response = handle_head().await;

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(header(&response, &ALLOW), "GET, POST");
    assert!(registry.contains(&ClientId::from("c1")));
    assert_eq!(registry.session_count(), 1);
}

// =============================================================================
// POST
// =============================================================================

#[tokio::test]
async fn post_without_body_is_bad_request() {
    let registry = SessionRegistry::default();
    let err = rejection(handle_post(State(registry), query(Some("c1")), Body::empty()).await);

    assert!(matches!(err, RequestError::MissingBody));
    assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn post_dispatches_frames_in_order_with_client_id() {
    let (registry, seen) = recording_registry(ServerConfig::default());
    let _get = handle_get(State(registry.clone()), query(Some("c1"))).await.expect("get");

    let body = chunked_body(&["{\"counter\":1}\n{\"coun", "ter\":2}\n", "{\"counter\":3}\n"]);
    let response = handle_post(State(registry), query(Some("c1")), body).await.expect("post");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, &CLIENT_ID_HEADER), "c1");
    let bytes = axum::body::to_bytes(response.into_body(), 64).await.expect("body");
    assert_eq!(&bytes[..], b"OK");

    let seen = seen.lock().unwrap().clone();
    let id = ClientId::from("c1");
    assert_eq!(
        seen,
        vec![
            (json!({"counter": 1}), id.clone()),
            (json!({"counter": 2}), id.clone()),
            (json!({"counter": 3}), id),
        ]
    );
}

#[tokio::test]
async fn post_skips_malformed_lines() {
    let (registry, seen) = recording_registry(ServerConfig::default());

    let body = Body::from("{\"a\":1}\n{broken\n{\"b\":2}\n");
    let response = handle_post(State(registry), query(Some("c1")), body).await.expect("post");

    assert_eq!(response.status(), StatusCode::OK);
    let messages: Vec<Value> = seen.lock().unwrap().iter().map(|(m, _)| m.clone()).collect();
    assert_eq!(messages, vec![json!({"a": 1}), json!({"b": 2})]);
}

#[tokio::test]
async fn post_without_get_session_is_accepted_by_default() {
    let (registry, seen) = recording_registry(ServerConfig::default());

    let response = handle_post(State(registry.clone()), query(Some("orphan")), Body::from("{\"x\":1}\n"))
        .await
        .expect("post");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(!registry.send_message(&ClientId::from("orphan"), &json!({"reply": true})));
}

#[tokio::test]
async fn post_without_get_session_is_rejected_when_configured() {
    let config = ServerConfig { reject_orphan_posts: true, ..ServerConfig::default() };
    let (registry, seen) = recording_registry(config);

    let err = rejection(handle_post(State(registry), query(Some("orphan")), Body::from("{\"x\":1}\n")).await);

    assert!(matches!(err, RequestError::UnknownClient(ref id) if id.as_str() == "orphan"));
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn post_without_client_id_gets_generated_one() {
    let (registry, seen) = recording_registry(ServerConfig::default());

    let response = handle_post(State(registry), query(None), Body::from("{\"x\":1}\n"))
        .await
        .expect("post");

    let assigned = header(&response, &CLIENT_ID_HEADER).to_owned();
    assert!(!assigned.is_empty());
    assert_eq!(seen.lock().unwrap()[0].1, ClientId::from(assigned));
}

#[tokio::test]
async fn post_read_failure_is_server_error() {
    let (registry, seen) = recording_registry(ServerConfig::default());

    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::from_static(b"{\"a\":1}\n")),
        Err(std::io::Error::other("connection reset")),
    ];
    let body = Body::from_stream(futures::stream::iter(chunks));

    let err = rejection(handle_post(State(registry), query(Some("c1")), body).await);

    assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(seen.lock().unwrap().len(), 1, "frames before the failure are still delivered");
}
