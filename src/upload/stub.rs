//! Loopback HTTP responder for exercising the network clients in tests.

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, Method, StatusCode, Uri, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StubRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl StubRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }
}

pub struct StubServer {
    base: String,
    requests: Arc<Mutex<Vec<StubRequest>>>,
}

impl StubServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().unwrap().clone()
    }
}

type Responder = dyn Fn(&StubRequest) -> Response + Send + Sync;

#[derive(Clone)]
struct StubState {
    respond: Arc<Responder>,
    requests: Arc<Mutex<Vec<StubRequest>>>,
    delay: Duration,
}

pub async fn serve<F>(respond: F) -> StubServer
where
    F: Fn(&StubRequest) -> (u16, String) + Send + Sync + 'static,
{
    serve_slow(Duration::ZERO, respond).await
}

/// Like [`serve`], but waits `delay` before answering each request
pub async fn serve_slow<F>(delay: Duration, respond: F) -> StubServer
where
    F: Fn(&StubRequest) -> (u16, String) + Send + Sync + 'static,
{
    start(delay, move |req| {
        let (status, body) = respond(req);
        let status = StatusCode::from_u16(status).unwrap();
        (status, [(CONTENT_TYPE, "application/json")], body).into_response()
    })
    .await
}

/// Answers `status`, then drops the connection halfway through the body
pub async fn serve_broken_body(status: u16) -> StubServer {
    start(Duration::ZERO, move |_| {
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"{\"partial\":")),
            Err(std::io::Error::other("connection reset")),
        ];
        let body = Body::from_stream(futures::stream::iter(chunks));
        (StatusCode::from_u16(status).unwrap(), body).into_response()
    })
    .await
}

async fn start<F>(delay: Duration, respond: F) -> StubServer
where
    F: Fn(&StubRequest) -> Response + Send + Sync + 'static,
{
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = StubState {
        respond: Arc::new(respond),
        requests: Arc::clone(&requests),
        delay,
    };
    let app = Router::new()
        .fallback(record)
        .layer(DefaultBodyLimit::disable())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    StubServer { base, requests }
}

async fn record(
    State(state): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req = StubRequest {
        method: method.to_string(),
        path: uri
            .path_and_query()
            .map(|p| p.to_string())
            .unwrap_or_else(|| uri.path().to_string()),
        headers: headers
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect(),
        body: body.to_vec(),
    };
    let response = (state.respond)(&req);
    state.requests.lock().unwrap().push(req);
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    response
}
