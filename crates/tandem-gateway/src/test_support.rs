//! In-process mock Presto engine for tests
//!
//! Binds an axum router to `127.0.0.1:0`, records every request and answers
//! with whatever the test's responder returns.

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: String,
}

impl RecordedRequest {
    pub fn query_param(&self, key: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

type Responder = dyn Fn(&RecordedRequest, &str) -> (StatusCode, String) + Send + Sync;

#[derive(Clone)]
struct MockState {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    responder: Arc<Responder>,
}

pub struct MockEngine {
    pub url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl MockEngine {
    /// Start an engine whose responder sees the request and the engine's own base URL
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&RecordedRequest, &str) -> (StatusCode, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let state = MockState {
            base_url: url.clone(),
            requests: requests.clone(),
            responder: Arc::new(responder),
        };
        let app = Router::new().fallback(record).with_state(state);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            url,
            requests,
            handle,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Poll until at least `n` requests arrived or `timeout` elapsed
    pub async fn wait_for_requests(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.request_count() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.request_count() >= n
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn record(State(state): State<MockState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, usize::MAX).await.unwrap_or_default();
    let recorded = RecordedRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    };

    let (status, payload) = (state.responder)(&recorded, &state.base_url);
    state.requests.lock().push(recorded);

    (
        status,
        [("content-type", "application/json"), ("x-engine", "mock")],
        Body::from(payload),
    )
        .into_response()
}

/// Compact page envelope with an optional continuation location
pub fn page_json(id: &str, state: &str, next_uri: Option<&str>) -> String {
    match next_uri {
        Some(next) => format!(
            r#"{{"id":"{}","nextUri":"{}","stats":{{"state":"{}"}}}}"#,
            id, next, state
        ),
        None => format!(r#"{{"id":"{}","stats":{{"state":"{}"}}}}"#, id, state),
    }
}

/// Address nothing is listening on
pub async fn unused_local_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}
