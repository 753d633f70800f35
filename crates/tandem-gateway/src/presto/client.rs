//! HTTP client for the Presto statement protocol
//!
//! The client performs the four request shapes of the protocol against one
//! engine and parses the shared response envelope. It keeps no per-statement
//! state: pagination lives in [`crate::presto::drain::DrainSession`].
//!
//! A page that carries a statement error is returned as `Ok`; only transport
//! failures and responses that are not a result page come back as `Err`.
//! Nothing is retried here.

use super::results::QueryResults;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use std::time::Duration;
use tandem_common::TandemError;
use tracing::debug;
use url::Url;

const STATEMENT_PATH: &str = "v1/statement";

/// One complete engine exchange: the raw HTTP response plus its parsed page.
///
/// `body` is kept verbatim so the production path can forward it unchanged.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub page: QueryResults,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// DNS, connect, timeout, or malformed HTTP
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid location {location:?}: {reason}")]
    InvalidLocation { location: String, reason: String },

    /// The engine answered, but not with a result page
    #[error("engine returned a non-page response (status {status}): {source}")]
    Decode {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        #[source]
        source: serde_json::Error,
    },
}

/// Client bound to one engine endpoint
#[derive(Debug)]
pub struct PrestoClient {
    base: Url,
    http: reqwest::Client,
}

impl PrestoClient {
    /// Build a client for `address` (already normalized by the config layer).
    ///
    /// `insecure_skip_tls_verify` disables certificate verification toward
    /// this engine.
    pub fn new(
        address: &str,
        insecure_skip_tls_verify: bool,
        connect_timeout: Duration,
    ) -> tandem_common::Result<Self> {
        let mut base = Url::parse(address)
            .map_err(|e| TandemError::ClientBuild(format!("invalid engine address {}: {}", address, e)))?;
        if base.cannot_be_a_base() {
            return Err(TandemError::ClientBuild(format!(
                "engine address {} cannot be used as a base URL",
                address
            )));
        }
        // Relative joins must append to the base path, not replace its last segment
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        // No overall request timeout: the engine paces long polls itself.
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .danger_accept_invalid_certs(insecure_skip_tls_verify)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| TandemError::ClientBuild(e.to_string()))?;

        Ok(Self { base, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// POST a statement; the engine assigns the query id.
    pub async fn submit(
        &self,
        statement: &str,
        headers: &HeaderMap,
    ) -> Result<PageResponse, ClientError> {
        let url = self.resolve(STATEMENT_PATH)?;
        self.request_page(Method::POST, url, Some(statement), headers).await
    }

    /// PUT a statement under a pre-minted query id.
    ///
    /// `slug` authorizes the engine to accept the client-chosen id once. An
    /// empty `query_id` falls back to [`PrestoClient::submit`].
    pub async fn submit_with_identity(
        &self,
        statement: &str,
        query_id: &str,
        slug: &str,
        headers: &HeaderMap,
    ) -> Result<PageResponse, ClientError> {
        if query_id.is_empty() {
            return self.submit(statement, headers).await;
        }

        let mut url = self.resolve(STATEMENT_PATH)?;
        let location = url.to_string();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidLocation {
                location,
                reason: "cannot append query id".into(),
            })?
            .pop_if_empty()
            .push(query_id);
        url.query_pairs_mut().append_pair("slug", slug);

        self.request_page(Method::PUT, url, Some(statement), headers).await
    }

    /// GET the engine-supplied continuation location.
    pub async fn fetch_next(
        &self,
        next_uri: &str,
        headers: &HeaderMap,
    ) -> Result<PageResponse, ClientError> {
        let url = self.resolve(next_uri)?;
        self.request_page(Method::GET, url, None, headers).await
    }

    /// DELETE the continuation location to end the statement early.
    ///
    /// Shadow drains stop by dropping the poll, not through this call.
    #[allow(dead_code)]
    pub async fn cancel(
        &self,
        next_uri: &str,
        headers: &HeaderMap,
    ) -> Result<PageResponse, ClientError> {
        let url = self.resolve(next_uri)?;
        self.request_page(Method::DELETE, url, None, headers).await
    }

    /// Absolute locations are used verbatim; relative ones resolve against the base.
    fn resolve(&self, location: &str) -> Result<Url, ClientError> {
        self.base
            .join(location)
            .map_err(|e| ClientError::InvalidLocation {
                location: location.to_string(),
                reason: e.to_string(),
            })
    }

    async fn request_page(
        &self,
        method: Method,
        url: Url,
        statement: Option<&str>,
        headers: &HeaderMap,
    ) -> Result<PageResponse, ClientError> {
        debug!(method = %method, url = %url, "presto request");

        let mut request = self.http.request(method, url).headers(headers.clone());
        if let Some(sql) = statement {
            request = request.body(sql.to_owned());
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        match serde_json::from_slice::<QueryResults>(&body) {
            Ok(page) => {
                debug!(
                    status = status.as_u16(),
                    query_id = %page.id,
                    state = %page.state(),
                    terminal = page.is_terminal(),
                    "presto response"
                );
                Ok(PageResponse {
                    status,
                    headers,
                    body,
                    page,
                })
            }
            Err(source) => Err(ClientError::Decode {
                status,
                headers,
                body,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{page_json, MockEngine};
    use axum::http::StatusCode as HttpStatus;
    use reqwest::header::HeaderValue;

    fn client_for(engine: &MockEngine) -> PrestoClient {
        PrestoClient::new(&engine.url, false, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_submit_posts_statement() {
        let engine = MockEngine::start(|_, _| {
            (HttpStatus::OK, page_json("Q1", "QUEUED", None))
        })
        .await;
        let client = client_for(&engine);

        let mut headers = HeaderMap::new();
        headers.insert("x-presto-user", HeaderValue::from_static("alice"));
        let resp = client.submit("SELECT 1", &headers).await.unwrap();

        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.page.id, "Q1");
        assert_eq!(resp.body, Bytes::from(page_json("Q1", "QUEUED", None)));

        let requests = engine.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::POST);
        assert_eq!(requests[0].path, "/v1/statement");
        assert_eq!(requests[0].body, "SELECT 1");
        assert_eq!(requests[0].headers.get("x-presto-user").unwrap(), "alice");
    }

    #[tokio::test]
    async fn test_submit_with_identity_puts_to_query_path() {
        let engine = MockEngine::start(|_, _| {
            (HttpStatus::OK, page_json("Q1", "QUEUED", None))
        })
        .await;
        let client = client_for(&engine);

        client
            .submit_with_identity("SELECT 1", "Q1", "s3cr3t", &HeaderMap::new())
            .await
            .unwrap();

        let requests = engine.requests();
        assert_eq!(requests[0].method, Method::PUT);
        assert_eq!(requests[0].path, "/v1/statement/Q1");
        assert_eq!(requests[0].query_param("slug").as_deref(), Some("s3cr3t"));
    }

    #[tokio::test]
    async fn test_submit_with_empty_identity_degrades_to_submit() {
        let engine = MockEngine::start(|_, _| {
            (HttpStatus::OK, page_json("S1", "QUEUED", None))
        })
        .await;
        let client = client_for(&engine);

        client
            .submit_with_identity("SELECT 1", "", "ignored", &HeaderMap::new())
            .await
            .unwrap();

        let requests = engine.requests();
        assert_eq!(requests[0].method, Method::POST);
        assert_eq!(requests[0].path, "/v1/statement");
        assert!(requests[0].query.is_none());
    }

    #[tokio::test]
    async fn test_fetch_next_and_cancel_use_location_verbatim() {
        let engine = MockEngine::start(|_, _| {
            (HttpStatus::OK, page_json("Q1", "RUNNING", None))
        })
        .await;
        let client = client_for(&engine);

        let absolute = format!("{}/v1/statement/executing/Q1/abc/2?extra=1", engine.url);
        client.fetch_next(&absolute, &HeaderMap::new()).await.unwrap();
        client
            .cancel("/v1/statement/executing/Q1/abc/3", &HeaderMap::new())
            .await
            .unwrap();

        let requests = engine.requests();
        assert_eq!(requests[0].method, Method::GET);
        assert_eq!(requests[0].path, "/v1/statement/executing/Q1/abc/2");
        assert_eq!(requests[0].query.as_deref(), Some("extra=1"));
        assert_eq!(requests[1].method, Method::DELETE);
        assert_eq!(requests[1].path, "/v1/statement/executing/Q1/abc/3");
    }

    #[tokio::test]
    async fn test_statement_error_is_returned_as_page() {
        let engine = MockEngine::start(|_, _| {
            (
                HttpStatus::OK,
                r#"{"id":"Q9","stats":{"state":"FAILED"},"error":{"message":"boom","errorName":"GENERIC_USER_ERROR"}}"#
                    .to_string(),
            )
        })
        .await;
        let client = client_for(&engine);

        let resp = client.submit("SELEC 1", &HeaderMap::new()).await.unwrap();
        assert_eq!(resp.page.error.unwrap().message, "boom");
    }

    #[tokio::test]
    async fn test_non_page_body_is_a_decode_error() {
        let engine = MockEngine::start(|_, _| {
            (HttpStatus::SERVICE_UNAVAILABLE, "<html>down</html>".to_string())
        })
        .await;
        let client = client_for(&engine);

        match client.submit("SELECT 1", &HeaderMap::new()).await {
            Err(ClientError::Decode { status, body, .. }) => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, Bytes::from_static(b"<html>down</html>"));
            }
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_a_transport_error() {
        let url = crate::test_support::unused_local_url().await;
        let client = PrestoClient::new(&url, false, Duration::from_secs(1)).unwrap();
        let err = client.submit("SELECT 1", &HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[test]
    fn test_base_path_is_preserved() {
        let client = PrestoClient::new("http://gateway/presto", true, Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url().as_str(), "http://gateway/presto/");
        assert_eq!(
            client.resolve(STATEMENT_PATH).unwrap().as_str(),
            "http://gateway/presto/v1/statement"
        );
    }
}
