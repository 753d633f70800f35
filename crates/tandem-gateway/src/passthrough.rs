//! Reverse proxy for every endpoint the gateway does not own
//!
//! Requests are replayed against the production authority with the same
//! method, path and query. Redirects are handed back to the caller untouched.
//! The caller's address is appended to `X-Forwarded-For` when the listener
//! recorded it.

use crate::headers;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use std::net::SocketAddr;
use std::time::Duration;
use tandem_common::TandemError;
use tracing::{error, warn};
use url::Url;

/// Request bodies on proxied endpoints are buffered up to this size
const MAX_PASSTHROUGH_BODY_BYTES: usize = 16 << 20;

#[derive(Debug)]
pub struct Passthrough {
    upstream: Url,
    client: reqwest::Client,
}

impl Passthrough {
    pub fn new(
        address: &str,
        insecure_skip_tls_verify: bool,
        connect_timeout: Duration,
    ) -> tandem_common::Result<Self> {
        let upstream = Url::parse(address)
            .map_err(|e| TandemError::ClientBuild(format!("invalid upstream {}: {}", address, e)))?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(connect_timeout)
            .danger_accept_invalid_certs(insecure_skip_tls_verify)
            .build()
            .map_err(|e| TandemError::ClientBuild(e.to_string()))?;

        Ok(Self { upstream, client })
    }

    /// Target URL for an inbound path and query
    fn target(&self, path_and_query: &str) -> Result<Url, url::ParseError> {
        let base = self.upstream.as_str().trim_end_matches('/');
        Url::parse(&format!("{}{}", base, path_and_query))
    }

    pub async fn forward(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let body = match Limited::new(body, MAX_PASSTHROUGH_BODY_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
            }
            Err(e) => {
                warn!(error = %e, "failed to read passthrough request body");
                return (StatusCode::BAD_REQUEST, "invalid request body").into_response();
            }
        };

        match self.try_forward(parts, body).await {
            Ok(response) => response,
            Err(e) => {
                error!(upstream = %self.upstream, error = %e, "Upstream error");
                (StatusCode::BAD_GATEWAY, format!("upstream error: {}", e)).into_response()
            }
        }
    }

    async fn try_forward(&self, parts: Parts, body: Bytes) -> anyhow::Result<Response> {
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let target = self.target(path_and_query)?;

        let mut outbound = headers::passthrough_request_headers(&parts.headers);
        if let Some(ConnectInfo(peer)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            headers::append_forwarded_for(&mut outbound, peer.ip());
        }

        let upstream_response = self
            .client
            .request(parts.method, target)
            .headers(outbound)
            .body(body)
            .send()
            .await?;

        let mut response = Response::builder().status(upstream_response.status());
        if let Some(out) = response.headers_mut() {
            for (name, value) in upstream_response.headers() {
                if !headers::is_hop_by_hop(name) {
                    out.append(name.clone(), value.clone());
                }
            }
        }
        Ok(response.body(Body::from_stream(upstream_response.bytes_stream()))?)
    }
}
