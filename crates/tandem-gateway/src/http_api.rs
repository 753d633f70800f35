//! HTTP surface of the gateway
//!
//! `POST /v1/statement` is answered from production and mirrored to the
//! shadow engine. The configuration and metrics routes belong to the gateway;
//! everything else is proxied to production unchanged.

use crate::headers;
use crate::metrics;
use crate::presto::{ClientError, PageResponse};
use crate::shadow::{extract_slug, ShadowDispatcher, ShadowJob};
use crate::state::RuntimeState;
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde::Serialize;
use std::sync::Arc;
use tandem_common::TandemError;
use tower_http::compression::CompressionLayer;
use tracing::{error, info, warn};

/// Largest statement body accepted on `POST /v1/statement`
pub const MAX_STATEMENT_BODY_BYTES: usize = 1 << 20;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeState>,
    pub dispatcher: ShadowDispatcher,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/statement",
            post(handle_statement)
                .layer(CompressionLayer::new())
                .fallback(passthrough),
        )
        .route("/proxy/config", get(get_config).patch(patch_config))
        .route("/metrics", get(prometheus_metrics))
        .fallback(passthrough)
        .with_state(state)
}

/// Submit a statement to production, answer the caller, then shadow it.
pub async fn handle_statement(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let snapshot = state.runtime.load();

    let statement = match read_statement(body).await {
        Ok(statement) => statement,
        Err(response) => return response,
    };

    let outbound = headers::outbound_headers(&headers);

    let (response, prod_query_id, slug) =
        match snapshot.production.submit(&statement, &outbound).await {
            Ok(page_response) => {
                if let Some(err) = &page_response.page.error {
                    info!(prod_query_id = %page_response.page.id, error = %err, "production statement failed");
                    metrics::record_statement("statement_error");
                } else {
                    metrics::record_statement("ok");
                }
                let slug = extract_slug(
                    page_response.page.next_uri.as_deref(),
                    snapshot.production.base_url(),
                );
                let prod_query_id = page_response.page.id.clone();
                (forward_page(page_response), prod_query_id, slug)
            }
            Err(ClientError::Decode {
                status,
                headers,
                body,
                source,
            }) => {
                warn!(status = status.as_u16(), error = %source, "production returned a non-page response");
                metrics::record_statement("unparsed");
                (forward_raw(status, &headers, body), String::new(), None)
            }
            Err(e) => {
                error!(error = %e, "production query failed");
                metrics::record_statement("transport_error");
                (
                    error_response(StatusCode::BAD_GATEWAY, e.to_string()),
                    String::new(),
                    None,
                )
            }
        };

    if let Some(shadow) = &snapshot.shadow {
        let shadow_query_id = snapshot.identity.derive(&prod_query_id);
        state.dispatcher.dispatch(ShadowJob {
            client: shadow.clone(),
            statement,
            headers: outbound,
            prod_query_id,
            shadow_query_id,
            slug: slug.unwrap_or_default(),
        });
    }

    response
}

/// Read the statement text, bounded by [`MAX_STATEMENT_BODY_BYTES`]
async fn read_statement(body: Body) -> Result<String, Response> {
    let bytes = match Limited::new(body, MAX_STATEMENT_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return Err(error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "statement body too large",
            ));
        }
        Err(e) => {
            warn!(error = %e, "failed to read statement body");
            return Err(error_response(StatusCode::BAD_REQUEST, "invalid request body"));
        }
    };

    String::from_utf8(bytes.to_vec())
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "invalid request body"))
}

fn forward_page(page_response: PageResponse) -> Response {
    forward_raw(page_response.status, &page_response.headers, page_response.body)
}

/// Engine status, headers and body, unchanged
fn forward_raw(status: StatusCode, engine_headers: &HeaderMap, body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    headers::copy_response_headers(engine_headers, response.headers_mut());
    response
}

/// Current published configuration
pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.runtime.load().config.clone())
}

/// Partial configuration update; nothing changes unless the result validates
pub async fn patch_config(State(state): State<AppState>, body: Bytes) -> Response {
    let patch: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            metrics::record_config_reload("rejected");
            return error_response(StatusCode::BAD_REQUEST, "invalid config format");
        }
    };

    match state.runtime.patch(patch) {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot.config.clone())).into_response(),
        Err(e) if e.is_validation() => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(TandemError::SerializationError(_)) => {
            error_response(StatusCode::BAD_REQUEST, "invalid config format")
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

/// Prometheus metrics endpoint
pub async fn prometheus_metrics() -> impl IntoResponse {
    let body = metrics::encode_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        body,
    )
}

/// Everything the gateway does not own goes to production
pub async fn passthrough(State(state): State<AppState>, request: Request) -> Response {
    let snapshot = state.runtime.load();
    snapshot.passthrough.forward(request).await
}
