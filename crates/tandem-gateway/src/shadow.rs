//! Shadow dispatch
//!
//! After the caller has its production answer, the same statement is
//! re-submitted to the shadow engine under an id derived from production's,
//! then drained to completion on a detached task. Outcomes end in a log
//! record and metrics; nothing flows back to the caller.

use crate::metrics;
use crate::presto::{drain_discarding, DrainError, PrestoClient};
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

/// Derives the shadow query id from the production one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShadowIdentity {
    prefix: String,
}

impl ShadowIdentity {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Empty production id yields an empty shadow id (server-assigned submission)
    pub fn derive(&self, prod_query_id: &str) -> String {
        if prod_query_id.is_empty() {
            String::new()
        } else {
            format!("{}{}", self.prefix, prod_query_id)
        }
    }
}

/// Pull the `slug` query parameter out of production's first `nextUri`.
///
/// Relative locations resolve against the production base URL.
pub fn extract_slug(next_uri: Option<&str>, base: &Url) -> Option<String> {
    let next_uri = next_uri?;
    match base.join(next_uri) {
        Ok(url) => url
            .query_pairs()
            .find(|(key, _)| key == "slug")
            .map(|(_, value)| value.into_owned()),
        Err(e) => {
            error!(next_uri = %next_uri, error = %e, "failed to parse production query slug");
            None
        }
    }
}

/// One statement to replay against the shadow engine
pub struct ShadowJob {
    pub client: Arc<PrestoClient>,
    pub statement: String,
    pub headers: HeaderMap,
    pub prod_query_id: String,
    pub shadow_query_id: String,
    pub slug: String,
}

#[derive(Debug)]
pub enum ShadowOutcome {
    Completed {
        latency: Duration,
        pages: usize,
        rows: usize,
        final_state: String,
    },
    SubmitFailed(String),
    DrainFailed(DrainError),
    Cancelled,
}

impl ShadowOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ShadowOutcome::Completed { .. } => "success",
            ShadowOutcome::SubmitFailed(_) => "submit_failed",
            ShadowOutcome::DrainFailed(_) => "drain_failed",
            ShadowOutcome::Cancelled => "cancelled",
        }
    }
}

/// Spawns shadow executions detached from the inbound request.
///
/// Each task runs under a child of the dispatcher's root token, so shutdown
/// can stop outstanding drains while request cancellation cannot.
#[derive(Clone, Default)]
pub struct ShadowDispatcher {
    root: CancellationToken,
}

impl ShadowDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every in-flight and future shadow execution
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// Fire and forget. The handle is only awaited by tests.
    pub fn dispatch(&self, job: ShadowJob) -> JoinHandle<ShadowOutcome> {
        let cancel = self.root.child_token();
        tokio::spawn(run(job, cancel))
    }
}

async fn run(job: ShadowJob, cancel: CancellationToken) -> ShadowOutcome {
    let start = Instant::now();
    metrics::SHADOW_IN_FLIGHT.inc();

    let outcome = execute(&job, cancel).await;

    metrics::SHADOW_IN_FLIGHT.dec();
    metrics::record_shadow_outcome(outcome.label(), start.elapsed().as_secs_f64());
    log_outcome(&job, &outcome);
    outcome
}

async fn execute(job: &ShadowJob, cancel: CancellationToken) -> ShadowOutcome {
    let start = Instant::now();

    let submitted = tokio::select! {
        biased;
        _ = cancel.cancelled() => return ShadowOutcome::Cancelled,
        result = job.client.submit_with_identity(
            &job.statement,
            &job.shadow_query_id,
            &job.slug,
            &job.headers,
        ) => result,
    };

    let response = match submitted {
        Ok(response) => response,
        Err(e) => return ShadowOutcome::SubmitFailed(e.to_string()),
    };
    if let Some(err) = &response.page.error {
        return ShadowOutcome::SubmitFailed(err.to_string());
    }

    match drain_discarding(&job.client, &job.headers, response.page, cancel).await {
        Ok(summary) => ShadowOutcome::Completed {
            latency: start.elapsed(),
            pages: summary.pages_fetched,
            rows: summary.rows,
            final_state: summary.final_state,
        },
        Err(DrainError::Cancelled) => ShadowOutcome::Cancelled,
        Err(e) => ShadowOutcome::DrainFailed(e),
    }
}

fn log_outcome(job: &ShadowJob, outcome: &ShadowOutcome) {
    match outcome {
        ShadowOutcome::Completed {
            latency,
            pages,
            rows,
            final_state,
        } => debug!(
            shadow_query_id = %job.shadow_query_id,
            prod_query_id = %job.prod_query_id,
            latency_ms = latency.as_millis() as u64,
            pages = *pages,
            rows = *rows,
            state = %final_state,
            "shadow query completed"
        ),
        ShadowOutcome::SubmitFailed(e) => error!(
            shadow_query_id = %job.shadow_query_id,
            prod_query_id = %job.prod_query_id,
            stage = "submit",
            error = %e,
            "shadow query failed"
        ),
        ShadowOutcome::DrainFailed(e) => error!(
            shadow_query_id = %job.shadow_query_id,
            prod_query_id = %job.prod_query_id,
            stage = "drain",
            error = %e,
            "failed to drain results for shadow query"
        ),
        ShadowOutcome::Cancelled => warn!(
            shadow_query_id = %job.shadow_query_id,
            prod_query_id = %job.prod_query_id,
            "shadow query abandoned before completion"
        ),
    }
}
