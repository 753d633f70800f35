//! Drain loop: walk a statement from its first page to a terminal page
//!
//! The loop is an explicit state machine:
//!
//! ```text
//!                 next page has nextUri
//!                +--------------------+
//!                v                    |
//!   page --> AwaitingPage --fetch-->--+--> Terminal   (no nextUri)
//!                |                    +--> Errored    (page error / client error)
//!                +--cancel signal-------> Cancelled
//! ```
//!
//! Cancellation only stops the walk. It never issues a protocol-level
//! `DELETE`; callers that want the engine to stop use
//! [`PrestoClient::cancel`] explicitly.

use super::client::{ClientError, PrestoClient};
use super::results::{QueryError, QueryResults};
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    /// The engine reported the statement failed
    #[error("statement failed: {0}")]
    Statement(QueryError),

    /// A page could not be fetched
    #[error("failed to fetch next page: {0}")]
    Client(#[from] ClientError),

    /// The drain was abandoned before reaching a terminal page
    #[error("drain cancelled before the statement reached a terminal state")]
    Cancelled,
}

#[derive(Debug)]
pub enum DrainState {
    /// The current page has a continuation location still to fetch
    AwaitingPage,
    /// The current page has no continuation location
    Terminal,
    Errored(DrainError),
    Cancelled,
}

impl DrainState {
    /// Decide the state a freshly received page puts the session in.
    ///
    /// A page with an error is terminal even when it carries a `nextUri`.
    pub fn classify(page: &QueryResults) -> Self {
        match (&page.error, &page.next_uri) {
            (Some(err), _) => DrainState::Errored(DrainError::Statement(err.clone())),
            (None, Some(_)) => DrainState::AwaitingPage,
            (None, None) => DrainState::Terminal,
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, DrainState::AwaitingPage)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DrainState::AwaitingPage => "awaiting_page",
            DrainState::Terminal => "terminal",
            DrainState::Errored(_) => "errored",
            DrainState::Cancelled => "cancelled",
        }
    }
}

/// What a completed drain observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainSummary {
    /// Pages fetched after the initial one
    pub pages_fetched: usize,
    pub rows: usize,
    pub final_state: String,
}

/// Per-statement iteration state. Private to the task that drives it.
pub struct DrainSession {
    page: QueryResults,
    state: DrainState,
    pages_fetched: usize,
    rows: usize,
    cancel: CancellationToken,
}

impl DrainSession {
    pub fn new(initial: QueryResults, cancel: CancellationToken) -> Self {
        let state = DrainState::classify(&initial);
        let rows = initial.row_count();
        Self {
            page: initial,
            state,
            pages_fetched: 0,
            rows,
            cancel,
        }
    }

    pub fn state(&self) -> &DrainState {
        &self.state
    }

    pub fn page(&self) -> &QueryResults {
        &self.page
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Perform at most one transition.
    ///
    /// Returns `true` when a new page was received. Final states are sticky.
    pub async fn step(&mut self, client: &PrestoClient, headers: &HeaderMap) -> bool {
        let Some(next_uri) = self.next_location() else {
            return false;
        };

        if self.cancel.is_cancelled() {
            self.state = DrainState::Cancelled;
            return false;
        }

        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = client.fetch_next(&next_uri, headers) => Some(result),
        };

        match fetched {
            None => {
                self.state = DrainState::Cancelled;
                false
            }
            Some(Ok(response)) => {
                self.pages_fetched += 1;
                self.rows += response.page.row_count();
                self.state = DrainState::classify(&response.page);
                self.page = response.page;
                true
            }
            Some(Err(err)) => {
                self.state = DrainState::Errored(DrainError::Client(err));
                false
            }
        }
    }

    fn next_location(&self) -> Option<String> {
        match self.state {
            DrainState::AwaitingPage => self.page.next_uri.clone(),
            _ => None,
        }
    }

    /// Consume the session and report how it ended
    pub fn finish(self) -> Result<DrainSummary, DrainError> {
        match self.state {
            DrainState::Terminal => Ok(DrainSummary {
                pages_fetched: self.pages_fetched,
                rows: self.rows,
                final_state: self.page.state().to_owned(),
            }),
            DrainState::Errored(err) => Err(err),
            // An unfinished session was abandoned by its owner
            DrainState::AwaitingPage | DrainState::Cancelled => Err(DrainError::Cancelled),
        }
    }
}

/// Fetch every remaining page of a statement.
///
/// `on_page` sees each page, the initial one included, before the next is
/// requested. An observer error is logged and the drain carries on.
pub async fn drain<F>(
    client: &PrestoClient,
    headers: &HeaderMap,
    initial: QueryResults,
    cancel: CancellationToken,
    mut on_page: Option<F>,
) -> Result<DrainSummary, DrainError>
where
    F: FnMut(&QueryResults) -> anyhow::Result<()>,
{
    let mut session = DrainSession::new(initial, cancel);
    notify(&mut on_page, session.page());

    while !session.state().is_final() {
        if session.step(client, headers).await {
            notify(&mut on_page, session.page());
        }
    }

    debug!(
        query_id = %session.page().id,
        pages = session.pages_fetched(),
        state = session.state().name(),
        "drain finished"
    );
    session.finish()
}

fn notify<F>(on_page: &mut Option<F>, page: &QueryResults)
where
    F: FnMut(&QueryResults) -> anyhow::Result<()>,
{
    if let Some(observer) = on_page.as_mut() {
        if let Err(e) = observer(page) {
            warn!(query_id = %page.id, error = %e, "page observer failed");
        }
    }
}

/// Drain without an observer; results are discarded.
pub async fn drain_discarding(
    client: &PrestoClient,
    headers: &HeaderMap,
    initial: QueryResults,
    cancel: CancellationToken,
) -> Result<DrainSummary, DrainError> {
    drain::<fn(&QueryResults) -> anyhow::Result<()>>(client, headers, initial, cancel, None).await
}
