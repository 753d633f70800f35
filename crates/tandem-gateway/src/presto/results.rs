//! Result-page envelope of the Presto statement protocol
//!
//! Every call against `/v1/statement` (submit, next page, cancel) answers with
//! the same JSON envelope. Fields the gateway does not look at are kept as
//! opaque JSON so a page can be re-encoded without losing information.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One page of a statement's execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResults {
    /// Engine-assigned query id, stable across all pages of one statement
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_cancel_uri: Option<String>,

    /// Continuation location; absent on the terminal page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<Column>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Vec<serde_json::Value>>>,

    #[serde(default)]
    pub stats: StatementStats,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryError>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_count: Option<i64>,
}

impl QueryResults {
    /// No continuation location means no further pages exist
    pub fn is_terminal(&self) -> bool {
        self.next_uri.is_none()
    }

    pub fn state(&self) -> &str {
        &self.stats.state
    }

    pub fn row_count(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_signature: Option<serde_json::Value>,
}

/// Execution statistics. Only `state` is interpreted; its vocabulary is
/// engine-defined (QUEUED, RUNNING, FINISHED, FAILED, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementStats {
    #[serde(default)]
    pub state: String,

    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

/// Statement-level failure reported inside a page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryError {
    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_state: Option<String>,

    #[serde(default)]
    pub error_code: i64,

    #[serde(default)]
    pub error_name: String,

    #[serde(default)]
    pub error_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_location: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<serde_json::Value>,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error_name.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} ({}): {}", self.error_name, self.error_code, self.message)
        }
    }
}

impl std::error::Error for QueryError {}
