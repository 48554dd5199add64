//! Query execution boundary
//!
//! The pipeline treats the data system as an opaque executor: submit a
//! query, get back ordered rows of named fields or a failure whose message
//! is fed verbatim into the next generation attempt. The HTTP client here
//! targets a generic query service; warehouse-specific semantics live on
//! the other side of the endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::WarehouseSettings;
use crate::error::ExecutorError;
use crate::types::TableResult;

/// Trait for query execution backends.
///
/// Implementations must be safe for concurrent calls; the pipeline shares
/// one executor across all in-flight attempts.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a query and return its tabular result.
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError` on transport failures, engine-side query
    /// failures, and timeouts. `ExecutorError::Query` carries the engine's
    /// message verbatim.
    async fn run_query(&self, sql: &str) -> Result<TableResult, ExecutorError>;
}

/// HTTP client for a query service accepting `{"query": ...}` and
/// returning `{"columns": [...], "rows": [[...]]}`.
pub struct HttpWarehouse {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpWarehouse {
    /// Create a client from configuration.
    ///
    /// # Errors
    /// Returns `ExecutorError::Transport` if the HTTP client cannot be
    /// constructed.
    pub fn from_settings(settings: &WarehouseSettings) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| ExecutorError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        })
    }
}

#[async_trait]
impl QueryExecutor for HttpWarehouse {
    async fn run_query(&self, sql: &str) -> Result<TableResult, ExecutorError> {
        debug!(
            endpoint = %self.endpoint,
            query_chars = sql.len(),
            "submitting query"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&QueryRequest { query: sql })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ExecutorError::Timeout {
                        duration: self.timeout,
                    }
                } else {
                    ExecutorError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if status.is_client_error() {
            // The engine rejected the query; its message becomes the next
            // generation attempt's context.
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Query(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Transport(format!(
                "query service returned status {status}: {body}"
            )));
        }

        let payload: QueryResponse = response.json().await.map_err(|err| {
            ExecutorError::Transport(format!("failed to parse query response: {err}"))
        })?;
        Ok(TableResult {
            columns: payload.columns,
            rows: payload.rows,
        })
    }
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<serde_json::Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_response_decodes() {
        let body = r#"{
            "columns": ["step3_users", "step4_users", "transition_rate"],
            "rows": [[1200, 480, 0.4], [300, 90, 0.3]]
        }"#;
        let parsed: QueryResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.columns.len(), 3);
        assert_eq!(parsed.rows.len(), 2);
    }

    #[test]
    fn rows_default_to_empty() {
        let parsed: QueryResponse = serde_json::from_str(r#"{"columns": ["a"]}"#).unwrap();
        assert!(parsed.rows.is_empty());
    }
}
