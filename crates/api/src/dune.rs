//! Dune analytics API client for borrower address discovery.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::discovery::QueryApi;
use crate::error::DiscoveryError;

/// Header carrying the API key.
const API_KEY_HEADER: &str = "x-dune-api-key";

/// Dune API client.
#[derive(Debug, Clone)]
pub struct DuneClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl DuneClient {
    /// Create a new client against the public API.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, "https://api.dune.com/api/v1")
    }

    /// Create a client with custom base URL.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// `{base}/{module}/{id}/{action}`
    fn api_url(&self, module: &str, id: &str, action: &str) -> String {
        format!("{}/{}/{}/{}", self.base_url, module, id, action)
    }
}

#[async_trait]
impl QueryApi for DuneClient {
    #[instrument(skip(self))]
    async fn execute(&self, query_id: u64, performance: &str) -> Result<String, DiscoveryError> {
        let url = self.api_url("query", &query_id.to_string(), "execute");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("performance", performance)])
            .send()
            .await?
            .error_for_status()?;

        let data: ExecuteResponse = response.json().await?;
        debug!(execution_id = %data.execution_id, "Query execution submitted");

        Ok(data.execution_id)
    }

    async fn results(&self, execution_id: &str) -> Result<ExecutionResults, DiscoveryError> {
        let url = self.api_url("execution", execution_id, "results");

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    #[instrument(skip(self))]
    async fn cancel(&self, execution_id: &str) -> Result<(), DiscoveryError> {
        let url = self.api_url("execution", execution_id, "cancel");

        self.client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    execution_id: String,
}

/// Execution lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ExecutionState {
    #[serde(rename = "QUERY_STATE_PENDING")]
    Pending,
    #[serde(rename = "QUERY_STATE_EXECUTING")]
    Executing,
    #[serde(rename = "QUERY_STATE_COMPLETED")]
    Completed,
    /// Finished with a truncated result set
    #[serde(rename = "QUERY_STATE_COMPLETED_PARTIAL")]
    CompletedPartial,
    #[serde(rename = "QUERY_STATE_FAILED")]
    Failed,
    #[serde(rename = "QUERY_STATE_CANCELLED")]
    Cancelled,
    #[serde(rename = "QUERY_STATE_EXPIRED")]
    Expired,
    #[serde(other)]
    Unknown,
}

impl ExecutionState {
    /// Terminal states that will never produce a complete row set.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::CompletedPartial | Self::Failed | Self::Cancelled | Self::Expired
        )
    }
}

/// Results endpoint payload. `result` is only present once completed.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionResults {
    pub execution_id: String,
    pub state: ExecutionState,
    #[serde(default)]
    pub result: Option<ResultSet>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultSet {
    #[serde(default)]
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

impl ExecutionResults {
    /// String values of `column` across all rows. Rows without a string in
    /// that column are skipped.
    pub fn column_strings(&self, column: &str) -> Result<Vec<String>, DiscoveryError> {
        let result = self
            .result
            .as_ref()
            .ok_or_else(|| DiscoveryError::MissingResult(self.execution_id.clone()))?;

        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.get(column).and_then(|v| v.as_str()))
            .map(str::to_string)
            .collect())
    }
}
