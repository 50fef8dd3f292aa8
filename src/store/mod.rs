pub mod codec;
pub mod record;
pub mod source;
pub mod writer;

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::{BackfillConfig, StoreConfig};
use crate::store::codec::EmbeddingColumnType;

pub use record::{IdColumnType, Record, RecordId};
pub use source::{RowSource, SourceUnavailable};
pub use writer::{RecordWriter, WriteError};

/// Settings sent with every read so rows decode the same way on any server profile.
const READ_SETTINGS: &[(&str, &str)] = &[
    ("date_time_output_format", "iso"),
    ("output_format_json_quote_64bit_integers", "0"),
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store returned status {status}: {message}")]
    Server { status: u16, message: String },
    #[error("failed to decode store response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid store configuration: {0}")]
    Config(String),
}

/// Which rows the candidate query may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSelection {
    pub window_days: u32,
    pub max_candidates: Option<u64>,
}

impl From<&BackfillConfig> for CandidateSelection {
    fn from(config: &BackfillConfig) -> Self {
        Self {
            window_days: config.window_days,
            max_candidates: config.max_candidates,
        }
    }
}

/// ClickHouse table accessed over the HTTP interface.
///
/// Serves as both the row source and the record writer for the backfill cycle.
#[derive(Debug, Clone)]
pub struct ClickHouseStore {
    client: reqwest::Client,
    endpoint: String,
    database: String,
    table: String,
    id_type: IdColumnType,
    embedding_type: EmbeddingColumnType,
    mutations_sync: u8,
    selection: CandidateSelection,
}

impl ClickHouseStore {
    pub fn new(config: &StoreConfig, selection: CandidateSelection) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-ClickHouse-User",
            HeaderValue::from_str(&config.username)
                .map_err(|_| StoreError::Config("username is not a valid header value".into()))?,
        );
        let mut key = HeaderValue::from_str(&config.password)
            .map_err(|_| StoreError::Config("password is not a valid header value".into()))?;
        key.set_sensitive(true);
        headers.insert("X-ClickHouse-Key", key);

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.query_timeout_secs))
            .default_headers(headers)
            .build()?;

        let scheme = if config.secure { "https" } else { "http" };
        Ok(Self {
            client,
            endpoint: format!("{scheme}://{}:{}/", config.host, config.port),
            database: config.database.clone(),
            table: config.table.clone(),
            id_type: config.id_type,
            embedding_type: config.embedding_type,
            mutations_sync: config.mutations_sync,
            selection,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn selection(&self) -> CandidateSelection {
        self.selection
    }

    /// Round-trip a trivial query. Used at startup to surface connectivity problems early.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.send("SELECT 1", &[], &[]).await.map(|_| ())
    }

    /// Run a `FORMAT JSONEachRow` query and decode one `T` per line.
    pub(crate) async fn query_rows<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let body = self.send(sql, params, READ_SETTINGS).await?;
        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StoreError::from))
            .collect()
    }

    /// Like [`Self::query_rows`], but a line that fails to decode is logged and skipped
    /// instead of failing the whole read.
    pub(crate) async fn query_rows_skipping_invalid<T: DeserializeOwned>(
        &self,
        sql: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let body = self.send(sql, params, READ_SETTINGS).await?;
        let mut rows = Vec::new();
        for (index, line) in body.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(row) => rows.push(row),
                Err(e) => tracing::warn!(
                    table = %self.table,
                    line = index + 1,
                    error = %e,
                    "Skipping row that failed to decode"
                ),
            }
        }
        Ok(rows)
    }

    /// Run a statement whose response body carries no rows.
    pub(crate) async fn execute(
        &self,
        sql: &str,
        params: &[(&str, String)],
        settings: &[(&str, &str)],
    ) -> Result<(), StoreError> {
        self.send(sql, params, settings).await.map(|_| ())
    }

    async fn send(
        &self,
        sql: &str,
        params: &[(&str, String)],
        settings: &[(&str, &str)],
    ) -> Result<String, StoreError> {
        let mut query: Vec<(String, String)> = Vec::with_capacity(1 + params.len() + settings.len());
        query.push(("database".to_string(), self.database.clone()));
        query.extend(
            params
                .iter()
                .map(|(name, value)| (format!("param_{name}"), value.clone())),
        );
        query.extend(
            settings
                .iter()
                .map(|(name, value)| ((*name).to_string(), (*value).to_string())),
        );

        let response = self
            .client
            .post(&self.endpoint)
            .query(&query)
            .body(sql.to_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Server {
                status: status.as_u16(),
                message: body.trim().to_string(),
            });
        }
        Ok(body)
    }
}
