use async_trait::async_trait;

use crate::store::{ClickHouseStore, Record, StoreError};

/// The candidate query could not be answered (transport or server failure). The cycle treats this like "no candidates".
#[derive(Debug, thiserror::Error)]
#[error("source unavailable: {0}")]
pub struct SourceUnavailable(#[from] pub StoreError);

/// Supplies records that still need an embedding.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Records with an absent or empty embedding created inside the recency window.
    /// An empty `Vec` means nothing matched.
    async fn fetch_candidates(&self) -> Result<Vec<Record>, SourceUnavailable>;
}

impl ClickHouseStore {
    pub(crate) fn candidate_query(&self) -> (String, Vec<(&'static str, String)>) {
        let selection = self.selection();
        let mut params = vec![("window_days", selection.window_days.to_string())];
        let limit = match selection.max_candidates {
            Some(limit) => {
                params.push(("limit", limit.to_string()));
                "\nLIMIT {limit:UInt64}"
            }
            None => "",
        };
        let sql = format!(
            "SELECT id, title, content, created_at, embedding\n\
             FROM {table}\n\
             WHERE (embedding IS NULL OR empty(embedding))\n\
             AND created_at >= now() - toIntervalDay({{window_days:UInt32}})\n\
             ORDER BY created_at{limit}\n\
             FORMAT JSONEachRow",
            table = self.table(),
        );
        (sql, params)
    }
}

#[async_trait]
impl RowSource for ClickHouseStore {
    async fn fetch_candidates(&self) -> Result<Vec<Record>, SourceUnavailable> {
        let (sql, params) = self.candidate_query();
        let records: Vec<Record> = self.query_rows_skipping_invalid(&sql, &params).await?;
        tracing::debug!(count = records.len(), table = self.table(), "Fetched candidate rows");
        Ok(records)
    }
}
