use async_trait::async_trait;
use serde::Deserialize;

use crate::store::codec::{encode_embedding, CodecError};
use crate::store::{ClickHouseStore, RecordId, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("record {record_id} not found")]
    NotFound { record_id: RecordId },
    #[error("failed to serialize embedding: {0}")]
    Serialization(#[from] CodecError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persists a computed embedding onto its record.
#[async_trait]
pub trait RecordWriter: Send + Sync {
    /// Set only the embedding of `record_id`. Writing the same vector twice leaves the same state.
    async fn write_embedding(&self, record_id: &RecordId, vector: &[f32]) -> Result<(), WriteError>;
}

#[derive(Debug, Deserialize)]
struct CountRow {
    n: u64,
}

impl ClickHouseStore {
    async fn record_exists(&self, record_id: &RecordId) -> Result<bool, StoreError> {
        let sql = format!(
            "SELECT count() AS n FROM {} WHERE id = {{id:{}}} FORMAT JSONEachRow",
            self.table(),
            self.id_type.as_clickhouse_type(),
        );
        let rows: Vec<CountRow> = self
            .query_rows(&sql, &[("id", record_id.to_string())])
            .await?;
        Ok(rows.first().is_some_and(|row| row.n > 0))
    }
}

#[async_trait]
impl RecordWriter for ClickHouseStore {
    async fn write_embedding(&self, record_id: &RecordId, vector: &[f32]) -> Result<(), WriteError> {
        let encoded = encode_embedding(vector)?;

        if !self.record_exists(record_id).await? {
            return Err(WriteError::NotFound {
                record_id: record_id.clone(),
            });
        }

        let sql = format!(
            "ALTER TABLE {} UPDATE embedding = {{embedding:{}}} WHERE id = {{id:{}}}",
            self.table(),
            self.embedding_type.as_clickhouse_type(),
            self.id_type.as_clickhouse_type(),
        );
        let mutations_sync = self.mutations_sync.to_string();
        self.execute(
            &sql,
            &[("embedding", encoded), ("id", record_id.to_string())],
            &[("mutations_sync", mutations_sync.as_str())],
        )
        .await?;

        tracing::debug!(record_id = %record_id, dims = vector.len(), "Embedding written");
        Ok(())
    }
}
