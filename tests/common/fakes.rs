use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use embedding_backfill::services::embedding_provider::{EmbeddingProvider, ProviderError};
use embedding_backfill::store::codec::{decode_embedding, encode_embedding};
use embedding_backfill::store::{
    Record, RecordId, RecordWriter, RowSource, SourceUnavailable, StoreError, WriteError,
};
use embedding_backfill::workers::backfill::BackfillCycle;

#[derive(Debug, Clone)]
struct StoredRow {
    id: RecordId,
    title: String,
    content: String,
    created_at: DateTime<Utc>,
    /// Encoded the way the real store holds it.
    embedding: Option<String>,
}

/// Table in memory that applies the same selection predicate as the real candidate query.
pub struct InMemoryStore {
    rows: Mutex<Vec<StoredRow>>,
    window: Duration,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fetches: AtomicUsize,
    writes: Mutex<Vec<RecordId>>,
    delete_before_write: Mutex<HashSet<RecordId>>,
}

impl InMemoryStore {
    pub fn new(window_days: i64) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            window: Duration::days(window_days),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
            delete_before_write: Mutex::new(HashSet::new()),
        }
    }

    pub fn insert(&self, id: &str, title: &str, content: &str, embedding: Option<Vec<f32>>) {
        self.insert_at(id, title, content, Utc::now(), embedding);
    }

    pub fn insert_at(
        &self,
        id: &str,
        title: &str,
        content: &str,
        created_at: DateTime<Utc>,
        embedding: Option<Vec<f32>>,
    ) {
        let embedding = embedding.map(|v| encode_embedding(&v).expect("encode seed embedding"));
        self.rows.lock().unwrap().push(StoredRow {
            id: RecordId::from(id),
            title: title.to_string(),
            content: content.to_string(),
            created_at,
            embedding,
        });
    }

    pub fn embedding_of(&self, id: &str) -> Option<Vec<f32>> {
        let rows = self.rows.lock().unwrap();
        let row = rows.iter().find(|r| r.id.as_str() == id)?;
        row.embedding
            .as_deref()
            .map(|text| decode_embedding(text).expect("decode stored embedding"))
    }

    pub fn title_of(&self, id: &str) -> Option<String> {
        let rows = self.rows.lock().unwrap();
        rows.iter().find(|r| r.id.as_str() == id).map(|r| r.title.clone())
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Remove the row between selection and write-back.
    pub fn delete_before_write(&self, id: &str) {
        self.delete_before_write
            .lock()
            .unwrap()
            .insert(RecordId::from(id));
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn written_ids(&self) -> Vec<RecordId> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RowSource for InMemoryStore {
    async fn fetch_candidates(&self) -> Result<Vec<Record>, SourceUnavailable> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SourceUnavailable(StoreError::Server {
                status: 503,
                message: "connection refused".to_string(),
            }));
        }
        let cutoff = Utc::now() - self.window;
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|r| r.embedding.is_none() && r.created_at >= cutoff)
            .map(|r| Record {
                id: r.id.clone(),
                title: r.title.clone(),
                content: r.content.clone(),
                created_at: r.created_at,
                embedding: None,
            })
            .collect())
    }
}

#[async_trait]
impl RecordWriter for InMemoryStore {
    async fn write_embedding(&self, record_id: &RecordId, vector: &[f32]) -> Result<(), WriteError> {
        let encoded = encode_embedding(vector)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(WriteError::Store(StoreError::Server {
                status: 500,
                message: "Code: 241. Memory limit exceeded".to_string(),
            }));
        }
        if self.delete_before_write.lock().unwrap().contains(record_id) {
            self.rows.lock().unwrap().retain(|r| &r.id != record_id);
        }
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| &r.id == record_id)
            .ok_or_else(|| WriteError::NotFound {
                record_id: record_id.clone(),
            })?;
        row.embedding = Some(encoded);
        self.writes.lock().unwrap().push(record_id.clone());
        Ok(())
    }
}

/// Provider returning a deterministic vector per text, with per-text scripted failures.
#[derive(Default)]
pub struct ScriptedProvider {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    non_finite: AtomicBool,
}

impl ScriptedProvider {
    pub fn vector_for(text: &str) -> Vec<f32> {
        vec![text.len() as f32, 0.1, -0.25, 1.0 / 3.0]
    }

    pub fn fail_on(&self, text: &str) {
        self.failing.lock().unwrap().insert(text.to_string());
    }

    pub fn recover(&self, text: &str) {
        self.failing.lock().unwrap().remove(text);
    }

    pub fn return_non_finite(&self) {
        self.non_finite.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.lock().unwrap().push(text.to_string());
        if self.failing.lock().unwrap().contains(text) {
            return Err(ProviderError::Network("connection reset by peer".to_string()));
        }
        if self.non_finite.load(Ordering::SeqCst) {
            return Ok(vec![f32::NAN]);
        }
        Ok(Self::vector_for(text))
    }
}

/// Provider whose every call panics, standing in for a bug below the cycle.
#[derive(Default)]
pub struct PanickingProvider {
    calls: AtomicUsize,
}

impl PanickingProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for PanickingProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("embedding provider bug");
    }
}

/// Source that takes `delay` per fetch and records how many fetches overlap.
pub struct SlowSource {
    delay: StdDuration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    fetches: AtomicUsize,
    completed: AtomicUsize,
}

impl SlowSource {
    pub fn new(delay: StdDuration) -> Self {
        Self {
            delay,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RowSource for SlowSource {
    async fn fetch_candidates(&self) -> Result<Vec<Record>, SourceUnavailable> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Record {
            id: RecordId::from("slow-1"),
            title: "slow".to_string(),
            content: String::new(),
            created_at: Utc::now(),
            embedding: None,
        }])
    }
}

pub fn cycle_over(store: &Arc<InMemoryStore>, provider: &Arc<ScriptedProvider>) -> BackfillCycle {
    BackfillCycle::new(store.clone(), provider.clone(), store.clone())
}
