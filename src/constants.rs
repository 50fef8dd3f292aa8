/// Default embedding model requested from the provider.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default OpenAI-compatible API base URL.
pub const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Default table scanned for records missing an embedding.
pub const DEFAULT_TABLE: &str = "articles";

/// ClickHouse HTTP interface port.
pub const DEFAULT_CLICKHOUSE_PORT: u16 = 8123;

/// TCP connect timeout for the store client.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Per-request timeout for store reads and writes.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 300;

/// Per-request timeout for provider calls.
pub const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 30;

/// Seconds between backfill cycle starts.
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Records created longer ago than this are never selected.
pub const DEFAULT_WINDOW_DAYS: u32 = 3;

/// `mutations_sync=1` makes `ALTER TABLE ... UPDATE` return only once applied.
pub const DEFAULT_MUTATIONS_SYNC: u8 = 1;

/// Separator between title and content in the embedded text.
pub const TEXT_SEPARATOR: &str = " ";
