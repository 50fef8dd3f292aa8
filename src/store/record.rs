use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::store::codec::deserialize_embedding;

/// Opaque primary key of a row, always carried as text regardless of the column type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Integer keys arrive as JSON numbers, UUID and String keys as strings.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Self(text),
            Raw::Unsigned(n) => Self(n.to_string()),
            Raw::Signed(n) => Self(n.to_string()),
        })
    }
}

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// ClickHouse type of the `id` column, used to bind ids so lookups stay on the primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdColumnType {
    #[default]
    String,
    Uuid,
    UInt32,
    UInt64,
    Int32,
    Int64,
}

impl IdColumnType {
    pub fn as_clickhouse_type(self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Uuid => "UUID",
            Self::UInt32 => "UInt32",
            Self::UInt64 => "UInt64",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
        }
    }
}

impl fmt::Display for IdColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_clickhouse_type())
    }
}

impl FromStr for IdColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "String" => Ok(Self::String),
            "UUID" => Ok(Self::Uuid),
            "UInt32" => Ok(Self::UInt32),
            "UInt64" => Ok(Self::UInt64),
            "Int32" => Ok(Self::Int32),
            "Int64" => Ok(Self::Int64),
            other => Err(format!(
                "unsupported id column type {other:?}, expected String, UUID, UInt32, UInt64, Int32 or Int64"
            )),
        }
    }
}

/// Snapshot of one row as returned by the candidate query.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(default, deserialize_with = "nullable_text")]
    pub title: String,
    #[serde(default, deserialize_with = "nullable_text")]
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "deserialize_embedding")]
    pub embedding: Option<Vec<f32>>,
}

impl Record {
    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|v| !v.is_empty())
    }
}

fn nullable_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
