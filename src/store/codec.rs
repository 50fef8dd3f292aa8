//! Embedding vector encoding for the store.
//!
//! Every supported column type accepts the same wire text: a JSON array of the
//! vector's `f32` components. `serde_json` writes the shortest representation that
//! parses back to the identical `f32`, so encode and decode are lossless.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

/// ClickHouse type of the `embedding` column, used as the query parameter type on writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingColumnType {
    #[default]
    Float32Array,
    Float64Array,
    /// JSON text in a `String` column.
    JsonString,
}

impl EmbeddingColumnType {
    pub fn as_clickhouse_type(self) -> &'static str {
        match self {
            Self::Float32Array => "Array(Float32)",
            Self::Float64Array => "Array(Float64)",
            Self::JsonString => "String",
        }
    }
}

impl fmt::Display for EmbeddingColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_clickhouse_type())
    }
}

impl FromStr for EmbeddingColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Array(Float32)" => Ok(Self::Float32Array),
            "Array(Float64)" => Ok(Self::Float64Array),
            "String" => Ok(Self::JsonString),
            other => Err(format!(
                "unsupported embedding column type {other:?}, expected Array(Float32), Array(Float64) or String"
            )),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("embedding is empty")]
    Empty,
    #[error("embedding component {index} is not finite")]
    NonFinite { index: usize },
    #[error("embedding json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn encode_embedding(vector: &[f32]) -> Result<String, CodecError> {
    if vector.is_empty() {
        return Err(CodecError::Empty);
    }
    // serde_json renders NaN and infinities as `null`, which would not read back.
    if let Some(index) = vector.iter().position(|v| !v.is_finite()) {
        return Err(CodecError::NonFinite { index });
    }
    Ok(serde_json::to_string(vector)?)
}

pub fn decode_embedding(text: &str) -> Result<Vec<f32>, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Reads an embedding cell that may be `null`, an array, or a string holding an array.
/// Absent and empty values both map to `None`.
pub fn deserialize_embedding<'de, D>(deserializer: D) -> Result<Option<Vec<f32>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    let vector = match raw {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::String(text)) if text.trim().is_empty() => return Ok(None),
        Some(serde_json::Value::String(text)) => {
            decode_embedding(&text).map_err(serde::de::Error::custom)?
        }
        Some(value) => serde_json::from_value::<Vec<f32>>(value).map_err(serde::de::Error::custom)?,
    };
    Ok(if vector.is_empty() { None } else { Some(vector) })
}
