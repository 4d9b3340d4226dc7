//! Type definitions for vector records and their metadata.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{RecordId, StoreVersion};

/// Metadata attached to a record: string keys to scalar values.
///
/// A `BTreeMap` keeps iteration order stable, so result sets and
/// serialized artifacts are byte-identical across runs.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A scalar metadata value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    /// Explicit null.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
}

impl MetadataValue {
    /// Returns the value as an `f64` if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the value as a string slice if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true for `Int` and `Float`.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    /// Converts a JSON scalar into a metadata value.
    ///
    /// Arrays and objects are not scalars and yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Self::Int(i)),
                None => n.as_f64().map(Self::Float),
            },
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            // Keep a decimal point so the text reads back as a float
            Self::Float(x) if x.fract() == 0.0 => write!(f, "{:.1}", x),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => write_quoted(f, s),
        }
    }
}

/// Writes `s` as a double-quoted filter literal.
///
/// Emits only the escapes the filter parser reads back: `\"`, `\\`,
/// `\n`, `\t`, `\r`, and `\u{..}` for any other control character.
fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for ch in s.chars() {
        match ch {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c if c.is_control() => write!(f, "\\u{{{:x}}}", u32::from(c))?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for MetadataValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for MetadataValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// A record as held by the [`VectorStore`](super::VectorStore).
///
/// Records are immutable once stored: update and soft-delete install a
/// replacement in the record's slot, so snapshots taken earlier keep
/// seeing the old value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Unique stable identifier.
    pub id: RecordId,

    /// Fixed-length embedding.
    pub embedding: Vec<f32>,

    /// Scalar metadata.
    pub metadata: Metadata,

    /// Tombstone marker; the record stays physically present until a
    /// rebuild that excludes it has been published.
    pub deleted: bool,

    /// Store version of the mutation that produced this value.
    pub version: StoreVersion,
}

/// Input for inserting a record.
///
/// # Example
///
/// ```rust
/// use nearline::NewRecord;
///
/// let record = NewRecord::new("a", vec![1.0, 0.0]).with_metadata("category", "sales");
/// assert_eq!(record.metadata.len(), 1);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct NewRecord {
    /// Caller-chosen identifier.
    pub id: RecordId,

    /// Embedding; its length must equal the store dimension.
    pub embedding: Vec<f32>,

    /// Scalar metadata.
    pub metadata: Metadata,
}

impl NewRecord {
    /// Creates a record without metadata.
    pub fn new(id: impl Into<RecordId>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            embedding,
            metadata: Metadata::new(),
        }
    }

    /// Adds a metadata entry.
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Checks an embedding against the store dimension and for non-finite values.
pub(crate) fn validate_embedding(
    embedding: &[f32],
    dimension: usize,
) -> Result<(), ValidationError> {
    if embedding.len() != dimension {
        return Err(ValidationError::dimension_mismatch(dimension, embedding.len()));
    }
    if let Some(pos) = embedding.iter().position(|v| !v.is_finite()) {
        return Err(ValidationError::invalid_embedding(format!(
            "value at index {} is not finite",
            pos
        )));
    }
    Ok(())
}

/// Checks metadata values for things a filter cannot compare.
pub(crate) fn validate_metadata(metadata: &Metadata) -> Result<(), ValidationError> {
    for (key, value) in metadata {
        if key.is_empty() {
            return Err(ValidationError::invalid_field(
                "metadata",
                "keys must be non-empty",
            ));
        }
        if let MetadataValue::Float(x) = value {
            if !x.is_finite() {
                return Err(ValidationError::invalid_field(
                    format!("metadata.{}", key),
                    "float values must be finite",
                ));
            }
        }
    }
    Ok(())
}
