//! Metadata filters applied to search candidates.
//!
//! [`MetadataFilter`] is a small boolean expression tree over record
//! metadata. It can be built in code, deserialized from JSON, or parsed
//! from text with [`MetadataFilter::parse`]:
//!
//! ```rust
//! use nearline::MetadataFilter;
//!
//! let filter = MetadataFilter::parse(
//!     r#"duration <= 30 AND (category = "sales" OR remote = true)"#,
//! ).unwrap();
//! ```
//!
//! Filters are post-filters: they run over the candidates an index
//! produces, after scoring and before truncation to `k`.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{NearlineError, Result};
use crate::store::{Metadata, MetadataValue};

/// Deepest nesting a filter may have.
pub const MAX_FILTER_DEPTH: usize = 32;

/// Comparison operator of a [`MetadataFilter::Compare`] node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// Returns true for `<`, `<=`, `>`, `>=`.
    pub const fn is_ordering(&self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    /// Textual operator.
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Boolean predicate over record metadata.
///
/// # Semantics
///
/// - A missing key fails every predicate (so `NOT` of it passes).
/// - `Int` and `Float` compare numerically with each other.
/// - Strings order lexicographically; other types only support `=`/`!=`.
/// - Values of different types are never equal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MetadataFilter {
    /// `key <op> value`
    Compare {
        /// Metadata key.
        key: String,
        /// Operator.
        op: CompareOp,
        /// Right-hand literal.
        value: MetadataValue,
    },

    /// `key IN [v1, v2, ...]`
    In {
        /// Metadata key.
        key: String,
        /// Accepted values.
        values: Vec<MetadataValue>,
    },

    /// `exists(key)`
    Exists {
        /// Metadata key.
        key: String,
    },

    /// All children must match.
    And(Vec<MetadataFilter>),

    /// At least one child must match.
    Or(Vec<MetadataFilter>),

    /// Child must not match.
    Not(Box<MetadataFilter>),
}

impl MetadataFilter {
    /// `key = value`
    pub fn eq(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::compare(key, CompareOp::Eq, value)
    }

    /// `key <op> value`
    pub fn compare(
        key: impl Into<String>,
        op: CompareOp,
        value: impl Into<MetadataValue>,
    ) -> Self {
        Self::Compare {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    /// `key IN [values]`
    pub fn one_of(key: impl Into<String>, values: Vec<MetadataValue>) -> Self {
        Self::In {
            key: key.into(),
            values,
        }
    }

    /// `exists(key)`
    pub fn exists(key: impl Into<String>) -> Self {
        Self::Exists { key: key.into() }
    }

    /// Conjunction of `self` and `other`, flattening nested `And`s.
    pub fn and(self, other: MetadataFilter) -> Self {
        match self {
            Self::And(mut children) => {
                children.push(other);
                Self::And(children)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Disjunction of `self` and `other`, flattening nested `Or`s.
    pub fn or(self, other: MetadataFilter) -> Self {
        match self {
            Self::Or(mut children) => {
                children.push(other);
                Self::Or(children)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    /// Negation of `self`.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Parses the text filter syntax.
    ///
    /// ```text
    /// expr    := and ( OR and )*
    /// and     := unary ( AND unary )*
    /// unary   := NOT unary | '(' expr ')' | EXISTS '(' key ')' | key op literal
    ///          | key IN '[' literal ( ',' literal )* ']'
    /// op      := = | != | < | <= | > | >=
    /// literal := "string" | 'string' | number | true | false | null
    /// ```
    ///
    /// Keywords are case-insensitive.
    ///
    /// # Errors
    ///
    /// `InvalidQuery` for syntax errors and for filters that fail
    /// [`validate`](Self::validate).
    pub fn parse(input: &str) -> Result<Self> {
        let filter = super::parse::parse_filter(input)?;
        filter.validate()?;
        Ok(filter)
    }

    /// Rejects filters that cannot be evaluated meaningfully.
    ///
    /// # Errors
    ///
    /// `InvalidQuery` if a key is empty, an `AND`/`OR`/`IN` is empty, an
    /// ordering operator is used with a bool or null literal, a float
    /// literal is not finite, or nesting exceeds [`MAX_FILTER_DEPTH`].
    pub fn validate(&self) -> Result<()> {
        self.validate_at(1)
    }

    fn validate_at(&self, depth: usize) -> Result<()> {
        if depth > MAX_FILTER_DEPTH {
            return Err(NearlineError::invalid_query(format!(
                "filter nesting exceeds {} levels",
                MAX_FILTER_DEPTH
            )));
        }
        match self {
            Self::Compare { key, op, value } => {
                check_key(key)?;
                check_literal(value)?;
                if op.is_ordering() && !(value.is_numeric() || value.as_str().is_some()) {
                    return Err(NearlineError::invalid_query(format!(
                        "operator '{}' on '{}' needs a number or string, got {}",
                        op.symbol(),
                        key,
                        value
                    )));
                }
                Ok(())
            }
            Self::In { key, values } => {
                check_key(key)?;
                if values.is_empty() {
                    return Err(NearlineError::invalid_query(format!(
                        "IN list for '{}' is empty",
                        key
                    )));
                }
                values.iter().try_for_each(check_literal)
            }
            Self::Exists { key } => check_key(key),
            Self::And(children) | Self::Or(children) => {
                if children.is_empty() {
                    return Err(NearlineError::invalid_query(
                        "AND/OR needs at least one operand",
                    ));
                }
                children
                    .iter()
                    .try_for_each(|child| child.validate_at(depth + 1))
            }
            Self::Not(child) => child.validate_at(depth + 1),
        }
    }

    /// Returns `true` if the metadata passes this filter.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Self::Compare { key, op, value } => match metadata.get(key) {
                Some(actual) => compare(actual, *op, value),
                None => false,
            },
            Self::In { key, values } => metadata
                .get(key)
                .is_some_and(|actual| values.iter().any(|v| values_equal(actual, v))),
            Self::Exists { key } => metadata.contains_key(key),
            Self::And(children) => children.iter().all(|c| c.matches(metadata)),
            Self::Or(children) => children.iter().any(|c| c.matches(metadata)),
            Self::Not(child) => !child.matches(metadata),
        }
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(NearlineError::invalid_query("filter key is empty"));
    }
    Ok(())
}

fn check_literal(value: &MetadataValue) -> Result<()> {
    if let MetadataValue::Float(x) = value {
        if !x.is_finite() {
            return Err(NearlineError::invalid_query(
                "filter literal must be a finite number",
            ));
        }
    }
    Ok(())
}

fn values_equal(a: &MetadataValue, b: &MetadataValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn ordering(a: &MetadataValue, b: &MetadataValue) -> Option<Ordering> {
    match (a, b) {
        (MetadataValue::String(x), MetadataValue::String(y)) => Some(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    }
}

fn compare(actual: &MetadataValue, op: CompareOp, expected: &MetadataValue) -> bool {
    match op {
        CompareOp::Eq => values_equal(actual, expected),
        CompareOp::Ne => !values_equal(actual, expected),
        CompareOp::Lt => ordering(actual, expected) == Some(Ordering::Less),
        CompareOp::Le => matches!(
            ordering(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        CompareOp::Gt => ordering(actual, expected) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(
            ordering(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    }
}

impl fmt::Display for MetadataFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_text(f, false)
    }
}

impl MetadataFilter {
    /// Writes the filter in the text syntax. Only nested `AND`/`OR` groups
    /// are parenthesized, so the text never nests deeper than the filter.
    fn write_text(&self, f: &mut fmt::Formatter<'_>, nested: bool) -> fmt::Result {
        match self {
            Self::Compare { key, op, value } => write!(f, "{} {} {}", key, op.symbol(), value),
            Self::In { key, values } => {
                write!(f, "{} IN [", key)?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str("]")
            }
            Self::Exists { key } => write!(f, "exists({})", key),
            Self::And(children) | Self::Or(children) => {
                let joiner = if matches!(self, Self::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                if nested {
                    f.write_str("(")?;
                }
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(joiner)?;
                    }
                    child.write_text(f, true)?;
                }
                if nested {
                    f.write_str(")")?;
                }
                Ok(())
            }
            Self::Not(child) => {
                f.write_str("NOT ")?;
                child.write_text(f, true)
            }
        }
    }
}
