//! Document model shared by shards and the aggregator
//!
//! A [`Document`] is an opaque bag of typed fields plus the relevance score the
//! shard assigned to it. The coordinator never looks inside a document except to
//! order it through a [`crate::sort::Sort`] chain and to derive its group key.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Typed value of a document field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Rank used to order values of unrelated kinds against each other
    fn kind_rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Integer(_) | Self::Float(_) => 1,
            Self::Text(_) => 2,
        }
    }

    /// Total order over field values
    ///
    /// Numbers compare by exact value across integer and float, so `-0.0`, `0.0`
    /// and `0` are equal. NaN orders after every number (before them when its sign
    /// bit is set). Values of different kinds order by kind.
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b).unwrap_or_else(|| a.total_cmp(b)),
            (Self::Integer(a), Self::Float(b)) => compare_integer_float(*a, *b),
            (Self::Float(a), Self::Integer(b)) => compare_integer_float(*b, *a).reverse(),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }

    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }
}

/// Exact comparison of an integer with a float
///
/// Casting the integer to `f64` rounds above 2^53 and would make the order
/// intransitive, so the float is split into its integral and fractional parts.
fn compare_integer_float(integer: i64, float: f64) -> Ordering {
    if float.is_nan() {
        return if float.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }

    // i64::MIN is -2^63 and exactly representable; 2^63 is just past i64::MAX
    const LOWER: f64 = -9_223_372_036_854_775_808.0;
    const UPPER: f64 = 9_223_372_036_854_775_808.0;

    let integral = float.trunc();
    if integral >= UPPER {
        return Ordering::Less;
    }
    if integral < LOWER {
        return Ordering::Greater;
    }

    match integer.cmp(&(integral as i64)) {
        Ordering::Equal => {
            let fraction = float - integral;
            if fraction > 0.0 {
                Ordering::Less
            } else if fraction < 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        unequal => unequal,
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Integer(value) => write!(f, "{}", value),
            Self::Float(value) => write!(f, "{}", value),
            Self::Text(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A search hit as returned by a shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identifier of the document inside its shard
    pub id: String,
    /// Relevance score assigned by the shard (higher is better)
    pub score: f32,
    /// Stored fields
    pub fields: BTreeMap<String, FieldValue>,
}

impl Document {
    /// Create a document without fields
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
            fields: BTreeMap::new(),
        }
    }

    /// Add a field, builder style
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Look up a field value
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Value of a field rendered as a grouping key
    pub fn key_of(&self, name: &str) -> Option<String> {
        self.get(name).map(ToString::to_string)
    }
}
