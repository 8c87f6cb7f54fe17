//! Attribute values stored on managed objects.
//!
//! # Responsibility
//! - Represent one attribute value with its storage type.
//! - Provide typed comparison used by predicates and sort descriptors.
//!
//! # Invariants
//! - `Null` is the only value without an `AttributeType`.
//! - `Integer` and `Real` compare numerically with each other.

use crate::model::schema::AttributeType;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    /// Unix epoch milliseconds.
    Timestamp(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the storage type carried by this value, `None` for `Null`.
    pub fn attribute_type(&self) -> Option<AttributeType> {
        match self {
            Self::Null => None,
            Self::Text(_) => Some(AttributeType::Text),
            Self::Integer(_) => Some(AttributeType::Integer),
            Self::Real(_) => Some(AttributeType::Real),
            Self::Boolean(_) => Some(AttributeType::Boolean),
            Self::Timestamp(_) => Some(AttributeType::Timestamp),
        }
    }

    /// Returns whether this value may be stored in an attribute of `kind`.
    ///
    /// `Null` fits every type; required-ness is checked separately.
    pub fn fits(&self, kind: AttributeType) -> bool {
        match self.attribute_type() {
            None => true,
            Some(own) => own == kind,
        }
    }

    /// `false` only for NaN or infinite reals, which JSON cannot carry.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Real(value) => value.is_finite(),
            _ => true,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(value) => Some(*value),
            Self::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            Self::Timestamp(value) => Some(*value),
            _ => None,
        }
    }

    /// Compares two values of compatible types.
    ///
    /// Returns `None` when the types cannot be ordered against each other.
    /// `Null` sorts before every non-null value.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Null, _) => Some(Ordering::Less),
            (_, Self::Null) => Some(Ordering::Greater),
            (Self::Text(left), Self::Text(right)) => Some(left.cmp(right)),
            (Self::Integer(left), Self::Integer(right)) => Some(left.cmp(right)),
            (Self::Boolean(left), Self::Boolean(right)) => Some(left.cmp(right)),
            (Self::Timestamp(left), Self::Timestamp(right)) => Some(left.cmp(right)),
            (Self::Real(_) | Self::Integer(_), Self::Real(_) | Self::Integer(_)) => {
                self.as_real()?.partial_cmp(&other.as_real()?)
            }
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::Value;
    use crate::model::schema::AttributeType;
    use std::cmp::Ordering;

    #[test]
    fn integers_and_reals_compare_numerically() {
        assert_eq!(
            Value::Integer(2).compare(&Value::Real(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Real(3.0).compare(&Value::Integer(3)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn null_sorts_first_and_mismatched_types_are_unordered() {
        assert_eq!(
            Value::Null.compare(&Value::from("a")),
            Some(Ordering::Less)
        );
        assert_eq!(Value::from("a").compare(&Value::Boolean(true)), None);
    }

    #[test]
    fn null_fits_every_type() {
        assert!(Value::Null.fits(AttributeType::Timestamp));
        assert!(!Value::from(1_i64).fits(AttributeType::Text));
    }

    #[test]
    fn serializes_with_explicit_type_tag() {
        let json = serde_json::to_string(&Value::Timestamp(42)).expect("value should serialize");
        assert_eq!(json, r#"{"type":"timestamp","value":42}"#);
        let back: Value = serde_json::from_str(&json).expect("value should deserialize");
        assert_eq!(back, Value::Timestamp(42));
    }
}
