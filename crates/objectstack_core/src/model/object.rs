//! Managed object record.
//!
//! # Responsibility
//! - Hold one entity instance: identity, entity name and attribute values.
//! - Validate an instance against its entity description.
//!
//! # Invariants
//! - `id` is stable and never reused for another object.
//! - Attributes absent from the map read as `Value::Null`.

use crate::model::schema::{AttributeType, EntityDescription};
use crate::model::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of a managed object.
pub type ObjectId = Uuid;

static NULL: Value = Value::Null;

/// One entity instance as seen by a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedObject {
    id: ObjectId,
    entity: String,
    attributes: BTreeMap<String, Value>,
}

impl ManagedObject {
    /// Creates a fresh instance populated with the entity's default values.
    pub fn new(entity: &EntityDescription) -> Self {
        let attributes = entity
            .attributes
            .iter()
            .filter_map(|attribute| {
                attribute
                    .default_value
                    .clone()
                    .map(|value| (attribute.name.clone(), value))
            })
            .collect();
        Self {
            id: Uuid::new_v4(),
            entity: entity.name.clone(),
            attributes,
        }
    }

    /// Rebuilds an instance with known identity, e.g. when reading a store.
    pub fn with_id(
        id: ObjectId,
        entity: impl Into<String>,
        attributes: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            id,
            entity: entity.into(),
            attributes,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    pub fn get(&self, key: &str) -> &Value {
        self.attributes.get(key).unwrap_or(&NULL)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).as_text()
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        self.get(key).as_integer()
    }

    pub fn real(&self, key: &str) -> Option<f64> {
        self.get(key).as_real()
    }

    pub fn boolean(&self, key: &str) -> Option<bool> {
        self.get(key).as_bool()
    }

    pub fn timestamp(&self, key: &str) -> Option<i64> {
        self.get(key).as_timestamp()
    }

    /// Assigns a value without schema checks; contexts check before calling.
    pub(crate) fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if value.is_null() {
            self.attributes.remove(&key);
        } else {
            self.attributes.insert(key, value);
        }
    }

    /// Checks required attributes and value types against `entity`.
    pub fn validate(&self, entity: &EntityDescription) -> Result<(), ValidationError> {
        for (key, value) in &self.attributes {
            let Some(attribute) = entity.attribute(key) else {
                return Err(ValidationError::UnknownAttribute {
                    entity: self.entity.clone(),
                    attribute: key.clone(),
                });
            };
            check_type(&self.entity, attribute.name.as_str(), attribute.kind, value)?;
        }

        for attribute in entity.attributes.iter().filter(|a| a.required) {
            if self.get(&attribute.name).is_null() {
                return Err(ValidationError::MissingRequired {
                    entity: self.entity.clone(),
                    id: self.id,
                    attribute: attribute.name.clone(),
                });
            }
        }

        Ok(())
    }
}

pub(crate) fn check_type(
    entity: &str,
    attribute: &str,
    kind: AttributeType,
    value: &Value,
) -> Result<(), ValidationError> {
    if !value.fits(kind) {
        return Err(ValidationError::TypeMismatch {
            entity: entity.to_string(),
            attribute: attribute.to_string(),
            expected: kind,
            found: value.attribute_type().unwrap_or(kind),
        });
    }
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteReal {
            entity: entity.to_string(),
            attribute: attribute.to_string(),
        });
    }
    Ok(())
}

/// Object-level validation errors raised on edits and before saves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    UnknownEntity(String),
    UnknownAttribute {
        entity: String,
        attribute: String,
    },
    MissingRequired {
        entity: String,
        id: ObjectId,
        attribute: String,
    },
    TypeMismatch {
        entity: String,
        attribute: String,
        expected: AttributeType,
        found: AttributeType,
    },
    /// NaN and infinities have no stored representation.
    NonFiniteReal {
        entity: String,
        attribute: String,
    },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownEntity(entity) => write!(f, "entity `{entity}` is not in the model"),
            Self::UnknownAttribute { entity, attribute } => {
                write!(f, "entity `{entity}` has no attribute `{attribute}`")
            }
            Self::MissingRequired {
                entity,
                id,
                attribute,
            } => write!(f, "`{entity}.{attribute}` is required (object {id})"),
            Self::TypeMismatch {
                entity,
                attribute,
                expected,
                found,
            } => write!(
                f,
                "`{entity}.{attribute}` expects {} but got {}",
                expected.as_str(),
                found.as_str()
            ),
            Self::NonFiniteReal { entity, attribute } => {
                write!(f, "`{entity}.{attribute}` must be a finite real")
            }
        }
    }
}

impl Error for ValidationError {}
