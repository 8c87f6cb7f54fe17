//! Object model (schema) description and named-resource loading.
//!
//! # Responsibility
//! - Describe persisted entity types and their attributes.
//! - Locate and load a model by name from a model source.
//!
//! # Invariants
//! - A loaded model is validated and immutable afterwards.
//! - Entity and attribute names are plain identifiers and unique.
//! - A model found under name `X` must declare `name == X`.

use crate::model::value::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// File suffix appended to a model name to find its resource.
pub const MODEL_RESOURCE_SUFFIX: &str = ".model.json";

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Storage type for one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Text,
    Integer,
    Real,
    Boolean,
    /// Unix epoch milliseconds.
    Timestamp,
}

impl AttributeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
        }
    }
}

/// One attribute of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AttributeType,
    /// Required attributes must be non-null when a context saves.
    #[serde(default)]
    pub required: bool,
    /// Value assigned to freshly inserted objects.
    #[serde(default)]
    pub default_value: Option<Value>,
}

impl AttributeDescription {
    pub fn optional(name: impl Into<String>, kind: AttributeType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default_value: None,
        }
    }

    pub fn required(name: impl Into<String>, kind: AttributeType) -> Self {
        Self {
            required: true,
            ..Self::optional(name, kind)
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// One persisted record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescription {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDescription>,
}

impl EntityDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: AttributeDescription) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescription> {
        self.attributes
            .iter()
            .find(|attribute| attribute.name == name)
    }
}

fn default_model_version() -> u32 {
    1
}

/// Schema describing every persisted entity type of one store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectModel {
    pub name: String,
    /// Bumped whenever the schema changes; stores remember the version
    /// they were created with.
    #[serde(default = "default_model_version")]
    pub version: u32,
    #[serde(default)]
    pub entities: Vec<EntityDescription>,
}

impl ObjectModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_model_version(),
            entities: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_entity(mut self, entity: EntityDescription) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.iter().find(|entity| entity.name == name)
    }

    /// Checks identifiers, uniqueness and default value types.
    pub fn validate(&self) -> Result<(), ModelError> {
        ensure_identifier(&self.name)?;

        let mut entity_names = BTreeSet::new();
        for entity in &self.entities {
            ensure_identifier(&entity.name)?;
            if !entity_names.insert(entity.name.as_str()) {
                return Err(ModelError::DuplicateEntity(entity.name.clone()));
            }

            let mut attribute_names = BTreeSet::new();
            for attribute in &entity.attributes {
                ensure_identifier(&attribute.name)?;
                if !attribute_names.insert(attribute.name.as_str()) {
                    return Err(ModelError::DuplicateAttribute {
                        entity: entity.name.clone(),
                        attribute: attribute.name.clone(),
                    });
                }
                if let Some(default) = &attribute.default_value {
                    if !default.fits(attribute.kind) || !default.is_finite() {
                        return Err(ModelError::InvalidDefault {
                            entity: entity.name.clone(),
                            attribute: attribute.name.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Parses and validates a model document.
    pub fn from_json_str(source: &str) -> Result<Self, ModelError> {
        let model: Self = serde_json::from_str(source).map_err(ModelError::Parse)?;
        model.validate()?;
        Ok(model)
    }

    /// Locates the model resource called `name` and loads it.
    ///
    /// # Errors
    /// - `NotFound` when the source holds no resource with this name.
    /// - `NameMismatch` when the resource declares a different model name.
    pub fn load_named(source: &ModelSource, name: &str) -> Result<Self, ModelError> {
        let model = match source {
            ModelSource::Directory(dir) => {
                let path = dir.join(format!("{name}{MODEL_RESOURCE_SUFFIX}"));
                if !path.is_file() {
                    return Err(ModelError::NotFound {
                        name: name.to_string(),
                        location: dir.display().to_string(),
                    });
                }
                let raw = std::fs::read_to_string(&path)
                    .map_err(|source| ModelError::Io { path, source })?;
                Self::from_json_str(&raw)?
            }
            ModelSource::Embedded(models) => {
                let model = models
                    .iter()
                    .find(|model| model.name == name)
                    .cloned()
                    .ok_or_else(|| ModelError::NotFound {
                        name: name.to_string(),
                        location: "embedded models".to_string(),
                    })?;
                model.validate()?;
                model
            }
        };

        if model.name != name {
            return Err(ModelError::NameMismatch {
                requested: name.to_string(),
                declared: model.name,
            });
        }
        Ok(model)
    }
}

/// Where named model resources are looked up.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    /// Directory holding `<name>.model.json` resources.
    Directory(PathBuf),
    /// Models compiled into or constructed by the host process.
    Embedded(Vec<ObjectModel>),
}

impl ModelSource {
    /// Directory of the running executable, the closest analogue of an
    /// application bundle.
    pub fn executable_directory() -> Self {
        let dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::Directory(dir)
    }
}

impl Default for ModelSource {
    fn default() -> Self {
        Self::executable_directory()
    }
}

#[derive(Debug)]
pub enum ModelError {
    NotFound {
        name: String,
        location: String,
    },
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    NameMismatch {
        requested: String,
        declared: String,
    },
    InvalidIdentifier(String),
    DuplicateEntity(String),
    DuplicateAttribute {
        entity: String,
        attribute: String,
    },
    InvalidDefault {
        entity: String,
        attribute: String,
    },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { name, location } => {
                write!(f, "model `{name}` not found in {location}")
            }
            Self::Io { path, source } => {
                write!(f, "failed to read model `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "malformed model document: {err}"),
            Self::NameMismatch {
                requested,
                declared,
            } => write!(
                f,
                "model resource `{requested}` declares a different name `{declared}`"
            ),
            Self::InvalidIdentifier(value) => write!(f, "invalid model identifier `{value}`"),
            Self::DuplicateEntity(entity) => write!(f, "duplicate entity `{entity}`"),
            Self::DuplicateAttribute { entity, attribute } => {
                write!(f, "duplicate attribute `{attribute}` on entity `{entity}`")
            }
            Self::InvalidDefault { entity, attribute } => write!(
                f,
                "default value of `{entity}.{attribute}` does not match its type"
            ),
        }
    }
}

impl Error for ModelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

fn ensure_identifier(value: &str) -> Result<(), ModelError> {
    if IDENTIFIER_RE.is_match(value) {
        Ok(())
    } else {
        Err(ModelError::InvalidIdentifier(value.to_string()))
    }
}
