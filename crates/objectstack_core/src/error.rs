//! Crate-level error type.
//!
//! # Responsibility
//! - Unify per-layer errors behind one result type for stack callers.
//! - Classify errors into fatal configuration problems, precondition
//!   violations and recoverable runtime failures.

use crate::config::ConfigError;
use crate::context::affinity::{ConfinementViolation, ContextRole};
use crate::model::object::{ObjectId, ValidationError};
use crate::model::schema::ModelError;
use crate::stack::save::DurableWriteError;
use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StackResult<T> = Result<T, StackError>;

#[derive(Debug)]
pub enum StackError {
    Configuration(ConfigError),
    Model(ModelError),
    Store(StoreError),
    Validation(ValidationError),
    ThreadConfinement(ConfinementViolation),
    ObjectNotFound(ObjectId),
    /// Typed entity could not be rebuilt from a managed object.
    Decode {
        entity: String,
        attribute: String,
    },
    DurableWrite(DurableWriteError),
    /// The writer queue stopped and no longer accepts work.
    WriterUnavailable,
    /// A context entry point was re-entered from inside its own callback
    /// (main) or a blocking call was issued from the writer queue itself.
    Reentrancy(ContextRole),
}

impl StackError {
    /// Configuration, model and store-open problems: the process cannot
    /// continue with this stack.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::Model(_)
                | Self::Store(StoreError::IncompatibleModel { .. } | StoreError::Corrupt(_))
        )
    }

    /// Programmer errors: wrong thread or late configuration.
    pub fn is_precondition_violation(&self) -> bool {
        matches!(
            self,
            Self::ThreadConfinement(_)
                | Self::Reentrancy(_)
                | Self::Configuration(ConfigError::AlreadyConfigured | ConfigError::AlreadyBuilt)
        )
    }

    pub fn decode(entity: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Decode {
            entity: entity.into(),
            attribute: attribute.into(),
        }
    }
}

impl Display for StackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(err) => write!(f, "configuration error: {err}"),
            Self::Model(err) => write!(f, "model error: {err}"),
            Self::Store(err) => write!(f, "store error: {err}"),
            Self::Validation(err) => write!(f, "validation failed: {err}"),
            Self::ThreadConfinement(err) => write!(f, "thread confinement violated: {err}"),
            Self::ObjectNotFound(id) => write!(f, "object not found: {id}"),
            Self::Decode { entity, attribute } => {
                write!(f, "cannot decode `{entity}`: attribute `{attribute}` missing or mistyped")
            }
            Self::DurableWrite(err) => write!(f, "durable write failed: {err}"),
            Self::WriterUnavailable => write!(f, "writer queue is not running"),
            Self::Reentrancy(role) => {
                write!(f, "{} context re-entered from its own thread", role.as_str())
            }
        }
    }
}

impl Error for StackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Configuration(err) => Some(err),
            Self::Model(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::ThreadConfinement(err) => Some(err),
            Self::DurableWrite(err) => Some(err),
            Self::ObjectNotFound(_)
            | Self::Decode { .. }
            | Self::WriterUnavailable
            | Self::Reentrancy(_) => None,
        }
    }
}

impl From<ConfigError> for StackError {
    fn from(value: ConfigError) -> Self {
        Self::Configuration(value)
    }
}

impl From<ModelError> for StackError {
    fn from(value: ModelError) -> Self {
        Self::Model(value)
    }
}

impl From<StoreError> for StackError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<ValidationError> for StackError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<ConfinementViolation> for StackError {
    fn from(value: ConfinementViolation) -> Self {
        Self::ThreadConfinement(value)
    }
}

impl From<DurableWriteError> for StackError {
    fn from(value: DurableWriteError) -> Self {
        Self::DurableWrite(value)
    }
}
