//! Two-tier object persistence stack.
//!
//! A foreground context bound to the host's main thread sits on top of a
//! writer context that runs on a private serial queue and alone talks to
//! the SQLite store. Saving pushes foreground changes into the writer and
//! enqueues the durable write without waiting for it.

pub mod config;
pub mod context;
pub mod db;
pub mod entity;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod model;
pub mod stack;
pub mod store;

pub use config::{application_documents_directory, ConfigError, RetryPolicy, StackConfig};
pub use context::affinity::{ConfinementViolation, ContextRole, ExecutionAffinity};
pub use context::changes::{ChangeSet, ChangeSummary};
pub use context::foreground::MainContext;
pub use context::writer::{WriterHandle, WriterQueue};
pub use context::ObjectContext;
pub use entity::PersistedEntity;
pub use error::{StackError, StackResult};
pub use fetch::{FetchRequest, Predicate, SortDescriptor};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::object::{ManagedObject, ObjectId, ValidationError};
pub use model::schema::{
    AttributeDescription, AttributeType, EntityDescription, ModelError, ModelSource, ObjectModel,
};
pub use model::value::Value;
pub use stack::registry::{configure, configure_model_name, is_configured, shared_manager};
pub use stack::save::{DurableWriteError, SaveHandle, SaveOutcome, SavePhase};
pub use stack::PersistenceStack;
pub use store::{StoreCoordinator, StoreError, StoreLocation};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
