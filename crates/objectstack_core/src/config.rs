//! Stack configuration.
//!
//! # Responsibility
//! - Carry every setting needed to build a persistence stack.
//! - Resolve the documents-style directory that holds the store file.
//!
//! # Invariants
//! - A config always names a non-empty model.
//! - The main thread recorded here is the only thread allowed to use the
//!   foreground context of a stack built from this config.

use crate::stack::save::{DurableWriteError, DurableWriteReporter};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use crate::model::schema::ModelSource;

/// Store file extension used when no explicit file name is configured.
pub const STORE_FILE_EXTENSION: &str = "sqlite";

/// Retry policy for the durable-write phase of a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one; at least 1.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after the `failed_attempt`-th failure (1-based), doubling each
    /// time and capped at `max_backoff_ms`.
    pub fn backoff_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(32);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Settings for one persistence stack.
#[derive(Clone)]
pub struct StackConfig {
    model_name: String,
    model_source: ModelSource,
    store_directory: Option<PathBuf>,
    store_file_name: Option<String>,
    main_thread: ThreadId,
    retry_policy: RetryPolicy,
    durable_write_reporter: Option<DurableWriteReporter>,
}

impl StackConfig {
    /// Creates a config for `model_name`, treating the calling thread as the
    /// main thread.
    pub fn new(model_name: impl Into<String>) -> Result<Self, ConfigError> {
        let model_name = model_name.into().trim().to_string();
        if model_name.is_empty() {
            return Err(ConfigError::EmptyModelName);
        }
        Ok(Self {
            model_name,
            model_source: ModelSource::default(),
            store_directory: None,
            store_file_name: None,
            main_thread: std::thread::current().id(),
            retry_policy: RetryPolicy::default(),
            durable_write_reporter: None,
        })
    }

    pub fn with_model_source(mut self, source: ModelSource) -> Self {
        self.model_source = source;
        self
    }

    /// Overrides the documents directory used for the store file.
    pub fn with_store_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_directory = Some(dir.into());
        self
    }

    pub fn with_store_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.store_file_name = Some(file_name.into());
        self
    }

    pub fn with_main_thread(mut self, thread: ThreadId) -> Self {
        self.main_thread = thread;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Registers a callback for durable-write failures, which happen after
    /// `save()` has already returned.
    pub fn on_durable_write_error<F>(mut self, reporter: F) -> Self
    where
        F: Fn(&DurableWriteError) + Send + Sync + 'static,
    {
        self.durable_write_reporter = Some(Arc::new(reporter));
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_source(&self) -> &ModelSource {
        &self.model_source
    }

    pub fn main_thread(&self) -> ThreadId {
        self.main_thread
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    pub fn durable_write_reporter(&self) -> Option<&DurableWriteReporter> {
        self.durable_write_reporter.as_ref()
    }

    /// `<ModelName>.sqlite` unless overridden.
    pub fn store_file_name(&self) -> String {
        self.store_file_name
            .clone()
            .unwrap_or_else(|| format!("{}.{STORE_FILE_EXTENSION}", self.model_name))
    }

    /// Configured store directory, or the platform documents directory.
    pub fn documents_directory(&self) -> Result<PathBuf, ConfigError> {
        match &self.store_directory {
            Some(dir) => Ok(dir.clone()),
            None => application_documents_directory(),
        }
    }
}

impl Debug for StackConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackConfig")
            .field("model_name", &self.model_name)
            .field("model_source", &self.model_source)
            .field("store_directory", &self.store_directory)
            .field("store_file_name", &self.store_file_name)
            .field("main_thread", &self.main_thread)
            .field("retry_policy", &self.retry_policy)
            .field(
                "durable_write_reporter",
                &self.durable_write_reporter.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

/// Resolves the platform documents directory.
///
/// Falls back to the local data directory, then the home directory, for
/// headless hosts without a documents folder.
pub fn application_documents_directory() -> Result<PathBuf, ConfigError> {
    dirs::document_dir()
        .or_else(dirs::data_local_dir)
        .or_else(dirs::home_dir)
        .ok_or(ConfigError::NoDocumentsDirectory)
}

#[derive(Debug)]
pub enum ConfigError {
    ModelNameNotSet,
    EmptyModelName,
    AlreadyConfigured,
    AlreadyBuilt,
    NoDocumentsDirectory,
    WriterSpawn(std::io::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelNameNotSet => {
                write!(f, "model name must be configured before the stack is used")
            }
            Self::EmptyModelName => write!(f, "model name cannot be empty"),
            Self::AlreadyConfigured => write!(f, "stack is already configured"),
            Self::AlreadyBuilt => {
                write!(f, "stack is already built; model name is frozen")
            }
            Self::NoDocumentsDirectory => {
                write!(f, "no documents directory is available on this platform")
            }
            Self::WriterSpawn(err) => write!(f, "failed to start writer queue: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::WriterSpawn(err) => Some(err),
            _ => None,
        }
    }
}
