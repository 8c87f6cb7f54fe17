//! Process-wide shared stack.
//!
//! # Invariants
//! - Configuration is set at most once per process.
//! - `shared_manager` constructs exactly one stack, even when first called
//!   from several threads at once.

use super::PersistenceStack;
use crate::config::{ConfigError, StackConfig};
use crate::error::StackResult;
use log::{error, info};
use once_cell::sync::OnceCell;

static CONFIG: OnceCell<StackConfig> = OnceCell::new();
static SHARED: OnceCell<PersistenceStack> = OnceCell::new();

/// Sets the process-wide configuration.
///
/// Must precede the first `shared_manager` call that builds the stack.
pub fn configure(config: StackConfig) -> Result<(), ConfigError> {
    if SHARED.get().is_some_and(PersistenceStack::is_built) {
        error!(
            "event=stack_configure module=registry status=error reason=already_built model={}",
            config.model_name()
        );
        return Err(ConfigError::AlreadyBuilt);
    }

    let model_name = config.model_name().to_string();
    if CONFIG.set(config).is_err() {
        error!(
            "event=stack_configure module=registry status=error reason=already_configured model={}",
            model_name
        );
        return Err(ConfigError::AlreadyConfigured);
    }
    info!(
        "event=stack_configure module=registry status=ok model={}",
        model_name
    );
    Ok(())
}

/// Configures the shared stack with default settings for `name`; the
/// calling thread becomes the main thread.
pub fn configure_model_name(name: &str) -> Result<(), ConfigError> {
    configure(StackConfig::new(name)?)
}

pub fn is_configured() -> bool {
    CONFIG.get().is_some()
}

/// Returns the single process-wide stack, creating it on first call.
pub fn shared_manager() -> StackResult<&'static PersistenceStack> {
    let config = CONFIG.get().ok_or(ConfigError::ModelNameNotSet)?;
    Ok(SHARED.get_or_init(|| PersistenceStack::new(config.clone())))
}
