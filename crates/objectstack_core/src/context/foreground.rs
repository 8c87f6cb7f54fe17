//! Foreground context bound to the host's main thread.
//!
//! # Responsibility
//! - Hold the main-tier `ObjectContext` for the lifetime of the stack.
//! - Gate every access behind the main-thread affinity check.
//!
//! # Invariants
//! - Only the main thread ever locks the inner context.
//! - Re-entering the context from inside `perform` is reported as
//!   `StackError::Reentrancy`, not a deadlock.

use crate::context::affinity::{ContextRole, ExecutionAffinity};
use crate::context::changes::ChangeSummary;
use crate::context::ObjectContext;
use crate::error::{StackError, StackResult};
use crate::fetch::FetchRequest;
use crate::model::object::{ManagedObject, ObjectId};
use crate::model::value::Value;
use parking_lot::{Mutex, MutexGuard};

/// Main-thread object context.
pub struct MainContext {
    affinity: ExecutionAffinity,
    inner: Mutex<ObjectContext>,
}

impl MainContext {
    pub(crate) fn new(context: ObjectContext) -> Self {
        Self {
            affinity: context.affinity(),
            inner: Mutex::new(context),
        }
    }

    pub fn affinity(&self) -> ExecutionAffinity {
        self.affinity
    }

    /// Runs `operation` against the foreground context on the main thread.
    pub fn perform<T, F>(&self, operation: F) -> StackResult<T>
    where
        F: FnOnce(&mut ObjectContext) -> StackResult<T>,
    {
        self.affinity.check("perform")?;
        let mut context = self.lock()?;
        operation(&mut context)
    }

    /// Locks the inner context; callers have already checked affinity.
    pub(crate) fn lock(&self) -> StackResult<MutexGuard<'_, ObjectContext>> {
        self.inner
            .try_lock()
            .ok_or(StackError::Reentrancy(ContextRole::Main))
    }

    pub fn has_changes(&self) -> StackResult<bool> {
        self.perform(|context| context.has_changes())
    }

    pub fn pending_changes(&self) -> StackResult<ChangeSummary> {
        self.perform(|context| context.pending_changes())
    }

    pub fn insert_object(&self, entity_name: &str) -> StackResult<ObjectId> {
        self.perform(|context| context.insert_object(entity_name))
    }

    pub fn insert_with_values<I, K, V>(&self, entity_name: &str, values: I) -> StackResult<ObjectId>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.perform(|context| context.insert_with_values(entity_name, values))
    }

    pub fn object(&self, id: ObjectId) -> StackResult<Option<ManagedObject>> {
        self.perform(|context| context.object(id))
    }

    pub fn set_value(&self, id: ObjectId, key: &str, value: impl Into<Value>) -> StackResult<()> {
        self.perform(|context| context.set_value(id, key, value))
    }

    pub fn delete_object(&self, id: ObjectId) -> StackResult<bool> {
        self.perform(|context| context.delete_object(id))
    }

    pub fn execute_fetch(&self, request: &FetchRequest) -> StackResult<Vec<ManagedObject>> {
        self.perform(|context| context.execute_fetch(request))
    }

    pub fn count(&self, request: &FetchRequest) -> StackResult<usize> {
        self.perform(|context| context.count(request))
    }

    pub fn rollback(&self) -> StackResult<ChangeSummary> {
        self.perform(|context| context.rollback())
    }
}
