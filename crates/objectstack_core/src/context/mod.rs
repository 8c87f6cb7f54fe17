//! Managed object contexts: thread-confined scratchpads of object changes.
//!
//! # Responsibility
//! - Track inserts, updates and deletes made by one tier.
//! - Answer reads by overlaying local changes on the parent tier's view.
//! - Save: the main tier pushes into the writer tier, the writer tier
//!   commits into the store.
//!
//! # Invariants
//! - Every public entry point checks the context's execution affinity.
//! - The main tier never holds a store coordinator; only the writer does.
//! - A failed save leaves the pending changes exactly as they were.

pub mod affinity;
pub mod changes;
pub mod foreground;
pub mod writer;

use crate::error::{StackError, StackResult};
use crate::fetch::FetchRequest;
use crate::model::object::{check_type, ManagedObject, ObjectId, ValidationError};
use crate::model::schema::{EntityDescription, ObjectModel};
use crate::model::value::Value;
use crate::store::StoreCoordinator;
use affinity::{ContextRole, ExecutionAffinity};
use changes::{ChangeSet, ChangeSummary, Pending};
use log::debug;
use std::sync::Arc;
use writer::WriterHandle;

enum Parent {
    Writer(WriterHandle),
    Store(StoreCoordinator),
}

/// One tier of the object graph.
pub struct ObjectContext {
    affinity: ExecutionAffinity,
    model: Arc<ObjectModel>,
    parent: Parent,
    changes: ChangeSet,
}

impl ObjectContext {
    pub(crate) fn for_main(
        affinity: ExecutionAffinity,
        model: Arc<ObjectModel>,
        writer: WriterHandle,
    ) -> Self {
        Self {
            affinity,
            model,
            parent: Parent::Writer(writer),
            changes: ChangeSet::default(),
        }
    }

    /// Builds the writer tier on the calling (queue) thread.
    pub(crate) fn for_writer(model: Arc<ObjectModel>, coordinator: StoreCoordinator) -> Self {
        Self {
            affinity: ExecutionAffinity::current(ContextRole::Writer),
            model,
            parent: Parent::Store(coordinator),
            changes: ChangeSet::default(),
        }
    }

    pub fn affinity(&self) -> ExecutionAffinity {
        self.affinity
    }

    pub fn role(&self) -> ContextRole {
        self.affinity.role()
    }

    pub fn model(&self) -> &Arc<ObjectModel> {
        &self.model
    }

    pub fn has_changes(&self) -> StackResult<bool> {
        self.affinity.check("has_changes")?;
        Ok(!self.changes.is_empty())
    }

    pub fn pending_changes(&self) -> StackResult<ChangeSummary> {
        self.affinity.check("pending_changes")?;
        Ok(self.changes.summary())
    }

    pub(crate) fn pending_summary(&self) -> ChangeSummary {
        self.changes.summary()
    }

    /// Inserts a fresh object of `entity_name` populated with defaults.
    pub fn insert_object(&mut self, entity_name: &str) -> StackResult<ObjectId> {
        self.insert_with_values(entity_name, std::iter::empty::<(String, Value)>())
    }

    /// Inserts a fresh object and assigns `values` on top of the defaults.
    ///
    /// The object is registered with this context only; it becomes visible
    /// to the parent tier on save.
    pub fn insert_with_values<I, K, V>(&mut self, entity_name: &str, values: I) -> StackResult<ObjectId>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.affinity.check("insert")?;
        let model = Arc::clone(&self.model);
        let entity = entity_of(&model, entity_name)?;

        let mut object = ManagedObject::new(entity);
        for (key, value) in values {
            let key = key.into();
            let value = value.into();
            check_attribute(entity, &key, &value)?;
            object.set(key, value);
        }

        let id = object.id();
        self.changes.record_insert(object);
        debug!(
            "event=object_insert module=context status=ok role={} entity={}",
            self.role().as_str(),
            entity_name
        );
        Ok(id)
    }

    /// Returns the object as this context sees it, `None` when deleted or
    /// unknown.
    pub fn object(&self, id: ObjectId) -> StackResult<Option<ManagedObject>> {
        self.affinity.check("object")?;
        match self.changes.lookup(id) {
            Pending::Changed(object) => Ok(Some(object.clone())),
            Pending::Deleted => Ok(None),
            Pending::Untouched => self.parent_object(id),
        }
    }

    /// Assigns one attribute; unknown attributes and mistyped values are
    /// rejected immediately, required attributes are checked on save.
    pub fn set_value(&mut self, id: ObjectId, key: &str, value: impl Into<Value>) -> StackResult<()> {
        self.affinity.check("set_value")?;
        let value = value.into();

        let mut object = match self.changes.lookup(id) {
            Pending::Changed(object) => object.clone(),
            Pending::Deleted => return Err(StackError::ObjectNotFound(id)),
            Pending::Untouched => self
                .parent_object(id)?
                .ok_or(StackError::ObjectNotFound(id))?,
        };

        let model = Arc::clone(&self.model);
        let entity = entity_of(&model, object.entity())?;
        check_attribute(entity, key, &value)?;
        object.set(key, value);
        self.changes.record_update(object);
        Ok(())
    }

    /// Marks an object deleted; returns `false` when it was not visible.
    pub fn delete_object(&mut self, id: ObjectId) -> StackResult<bool> {
        self.affinity.check("delete")?;
        match self.changes.lookup(id) {
            Pending::Deleted => Ok(false),
            Pending::Changed(_) => Ok(self.changes.record_delete(id)),
            Pending::Untouched => {
                if self.parent_object(id)?.is_none() {
                    return Ok(false);
                }
                Ok(self.changes.record_delete(id))
            }
        }
    }

    /// Runs `request` against the parent view overlaid with local changes.
    ///
    /// No matches yields an empty vector, never an error.
    pub fn execute_fetch(&self, request: &FetchRequest) -> StackResult<Vec<ManagedObject>> {
        self.affinity.check("execute_fetch")?;
        entity_of(&self.model, request.entity_name())?;
        let base = self.parent_fetch(request)?;
        Ok(self.changes.overlay(base, request))
    }

    pub fn count(&self, request: &FetchRequest) -> StackResult<usize> {
        Ok(self.execute_fetch(request)?.len())
    }

    /// Discards every pending change; returns what was discarded.
    pub fn rollback(&mut self) -> StackResult<ChangeSummary> {
        self.affinity.check("rollback")?;
        let discarded = self.changes.summary();
        self.changes = ChangeSet::default();
        if !discarded.is_empty() {
            debug!(
                "event=context_rollback module=context status=ok role={} discarded={}",
                self.role().as_str(),
                discarded.total()
            );
        }
        Ok(discarded)
    }

    /// Saves pending changes one tier down.
    ///
    /// Main tier: validates, then pushes into the writer tier and waits for
    /// the writer to accept them (no store I/O). Writer tier: commits into
    /// the store. On any error the pending changes are kept unchanged.
    pub fn save(&mut self) -> StackResult<ChangeSummary> {
        self.affinity.check("save")?;
        if self.changes.is_empty() {
            return Ok(ChangeSummary::default());
        }
        self.changes.validate(&self.model)?;

        let summary = match &mut self.parent {
            Parent::Writer(writer) => {
                let pushed = self.changes.clone();
                let summary = pushed.summary();
                writer.perform_and_wait(move |parent| parent.absorb(pushed))??;
                summary
            }
            Parent::Store(coordinator) => coordinator.commit(&self.changes)?,
        };

        self.changes = ChangeSet::default();
        Ok(summary)
    }

    fn absorb(&mut self, child: ChangeSet) -> StackResult<()> {
        self.affinity.check("absorb")?;
        self.changes.absorb(child);
        Ok(())
    }

    fn parent_fetch(&self, request: &FetchRequest) -> StackResult<Vec<ManagedObject>> {
        match &self.parent {
            Parent::Store(coordinator) => Ok(coordinator.fetch_matching(request)?),
            Parent::Writer(writer) => {
                let unbounded = request.unbounded();
                writer.perform_and_wait(move |parent| parent.execute_fetch(&unbounded))?
            }
        }
    }

    fn parent_object(&self, id: ObjectId) -> StackResult<Option<ManagedObject>> {
        match &self.parent {
            Parent::Store(coordinator) => Ok(coordinator.object(id)?),
            Parent::Writer(writer) => writer.perform_and_wait(move |parent| parent.object(id))?,
        }
    }
}

fn entity_of<'m>(model: &'m ObjectModel, name: &str) -> Result<&'m EntityDescription, ValidationError> {
    model
        .entity(name)
        .ok_or_else(|| ValidationError::UnknownEntity(name.to_string()))
}

fn check_attribute(entity: &EntityDescription, key: &str, value: &Value) -> Result<(), ValidationError> {
    let attribute = entity
        .attribute(key)
        .ok_or_else(|| ValidationError::UnknownAttribute {
            entity: entity.name.clone(),
            attribute: key.to_string(),
        })?;
    check_type(&entity.name, key, attribute.kind, value)
}
