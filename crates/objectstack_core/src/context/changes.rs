//! Pending change tracking for one context tier.
//!
//! # Responsibility
//! - Record inserts, updates and deletes made in a context since its last save.
//! - Merge a child's pushed changes into a parent's pending changes.
//! - Overlay pending changes on top of a parent's answer to a fetch.
//!
//! # Invariants
//! - An id appears in at most one of `inserted`, `updated`, `deleted`.
//! - Deleting an object inserted in the same tier cancels the insert.
//! - Updating an object inserted in the same tier keeps it an insert.

use crate::fetch::FetchRequest;
use crate::model::object::{ManagedObject, ObjectId, ValidationError};
use crate::model::schema::ObjectModel;
use std::collections::{BTreeMap, BTreeSet};

/// Counts of pending changes, used in logs and save reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// What one tier knows about an object id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Pending<'a> {
    Changed(&'a ManagedObject),
    Deleted,
    Untouched,
}

/// Inserts, updates and deletes not yet saved by one tier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    inserted: BTreeMap<ObjectId, ManagedObject>,
    updated: BTreeMap<ObjectId, ManagedObject>,
    deleted: BTreeSet<ObjectId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn summary(&self) -> ChangeSummary {
        ChangeSummary {
            inserted: self.inserted.len(),
            updated: self.updated.len(),
            deleted: self.deleted.len(),
        }
    }

    pub fn inserted(&self) -> impl Iterator<Item = &ManagedObject> {
        self.inserted.values()
    }

    pub fn updated(&self) -> impl Iterator<Item = &ManagedObject> {
        self.updated.values()
    }

    pub fn deleted(&self) -> impl Iterator<Item = &ObjectId> {
        self.deleted.iter()
    }

    pub(crate) fn lookup(&self, id: ObjectId) -> Pending<'_> {
        if self.deleted.contains(&id) {
            return Pending::Deleted;
        }
        self.inserted
            .get(&id)
            .or_else(|| self.updated.get(&id))
            .map_or(Pending::Untouched, Pending::Changed)
    }

    pub(crate) fn record_insert(&mut self, object: ManagedObject) {
        self.deleted.remove(&object.id());
        self.inserted.insert(object.id(), object);
    }

    pub(crate) fn record_update(&mut self, object: ManagedObject) {
        if let Some(existing) = self.inserted.get_mut(&object.id()) {
            *existing = object;
        } else {
            self.updated.insert(object.id(), object);
        }
    }

    /// Records a delete; returns `false` when the id was already deleted.
    pub(crate) fn record_delete(&mut self, id: ObjectId) -> bool {
        if self.inserted.remove(&id).is_some() {
            return true;
        }
        self.updated.remove(&id);
        self.deleted.insert(id)
    }

    /// Folds a child tier's pushed changes into this tier.
    pub(crate) fn absorb(&mut self, child: ChangeSet) {
        for (_, object) in child.inserted {
            self.record_insert(object);
        }
        for (_, object) in child.updated {
            self.record_update(object);
        }
        for id in child.deleted {
            self.record_delete(id);
        }
    }

    /// Validates every inserted and updated object against `model`.
    pub(crate) fn validate(&self, model: &ObjectModel) -> Result<(), ValidationError> {
        for object in self.inserted.values().chain(self.updated.values()) {
            let entity = model
                .entity(object.entity())
                .ok_or_else(|| ValidationError::UnknownEntity(object.entity().to_string()))?;
            object.validate(entity)?;
        }
        Ok(())
    }

    /// Applies this tier's changes to `base`, the parent's unbounded answer
    /// to `request`, then sorts and pages.
    pub(crate) fn overlay(
        &self,
        base: Vec<ManagedObject>,
        request: &FetchRequest,
    ) -> Vec<ManagedObject> {
        let mut merged = base
            .into_iter()
            .filter(|object| {
                !self.deleted.contains(&object.id()) && !self.updated.contains_key(&object.id())
            })
            .collect::<Vec<_>>();
        merged.extend(
            self.updated
                .values()
                .chain(self.inserted.values())
                .filter(|object| request.matches(object))
                .cloned(),
        );
        request.finish(merged)
    }
}
