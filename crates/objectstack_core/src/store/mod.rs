//! Store coordinator: the only component that touches the store file.
//!
//! # Responsibility
//! - Own the SQLite connection for one store and the model it was opened with.
//! - Answer object reads and apply a whole change set as one transaction.
//! - Refuse to open a store created by a different model.
//!
//! # Invariants
//! - A commit is all-or-nothing; a failed commit leaves the file unchanged.
//! - An incompatible or unreadable store is reported, never migrated,
//!   truncated or deleted here.
//! - The coordinator is owned by the writer tier and never shared.

use crate::context::changes::{ChangeSet, ChangeSummary};
use crate::db::{open_store, open_store_in_memory, DbError};
use crate::fetch::FetchRequest;
use crate::model::object::{ManagedObject, ObjectId};
use crate::model::schema::ObjectModel;
use crate::model::value::Value;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const META_MODEL_NAME: &str = "model_name";
const META_MODEL_VERSION: &str = "model_version";

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    Encode(serde_json::Error),
    Corrupt(String),
    IncompatibleModel {
        store_model: String,
        expected_model: String,
    },
    MissingObject(ObjectId),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Encode(err) => write!(f, "failed to encode object attributes: {err}"),
            Self::Corrupt(message) => write!(f, "store contents are corrupt: {message}"),
            Self::IncompatibleModel {
                store_model,
                expected_model,
            } => write!(
                f,
                "store was created by model `{store_model}`, incompatible with `{expected_model}`"
            ),
            Self::MissingObject(id) => write!(f, "object {id} is missing from the store"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Encode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encode(value)
    }
}

/// Where the store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    InMemory,
}

/// Mediates between the writer context and the store file.
pub struct StoreCoordinator {
    conn: Connection,
    model: Arc<ObjectModel>,
    location: StoreLocation,
}

impl StoreCoordinator {
    /// Opens (creating if absent) the store file at `path` for `model`.
    pub fn open(model: Arc<ObjectModel>, path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let conn = open_store(path)?;
        Self::attach(conn, model, StoreLocation::File(path.to_path_buf()))
    }

    pub fn open_in_memory(model: Arc<ObjectModel>) -> StoreResult<Self> {
        let conn = open_store_in_memory()?;
        Self::attach(conn, model, StoreLocation::InMemory)
    }

    fn attach(conn: Connection, model: Arc<ObjectModel>, location: StoreLocation) -> StoreResult<Self> {
        let coordinator = Self {
            conn,
            model,
            location,
        };
        coordinator.check_model_metadata()?;
        Ok(coordinator)
    }

    pub fn model(&self) -> &Arc<ObjectModel> {
        &self.model
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Returns store rows of the request's entity matching its predicate,
    /// in insertion order, without sorting or paging.
    pub fn fetch_matching(&self, request: &FetchRequest) -> StoreResult<Vec<ManagedObject>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity, attributes FROM objects WHERE entity = ?1 ORDER BY rowid;",
        )?;
        let rows = stmt.query_map(params![request.entity_name()], read_raw_row)?;

        let mut matched = Vec::new();
        for row in rows {
            let object = decode_row(row?)?;
            if request.matches(&object) {
                matched.push(object);
            }
        }
        Ok(matched)
    }

    pub fn object(&self, id: ObjectId) -> StoreResult<Option<ManagedObject>> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, entity, attributes FROM objects WHERE id = ?1;",
                params![id.to_string()],
                read_raw_row,
            )
            .optional()?;
        raw.map(decode_row).transpose()
    }

    pub fn count_objects(&self, entity: &str) -> StoreResult<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM objects WHERE entity = ?1;",
            params![entity],
            |row| row.get::<_, i64>(0),
        )?;
        usize::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative count {count}")))
    }

    /// Durably applies `changes` in one transaction.
    pub fn commit(&mut self, changes: &ChangeSet) -> StoreResult<ChangeSummary> {
        let summary = changes.summary();
        let now = now_epoch_ms();
        let tx = self.conn.transaction()?;

        for object in changes.inserted() {
            tx.execute(
                "INSERT INTO objects (id, entity, attributes, updated_at) VALUES (?1, ?2, ?3, ?4);",
                params![
                    object.id().to_string(),
                    object.entity(),
                    serde_json::to_string(object.attributes())?,
                    now,
                ],
            )?;
        }

        for object in changes.updated() {
            let changed = tx.execute(
                "UPDATE objects SET attributes = ?2, updated_at = ?3 WHERE id = ?1;",
                params![
                    object.id().to_string(),
                    serde_json::to_string(object.attributes())?,
                    now,
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::MissingObject(object.id()));
            }
        }

        for id in changes.deleted() {
            tx.execute(
                "DELETE FROM objects WHERE id = ?1;",
                params![id.to_string()],
            )?;
        }

        tx.commit()?;
        debug!(
            "event=store_commit module=store status=ok inserted={} updated={} deleted={}",
            summary.inserted, summary.updated, summary.deleted
        );
        Ok(summary)
    }

    fn check_model_metadata(&self) -> StoreResult<()> {
        let expected = format!("{}@{}", self.model.name, self.model.version);
        let stored_name = self.metadata(META_MODEL_NAME)?;
        let stored_version = self.metadata(META_MODEL_VERSION)?;

        match (stored_name, stored_version) {
            (None, None) => {
                self.conn.execute(
                    "INSERT INTO store_metadata (key, value) VALUES (?1, ?2), (?3, ?4);",
                    params![
                        META_MODEL_NAME,
                        self.model.name.as_str(),
                        META_MODEL_VERSION,
                        self.model.version.to_string(),
                    ],
                )?;
                info!(
                    "event=store_metadata module=store status=ok action=stamp model={}",
                    expected
                );
                Ok(())
            }
            (Some(name), Some(version)) => {
                let found = format!("{name}@{version}");
                if found == expected {
                    Ok(())
                } else {
                    Err(StoreError::IncompatibleModel {
                        store_model: found,
                        expected_model: expected,
                    })
                }
            }
            _ => Err(StoreError::Corrupt(
                "store metadata is partially written".to_string(),
            )),
        }
    }

    fn metadata(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM store_metadata WHERE key = ?1;",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }
}

type RawRow = (String, String, String);

fn read_raw_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn decode_row((id, entity, attributes): RawRow) -> StoreResult<ManagedObject> {
    let id = Uuid::parse_str(&id)
        .map_err(|err| StoreError::Corrupt(format!("invalid object id `{id}`: {err}")))?;
    let attributes: BTreeMap<String, Value> = serde_json::from_str(&attributes)
        .map_err(|err| StoreError::Corrupt(format!("invalid attributes for {id}: {err}")))?;
    Ok(ManagedObject::with_id(id, entity, attributes))
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
