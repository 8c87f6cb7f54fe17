//! Store file schema versions.
//!
//! # Invariants
//! - Steps are listed in ascending version order.
//! - `PRAGMA user_version` always equals the last step applied.
//! - A store newer than `latest_version()` is refused, never downgraded.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

/// One schema step: the SQL that moves a store to `version`.
struct SchemaStep {
    version: u32,
    sql: &'static str,
}

const SCHEMA_STEPS: &[SchemaStep] = &[SchemaStep {
    version: 1,
    sql: include_str!("0001_init.sql"),
}];

/// Newest store schema this build can read and write.
pub fn latest_version() -> u32 {
    SCHEMA_STEPS.iter().map(|step| step.version).max().unwrap_or(0)
}

/// Schema version recorded in the store file.
pub fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Brings the store up to `latest_version()` inside one transaction and
/// returns how many steps ran.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<usize> {
    let found = schema_version(conn)?;
    let latest = latest_version();
    if found > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: found,
            latest_supported: latest,
        });
    }

    let pending: Vec<&SchemaStep> = SCHEMA_STEPS
        .iter()
        .filter(|step| step.version > found)
        .collect();
    if pending.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    for step in &pending {
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
    }
    tx.commit()?;

    info!(
        "event=store_migrate module=db status=ok from={} to={} steps={}",
        found,
        latest,
        pending.len()
    );
    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::{apply_migrations, latest_version, schema_version};
    use rusqlite::Connection;

    #[test]
    fn fresh_store_runs_every_step_once() {
        let mut conn = Connection::open_in_memory().expect("in-memory store");
        assert_eq!(schema_version(&conn).expect("version"), 0);

        assert_eq!(apply_migrations(&mut conn).expect("migrate"), 1);
        assert_eq!(schema_version(&conn).expect("version"), latest_version());
        assert_eq!(apply_migrations(&mut conn).expect("re-run"), 0);
    }
}
