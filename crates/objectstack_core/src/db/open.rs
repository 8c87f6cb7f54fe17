//! Connection bootstrap for the store file.
//!
//! # Responsibility
//! - Open file-backed or in-memory SQLite connections.
//! - Create the parent directory of a store file when it is missing.
//! - Run schema migrations before handing out a connection.
//!
//! # Invariants
//! - Returned connections have migrations fully applied.
//! - An existing store file is never truncated or replaced here.

use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Opens (creating if absent) the store file at `path`.
///
/// # Side effects
/// - Creates the parent directory when missing.
/// - Emits `store_open` events with duration and status.
pub fn open_store(path: impl AsRef<Path>) -> DbResult<Connection> {
    let path = path.as_ref();
    let started_at = Instant::now();
    info!(
        "event=store_open module=db status=start mode=file path={}",
        path.display()
    );

    let opened = ensure_parent_dir(path).and_then(|()| Ok(Connection::open(path)?));
    finish_open(opened, "file", started_at)
}

/// Opens a private in-memory store with the full schema applied.
pub fn open_store_in_memory() -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=store_open module=db status=start mode=memory");
    finish_open(
        Connection::open_in_memory().map_err(DbError::from),
        "memory",
        started_at,
    )
}

fn finish_open(
    opened: DbResult<Connection>,
    mode: &str,
    started_at: Instant,
) -> DbResult<Connection> {
    let result = opened.and_then(|mut conn| {
        bootstrap_connection(&mut conn)?;
        Ok(conn)
    });

    match &result {
        Ok(_) => info!(
            "event=store_open module=db status=ok mode={} duration_ms={}",
            mode,
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=store_open module=db status=error mode={} duration_ms={} error={}",
            mode,
            started_at.elapsed().as_millis(),
            err
        ),
    }
    result
}

fn ensure_parent_dir(path: &Path) -> DbResult<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    std::fs::create_dir_all(parent).map_err(|source| DbError::CreateDirectory {
        path: parent.to_path_buf(),
        source,
    })
}

fn bootstrap_connection(conn: &mut Connection) -> DbResult<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    apply_migrations(conn)?;
    Ok(())
}
