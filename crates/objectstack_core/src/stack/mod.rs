//! Persistence stack: model, store coordinator and the two context tiers.
//!
//! # Responsibility
//! - Build each stack part lazily, exactly once, on first access.
//! - Coordinate the two-step save: push main into writer, then enqueue the
//!   durable write on the writer queue.
//!
//! # Invariants
//! - `PersistenceStack::new` performs no I/O.
//! - Only the writer queue thread ever touches the store coordinator.
//! - `save()` returns only after the durable write is enqueued; it never
//!   waits for that write.
//! - Durable writes run in the order their saves were issued.

mod durable;
pub mod registry;
pub mod save;

use crate::config::StackConfig;
use crate::context::affinity::{ContextRole, ExecutionAffinity};
use crate::context::changes::ChangeSummary;
use crate::context::foreground::MainContext;
use crate::context::writer::WriterQueue;
use crate::context::ObjectContext;
use crate::db::DbError;
use crate::error::StackResult;
use crate::model::schema::ObjectModel;
use crate::store::{StoreCoordinator, StoreError};
use durable::DurableWrite;
use log::{debug, error, info};
use once_cell::sync::OnceCell;
use save::{SaveCompleter, SaveHandle, SaveOutcome, SavePhase};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Process-level owner of one object model and one store file.
pub struct PersistenceStack {
    config: StackConfig,
    model: OnceCell<Arc<ObjectModel>>,
    writer: OnceCell<WriterQueue>,
    main_context: OnceCell<MainContext>,
}

impl PersistenceStack {
    pub fn new(config: StackConfig) -> Self {
        Self {
            config,
            model: OnceCell::new(),
            writer: OnceCell::new(),
            main_context: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Whether any lazily-built part exists yet.
    pub fn is_built(&self) -> bool {
        self.model.get().is_some()
    }

    /// Loads the configured model on first call.
    ///
    /// A missing or malformed model resource is a fatal configuration error.
    pub fn managed_object_model(&self) -> StackResult<&Arc<ObjectModel>> {
        self.model.get_or_try_init(|| {
            let name = self.config.model_name();
            match ObjectModel::load_named(self.config.model_source(), name) {
                Ok(model) => {
                    info!(
                        "event=model_load module=stack status=ok model={} version={} entities={}",
                        model.name,
                        model.version,
                        model.entities.len()
                    );
                    Ok(Arc::new(model))
                }
                Err(err) => {
                    error!(
                        "event=model_load module=stack status=error model={} error={}",
                        name, err
                    );
                    Err(err.into())
                }
            }
        })
    }

    /// Directory holding the store file; created when missing.
    pub fn documents_directory(&self) -> StackResult<PathBuf> {
        let dir = self.config.documents_directory()?;
        std::fs::create_dir_all(&dir).map_err(|source| {
            StoreError::from(DbError::CreateDirectory {
                path: dir.clone(),
                source,
            })
        })?;
        Ok(dir)
    }

    pub fn store_path(&self) -> StackResult<PathBuf> {
        Ok(self.documents_directory()?.join(self.config.store_file_name()))
    }

    /// Writer queue, opening the store and starting the queue thread on
    /// first call.
    pub fn writer_context(&self) -> StackResult<&WriterQueue> {
        self.writer.get_or_try_init(|| {
            let started_at = Instant::now();
            let model = Arc::clone(self.managed_object_model()?);
            let path = self.store_path()?;
            let coordinator = StoreCoordinator::open(Arc::clone(&model), &path)?;
            let queue = WriterQueue::spawn(model, coordinator)?;
            info!(
                "event=stack_build module=stack status=ok path={} duration_ms={}",
                path.display(),
                started_at.elapsed().as_millis()
            );
            Ok(queue)
        })
    }

    /// Foreground context bound to the configured main thread.
    pub fn main_context(&self) -> StackResult<&MainContext> {
        self.main_context.get_or_try_init(|| {
            let model = Arc::clone(self.managed_object_model()?);
            let writer = self.writer_context()?.handle().clone();
            let affinity = self.main_affinity();
            Ok(MainContext::new(ObjectContext::for_main(
                affinity, model, writer,
            )))
        })
    }

    fn main_affinity(&self) -> ExecutionAffinity {
        ExecutionAffinity::bound_to(ContextRole::Main, self.config.main_thread())
    }

    /// Saves everything the main context holds.
    ///
    /// Must be called on the main thread. Validation errors surface here and
    /// leave the main context untouched. The durable write is enqueued before
    /// this returns; its result arrives through the returned handle, the
    /// configured reporter and the log.
    pub fn save(&self) -> StackResult<SaveOutcome> {
        self.main_affinity().check("save")?;
        let main = self.main_context()?;
        let mut context = main.lock()?;
        if !context.has_changes()? {
            debug!("event=stack_save module=stack status=ok outcome=no_changes");
            return Ok(SaveOutcome::NoChanges);
        }

        let pushed = match context.save() {
            Ok(pushed) => pushed,
            Err(err) => {
                error!(
                    "event=stack_save module=stack status=error phase=push error={}",
                    err
                );
                return Err(err);
            }
        };
        drop(context);

        let (handle, completer) = SaveHandle::pushed_to_parent(pushed);
        self.enqueue_durable_write(completer)?;
        handle.mark_queued();
        debug!(
            "event=stack_save module=stack status=ok outcome=queued inserted={} updated={} deleted={}",
            pushed.inserted, pushed.updated, pushed.deleted
        );
        Ok(SaveOutcome::Queued(handle))
    }

    /// `save()` followed by waiting for the durable write.
    pub fn save_and_wait(&self) -> StackResult<ChangeSummary> {
        self.save()?.wait()
    }

    /// Blocks until every job enqueued on the writer so far has run.
    pub fn flush(&self) -> StackResult<()> {
        self.writer_context()?.flush()
    }

    /// Re-enqueues a durable write for changes the writer kept after a
    /// failed write.
    pub fn retry_durable_write(&self) -> StackResult<SaveOutcome> {
        let pending = self.durable_pending()?;
        if pending.is_empty() {
            return Ok(SaveOutcome::NoChanges);
        }
        let (handle, completer) = SaveHandle::pushed_to_parent(pending);
        self.enqueue_durable_write(completer)?;
        handle.mark_queued();
        info!(
            "event=durable_write module=stack status=start reason=retry pending={}",
            pending.total()
        );
        Ok(SaveOutcome::Queued(handle))
    }

    /// Changes held by the writer tier that are not durable yet.
    pub fn durable_pending(&self) -> StackResult<ChangeSummary> {
        self.writer_context()?
            .perform_and_wait(|context| context.pending_summary())
    }

    /// Phase of the main tier at rest: `Idle` or
    /// `HasPendingForegroundChanges`.
    pub fn foreground_phase(&self) -> StackResult<SavePhase> {
        let main = self.main_context()?;
        Ok(if main.has_changes()? {
            SavePhase::HasPendingForegroundChanges
        } else {
            SavePhase::Idle
        })
    }

    /// Drains the writer queue and stops its thread. Later saves fail with
    /// `StackError::WriterUnavailable`.
    pub fn shutdown(&self) {
        if let Some(writer) = self.writer.get() {
            writer.shutdown();
        }
    }

    fn enqueue_durable_write(&self, completer: SaveCompleter) -> StackResult<()> {
        let writer = self.writer_context()?;
        DurableWrite::new(
            writer.handle().clone(),
            self.config.retry_policy(),
            self.config.durable_write_reporter().cloned(),
            completer,
        )
        .enqueue()
    }
}
