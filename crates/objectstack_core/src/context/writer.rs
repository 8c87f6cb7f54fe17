//! Private serial queue that owns the writer context.
//!
//! # Responsibility
//! - Run the writer context on one dedicated thread.
//! - Execute submitted jobs strictly in submission order.
//! - Drain every queued job before the thread exits on shutdown.
//!
//! # Invariants
//! - The writer context (and with it the store coordinator) is only ever
//!   touched from the queue thread.
//! - Blocking submissions from the queue thread itself are refused.

use crate::config::ConfigError;
use crate::context::affinity::ContextRole;
use crate::context::ObjectContext;
use crate::error::{StackError, StackResult};
use crate::model::schema::ObjectModel;
use crate::store::StoreCoordinator;
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

const WRITER_THREAD_NAME: &str = "objectstack-writer";

type Job = Box<dyn FnOnce(&mut ObjectContext) + Send + 'static>;

enum Command {
    Run(Job),
    Shutdown,
}

/// Cloneable submission handle for the writer queue.
#[derive(Clone)]
pub struct WriterHandle {
    sender: Sender<Command>,
    thread: ThreadId,
}

impl WriterHandle {
    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    /// Enqueues `job` and returns immediately.
    pub fn perform<F>(&self, job: F) -> StackResult<()>
    where
        F: FnOnce(&mut ObjectContext) + Send + 'static,
    {
        self.sender
            .send(Command::Run(Box::new(job)))
            .map_err(|_| StackError::WriterUnavailable)
    }

    /// Enqueues `job` and blocks until it has run, returning its output.
    pub fn perform_and_wait<F, T>(&self, job: F) -> StackResult<T>
    where
        F: FnOnce(&mut ObjectContext) -> T + Send + 'static,
        T: Send + 'static,
    {
        if std::thread::current().id() == self.thread {
            return Err(StackError::Reentrancy(ContextRole::Writer));
        }
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.perform(move |context| {
            let _ = reply_tx.send(job(context));
        })?;
        reply_rx.recv().map_err(|_| StackError::WriterUnavailable)
    }
}

/// Owner of the writer thread.
pub struct WriterQueue {
    handle: WriterHandle,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WriterQueue {
    /// Starts the queue thread; the coordinator moves onto it.
    pub(crate) fn spawn(
        model: Arc<ObjectModel>,
        coordinator: StoreCoordinator,
    ) -> StackResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name(WRITER_THREAD_NAME.to_string())
            .spawn(move || run_queue(model, coordinator, receiver))
            .map_err(|err| StackError::from(ConfigError::WriterSpawn(err)))?;

        let handle = WriterHandle {
            sender,
            thread: worker.thread().id(),
        };
        Ok(Self {
            handle,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn handle(&self) -> &WriterHandle {
        &self.handle
    }

    pub fn perform<F>(&self, job: F) -> StackResult<()>
    where
        F: FnOnce(&mut ObjectContext) + Send + 'static,
    {
        self.handle.perform(job)
    }

    pub fn perform_and_wait<F, T>(&self, job: F) -> StackResult<T>
    where
        F: FnOnce(&mut ObjectContext) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.handle.perform_and_wait(job)
    }

    /// Blocks until every job submitted before this call has run.
    pub fn flush(&self) -> StackResult<()> {
        self.perform_and_wait(|_| ())
    }

    /// Stops accepting work after draining queued jobs, then joins the thread.
    pub fn shutdown(&self) {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return;
        };
        let _ = self.handle.sender.send(Command::Shutdown);
        if worker.thread().id() == std::thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            warn!("event=writer_stop module=writer status=error reason=panicked");
        }
    }
}

impl Drop for WriterQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_queue(model: Arc<ObjectModel>, coordinator: StoreCoordinator, receiver: Receiver<Command>) {
    let mut context = ObjectContext::for_writer(model, coordinator);
    info!("event=writer_start module=writer status=ok");

    for command in receiver {
        match command {
            Command::Run(job) => job(&mut context),
            Command::Shutdown => break,
        }
    }

    let pending = context.pending_summary();
    if pending.is_empty() {
        info!("event=writer_stop module=writer status=ok");
    } else {
        warn!(
            "event=writer_stop module=writer status=error reason=undurable_changes inserted={} updated={} deleted={}",
            pending.inserted, pending.updated, pending.deleted
        );
    }
}
