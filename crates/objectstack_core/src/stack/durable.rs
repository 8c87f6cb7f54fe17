//! Durable-write attempts scheduled on the writer queue.
//!
//! # Responsibility
//! - Commit the writer tier's pending changes for one save.
//! - Retry store failures with backoff, then report the final outcome.
//!
//! # Invariants
//! - Nothing sleeps on the writer queue; backoff waits run on a timer
//!   thread that re-enqueues the next attempt.
//! - Each attempt commits everything the writer holds, so a later save's
//!   write also flushes changes kept by an earlier failure.
//! - The completer resolves once: from the last attempt, or as `Failed`
//!   when the queue stops before a scheduled attempt runs.

use crate::config::RetryPolicy;
use crate::context::changes::ChangeSummary;
use crate::context::writer::WriterHandle;
use crate::context::ObjectContext;
use crate::error::{StackError, StackResult};
use crate::stack::save::{DurableWriteError, DurableWriteReporter, SaveCompleter};
use log::{error, info, warn};
use std::time::{Duration, Instant};

const RETRY_THREAD_NAME: &str = "objectstack-retry";

/// One save's durable write, carried from attempt to attempt.
pub(crate) struct DurableWrite {
    writer: WriterHandle,
    policy: RetryPolicy,
    reporter: Option<DurableWriteReporter>,
    completer: SaveCompleter,
    attempt: u32,
    started_at: Instant,
}

impl DurableWrite {
    pub(crate) fn new(
        writer: WriterHandle,
        policy: RetryPolicy,
        reporter: Option<DurableWriteReporter>,
        completer: SaveCompleter,
    ) -> Self {
        Self {
            writer,
            policy,
            reporter,
            completer,
            attempt: 1,
            started_at: Instant::now(),
        }
    }

    /// Puts the next attempt at the back of the writer queue.
    pub(crate) fn enqueue(self) -> StackResult<()> {
        let writer = self.writer.clone();
        writer.perform(move |context| self.run(context))
    }

    fn run(self, context: &mut ObjectContext) {
        match context.save() {
            Ok(summary) => {
                info!(
                    "event=durable_write module=durable status=ok attempt={} inserted={} updated={} deleted={} duration_ms={}",
                    self.attempt,
                    summary.inserted,
                    summary.updated,
                    summary.deleted,
                    self.started_at.elapsed().as_millis()
                );
                self.completer.finish(Ok(summary));
            }
            Err(err @ StackError::Store(_)) if self.attempt < self.policy.attempts() => {
                self.schedule_retry(&err, context.pending_summary());
            }
            Err(err) => self.give_up(&err, context.pending_summary()),
        }
    }

    fn schedule_retry(mut self, cause: &StackError, pending: ChangeSummary) {
        let delay = self.policy.backoff_after(self.attempt);
        warn!(
            "event=durable_write module=durable status=retry attempt={} delay_ms={} error={}",
            self.attempt,
            delay.as_millis(),
            cause
        );

        let failed = DurableWriteError::new(self.attempt, cause, pending);
        let reporter = self.reporter.clone();
        self.attempt += 1;
        let spawned = std::thread::Builder::new()
            .name(RETRY_THREAD_NAME.to_string())
            .spawn(move || self.resume_after(delay));

        if let Err(err) = spawned {
            error!(
                "event=durable_write module=durable status=error reason=timer_spawn error={}",
                err
            );
            if let Some(reporter) = reporter {
                reporter(&failed);
            }
        }
    }

    fn resume_after(self, delay: Duration) {
        std::thread::sleep(delay);
        if self.enqueue().is_err() {
            warn!("event=durable_write module=durable status=error reason=writer_stopped");
        }
    }

    fn give_up(self, cause: &StackError, pending: ChangeSummary) {
        let failed = DurableWriteError::new(self.attempt, cause, pending);
        error!(
            "event=durable_write module=durable status=error attempts={} pending={} error={}",
            failed.attempts,
            failed.pending.total(),
            failed.message
        );
        if let Some(reporter) = &self.reporter {
            reporter(&failed);
        }
        self.completer.finish(Err(failed));
    }
}
