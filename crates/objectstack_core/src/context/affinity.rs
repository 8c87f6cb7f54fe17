//! Execution-affinity tokens for thread-confined contexts.
//!
//! # Responsibility
//! - Record which thread owns a context at construction time.
//! - Check every context entry point against the calling thread.
//!
//! # Invariants
//! - A token never changes after construction.
//! - A failed check is a programmer error and is reported as
//!   `ConfinementViolation`, never silently tolerated.

use log::error;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::thread::ThreadId;

/// Which tier a context plays in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRole {
    /// Foreground context bound to the host's main (UI) thread.
    Main,
    /// Background context bound to the private writer queue.
    Writer,
}

impl ContextRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Writer => "writer",
        }
    }
}

/// Owning thread of one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionAffinity {
    role: ContextRole,
    owner: ThreadId,
}

impl ExecutionAffinity {
    pub fn bound_to(role: ContextRole, owner: ThreadId) -> Self {
        Self { role, owner }
    }

    /// Binds to the calling thread.
    pub fn current(role: ContextRole) -> Self {
        Self::bound_to(role, std::thread::current().id())
    }

    pub fn role(&self) -> ContextRole {
        self.role
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    /// Fails when called off the owning thread.
    pub fn check(&self, operation: &'static str) -> Result<(), ConfinementViolation> {
        if self.is_current() {
            return Ok(());
        }
        let violation = ConfinementViolation {
            role: self.role,
            operation,
            owner: self.owner,
            caller: std::thread::current().id(),
        };
        error!(
            "event=confinement_violation module=context status=error role={} operation={} owner={:?} caller={:?}",
            self.role.as_str(),
            operation,
            violation.owner,
            violation.caller
        );
        Err(violation)
    }
}

/// A context was touched from a thread that does not own it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfinementViolation {
    pub role: ContextRole,
    pub operation: &'static str,
    pub owner: ThreadId,
    pub caller: ThreadId,
}

impl Display for ConfinementViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "`{}` on the {} context must run on thread {:?}, called from {:?}",
            self.operation,
            self.role.as_str(),
            self.owner,
            self.caller
        )
    }
}

impl Error for ConfinementViolation {}
