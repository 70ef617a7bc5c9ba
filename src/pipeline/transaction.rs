//!
//! Transaction scope
//! -----------------
//! Exactly one unit-of-work handle per request, exactly one of
//! commit/rollback, release guaranteed on every exit path. The pool and the
//! handle are collaborator traits; the pipeline owns the handle through
//! `TransactionScope`, whose Drop implementation rolls back anything left
//! unresolved so a defect downstream can never leak a handle into the next
//! request served by the same worker.

use tracing::warn;

use crate::error::{AppResult, ErrorKind};

pub trait UnitOfWork {
    fn commit(&mut self) -> AppResult<()>;
    fn rollback(&mut self) -> AppResult<()>;
    /// Return the handle to its pool. Default is a no-op for handles whose
    /// resources are dropped with the value.
    fn release(&mut self) {}
}

pub trait UnitOfWorkPool: Send + Sync {
    type Handle: UnitOfWork;

    /// Acquire a handle for one request. Exhaustion or connection failure is
    /// a system error.
    fn acquire(&self) -> AppResult<Self::Handle>;
}

pub struct TransactionScope<H: UnitOfWork> {
    handle: H,
    resolved: bool,
    released: bool,
}

impl<H: UnitOfWork> TransactionScope<H> {
    pub fn new(handle: H) -> Self {
        Self { handle, resolved: false, released: false }
    }

    /// The live unit of work, for handler use.
    pub fn unit(&mut self) -> &mut H {
        &mut self.handle
    }

    pub fn commit(&mut self) -> AppResult<()> {
        let result = self.handle.commit();
        self.finish();
        result
    }

    pub fn rollback(&mut self) -> AppResult<()> {
        let result = self.handle.rollback();
        self.finish();
        result
    }

    /// Apply the outcome for a thrown failure: allow-listed kinds still
    /// commit, everything else rolls back.
    pub fn resolve_failure(&mut self, kind: ErrorKind, no_rollback: &[ErrorKind]) -> AppResult<()> {
        if no_rollback.contains(&kind) {
            self.commit()
        } else {
            self.rollback()
        }
    }

    fn finish(&mut self) {
        self.resolved = true;
        if !self.released {
            self.handle.release();
            self.released = true;
        }
    }
}

impl<H: UnitOfWork> Drop for TransactionScope<H> {
    fn drop(&mut self) {
        if !self.resolved {
            warn!(target: "vestibule::transaction", "unit of work dropped unresolved; rolling back");
            let _ = self.handle.rollback();
        }
        if !self.released {
            self.handle.release();
            self.released = true;
        }
    }
}
