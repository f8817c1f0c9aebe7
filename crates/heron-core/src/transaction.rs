//! Transactions with rollback hooks.
//!
//! A transaction wraps an engine transaction and carries a stack of
//! compensating closures. Catalog mutations push a hook undoing their
//! in-memory effect; on rollback the hooks run in LIFO order, on a
//! successful commit they are discarded. A failed commit also runs the
//! hooks, so the catalog cache always matches the persisted state.

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// A compensating closure run when the transaction aborts.
pub type RollbackHook = Box<dyn FnOnce() + Send>;

/// A database transaction.
///
/// Only one writable transaction is live at a time; the engine serializes
/// them. Dropping an uncommitted transaction rolls it back.
pub struct Transaction<'e> {
    kv: Box<dyn heron_kv::Transaction + 'e>,
    hooks: Mutex<Vec<RollbackHook>>,
}

impl<'e> Transaction<'e> {
    /// Wraps an engine transaction.
    pub fn new(kv: Box<dyn heron_kv::Transaction + 'e>) -> Self {
        Self {
            kv,
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Returns true if the transaction can write.
    pub fn writable(&self) -> bool {
        self.kv.writable()
    }

    /// Returns the underlying engine transaction.
    pub fn kv(&self) -> &dyn heron_kv::Transaction {
        self.kv.as_ref()
    }

    /// Returns the store with the given name.
    pub fn get_store(&self, name: &[u8]) -> Result<Box<dyn heron_kv::Store + '_>> {
        Ok(self.kv.get_store(name)?)
    }

    /// Registers a compensating closure to run if the transaction aborts.
    pub fn on_rollback(&self, hook: RollbackHook) {
        self.hooks.lock().push(hook);
    }

    fn run_hooks(&mut self) {
        let mut hooks = std::mem::take(&mut *self.hooks.lock());
        while let Some(hook) = hooks.pop() {
            hook();
        }
    }

    /// Commits the transaction. On failure the rollback hooks run, so the
    /// catalog cache is restored exactly as before the transaction began.
    pub fn commit(mut self) -> Result<()> {
        match self.kv.commit() {
            Ok(()) => {
                self.hooks.lock().clear();
                Ok(())
            }
            Err(e) => {
                self.run_hooks();
                Err(Error::Engine(e))
            }
        }
    }

    /// Rolls the transaction back, firing the hooks in LIFO order.
    pub fn rollback(mut self) -> Result<()> {
        self.run_hooks();
        self.kv.rollback()?;
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        // an explicit commit or rollback leaves the stack empty; anything
        // left here means the transaction is being abandoned
        self.run_hooks();
    }
}
