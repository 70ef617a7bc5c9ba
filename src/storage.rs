//!
//! In-memory item store and unit-of-work pool
//! ------------------------------------------
//! The demo implementation of the pipeline's transactional collaborator.
//! `ItemStore` is plain row storage; `SharedItemStore` wraps it behind
//! `Arc<Mutex<...>>` for cross-request sharing. `MemoryPool` hands out a
//! bounded number of `MemoryUnitOfWork` handles; each handle works on a
//! snapshot of the store, publishes it on commit and discards it on
//! rollback, so partial work from a rejected request never persists.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::item::Item;
use crate::pipeline::{UnitOfWork, UnitOfWorkPool};

#[derive(Debug, Clone)]
pub struct ItemStore {
    rows: Vec<Item>,
    next_id: i64,
}

impl Default for ItemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemStore {
    pub fn new() -> Self {
        Self { rows: Vec::new(), next_id: 1 }
    }

    /// Substring match on name, exact match on release date; either filter
    /// may be absent.
    pub fn search(&self, name: Option<&str>, release_date: Option<&str>) -> Vec<Item> {
        self.rows
            .iter()
            .filter(|item| match name {
                Some(n) if !n.is_empty() => item.name.contains(n),
                _ => true,
            })
            .filter(|item| match release_date {
                Some(d) if !d.is_empty() => item.release_date == d,
                _ => true,
            })
            .cloned()
            .collect()
    }

    pub fn count(&self, name: Option<&str>, release_date: Option<&str>) -> usize {
        self.search(name, release_date).len()
    }

    pub fn find(&self, id: i64) -> Option<Item> {
        self.rows.iter().find(|item| item.id == id).cloned()
    }

    pub fn insert(&mut self, mut item: Item) -> i64 {
        item.id = self.next_id;
        self.next_id += 1;
        let id = item.id;
        self.rows.push(item);
        id
    }

    pub fn update(&mut self, item: &Item) -> bool {
        match self.rows.iter_mut().find(|row| row.id == item.id) {
            Some(row) => {
                *row = item.clone();
                true
            }
            None => false,
        }
    }

    pub fn delete(&mut self, id: i64) -> bool {
        let before = self.rows.len();
        self.rows.retain(|row| row.id != id);
        self.rows.len() != before
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Thread-safe store handle shared across requests.
#[derive(Clone, Default)]
pub struct SharedItemStore(pub Arc<Mutex<ItemStore>>);

impl SharedItemStore {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(ItemStore::new())))
    }

    pub fn snapshot(&self) -> ItemStore {
        self.0.lock().clone()
    }
}

/// Bounded pool of snapshot-based units of work over one shared store.
pub struct MemoryPool {
    store: SharedItemStore,
    permits: Arc<Mutex<usize>>,
}

impl MemoryPool {
    pub fn new(store: SharedItemStore, capacity: usize) -> Self {
        Self { store, permits: Arc::new(Mutex::new(capacity)) }
    }

    pub fn store(&self) -> &SharedItemStore {
        &self.store
    }

    #[cfg(test)]
    pub fn available(&self) -> usize {
        *self.permits.lock()
    }
}

impl UnitOfWorkPool for MemoryPool {
    type Handle = MemoryUnitOfWork;

    fn acquire(&self) -> AppResult<MemoryUnitOfWork> {
        {
            let mut permits = self.permits.lock();
            if *permits == 0 {
                return Err(AppError::system_with_cause(
                    "could not open a unit of work",
                    "pool exhausted",
                ));
            }
            *permits -= 1;
        }
        Ok(MemoryUnitOfWork {
            shared: self.store.clone(),
            work: self.store.snapshot(),
            permits: self.permits.clone(),
            permit_held: true,
        })
    }
}

/// One request's working copy of the store. Commit publishes the copy;
/// rollback simply drops it.
pub struct MemoryUnitOfWork {
    shared: SharedItemStore,
    work: ItemStore,
    permits: Arc<Mutex<usize>>,
    permit_held: bool,
}

impl MemoryUnitOfWork {
    pub fn items(&mut self) -> &mut ItemStore {
        &mut self.work
    }

    pub fn items_ref(&self) -> &ItemStore {
        &self.work
    }
}

impl UnitOfWork for MemoryUnitOfWork {
    fn commit(&mut self) -> AppResult<()> {
        *self.shared.0.lock() = self.work.clone();
        debug!(target: "vestibule::storage", "unit of work committed, {} row(s)", self.work.len());
        Ok(())
    }

    fn rollback(&mut self) -> AppResult<()> {
        debug!(target: "vestibule::storage", "unit of work rolled back");
        Ok(())
    }

    fn release(&mut self) {
        if self.permit_held {
            *self.permits.lock() += 1;
            self.permit_held = false;
        }
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        // Safety net for handles that never went through the scope.
        self.release();
    }
}
