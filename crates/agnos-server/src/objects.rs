//! Ref-counted table of server-resident objects.
//!
//! Host objects handed to a peer as proxies are stored here under 64-bit ids
//! derived from the host allocation's address. The table holds the strong
//! reference; the peer holds only the id and steers the count with explicit
//! INCREF / DECREF commands. When a count reaches zero the cell is removed
//! and the host reference dropped. The removal is the last drop, performed
//! outside the table lock so user destructors never run under it.

use std::any::Any;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, PoisonError};

/// A host object shareable across connection threads.
pub type HostObject = std::sync::Arc<dyn Any + Send + Sync>;

struct Cell {
    count: u64,
    value: HostObject,
}

/// Mapping from object id to ref-counted host object.
///
/// One table is shared by every connection of a server, so proxies may
/// travel between sessions that talk to the same process.
#[derive(Default)]
pub struct ObjectTable {
    cells: Mutex<HashMap<i64, Cell>>,
}

impl ObjectTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object (or bump its count) and return its id.
    ///
    /// The id is the host allocation's address; storing the same `Arc`
    /// twice yields the same id with a count of two.
    pub fn store(&self, obj: HostObject) -> i64 {
        let oid = std::sync::Arc::as_ptr(&obj) as *const () as usize as i64;
        let mut cells = self.lock();
        match cells.entry(oid) {
            Entry::Occupied(mut cell) => cell.get_mut().count += 1,
            Entry::Vacant(slot) => {
                slot.insert(Cell { count: 1, value: obj });
            }
        }
        oid
    }

    /// Look up a live object; `None` when the id was never issued or has
    /// been fully decref'd.
    pub fn load(&self, oid: i64) -> Option<HostObject> {
        self.lock().get(&oid).map(|cell| std::sync::Arc::clone(&cell.value))
    }

    /// Look up and downcast a live object.
    pub fn load_as<T: Any + Send + Sync>(&self, oid: i64) -> Option<std::sync::Arc<T>> {
        self.load(oid).and_then(|obj| obj.downcast::<T>().ok())
    }

    /// Add one reference; absent ids are silently ignored.
    pub fn incref(&self, oid: i64) {
        if let Some(cell) = self.lock().get_mut(&oid) {
            cell.count += 1;
        }
    }

    /// Drop one reference; absent ids are silently ignored. The cell is
    /// removed when the count reaches zero.
    pub fn decref(&self, oid: i64) {
        let removed = {
            let mut cells = self.lock();
            match cells.get_mut(&oid) {
                Some(cell) if cell.count <= 1 => cells.remove(&oid),
                Some(cell) => {
                    cell.count -= 1;
                    None
                }
                None => None,
            }
        };
        // Dropped here, after the lock is gone: this may run arbitrary
        // user destructors.
        drop(removed);
    }

    /// The current count for an id, if the cell exists.
    pub fn refcount(&self, oid: i64) -> Option<u64> {
        self.lock().get(&oid).map(|cell| cell.count)
    }

    /// Whether the id currently resolves.
    pub fn contains(&self, oid: i64) -> bool {
        self.lock().contains_key(&oid)
    }

    /// Number of live cells.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the table has no live cells.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, Cell>> {
        self.cells.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[test]
    fn repeated_store_increments_the_count() {
        let table = ObjectTable::new();
        let obj: HostObject = Arc::new(17i64);

        let oid = table.store(Arc::clone(&obj));
        assert_eq!(table.store(obj), oid);
        assert_eq!(table.refcount(oid), Some(2));
    }

    #[test]
    fn load_returns_the_originally_stored_object() {
        let table = ObjectTable::new();
        let oid = table.store(Arc::new(String::from("resident")));

        let loaded = table.load_as::<String>(oid).unwrap();
        assert_eq!(*loaded, "resident");
        assert!(table.load(oid ^ 1).is_none());
    }

    #[test]
    fn matched_increfs_and_decrefs_restore_the_initial_state() {
        let table = ObjectTable::new();
        let oid = table.store(Arc::new(0u8));

        table.incref(oid);
        table.incref(oid);
        table.decref(oid);
        table.decref(oid);
        assert_eq!(table.refcount(oid), Some(1));

        table.decref(oid);
        assert!(!table.contains(oid));
        assert!(table.is_empty());

        // Further ref ops on the dead id are no-ops.
        table.incref(oid);
        table.decref(oid);
        assert!(!table.contains(oid));
    }

    #[test]
    fn final_decref_drops_the_host_reference() {
        struct Canary(Arc<AtomicBool>);
        impl Drop for Canary {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let table = ObjectTable::new();
        let oid = table.store(Arc::new(Canary(Arc::clone(&dropped))));

        assert!(!dropped.load(Ordering::SeqCst));
        table.decref(oid);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn distinct_objects_get_distinct_ids() {
        let table = ObjectTable::new();
        let a = table.store(Arc::new(1i32));
        let b = table.store(Arc::new(2i32));
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }
}
