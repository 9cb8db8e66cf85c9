//! Per-family single-writer locks.
//!
//! Scheduler passes and merge batches for one family never interleave;
//! different families proceed independently.

use crate::model::FamilyId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct FamilyLocks {
    locks: Mutex<HashMap<FamilyId, Arc<Mutex<()>>>>,
}

impl FamilyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the writer lock of `family_id`.
    ///
    /// A poisoned lock is recovered: the guarded state lives in SQLite,
    /// where an interrupted unit has already rolled back.
    pub fn with_family<T>(&self, family_id: FamilyId, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(family_id).or_default())
        };

        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::FamilyLocks;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use uuid::Uuid;

    #[test]
    fn same_family_sections_do_not_overlap() {
        let locks = Arc::new(FamilyLocks::new());
        let family = Uuid::new_v4();
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let overlaps = Arc::clone(&overlaps);
                thread::spawn(move || {
                    for _ in 0..50 {
                        locks.with_family(family, || {
                            if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().expect("worker should finish");
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn nested_sections_for_different_families_proceed() {
        let locks = FamilyLocks::new();
        let value = locks.with_family(Uuid::new_v4(), || {
            locks.with_family(Uuid::new_v4(), || 7)
        });
        assert_eq!(value, 7);
    }
}
