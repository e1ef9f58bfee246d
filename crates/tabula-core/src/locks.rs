use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tabula_model::DatasetId;

/// One mutual-exclusion section per dataset.
///
/// Schema extensions, generation swaps and calculation changes on the same dataset must not
/// interleave; work on different datasets proceeds in parallel.
#[derive(Debug, Default)]
pub struct DatasetLocks {
    locks: Mutex<HashMap<DatasetId, Arc<Mutex<()>>>>,
}

impl DatasetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock of `dataset_id`.
    ///
    /// The entry is dropped from the table once no other caller holds or waits for it.
    pub fn run_exclusive<T>(&self, dataset_id: &DatasetId, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock().expect("dataset lock table mutex poisoned");
            Arc::clone(locks.entry(dataset_id.clone()).or_default())
        };
        let out = {
            let _guard = lock.lock().expect("dataset lock mutex poisoned");
            f()
        };

        let mut locks = self.locks.lock().expect("dataset lock table mutex poisoned");
        // One reference in the table, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(dataset_id);
        }
        out
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().expect("dataset lock table mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_dataset_is_serialized() {
        let locks = Arc::new(DatasetLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let id = DatasetId::from("d1");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (locks, inside, max_inside, id) =
                    (locks.clone(), inside.clone(), max_inside.clone(), id.clone());
                thread::spawn(move || {
                    locks.run_exclusive(&id, || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(5));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn idle_entries_are_released() {
        let locks = DatasetLocks::new();
        for n in 0..10 {
            let id = DatasetId::from(format!("d{n}"));
            assert_eq!(locks.run_exclusive(&id, || n * 2), n * 2);
        }
        assert_eq!(locks.len(), 0);

        let outer = DatasetId::from("outer");
        locks.run_exclusive(&outer, || {
            locks.run_exclusive(&DatasetId::from("inner"), || ());
            assert_eq!(locks.len(), 1);
        });
        assert_eq!(locks.len(), 0);
    }
}
