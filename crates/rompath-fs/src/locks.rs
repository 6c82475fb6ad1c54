//! One fetch in flight per cache destination.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Per-destination fetch serialization.
///
/// Concurrent openers of the same uncached archive queue on the same slot;
/// whoever runs second re-checks the cache and finds the file already there.
/// Slots are dropped once nobody holds or waits on them.
#[derive(Debug, Default)]
pub struct FetchLocks {
    slots: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FetchLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the slot for `destination`.
    pub fn run<T>(&self, destination: &Path, f: impl FnOnce() -> T) -> T {
        let slot = Slot {
            locks: self,
            destination,
            shared: self.acquire_slot(destination),
        };
        let _guard = lock(&slot.shared);
        f()
    }

    /// Whether a fetch for `destination` is running or queued.
    pub fn is_busy(&self, destination: &Path) -> bool {
        lock(&self.slots).contains_key(destination)
    }

    fn acquire_slot(&self, destination: &Path) -> Arc<Mutex<()>> {
        let mut slots = lock(&self.slots);
        Arc::clone(slots.entry(destination.to_path_buf()).or_default())
    }
}

/// A claimed slot; released on drop, including while unwinding.
struct Slot<'a> {
    locks: &'a FetchLocks,
    destination: &'a Path,
    shared: Arc<Mutex<()>>,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        let mut slots = lock(&self.locks.slots);
        // One reference in the map, one held here.
        if Arc::strong_count(&self.shared) == 2 {
            slots.remove(self.destination);
        }
    }
}

/// Lock a mutex, ignoring poisoning from a panicked holder.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn serializes_same_destination() {
        let locks = Arc::new(FetchLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let dest = PathBuf::from("/cache/gameA.zip");

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let active = Arc::clone(&active);
                let max_active = Arc::clone(&max_active);
                let dest = dest.clone();
                thread::spawn(move || {
                    locks.run(&dest, || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_active.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(!locks.is_busy(&dest));
    }

    #[test]
    fn busy_only_while_running() {
        let locks = FetchLocks::new();
        let dest = Path::new("/cache/gameA.zip");

        let seen = locks.run(dest, || locks.is_busy(dest));
        assert!(seen);
        assert!(!locks.is_busy(dest));
        assert!(!locks.is_busy(Path::new("/cache/gameB.zip")));
    }
}
