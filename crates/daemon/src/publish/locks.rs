use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};

use common::store::StoreKey;

/// One async mutex per store key, created on demand
///
/// Entries are weak; a key's mutex lives only as long as someone holds or
/// waits on it.
#[derive(Debug, Clone, Default)]
pub struct KeyLocks {
    locks: Arc<parking_lot::Mutex<HashMap<StoreKey, Weak<Mutex<()>>>>>,
}

/// Held for the duration of a keyed critical section
#[derive(Debug)]
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &StoreKey) -> KeyGuard {
        let lock = {
            let mut locks = self.locks.lock();
            match locks.get(key).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    locks.retain(|_, lock| lock.strong_count() > 0);
                    let lock = Arc::new(Mutex::new(()));
                    locks.insert(key.clone(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        KeyGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Keys with a live mutex
    #[cfg(test)]
    fn live_keys(&self) -> usize {
        self.locks
            .lock()
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }
}
