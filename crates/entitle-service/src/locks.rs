//! Per-customer operation serialization.
//!
//! Timing resolution and the ongoing/scheduled-action logic read and write
//! the same "current ongoing product" relationship, so two concurrent
//! operations on one customer could otherwise both insert an ongoing
//! product into the same group. Operations on one customer are serialized
//! in-process; the store's revision checks cover whatever a lock cannot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use entitle_core::CustomerId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry of per-customer async locks.
#[derive(Clone, Default)]
pub struct CustomerLocks {
    inner: Arc<Mutex<HashMap<CustomerId, Arc<AsyncMutex<()>>>>>,
}

impl CustomerLocks {
    /// Acquire the lock for one customer, waiting if an operation on the
    /// same customer is in flight. The guard releases on drop.
    pub async fn acquire(&self, customer_id: &CustomerId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().expect("customer lock registry poisoned");
            map.entry(customer_id.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
