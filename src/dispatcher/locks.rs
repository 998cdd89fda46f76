//! Request locks.
//!
//! A lock key names "this operation with these arguments". While a job
//! tagged with a key is running, further dispatches under the same key are
//! suppressed before any frame is sent.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Shared set of active lock keys.
#[derive(Clone, Default)]
pub struct RequestLocks {
    active: Arc<Mutex<HashSet<String>>>,
}

impl RequestLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical key for `method` called with `params`.
    ///
    /// # Examples
    ///
    /// ```
    /// use jobwire::RequestLocks;
    /// use serde_json::json;
    ///
    /// assert_eq!(
    ///     RequestLocks::key_for("loadDataSources", &[json!("local")]),
    ///     r#"loadDataSources("local")"#
    /// );
    /// ```
    pub fn key_for(method: &str, params: &[Value]) -> String {
        let args: Vec<String> = params.iter().map(Value::to_string).collect();
        format!("{method}({})", args.join(","))
    }

    /// Mark `key` active. Returns `None` if it already is.
    ///
    /// The key is released when the returned guard is dropped.
    pub fn try_acquire(&self, key: &str) -> Option<RequestLockGuard> {
        let inserted = self.active.lock().insert(key.to_string());
        inserted.then(|| RequestLockGuard {
            locks: self.clone(),
            key: key.to_string(),
        })
    }

    /// Whether `key` is currently held.
    pub fn is_active(&self, key: &str) -> bool {
        self.active.lock().contains(key)
    }

    /// Snapshot of held keys, sorted.
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.active.lock().iter().cloned().collect();
        keys.sort();
        keys
    }

    fn release(&self, key: &str) {
        self.active.lock().remove(key);
    }
}

impl fmt::Debug for RequestLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestLocks")
            .field("active", &self.active_keys())
            .finish()
    }
}

/// Holds a lock key until dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct RequestLockGuard {
    locks: RequestLocks,
    key: String,
}

impl RequestLockGuard {
    /// The held key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for RequestLockGuard {
    fn drop(&mut self) {
        self.locks.release(&self.key);
    }
}

impl fmt::Debug for RequestLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RequestLockGuard").field(&self.key).finish()
    }
}
