//! Distributed locker: TTL mutex guaranteeing at-most-one active retry per
//! execution id across worker processes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::runtime::TimeProvider;

/// Non-blocking TTL lock.
///
/// When several scheduler instances race on the same key, exactly one call
/// returns `true`. `false` means "already being handled" and is never an
/// error condition.
#[async_trait]
pub trait Locker: Send + Sync {
    async fn try_lock(&self, key: &str, owner: &str, ttl: Duration) -> bool;

    /// Releases only when `owner` still holds the lock; a stale owner's
    /// release is a no-op.
    async fn release(&self, key: &str, owner: &str);
}

struct LockRecord {
    owner: String,
    expires_at_millis: i64,
}

/// Single-process locker. Multi-process deployments swap in a shared
/// implementation behind the same trait.
pub struct MemoryLocker {
    locks: Mutex<HashMap<String, LockRecord>>,
    time: Arc<dyn TimeProvider>,
}

impl MemoryLocker {
    pub fn new(time: Arc<dyn TimeProvider>) -> Self {
        MemoryLocker {
            locks: Mutex::new(HashMap::new()),
            time,
        }
    }
}

#[async_trait]
impl Locker for MemoryLocker {
    async fn try_lock(&self, key: &str, owner: &str, ttl: Duration) -> bool {
        let now = self.time.now_millis();
        let mut locks = self.locks.lock();
        match locks.get(key) {
            Some(record) if record.expires_at_millis > now => false,
            _ => {
                locks.insert(
                    key.to_string(),
                    LockRecord {
                        owner: owner.to_string(),
                        expires_at_millis: now + ttl.as_millis() as i64,
                    },
                );
                true
            }
        }
    }

    async fn release(&self, key: &str, owner: &str) {
        let mut locks = self.locks.lock();
        if locks.get(key).map(|r| r.owner == owner).unwrap_or(false) {
            locks.remove(key);
        }
    }
}
