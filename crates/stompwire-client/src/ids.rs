use std::sync::atomic::{AtomicU64, Ordering};

/// Source of subscription, transaction, and receipt ids.
pub trait IdGenerator: Send + Sync {
    /// Produce a fresh id such as `sub-3`.
    fn next_id(&self, prefix: &str) -> String;
}

/// One counter shared by every prefix: `sub-0`, `tx-1`, `close-2`, ...
#[derive(Debug, Default)]
pub struct CounterIds {
    next: AtomicU64,
}

impl CounterIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting at `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl IdGenerator for CounterIds {
    fn next_id(&self, prefix: &str) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{n}")
    }
}

/// Random v4 UUID suffixes, unique across client instances.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", uuid::Uuid::new_v4())
    }
}
