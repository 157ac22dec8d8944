//! Per-connection command id allocation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Strictly increasing id source shared by every caller on one connection.
///
/// Id `0` is reserved and never handed out.
#[derive(Debug)]
pub struct CommandIdAllocator {
    next: AtomicU64,
}

impl Default for CommandIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandIdAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first.max(1)),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Moves the counter past an id the caller picked explicitly.
    pub fn observe(&self, id: u64) {
        self.next.fetch_max(id.saturating_add(1), Ordering::Relaxed);
    }

    /// Value the next call to [`next`](Self::next) would return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn ids_are_strictly_increasing() {
        let ids = CommandIdAllocator::new();
        let seen: Vec<u64> = (0..5).map(|_| ids.next()).collect();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn zero_is_never_allocated() {
        let ids = CommandIdAllocator::starting_at(0);
        assert_eq!(ids.next(), 1);
    }

    #[test]
    fn observe_skips_explicit_ids() {
        let ids = CommandIdAllocator::new();
        ids.next();
        ids.observe(40);
        assert_eq!(ids.next(), 41);
        ids.observe(3);
        assert_eq!(ids.next(), 42);
    }

    #[test]
    fn concurrent_callers_never_collide() {
        let ids = Arc::new(CommandIdAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..500).map(|_| ids.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(all.len(), 4000);
        assert_eq!(ids.peek(), 4001);
    }
}
