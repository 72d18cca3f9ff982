/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

//! A bounded many-producer many-consumer pool of reusable objects.
//!
//! The pool hands out objects last-in first-out so that recently returned
//! items (and their cache lines) are reused first. Returning an item to a
//! full pool drops the item instead of growing; taking from an empty pool is
//! a miss the caller resolves by constructing a fresh item, so exhaustion can
//! never fail the caller.

use std::sync::{Mutex, MutexGuard};

/// A bounded LIFO pool safe to use from many threads concurrently.
#[derive(Debug)]
pub struct ResourcePool<T> {
    stack: Mutex<Vec<T>>,
    capacity: usize,
}

impl<T> ResourcePool<T> {
    /// Create an empty pool that retains at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self {
            stack: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Take the most recently returned item, if any.
    pub fn pop(&self) -> Option<T> {
        self.lock().pop()
    }

    /// Take an item from the pool, or build a fresh one on a miss.
    ///
    /// `create` runs outside the pool lock.
    pub fn pop_or_else<F>(&self, create: F) -> T
    where
        F: FnOnce() -> T,
    {
        // Drop the guard before invoking `create`; the constructor may be
        // arbitrarily slow or panic.
        let popped = self.lock().pop();
        match popped {
            Some(item) => item,
            None => create(),
        }
    }

    /// Return an item to the pool. Items beyond the capacity are dropped.
    pub fn push(&self, item: T) {
        let mut guard = self.lock();
        if guard.len() < self.capacity {
            guard.push(item);
        } else {
            // Run the item's destructor outside the lock.
            drop(guard);
            drop(item);
        }
    }

    /// Number of items currently pooled.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the pool currently holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The maximum number of items the pool retains.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove and drop every pooled item.
    pub fn drain(&self) {
        let drained: Vec<T> = {
            let mut guard = self.lock();
            std::mem::take(&mut *guard)
        };
        drop(drained);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        match self.stack.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // `Vec` stays consistent across panics and we only call
                // non-panicking methods under the lock, so the poison flag
                // carries no information here.
                self.stack.clear_poison();
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn pop_returns_most_recent_push() {
        let pool = ResourcePool::new(4);
        pool.push(1u32);
        pool.push(2u32);
        assert_eq!(pool.pop(), Some(2));
        assert_eq!(pool.pop(), Some(1));
        assert_eq!(pool.pop(), None);
    }

    #[test]
    fn miss_invokes_constructor() {
        let pool = ResourcePool::<u32>::new(4);
        assert_eq!(pool.pop_or_else(|| 42), 42);

        pool.push(7);
        assert_eq!(pool.pop_or_else(|| 42), 7);
    }

    #[test]
    fn push_beyond_capacity_drops() {
        let pool = ResourcePool::new(2);
        for i in 0..10u32 {
            pool.push(i);
        }
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn drain_empties_the_pool() {
        let pool = ResourcePool::new(8);
        for i in 0..8u32 {
            pool.push(i);
        }
        pool.drain();
        assert!(pool.is_empty());
    }

    #[test]
    fn concurrent_churn_respects_capacity() {
        const CAPACITY: usize = 16;
        let pool = Arc::new(ResourcePool::<Box<usize>>::new(CAPACITY));
        let created = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let created = Arc::clone(&created);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let item = pool.pop_or_else(|| {
                            created.fetch_add(1, Ordering::Relaxed);
                            Box::new(0usize)
                        });
                        assert!(pool.len() <= CAPACITY);
                        pool.push(item);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(pool.len() <= CAPACITY);
        // At least one item must have been created on a miss.
        assert!(created.load(Ordering::Relaxed) >= 1);
    }
}
