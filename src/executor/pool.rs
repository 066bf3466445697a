//! Free lists for reusable task records

use std::sync::{Mutex, PoisonError};

/// A record that can be cleared before going back to its pool.
pub(crate) trait Reset {
    fn reset(&mut self);
}

pub(crate) struct Pool<T> {
    items: Mutex<Vec<T>>,
    capacity: usize,
}

impl<T: Reset + Default> Pool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn get(&self) -> T {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default()
    }

    /// Resets `item` and keeps it unless the pool is full.
    pub fn put(&self, mut item: T) {
        item.reset();
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        if items.len() < self.capacity {
            items.push(item);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Buffer(Vec<u8>);

    impl Reset for Buffer {
        fn reset(&mut self) {
            self.0.clear();
        }
    }

    #[test]
    fn test_put_resets_and_reuses() {
        let pool: Pool<Buffer> = Pool::new(2);
        let mut buffer = pool.get();
        buffer.0.extend_from_slice(b"abc");
        let capacity = buffer.0.capacity();
        pool.put(buffer);

        let reused = pool.get();
        assert!(reused.0.is_empty());
        assert_eq!(reused.0.capacity(), capacity);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool: Pool<Buffer> = Pool::new(1);
        pool.put(Buffer::default());
        pool.put(Buffer::default());
        assert_eq!(pool.len(), 1);
    }
}
