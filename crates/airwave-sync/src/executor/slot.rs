//! Typed hand-off between graph operations.

use std::sync::Arc;

use tokio::sync::Mutex;

/// A value one operation produces and its dependents consume.
///
/// An empty slot after the producer finished means the producer failed.
#[derive(Debug)]
pub struct Slot<T> {
    inner: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Slot {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Slot {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn put(&self, value: T) {
        *self.inner.lock().await = Some(value);
    }

    pub async fn take(&self) -> Option<T> {
        self.inner.lock().await.take()
    }

    pub async fn is_filled(&self) -> bool {
        self.inner.lock().await.is_some()
    }
}

impl<T: Clone> Slot<T> {
    pub async fn get(&self) -> Option<T> {
        self.inner.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_take() {
        let slot = Slot::new();
        let reader = slot.clone();
        assert!(!reader.is_filled().await);

        slot.put(vec![1, 2]).await;
        assert_eq!(reader.get().await, Some(vec![1, 2]));
        assert_eq!(reader.take().await, Some(vec![1, 2]));
        assert!(slot.take().await.is_none());
    }
}
