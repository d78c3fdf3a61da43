//! Single-slot latest-value holder
//!
//! A new value replaces the previous one; nothing queues. Readers take a
//! pointer clone of the current `Arc` and never hold the slot while working.

use std::sync::Arc;

use tokio::sync::watch;

/// Create a connected writer/reader pair
pub fn latest_slot<T>() -> (LatestSlot<T>, LatestReader<T>) {
    let (tx, rx) = watch::channel(None);
    (LatestSlot { tx }, LatestReader { rx })
}

/// Write end
#[derive(Debug)]
pub struct LatestSlot<T> {
    tx: watch::Sender<Option<Arc<T>>>,
}

impl<T> LatestSlot<T> {
    /// Replace the current value
    pub fn publish(&self, value: T) -> Arc<T> {
        let value = Arc::new(value);
        self.tx.send_replace(Some(Arc::clone(&value)));
        value
    }

    /// Another reader for the same slot
    pub fn subscribe(&self) -> LatestReader<T> {
        LatestReader {
            rx: self.tx.subscribe(),
        }
    }

    /// Current value as seen by the writer
    pub fn current(&self) -> Option<Arc<T>> {
        self.tx.borrow().clone()
    }
}

/// Read end
#[derive(Debug)]
pub struct LatestReader<T> {
    rx: watch::Receiver<Option<Arc<T>>>,
}

impl<T> Clone for LatestReader<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T> LatestReader<T> {
    /// Most recent value, `None` before the first publish
    pub fn latest(&self) -> Option<Arc<T>> {
        self.rx.borrow().clone()
    }

    /// Wait until a value newer than the last one seen by this reader is published
    ///
    /// Returns `false` once the writer is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Mark the current value as seen and return it
    pub fn take_seen(&mut self) -> Option<Arc<T>> {
        self.rx.borrow_and_update().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_until_published() {
        let (slot, reader) = latest_slot::<u32>();
        assert!(reader.latest().is_none());
        slot.publish(7);
        assert_eq!(reader.latest().as_deref(), Some(&7));
    }

    #[test]
    fn publish_replaces_never_queues() {
        let (slot, reader) = latest_slot::<u32>();
        for i in 0..100 {
            slot.publish(i);
        }
        assert_eq!(reader.latest().as_deref(), Some(&99));
    }

    #[tokio::test]
    async fn changed_wakes_reader() {
        let (slot, mut reader) = latest_slot::<&'static str>();
        let waiter = tokio::spawn(async move {
            assert!(reader.changed().await);
            reader.take_seen()
        });
        slot.publish("fresh");
        assert_eq!(waiter.await.unwrap().as_deref(), Some(&"fresh"));
    }

    #[tokio::test]
    async fn changed_reports_writer_gone() {
        let (slot, mut reader) = latest_slot::<u8>();
        drop(slot);
        assert!(!reader.changed().await);
    }
}
