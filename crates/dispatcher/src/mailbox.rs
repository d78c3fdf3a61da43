//! Bounded drop-oldest mailbox
//!
//! Single producer (the Dispatcher tick) and single consumer (one sink
//! worker). Items live in a `ringbuf::HeapRb`; the mutex around it is only
//! held for a push or a pop, never across an await. A full mailbox overwrites
//! its oldest entry so the producer never waits.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ringbuf::{traits::*, HeapRb};
use tokio::sync::Notify;

/// Result of a successful offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Enqueued,
    /// The mailbox was full; its oldest item was discarded
    DisplacedOldest,
}

/// The consumer is gone; the rejected item is handed back
pub struct MailboxClosed<T>(pub T);

impl<T> fmt::Debug for MailboxClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MailboxClosed(..)")
    }
}

impl<T> fmt::Display for MailboxClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("mailbox receiver closed")
    }
}

impl<T> std::error::Error for MailboxClosed<T> {}

struct Shared<T> {
    ring: Mutex<HeapRb<T>>,
    notify: Notify,
    sender_closed: AtomicBool,
    receiver_closed: AtomicBool,
    capacity: usize,
}

impl<T> Shared<T> {
    fn ring(&self) -> MutexGuard<'_, HeapRb<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn len(&self) -> usize {
        self.ring().occupied_len()
    }
}

/// Create a mailbox holding at most `capacity` items (minimum 1)
pub fn mailbox<T>(capacity: usize) -> (MailboxSender<T>, MailboxReceiver<T>) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        ring: Mutex::new(HeapRb::new(capacity)),
        notify: Notify::new(),
        sender_closed: AtomicBool::new(false),
        receiver_closed: AtomicBool::new(false),
        capacity,
    });
    (
        MailboxSender {
            shared: Arc::clone(&shared),
        },
        MailboxReceiver { shared },
    )
}

/// Write end, owned by the Dispatcher
pub struct MailboxSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> MailboxSender<T> {
    /// Enqueue without waiting, displacing the oldest item when full
    pub fn offer(&self, item: T) -> Result<Offer, MailboxClosed<T>> {
        if self.is_closed() {
            return Err(MailboxClosed(item));
        }
        let displaced = self.shared.ring().push_overwrite(item);
        self.shared.notify.notify_one();
        Ok(match displaced {
            Some(_) => Offer::DisplacedOldest,
            None => Offer::Enqueued,
        })
    }

    /// Stop producing; the receiver drains what is queued and then ends
    pub fn close(&self) {
        if !self.shared.sender_closed.swap(true, Ordering::AcqRel) {
            self.shared.notify.notify_one();
        }
    }

    /// Either end has been closed
    pub fn is_closed(&self) -> bool {
        self.shared.receiver_closed.load(Ordering::Acquire)
            || self.shared.sender_closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

impl<T> Drop for MailboxSender<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read end, owned by one sink worker
pub struct MailboxReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> MailboxReceiver<T> {
    /// Next item in FIFO order
    ///
    /// Returns `None` once the sender has closed and the queue is drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            if let Some(item) = self.try_recv() {
                return Some(item);
            }
            if self.shared.sender_closed.load(Ordering::Acquire) {
                return self.try_recv();
            }
            // notify_one keeps a permit, so an offer between the checks above
            // and this await is not lost
            self.shared.notify.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.shared.ring().try_pop()
    }

    /// Drop everything queued, returning how many items were discarded
    pub fn discard_pending(&mut self) -> usize {
        self.shared.ring().pop_iter().count()
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for MailboxReceiver<T> {
    fn drop(&mut self) {
        self.shared.receiver_closed.store(true, Ordering::Release);
        self.shared.ring().pop_iter().for_each(drop);
    }
}
