//! `Port` models the inbound queue of a node as seen from the outside.
//!
//! Any number of producers hold a clone of the sending half and append concurrently; only the
//! owning node holds the [`InputPort`] and drains it. A shared counter tracks how many items are
//! queued but not yet drained, so the driver can tell when nothing is left in flight.
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

pub struct Port<T> {
    tx: mpsc::Sender<T>,
    queued: Arc<AtomicUsize>,
}

// derive would require `T: Clone`
impl<T> Clone for Port<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            queued: Arc::clone(&self.queued),
        }
    }
}

impl<T> fmt::Debug for Port<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("queued", &self.queued.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> Port<T> {
    /// Append to the connected input port.
    /// Returns false if the receiving side has been dropped.
    pub fn put(&self, data: T) -> bool {
        self.queued.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(data).is_err() {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }
}

pub struct InputPort<T> {
    rx: mpsc::Receiver<T>,
    queued: Arc<AtomicUsize>,
}

impl<T> fmt::Debug for InputPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputPort")
            .field("queued", &self.queued())
            .finish()
    }
}

impl<T> InputPort<T> {
    /// Items put but not yet drained.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Take everything that has arrived so far, in arrival order.
    pub fn drain(&self) -> Vec<T> {
        let items: Vec<T> = self.rx.try_iter().collect();
        self.queued.fetch_sub(items.len(), Ordering::AcqRel);
        items
    }
}

/// Create a connected port pair.
pub fn link<T>() -> (Port<T>, InputPort<T>) {
    let (tx, rx) = mpsc::channel();
    let queued = Arc::new(AtomicUsize::new(0));
    (
        Port {
            tx,
            queued: Arc::clone(&queued),
        },
        InputPort { rx, queued },
    )
}
