//! A bounded, single-producer/single-consumer queue with drop-oldest semantics on
//! overflow, used for the three consumer channels fed by the fan-out dispatcher.
//!
//! `crossbeam_channel`'s bounded channel rejects on overflow rather than evicting, so a
//! plain `Mutex<VecDeque<T>>` plus a `Condvar` is used instead: the dispatcher publishing
//! into a full queue just pops the head before pushing, same as it would with a ring
//! buffer, and the blocked receiver is woken either way.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

struct Inner<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    capacity: usize,
    drops: AtomicU64,
}

pub struct Sender<T>(Arc<Inner<T>>);
pub struct Receiver<T>(Arc<Inner<T>>);

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Sender(self.0.clone())
    }
}

pub fn bounded<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let inner = Arc::new(Inner {
        items: Mutex::new(VecDeque::with_capacity(capacity)),
        not_empty: Condvar::new(),
        capacity,
        drops: AtomicU64::new(0),
    });
    (Sender(inner.clone()), Receiver(inner))
}

impl<T> Sender<T> {
    /// Pushes `value`, dropping the oldest queued item first if the queue is full.
    /// Returns the total number of drops this queue has suffered so far, or `None` if
    /// this push didn't need to drop anything.
    pub fn send_drop_oldest(&self, value: T) -> Option<u64> {
        let mut items = self.0.items.lock().unwrap();
        let dropped = if items.len() >= self.0.capacity {
            items.pop_front();
            Some(self.0.drops.fetch_add(1, Ordering::Relaxed) + 1)
        } else {
            None
        };
        items.push_back(value);
        self.0.not_empty.notify_one();
        dropped
    }

    pub fn drop_count(&self) -> u64 {
        self.0.drops.load(Ordering::Relaxed)
    }
}

impl<T> Receiver<T> {
    /// Blocks for up to `timeout` waiting for an item. `None` means the wait elapsed
    /// with nothing to receive -- this is the worker's suspension point, where it
    /// should check the shutdown flag.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        let items = self.0.items.lock().unwrap();
        let (mut items, result) = self
            .0
            .not_empty
            .wait_timeout_while(items, timeout, |q| q.is_empty())
            .unwrap();
        if result.timed_out() {
            None
        } else {
            items.pop_front()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn drops_oldest_on_overflow() {
        let (tx, rx) = bounded::<u32>(2);
        assert_eq!(tx.send_drop_oldest(1), None);
        assert_eq!(tx.send_drop_oldest(2), None);
        assert_eq!(tx.send_drop_oldest(3), Some(1));
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)), Some(2));
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)), Some(3));
        assert_eq!(tx.drop_count(), 1);
    }

    #[test]
    fn recv_times_out_when_empty() {
        let (_tx, rx) = bounded::<u32>(2);
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)), None);
    }
}
